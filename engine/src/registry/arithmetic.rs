//! Deterministic arithmetic specialist.
//!
//! Pulls the first arithmetic expression out of a prompt ("what is 15 * 23",
//! "compute (2 + 3) ^ 2", "12 divided by 4") and evaluates it exactly.
//! Prompts without an expression are rejected as unsupported so the
//! dispatcher records a failure instead of a bogus ballot.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};

use super::{Specialist, SpecialistError, SpecialistProfile, SpecialistReply};

pub struct ArithmeticSpecialist {
    profile: SpecialistProfile,
}

impl ArithmeticSpecialist {
    pub fn new(profile: SpecialistProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl Specialist for ArithmeticSpecialist {
    fn profile(&self) -> &SpecialistProfile {
        &self.profile
    }

    async fn call(&self, prompt: &str) -> Result<SpecialistReply, SpecialistError> {
        let expression = extract_expression(prompt)
            .ok_or_else(|| SpecialistError::Unsupported("no arithmetic expression".into()))?;
        let value = evaluate(&expression).map_err(SpecialistError::Unsupported)?;
        Ok(SpecialistReply::text(format_number(value)))
    }
}

/// Nesting limit for parentheses, unary minus and exponent chains.
const MAX_DEPTH: usize = 64;

/// Digits kept after the leading one for fractional results.
const SIGNIFICANT_DIGITS: i32 = 6;

/// Operator words, matched as whole words on the lowercased prompt.
static WORD_OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(divided by|multiplied by|to the power of|times|plus|minus|over)\b").unwrap()
});

fn operator_symbol(caps: &Captures) -> &'static str {
    match &caps[1] {
        "divided by" | "over" => "/",
        "multiplied by" | "times" => "*",
        "to the power of" => "^",
        "plus" => "+",
        _ => "-",
    }
}

fn is_expression_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_whitespace() || "+-*/^().×÷".contains(c)
}

/// Longest run of expression characters containing at least one binary
/// operator between operands.
fn extract_expression(prompt: &str) -> Option<String> {
    let lowered = prompt.to_lowercase();
    let normalized = WORD_OPERATOR
        .replace_all(&lowered, operator_symbol)
        .replace('×', "*")
        .replace('÷', "/");

    let mut best: Option<String> = None;
    let mut current = String::new();
    for c in normalized.chars().chain(std::iter::once('\n')) {
        if is_expression_char(c) && c != '\n' {
            current.push(c);
            continue;
        }
        let candidate = current
            .trim()
            .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
            .to_string();
        if has_binary_operator(&candidate)
            && best.as_ref().map_or(true, |b| candidate.len() > b.len())
        {
            best = Some(candidate);
        }
        current.clear();
    }
    best
}

fn has_binary_operator(candidate: &str) -> bool {
    let chars: Vec<char> = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    chars.iter().enumerate().any(|(i, c)| {
        "+-*/^".contains(*c)
            && i > 0
            && (chars[i - 1].is_ascii_digit() || chars[i - 1] == ')')
            && chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_digit() || *n == '(' || *n == '-' || *n == '.')
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("bad number literal: {literal}"))?;
                tokens.push(Token::Number(value));
            }
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            other => return Err(format!("unexpected character: {other}")),
        }
    }
    Ok(tokens)
}

/// Recursive-descent evaluator.
///
/// ```text
/// expr  := term (('+' | '-') term)*
/// term  := power (('*' | '/') power)*
/// power := unary ('^' power)?
/// unary := '-' unary | atom
/// atom  := number | '(' expr ')'
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    /// Run one recursive step, refusing to go deeper than [`MAX_DEPTH`].
    fn nested(&mut self, step: fn(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        self.depth += 1;
        let value = step(self);
        self.depth -= 1;
        value
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("division by zero".into());
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return Ok(-self.nested(Self::unary)?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Open) => {
                let value = self.nested(Self::expr)?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err("unbalanced parentheses".into()),
                }
            }
            other => Err(format!("unexpected token: {other:?}")),
        }
    }
}

pub(crate) fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = Parser {
        tokens: tokenize(expression)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing input after expression".into());
    }
    if !value.is_finite() {
        return Err("result is not finite".into());
    }
    Ok(value)
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

/// Integers print exactly. Fractions keep at least six decimals and at
/// least [`SIGNIFICANT_DIGITS`] significant digits; magnitudes outside
/// `1e-6..1e15` switch to scientific notation.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let magnitude = value.abs().log10().floor() as i32;
    if !(-6..15).contains(&magnitude) {
        let scientific = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, value);
        return match scientific.split_once('e') {
            Some((mantissa, exponent)) => format!("{}e{exponent}", trim_fraction(mantissa)),
            None => scientific,
        };
    }
    let decimals = (SIGNIFICANT_DIGITS - 1 - magnitude).max(6) as usize;
    trim_fraction(&format!("{value:.decimals$}")).to_string()
}
