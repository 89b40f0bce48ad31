//! JSON-lines serving loop.
//!
//! One task per request line; replies are written as they complete and may
//! interleave across requests. A session's history is snapshotted and
//! extended in read order, before its request is spawned, so follow-ups see
//! every earlier prompt of their session regardless of completion order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use council_engine::{ConversationContext, CouncilEngine, EngineReply, RouteRequest, RoutingStats};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

#[derive(Serialize)]
struct InvalidRequest {
    status: &'static str,
    error: String,
}

async fn write_line<W>(out: &Mutex<W>, encoded: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = out.lock().await;
    out.write_all(encoded.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

async fn answer<W>(
    engine: Arc<CouncilEngine>,
    request: RouteRequest,
    history: Option<ConversationContext>,
    out: Arc<Mutex<W>>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reply = EngineReply::from(engine.handle_with_history(request, history.as_ref()).await);
    write_line(&out, &serde_json::to_string(&reply)?)
        .await
        .context("writing reply")
}

fn log_finished(joined: Result<Result<()>, JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Request task failed"),
        Err(e) => warn!(error = %e, "Request task panicked"),
    }
}

/// Serve `input` until it closes, then drain in-flight requests and hand
/// the writer back.
pub async fn serve<R, W>(engine: CouncilEngine, input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let engine = Arc::new(engine);
    let stats = Arc::new(RoutingStats::new());
    let collector = stats.spawn_collector(engine.events());

    let mut lines = input.lines();
    let out = Arc::new(Mutex::new(output));
    let mut sessions: HashMap<String, ConversationContext> = HashMap::new();
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    info!("Serving JSON-lines requests");
    while let Some(line) = lines.next_line().await.context("reading requests")? {
        while let Some(joined) = tasks.try_join_next() {
            log_finished(joined);
        }
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RouteRequest>(&line) {
            Ok(request) => {
                let history = request.session_id.as_ref().map(|id| {
                    let context = sessions.entry(id.clone()).or_default();
                    let snapshot = context.clone();
                    context.push(request.prompt.clone());
                    snapshot
                });
                tasks.spawn(answer(engine.clone(), request, history, out.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Rejecting malformed request line");
                let encoded = serde_json::to_string(&InvalidRequest {
                    status: "invalid_request",
                    error: e.to_string(),
                })?;
                write_line(&out, &encoded).await?;
            }
        }
    }

    info!(in_flight = tasks.len(), "Input closed, draining requests");
    while let Some(joined) = tasks.join_next().await {
        log_finished(joined);
    }

    // The last engine handle closes the bus; the collector drains and exits.
    drop(engine);
    collector.await.context("stats collector")?;
    let snapshot = stats.snapshot();
    info!(
        requests = snapshot.requests_started,
        completed = snapshot.requests_completed,
        failed = snapshot.requests_failed,
        cost_cents = snapshot.total_cost_cents,
        "Shutting down"
    );

    let out = Arc::try_unwrap(out).map_err(|_| anyhow!("reply writer still shared after drain"))?;
    Ok(out.into_inner())
}
