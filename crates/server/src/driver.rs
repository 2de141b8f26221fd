//! Line driver.
//!
//! Fetch events are spawned so a slow origin does not hold up the events
//! behind it. Every other event runs to completion before the next line is
//! read. Replies are written in input order regardless of completion order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, interval_at};

use crate::error::ServerError;
use crate::handler::{EventHandler, parse};
use crate::protocol::Reply;

/// Replies allowed to wait for the writer before reading pauses.
const MAX_IN_FLIGHT: usize = 64;

type PendingReply = oneshot::Receiver<Reply>;

/// Serve events from `input` until EOF or `shutdown`, writing one reply line per event to `output`.
pub async fn run<R, W>(
    handler: Arc<EventHandler>,
    input: R,
    output: W,
    prune_every: Option<Duration>,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (pending, replies) = mpsc::channel::<PendingReply>(MAX_IN_FLIGHT);
    let writer = tokio::spawn(write_replies(replies, output));

    let mut lines = input.lines();
    let mut prune_timer = prune_every.map(|period| interval_at(Instant::now() + period, period));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let event = parse(&line);
                let concurrent = matches!(&event, Ok(event) if event.runs_concurrently());
                let (reply_tx, reply_rx) = oneshot::channel();
                if pending.send(reply_rx).await.is_err() {
                    tracing::warn!("reply writer stopped, no longer reading input");
                    break;
                }

                let handler = Arc::clone(&handler);
                let task = tokio::spawn(async move {
                    let _ = reply_tx.send(handler.reply(event).await);
                });
                if !concurrent && let Err(e) = task.await {
                    tracing::error!(error = %e, "event task failed");
                }
            }
            _ = tick(&mut prune_timer) => handler.scheduled_prune().await,
            () = &mut shutdown => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    drop(pending);
    writer.await?
}

async fn write_replies<W>(mut replies: mpsc::Receiver<PendingReply>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        let reply = reply.await.unwrap_or_else(|_| {
            tracing::error!("event task stopped before replying");
            Reply::err(ServerError::Aborted("event task stopped before replying".into()).into())
        });
        let mut encoded = serde_json::to_vec(&reply)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
        output.flush().await?;
    }
    Ok(())
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::io::AsyncReadExt;
    use tokio::sync::Notify;
    use waystation_core::{AppConfig, CacheManager, ControlSurface, Error, Fetcher, MemoryStore, Request, Response};

    /// `/slow` answers only after `/fast` has been fetched.
    #[derive(Default)]
    struct Gated {
        fast_done: Notify,
    }

    #[async_trait]
    impl Fetcher for Gated {
        async fn fetch(&self, request: &Request) -> Result<Response, Error> {
            if request.url.ends_with("/slow") {
                self.fast_done.notified().await;
            } else if request.url.ends_with("/fast") {
                self.fast_done.notify_one();
            }
            Ok(Response::network(200, BTreeMap::new(), request.url.clone()))
        }
    }

    fn handler() -> Arc<EventHandler> {
        let config = AppConfig { origin: "https://app.example.com".into(), ..Default::default() };
        let manager =
            CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(Gated::default()), config).unwrap();
        Arc::new(EventHandler::new(ControlSurface::new(manager)))
    }

    async fn serve(input: &str) -> Vec<Reply> {
        let (output, mut client) = tokio::io::duplex(1 << 20);
        let driver = run(handler(), input.as_bytes(), output, None, std::future::pending());
        tokio::time::timeout(Duration::from_secs(5), driver).await.expect("driver stalled").unwrap();

        let mut written = String::new();
        client.read_to_string(&mut written).await.unwrap();
        written.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_slow_fetch_does_not_block_later_events() {
        let replies = serve(
            "{\"event\":\"request\",\"url\":\"/slow\"}\n\
             {\"event\":\"request\",\"url\":\"/fast\"}\n",
        )
        .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].result.as_ref().unwrap()["body"], "https://app.example.com/slow");
        assert_eq!(replies[1].result.as_ref().unwrap()["body"], "https://app.example.com/fast");
    }

    #[tokio::test]
    async fn test_lifecycle_events_run_in_order() {
        let replies = serve(
            "{\"event\":\"install\"}\n\
             \n\
             {\"event\":\"activate\"}\n\
             not json\n\
             {\"event\":\"message\",\"kind\":\"GET_CACHE_STATUS\"}\n",
        )
        .await;

        assert_eq!(replies.len(), 4);
        assert!(replies[0].ok);
        assert!(replies[1].ok, "activate raced ahead of install: {:?}", replies[1].error);
        assert_eq!(replies[2].error.as_ref().unwrap().code, "INVALID_EVENT");
        assert_eq!(replies[3].result.as_ref().unwrap()["version"], "v1");
    }
}
