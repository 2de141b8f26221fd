//! Event handler.
//!
//! Parses one input line, routes it to the control surface (or the queue for
//! `enqueue`), and renders the outcome as a reply.

use serde_json::{Value, json};

use waystation_core::control::CLEANUP_TAG;
use waystation_core::{ControlSurface, Outcome, Trigger};

use crate::error::ServerError;
use crate::protocol::{Event, Reply, WireResponse, payload_bytes};

#[derive(Debug)]
pub struct EventHandler {
    surface: ControlSurface,
}

impl EventHandler {
    pub fn new(surface: ControlSurface) -> Self {
        Self { surface }
    }

    pub fn surface(&self) -> &ControlSurface {
        &self.surface
    }

    /// Reply to one parsed input line. Never fails: errors become error replies.
    pub async fn reply(&self, event: Result<Event, ServerError>) -> Reply {
        let result = match event {
            Ok(event) => self.handle(event).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => Reply::ok(value),
            Err(e) => {
                tracing::warn!(error = %e, "event failed");
                Reply::err(e.into())
            }
        }
    }

    pub async fn handle(&self, event: Event) -> Result<Value, ServerError> {
        if let Event::Enqueue { tag, payload } = &event {
            let item = self.surface.queue().enqueue(tag, payload_bytes(payload)).await?;
            return Ok(json!({ "tag": item.tag, "id": item.id }));
        }

        let Some(trigger) = event.into_trigger() else {
            return Err(ServerError::InvalidEvent("event has no trigger".into()));
        };
        let outcome = self.surface.dispatch(trigger).await?;
        render(outcome)
    }

    /// Scheduled cleanup fired by the driver's timer.
    pub async fn scheduled_prune(&self) {
        match self.surface.dispatch(Trigger::PeriodicSync { tag: CLEANUP_TAG.to_string() }).await {
            Ok(Outcome::Periodic(report)) => {
                tracing::debug!(pruned = ?report.pruned, "scheduled prune finished");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "scheduled prune failed"),
        }
    }
}

pub fn parse(line: &str) -> Result<Event, ServerError> {
    serde_json::from_str(line).map_err(|e| ServerError::InvalidEvent(e.to_string()))
}

fn render(outcome: Outcome) -> Result<Value, ServerError> {
    let value = match outcome {
        Outcome::Installed { precached } => json!({ "precached": precached }),
        Outcome::Activated(report) => serde_json::to_value(report)?,
        Outcome::Response(response) => serde_json::to_value(WireResponse::from(response))?,
        Outcome::Drained(report) => serde_json::to_value(report)?,
        Outcome::Periodic(report) => serde_json::to_value(report)?,
        Outcome::CacheStatus(status) => serde_json::to_value(status)?,
        Outcome::QueueStatus(queues) => json!({ "queues": queues }),
        Outcome::Ack => json!({ "ack": true }),
    };
    Ok(value)
}
