//! Command Router
//!
//! Entry point for every client command. The router makes sure the player
//! host exists before anything is forwarded to it, relays the host's reply
//! unchanged and tears the host down once a stop leaves nothing playing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::RouterError;
use crate::host::{EngineFactory, HostSlot, Lifecycle};
use crate::message::{Envelope, RawCommand, Reply, Target};

pub struct Router {
    lifecycle: Lifecycle,
}

impl Router {
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self { lifecycle }
    }

    /// Router with a private host slot
    pub fn with_factory(factory: EngineFactory, timeout: Duration) -> Self {
        Self::new(Lifecycle::new(Arc::new(HostSlot::new()), factory, timeout))
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Handle an envelope addressed to the router; others are ignored
    pub fn handle_envelope(&self, envelope: &Envelope) -> Option<Reply> {
        if envelope.target != Target::Router {
            return None;
        }
        Some(self.dispatch(&envelope.kind, &envelope.data))
    }

    /// Route one message; every failure becomes `{ok:false, error}`
    pub fn dispatch(&self, kind: &str, data: &Value) -> Reply {
        debug!("Routing {}", kind);
        self.route(kind, data).unwrap_or_else(|e| {
            error!("{} failed: {}", kind, e);
            Reply::failure(e)
        })
    }

    fn route(&self, kind: &str, data: &Value) -> Result<Reply, RouterError> {
        match kind {
            "ENSURE_PLAYER" => {
                self.lifecycle.get_or_create()?;
                Ok(Reply::ack())
            }
            "PLAYER_COMMAND" => {
                let command: RawCommand =
                    serde_json::from_value(data.clone()).map_err(|e| {
                        RouterError::InvalidMessage {
                            kind: kind.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                self.forward(command)
            }
            other => Err(RouterError::UnknownMessageType(other.to_string())),
        }
    }

    fn forward(&self, command: RawCommand) -> Result<Reply, RouterError> {
        let stop = command.is_stop();
        let kind = command.kind.clone();

        let host = self.lifecycle.get_or_create()?;
        let reply = host.request(command)?;
        drop(host);

        if stop {
            // Cleanup is best effort; the stop itself already succeeded
            if let Err(e) = self.lifecycle.teardown_if_idle() {
                warn!("Idle cleanup after {} failed: {}", kind, e);
            }
        }

        Ok(reply)
    }
}
