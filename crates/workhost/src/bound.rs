use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use workhost_core::{ContextBoundConfig, ContextEvent, ContextRegistry, OwningContext, WorkerError};

use crate::supervisor::{HostServices, WorkerSupervisor};

/// A supervisor whose worker lifetime can be bound to an owning context.
///
/// Composes the plain [`WorkerSupervisor`] instead of specializing it:
/// everything except `start` is the inner supervisor's surface, reachable
/// through [`ContextBoundSupervisor::supervisor`].
pub struct ContextBoundSupervisor {
    supervisor: WorkerSupervisor,
    registry: Arc<dyn ContextRegistry>,
}

impl ContextBoundSupervisor {
    pub fn new(services: HostServices, registry: Arc<dyn ContextRegistry>) -> Self {
        Self {
            supervisor: WorkerSupervisor::new(services),
            registry,
        }
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    /// Starts the worker on behalf of its owning context and exchanges the
    /// application-level channel with it.
    ///
    /// A context that cannot be resolved (or is already torn down) refuses
    /// the spawn but still reports `Ok(true)`: callers treat a vanished
    /// context like a worker that exited immediately, not like a start
    /// failure. Callers that need to distinguish the two must watch the
    /// event channel.
    pub async fn start(&self, config: ContextBoundConfig) -> Result<bool, WorkerError> {
        let context = match self.registry.resolve(config.response_context_id) {
            Some(context) if !context.is_destroyed() => context,
            _ => {
                warn!(
                    context = config.response_context_id,
                    kind = %config.worker.kind,
                    "refusing to start worker: owning context is gone"
                );
                return Ok(true);
            }
        };

        let started = self.supervisor.start(config.worker.clone()).await?;
        if !started {
            return Ok(false);
        }

        if config.context_lifecycle_bound {
            self.arm_lifecycle_triggers(context.clone());
        }

        // Channel handshake: the context learns its endpoint out of band,
        // paired to the original request by channel name and nonce.
        let port = self.supervisor.connect(config.worker.payload.clone());
        context.deliver_port(&config.response_channel, &config.response_nonce, port);

        Ok(true)
    }

    /// Kills the worker when the owning context reloads or closes. Armed
    /// only for lifecycle-bound workers; an unbound worker outlives
    /// context churn.
    fn arm_lifecycle_triggers(&self, context: Arc<dyn OwningContext>) {
        let supervisor = self.supervisor.clone();
        let terminated = supervisor.termination_token();
        let mut lifecycle = context.lifecycle();
        let context_id = context.id();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = terminated.cancelled() => break,
                    event = lifecycle.recv() => event,
                };
                match event {
                    Ok(ContextEvent::WillReload) | Ok(ContextEvent::Closed) => {
                        info!(context = context_id, "owning context went away; killing worker");
                        supervisor.kill().await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
