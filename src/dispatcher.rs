use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::handlers::ClipWorkflow;
use crate::transport::InboundEvent;

/// Polls the chat transport and hands events to the workflow
///
/// Events run concurrently up to `max_concurrent_events`; ordering between
/// events of the same user is left to the per-user session locks.
pub struct Dispatcher {
    workflow: Arc<ClipWorkflow>,
    event_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    poll_backoff: Duration,
}

impl Dispatcher {
    pub fn new(workflow: Arc<ClipWorkflow>, config: &DispatchConfig) -> Self {
        let max_concurrent = config.max_concurrent_events.max(1);
        info!("🔧 Initializing Dispatcher with {} concurrent events", max_concurrent);

        Self {
            workflow,
            event_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            poll_backoff: Duration::from_secs(config.poll_backoff_seconds),
        }
    }

    /// Run until `shutdown` resolves, then wait for in-flight events
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut in_flight = JoinSet::new();
        let mut handled: u64 = 0;

        info!("🚀 Dispatcher started");

        loop {
            // Reap finished tasks so panics get logged and the set stays small
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Event task failed: {}", e);
                }
            }

            let events = tokio::select! {
                _ = &mut shutdown => break,
                polled = self.workflow.transport().next_events() => polled,
            };

            let events = match events {
                Ok(events) => events,
                Err(e) => {
                    warn!("Polling failed, retrying in {}s: {}", self.poll_backoff.as_secs(), e);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.poll_backoff) => continue,
                    }
                }
            };

            for event in events {
                handled += 1;
                self.spawn_event(&mut in_flight, event).await;
            }
        }

        info!("🛑 Shutting down, waiting for {} in-flight events", in_flight.len());
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Event task failed: {}", e);
            }
        }

        let stats = self.workflow.sessions().stats().await;
        info!(
            "👋 Dispatcher stopped after {} events ({} sessions dropped)",
            handled, stats.total_sessions
        );
    }

    async fn spawn_event(&self, in_flight: &mut JoinSet<()>, event: InboundEvent) {
        let permit = match Arc::clone(&self.event_semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Event semaphore closed: {}", e);
                return;
            }
        };

        let workflow = Arc::clone(&self.workflow);
        debug!(
            "📨 Dispatching event from user {} ({}/{} slots busy)",
            event.user,
            self.max_concurrent - self.event_semaphore.available_permits(),
            self.max_concurrent
        );

        in_flight.spawn(async move {
            let _permit = permit;
            workflow.handle_event(event).await;
        });
    }
}
