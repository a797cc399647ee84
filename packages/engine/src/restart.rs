// ABOUTME: Restart loop run by a container start when restart signals are supplied
// ABOUTME: Restarts the container and reattaches a fresh log generation at the new start time

use crate::container::KILLED_STATUS;
use crate::logs::{LogGeneration, LogQueue};
use crate::runtime::{ContainerRuntime, LogsOptions};
use crate::settings::EngineSettings;
use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parse a runtime start timestamp, falling back to the Unix epoch
pub(crate) fn parse_started_at(started_at: Option<&str>) -> DateTime<Utc> {
    started_at
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) struct RestartSupervisor<'a> {
    runtime: &'a dyn ContainerRuntime,
    id: &'a str,
    settings: &'a EngineSettings,
    ctx: &'a CancellationToken,
    queue: &'a LogQueue,
}

impl<'a> RestartSupervisor<'a> {
    pub(crate) fn new(
        runtime: &'a dyn ContainerRuntime,
        id: &'a str,
        settings: &'a EngineSettings,
        ctx: &'a CancellationToken,
        queue: &'a LogQueue,
    ) -> Self {
        Self {
            runtime,
            id,
            settings,
            ctx,
            queue,
        }
    }

    /// Serve restart signals until exit or until the source closes
    ///
    /// `current` closes the generation attached before the loop started.
    pub(crate) async fn run(
        &self,
        mut restart: mpsc::Receiver<()>,
        mut current: CancellationToken,
    ) -> i64 {
        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancelled() => {
                    debug!("Exit requested for container {}", self.id);
                    current.cancel();
                    return KILLED_STATUS;
                }
                signal = restart.recv() => {
                    if signal.is_none() {
                        debug!("Restart source for container {} closed", self.id);
                        current.cancel();
                        return KILLED_STATUS;
                    }
                    match self.restart_once(&current).await {
                        Ok(next) => current = next,
                        Err(e) => warn!("Skipping restart of container {}: {}", self.id, e),
                    }
                }
            }
        }
    }

    async fn restart_once(&self, current: &CancellationToken) -> Result<CancellationToken> {
        self.runtime
            .restart(self.id, self.settings.restart_timeout)
            .await?;
        let state = self.runtime.inspect(self.id).await?;
        let started_at = parse_started_at(state.started_at.as_deref());
        info!("Restarted container {} at {}", self.id, started_at);

        current.cancel();

        let offset = chrono::Duration::from_std(self.settings.log_since_offset)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let reader = self
            .runtime
            .logs(self.id, LogsOptions::follow_all(Some(started_at - offset)))
            .await?;
        let next = self.ctx.child_token();
        self.queue
            .push(LogGeneration::new(reader, next.clone()))
            .await?;
        Ok(next)
    }
}
