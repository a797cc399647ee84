// ABOUTME: Pieces shared by the staging and runner workflows
// ABOUTME: Log prefix coloring, entrypoint scripts, and best-effort container cleanup

use forge_engine::{Container, EngineError};
use std::sync::Arc;
use tracing::warn;

/// Decorates the `[name]` log label, for example with terminal colors
pub type Color = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Color function that leaves labels untouched
pub fn plain() -> Color {
    Arc::new(|label: &str| label.to_string())
}

/// Prefix written before every log frame of `name`'s container
pub(crate) fn log_prefix(color: &Color, name: &str) -> String {
    format!("{} ", color(&format!("[{}]", name)))
}

/// Entrypoint scripts run by `/bin/bash -c`, followed by the start command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scripts {
    /// Extracts the droplet and launches the app
    pub run: String,
    /// Like `run`, but also syncs `/tmp/local` into the app directory
    pub run_sync: String,
    /// Extracts the droplet and exits, leaving a filesystem ready to commit
    pub commit: String,
}

/// Remove a workflow container, ignoring one that is already gone
pub(crate) async fn remove_container(container: &Container) {
    match container.remove().await {
        Ok(()) | Err(EngineError::ContainerNotFound(_)) => {}
        Err(e) => warn!("Failed to remove container {}: {}", container.name(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_prefix_wraps_colored_label() {
        let color: Color = Arc::new(|label: &str| format!("{} %", label));
        assert_eq!(log_prefix(&color, "some-name"), "[some-name] % ");
        assert_eq!(log_prefix(&plain(), "app"), "[app] ");
    }
}
