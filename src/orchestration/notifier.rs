//! Outbound status notifications (chat channel, pager, ...).

use tracing::info;

/// Receives human-readable status text for step starts, completions and
/// failures. Delivery failures are logged by the caller and never abort a run.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// Default notifier: drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards notifications to the log under the `notification` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, text: &str) -> anyhow::Result<()> {
        info!(target: "notification", "📣 {}", text);
        Ok(())
    }
}
