//! Progress event sink for mission observability.

use serde_json::Value;
use tracing::info;

/// Receives progress events emitted at run creation, retries, and terminal
/// transitions. Front ends stream these to callers; tests capture them.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, channel: &str, payload: &Value);
}

impl<T: ProgressSink> ProgressSink for std::sync::Arc<T> {
    fn emit(&self, channel: &str, payload: &Value) {
        (**self).emit(channel, payload);
    }
}

/// Default sink that logs events through `tracing`.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, channel: &str, payload: &Value) {
        info!(channel, payload = %payload, "progress");
    }
}
