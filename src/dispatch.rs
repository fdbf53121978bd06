use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::config::ConfiguredDevice;
use crate::error::ClientError;
use crate::telemetry::Telemetry;

/// Receives what a device client produces.
///
/// Both methods are called from the client's worker task; they should return
/// quickly. Errors and panics are logged by the client and otherwise ignored.
pub trait Consumer: Send + Sync {
    fn on_data(&self, device: &ConfiguredDevice, telemetry: &Telemetry) -> anyhow::Result<()>;

    fn on_error(&self, device: &ConfiguredDevice, error: &ClientError) -> anyhow::Result<()> {
        let _ = (device, error);
        Ok(())
    }
}

/// Invoke `callback`, containing anything it does wrong.
///
/// Returns false when the callback failed or panicked.
pub fn dispatch<F>(name: &'static str, callback: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!(callback = name, "exception in callback! {err:#}");
            false
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(callback = name, "panic in callback! {msg}");
            false
        }
    }
}
