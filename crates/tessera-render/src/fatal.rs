//! Fatal error policy.
//!
//! Errors from the binding and frame-sync core are not recoverable mid-frame.
//! Components return them with `?`; the driver hands them to this module,
//! which logs once and aborts without unwinding.

use std::fmt::Display;

use tessera_gpu::GpuError;
use tracing::error;

/// Log `err` and abort the process.
#[track_caller]
pub fn abort_on_error(err: &GpuError) -> ! {
    let caller = std::panic::Location::caller();
    error!(
        device_lost = err.is_device_lost(),
        %caller,
        "{}",
        fatal_message(err)
    );
    std::process::abort()
}

/// Text logged for a fatal error.
pub fn fatal_message(err: &impl Display) -> String {
    format!("Fatal renderer error: {err}")
}

/// Route an error to [`abort_on_error`].
pub trait OrFatal<T> {
    /// Return the value or abort the process.
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T, GpuError> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => abort_on_error(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use tessera_gpu::VkResultExt;

    #[test]
    fn message_names_call_and_result() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .check("vkQueueSubmit")
            .unwrap_err();
        let message = fatal_message(&err);

        assert!(message.starts_with("Fatal renderer error: "));
        assert!(message.contains("vkQueueSubmit"));
        assert!(message.contains("ERROR_DEVICE_LOST"));
        assert!(message.contains("fatal.rs"));
    }

    #[test]
    fn success_passes_through() {
        let value: Result<u32, GpuError> = Ok(7);
        assert_eq!(value.or_fatal(), 7);
    }
}
