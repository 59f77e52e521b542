//! Error taxonomy.
//!
//! - [`CapacityError`](crate::descriptor::CapacityError) is recoverable and
//!   returned to the caller. Size the descriptor tables at device creation
//!   to avoid it.
//! - [`StateError`] is a broken contract on the caller's side. It is logged
//!   and then panics.
//! - [`hal::DeviceError`] while recording or submitting means the command
//!   stream can no longer be trusted. It is logged with context and the
//!   process aborts.

use std::fmt;

use thiserror::Error;

use crate::command::RecorderState;

/// Illegal use of a recorder.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum StateError {
    #[error("`{operation}` is not allowed while the recorder is {state:?}")]
    IllegalOperation {
        operation: &'static str,
        state: RecorderState,
    },
    #[error("`{operation}` opens a scope while the recorder is already {state:?}")]
    NestedScope {
        operation: &'static str,
        state: RecorderState,
    },
    #[error("reset while submission {0} is still executing")]
    ResetWhileExecuting(crate::SubmissionIndex),
    #[error("push constant range {offset}..{end} exceeds the {max} byte limit")]
    PushConstantsOutOfRange { offset: u32, end: usize, max: usize },
    #[error("{what} {index} is out of range for {label:?}, which has {count}")]
    SubresourceOutOfRange {
        what: &'static str,
        index: u32,
        count: u32,
        label: String,
    },
    #[error("ending a debug marker that was never started")]
    UnbalancedDebugMarker,
    #[error("{count} color targets given, at most {max} are supported")]
    TooManyColorTargets { count: usize, max: usize },
    #[error("{what} range {start}..{end} is reversed")]
    ReversedRange {
        what: &'static str,
        start: u32,
        end: u32,
    },
    #[error("fence {0:?} belongs to another device")]
    ForeignFence(String),
}

/// Reports a broken usage contract and panics.
#[track_caller]
pub(crate) fn misuse(label: &str, error: StateError) -> ! {
    log::error!("Recorder {:?}: {}", label, error);
    panic!("Recorder {:?}: {}", label, error)
}

/// Reports a native backend failure and terminates the process.
///
/// A lost device or a half-recorded native command stream cannot be
/// recovered from, so there is no way to continue.
#[cold]
pub(crate) fn fatal(context: fmt::Arguments, error: hal::DeviceError) -> ! {
    log::error!("Fatal backend failure in {}: {}", context, error);
    std::process::abort()
}

/// Unwraps a native result, routing the error to [`fatal`].
macro_rules! fatal_on_error {
    ($result:expr, $($context:tt)+) => {
        match $result {
            Ok(value) => value,
            Err(error) => $crate::error::fatal(format_args!($($context)+), error),
        }
    };
}
pub(crate) use fatal_on_error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_display() {
        let error = StateError::IllegalOperation {
            operation: "draw",
            state: RecorderState::Ended,
        };
        assert_eq!(
            error.to_string(),
            "`draw` is not allowed while the recorder is Ended"
        );
    }
}
