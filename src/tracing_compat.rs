//! Tracing compatibility layer for structured logging and spans.
//!
//! - **With `tracing-integration`**: re-exports from the `tracing` crate.
//! - **Without it**: no-op macros that compile to nothing.
//!
//! ```rust,ignore
//! use strand::tracing_compat::{debug, trace};
//!
//! debug!(parties = 3, "barrier tripped");
//! trace!(worker = 2, "stole task");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, debug_span, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op debug_span macro.
    #[macro_export]
    macro_rules! debug_span {
        ($($arg:tt)*) => {
            $crate::tracing_compat::NoopSpan
        };
    }

    pub use crate::{debug, debug_span, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Span returned by [`debug_span!`] when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy)]
pub struct NoopSpan;

#[cfg(not(feature = "tracing-integration"))]
impl NoopSpan {
    /// Returns self; there is nothing to enter.
    #[inline]
    #[must_use]
    pub const fn entered(self) -> Self {
        self
    }
}
