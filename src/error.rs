//! Error types and error handling strategy for Strand.
//!
//! Every fallible operation in the crate returns [`Result`], whose error is the
//! single [`Error`] value type. Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Primitive-level failures (`NotOwner`, `Timeout`, `BrokenBarrier`) surface
//!   synchronously to the caller of the failing operation
//! - Task-level failures are stored in the task's [`Promise`](crate::promise::Promise)
//!   and surface only when the result is observed, wrapped as `Execution`
//! - Panics in user code run by the library are caught and converted to
//!   `Panicked` failures; they never unwind through worker loops
//!
//! # Error Categories
//!
//! - **Ownership**: releasing a lock or signalling a condition without holding it
//! - **Time**: a timed wait elapsed
//! - **Coordination**: a barrier was broken by a failed party
//! - **Task**: a task failed, panicked or was cancelled
//! - **Lifecycle**: submission after shutdown, interrupted blocking calls
//! - **Usage**: invalid arguments and illegal states
//!
//! [`Error`] is `Clone` so that a failed promise can hand the identical failure
//! to every observer, any number of times.

use core::fmt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Ownership ===
    /// Released or signalled a lock the current thread does not hold.
    NotOwner,

    // === Time ===
    /// A timed wait elapsed before the awaited condition held.
    Timeout,

    // === Coordination ===
    /// The barrier was broken by a party that timed out, was interrupted,
    /// or whose barrier action failed.
    BrokenBarrier,

    // === Task ===
    /// The result was requested from a cancelled computation.
    Cancelled,
    /// The computation failed; the cause is available via [`Error::cause`].
    Execution,
    /// User code panicked while running inside the library.
    Panicked,

    // === Lifecycle ===
    /// The task was submitted after shutdown (or to a full queue that rejects).
    Rejected,
    /// A blocking call was interrupted via [`crate::interrupt`].
    Interrupted,

    // === Usage ===
    /// The operation is not valid in the current state.
    IllegalState,
    /// An argument was outside the accepted range.
    InvalidArgument,

    // === User ===
    /// User-provided failure.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotOwner => ErrorCategory::Ownership,
            Self::Timeout => ErrorCategory::Time,
            Self::BrokenBarrier => ErrorCategory::Coordination,
            Self::Cancelled | Self::Execution | Self::Panicked | Self::User => {
                ErrorCategory::Task
            }
            Self::Rejected | Self::Interrupted => ErrorCategory::Lifecycle,
            Self::IllegalState | Self::InvalidArgument => ErrorCategory::Usage,
        }
    }

    /// Returns true if retrying the same operation can reasonably succeed.
    ///
    /// Timeouts and interruptions are transient; everything else reflects
    /// a state that will not change by itself.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Interrupted)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lock and condition ownership violations.
    Ownership,
    /// Elapsed timed waits.
    Time,
    /// Party coordination failures.
    Coordination,
    /// Task outcome failures.
    Task,
    /// Executor lifecycle and thread interruption.
    Lifecycle,
    /// API misuse.
    Usage,
}

/// A captured panic payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    /// The panic message, when the payload was a string.
    pub message: String,
}

impl PanicError {
    /// Extracts a readable message from a `catch_unwind` payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }
}

/// The main error type for Strand operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Release of a lock or condition by a thread that does not hold it.
    #[must_use]
    pub fn not_owner(what: &str) -> Self {
        Self::new(ErrorKind::NotOwner)
            .with_message(format!("current thread does not hold the {what}"))
    }

    /// A timed wait of `after` elapsed.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout).with_message(format!("timed out after {after:?}"))
    }

    /// The barrier is broken.
    #[must_use]
    pub fn broken_barrier() -> Self {
        Self::new(ErrorKind::BrokenBarrier)
    }

    /// The computation was cancelled before it completed.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Wraps a task failure for observation through `get`/`join`.
    #[must_use]
    pub fn execution(cause: Self) -> Self {
        Self::new(ErrorKind::Execution).with_source(cause)
    }

    /// A submission was refused.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected).with_message(reason)
    }

    /// A blocking call observed an interrupt request.
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted)
    }

    /// The operation is not valid in the current state.
    #[must_use]
    pub fn illegal_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalState).with_message(detail)
    }

    /// An argument was outside the accepted range.
    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(detail)
    }

    /// A user-originated failure.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }

    /// Converts a `catch_unwind` payload into a `Panicked` failure.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let panic = PanicError::from_payload(payload);
        Self::new(ErrorKind::Panicked)
            .with_message(panic.message.clone())
            .with_source(panic)
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns the wrapped task failure of an `Execution` error.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        if self.kind != ErrorKind::Execution {
            return None;
        }
        self.source.as_deref().and_then(|s| s.downcast_ref::<Self>())
    }

    /// Follows `Execution` wrappers down to the innermost failure.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Some(inner) = current.cause() {
            current = inner;
        }
        current
    }

    /// Kind of the innermost failure (see [`Error::root`]).
    #[must_use]
    pub fn root_kind(&self) -> ErrorKind {
        self.root().kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(cause) = self.cause() {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl PartialEq for Error {
    /// Errors compare by kind and message; sources are not compared.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl From<PanicError> for Error {
    fn from(e: PanicError) -> Self {
        Self::new(ErrorKind::Panicked)
            .with_message(e.message.clone())
            .with_source(e)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for Strand operations.
pub type Result<T> = core::result::Result<T, Error>;
