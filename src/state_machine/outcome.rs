//! Success/failure outcomes returned by commands and by task hooks.
//!
//! [`CommandResult`] answers a user command (start, pause, resume, cancel,
//! restart); [`OperationResult`] is what `on_initialize` and `on_start` hand
//! back to the machine. Both carry an optional [`ErrorInfo`]. Illegal
//! transitions and timeouts are never raised as errors; they come back as a
//! failed `CommandResult` with a stable [`ErrorCode`].

use std::fmt;

use serde::Serialize;

use crate::error::HookError;

/// Stable numeric codes for failures generated by the machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    StartWhileInitializing = 100,
    PauseWhileInitializing = 101,
    ResumeWhileInitializing = 102,
    CancelWhileInitializing = 103,
    RestartWhileInitializing = 104,

    PauseBeforeStart = 200,
    ResumeBeforeStart = 201,

    StartWhileWorking = 300,
    ResumeWhileWorking = 301,
    PauseTimeout = 302,
    CancelTimeout = 303,
    CancelHandlingTimeout = 304,

    StartWhilePausing = 400,
    PauseWhilePausing = 401,
    /// PAUSING without a parked worker to hand the cancellation to.
    CancelWithoutParkedWorker = 402,

    AlreadyFinished = 500,
    AlreadyCanceled = 600,
    AlreadyFailed = 700,
    AlreadyFaulted = 800,

    HookFaulted = 900,
    InitializationFailed = 901,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Structured failure details.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    message: String,
    code: Option<ErrorCode>,
    is_system_error: bool,
    cause: Option<HookError>,
}

impl ErrorInfo {
    /// A user-supplied error: no code, not a system error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            is_system_error: false,
            cause: None,
        }
    }

    /// An error generated by the machine.
    pub fn system(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            is_system_error: true,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: HookError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }

    /// Numeric code, zero for user-supplied errors.
    pub fn numeric_code(&self) -> i32 {
        self.code.map(ErrorCode::code).unwrap_or(0)
    }

    pub fn is_system_error(&self) -> bool {
        self.is_system_error
    }

    pub fn cause(&self) -> Option<&HookError> {
        self.cause.as_ref()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.message)?;
        if let Some(cause) = &self.cause {
            let text = cause.cause().to_string();
            if !text.is_empty() {
                write!(f, "\nException: {text}")?;
            }
        }
        Ok(())
    }
}

fn render(f: &mut fmt::Formatter<'_>, success: bool, error: Option<&ErrorInfo>) -> fmt::Result {
    match (success, error) {
        (true, _) => write!(f, "Success"),
        (false, Some(error)) => write!(f, "{error}"),
        (false, None) => write!(f, "Error: "),
    }
}

/// Outcome of a user-issued command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    success: bool,
    error: Option<ErrorInfo>,
}

impl CommandResult {
    pub fn succeed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            success: false,
            error: None,
        }
    }

    pub fn fail_with(error: ErrorInfo) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub(crate) fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::fail_with(ErrorInfo::system(code, message))
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.error.as_ref().and_then(ErrorInfo::code)
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, self.success, self.error.as_ref())
    }
}

/// Outcome of `on_initialize` / `on_start`.
#[derive(Debug, Clone)]
pub struct OperationResult {
    success: bool,
    error: Option<ErrorInfo>,
}

impl OperationResult {
    pub fn succeed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            success: false,
            error: None,
        }
    }

    pub fn fail_with(error: ErrorInfo) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, self.success, self.error.as_ref())
    }
}
