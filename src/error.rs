use thiserror::Error;

/// Errors from the token codec.
///
/// Tokens are the only state that survives a full round trip through the
/// client, so codec failures are resolved entirely inside the engine and
/// never reach page handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The raw string could not be parsed back into a token.
    ///
    /// Covers wrong field counts, empty required fields, and positions
    /// that are neither a page index nor the terminal marker.
    #[error("malformed token: {reason}")]
    Malformed {
        /// What was wrong with the raw string
        reason: &'static str,
    },

    /// The serialized form would exceed the transport width budget.
    ///
    /// This is a construction-time failure. It must be prevented by the
    /// design of field contents and is never shown to a user.
    #[error("token is {len} bytes, limit is {limit}")]
    TooLong {
        /// Length the serialized token would have had
        len: usize,
        /// The hard width cap
        limit: usize,
    },

    /// A field value contains the reserved delimiter.
    ///
    /// Values are rejected at the point of insertion rather than escaped,
    /// keeping the wire format trivially splittable.
    #[error("field '{field}' contains the reserved delimiter")]
    ReservedDelimiter {
        /// Which field was rejected
        field: &'static str,
    },
}

/// A business-logic failure inside a page handler.
///
/// Handlers know nothing about page indices or tokens; they report what
/// went wrong and the engine maps it to a caller-visible failure render
/// while leaving the instance in its pre-failure state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{details}")]
pub struct HandlerError {
    details: String,
}

impl HandlerError {
    /// Creates a handler error from anything printable.
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }

    /// Returns the failure details.
    pub fn details(&self) -> &str {
        &self.details
    }
}

/// Errors that can occur while driving a guided interaction.
///
/// Conditions a user can cause (bad token, expired session, author
/// mismatch, handler failure) are rendered back to them and reported as
/// [`Outcome`](crate::Outcome) variants by the engine; the variants here
/// surface as `Err` only for programming and infrastructure faults.
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// A token codec failure.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The token names a workflow that was never registered.
    #[error("workflow not registered: {0}")]
    UnknownWorkflow(String),

    /// A transition targeted a page outside the registered sequence.
    ///
    /// Retreating from page 0, advancing past the last page, or jumping
    /// beyond the page list are handler programming errors.
    #[error("page {page} out of range for workflow '{workflow}' ({len} pages)")]
    PageOutOfRange {
        /// The workflow whose page list was exceeded
        workflow: String,
        /// The requested page index
        page: usize,
        /// Number of registered pages
        len: usize,
    },

    /// The acting user is not the flow's originator.
    #[error("action author does not match the flow originator")]
    AuthorMismatch,

    /// Session state was required but has expired or was never written.
    #[error("session state expired")]
    SessionExpired,

    /// A second mandatory response was attempted for one inbound action.
    ///
    /// Exactly one of `defer`/`send_first` may occur per action. This is
    /// a programming error in the engine or an adapter, never a
    /// user-facing condition.
    #[error("a response was already sent for this action")]
    DuplicateResponse,

    /// A follow-up or edit was attempted before any first response.
    #[error("follow-up emitted before the mandatory acknowledgment")]
    MissingAcknowledgment,

    /// A page handler failed.
    ///
    /// The instance is left un-advanced and session state is preserved
    /// so the user may retry without losing earlier answers.
    #[error("handler failed on page {page}: {details}")]
    Handler {
        /// The page whose handler failed
        page: usize,
        /// Details about the failure
        details: String,
    },

    /// The platform transport rejected an outbound message.
    #[error("transport failure: {details}")]
    Transport {
        /// Details about the failure
        details: String,
    },

    /// The registry or engine configuration is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_display() {
        let error = TokenError::TooLong {
            len: 120,
            limit: 100,
        };
        assert_eq!(error.to_string(), "token is 120 bytes, limit is 100");

        let error = TokenError::ReservedDelimiter { field: "workflow" };
        assert_eq!(
            error.to_string(),
            "field 'workflow' contains the reserved delimiter"
        );
    }

    #[test]
    fn test_engine_error_display() {
        let error = EngineError::Handler {
            page: 2,
            details: "inventory lookup failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "handler failed on page 2: inventory lookup failed"
        );

        let error = EngineError::UnknownWorkflow("signup".to_string());
        assert_eq!(error.to_string(), "workflow not registered: signup");
    }

    #[test]
    fn test_token_error_converts() {
        let error: EngineError = TokenError::Malformed {
            reason: "wrong field count",
        }
        .into();
        assert_eq!(error.to_string(), "malformed token: wrong field count");
    }

    #[test]
    fn test_handler_error_display() {
        let error = HandlerError::new("role service unreachable");
        assert_eq!(error.to_string(), "role service unreachable");
        assert_eq!(error.details(), "role service unreachable");
    }
}
