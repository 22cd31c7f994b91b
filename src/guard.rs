//! Author-ownership guard.
//!
//! The originating author is bound into the token when a flow starts
//! and the binding is permanent; nobody else's actions may reach a page
//! handler or touch session state.

use crate::error::EngineError;
use crate::token::Token;
use tracing::warn;

/// Verifies the acting user is the flow's originator.
///
/// # Errors
///
/// `EngineError::AuthorMismatch` when the identities differ. The caller
/// is expected to answer with a caller-only denial and leave all
/// authoritative state untouched.
pub fn verify_author(token: &Token, acting_user: &str) -> Result<(), EngineError> {
    if token.author() == acting_user {
        return Ok(());
    }
    warn!(
        workflow = token.workflow(),
        "denied action by a non-originator"
    );
    Err(EngineError::AuthorMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_originator_passes() {
        let token = Token::new("signup", "user-42").expect("valid token");
        assert!(verify_author(&token, "user-42").is_ok());
    }

    #[test]
    fn test_other_user_denied() {
        let token = Token::new("signup", "user-42").expect("valid token");
        assert!(matches!(
            verify_author(&token, "user-7"),
            Err(EngineError::AuthorMismatch)
        ));
    }
}
