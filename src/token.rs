//! Delimited, width-capped correlation token.
//!
//! The token is the only piece of state guaranteed to survive a full
//! round trip through the client. It rides along with every action as an
//! opaque string, so every field lives under a hard width budget and the
//! codec is the single place that splits or joins it.

use crate::error::TokenError;
use std::fmt;

/// Hard cap on the serialized token, in bytes.
///
/// Set by the hosting transport's limit on opaque correlation strings.
pub const WIDTH_LIMIT: usize = 100;

/// Reserved field delimiter.
///
/// Guaranteed not to appear in platform-native identifiers; field values
/// containing it are rejected at insertion rather than escaped.
pub const DELIMITER: char = ':';

/// Wire marker for the terminal position.
const TERMINAL_MARK: &str = "end";

/// Where a workflow instance stands: on a page, or finished.
///
/// Terminality is encoded in the token itself so that an instance stays
/// absorbing even after its session record has expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// On the page with this index.
    Page(usize),
    /// The absorbing end state.
    Terminal,
}

impl Position {
    /// Returns the page index, or `None` at terminal.
    pub fn page(&self) -> Option<usize> {
        match self {
            Position::Page(index) => Some(*index),
            Position::Terminal => None,
        }
    }

    /// Returns `true` for the terminal position.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Position::Terminal)
    }

    fn parse(raw: &str) -> Result<Self, TokenError> {
        if raw == TERMINAL_MARK {
            return Ok(Position::Terminal);
        }
        raw.parse::<usize>()
            .map(Position::Page)
            .map_err(|_| TokenError::Malformed {
                reason: "position is neither a page index nor the terminal marker",
            })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Page(index) => write!(f, "{}", index),
            Position::Terminal => write!(f, "{}", TERMINAL_MARK),
        }
    }
}

/// The opaque correlation token, decoded.
///
/// An immutable value object over a fixed, ordered field tuple: workflow
/// id, position, originating author, optional activated element id, and
/// zero or more free-form fragments (fragment 0 carries the session
/// correlation id once a flow has started).
///
/// A token is created once per flow invocation and thereafter derived,
/// never mutated: the `with_*` methods re-serialize the whole tuple with
/// one field substituted and re-check the width budget.
///
/// # Examples
///
/// ```
/// use shiori::{Position, Token};
///
/// let token = Token::new("signup", "user-42")?;
/// let wire = token.encode()?;
/// assert_eq!(Token::decode(&wire)?, token);
///
/// let advanced = token.with_position(Position::Page(1))?;
/// assert_eq!(advanced.position(), Position::Page(1));
/// assert_eq!(advanced.author(), token.author());
/// # Ok::<(), shiori::TokenError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    workflow: String,
    position: Position,
    author: String,
    element: Option<String>,
    fragments: Vec<String>,
}

fn reject_delimiter(field: &'static str, value: &str) -> Result<(), TokenError> {
    if value.contains(DELIMITER) {
        return Err(TokenError::ReservedDelimiter { field });
    }
    Ok(())
}

impl Token {
    /// Creates a fresh token bound to page 0 of `workflow`.
    ///
    /// The author binding is permanent for the life of the instance.
    ///
    /// # Errors
    ///
    /// Fails if either field is empty, contains the delimiter, or the
    /// serialized form would exceed [`WIDTH_LIMIT`].
    pub fn new(workflow: impl Into<String>, author: impl Into<String>) -> Result<Self, TokenError> {
        let workflow = workflow.into();
        let author = author.into();
        if workflow.is_empty() {
            return Err(TokenError::Malformed {
                reason: "workflow id must not be empty",
            });
        }
        if author.is_empty() {
            return Err(TokenError::Malformed {
                reason: "author id must not be empty",
            });
        }
        reject_delimiter("workflow", &workflow)?;
        reject_delimiter("author", &author)?;

        let token = Self {
            workflow,
            position: Position::Page(0),
            author,
            element: None,
            fragments: Vec::new(),
        };
        token.check_width()?;
        Ok(token)
    }

    /// Parses a raw wire string back into a token.
    ///
    /// # Errors
    ///
    /// Fails `TokenError::Malformed` on a wrong field count, an empty
    /// required field, an unparsable position, or an over-budget input.
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        if raw.len() > WIDTH_LIMIT {
            return Err(TokenError::Malformed {
                reason: "raw token exceeds the width budget",
            });
        }
        let parts: Vec<&str> = raw.split(DELIMITER).collect();
        if parts.len() < 4 {
            return Err(TokenError::Malformed {
                reason: "wrong field count",
            });
        }
        if parts[0].is_empty() {
            return Err(TokenError::Malformed {
                reason: "workflow id must not be empty",
            });
        }
        if parts[2].is_empty() {
            return Err(TokenError::Malformed {
                reason: "author id must not be empty",
            });
        }
        let position = Position::parse(parts[1])?;
        let element = if parts[3].is_empty() {
            None
        } else {
            Some(parts[3].to_string())
        };
        Ok(Self {
            workflow: parts[0].to_string(),
            position,
            author: parts[2].to_string(),
            element,
            fragments: parts[4..].iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Serializes the token for the wire.
    ///
    /// # Errors
    ///
    /// Fails closed with `TokenError::TooLong` past [`WIDTH_LIMIT`].
    pub fn encode(&self) -> Result<String, TokenError> {
        let raw = self.join();
        if raw.len() > WIDTH_LIMIT {
            return Err(TokenError::TooLong {
                len: raw.len(),
                limit: WIDTH_LIMIT,
            });
        }
        Ok(raw)
    }

    fn join(&self) -> String {
        let mut raw = format!(
            "{}{}{}{}{}{}{}",
            self.workflow,
            DELIMITER,
            self.position,
            DELIMITER,
            self.author,
            DELIMITER,
            self.element.as_deref().unwrap_or_default(),
        );
        for fragment in &self.fragments {
            raw.push(DELIMITER);
            raw.push_str(fragment);
        }
        raw
    }

    fn check_width(&self) -> Result<(), TokenError> {
        self.encode().map(|_| ())
    }

    /// Derives a token at a different position, all other fields kept.
    pub fn with_position(&self, position: Position) -> Result<Self, TokenError> {
        let token = Self {
            position,
            ..self.clone()
        };
        token.check_width()?;
        Ok(token)
    }

    /// Derives a token recording which element fired, or clearing it.
    pub fn with_element(&self, element: Option<&str>) -> Result<Self, TokenError> {
        if let Some(value) = element {
            reject_delimiter("element", value)?;
        }
        let token = Self {
            element: element.map(str::to_string),
            ..self.clone()
        };
        token.check_width()?;
        Ok(token)
    }

    /// Derives a token with fragment `index` set to `value`.
    ///
    /// The fragment list is padded with empty fields if `index` lies past
    /// its current end.
    pub fn with_fragment(&self, index: usize, value: impl Into<String>) -> Result<Self, TokenError> {
        let value = value.into();
        reject_delimiter("fragment", &value)?;
        let mut fragments = self.fragments.clone();
        if index >= fragments.len() {
            fragments.resize(index + 1, String::new());
        }
        fragments[index] = value;
        let token = Self {
            fragments,
            ..self.clone()
        };
        token.check_width()?;
        Ok(token)
    }

    /// Returns the workflow id.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Returns the position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Returns the originating author id.
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Returns the activated element id, if one was recorded.
    pub fn element(&self) -> Option<&str> {
        self.element.as_deref()
    }

    /// Returns the free-form fragments.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Returns fragment `index`, if present.
    pub fn fragment(&self, index: usize) -> Option<&str> {
        self.fragments.get(index).map(String::as_str)
    }

    /// Returns the session correlation id (fragment 0), if present.
    pub fn session(&self) -> Option<&str> {
        self.fragment(0).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Token {
        Token::new("signup", "user-42")
            .and_then(|t| t.with_fragment(0, "a1b2c3d4"))
            .expect("valid token")
    }

    #[test]
    fn test_round_trip() {
        let token = sample();
        let wire = token.encode().expect("encodes");
        assert_eq!(Token::decode(&wire).expect("decodes"), token);
    }

    #[test]
    fn test_wire_layout() {
        let wire = sample().encode().expect("encodes");
        assert_eq!(wire, "signup:0:user-42::a1b2c3d4");
    }

    #[test]
    fn test_width_budget_fails_closed() {
        let token = Token::new("signup", "user-42").expect("valid token");
        let result = token.with_fragment(1, "x".repeat(WIDTH_LIMIT));
        assert!(matches!(
            result,
            Err(TokenError::TooLong {
                limit: WIDTH_LIMIT,
                ..
            })
        ));
    }

    #[test]
    fn test_delimiter_rejected_at_insertion() {
        assert_eq!(
            Token::new("sign:up", "user-42"),
            Err(TokenError::ReservedDelimiter { field: "workflow" })
        );
        let token = sample();
        assert_eq!(
            token.with_element(Some("a:b")),
            Err(TokenError::ReservedDelimiter { field: "element" })
        );
        assert_eq!(
            token.with_fragment(1, "x:y"),
            Err(TokenError::ReservedDelimiter { field: "fragment" })
        );
    }

    #[test]
    fn test_with_position_changes_one_field() {
        let token = sample();
        let moved = token.with_position(Position::Page(3)).expect("derives");

        let before = token.encode().expect("encodes");
        let after = moved.encode().expect("encodes");
        let before: Vec<&str> = before.split(DELIMITER).collect();
        let after: Vec<&str> = after.split(DELIMITER).collect();

        assert_eq!(before.len(), after.len());
        for (index, (b, a)) in before.iter().zip(&after).enumerate() {
            if index == 1 {
                assert_eq!(*b, "0");
                assert_eq!(*a, "3");
            } else {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn test_terminal_survives_round_trip() {
        let token = sample().with_position(Position::Terminal).expect("derives");
        let wire = token.encode().expect("encodes");
        assert_eq!(wire, "signup:end:user-42::a1b2c3d4");
        let decoded = Token::decode(&wire).expect("decodes");
        assert!(decoded.position().is_terminal());
    }

    #[test]
    fn test_decode_malformed() {
        for raw in ["", "signup:0", "signup:zero:user-42:", ":0:user-42:", "signup:0::"] {
            assert!(matches!(
                Token::decode(raw),
                Err(TokenError::Malformed { .. })
            ));
        }
    }

    #[test]
    fn test_element_field_optional() {
        let token = sample().with_element(Some("next")).expect("derives");
        let decoded = Token::decode(&token.encode().expect("encodes")).expect("decodes");
        assert_eq!(decoded.element(), Some("next"));

        let cleared = decoded.with_element(None).expect("derives");
        assert_eq!(cleared.element(), None);
    }

    #[test]
    fn test_session_fragment() {
        assert_eq!(sample().session(), Some("a1b2c3d4"));
        let bare = Token::new("signup", "user-42").expect("valid token");
        assert_eq!(bare.session(), None);
    }
}
