//! Response emission discipline.
//!
//! Every inbound action owes the transport exactly one mandatory first
//! response (sent directly, or deferred and later completed by an edit),
//! after which any number of follow-ups are allowed. The [`Responder`]
//! is a per-action state machine that makes violations of that contract
//! detectable instead of silently tolerated.

use crate::error::EngineError;
use crate::page::Render;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Who may see an outbound message. Always explicit, never defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Visible only to the acting user.
    CallerOnly,
    /// Visible to everyone in the conversation.
    Broadcast,
}

/// One message leaving the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    /// Wire token the platform must round-trip with any action on this
    /// message's elements. `None` for plain notices and denials.
    pub token: Option<String>,
    /// The rendered page descriptor
    pub render: Render,
    /// Who may see it
    pub visibility: Visibility,
}

impl OutboundMessage {
    /// Creates an uncorrelated message (notice, denial, progress).
    pub fn new(render: Render, visibility: Visibility) -> Self {
        Self {
            token: None,
            render,
            visibility,
        }
    }

    /// Attaches the wire token actions on this message must carry.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// The platform adapter the engine emits through.
///
/// Implementations map [`OutboundMessage`] onto their platform's wire
/// encoding and are expected to meet the transport's acknowledgment
/// deadline for [`defer`](Transport::defer).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the acknowledgment placeholder for a long-running action.
    async fn defer(&self, visibility: Visibility) -> Result<(), EngineError>;

    /// Sends a new message.
    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError>;

    /// Rewrites the most recently sent (or deferred) message in place.
    async fn edit(&self, message: OutboundMessage) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    Pending,
    Deferred,
    Responded,
}

/// Per-action response emitter.
///
/// State machine: `Pending` → (`Deferred` →) `Responded`. The mandatory
/// first response is consumed by [`send_first`](Responder::send_first)
/// or by [`defer`](Responder::defer) (in which case `send_first` becomes
/// the edit of the deferred acknowledgment). A second first response is
/// [`EngineError::DuplicateResponse`]; emitting anything before the
/// first is [`EngineError::MissingAcknowledgment`]. Both are programming
/// errors and are logged, never shown to a user.
pub struct Responder {
    transport: Arc<dyn Transport>,
    state: ResponseState,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("state", &self.state)
            .finish()
    }
}

impl Responder {
    /// Creates the responder for one inbound action.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: ResponseState::Pending,
        }
    }

    /// Returns `true` once the mandatory first response went out.
    pub fn has_responded(&self) -> bool {
        self.state == ResponseState::Responded
    }

    /// Returns `true` while the first response is a pending deferred ack.
    pub fn is_deferred(&self) -> bool {
        self.state == ResponseState::Deferred
    }

    /// Sends the acknowledgment placeholder within the transport
    /// deadline, before any handler logic runs.
    pub async fn defer(&mut self, visibility: Visibility) -> Result<(), EngineError> {
        if self.state != ResponseState::Pending {
            error!("defer attempted after the first response was consumed");
            return Err(EngineError::DuplicateResponse);
        }
        self.transport.defer(visibility).await?;
        self.state = ResponseState::Deferred;
        Ok(())
    }

    /// Emits the mandatory first response.
    ///
    /// After a [`defer`](Responder::defer) this edits the deferred
    /// acknowledgment instead of sending a new message; that edit does
    /// not count as an extra response.
    pub async fn send_first(&mut self, message: OutboundMessage) -> Result<(), EngineError> {
        match self.state {
            ResponseState::Pending => self.transport.send(message).await?,
            ResponseState::Deferred => self.transport.edit(message).await?,
            ResponseState::Responded => {
                error!("second first-response attempted for one action");
                return Err(EngineError::DuplicateResponse);
            }
        }
        self.state = ResponseState::Responded;
        Ok(())
    }

    /// Sends an additional message after (or behind) the first response.
    ///
    /// Allowed any number of times once the first response was sent or
    /// deferred; these are new messages, not replacements.
    pub async fn follow_up(&mut self, message: OutboundMessage) -> Result<(), EngineError> {
        if self.state == ResponseState::Pending {
            error!("follow-up attempted before the mandatory first response");
            return Err(EngineError::MissingAcknowledgment);
        }
        self.transport.send(message).await
    }

    /// Rewrites the already-rendered descriptor in place, e.g. to flip
    /// an element's disabled flag. Does not consume a response slot.
    pub async fn edit_in_place(&mut self, message: OutboundMessage) -> Result<(), EngineError> {
        if self.state != ResponseState::Responded {
            error!("in-place edit attempted before any rendered response");
            return Err(EngineError::MissingAcknowledgment);
        }
        self.transport.edit(message).await
    }
}
