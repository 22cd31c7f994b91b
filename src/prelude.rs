//! Commonly used types and traits

pub use crate::define_handler;
pub use crate::engine::{Action, Engine, Outcome, RestartReason};
pub use crate::error::{EngineError, HandlerError, TokenError};
pub use crate::page::{
    ActionContext, Choice, Element, ElementId, ElementKind, Page, PageHandler, Render,
    RenderContext, Transition,
};
pub use crate::registry::{Registry, Workflow};
pub use crate::respond::{OutboundMessage, Responder, Transport, Visibility};
pub use crate::store::{Answers, SessionKey, SessionRecord, SessionStore};
pub use crate::token::{Position, Token};
