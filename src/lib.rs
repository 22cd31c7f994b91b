//! # Shiori (栞)
//!
//! A lightweight guided-interaction engine for stateless chat
//! transports.
//!
//! The name "Shiori" (栞) means "bookmark" in Japanese: the only durable
//! record of where a user stands in a multi-step flow is a short,
//! width-bounded token that rides along with every client action, the
//! way a bookmark rides along with a book. Everything else — accumulated
//! answers, render state — is reconstructed per action or parked in a
//! TTL-bounded session store.
//!
//! ## Features
//!
//! - **Stateless by construction**: every action is decoded, guarded,
//!   handled, and answered independently; no connection or affinity
//! - **Token codec**: one [`Token`] surface for encoding, decoding, and
//!   deriving the correlation string under a hard width budget
//! - **Author guard**: a flow only ever obeys its originating user
//! - **Async first**: page handlers are `async-trait` objects, free to
//!   await business collaborators and stream progress notices
//! - **Response discipline**: exactly one mandatory acknowledgment per
//!   action, then any number of follow-ups; violations are detected, not
//!   silently tolerated
//! - **TTL-bounded session state**: answers too large for the token live
//!   in a [`SessionStore`] and may expire at any step
//!
//! ## Quick Start
//!
//! ```rust
//! use shiori::prelude::*;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! define_handler!(WelcomeStep);
//!
//! #[async_trait]
//! impl PageHandler for WelcomeStep {
//!     async fn on_action(
//!         &self,
//!         _ctx: &mut ActionContext<'_>,
//!     ) -> Result<Transition, HandlerError> {
//!         Ok(Transition::Finish)
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct StdoutTransport;
//!
//! #[async_trait]
//! impl Transport for StdoutTransport {
//!     async fn defer(&self, _visibility: Visibility) -> Result<(), EngineError> {
//!         Ok(())
//!     }
//!     async fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
//!         println!("-> {}", message.render.title);
//!         Ok(())
//!     }
//!     async fn edit(&self, message: OutboundMessage) -> Result<(), EngineError> {
//!         println!("~> {}", message.render.title);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::builder()
//!         .register(
//!             "hello",
//!             Workflow::new(Visibility::CallerOnly).page(Page::fixed(
//!                 Render::new("Hello", "One click and you're done.")
//!                     .element(Element::button("finish", "Finish")),
//!                 WelcomeStep,
//!             )),
//!         )
//!         .build()
//!         .expect("valid registry");
//!
//!     let engine = Engine::new(
//!         Arc::new(registry),
//!         Arc::new(SessionStore::new(Duration::from_secs(300))),
//!         Arc::new(StdoutTransport),
//!     );
//!
//!     let outcome = engine.start("hello", "user-1").await.expect("start failed");
//!     assert!(matches!(outcome, Outcome::Rendered { page: 0, .. }));
//! }
//! ```
//!
//! ## Driving a flow
//!
//! The platform adapter turns every client interaction into an
//! [`Action`] carrying the acting user, the raw token, the activated
//! element, and any submitted values, then calls [`Engine::resume`].
//! The engine decodes and guards the token, merges the submitted values
//! into the instance's [`Answers`], runs the page's [`PageHandler`],
//! commits at most one [`Transition`], and renders the resulting page
//! through the [`Transport`] — all within the one-acknowledgment
//! response discipline.
//!
//! ## Programmatic pages
//!
//! A page registered with [`Page::programmatic`] computes its descriptor
//! at invocation time. The engine defers the mandatory acknowledgment
//! before invoking it, the handler may emit progress through
//! [`RenderContext::notice`], and the final descriptor is delivered by
//! editing the deferred acknowledgment. If the instance moved on while
//! the descriptor was being produced (another worker applied a newer
//! action), the stale result is discarded rather than rendered.

mod engine;
mod error;
mod guard;
mod page;
mod registry;
mod respond;
mod store;
mod token;

pub mod prelude;

pub use engine::{Action, Engine, Outcome, RestartReason};
pub use error::{EngineError, HandlerError, TokenError};
pub use guard::verify_author;
pub use page::{
    ActionContext, Choice, Element, ElementId, ElementKind, Page, PageHandler, Render,
    RenderContext, Transition,
};
pub use registry::{Registry, RegistryBuilder, Workflow, WorkflowId};
pub use respond::{OutboundMessage, Responder, Transport, Visibility};
pub use store::{AnswerKey, Answers, Cursor, SessionKey, SessionRecord, SessionStore};
pub use token::{Position, Token, DELIMITER, WIDTH_LIMIT};

/// Macro to define a page handler with minimal boilerplate
///
/// This macro creates a handler struct with:
/// - `const NAME: &'static str` - compile-time handler name
/// - `Debug` derive
/// - `Default` implementation
///
/// # Example
///
/// ```rust
/// use shiori::define_handler;
///
/// define_handler!(WelcomeStep);
/// assert_eq!(WelcomeStep::NAME, "WelcomeStep");
/// ```
#[macro_export]
macro_rules! define_handler {
    ($name:ident) => {
        #[derive(Debug)]
        pub struct $name;

        impl $name {
            /// Handler name as a compile-time constant
            #[allow(dead_code)]
            pub const NAME: &'static str = stringify!($name);
        }

        impl Default for $name {
            fn default() -> Self {
                Self
            }
        }
    };
}
