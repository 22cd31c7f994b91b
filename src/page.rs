//! Pages, interactive elements, and the page-handler contract.

use crate::error::{EngineError, HandlerError};
use crate::respond::{OutboundMessage, Responder, Visibility};
use crate::store::Answers;
use crate::token::Token;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Type-safe element id wrapper.
///
/// Element ids are only unique within their page; see
/// [`AnswerKey`](crate::AnswerKey) for the globally unique pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(String);

impl ElementId {
    /// Creates a new ElementId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One option of a select element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Value submitted when picked
    pub value: String,
    /// Human-readable label
    pub label: String,
}

impl Choice {
    /// Creates a choice.
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Variant-specific shape of an interactive element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    /// A plain button.
    Button,
    /// A select allowing exactly one choice.
    SingleSelect {
        /// Available options
        options: Vec<Choice>,
    },
    /// A select allowing between `min` and `max` choices.
    MultiSelect {
        /// Available options
        options: Vec<Choice>,
        /// Minimum number of selectable values
        min: usize,
        /// Maximum number of selectable values
        max: usize,
    },
    /// A free-text input.
    TextInput {
        /// Placeholder shown while empty
        placeholder: Option<String>,
        /// Whether a value must be submitted
        required: bool,
    },
}

/// One interactive element of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Page-local id
    pub id: ElementId,
    /// Label or prompt
    pub label: String,
    /// Whether the element is currently inert
    pub disabled: bool,
    /// Variant and constraints
    pub kind: ElementKind,
}

impl Element {
    /// Creates a button.
    pub fn button(id: impl Into<ElementId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            disabled: false,
            kind: ElementKind::Button,
        }
    }

    /// Creates a single-choice select.
    pub fn single_select(
        id: impl Into<ElementId>,
        label: impl Into<String>,
        options: Vec<Choice>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            disabled: false,
            kind: ElementKind::SingleSelect { options },
        }
    }

    /// Creates a multi-choice select accepting `min..=max` values.
    pub fn multi_select(
        id: impl Into<ElementId>,
        label: impl Into<String>,
        options: Vec<Choice>,
        min: usize,
        max: usize,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            disabled: false,
            kind: ElementKind::MultiSelect { options, min, max },
        }
    }

    /// Creates an optional free-text input.
    pub fn text_input(id: impl Into<ElementId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            disabled: false,
            kind: ElementKind::TextInput {
                placeholder: None,
                required: false,
            },
        }
    }

    /// Sets the placeholder of a text input. No-op for other kinds.
    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        if let ElementKind::TextInput { placeholder, .. } = &mut self.kind {
            *placeholder = Some(text.into());
        }
        self
    }

    /// Marks a text input as required. No-op for other kinds.
    pub fn required(mut self) -> Self {
        if let ElementKind::TextInput { required, .. } = &mut self.kind {
            *required = true;
        }
        self
    }

    /// Marks the element inert.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// The outbound descriptor of one rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Render {
    /// Title line
    pub title: String,
    /// Body text
    pub body: String,
    /// Interactive elements, in display order
    pub elements: Vec<Element>,
}

impl Render {
    /// Creates a render with no elements.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            elements: Vec::new(),
        }
    }

    /// Appends an element.
    pub fn element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }
}

/// What a handler wants to happen after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the next page and render it immediately.
    Advance,
    /// Move to the previous page and render it immediately.
    Retreat,
    /// Jump to an arbitrary page, for branching flows.
    JumpTo(usize),
    /// Enter the absorbing terminal state.
    Finish,
}

/// Context handed to [`PageHandler::on_action`].
///
/// The engine has already merged the action's submitted values into
/// `answers`; the handler may adjust them further. All writes are
/// committed by the orchestrator only if the handler succeeds.
pub struct ActionContext<'a> {
    /// The decoded token of this action
    pub token: &'a Token,
    /// The page the action fired on
    pub page: usize,
    /// The acting (and originating) author
    pub author: &'a str,
    /// The activated element, if any
    pub element: Option<&'a ElementId>,
    /// The values submitted with the action
    pub values: &'a [String],
    /// Accumulated answers of this instance
    pub answers: &'a mut Answers,
    fragment_updates: Vec<(usize, String)>,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(
        token: &'a Token,
        page: usize,
        author: &'a str,
        element: Option<&'a ElementId>,
        values: &'a [String],
        answers: &'a mut Answers,
    ) -> Self {
        Self {
            token,
            page,
            author,
            element,
            values,
            answers,
            fragment_updates: Vec::new(),
        }
    }

    /// Stores a workflow-specific value in token fragment `slot`.
    ///
    /// Slots are applied by the orchestrator when it derives the next
    /// token; slot 0 here is the first fragment after the engine's
    /// reserved session fragment. Values share the token width budget,
    /// so keep them short.
    pub fn set_fragment(&mut self, slot: usize, value: impl Into<String>) {
        self.fragment_updates.push((slot, value.into()));
    }

    /// Reads a workflow-specific fragment stored by an earlier action.
    pub fn fragment(&self, slot: usize) -> Option<&str> {
        self.token.fragment(slot + 1)
    }

    pub(crate) fn take_fragment_updates(&mut self) -> Vec<(usize, String)> {
        std::mem::take(&mut self.fragment_updates)
    }
}

/// Context handed to [`PageHandler::render`] on programmatic pages.
pub struct RenderContext<'a> {
    /// The token the page is being rendered for
    pub token: &'a Token,
    /// The page being rendered
    pub page: usize,
    /// The flow's originating author
    pub author: &'a str,
    /// Accumulated answers of this instance
    pub answers: &'a Answers,
    responder: &'a mut Responder,
    visibility: Visibility,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        token: &'a Token,
        page: usize,
        author: &'a str,
        answers: &'a Answers,
        responder: &'a mut Responder,
        visibility: Visibility,
    ) -> Self {
        Self {
            token,
            page,
            author,
            answers,
            responder,
            visibility,
        }
    }

    /// Emits an intermediate progress notice.
    ///
    /// Notices pass straight to the transport without touching
    /// orchestrator state; only the descriptor returned from
    /// [`PageHandler::render`] is authoritative for this invocation.
    pub async fn notice(&mut self, render: Render) -> Result<(), EngineError> {
        self.responder
            .follow_up(OutboundMessage::new(render, self.visibility))
            .await
    }
}

/// Business logic of one page.
///
/// Handlers are pure collaborators: they never talk to the transport or
/// the store directly, and the engine guarantees a handler only ever
/// runs for the flow's originating author.
///
/// # Examples
///
/// ```
/// use shiori::{ActionContext, HandlerError, PageHandler, Transition};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct ConfirmStep;
///
/// #[async_trait]
/// impl PageHandler for ConfirmStep {
///     async fn on_action(
///         &self,
///         ctx: &mut ActionContext<'_>,
///     ) -> Result<Transition, HandlerError> {
///         match ctx.element.map(|e| e.as_str()) {
///             Some("confirm") => Ok(Transition::Finish),
///             Some("back") => Ok(Transition::Retreat),
///             _ => Err(HandlerError::new("unexpected element")),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait PageHandler: Send + Sync + Debug {
    /// Decides the transition for an action on this page.
    async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError>;

    /// Computes the descriptor of a programmatic page.
    ///
    /// May emit intermediate progress through
    /// [`RenderContext::notice`] before returning the final descriptor.
    /// Fixed pages never call this.
    async fn render(&self, _ctx: &mut RenderContext<'_>) -> Result<Render, HandlerError> {
        Err(HandlerError::new("page has no programmatic descriptor"))
    }
}

#[derive(Debug)]
pub(crate) enum PageKind {
    Fixed(Render),
    Programmatic,
}

/// One step of a workflow: a descriptor and its handler.
pub struct Page {
    kind: PageKind,
    handler: Arc<dyn PageHandler>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("kind", &self.kind)
            .field("handler", &self.handler)
            .finish()
    }
}

impl Page {
    /// Creates a page whose descriptor is fixed at registration time.
    pub fn fixed(descriptor: Render, handler: impl PageHandler + 'static) -> Self {
        Self {
            kind: PageKind::Fixed(descriptor),
            handler: Arc::new(handler),
        }
    }

    /// Creates a page whose descriptor is computed at invocation time.
    pub fn programmatic(handler: impl PageHandler + 'static) -> Self {
        Self {
            kind: PageKind::Programmatic,
            handler: Arc::new(handler),
        }
    }

    /// Returns `true` if the descriptor is computed at invocation time.
    pub fn is_programmatic(&self) -> bool {
        matches!(self.kind, PageKind::Programmatic)
    }

    pub(crate) fn descriptor(&self) -> Option<&Render> {
        match &self.kind {
            PageKind::Fixed(render) => Some(render),
            PageKind::Programmatic => None,
        }
    }

    pub(crate) fn handler(&self) -> &Arc<dyn PageHandler> {
        &self.handler
    }
}
