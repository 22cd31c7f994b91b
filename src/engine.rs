//! The orchestrator driving guided interactions.
//!
//! Each inbound action is an independent unit of execution: the engine
//! reconstructs the instance from the token (and, when present, the
//! session record), runs exactly one page handler, commits at most one
//! transition, and emits through the response discipline. Nothing here
//! assumes a persistent connection or server affinity.

use crate::error::EngineError;
use crate::guard;
use crate::page::{ActionContext, ElementId, Render, RenderContext, Transition};
use crate::registry::{Registry, Workflow};
use crate::respond::{OutboundMessage, Responder, Transport, Visibility};
use crate::store::{Answers, Cursor, SessionKey, SessionRecord, SessionStore};
use crate::token::{Position, Token};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One inbound client action, as delivered by the platform adapter.
#[derive(Debug, Clone)]
pub struct Action {
    /// Who triggered the action
    pub user: String,
    /// The raw correlation token that rode along with it
    pub token: String,
    /// The activated element, if the action came from one
    pub element: Option<ElementId>,
    /// Submitted values (select choices, text input)
    pub values: Vec<String>,
}

impl Action {
    /// Creates an action with no element or values.
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            element: None,
            values: Vec::new(),
        }
    }

    /// Sets the activated element.
    pub fn element(mut self, id: impl Into<ElementId>) -> Self {
        self.element = Some(id.into());
        self
    }

    /// Sets the submitted values.
    pub fn values(mut self, values: Vec<String>) -> Self {
        self.values = values;
        self
    }
}

/// Why the user was asked to restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The token could not be decoded or carried no session id.
    MalformedToken,
    /// Session state was required but has expired.
    SessionExpired,
}

/// What one `start`/`resume` call did.
///
/// Conditions a user can trigger are reported here after the matching
/// render was emitted; `Err` from the engine is reserved for programming
/// and infrastructure faults.
#[derive(Debug)]
pub enum Outcome {
    /// A page was rendered; `token` is its wire token.
    Rendered {
        /// Wire token embedded in the rendered page
        token: String,
        /// Index of the rendered page
        page: usize,
    },
    /// The flow reached terminal on this action.
    Finished,
    /// A terminal instance absorbed a late or duplicate action.
    Acknowledged,
    /// A non-originator was turned away.
    Denied,
    /// The user was asked to start over.
    RestartRequired {
        /// Why a restart was required
        reason: RestartReason,
    },
    /// The page handler failed; state was preserved for a retry.
    Failed {
        /// The page whose handler failed
        page: usize,
    },
    /// A stale action or stale render was dropped unapplied.
    Discarded,
}

/// The guided-interaction engine.
///
/// Holds the read-only [`Registry`], the TTL-bounded [`SessionStore`],
/// and the platform [`Transport`]. Cheap to share behind an `Arc`; one
/// engine serves any number of concurrent flows.
pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .finish()
    }
}

impl Engine {
    /// Creates an engine over a registry, store, and transport.
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a new instance of `workflow` for `user`.
    ///
    /// Mints a fresh token bound to page 0 with the author fixed for the
    /// life of the instance, writes the initial session record, and
    /// renders the first page.
    pub async fn start(&self, workflow: &str, user: &str) -> Result<Outcome, EngineError> {
        let flow = self
            .registry
            .get(workflow)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow.to_string()))?;

        let session = short_session_id();
        let token = Token::new(workflow, user)?.with_fragment(0, &session)?;
        let key = SessionKey::new(workflow, user, &session);
        self.store.put(key.clone(), SessionRecord::initial()).await;

        info!("started flow '{}' for '{}' ({})", workflow, user, session);
        let mut responder = Responder::new(self.transport.clone());
        self.render_page(&flow, &key, &token, 0, &Answers::new(), &mut responder, 0)
            .await
    }

    /// Resumes an instance from an inbound action.
    pub async fn resume(&self, action: Action) -> Result<Outcome, EngineError> {
        let mut responder = Responder::new(self.transport.clone());

        let token = match Token::decode(&action.token) {
            Ok(token) => token,
            Err(e) => {
                warn!("rejecting undecodable token: {}", e);
                responder
                    .send_first(OutboundMessage::new(
                        restart_render(),
                        Visibility::CallerOnly,
                    ))
                    .await?;
                return Ok(Outcome::RestartRequired {
                    reason: RestartReason::MalformedToken,
                });
            }
        };
        let flow = self
            .registry
            .get(token.workflow())
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(token.workflow().to_string()))?;

        // Record which element fired on the token the handler sees.
        let token = match &action.element {
            Some(element) => token.with_element(Some(element.as_str()))?,
            None => token,
        };

        // Pre-acknowledge within the transport deadline when the page's
        // handler may be long-running; a failed author check afterwards
        // corrects the deferred response to a caller-only denial.
        if let Position::Page(index) = token.position() {
            let programmatic = flow.pages().get(index).is_some_and(|p| p.is_programmatic());
            if programmatic {
                responder.defer(flow.visibility()).await?;
            }
        }

        if guard::verify_author(&token, &action.user).is_err() {
            responder
                .send_first(OutboundMessage::new(
                    denial_render(),
                    Visibility::CallerOnly,
                ))
                .await?;
            return Ok(Outcome::Denied);
        }

        let page_index = match token.position() {
            Position::Terminal => {
                debug!("acknowledging action on a finished flow");
                responder
                    .send_first(OutboundMessage::new(ack_render(), Visibility::CallerOnly))
                    .await?;
                return Ok(Outcome::Acknowledged);
            }
            Position::Page(index) => index,
        };
        let page = flow
            .pages()
            .get(page_index)
            .ok_or_else(|| EngineError::PageOutOfRange {
                workflow: token.workflow().to_string(),
                page: page_index,
                len: flow.pages().len(),
            })?;

        let Some(key) = SessionKey::for_token(&token) else {
            warn!("rejecting token without a session id");
            responder
                .send_first(OutboundMessage::new(
                    restart_render(),
                    Visibility::CallerOnly,
                ))
                .await?;
            return Ok(Outcome::RestartRequired {
                reason: RestartReason::MalformedToken,
            });
        };

        // Serialize invocations per instance: later actions queue behind
        // the running one, never interleave with it.
        let lock = self.instance_lock(&key).await;
        let _running = lock.lock().await;

        let mut record = match self.store.get(&key).await {
            Some(record) => record,
            // Nothing accumulated could have been lost on the first page.
            None if page_index == 0 => SessionRecord::initial(),
            None => {
                warn!("session '{}' expired mid-flow", key.session);
                responder
                    .send_first(OutboundMessage::new(
                        restart_render(),
                        Visibility::CallerOnly,
                    ))
                    .await?;
                return Ok(Outcome::RestartRequired {
                    reason: RestartReason::SessionExpired,
                });
            }
        };

        if record.cursor.position.is_terminal() {
            debug!("acknowledging action on a cancelled flow");
            responder
                .send_first(OutboundMessage::new(ack_render(), Visibility::CallerOnly))
                .await?;
            return Ok(Outcome::Acknowledged);
        }

        // Last-observed step wins: actions from outdated messages are
        // dropped without running any handler.
        if record.cursor.position != Position::Page(page_index) {
            debug!(
                "dropping action for page {} while the instance is at {}",
                page_index, record.cursor.position
            );
            responder
                .send_first(OutboundMessage::new(
                    outdated_render(),
                    Visibility::CallerOnly,
                ))
                .await?;
            return Ok(Outcome::Discarded);
        }

        if let Some((cancel_id, cancel_render)) = flow.cancel_element() {
            if action.element.as_ref() == Some(cancel_id) {
                return self
                    .finish(
                        &flow,
                        &key,
                        &token,
                        cancel_render.clone(),
                        &mut responder,
                        "cancelled",
                    )
                    .await;
            }
        }

        // Merge the newly submitted values before the handler runs.
        if let Some(element) = &action.element {
            if !action.values.is_empty() {
                record
                    .answers
                    .record(page_index, element.clone(), action.values.clone());
            }
        }

        let (outcome, fragment_updates) = {
            let mut ctx = ActionContext::new(
                &token,
                page_index,
                &action.user,
                action.element.as_ref(),
                &action.values,
                &mut record.answers,
            );
            let outcome = page.handler().on_action(&mut ctx).await;
            let updates = ctx.take_fragment_updates();
            (outcome, updates)
        };
        let transition = match outcome {
            Ok(transition) => transition,
            Err(e) => {
                warn!("handler failed on page {}: {}", page_index, e);
                responder
                    .send_first(OutboundMessage::new(
                        failure_render(),
                        Visibility::CallerOnly,
                    ))
                    .await?;
                return Ok(Outcome::Failed { page: page_index });
            }
        };
        info!(
            "flow '{}' page {}: {:?}",
            token.workflow(),
            page_index,
            transition
        );

        let target = match target_position(transition, page_index, flow.pages().len()) {
            Some(target) => target,
            None => {
                responder
                    .send_first(OutboundMessage::new(
                        failure_render(),
                        Visibility::CallerOnly,
                    ))
                    .await?;
                let requested = match transition {
                    Transition::JumpTo(index) => index,
                    Transition::Advance => page_index + 1,
                    _ => page_index,
                };
                return Err(EngineError::PageOutOfRange {
                    workflow: token.workflow().to_string(),
                    page: requested,
                    len: flow.pages().len(),
                });
            }
        };

        let mut next_token = token.with_element(None)?;
        for (slot, value) in fragment_updates {
            // Slot 0 of the handler's view sits after the reserved
            // session fragment.
            next_token = next_token.with_fragment(slot + 1, value)?;
        }

        match target {
            Position::Terminal => {
                self.finish(
                    &flow,
                    &key,
                    &next_token,
                    flow.finale_render().clone(),
                    &mut responder,
                    "finished",
                )
                .await
            }
            Position::Page(next_index) => {
                let generation = record.cursor.generation + 1;
                let record = SessionRecord {
                    cursor: Cursor {
                        position: Position::Page(next_index),
                        generation,
                    },
                    answers: record.answers,
                };
                let answers = record.answers.clone();
                self.store.put(key.clone(), record).await;

                let next_token = next_token.with_position(Position::Page(next_index))?;
                self.render_page(
                    &flow,
                    &key,
                    &next_token,
                    next_index,
                    &answers,
                    &mut responder,
                    generation,
                )
                .await
            }
        }
    }

    /// Renders one page, deferring and streaming progress for
    /// programmatic descriptors, and drops stale results.
    #[allow(clippy::too_many_arguments)]
    async fn render_page(
        &self,
        flow: &Workflow,
        key: &SessionKey,
        token: &Token,
        page_index: usize,
        answers: &Answers,
        responder: &mut Responder,
        observed_generation: u64,
    ) -> Result<Outcome, EngineError> {
        let page = flow
            .pages()
            .get(page_index)
            .ok_or_else(|| EngineError::PageOutOfRange {
                workflow: token.workflow().to_string(),
                page: page_index,
                len: flow.pages().len(),
            })?;

        let descriptor = match page.descriptor() {
            Some(descriptor) => descriptor.clone(),
            None => {
                if !responder.is_deferred() && !responder.has_responded() {
                    responder.defer(flow.visibility()).await?;
                }
                let produced = {
                    let mut ctx = RenderContext::new(
                        token,
                        page_index,
                        token.author(),
                        answers,
                        responder,
                        flow.visibility(),
                    );
                    page.handler().render(&mut ctx).await
                };
                let descriptor = match produced {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!("render failed on page {}: {}", page_index, e);
                        responder
                            .send_first(OutboundMessage::new(
                                failure_render(),
                                Visibility::CallerOnly,
                            ))
                            .await?;
                        return Ok(Outcome::Failed { page: page_index });
                    }
                };
                // The instance may have moved on while this render was
                // being produced; the stale result must not be shown.
                let fresh = self
                    .store
                    .get(key)
                    .await
                    .is_some_and(|record| record.cursor.generation == observed_generation);
                if !fresh {
                    warn!(
                        "discarding stale render for page {} of '{}'",
                        page_index,
                        token.workflow()
                    );
                    return Ok(Outcome::Discarded);
                }
                descriptor
            }
        };

        let wire = token.encode()?;
        responder
            .send_first(
                OutboundMessage::new(descriptor, flow.visibility()).with_token(wire.clone()),
            )
            .await?;
        Ok(Outcome::Rendered {
            token: wire,
            page: page_index,
        })
    }

    async fn finish(
        &self,
        flow: &Workflow,
        key: &SessionKey,
        token: &Token,
        render: Render,
        responder: &mut Responder,
        verb: &str,
    ) -> Result<Outcome, EngineError> {
        self.store.delete(key).await;
        self.locks.lock().await.remove(key);

        let terminal = token.with_position(Position::Terminal)?.with_element(None)?;
        responder
            .send_first(OutboundMessage::new(render, flow.visibility()).with_token(terminal.encode()?))
            .await?;
        info!("flow '{}' {} ({})", token.workflow(), verb, key.session);
        Ok(Outcome::Finished)
    }

    async fn instance_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn target_position(transition: Transition, current: usize, len: usize) -> Option<Position> {
    match transition {
        Transition::Advance if current + 1 < len => Some(Position::Page(current + 1)),
        Transition::Retreat if current > 0 => Some(Position::Page(current - 1)),
        Transition::JumpTo(index) if index < len => Some(Position::Page(index)),
        Transition::Finish => Some(Position::Terminal),
        _ => None,
    }
}

fn short_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn restart_render() -> Render {
    Render::new(
        "Session expired",
        "This flow can no longer continue here. Please start it again.",
    )
}

fn denial_render() -> Render {
    Render::new(
        "Not your flow",
        "Only the person who started this flow can use it.",
    )
}

fn ack_render() -> Render {
    Render::new("Already finished", "This flow has already finished.")
}

fn outdated_render() -> Render {
    Render::new(
        "Out of date",
        "That step is out of date. Use the latest message.",
    )
}

fn failure_render() -> Render {
    Render::new(
        "Something went wrong",
        "That didn't work. Your progress is saved, so you can try again.",
    )
}
