use async_trait::async_trait;
use shiori::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_test::assert_ok;

#[derive(Debug, Clone, PartialEq)]
enum Emitted {
    Deferred(Visibility),
    Sent(OutboundMessage),
    Edited(OutboundMessage),
}

#[derive(Default)]
struct RecordingTransport {
    log: Mutex<Vec<Emitted>>,
}

impl RecordingTransport {
    async fn snapshot(&self) -> Vec<Emitted> {
        self.log.lock().await.clone()
    }

    async fn last_render(&self) -> Render {
        self.log
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|emitted| match emitted {
                Emitted::Sent(m) | Emitted::Edited(m) => Some(m.render.clone()),
                Emitted::Deferred(_) => None,
            })
            .expect("a render was emitted")
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn defer(&self, visibility: Visibility) -> Result<(), EngineError> {
        self.log.lock().await.push(Emitted::Deferred(visibility));
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
        self.log.lock().await.push(Emitted::Sent(message));
        Ok(())
    }

    async fn edit(&self, message: OutboundMessage) -> Result<(), EngineError> {
        self.log.lock().await.push(Emitted::Edited(message));
        Ok(())
    }
}

fn rendered_token(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Rendered { token, .. } => token.clone(),
        other => panic!("expected a rendered page, got {:?}", other),
    }
}

/// Shared navigation handler: buttons map straight to transitions.
#[derive(Debug)]
struct NavStep;

#[async_trait]
impl PageHandler for NavStep {
    async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
        match ctx.element.map(|e| e.as_str()) {
            Some("next") => Ok(Transition::Advance),
            Some("back") => Ok(Transition::Retreat),
            Some("confirm") => Ok(Transition::Finish),
            other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
        }
    }
}

fn survey_descriptors() -> Vec<Render> {
    vec![
        Render::new("Your name", "What should we call you?")
            .element(Element::text_input("nickname", "Nickname").required())
            .element(Element::button("next", "Next")),
        Render::new("Your roles", "Pick the roles that apply.")
            .element(Element::multi_select(
                "roles",
                "Roles",
                vec![
                    Choice::new("admin", "Admin"),
                    Choice::new("ops", "Ops"),
                    Choice::new("dev", "Dev"),
                ],
                1,
                3,
            ))
            .element(Element::button("back", "Back"))
            .element(Element::button("next", "Next")),
        Render::new("Confirm", "All set?")
            .element(Element::button("back", "Back"))
            .element(Element::button("confirm", "Confirm")),
    ]
}

fn survey_registry() -> Registry {
    let mut flow = Workflow::new(Visibility::CallerOnly);
    for descriptor in survey_descriptors() {
        flow = flow.page(Page::fixed(descriptor, NavStep));
    }
    Registry::builder()
        .register("survey", flow)
        .build()
        .expect("valid registry")
}

fn build_engine(
    registry: Registry,
    store: Arc<SessionStore>,
    transport: Arc<RecordingTransport>,
) -> Engine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Engine::new(Arc::new(registry), store, transport)
}

#[tokio::test]
async fn test_three_page_flow_advance_twice_then_retreat() {
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(survey_registry(), store, transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let first = engine
        .resume(Action::new("user-42", rendered_token(&started)).element("next"))
        .await;
    let second = engine
        .resume(Action::new("user-42", rendered_token(&assert_ok!(first))).element("next"))
        .await;
    let third = engine
        .resume(Action::new("user-42", rendered_token(&assert_ok!(second))).element("back"))
        .await;

    let outcome = assert_ok!(third);
    let token = Token::decode(&rendered_token(&outcome)).expect("decodes");
    assert_eq!(token.position(), Position::Page(1));

    // Retreating re-renders page 1's original descriptor unchanged.
    assert_eq!(transport.last_render().await, survey_descriptors()[1]);
}

#[tokio::test]
async fn test_author_mismatch_never_reaches_the_handler() {
    #[derive(Debug)]
    struct Tattletale {
        invoked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PageHandler for Tattletale {
        async fn on_action(
            &self,
            _ctx: &mut ActionContext<'_>,
        ) -> Result<Transition, HandlerError> {
            self.invoked.store(true, Ordering::SeqCst);
            Ok(Transition::Finish)
        }
    }

    let invoked = Arc::new(AtomicBool::new(false));
    let registry = Registry::builder()
        .register(
            "survey",
            Workflow::new(Visibility::CallerOnly).page(Page::fixed(
                Render::new("Only page", "").element(Element::button("confirm", "Confirm")),
                Tattletale {
                    invoked: invoked.clone(),
                },
            )),
        )
        .build()
        .expect("valid registry");
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(registry, store.clone(), transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let outcome = assert_ok!(
        engine
            .resume(Action::new("intruder", rendered_token(&started)).element("confirm"))
            .await
    );

    assert!(matches!(outcome, Outcome::Denied));
    assert!(!invoked.load(Ordering::SeqCst));
    // Session state is untouched: the instance is still live for its owner.
    assert_eq!(store.len().await, 1);
    let log = transport.snapshot().await;
    match log.last() {
        Some(Emitted::Sent(message)) => {
            assert_eq!(message.visibility, Visibility::CallerOnly);
            assert_eq!(message.render.title, "Not your flow");
        }
        other => panic!("expected a caller-only denial, got {:?}", other),
    }
}

#[tokio::test]
async fn test_denial_after_deferred_ack_corrects_visibility() {
    #[derive(Debug)]
    struct Slowish;

    #[async_trait]
    impl PageHandler for Slowish {
        async fn on_action(
            &self,
            _ctx: &mut ActionContext<'_>,
        ) -> Result<Transition, HandlerError> {
            Ok(Transition::Finish)
        }

        async fn render(&self, _ctx: &mut RenderContext<'_>) -> Result<Render, HandlerError> {
            Ok(Render::new("Computed", "").element(Element::button("confirm", "Confirm")))
        }
    }

    let registry = Registry::builder()
        .register(
            "lookup",
            Workflow::new(Visibility::Broadcast).page(Page::programmatic(Slowish)),
        )
        .build()
        .expect("valid registry");
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(registry, store, transport.clone());

    let started = assert_ok!(engine.start("lookup", "user-42").await);
    let outcome = assert_ok!(
        engine
            .resume(Action::new("intruder", rendered_token(&started)).element("confirm"))
            .await
    );
    assert!(matches!(outcome, Outcome::Denied));

    // The deferred ack went out before the author check, then was
    // corrected to a caller-only denial by editing it.
    let log = transport.snapshot().await;
    assert_eq!(log[log.len() - 2], Emitted::Deferred(Visibility::Broadcast));
    match &log[log.len() - 1] {
        Emitted::Edited(message) => {
            assert_eq!(message.visibility, Visibility::CallerOnly);
            assert_eq!(message.render.title, "Not your flow");
        }
        other => panic!("expected the denial as an edit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_terminal_is_absorbing() {
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(survey_registry(), store.clone(), transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let page1 = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&started)).element("next"))
            .await
    );
    let page2 = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&page1)).element("next"))
            .await
    );
    let finished = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&page2)).element("confirm"))
            .await
    );
    assert!(matches!(finished, Outcome::Finished));
    assert!(store.is_empty().await);

    let finale = transport.last_render().await;
    assert_eq!(finale.title, "Done");
    let terminal_token = match transport.snapshot().await.last() {
        Some(Emitted::Sent(message)) => message.token.clone().expect("finale carries a token"),
        other => panic!("expected the finale message, got {:?}", other),
    };
    assert!(Token::decode(&terminal_token)
        .expect("decodes")
        .position()
        .is_terminal());

    // Late and duplicate submissions are idempotent no-ops.
    let before = transport.snapshot().await.len();
    for _ in 0..2 {
        let outcome = assert_ok!(
            engine
                .resume(Action::new("user-42", terminal_token.clone()).element("confirm"))
                .await
        );
        assert!(matches!(outcome, Outcome::Acknowledged));
    }
    assert!(store.is_empty().await);
    let log = transport.snapshot().await;
    assert_eq!(log.len(), before + 2);
    assert_eq!(transport.last_render().await.title, "Already finished");
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_surfaces_restart() {
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(survey_registry(), store.clone(), transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let page1 = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&started)).element("next"))
            .await
    );

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(store.get(&SessionKey::new("survey", "user-42", session_of(&page1))).await, None);

    let outcome = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&page1)).element("next"))
            .await
    );
    assert!(matches!(
        outcome,
        Outcome::RestartRequired {
            reason: RestartReason::SessionExpired
        }
    ));
    assert_eq!(transport.last_render().await.title, "Session expired");
}

fn session_of(outcome: &Outcome) -> String {
    Token::decode(&rendered_token(outcome))
        .expect("decodes")
        .session()
        .expect("has a session")
        .to_string()
}

#[tokio::test]
async fn test_double_click_updates_are_serialized() {
    #[derive(Debug)]
    struct CountStep;

    #[async_trait]
    impl PageHandler for CountStep {
        async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
            let count: u32 = ctx
                .answers
                .first(0, "count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            // Yield mid read-merge-write so an unserialized double
            // submission would lose one of the updates.
            tokio::task::yield_now().await;
            ctx.answers
                .record(0, ElementId::new("count"), vec![(count + 1).to_string()]);
            Ok(Transition::JumpTo(0))
        }
    }

    let registry = Registry::builder()
        .register(
            "counter",
            Workflow::new(Visibility::CallerOnly).page(Page::fixed(
                Render::new("Counter", "").element(Element::button("bump", "Bump")),
                CountStep,
            )),
        )
        .build()
        .expect("valid registry");
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = Arc::new(build_engine(registry, store.clone(), transport));

    let started = assert_ok!(engine.start("counter", "user-42").await);
    let token = rendered_token(&started);
    let session = session_of(&started);

    let (a, b) = tokio::join!(
        engine.resume(Action::new("user-42", token.clone()).element("bump")),
        engine.resume(Action::new("user-42", token).element("bump")),
    );
    assert_ok!(a);
    assert_ok!(b);

    let record = store
        .get(&SessionKey::new("counter", "user-42", session))
        .await
        .expect("record survives");
    assert_eq!(record.answers.first(0, "count"), Some("2"));
    assert_eq!(record.cursor.generation, 2);
}

#[tokio::test]
async fn test_stale_token_after_advance_is_discarded() {
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(survey_registry(), store.clone(), transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let token = rendered_token(&started);
    let page1 = assert_ok!(
        engine
            .resume(Action::new("user-42", token.clone()).element("next"))
            .await
    );

    // Replaying the page-0 token after the instance moved to page 1.
    let outcome = assert_ok!(engine.resume(Action::new("user-42", token).element("next")).await);
    assert!(matches!(outcome, Outcome::Discarded));
    assert_eq!(transport.last_render().await.title, "Out of date");

    let record = store
        .get(&SessionKey::new("survey", "user-42", session_of(&page1)))
        .await
        .expect("record survives");
    assert_eq!(record.cursor.generation, 1);
    assert_eq!(record.cursor.position, Position::Page(1));
}

#[tokio::test]
async fn test_answers_flow_into_a_programmatic_summary() {
    #[derive(Debug)]
    struct FormStep;

    #[async_trait]
    impl PageHandler for FormStep {
        async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
            match ctx.element.map(|e| e.as_str()) {
                Some("nickname") | Some("roles") if !ctx.values.is_empty() => {
                    Ok(Transition::Advance)
                }
                other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
            }
        }
    }

    #[derive(Debug)]
    struct SummaryStep;

    #[async_trait]
    impl PageHandler for SummaryStep {
        async fn on_action(
            &self,
            _ctx: &mut ActionContext<'_>,
        ) -> Result<Transition, HandlerError> {
            Ok(Transition::Finish)
        }

        async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<Render, HandlerError> {
            let nickname = ctx.answers.first(0, "nickname").unwrap_or("?").to_string();
            let roles = ctx
                .answers
                .values(1, "roles")
                .map(|values| values.join(", "))
                .unwrap_or_default();
            Ok(Render::new("Summary", format!("{}: {}", nickname, roles))
                .element(Element::button("confirm", "Confirm")))
        }
    }

    let descriptors = survey_descriptors();
    let registry = Registry::builder()
        .register(
            "survey",
            Workflow::new(Visibility::CallerOnly)
                .page(Page::fixed(descriptors[0].clone(), FormStep))
                .page(Page::fixed(descriptors[1].clone(), FormStep))
                .page(Page::programmatic(SummaryStep)),
        )
        .build()
        .expect("valid registry");
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(registry, store, transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let page1 = assert_ok!(
        engine
            .resume(
                Action::new("user-42", rendered_token(&started))
                    .element("nickname")
                    .values(vec!["mika".to_string()])
            )
            .await
    );
    let page2 = assert_ok!(
        engine
            .resume(
                Action::new("user-42", rendered_token(&page1))
                    .element("roles")
                    .values(vec!["admin".to_string(), "ops".to_string()])
            )
            .await
    );
    assert!(matches!(page2, Outcome::Rendered { page: 2, .. }));

    let summary = transport.last_render().await;
    assert_eq!(summary.title, "Summary");
    assert_eq!(summary.body, "mika: admin, ops");
}

#[tokio::test]
async fn test_stale_programmatic_render_is_discarded() {
    /// Page 1 handler whose render parks until the test releases it,
    /// emitting progress notices first.
    #[derive(Debug)]
    struct ParkedStep {
        entered: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    #[async_trait]
    impl PageHandler for ParkedStep {
        async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
            match ctx.element.map(|e| e.as_str()) {
                Some("next") => Ok(Transition::Advance),
                other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
            }
        }

        async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<Render, HandlerError> {
            ctx.notice(Render::new("Working", "Looking things up..."))
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            ctx.notice(Render::new("Working", "Still at it..."))
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            self.entered.send(()).await.ok();
            self.release.lock().await.recv().await;
            Ok(Render::new("Slow result", "").element(Element::button("next", "Next")))
        }
    }

    let (entered_tx, mut entered_rx) = mpsc::channel(1);
    let (release_tx, release_rx) = mpsc::channel(1);
    let registry = Arc::new(
        Registry::builder()
            .register(
                "lookup",
                Workflow::new(Visibility::CallerOnly)
                    .page(Page::fixed(
                        Render::new("Start", "").element(Element::button("next", "Next")),
                        NavStep,
                    ))
                    .page(Page::programmatic(ParkedStep {
                        entered: entered_tx,
                        release: Mutex::new(release_rx),
                    }))
                    .page(Page::fixed(
                        Render::new("End", "").element(Element::button("confirm", "Confirm")),
                        NavStep,
                    )),
            )
            .build()
            .expect("valid registry"),
    );

    // Two engines over one store stand in for two stateless workers.
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let transport_a = Arc::new(RecordingTransport::default());
    let transport_b = Arc::new(RecordingTransport::default());
    let engine_a = Arc::new(Engine::new(registry.clone(), store.clone(), transport_a.clone()));
    let engine_b = Engine::new(registry, store, transport_b);

    let started = assert_ok!(engine_a.start("lookup", "user-42").await);
    let page0_token = rendered_token(&started);

    let slow = {
        let engine_a = engine_a.clone();
        let token = page0_token.clone();
        tokio::spawn(async move {
            engine_a
                .resume(Action::new("user-42", token).element("next"))
                .await
        })
    };

    // Worker A is parked inside the page 1 render.
    entered_rx.recv().await.expect("render entered");

    // A newer action lands on worker B and advances the instance.
    let page1_token = Token::decode(&page0_token)
        .expect("decodes")
        .with_position(Position::Page(1))
        .expect("derives")
        .encode()
        .expect("encodes");
    let advanced = assert_ok!(
        engine_b
            .resume(Action::new("user-42", page1_token).element("next"))
            .await
    );
    assert!(matches!(advanced, Outcome::Rendered { page: 2, .. }));

    // Releasing worker A: its finished render is now stale and dropped.
    release_tx.send(()).await.expect("release");
    let outcome = slow.await.expect("task").expect("resume");
    assert!(matches!(outcome, Outcome::Discarded));

    let log_a = transport_a.snapshot().await;
    let notices = log_a
        .iter()
        .filter(|e| matches!(e, Emitted::Sent(m) if m.render.title == "Working"))
        .count();
    assert_eq!(notices, 2);
    assert!(!log_a.iter().any(|e| match e {
        Emitted::Sent(m) | Emitted::Edited(m) => m.render.title == "Slow result",
        Emitted::Deferred(_) => false,
    }));
}

#[tokio::test]
async fn test_cancel_deletes_state_and_enters_terminal() {
    let mut flow = Workflow::new(Visibility::CallerOnly)
        .cancel_on("cancel", Render::new("Cancelled", "Nothing was saved."));
    for descriptor in survey_descriptors() {
        flow = flow.page(Page::fixed(
            descriptor.element(Element::button("cancel", "Cancel")),
            NavStep,
        ));
    }
    let registry = Registry::builder()
        .register("survey", flow)
        .build()
        .expect("valid registry");
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(registry, store.clone(), transport.clone());

    let started = assert_ok!(engine.start("survey", "user-42").await);
    let page1 = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&started)).element("next"))
            .await
    );
    let outcome = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&page1)).element("cancel"))
            .await
    );

    assert!(matches!(outcome, Outcome::Finished));
    assert!(store.is_empty().await);
    let cancelled = transport.last_render().await;
    assert_eq!(cancelled.title, "Cancelled");
}

#[tokio::test]
async fn test_fragments_round_trip_through_the_token() {
    #[derive(Debug)]
    struct TagStep;

    #[async_trait]
    impl PageHandler for TagStep {
        async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
            if ctx.page == 0 {
                ctx.set_fragment(0, "pro");
                return Ok(Transition::Advance);
            }
            match ctx.fragment(0) {
                Some("pro") => Ok(Transition::Finish),
                other => Err(HandlerError::new(format!("missing tier fragment: {:?}", other))),
            }
        }
    }

    let registry = Registry::builder()
        .register(
            "upgrade",
            Workflow::new(Visibility::CallerOnly)
                .page(Page::fixed(
                    Render::new("Pick a tier", "").element(Element::button("next", "Next")),
                    TagStep,
                ))
                .page(Page::fixed(
                    Render::new("Checkout", "").element(Element::button("confirm", "Confirm")),
                    TagStep,
                )),
        )
        .build()
        .expect("valid registry");
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(SessionStore::new(Duration::from_secs(300)));
    let engine = build_engine(registry, store, transport);

    let started = assert_ok!(engine.start("upgrade", "user-42").await);
    let page1 = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&started)).element("next"))
            .await
    );

    let token = Token::decode(&rendered_token(&page1)).expect("decodes");
    assert_eq!(token.fragment(1), Some("pro"));

    let finished = assert_ok!(
        engine
            .resume(Action::new("user-42", rendered_token(&page1)).element("confirm"))
            .await
    );
    assert!(matches!(finished, Outcome::Finished));
}
