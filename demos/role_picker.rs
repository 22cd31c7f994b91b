//! A role-picker flow with a programmatic page.
//!
//! The second page computes its options at invocation time, emitting a
//! progress notice while the (pretend) directory lookup runs. The demo
//! also shows a flow-wide cancel element.

use async_trait::async_trait;
use shiori::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ConsoleTransport;

fn print_message(verb: &str, message: &OutboundMessage) {
    println!("[{}] {} — {}", verb, message.render.title, message.render.body);
    for element in &message.render.elements {
        println!("        ({})", element.label);
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn defer(&self, visibility: Visibility) -> Result<(), EngineError> {
        println!("[ack deferred] visibility {:?}", visibility);
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
        print_message("sent", &message);
        Ok(())
    }

    async fn edit(&self, message: OutboundMessage) -> Result<(), EngineError> {
        print_message("edited", &message);
        Ok(())
    }
}

define_handler!(IntroStep);

#[async_trait]
impl PageHandler for IntroStep {
    async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
        match ctx.element.map(|e| e.as_str()) {
            Some("next") => Ok(Transition::Advance),
            other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
        }
    }
}

define_handler!(PickRoleStep);

#[async_trait]
impl PageHandler for PickRoleStep {
    async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
        match ctx.element.map(|e| e.as_str()) {
            Some("role") if !ctx.values.is_empty() => Ok(Transition::Finish),
            other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
        }
    }

    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<Render, HandlerError> {
        ctx.notice(Render::new("Working", "Fetching the roles you can pick..."))
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;

        // Stand-in for a directory call.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let options = vec![
            Choice::new("reviewer", "Reviewer"),
            Choice::new("maintainer", "Maintainer"),
        ];

        Ok(
            Render::new("Pick a role", "These are available to you right now.")
                .element(Element::single_select("role", "Role", options))
                .element(Element::button("cancel", "Cancel")),
        )
    }
}

fn token_of(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Rendered { token, .. } => token.clone(),
        other => panic!("expected a rendered page, got {:?}", other),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let registry = Registry::builder()
        .register(
            "role-picker",
            Workflow::new(Visibility::CallerOnly)
                .cancel_on("cancel", Render::new("Cancelled", "No role was assigned."))
                .page(Page::fixed(
                    Render::new("Role picker", "Ready to pick a role?")
                        .element(Element::button("next", "Next"))
                        .element(Element::button("cancel", "Cancel")),
                    IntroStep,
                ))
                .page(Page::programmatic(PickRoleStep))
                .finale(Render::new("Role assigned", "Enjoy the new powers.")),
        )
        .build()
        .expect("valid registry");

    let engine = Engine::new(
        Arc::new(registry),
        Arc::new(SessionStore::new(Duration::from_secs(300))),
        Arc::new(ConsoleTransport),
    );

    println!("-- user starts the role picker");
    let started = engine.start("role-picker", "user-1001").await.expect("start");

    println!("-- user moves on; the next page is computed");
    let picker = engine
        .resume(Action::new("user-1001", token_of(&started)).element("next"))
        .await
        .expect("resume");

    println!("-- user picks a role");
    let finished = engine
        .resume(
            Action::new("user-1001", token_of(&picker))
                .element("role")
                .values(vec!["maintainer".to_string()]),
        )
        .await
        .expect("resume");
    println!("   outcome: {:?}", finished);

    println!("-- a second run, cancelled on the first page");
    let started = engine.start("role-picker", "user-1001").await.expect("start");
    let cancelled = engine
        .resume(Action::new("user-1001", token_of(&started)).element("cancel"))
        .await
        .expect("resume");
    println!("   outcome: {:?}", cancelled);
}
