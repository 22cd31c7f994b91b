//! A three-page signup wizard over a console transport.
//!
//! Simulates the platform side by feeding scripted actions back into the
//! engine, the way a chat adapter would relay clicks and submissions.

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

define_handler!(FormStep);

#[async_trait]
impl PageHandler for FormStep {
    async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
        match ctx.element.map(|e| e.as_str()) {
            Some("nickname") | Some("roles") if !ctx.values.is_empty() => Ok(Transition::Advance),
            Some("back") => Ok(Transition::Retreat),
            other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
        }
    }
}

define_handler!(ConfirmStep);

#[async_trait]
impl PageHandler for ConfirmStep {
    async fn on_action(&self, ctx: &mut ActionContext<'_>) -> Result<Transition, HandlerError> {
        match ctx.element.map(|e| e.as_str()) {
            Some("confirm") => {
                let nickname = ctx.answers.first(0, "nickname").unwrap_or("?");
                println!("        (signing up '{}')", nickname);
                Ok(Transition::Finish)
            }
            Some("back") => Ok(Transition::Retreat),
            other => Err(HandlerError::new(format!("unexpected element {:?}", other))),
        }
    }
}

fn registry() -> Registry {
    Registry::builder()
        .register(
            "signup",
            Workflow::new(Visibility::CallerOnly)
                .page(Page::fixed(
                    Render::new("Welcome", "What should we call you?")
                        .element(Element::text_input("nickname", "Nickname").required())
                        .element(Element::button("next", "Next")),
                    FormStep,
                ))
                .page(Page::fixed(
                    Render::new("Roles", "Pick the roles that apply.")
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
                        .element(Element::button("back", "Back")),
                    FormStep,
                ))
                .page(Page::fixed(
                    Render::new("Confirm", "All set?")
                        .element(Element::button("back", "Back"))
                        .element(Element::button("confirm", "Confirm")),
                    ConfirmStep,
                ))
                .finale(Render::new("Welcome aboard", "Your account is ready.")),
        )
        .build()
        .expect("valid registry")
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

    let engine = Engine::new(
        Arc::new(registry()),
        Arc::new(SessionStore::new(Duration::from_secs(300))),
        Arc::new(ConsoleTransport),
    );

    println!("-- user starts the signup flow");
    let started = engine.start("signup", "user-1001").await.expect("start");

    println!("-- user submits a nickname");
    let roles_page = engine
        .resume(
            Action::new("user-1001", token_of(&started))
                .element("nickname")
                .values(vec!["mika".to_string()]),
        )
        .await
        .expect("resume");

    println!("-- user picks two roles");
    let confirm_page = engine
        .resume(
            Action::new("user-1001", token_of(&roles_page))
                .element("roles")
                .values(vec!["admin".to_string(), "dev".to_string()]),
        )
        .await
        .expect("resume");

    println!("-- somebody else tries to click the confirm button");
    let denied = engine
        .resume(Action::new("user-2002", token_of(&confirm_page)).element("confirm"))
        .await
        .expect("resume");
    println!("   outcome: {:?}", denied);

    println!("-- the owner confirms");
    let finished = engine
        .resume(Action::new("user-1001", token_of(&confirm_page)).element("confirm"))
        .await
        .expect("resume");
    println!("   outcome: {:?}", finished);
}
