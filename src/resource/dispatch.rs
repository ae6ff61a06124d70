//! Action Dispatcher
//!
//! Invokes a named action on one resource and reports the outcome. Failure
//! is a value here, not an error: an unsupported action, a backend that
//! declines, and a backend that errors all end up in
//! [`ActionOutcome::Failed`], and a handler hears about exactly one outcome.

use serde_json::json;

use super::capability;
use super::registry::ResourceDef;
use super::vocabulary::Vocabulary;
use crate::context::Context;
use crate::driver::is_success_signal;
use crate::error::{CimiError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed(String),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Hand the outcome to exactly one handler callback
    pub fn deliver<H: OutcomeHandler + ?Sized>(self, handler: &mut H) {
        match self {
            Self::Succeeded => handler.on_success(),
            Self::Failed(message) => handler.on_failure(&message),
        }
    }

    pub fn into_result(self, resource_type: &str, id: &str, action: &str) -> Result<()> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed(message) => Err(CimiError::ActionDispatchFailure {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                action: action.to_string(),
                message,
            }),
        }
    }
}

/// Receives the outcome of a dispatched action
pub trait OutcomeHandler {
    fn on_success(&mut self);
    fn on_failure(&mut self, message: &str);
}

/// Run `action` (bare name or relation URI) on resource `id`
pub async fn perform(
    def: &ResourceDef,
    vocabulary: &Vocabulary,
    action: &str,
    id: &str,
    ctx: &Context,
) -> ActionOutcome {
    let action = vocabulary.action_name(action);
    let candidates = capability::action_candidates(def, vocabulary, action);

    let Some(method) = capability::first_supported(ctx.driver(), &candidates) else {
        let message = format!(
            "Operation {} is not supported on {} {}",
            action, def.name, id
        );
        tracing::warn!("{}", message);
        return ActionOutcome::Failed(message);
    };

    tracing::info!("Dispatching {} on {} {} via {}", action, def.name, id, method);

    let outcome = match ctx.invoke(&method, json!({ "id": id })).await {
        Ok(result) if is_success_signal(&result) => ActionOutcome::Succeeded,
        Ok(_) => ActionOutcome::Failed(format!(
            "Operation {} failed to execute on {} {}",
            action, def.name, id
        )),
        Err(e) => ActionOutcome::Failed(e.to_string()),
    };

    match &outcome {
        ActionOutcome::Succeeded => tracing::info!("{} on {} {} succeeded", action, def.name, id),
        ActionOutcome::Failed(message) => tracing::warn!("{}", message),
    }
    outcome
}

/// Like [`perform`], reporting through `handler`
pub async fn perform_with<H: OutcomeHandler + Send + ?Sized>(
    def: &ResourceDef,
    vocabulary: &Vocabulary,
    action: &str,
    id: &str,
    ctx: &Context,
    handler: &mut H,
) {
    perform(def, vocabulary, action, id, ctx)
        .await
        .deliver(handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Credentials, MockDriver};
    use crate::engine::{Engine, EngineSettings};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        successes: usize,
        failures: Vec<String>,
    }

    impl OutcomeHandler for Recorder {
        fn on_success(&mut self) {
            self.successes += 1;
        }

        fn on_failure(&mut self, message: &str) {
            self.failures.push(message.to_string());
        }
    }

    fn context(driver: MockDriver) -> Context {
        let engine = Arc::new(Engine::standard(
            EngineSettings::new("http://localhost:3001/cimi").unwrap(),
        ));
        engine.context(Arc::new(driver), Credentials::default())
    }

    #[tokio::test]
    async fn test_success_reaches_handler_once() {
        let ctx = context(MockDriver::new());
        let schemas = ctx.engine().schemas();
        let machine = schemas.schema_of("Machine").unwrap();

        let mut recorder = Recorder::default();
        perform_with(machine, schemas.vocabulary(), "stop", "inst0", &ctx, &mut recorder).await;

        assert_eq!(recorder.successes, 1);
        assert!(recorder.failures.is_empty());
    }

    #[tokio::test]
    async fn test_relation_uri_resolves_to_backend_alias() {
        let ctx = context(MockDriver::new());
        let schemas = ctx.engine().schemas();
        let machine = schemas.schema_of("Machine").unwrap();

        let outcome = perform(
            machine,
            schemas.vocabulary(),
            "http://www.dmtf.org/cimi/action/restart",
            "inst0",
            &ctx,
        )
        .await;
        assert_eq!(outcome, ActionOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_unsupported_action_reports_failure() {
        let ctx = context(MockDriver::new());
        let schemas = ctx.engine().schemas();
        let machine = schemas.schema_of("Machine").unwrap();

        let mut recorder = Recorder::default();
        perform_with(machine, schemas.vocabulary(), "capture", "inst0", &ctx, &mut recorder).await;

        assert_eq!(recorder.successes, 0);
        assert_eq!(
            recorder.failures,
            vec!["Operation capture is not supported on Machine inst0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_falsy_backend_result_reports_failure() {
        let ctx = context(MockDriver::new());
        let schemas = ctx.engine().schemas();
        let machine = schemas.schema_of("Machine").unwrap();

        // inst0 is already running
        let outcome = perform(machine, schemas.vocabulary(), "start", "inst0", &ctx).await;
        assert_eq!(
            outcome,
            ActionOutcome::Failed("Operation start failed to execute on Machine inst0".to_string())
        );
        assert!(outcome.into_result("Machine", "inst0", "start").is_err());
    }

    #[tokio::test]
    async fn test_backend_error_reports_failure() {
        let ctx = context(MockDriver::new());
        let schemas = ctx.engine().schemas();
        let machine = schemas.schema_of("Machine").unwrap();

        let outcome = perform(machine, schemas.vocabulary(), "stop", "missing", &ctx).await;
        assert!(matches!(outcome, ActionOutcome::Failed(message) if message.contains("stop_instance")));
    }
}
