use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use docsmith::fallback::{run_fallback, CallOptions, FallbackError, ModelCandidates, ALL_MODELS_FAILED};
use docsmith::gateway::{Attribution, ChatGateway, ChatRequest, ChatResponse, ProviderError};

/// Gateway whose answer depends only on the requested model.
struct ScriptedGateway {
    answers: HashMap<&'static str, Result<&'static str, &'static str>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    fn new(answers: &[(&'static str, Result<&'static str, &'static str>)]) -> Self {
        Self {
            answers: answers.iter().cloned().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for ScriptedGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let model = req.model.model_id().to_string();
        self.calls.lock().unwrap().push(model.clone());
        match self.answers.get(model.as_str()) {
            Some(Ok(text)) => Ok(ChatResponse::text(*text)),
            Some(Err(msg)) => Err(ProviderError::provider("fake", *msg)),
            None => Err(ProviderError::provider("fake", "unknown model")),
        }
    }
}

fn candidates(models: &[&str]) -> ModelCandidates {
    ModelCandidates::new(models.iter().copied()).unwrap()
}

#[tokio::test]
async fn first_success_short_circuits() {
    let gateway = ScriptedGateway::new(&[
        ("a", Err("503")),
        ("b", Ok("from b")),
        ("c", Ok("from c")),
    ]);

    let outcome = run_fallback(
        &gateway,
        &candidates(&["a", "b", "c"]),
        "prompt",
        CallOptions::default(),
        Attribution::new("test"),
    )
    .await
    .unwrap();

    assert_eq!(outcome.model, "b");
    assert_eq!(outcome.content(), "from b");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].model, "a");
    // c is never tried.
    assert_eq!(gateway.calls(), ["a", "b"]);
}

#[tokio::test]
async fn primary_success_makes_exactly_one_call() {
    let gateway = ScriptedGateway::new(&[("a", Ok("x")), ("b", Ok("y"))]);
    let outcome = run_fallback(
        &gateway,
        &candidates(&["a", "b"]),
        "prompt",
        CallOptions::json(),
        Attribution::new("test"),
    )
    .await
    .unwrap();
    assert_eq!(outcome.model, "a");
    assert!(outcome.failures.is_empty());
    assert_eq!(gateway.calls(), ["a"]);
}

#[tokio::test]
async fn exhaustion_tries_each_candidate_once_in_order() {
    let gateway = ScriptedGateway::new(&[
        ("gemini-2.0-flash", Err("timeout")),
        ("gemini-1.5-flash", Err("500")),
        ("gpt-4o-mini", Err("quota")),
    ]);

    let err = run_fallback(
        &gateway,
        &candidates(&["gemini-2.0-flash", "gemini-1.5-flash", "gpt-4o-mini"]),
        "prompt",
        CallOptions::default(),
        Attribution::new("test"),
    )
    .await
    .unwrap_err();

    assert_eq!(
        gateway.calls(),
        ["gemini-2.0-flash", "gemini-1.5-flash", "gpt-4o-mini"]
    );
    assert_eq!(err.to_string(), ALL_MODELS_FAILED);
    match &err {
        FallbackError::Exhausted { attempts } => {
            let models: Vec<&str> = attempts.iter().map(|a| a.model.as_str()).collect();
            assert_eq!(models, ["gemini-2.0-flash", "gemini-1.5-flash", "gpt-4o-mini"]);
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert!(err.detail().contains("gemini-1.5-flash: fake error: 500"));
}

#[tokio::test]
async fn empty_answer_is_still_chosen() {
    let gateway = ScriptedGateway::new(&[("a", Ok("")), ("b", Ok("unused"))]);
    let outcome = run_fallback(
        &gateway,
        &candidates(&["a", "b"]),
        "prompt",
        CallOptions::default(),
        Attribution::new("test"),
    )
    .await
    .unwrap();
    assert_eq!(outcome.model, "a");
    assert_eq!(outcome.into_content(), "");
    assert_eq!(gateway.calls(), ["a"]);
}

#[tokio::test]
async fn no_memory_between_runs() {
    let gateway = ScriptedGateway::new(&[("a", Err("down")), ("b", Ok("ok"))]);
    let list = candidates(&["a", "b"]);
    for _ in 0..2 {
        run_fallback(
            &gateway,
            &list,
            "prompt",
            CallOptions::default(),
            Attribution::new("test"),
        )
        .await
        .unwrap();
    }
    // The failing primary is retried from the top on every run.
    assert_eq!(gateway.calls(), ["a", "b", "a", "b"]);
}

#[test]
fn empty_candidate_list_is_rejected_up_front() {
    let err = ModelCandidates::new(["", "  "]).unwrap_err();
    assert_eq!(err.to_string(), "no models configured");
}
