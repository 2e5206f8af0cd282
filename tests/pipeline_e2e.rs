use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docsmith::backend::{ConversionClient, DeviceFingerprint};
use docsmith::catalog;
use docsmith::config::ModelConfig;
use docsmith::delivery::ContentKind;
use docsmith::fallback::ModelCandidates;
use docsmith::gateway::{ChatGateway, ChatRequest, ChatResponse, ProviderError};
use docsmith::pipeline::{DiagramSource, GenerationRequest, Generator, PipelineError, PlanSource};
use docsmith::plan::INVALID_JSON;
use docsmith::render::{
    DiagramRenderer, ImageFormat, MermaidTheme, RenderError, RenderOptions, RenderedDiagram,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Debug, Clone)]
struct SeenCall {
    model: String,
    prompt: String,
    json_mode: bool,
}

/// Answers calls from a queue, in order. An exhausted queue fails the call.
#[derive(Default)]
struct QueueGateway {
    answers: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<SeenCall>>,
}

impl QueueGateway {
    fn new<I: IntoIterator<Item = Result<&'static str, &'static str>>>(answers: I) -> Arc<Self> {
        let answers = answers
            .into_iter()
            .map(|a| a.map(str::to_string).map_err(str::to_string))
            .collect();
        Arc::new(Self {
            answers: Mutex::new(answers),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<SeenCall> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for QueueGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.seen.lock().unwrap().push(SeenCall {
            model: req.model.model_id().to_string(),
            prompt: req.messages[0].content.clone(),
            json_mode: req.json_mode,
        });
        match self.answers.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(ChatResponse::text(text)),
            Some(Err(msg)) => Err(ProviderError::provider("fake", msg)),
            None => Err(ProviderError::provider("fake", "no scripted answer")),
        }
    }
}

#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<(String, RenderOptions)>>,
}

impl RecordingRenderer {
    fn calls(&self) -> Vec<(String, RenderOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagramRenderer for RecordingRenderer {
    async fn render(
        &self,
        code: &str,
        options: RenderOptions,
    ) -> Result<RenderedDiagram, RenderError> {
        self.calls.lock().unwrap().push((code.to_string(), options));
        Ok(RenderedDiagram {
            format: options.format,
            bytes: b"<svg>ok</svg>".to_vec(),
        })
    }
}

/// Renderer that always fails the way `mmdc` does on a syntax error.
#[derive(Default)]
struct FailingRenderer {
    calls: Mutex<usize>,
}

#[async_trait]
impl DiagramRenderer for FailingRenderer {
    async fn render(
        &self,
        _code: &str,
        _options: RenderOptions,
    ) -> Result<RenderedDiagram, RenderError> {
        *self.calls.lock().unwrap() += 1;
        Err(RenderError::Failed {
            code: 1,
            stderr: "Parse error on line 2".into(),
        })
    }
}

fn models() -> ModelConfig {
    let list = || ModelCandidates::new(["primary", "secondary", "tertiary"]).unwrap();
    ModelConfig {
        diagram: list(),
        document: list(),
        presentation: list(),
    }
}

fn generator(
    gateway: Arc<QueueGateway>,
    renderer: Arc<dyn DiagramRenderer>,
    backend: &MockServer,
) -> Generator {
    let client = ConversionClient::with_device(
        backend.uri(),
        Duration::from_secs(5),
        DeviceFingerprint::new("test", "80x24", "+00:00"),
    )
    .unwrap();
    Generator::new(gateway, client, renderer).with_models(models())
}

fn flowchart() -> &'static catalog::DiagramType {
    catalog::find("flowchart").unwrap()
}

// =============================================================================
// Diagrams
// =============================================================================

#[tokio::test]
async fn diagram_is_sanitized_and_rendered_once() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok(
        "Here you go:\n```mermaid\nflowchart TD\n  A[Login] --> B{Valid?}\n  B -->|yes| C[Home]\n```",
    )]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend)
        .with_theme(MermaidTheme::Dark);

    let out = tempfile::tempdir().unwrap();
    let req = GenerationRequest::diagram("user login flow", Some(flowchart()));
    let delivered = generator.run(&req, out.path()).await.unwrap();

    let code = delivered.generated.code.as_deref().unwrap();
    assert!(code.starts_with("flowchart TD"));
    assert!(!code.contains("```"));
    assert!(!code.contains("Here you go"));

    let calls = renderer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, code);
    assert_eq!(calls[0].1.theme, MermaidTheme::Dark);
    assert_eq!(calls[0].1.format, ImageFormat::Svg);

    assert_eq!(gateway.seen().len(), 1);
    assert_eq!(delivered.generated.models, ["primary"]);
    assert_eq!(delivered.path, out.path().join("diagram.svg"));
    assert_eq!(std::fs::read(&delivered.path).unwrap(), b"<svg>ok</svg>");
    // Diagrams never touch the conversion backend.
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn diagram_falls_back_to_next_model() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Err("overloaded"), Ok("flowchart TD\n  A --> B")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer, &backend);

    let req = GenerationRequest::diagram("anything", Some(flowchart()));
    let generated = generator.generate(&req).await.unwrap();

    let models: Vec<String> = gateway.seen().into_iter().map(|c| c.model).collect();
    assert_eq!(models, ["primary", "secondary"]);
    assert_eq!(generated.models, ["secondary"]);
}

#[tokio::test]
async fn blank_topic_makes_no_calls() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok("flowchart TD\n  A --> B")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend);

    let err = generator
        .generate(&GenerationRequest::diagram("   ", Some(flowchart())))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(err.user_message(), "Please describe what you want to visualize.");
    assert!(gateway.seen().is_empty());
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn all_models_failing_reports_exhaustion() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Err("a"), Err("b"), Err("c")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend);

    let err = generator
        .generate(&GenerationRequest::diagram("x", Some(flowchart())))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "model_exhausted");
    assert_eq!(
        err.user_message(),
        "All AI models failed to respond. Please try again later."
    );
    assert_eq!(gateway.seen().len(), 3);
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn fence_only_answer_is_an_empty_response() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok("```mermaid\n```")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend);

    let err = generator
        .generate(&GenerationRequest::diagram("x", Some(flowchart())))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "empty_response");
    assert_eq!(err.user_message(), "Empty response from AI.");
    // The first model answered, so no fallback happened.
    assert_eq!(gateway.seen().len(), 1);
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn render_failure_is_its_own_error_and_writes_nothing() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok("flowchart TD\n  A --> B -->")]);
    let renderer = Arc::new(FailingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend);

    let out = tempfile::tempdir().unwrap();
    let req = GenerationRequest::diagram("broken", Some(flowchart()));
    let err = generator.run(&req, out.path()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Render(RenderError::Failed { code: 1, .. })
    ));
    assert_eq!(err.code(), "render");
    assert!(!err.is_retriable());
    assert!(err.user_message().starts_with("Diagram rendering failed:"));
    assert!(err.user_message().contains("Parse error on line 2"));

    // The model answered once; a render failure does not fall back to another model.
    assert_eq!(gateway.seen().len(), 1);
    assert_eq!(*renderer.calls.lock().unwrap(), 1);
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    assert!(!generator.inflight().is_busy(ContentKind::Diagram));
}

#[tokio::test]
async fn backend_diagram_generation_uses_callers_key() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate/diagram"))
        .and(body_partial_json(json!({
            "api_key": "user-key",
            "description": "payment flow"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": "```mermaid\nflowchart LR\n  P --> Q\n```" })),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = Arc::new(QueueGateway::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend);

    let req = GenerationRequest::diagram("payment flow", Some(flowchart())).diagram_source(
        DiagramSource::Backend {
            api_key: "user-key".into(),
            use_icons: false,
        },
    );
    let generated = generator.generate(&req).await.unwrap();

    assert_eq!(generated.code.as_deref(), Some("flowchart LR\n  P --> Q"));
    assert!(generated.models.is_empty());
    assert!(gateway.seen().is_empty());
    assert_eq!(renderer.calls().len(), 1);
}

// =============================================================================
// Documents
// =============================================================================

const PART_ONE: &str = r#"```json
{"title": "Solar Energy Basics", "sections": [
  {"header": "Introduction", "paragraphs": ["Sunlight is abundant."]},
  {"header": "Photovoltaics", "paragraphs": ["Cells convert light."]},
  {"header": "Thermal Systems", "paragraphs": ["Heat is collected."]},
  {"header": "Storage", "paragraphs": ["Batteries help."]},
  {"header": "Costs", "paragraphs": ["Prices fell."]}
]}
```"#;

const PART_TWO: &str = r#"{"title": "Ignored Title", "sections": [
  {"header": "Grid Integration", "paragraphs": ["Inverters sync."]},
  {"header": "Policy", "paragraphs": ["Incentives matter."]},
  {"header": "Case Studies", "paragraphs": ["Germany and Spain."]},
  {"header": "Challenges", "paragraphs": ["Intermittency."]},
  {"header": "Outlook", "paragraphs": ["Growth continues."]}
]}"#;

#[tokio::test]
async fn long_document_is_built_from_parts_and_named_after_title() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate/docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-docx".to_vec()))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = QueueGateway::new([Ok(PART_ONE), Ok(PART_TWO)]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer.clone(), &backend);

    let out = tempfile::tempdir().unwrap();
    let req = GenerationRequest::document("solar energy")
        .length_level(2)
        .style("academic");
    let delivered = generator.run(&req, out.path()).await.unwrap();

    let seen = gateway.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|c| c.json_mode));
    assert!(seen[0].prompt.contains("Write exactly 5 sections."));
    assert!(!seen[0].prompt.contains("Do not repeat them."));
    assert!(seen[1].prompt.contains("Do not repeat them."));
    for header in ["Introduction", "Photovoltaics", "Thermal Systems", "Storage", "Costs"] {
        assert!(seen[1].prompt.contains(&format!("- {header}")), "missing {header}");
    }
    assert!(seen[1].prompt.contains("Writing style: academic."));

    let generated = &delivered.generated;
    assert_eq!(generated.items, 10);
    assert_eq!(generated.title.as_deref(), Some("Solar Energy Basics"));
    assert_eq!(generated.models, ["primary", "primary"]);
    assert_eq!(delivered.path, out.path().join("Solar_Energy_Basics.docx"));
    assert_eq!(std::fs::read(&delivered.path).unwrap(), b"PK-docx");

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["title"], "Solar Energy Basics");
    assert_eq!(body["sections"].as_array().unwrap().len(), 10);
    assert_eq!(body["sections"][5]["header"], "Grid Integration");
    assert_eq!(body["style"], "academic");
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn invalid_plan_json_stops_before_conversion() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok("Sorry, I can't produce JSON today.")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer, &backend);

    let err = generator
        .generate(&GenerationRequest::document("tides"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "invalid_structure");
    assert_eq!(err.user_message(), INVALID_JSON);
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_second_part_discards_the_first() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok(PART_ONE), Ok("{\"title\": \"x\", \"sections\": []}")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer, &backend);

    let out = tempfile::tempdir().unwrap();
    let err = generator
        .run(&GenerationRequest::document("solar").length_level(2), out.path())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidStructure(_)));
    assert!(backend.received_requests().await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn conversion_failure_shows_backend_detail_and_writes_nothing() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate/pdf"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "disk full" })))
        .mount(&backend)
        .await;

    let gateway = QueueGateway::new([Ok(PART_ONE)]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway, renderer, &backend);

    let out = tempfile::tempdir().unwrap();
    let req = GenerationRequest::document("solar").format(docsmith::ConversionFormat::Pdf);
    let err = generator.run(&req, out.path()).await.unwrap_err();

    assert_eq!(err.code(), "backend");
    assert_eq!(err.user_message(), "disk full");
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn backend_plan_source_skips_models() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate/plan"))
        .and(body_partial_json(json!({ "topic": "tides", "type": "document" })))
        .respond_with(ResponseTemplate::new(200).set_body_string(PART_ONE))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate/docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"doc".to_vec()))
        .mount(&backend)
        .await;

    let gateway = Arc::new(QueueGateway::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer, &backend);

    let req = GenerationRequest::document("tides")
        .length_level(3)
        .plan_source(PlanSource::Backend);
    let generated = generator.generate(&req).await.unwrap();

    assert!(gateway.seen().is_empty());
    assert_eq!(generated.items, 5);
    assert_eq!(generated.artifact.file_name, "Solar_Energy_Basics.docx");
}

// =============================================================================
// Presentations
// =============================================================================

#[tokio::test]
async fn presentation_is_converted_to_pptx() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate/pptx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-pptx".to_vec()))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = QueueGateway::new([Ok(
        r#"{"title": "Ocean Currents", "slides": [
            {"title": "Overview", "content": ["Water moves."]},
            {"title": "Drivers", "content": ["Wind", "Salinity"]}
        ]}"#,
    )]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer, &backend);

    let req = GenerationRequest::presentation("ocean currents").length_level(3);
    let generated = generator.generate(&req).await.unwrap();

    let seen = gateway.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].prompt.contains("Create about 15 slides."));
    assert_eq!(generated.items, 2);
    assert_eq!(generated.artifact.file_name, "Ocean_Currents.pptx");
    assert_eq!(generated.artifact.bytes, b"PK-pptx");
}

// =============================================================================
// Concurrency guard
// =============================================================================

#[tokio::test]
async fn second_request_of_same_kind_is_busy() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Ok("flowchart TD\n  A --> B")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway.clone(), renderer, &backend);

    let held = generator
        .inflight()
        .try_acquire(ContentKind::Document)
        .unwrap();

    let err = generator
        .generate(&GenerationRequest::document("busy"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Busy(ContentKind::Document)));
    assert!(err.is_retriable());
    assert!(gateway.seen().is_empty());

    // Other kinds are independent.
    generator
        .generate(&GenerationRequest::diagram("free", Some(flowchart())))
        .await
        .unwrap();

    drop(held);
    assert!(!generator.inflight().is_busy(ContentKind::Document));
}

#[tokio::test]
async fn guard_is_released_after_failure() {
    let backend = MockServer::start().await;
    let gateway = QueueGateway::new([Err("a"), Err("b"), Err("c")]);
    let renderer = Arc::new(RecordingRenderer::default());
    let generator = generator(gateway, renderer, &backend);

    let req = GenerationRequest::diagram("x", Some(flowchart()));
    assert!(generator.generate(&req).await.is_err());
    assert!(!generator.inflight().is_busy(ContentKind::Diagram));
}
