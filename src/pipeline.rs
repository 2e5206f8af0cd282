//! Generation request pipeline.
//!
//! topic → fallback executor → sanitizer → [plan parser → conversion backend]
//! or [local renderer] → delivery.
//!
//! Usage:
//! ```bash
//! docsmith document --topic "Rust ownership" --length 2 --out ./out
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, ConversionClient, ConversionFormat, DiagramGenerationRequest};
use crate::catalog::DiagramType;
use crate::config::{ConfigError, ModelConfig};
use crate::delivery::{deliver, Artifact, ContentKind, DeliveryError, InFlight, InFlightGuard};
use crate::fallback::{run_fallback, CallOptions, FallbackError, ModelCandidates};
use crate::gateway::{Attribution, ChatGateway};
use crate::plan::{parse_plan, DocumentPlan, PlanError, PresentationPlan};
use crate::prompts::{diagram_prompt, document_prompt, presentation_prompt};
use crate::render::{DiagramRenderer, ImageFormat, MermaidTheme, RenderError, RenderOptions};
use crate::sanitize::{sanitize_nonempty, SanitizeError, SanitizeTarget};
use crate::state::StateError;

/// Sections (documents) or slides (presentations) per length level step.
pub const ITEMS_PER_LEVEL: usize = 5;

pub const MIN_LENGTH_LEVEL: u8 = 1;
pub const MAX_LENGTH_LEVEL: u8 = 3;

// =============================================================================
// Request
// =============================================================================

/// Where a document or presentation plan comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanSource {
    /// The fallback chain of chat models.
    #[default]
    Model,
    /// `POST /api/generate/plan` on the conversion backend.
    Backend,
}

/// Where diagram code comes from.
#[derive(Clone, Default)]
pub enum DiagramSource {
    #[default]
    Model,
    /// Backend generation with the caller's own model key.
    Backend { api_key: String, use_icons: bool },
}

impl fmt::Debug for DiagramSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => f.write_str("Model"),
            Self::Backend { use_icons, .. } => f
                .debug_struct("Backend")
                .field("api_key", &"<redacted>")
                .field("use_icons", use_icons)
                .finish(),
        }
    }
}

/// One user action. Immutable once built.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub topic: String,
    pub kind: ContentKind,
    pub diagram_type: Option<&'static DiagramType>,
    pub style: Option<String>,
    pub length_level: Option<u8>,
    /// Conversion target; documents default to DOCX, presentations are always PPTX.
    pub format: Option<ConversionFormat>,
    pub image_format: ImageFormat,
    pub plan_source: PlanSource,
    pub diagram_source: DiagramSource,
}

impl GenerationRequest {
    fn new(kind: ContentKind, topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            kind,
            diagram_type: None,
            style: None,
            length_level: None,
            format: None,
            image_format: ImageFormat::default(),
            plan_source: PlanSource::default(),
            diagram_source: DiagramSource::default(),
        }
    }

    pub fn diagram(topic: impl Into<String>, diagram_type: Option<&'static DiagramType>) -> Self {
        Self {
            diagram_type,
            ..Self::new(ContentKind::Diagram, topic)
        }
    }

    pub fn document(topic: impl Into<String>) -> Self {
        Self::new(ContentKind::Document, topic)
    }

    pub fn presentation(topic: impl Into<String>) -> Self {
        Self::new(ContentKind::Presentation, topic)
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn length_level(mut self, level: u8) -> Self {
        self.length_level = Some(level);
        self
    }

    pub fn format(mut self, format: ConversionFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = format;
        self
    }

    pub fn plan_source(mut self, source: PlanSource) -> Self {
        self.plan_source = source;
        self
    }

    pub fn diagram_source(mut self, source: DiagramSource) -> Self {
        self.diagram_source = source;
        self
    }

    fn level(&self) -> usize {
        self.length_level.unwrap_or(MIN_LENGTH_LEVEL) as usize
    }

    fn style_str(&self) -> Option<&str> {
        self.style.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn conversion_format(&self) -> ConversionFormat {
        match self.kind {
            ContentKind::Presentation => ConversionFormat::Pptx,
            _ => self.format.unwrap_or(ConversionFormat::Docx),
        }
    }

    /// Checks that need no network. Runs before any model or backend call.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.topic.trim().is_empty() {
            return Err(PipelineError::validation(match self.kind {
                ContentKind::Diagram => "Please describe what you want to visualize.",
                ContentKind::Document => "Please enter a document topic first.",
                ContentKind::Presentation => "Please enter a presentation topic first.",
            }));
        }
        if let Some(level) = self.length_level {
            if !(MIN_LENGTH_LEVEL..=MAX_LENGTH_LEVEL).contains(&level) {
                return Err(PipelineError::validation(format!(
                    "Length level must be between {MIN_LENGTH_LEVEL} and {MAX_LENGTH_LEVEL}, got {level}."
                )));
            }
        }
        match self.kind {
            ContentKind::Diagram => {
                if self.diagram_type.is_none() {
                    return Err(PipelineError::validation("Please select a diagram type."));
                }
                if let DiagramSource::Backend { api_key, .. } = &self.diagram_source {
                    if api_key.trim().is_empty() {
                        return Err(PipelineError::validation(
                            "An API key is required for backend diagram generation.",
                        ));
                    }
                }
            }
            ContentKind::Document => {
                if self.format == Some(ConversionFormat::Pptx) {
                    return Err(PipelineError::validation(
                        "Documents can be exported as DOCX or PDF.",
                    ));
                }
            }
            ContentKind::Presentation => {
                if matches!(self.format, Some(f) if f != ConversionFormat::Pptx) {
                    return Err(PipelineError::validation(
                        "Presentations can only be exported as PPTX.",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Split `total` items over `calls` calls, remainder to the earliest calls.
pub fn split_items(total: usize, calls: usize) -> Vec<usize> {
    if calls == 0 {
        return Vec::new();
    }
    let base = total / calls;
    let remainder = total % calls;
    (0..calls)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("A {0} is already being generated. Please wait.")]
    Busy(ContentKind),
    #[error(transparent)]
    ModelExhausted(#[from] FallbackError),
    #[error(transparent)]
    EmptyResponse(#[from] SanitizeError),
    #[error(transparent)]
    InvalidStructure(#[from] PlanError),
    #[error("Diagram rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short machine-readable kind, for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Busy(_) => "busy",
            Self::ModelExhausted(_) => "model_exhausted",
            Self::EmptyResponse(_) => "empty_response",
            Self::InvalidStructure(_) => "invalid_structure",
            Self::Render(_) => "render",
            Self::Backend(_) => "backend",
            Self::Delivery(_) => "delivery",
            Self::State(_) => "state",
            Self::Config(_) => "config",
        }
    }

    /// The single line shown to the user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Whether simply trying again may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_)
                | Self::ModelExhausted(FallbackError::Exhausted { .. })
                | Self::EmptyResponse(_)
                | Self::InvalidStructure(_)
                | Self::Backend(_)
        )
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone)]
pub struct Generated {
    pub request_id: Uuid,
    pub artifact: Artifact,
    /// Plan title for documents and presentations.
    pub title: Option<String>,
    /// Sanitized Mermaid code for diagrams.
    pub code: Option<String>,
    /// Models that answered, one per model call, in order.
    pub models: Vec<String>,
    /// Sections or slides in the final plan.
    pub items: usize,
}

#[derive(Debug, Clone)]
pub struct Delivered {
    pub path: PathBuf,
    pub generated: Generated,
}

// =============================================================================
// Generator
// =============================================================================

pub struct Generator {
    gateway: Arc<dyn ChatGateway>,
    backend: ConversionClient,
    renderer: Arc<dyn DiagramRenderer>,
    models: ModelConfig,
    theme: MermaidTheme,
    inflight: InFlight,
}

impl Generator {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        backend: ConversionClient,
        renderer: Arc<dyn DiagramRenderer>,
    ) -> Self {
        Self {
            gateway,
            backend,
            renderer,
            models: ModelConfig::default(),
            theme: MermaidTheme::default(),
            inflight: InFlight::new(),
        }
    }

    pub fn with_models(mut self, models: ModelConfig) -> Self {
        self.models = models;
        self
    }

    pub fn with_theme(mut self, theme: MermaidTheme) -> Self {
        self.theme = theme;
        self
    }

    pub fn inflight(&self) -> &InFlight {
        &self.inflight
    }

    fn claim(&self, kind: ContentKind) -> Result<InFlightGuard, PipelineError> {
        self.inflight
            .try_acquire(kind)
            .ok_or(PipelineError::Busy(kind))
    }

    /// Produce the artifact without writing it anywhere.
    pub async fn generate(&self, req: &GenerationRequest) -> Result<Generated, PipelineError> {
        req.validate()?;
        let _guard = self.claim(req.kind)?;
        self.produce(req).await
    }

    /// Produce the artifact and write it into `out_dir`.
    pub async fn run(
        &self,
        req: &GenerationRequest,
        out_dir: &Path,
    ) -> Result<Delivered, PipelineError> {
        req.validate()?;
        let _guard = self.claim(req.kind)?;
        let generated = self.produce(req).await?;
        let path = deliver(&generated.artifact, out_dir).await?;
        Ok(Delivered { path, generated })
    }

    async fn produce(&self, req: &GenerationRequest) -> Result<Generated, PipelineError> {
        info!(
            request_id = %req.id,
            kind = %req.kind,
            topic_chars = req.topic.trim().len(),
            "generation started"
        );
        let result = match req.kind {
            ContentKind::Diagram => self.diagram(req).await,
            ContentKind::Document => self.document(req).await,
            ContentKind::Presentation => self.presentation(req).await,
        };
        match &result {
            Ok(out) => info!(
                request_id = %req.id,
                file = %out.artifact.file_name,
                bytes = out.artifact.len(),
                "generation finished"
            ),
            Err(e) => warn!(request_id = %req.id, code = e.code(), error = %e, "generation failed"),
        }
        result
    }

    async fn ask(
        &self,
        candidates: &ModelCandidates,
        prompt: &str,
        options: CallOptions,
        caller: &'static str,
        req: &GenerationRequest,
    ) -> Result<(String, String), PipelineError> {
        let attribution = Attribution::new(caller).with_request(req.id);
        let outcome = run_fallback(
            self.gateway.as_ref(),
            candidates,
            prompt,
            options,
            attribution,
        )
        .await?;
        debug!(
            model = %outcome.model,
            chars = outcome.content().len(),
            "raw model response"
        );
        Ok((outcome.model.clone(), outcome.into_content()))
    }

    // -------------------------------------------------------------------------
    // Diagrams
    // -------------------------------------------------------------------------

    async fn diagram(&self, req: &GenerationRequest) -> Result<Generated, PipelineError> {
        let diagram = req
            .diagram_type
            .ok_or_else(|| PipelineError::validation("Please select a diagram type."))?;

        let mut models = Vec::new();
        let raw = match &req.diagram_source {
            DiagramSource::Model => {
                let prompt = diagram_prompt(diagram, &req.topic);
                let (model, text) = self
                    .ask(
                        self.models.for_kind(req.kind),
                        &prompt.text,
                        CallOptions::default(),
                        "pipeline::diagram",
                        req,
                    )
                    .await?;
                models.push(model);
                text
            }
            DiagramSource::Backend { api_key, use_icons } => {
                let body = DiagramGenerationRequest {
                    api_key: api_key.clone(),
                    diagram_type: diagram.type_name.to_string(),
                    description: req.topic.trim().to_string(),
                    use_icons: *use_icons,
                };
                self.backend.generate_diagram(&body).await?
            }
        };

        let code = sanitize_nonempty(&raw, SanitizeTarget::Diagram(diagram))?;
        let rendered = self
            .renderer
            .render(
                &code,
                RenderOptions {
                    format: req.image_format,
                    theme: self.theme,
                },
            )
            .await?;

        Ok(Generated {
            request_id: req.id,
            artifact: Artifact {
                kind: ContentKind::Diagram,
                file_name: format!("diagram.{}", rendered.format.extension()),
                bytes: rendered.bytes,
            },
            title: None,
            code: Some(code),
            models,
            items: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Documents
    // -------------------------------------------------------------------------

    async fn document(&self, req: &GenerationRequest) -> Result<Generated, PipelineError> {
        let mut models = Vec::new();
        let plan = match req.plan_source {
            PlanSource::Backend => {
                let raw = self.backend.generate_plan(&req.topic, "document").await?;
                parse_plan::<DocumentPlan>(&sanitize_nonempty(&raw, SanitizeTarget::Structured)?)?
            }
            PlanSource::Model => {
                let parts = split_items(ITEMS_PER_LEVEL * req.level(), req.level());
                let mut plan: Option<DocumentPlan> = None;
                for (idx, count) in parts.iter().enumerate() {
                    let prior: Vec<String> = plan
                        .as_ref()
                        .map(|p| p.headers().map(str::to_string).collect())
                        .unwrap_or_default();
                    let prompt = document_prompt(&req.topic, *count, &prior, req.style_str());
                    let (model, raw) = self
                        .ask(
                            self.models.for_kind(req.kind),
                            &prompt.text,
                            CallOptions::json(),
                            "pipeline::document",
                            req,
                        )
                        .await?;
                    models.push(model);
                    let cleaned = sanitize_nonempty(&raw, SanitizeTarget::Structured)?;
                    let part: DocumentPlan = parse_plan(&cleaned).inspect_err(|e| {
                        debug!(part = idx + 1, detail = %e.detail(), "rejected plan part")
                    })?;
                    info!(
                        part = idx + 1,
                        of = parts.len(),
                        sections = part.sections.len(),
                        "document part ready"
                    );
                    match plan.as_mut() {
                        Some(acc) => acc.extend(part),
                        None => plan = Some(part),
                    }
                }
                plan.ok_or(PlanError::NoContent)?
            }
        };

        let format = req.conversion_format();
        let file = self.backend.convert(format, &plan, req.style_str()).await?;
        Ok(Generated {
            request_id: req.id,
            artifact: Artifact::titled(
                ContentKind::Document,
                &plan.title,
                format.extension(),
                file.bytes,
            ),
            items: plan.sections.len(),
            title: Some(plan.title),
            code: None,
            models,
        })
    }

    // -------------------------------------------------------------------------
    // Presentations
    // -------------------------------------------------------------------------

    async fn presentation(&self, req: &GenerationRequest) -> Result<Generated, PipelineError> {
        let mut models = Vec::new();
        let raw = match req.plan_source {
            PlanSource::Backend => self.backend.generate_plan(&req.topic, "presentation").await?,
            PlanSource::Model => {
                let prompt = presentation_prompt(
                    &req.topic,
                    ITEMS_PER_LEVEL * req.level(),
                    req.style_str(),
                );
                let (model, text) = self
                    .ask(
                        self.models.for_kind(req.kind),
                        &prompt.text,
                        CallOptions::json(),
                        "pipeline::presentation",
                        req,
                    )
                    .await?;
                models.push(model);
                text
            }
        };
        let plan: PresentationPlan =
            parse_plan(&sanitize_nonempty(&raw, SanitizeTarget::Structured)?)?;

        let format = req.conversion_format();
        let file = self.backend.convert(format, &plan, req.style_str()).await?;
        Ok(Generated {
            request_id: req.id,
            artifact: Artifact::titled(
                ContentKind::Presentation,
                &plan.title,
                format.extension(),
                file.bytes,
            ),
            items: plan.slides.len(),
            title: Some(plan.title),
            code: None,
            models,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
