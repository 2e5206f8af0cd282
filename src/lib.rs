#![forbid(unsafe_code)]

//! # docsmith
//!
//! Turns a topic into a diagram, a document or a slide deck.
//!
//! The topic goes to a chat-completion service through an ordered list of
//! fallback models. The first answer is sanitized, then either rendered
//! locally with the Mermaid CLI (diagrams) or parsed into a plan and sent to a
//! conversion backend that returns DOCX, PDF or PPTX. The result is written to
//! disk under a title-derived name.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod delivery;
pub mod fallback;
pub mod gateway;
pub mod pipeline;
pub mod plan;
pub mod prompts;
pub mod render;
pub mod sanitize;
pub mod state;

pub use backend::{BackendError, ConversionClient, ConversionFormat, DeviceFingerprint};
pub use catalog::DiagramType;
pub use config::GeneratorConfig;
pub use delivery::{Artifact, ContentKind, InFlight};
pub use fallback::{run_fallback, FallbackError, ModelCandidates};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use pipeline::{GenerationRequest, Generator, PipelineError};
pub use plan::{DocumentPlan, PresentationPlan};
pub use render::{DiagramRenderer, MermaidCliRenderer};
pub use state::{SqliteStateStore, StateStore, Theme};
