//! Typed document and presentation plans.
//!
//! A plan is what the model returns for structured content and what the
//! conversion backend accepts. The wire format is the same JSON in both
//! directions, plus an optional `style` field on the way out.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// User-facing message for any parse or validation failure.
pub const INVALID_JSON: &str = "AI returned invalid JSON. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("AI returned invalid JSON. Please try again.")]
    InvalidJson(#[from] serde_json::Error),
    #[error("AI returned invalid JSON. Please try again.")]
    MissingTitle,
    #[error("AI returned invalid JSON. Please try again.")]
    NoContent,
}

impl PlanError {
    /// What was actually wrong, for logs.
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidJson(e) => format!("malformed plan json: {e}"),
            Self::MissingTitle => "plan title is empty".into(),
            Self::NoContent => "plan has no sections or slides".into(),
        }
    }
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub header: String,
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub title: String,
    pub sections: Vec<Section>,
}

impl DocumentPlan {
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.header.as_str())
    }

    /// Append another part's sections. The title of `self` is kept.
    pub fn extend(&mut self, part: DocumentPlan) {
        self.sections.extend(part.sections);
    }
}

// =============================================================================
// Presentations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationPlan {
    pub title: String,
    pub slides: Vec<Slide>,
}

// =============================================================================
// Parsing
// =============================================================================

/// A plan that can be checked after deserialization.
pub trait Plan: Serialize + DeserializeOwned {
    fn title(&self) -> &str;
    fn item_count(&self) -> usize;
}

impl Plan for DocumentPlan {
    fn title(&self) -> &str {
        &self.title
    }

    fn item_count(&self) -> usize {
        self.sections.len()
    }
}

impl Plan for PresentationPlan {
    fn title(&self) -> &str {
        &self.title
    }

    fn item_count(&self) -> usize {
        self.slides.len()
    }
}

/// Parse sanitized text into a plan. No partial recovery.
pub fn parse_plan<P: Plan>(text: &str) -> Result<P, PlanError> {
    let plan: P = serde_json::from_str(text)?;
    validate(&plan)?;
    Ok(plan)
}

/// Same checks for plans that did not come through [`parse_plan`].
pub fn validate<P: Plan>(plan: &P) -> Result<(), PlanError> {
    if plan.title().trim().is_empty() {
        return Err(PlanError::MissingTitle);
    }
    if plan.item_count() == 0 {
        return Err(PlanError::NoContent);
    }
    Ok(())
}

/// Conversion request body: the plan's fields plus an optional style.
#[derive(Debug, Serialize)]
pub struct StyledPlan<'a, P: Serialize> {
    #[serde(flatten)]
    pub plan: &'a P,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<&'a str>,
}
