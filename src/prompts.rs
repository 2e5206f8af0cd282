//! Prompt templates for diagram, document and presentation generation.
//!
//! Domain logic only; the fallback executor sends the rendered text as a
//! single user message to every candidate model.

use crate::catalog::DiagramType;

// =============================================================================
// Prompt templates
// =============================================================================

/// Rendered prompt ready for the model.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub text: String,
}

/// A prompt template with `{placeholder}` slots.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub body: &'static str,
}

impl PromptTemplate {
    /// Fill `{name}` slots in one pass over the body. Substituted values are
    /// never scanned again, so a value that itself contains `{topic}` stays
    /// literal. Braces that do not enclose a known slot name are kept as is.
    fn render(&self, vars: &[(&str, &str)]) -> PromptInstance {
        let mut text = String::with_capacity(self.body.len());
        let mut rest = self.body;
        while let Some(open) = rest.find('{') {
            text.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let slot = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(var, _)| *var == name)
                    .map(|(_, value)| (close, *value))
            });
            match slot {
                Some((close, value)) => {
                    text.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    text.push('{');
                    rest = after;
                }
            }
        }
        text.push_str(rest);
        PromptInstance {
            template_slug: self.slug,
            text: text.trim().to_string(),
        }
    }
}

pub const DIAGRAM_PROMPT: PromptTemplate = PromptTemplate {
    slug: "diagram_v1",
    body: r#"
You are a Mermaid.js expert. Generate code for a {diagram_name}.
The first line MUST be `{syntax}`.
Output ONLY raw Mermaid code. No explanations or markdown.

Example of Mindmap structure:
mindmap
  root((Topic))
    Branch 1
    Branch 2

User request: {topic}
"#,
};

pub const DOCUMENT_PROMPT: PromptTemplate = PromptTemplate {
    slug: "document_v1",
    body: r#"
You are an expert content creator. Generate content for a document on the given topic.
You MUST respond with ONLY a valid JSON object, with this exact structure:
{
  "title": "Main Document Title",
  "sections": [
    { "header": "Section 1 Heading", "paragraphs": ["Paragraph 1.", "Paragraph 2."] },
    { "header": "Section 2 Heading", "paragraphs": ["A single paragraph."] }
  ]
}
Write exactly {section_count} sections.{style_line}{context_note}

Topic: {topic}
"#,
};

pub const PRESENTATION_PROMPT: PromptTemplate = PromptTemplate {
    slug: "presentation_v1",
    body: r#"
You are an expert presentation creator. Generate content for a slide deck on the given topic.
You MUST respond with ONLY a valid JSON object, with this exact structure:
{
  "title": "Main Presentation Title",
  "slides": [
    { "title": "Slide 1 Title", "content": ["Bullet point 1.", "Bullet point 2."] },
    { "title": "Slide 2 Title", "content": ["Another bullet point.", "And another."] }
  ]
}
Create about {slide_count} slides.{style_line}

Topic: {topic}
"#,
};

// =============================================================================
// Rendering
// =============================================================================

fn style_line(style: Option<&str>) -> String {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!("\nWriting style: {style}."),
        None => String::new(),
    }
}

pub fn diagram_prompt(diagram: &DiagramType, topic: &str) -> PromptInstance {
    DIAGRAM_PROMPT.render(&[
        ("diagram_name", diagram.name),
        ("syntax", diagram.syntax),
        ("topic", topic.trim()),
    ])
}

/// One part of a (possibly multi-part) document.
///
/// `prior_headers` lists every section header produced by earlier parts; when
/// non-empty the prompt tells the model to continue without repeating them.
pub fn document_prompt(
    topic: &str,
    section_count: usize,
    prior_headers: &[String],
    style: Option<&str>,
) -> PromptInstance {
    let context_note = if prior_headers.is_empty() {
        String::new()
    } else {
        let listed = prior_headers
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nThis continues an existing document. It already has these sections:\n{listed}\nDo not repeat them. Use the same title."
        )
    };
    let count = section_count.to_string();
    DOCUMENT_PROMPT.render(&[
        ("section_count", &count),
        ("style_line", &style_line(style)),
        ("context_note", &context_note),
        ("topic", topic.trim()),
    ])
}

pub fn presentation_prompt(topic: &str, slide_count: usize, style: Option<&str>) -> PromptInstance {
    let count = slide_count.to_string();
    PRESENTATION_PROMPT.render(&[
        ("slide_count", &count),
        ("style_line", &style_line(style)),
        ("topic", topic.trim()),
    ])
}

// =============================================================================
// TESTS
// =============================================================================
