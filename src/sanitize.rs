//! Cleanup of raw model output before rendering or parsing.
//!
//! Every step is idempotent, so running the whole sanitizer twice yields the
//! same text as running it once.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::DiagramType;

// Opening fence with optional language tag on its own line, or any bare fence.
static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)```[\w+-]*[ \t]*(?:\r?\n|$)|```").expect("Invalid fence regex")
});

// Mindmap root node: `root((Topic))`, `((Topic))`, `root[Topic]`, `root(Topic)`.
static MINDMAP_ROOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w*(?:\(\([^()]*\)\)|\[[^\[\]]*\]|\([^()]*\)))\s*")
        .expect("Invalid mindmap root regex")
});

// Separators the model uses when it flattens a mindmap onto one line.
static MINDMAP_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s{2,}|\s*;\s*|\s+-\s+|\s*\|\s*|\s*->\s*").expect("Invalid separator regex")
});

// A closing node shape followed by the next node on the same line.
static SHAPE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\)\)|\]|\))\s+").expect("Invalid shape boundary regex"));

/// What the sanitized text will be used for.
#[derive(Debug, Clone, Copy)]
pub enum SanitizeTarget {
    /// Mermaid code for the given diagram type.
    Diagram(&'static DiagramType),
    /// A single JSON object (document or presentation plan).
    Structured,
}

#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    #[error("Empty response from AI.")]
    Empty,
}

/// Sanitize and reject empty results.
pub fn sanitize_nonempty(raw: &str, target: SanitizeTarget) -> Result<String, SanitizeError> {
    let cleaned = sanitize(raw, target);
    if cleaned.is_empty() {
        return Err(SanitizeError::Empty);
    }
    Ok(cleaned)
}

/// Sanitize raw model output for `target`.
pub fn sanitize(raw: &str, target: SanitizeTarget) -> String {
    let text = strip_fences(raw);
    let text = text.trim();
    match target {
        SanitizeTarget::Diagram(diagram) => {
            let code = drop_noise_lines(text, diagram);
            let code = if diagram.is_mindmap() {
                reflow_mindmap(&code)
            } else {
                code
            };
            code.trim().to_string()
        }
        SanitizeTarget::Structured => extract_json_object(text).trim().to_string(),
    }
}

/// Remove code fence markers, including an opening fence's language tag.
pub fn strip_fences(raw: &str) -> String {
    FENCE.replace_all(raw, "").into_owned()
}

fn is_noise_line(line: &str) -> bool {
    let t = line.trim();
    t.is_empty()
        || t.starts_with("//")
        || (t.starts_with("%%") && !t.starts_with("%%{"))
        || t.contains("Note:")
}

/// Drop comment lines, note lines, blank lines, and any prose before the diagram header.
fn drop_noise_lines(text: &str, diagram: &DiagramType) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !is_noise_line(l)).collect();

    let header_at = lines.iter().position(|l| {
        l.split_whitespace()
            .next()
            .is_some_and(|token| diagram.accepts_header(token))
    });

    let start = match header_at {
        // Init directives may precede the header; keep them.
        Some(idx) => lines[..idx]
            .iter()
            .rposition(|l| !l.trim_start().starts_with("%%{"))
            .map(|last_prose| last_prose + 1)
            .unwrap_or(0),
        None => 0,
    };

    lines[start..].join("\n")
}

/// Best-effort, lossy repair for mindmaps flattened onto one line.
///
/// Only fires when the body occupies at most one line (or shares the header
/// line); well-formed multi-line mindmaps pass through untouched. Node text that
/// itself contains the separator patterns gets split too.
pub fn reflow_mindmap(code: &str) -> String {
    let mut lines = code.lines();
    let Some(first) = lines.next() else {
        return code.to_string();
    };
    let first = first.trim();
    let mut tokens = first.splitn(2, char::is_whitespace);
    if tokens.next() != Some("mindmap") {
        return code.to_string();
    }
    let header_rest = tokens.next().unwrap_or("").trim();
    let body: Vec<&str> = lines.map(str::trim_end).filter(|l| !l.trim().is_empty()).collect();

    if !header_rest.is_empty() && body.len() > 1 {
        let mut out = format!("mindmap\n  {header_rest}");
        for line in body {
            out.push('\n');
            out.push_str(line);
        }
        return out;
    }

    if body.len() > 1 || (header_rest.is_empty() && body.is_empty()) {
        return code.to_string();
    }

    let run_on = if header_rest.is_empty() {
        body[0].trim().to_string()
    } else {
        format!("{} {}", header_rest, body.first().map(|l| l.trim()).unwrap_or(""))
            .trim()
            .to_string()
    };

    let (root, rest) = match MINDMAP_ROOT.captures(&run_on) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let root = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            (Some(root), run_on[whole..].to_string())
        }
        None => (None, run_on.clone()),
    };

    let rest = SHAPE_BOUNDARY.replace_all(&rest, "$1;");
    let mut segments: Vec<String> = MINDMAP_SEPARATOR
        .split(&rest)
        .map(|s| s.trim().to_string())
        .filter(|s| !is_noise_line(s))
        .collect();

    let root = match root {
        Some(root) => root,
        None if segments.is_empty() => return code.to_string(),
        None => {
            let label = segments.remove(0).replace(['(', ')', '[', ']'], "");
            format!("root(({}))", label.trim())
        }
    };

    let mut out = format!("mindmap\n  {root}");
    for seg in segments {
        out.push_str("\n    ");
        out.push_str(&seg);
    }
    out
}

/// Keep the span from the first `{` to its matching `}`, dropping commentary
/// around it. Braces inside JSON strings are ignored. Unbalanced input is
/// returned unchanged so the parser can report it.
pub fn extract_json_object(text: &str) -> &str {
    let Some(start) = text.find('{') else {
        return text;
    };
    let remainder = &text[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in remainder.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &remainder[..=i];
                }
            }
            _ => {}
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{self, FLOWCHART, MINDMAP};

    fn diagram(raw: &str) -> String {
        sanitize(raw, SanitizeTarget::Diagram(&FLOWCHART))
    }

    fn assert_idempotent(raw: &str, target: SanitizeTarget) {
        let once = sanitize(raw, target);
        let twice = sanitize(&once, target);
        assert_eq!(once, twice, "not idempotent for input {raw:?}");
    }

    #[test]
    fn strips_mermaid_fence_and_trims() {
        let raw = "```mermaid\nflowchart TD\n  A --> B\n```\n";
        assert_eq!(diagram(raw), "flowchart TD\n  A --> B");
    }

    #[test]
    fn keeps_header_when_fence_has_no_newline() {
        assert_eq!(strip_fences("```flowchart TD"), "flowchart TD");
    }

    #[test]
    fn drops_comments_notes_and_leading_prose() {
        let raw = "Here is your diagram:\n\nflowchart TD\n// start\n  A --> B\n%% comment\nNote: simplified\n\n  B --> C";
        assert_eq!(diagram(raw), "flowchart TD\n  A --> B\n  B --> C");
    }

    #[test]
    fn keeps_init_directive_before_header() {
        let raw = "Sure!\n%%{init: {'theme': 'dark'}}%%\nflowchart TD\n  A --> B";
        assert_eq!(
            diagram(raw),
            "%%{init: {'theme': 'dark'}}%%\nflowchart TD\n  A --> B"
        );
    }

    #[test]
    fn accepts_graph_alias_for_flowchart() {
        assert_eq!(diagram("Diagram:\ngraph LR\nA-->B"), "graph LR\nA-->B");
    }

    #[test]
    fn sequence_notes_with_participants_survive() {
        let seq = catalog::find("sequence").unwrap();
        let raw = "sequenceDiagram\n  Note over A,B: handshake\n  A->>B: hi";
        assert_eq!(sanitize(raw, SanitizeTarget::Diagram(seq)), raw);
    }

    #[test]
    fn mindmap_run_on_is_reflowed() {
        let raw = "mindmap root((Photosynthesis))  Light reactions  Calvin cycle  Chlorophyll";
        let out = sanitize(raw, SanitizeTarget::Diagram(&MINDMAP));
        assert_eq!(
            out,
            "mindmap\n  root((Photosynthesis))\n    Light reactions\n    Calvin cycle\n    Chlorophyll"
        );
    }

    #[test]
    fn mindmap_single_body_line_with_shapes_is_split() {
        let raw = "mindmap\nroot((AI)) ML[Machine learning] NLP; Vision";
        let out = sanitize(raw, SanitizeTarget::Diagram(&MINDMAP));
        assert_eq!(
            out,
            "mindmap\n  root((AI))\n    ML[Machine learning]\n    NLP\n    Vision"
        );
    }

    #[test]
    fn mindmap_without_root_shape_wraps_first_node() {
        let out = reflow_mindmap("mindmap\nWater cycle - Evaporation - Rain");
        assert_eq!(out, "mindmap\n  root((Water cycle))\n    Evaporation\n    Rain");
    }

    #[test]
    fn mindmap_header_content_moves_to_own_line() {
        let raw = "mindmap root((X))\n    A\n    B";
        assert_eq!(reflow_mindmap(raw), "mindmap\n  root((X))\n    A\n    B");
    }

    #[test]
    fn well_formed_mindmap_is_untouched() {
        let raw = "mindmap\n  root((Topic))\n    Branch 1\n    Branch 2";
        assert_eq!(sanitize(raw, SanitizeTarget::Diagram(&MINDMAP)), raw);
    }

    #[test]
    fn structured_drops_fences_and_commentary() {
        let raw = "Sure! Here you go:\n```json\n{\"title\": \"T\", \"sections\": [{\"header\": \"a}\", \"paragraphs\": []}]}\n```\nHope it helps {:";
        assert_eq!(
            sanitize(raw, SanitizeTarget::Structured),
            "{\"title\": \"T\", \"sections\": [{\"header\": \"a}\", \"paragraphs\": []}]}"
        );
    }

    #[test]
    fn structured_unbalanced_is_left_for_the_parser() {
        assert_eq!(
            sanitize("{\"title\": \"T\"", SanitizeTarget::Structured),
            "{\"title\": \"T\""
        );
    }

    #[test]
    fn empty_after_cleanup_is_an_error() {
        let err = sanitize_nonempty("```mermaid\n```", SanitizeTarget::Diagram(&FLOWCHART))
            .unwrap_err();
        assert_eq!(err.to_string(), "Empty response from AI.");
        assert!(sanitize_nonempty("  \n// only a comment\n", SanitizeTarget::Diagram(&FLOWCHART)).is_err());
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "",
            "   ",
            "```",
            "`````mermaid\n`",
            "``x```\n`y``",
            "```mermaid\nflowchart TD\nA-->B\n```",
            "prose\n```json\n{\"a\": \"}\"}\n```trailing",
            "mindmap root((X)) a  b  // c",
            "mindmap\nroot((X))",
            "mindmap\n root((X))",
            "mindmap\nA; B; C",
            "mindmap\nfoo(bar",
            "mindmap a\nb",
            "Note: x\n%% y\n%%{init: {}}%%\nflowchart TD\r\nA-->B\r\n",
            "{ unbalanced",
            "no json here",
        ];
        for raw in inputs {
            assert_idempotent(raw, SanitizeTarget::Diagram(&FLOWCHART));
            assert_idempotent(raw, SanitizeTarget::Diagram(&MINDMAP));
            assert_idempotent(raw, SanitizeTarget::Structured);
        }
    }
}
