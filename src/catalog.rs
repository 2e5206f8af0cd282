//! Fixed catalog of Mermaid diagram types.

use serde::Serialize;

/// Static descriptor for one diagram type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagramType {
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub example: &'static str,
    /// First line the generated code must start with.
    pub syntax: &'static str,
}

impl DiagramType {
    const fn new(
        type_name: &'static str,
        name: &'static str,
        icon: &'static str,
        description: &'static str,
        example: &'static str,
        syntax: &'static str,
    ) -> Self {
        Self {
            type_name,
            name,
            icon,
            description,
            example,
            syntax,
        }
    }

    /// Lowercase identifier used on the command line, e.g. `sequence-diagram`.
    pub fn slug(&self) -> String {
        slugify(self.type_name)
    }

    /// Diagram keyword, i.e. the first token of [`Self::syntax`].
    pub fn keyword(&self) -> &'static str {
        self.syntax.split_whitespace().next().unwrap_or(self.syntax)
    }

    /// Whether `token` opens a diagram of this type. Mermaid accepts a few
    /// older spellings (`graph` for flowcharts, `stateDiagram` without `-v2`).
    pub fn accepts_header(&self, token: &str) -> bool {
        let keyword = self.keyword();
        if token == keyword {
            return true;
        }
        match keyword {
            "flowchart" => token == "graph",
            "stateDiagram-v2" => token == "stateDiagram",
            _ => false,
        }
    }

    pub fn is_mindmap(&self) -> bool {
        self.keyword() == "mindmap"
    }
}

pub const FLOWCHART: DiagramType = DiagramType::new(
    "Flowchart",
    "Flowchart",
    "fas fa-sitemap",
    "Show processes, decisions, and flows",
    "Process workflow, decision trees, algorithm steps",
    "flowchart TD",
);

pub const MINDMAP: DiagramType = DiagramType::new(
    "Mindmap",
    "Mind Map",
    "fas fa-brain",
    "Organize ideas hierarchically",
    "Brainstorming, concept mapping, study notes",
    "mindmap",
);

pub const CATALOG: &[DiagramType] = &[
    FLOWCHART,
    DiagramType::new(
        "Sequence Diagram",
        "Sequence",
        "fas fa-stream",
        "Show interactions between participants over time",
        "API calls, user authentication flow, message exchanges",
        "sequenceDiagram",
    ),
    DiagramType::new(
        "Class Diagram",
        "Class",
        "fas fa-cube",
        "Show object-oriented class structures",
        "Software architecture, database models, OOP design",
        "classDiagram",
    ),
    DiagramType::new(
        "State Diagram",
        "State",
        "fas fa-circle-notch",
        "Show different states and transitions",
        "User session states, order status, app lifecycle",
        "stateDiagram-v2",
    ),
    DiagramType::new(
        "ER Diagram",
        "ER Diagram",
        "fas fa-database",
        "Show database relationships",
        "Database schema, table relationships, data models",
        "erDiagram",
    ),
    DiagramType::new(
        "User Journey",
        "User Journey",
        "fas fa-route",
        "Map user experience and emotions",
        "Customer journey, user onboarding, app usage flow",
        "journey",
    ),
    DiagramType::new(
        "Gantt",
        "Gantt",
        "fas fa-tasks",
        "Show project timeline and tasks",
        "Project schedule, sprint planning, task dependencies",
        "gantt",
    ),
    DiagramType::new(
        "Pie Chart",
        "Pie Chart",
        "fas fa-chart-pie",
        "Show proportional data",
        "Market share, budget distribution, survey results",
        "pie",
    ),
    DiagramType::new(
        "Quadrant Chart",
        "Quadrant",
        "fas fa-th",
        "Plot items in 4 quadrants",
        "Priority matrix, risk assessment, feature evaluation",
        "quadrantChart",
    ),
    MINDMAP,
    DiagramType::new(
        "Timeline",
        "Timeline",
        "fas fa-history",
        "Show chronological events",
        "Historical events, project milestones, company history",
        "timeline",
    ),
    DiagramType::new(
        "GitGraph",
        "Git Graph",
        "fab fa-git-alt",
        "Show git branch history",
        "Git commits, branch merges, version history",
        "gitGraph",
    ),
    DiagramType::new(
        "Sankey",
        "Sankey",
        "fas fa-water",
        "Show flow quantities between nodes",
        "Energy flow, budget allocation, traffic sources",
        "sankey-beta",
    ),
    DiagramType::new(
        "XY Chart",
        "XY Chart",
        "fas fa-chart-line",
        "Plot data points on X and Y axes",
        "Sales trends, performance metrics, correlation data",
        "xychart-beta",
    ),
    DiagramType::new(
        "Block Diagram",
        "Block",
        "fas fa-cubes",
        "Show system components and relationships",
        "System architecture, network topology, infrastructure",
        "block-beta",
    ),
    DiagramType::new(
        "Kanban",
        "Kanban",
        "fas fa-columns",
        "Visual workflow board",
        "Task management, sprint board, workflow stages",
        "kanban",
    ),
];

fn slugify(s: &str) -> String {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Look a diagram type up by type, display name, slug or keyword, ignoring case
/// and punctuation (`"mind map"`, `"Mindmap"` and `"mindmap"` all match).
pub fn find(query: &str) -> Option<&'static DiagramType> {
    let wanted = slugify(query).replace('-', "");
    if wanted.is_empty() {
        return None;
    }
    CATALOG.iter().find(|d| {
        [d.type_name, d.name, d.keyword()]
            .iter()
            .any(|candidate| slugify(candidate).replace('-', "") == wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_sixteen_unique_types() {
        assert_eq!(CATALOG.len(), 16);
        let mut slugs: Vec<String> = CATALOG.iter().map(|d| d.slug()).collect();
        slugs.sort();
        slugs.dedup();
        assert_eq!(slugs.len(), 16);
    }

    #[test]
    fn find_matches_names_loosely() {
        assert_eq!(find("flowchart").map(|d| d.syntax), Some("flowchart TD"));
        assert_eq!(find("Mind Map").map(|d| d.type_name), Some("Mindmap"));
        assert_eq!(find("sequence-diagram").map(|d| d.keyword()), Some("sequenceDiagram"));
        assert_eq!(find("er_diagram").map(|d| d.keyword()), Some("erDiagram"));
        assert!(find("venn").is_none());
        assert!(find("  ").is_none());
    }

    #[test]
    fn header_aliases() {
        assert!(FLOWCHART.accepts_header("graph"));
        assert!(FLOWCHART.accepts_header("flowchart"));
        assert!(!FLOWCHART.accepts_header("mindmap"));
        assert!(MINDMAP.is_mindmap());
    }
}
