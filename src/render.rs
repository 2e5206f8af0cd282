//! Local diagram rendering.
//!
//! The shipped renderer shells out to the Mermaid CLI (`mmdc`). Tests and
//! embedders can plug in anything implementing [`DiagramRenderer`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_MMDC: &str = "mmdc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Svg,
    Png,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
        }
    }
}

/// Mermaid color theme passed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MermaidTheme {
    #[default]
    Default,
    Dark,
}

impl MermaidTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub format: ImageFormat,
    pub theme: MermaidTheme,
}

/// Rendered diagram. For SVG, `bytes` is UTF-8 markup.
#[derive(Debug, Clone)]
pub struct RenderedDiagram {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to start renderer {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("renderer exited with status {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("renderer produced no output")]
    EmptyOutput,
    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, code: &str, options: RenderOptions)
        -> Result<RenderedDiagram, RenderError>;
}

// =============================================================================
// Mermaid CLI
// =============================================================================

#[derive(Debug, Clone)]
pub struct MermaidCliRenderer {
    program: PathBuf,
    timeout: Duration,
    work_dir: PathBuf,
}

impl Default for MermaidCliRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_MMDC)
    }
}

impl MermaidCliRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(60),
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for the temporary input and output files.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(
        &self,
        input: &Path,
        output: &Path,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-t")
            .arg(options.theme.as_str())
            .arg("-b")
            .arg("transparent")
            .kill_on_drop(true);

        let child = cmd.output();
        let out = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|source| RenderError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?,
            Err(_) => return Err(RenderError::Timeout(self.timeout)),
        };

        if !out.status.success() {
            return Err(RenderError::Failed {
                code: out.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        // mmdc sometimes exits 0 after logging a parse error; an empty or missing
        // output file is a failure.
        match tokio::fs::read(output).await {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) => Err(RenderError::EmptyOutput),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RenderError::EmptyOutput),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCliRenderer {
    async fn render(
        &self,
        code: &str,
        options: RenderOptions,
    ) -> Result<RenderedDiagram, RenderError> {
        let stem = format!("docsmith-{}", Uuid::new_v4());
        let input = self.work_dir.join(format!("{stem}.mmd"));
        let output = self
            .work_dir
            .join(format!("{stem}.{}", options.format.extension()));

        tokio::fs::write(&input, code).await?;
        let result = self.run(&input, &output, options).await;

        let _ = tokio::fs::remove_file(&input).await;
        let _ = tokio::fs::remove_file(&output).await;

        let bytes = result?;
        debug!(
            format = options.format.extension(),
            bytes = bytes.len(),
            "rendered diagram"
        );
        Ok(RenderedDiagram {
            format: options.format,
            bytes,
        })
    }
}
