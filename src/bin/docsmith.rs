#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docsmith::backend::{ConversionClient, ConversionFormat};
use docsmith::catalog::{self, CATALOG};
use docsmith::config::GeneratorConfig;
use docsmith::gateway::chat_completions::ChatCompletionsAdapter;
use docsmith::gateway::{ProviderGateway, TracingUsageSink};
use docsmith::pipeline::{DiagramSource, GenerationRequest, Generator, PlanSource};
use docsmith::render::{ImageFormat, MermaidCliRenderer};
use docsmith::state::{self, SqliteStateStore, Theme};

#[derive(Parser)]
#[command(name = "docsmith", version, about = "Generate diagrams, documents and slide decks from a topic")]
struct Cli {
    /// JSON config file (defaults apply for missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local state database (theme, admin token)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a Mermaid diagram and render it locally
    Diagram {
        /// Diagram type, e.g. flowchart, mindmap, sequence (see `docsmith types`)
        #[arg(long = "type")]
        diagram_type: String,
        #[arg(long)]
        topic: String,
        #[arg(long, value_enum, default_value = "svg")]
        format: CliImageFormat,
        /// Generate the code on the conversion backend with your own model key
        #[arg(long)]
        via_backend: bool,
        /// Model API key for --via-backend
        #[arg(long, env = "DOCSMITH_BACKEND_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Ask the backend to add icons (--via-backend only)
        #[arg(long)]
        use_icons: bool,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Generate a document (DOCX or PDF)
    Document {
        #[arg(long)]
        topic: String,
        #[arg(long, value_enum, default_value = "docx")]
        format: CliDocumentFormat,
        #[arg(long)]
        style: Option<String>,
        /// 1 = short, 2 = medium, 3 = long (one model call per level)
        #[arg(long, default_value_t = 1)]
        length: u8,
        #[arg(long, value_enum, default_value = "model")]
        plan_source: CliPlanSource,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Generate a presentation (PPTX)
    Presentation {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        style: Option<String>,
        /// Slide count hint: 1 = 5 slides, 2 = 10, 3 = 15
        #[arg(long, default_value_t = 1)]
        length: u8,
        #[arg(long, value_enum, default_value = "model")]
        plan_source: CliPlanSource,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// List the supported diagram types
    Types {
        #[arg(long)]
        json: bool,
    },
    /// Ask the backend whether the stored admin token is valid
    Health,
    /// Show or change the theme used for diagrams
    Theme {
        #[command(subcommand)]
        command: Option<ThemeCommands>,
    },
    /// Manage the admin token sent to the backend
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
enum ThemeCommands {
    Get,
    Set {
        #[arg(value_enum)]
        theme: CliTheme,
    },
    Toggle,
}

#[derive(Subcommand)]
enum TokenCommands {
    Set { token: String },
    Clear,
    Show,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliImageFormat {
    Svg,
    Png,
}

impl From<CliImageFormat> for ImageFormat {
    fn from(f: CliImageFormat) -> Self {
        match f {
            CliImageFormat::Svg => ImageFormat::Svg,
            CliImageFormat::Png => ImageFormat::Png,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliDocumentFormat {
    Docx,
    Pdf,
}

impl From<CliDocumentFormat> for ConversionFormat {
    fn from(f: CliDocumentFormat) -> Self {
        match f {
            CliDocumentFormat::Docx => ConversionFormat::Docx,
            CliDocumentFormat::Pdf => ConversionFormat::Pdf,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliPlanSource {
    Model,
    Backend,
}

impl From<CliPlanSource> for PlanSource {
    fn from(s: CliPlanSource) -> Self {
        match s {
            CliPlanSource::Model => PlanSource::Model,
            CliPlanSource::Backend => PlanSource::Backend,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliTheme {
    Light,
    Dark,
}

impl From<CliTheme> for Theme {
    fn from(t: CliTheme) -> Self {
        match t {
            CliTheme::Light => Theme::Light,
            CliTheme::Dark => Theme::Dark,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsmith=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    // A second install (e.g. in tests) is harmless.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn open_state(cli_path: Option<PathBuf>, config: &GeneratorConfig) -> Result<SqliteStateStore, Box<dyn std::error::Error>> {
    let path = cli_path.unwrap_or_else(|| config.state_path.clone());
    Ok(SqliteStateStore::new(path)?)
}

async fn build_generator(
    config: &GeneratorConfig,
    store: &SqliteStateStore,
) -> Result<Generator, Box<dyn std::error::Error>> {
    let adapter = ChatCompletionsAdapter::with_config(
        config.chat.api_key.clone(),
        config.chat.base_url.clone(),
        config.chat_timeout(),
    )?;
    let gateway = ProviderGateway::new(adapter, Arc::new(TracingUsageSink));
    let backend = build_backend(config, store).await?;
    let renderer =
        MermaidCliRenderer::new(config.renderer.mmdc.clone()).timeout(config.render_timeout());
    let theme = state::load_theme(store).await?;

    Ok(Generator::new(Arc::new(gateway), backend, Arc::new(renderer))
        .with_models(config.models.clone())
        .with_theme(theme.mermaid()))
}

async fn build_backend(
    config: &GeneratorConfig,
    store: &SqliteStateStore,
) -> Result<ConversionClient, Box<dyn std::error::Error>> {
    let token = state::load_admin_token(store).await?;
    Ok(ConversionClient::new(config.backend.url.clone(), config.backend_timeout())?
        .with_admin_token(token))
}

async fn generate(
    generator: &Generator,
    req: GenerationRequest,
    out: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("[docsmith] generating {}...", req.kind);
    let delivered = generator.run(&req, &out).await?;
    let generated = &delivered.generated;
    if !generated.models.is_empty() {
        eprintln!("[docsmith] used model(s): {}", generated.models.join(", "));
    }
    if let Some(title) = &generated.title {
        eprintln!("[docsmith] \"{title}\" with {} item(s)", generated.items);
    }
    println!("{}", delivered.path.display());
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = GeneratorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Types { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(CATALOG)?);
            } else {
                for d in CATALOG {
                    println!("{:<18} {:<16} {}", d.slug(), d.syntax, d.description);
                }
            }
        }
        Commands::Diagram {
            diagram_type,
            topic,
            format,
            via_backend,
            api_key,
            use_icons,
            out,
        } => {
            let diagram = catalog::find(&diagram_type)
                .ok_or_else(|| format!("unknown diagram type: {diagram_type} (see `docsmith types`)"))?;
            let source = if via_backend {
                DiagramSource::Backend {
                    api_key: api_key.unwrap_or_default(),
                    use_icons,
                }
            } else {
                DiagramSource::Model
            };
            let req = GenerationRequest::diagram(topic, Some(diagram))
                .image_format(format.into())
                .diagram_source(source);
            let store = open_state(cli.state, &config)?;
            let generator = build_generator(&config, &store).await?;
            generate(&generator, req, out).await?;
        }
        Commands::Document {
            topic,
            format,
            style,
            length,
            plan_source,
            out,
        } => {
            let mut req = GenerationRequest::document(topic)
                .format(format.into())
                .length_level(length)
                .plan_source(plan_source.into());
            if let Some(style) = style {
                req = req.style(style);
            }
            let store = open_state(cli.state, &config)?;
            let generator = build_generator(&config, &store).await?;
            generate(&generator, req, out).await?;
        }
        Commands::Presentation {
            topic,
            style,
            length,
            plan_source,
            out,
        } => {
            let mut req = GenerationRequest::presentation(topic)
                .length_level(length)
                .plan_source(plan_source.into());
            if let Some(style) = style {
                req = req.style(style);
            }
            let store = open_state(cli.state, &config)?;
            let generator = build_generator(&config, &store).await?;
            generate(&generator, req, out).await?;
        }
        Commands::Health => {
            let store = open_state(cli.state, &config)?;
            let backend = build_backend(&config, &store).await?;
            let health = backend.health().await?;
            println!(
                "backend {} reachable; admin: {}",
                backend.base_url(),
                if health.is_admin { "yes" } else { "no" }
            );
        }
        Commands::Theme { command } => {
            let store = open_state(cli.state, &config)?;
            let theme = match command.unwrap_or(ThemeCommands::Get) {
                ThemeCommands::Get => state::load_theme(&store).await?,
                ThemeCommands::Set { theme } => {
                    let theme = Theme::from(theme);
                    state::save_theme(&store, theme).await?;
                    theme
                }
                ThemeCommands::Toggle => state::toggle_theme(&store).await?,
            };
            println!("{}", theme.as_str());
        }
        Commands::Token { command } => {
            let store = open_state(cli.state, &config)?;
            match command {
                TokenCommands::Set { token } => {
                    state::save_admin_token(&store, &token).await?;
                    println!("admin token saved");
                }
                TokenCommands::Clear => {
                    let removed = state::clear_admin_token(&store).await?;
                    println!("{}", if removed { "admin token cleared" } else { "no admin token stored" });
                }
                TokenCommands::Show => match state::load_admin_token(&store).await? {
                    Some(token) => println!("{}", state::mask_token(&token)),
                    None => println!("no admin token stored"),
                },
            }
        }
    }

    Ok(())
}
