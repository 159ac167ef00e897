//! CLI binary for paper2epub.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig` / `TreatmentConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use paper2epub::convert::write_atomic;
use paper2epub::service::resolve_service;
use paper2epub::{
    clean_markdown, convert_to_epub, convert_to_markdown, generate_epub, treat_markdown,
    Capabilities, ConversionConfig, ConversionOutput, ConversionProgressCallback,
    ProgressCallback, Stage, TreatmentConfig, TreatmentEngine, TreatmentRequest,
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current stage, with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("paper2epub");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, output_len: usize) {
        let detail = match stage {
            Stage::Resolve => String::new(),
            Stage::Render => dim(&format!("{output_len} bytes")),
            _ => dim(&format!("{output_len} chars")),
        };
        self.bar.println(format!("  {} {:<20} {}", green("✓"), stage.to_string(), detail));
    }

    fn on_treatment_fallback(&self, reason: &str) {
        self.bar.println(format!(
            "  {} AI treatment rejected, used rules: {}",
            yellow("⚠"),
            dim(reason)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF to EPUB, rule-based treatment only
  paper2epub convert paper.pdf -o paper.epub --treat --rules-only

  # PDF to markdown with AI treatment (provider from environment)
  paper2epub convert https://arxiv.org/pdf/1706.03762 -o attention.md --treat

  # Clean raw extractor output
  paper2epub clean raw.md --filename paper.pdf > clean.md

  # Treat existing markdown with Gemini
  GEMINI_API_KEY=... paper2epub treat clean.md --model gemini-2.5-pro

  # Render markdown to EPUB
  paper2epub epub clean.md -o paper.epub --title "Attention Is All You Need"

  # Check which collaborators and providers are available
  paper2epub doctor

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key (direct generateContent backend)
  EDGEQUAKE_LLM_PROVIDER  Provider name (openai, anthropic, ollama, ...)
  EDGEQUAKE_MODEL         Model ID for EDGEQUAKE_LLM_PROVIDER
  PAPER2EPUB_MARKER       Path to the marker_single executable
  PAPER2EPUB_PANDOC       Path to the pandoc executable
"#;

/// Turn academic PDFs into clean EPUBs.
#[derive(Parser, Debug)]
#[command(
    name = "paper2epub",
    version,
    about = "Turn academic PDFs into clean, readable EPUBs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPER2EPUB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPER2EPUB_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a PDF (path or URL) to markdown, or to EPUB when -o ends in .epub.
    Convert(ConvertArgs),
    /// Clean raw extractor markdown.
    Clean(CleanArgs),
    /// Treat markdown (AI with rule-based fallback).
    Treat(TreatArgs),
    /// Render markdown to EPUB.
    Epub(EpubArgs),
    /// Report available collaborators and text services.
    Doctor(TreatmentArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Output file (.md or .epub). Markdown goes to stdout when omitted.
    #[arg(short, long, env = "PAPER2EPUB_OUTPUT")]
    output: Option<PathBuf>,

    /// Run treatment after cleaning.
    #[arg(long, env = "PAPER2EPUB_TREAT")]
    treat: bool,

    #[command(flatten)]
    book: BookArgs,

    /// Directory where extracted images are staged.
    #[arg(long, env = "PAPER2EPUB_IMAGE_DIR")]
    image_dir: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAPER2EPUB_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output structured JSON (ConversionOutput) instead of markdown.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PAPER2EPUB_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    treatment: TreatmentArgs,
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Raw markdown file, or '-' for stdin.
    input: PathBuf,

    /// Name of the source PDF (used to spot filename titles).
    #[arg(long, default_value = "document.pdf")]
    filename: String,

    /// Image URLs bound to placeholders in order (repeatable).
    #[arg(long = "image-url")]
    image_urls: Vec<String>,
}

#[derive(Args, Debug)]
struct TreatArgs {
    /// Markdown file, or '-' for stdin.
    input: PathBuf,

    /// Output file. Stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output the TreatmentResult as JSON.
    #[arg(long)]
    json: bool,

    /// Treatment instruction. Default: the built-in correction rules.
    #[arg(long, env = "PAPER2EPUB_INSTRUCTION")]
    instruction: Option<String>,

    #[command(flatten)]
    treatment: TreatmentArgs,
}

#[derive(Args, Debug)]
struct EpubArgs {
    /// Markdown file, or '-' for stdin.
    input: PathBuf,

    /// EPUB output path.
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    book: BookArgs,
}

#[derive(Args, Debug)]
struct BookArgs {
    /// Book title. Default: the document's first heading.
    #[arg(long)]
    title: Option<String>,

    /// Book author.
    #[arg(long, env = "PAPER2EPUB_AUTHOR", default_value = "Academic Paper")]
    author: String,

    /// Treatment instruction. Default: the built-in correction rules.
    #[arg(long, env = "PAPER2EPUB_INSTRUCTION")]
    instruction: Option<String>,
}

#[derive(Args, Debug)]
struct TreatmentArgs {
    /// LLM provider: openai, anthropic, ollama, ...
    #[arg(long, env = "PAPER2EPUB_PROVIDER")]
    provider: Option<String>,

    /// Model ID (e.g. gpt-4.1-mini, gemini-2.5-pro).
    #[arg(long, env = "PAPER2EPUB_MODEL")]
    model: Option<String>,

    /// Never call a text service; rule-based treatment only.
    #[arg(long)]
    rules_only: bool,

    /// Remote call timeout in seconds.
    #[arg(long, env = "PAPER2EPUB_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Minimum retention ratio for AI output (0–1].
    #[arg(long, default_value_t = 0.8)]
    min_retention: f64,

    /// Literal marker that must survive treatment when present (repeatable).
    #[arg(long = "require-marker")]
    required_markers: Vec<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PAPER2EPUB_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max completion tokens.
    #[arg(long, default_value_t = 32768)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The convert spinner gives all the feedback a user needs; library INFO
    // logs would tear through it.
    let spinner = matches!(&cli.command, Command::Convert(a) if !a.no_progress && !a.json);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert(args) => run_convert(args, cli.quiet, spinner && !cli.quiet).await,
        Command::Clean(args) => run_clean(args).await,
        Command::Treat(args) => run_treat(args, cli.quiet).await,
        Command::Epub(args) => run_epub(args, cli.quiet).await,
        Command::Doctor(args) => run_doctor(args).await,
    }
}

async fn run_convert(args: ConvertArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_conversion_config(
        &args,
        progress.clone().map(|p| p as ProgressCallback),
    )
    .await?;

    let to_epub = args
        .output
        .as_deref()
        .and_then(Path::extension)
        .is_some_and(|e| e.eq_ignore_ascii_case("epub"));

    let result = match (&args.output, to_epub) {
        (Some(path), true) => convert_to_epub(&args.input, path, &config).await,
        _ => convert_to_markdown(&args.input, &config).await,
    };
    if let Some(p) = &progress {
        p.finish();
    }
    let output = result.context("Conversion failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if let (Some(path), false) = (&args.output, to_epub) {
        write_atomic(path, output.markdown.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else if args.output.is_none() {
        print_stdout(&output.markdown)?;
    }

    if !quiet {
        print_summary(&output, args.output.as_deref());
    }
    Ok(())
}

async fn run_clean(args: CleanArgs) -> Result<()> {
    let raw = read_input(&args.input).await?;
    let document = clean_markdown(&raw, &args.filename, &args.image_urls);
    print_stdout(&document.to_markdown())
}

async fn run_treat(args: TreatArgs, quiet: bool) -> Result<()> {
    let markdown = read_input(&args.input).await?;
    let config = build_treatment_config(&args.treatment).await?;
    let request = TreatmentRequest::new(markdown, args.instruction.clone().unwrap_or_default());
    let result = treat_markdown(&request, &config).await;

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
        return Ok(());
    }

    match &args.output {
        Some(path) => write_atomic(path, result.markdown.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print_stdout(&result.markdown)?,
    }

    if !quiet {
        match (&result.engine, &result.fallback_reason) {
            (TreatmentEngine::Ai, _) => eprintln!(
                "{} AI treatment accepted (retention {:.2})",
                green("✔"),
                result.retention_ratio
            ),
            (TreatmentEngine::RuleBased, Some(reason)) => {
                eprintln!("{} Rule-based treatment: {}", yellow("⚠"), reason)
            }
            (TreatmentEngine::RuleBased, None) => eprintln!("{} Rule-based treatment", green("✔")),
        }
    }
    Ok(())
}

async fn run_epub(args: EpubArgs, quiet: bool) -> Result<()> {
    let markdown = read_input(&args.input).await?;
    let config = ConversionConfig::builder()
        .capabilities(Capabilities::detect())
        .author(&args.book.author)
        .build()
        .context("Invalid configuration")?;
    let title = args.book.title.clone().unwrap_or_default();

    let bytes = generate_epub(&markdown, &title, &config)
        .await
        .context("EPUB generation failed")?;
    write_atomic(&args.output, &bytes)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    if !quiet {
        eprintln!(
            "{}  {} bytes  →  {}",
            green("✔"),
            bytes.len(),
            bold(&args.output.display().to_string())
        );
    }
    Ok(())
}

async fn run_doctor(args: TreatmentArgs) -> Result<()> {
    let caps = Capabilities::detect();
    let show = |name: &str, found: Option<&Path>| match found {
        Some(p) => println!("{} {:<14} {}", green("✓"), name, dim(&p.display().to_string())),
        None => println!("{} {:<14} {}", red("✗"), name, dim("not found")),
    };
    show("marker_single", caps.extractor.as_deref());
    show("pandoc", caps.renderer.as_deref());

    let config = build_treatment_config(&args).await?;
    match resolve_service(&config) {
        Ok(Some(service)) => println!("{} {:<14} {}", green("✓"), "text service", service.name()),
        Ok(None) => println!(
            "{} {:<14} {}",
            yellow("–"),
            "text service",
            dim("none configured; treatment is rule-based")
        ),
        Err(e) => println!("{} {:<14} {}", red("✗"), "text service", e),
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn build_treatment_config(args: &TreatmentArgs) -> Result<TreatmentConfig> {
    let mut builder = TreatmentConfig::builder()
        .api_timeout_secs(args.api_timeout)
        .min_retention(args.min_retention)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .rules_only(args.rules_only);

    for marker in &args.required_markers {
        builder = builder.required_marker(marker);
    }
    if let Some(ref name) = args.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid treatment configuration")
}

async fn build_conversion_config(
    args: &ConvertArgs,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let treatment = build_treatment_config(&args.treatment).await?;
    let mut builder = ConversionConfig::builder()
        .capabilities(Capabilities::detect())
        .treatment(treatment)
        .treat(args.treat)
        .author(&args.book.author)
        .download_timeout_secs(args.download_timeout);

    if let Some(ref title) = args.book.title {
        builder = builder.title(title);
    }
    if let Some(ref instruction) = args.book.instruction {
        builder = builder.instruction(instruction);
    }
    if let Some(ref dir) = args.image_dir {
        builder = builder.image_root(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut s = String::new();
        io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read stdin")?;
        return Ok(s);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_stdout(markdown: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(markdown.as_bytes())
        .context("Failed to write to stdout")?;
    if !markdown.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

fn print_summary(output: &ConversionOutput, path: Option<&Path>) {
    let stats = &output.stats;
    let target = path
        .map(|p| bold(&p.display().to_string()))
        .unwrap_or_else(|| "stdout".to_string());
    eprintln!(
        "{}  '{}'  {} chars  {}ms  →  {}",
        green("✔"),
        output.title,
        stats.final_chars,
        stats.total_duration_ms,
        target
    );
    if stats.images_found > 0 {
        eprintln!(
            "   {} images ({} unresolved)",
            dim(&stats.images_found.to_string()),
            dim(&stats.images_unresolved.to_string())
        );
    }
    if let Some(ref reason) = stats.fallback_reason {
        eprintln!("   {} {}", yellow("rule-based fallback:"), dim(reason));
    }
}
