//! CLI binary for chunked-pdf2md.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! wires Ctrl-C to the batch's cancellation flag and prints the run report.

use anyhow::{Context, Result};
use clap::Parser;
use chunked_pdf2md::{
    convert_to_file, default_output_path, inspect, BatchConfig, BatchError,
    BatchProgressCallback, BatchReport, BatchStats, CancellationFlag, ChunkStatus, ContentMode,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live chunk counter plus one log line per chunk event. Chunks complete out
/// of order, so per-chunk start times are tracked by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    failed_pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Extracting pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            failed_pages: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_chunks: usize, pending: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} chunks  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_chunks as u64);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            bold("◆"),
            bold(&format!("{total_chunks} chunks, {pending} to convert"))
        ));
    }

    fn on_chunk_resumed(&self, _index: usize, _total_chunks: usize) {
        self.bar.inc(1);
    }

    fn on_chunk_start(&self, index: usize, _total: usize, first_page: usize, last_page: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(format!("pages {first_page}-{last_page}"));
    }

    fn on_chunk_subdivided(&self, index: usize, pages: usize, sub_unit_pages: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}  {}",
            yellow("↯"),
            index + 1,
            dim(&format!("{pages} pages failed as one request; splitting into {sub_unit_pages}-page units")),
        ));
    }

    fn on_page_failed(&self, _index: usize, page: usize, error: &str) {
        self.failed_pages.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} Page {:>4}  {}", red("✗"), page, red(&truncate(error, 80))));
    }

    fn on_chunk_complete(&self, index: usize, total: usize, markdown_len: usize, subdivided: bool) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<8}  {}",
            if subdivided { yellow("✓") } else { green("✓") },
            index + 1,
            total,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_batch_complete(&self, completed_chunks: usize, total_chunks: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed_pages.load(Ordering::SeqCst);
        if completed_chunks < total_chunks {
            eprintln!(
                "{} {completed_chunks}/{total_chunks} chunks completed before the run stopped",
                red("✘")
            );
        } else if failed == 0 {
            eprintln!("{} {completed_chunks}/{total_chunks} chunks converted", green("✔"));
        } else {
            eprintln!(
                "{} {completed_chunks}/{total_chunks} chunks converted  ({} pages replaced by placeholders)",
                yellow("⚠"),
                red(&failed.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert into ./output/manual.md (25 pages per request, 4 workers)
  chunked-pdf2md manual.pdf

  # Smaller chunks, more workers, custom output location
  chunked-pdf2md manual.pdf --chunk-size 10 --workers 8 --output-dir docs -o manual.md

  # Only the first 50 pages
  chunked-pdf2md https://example.com/spec.pdf --max-pages 50

  # Scanned document: send rendered page images to a vision model
  chunked-pdf2md scan.pdf --mode image --model gpt-4.1 --request-delay-ms 500

  # Inspect page count and metadata (no API key needed)
  chunked-pdf2md --inspect-only manual.pdf

RESUMING:
  Every converted chunk is saved to <output-dir>/.<output-name>.checkpoint.json.
  If a run is interrupted (Ctrl-C, network loss, a chunk that cannot be
  converted), rerun the same command: finished chunks are not sent again.
  The checkpoint is deleted once the Markdown file is written.
  --no-resume discards it and starts over.

FAILURE HANDLING:
  Timeouts, connection errors, HTTP 429 and 5xx are retried with exponential
  backoff. A chunk that still fails is split into halves (never smaller than
  --min-subdivision pages), then into single pages. A page that fails on its
  own becomes <!-- Failed to process page N --> in the output.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override log filter (e.g. chunked_pdf2md=debug)
"#;

/// Convert long PDF documents to Markdown in resumable chunks.
#[derive(Parser, Debug)]
#[command(
    name = "chunked-pdf2md",
    version,
    about = "Convert long PDF documents to Markdown in resumable, fault-tolerant chunks",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Output file name, relative to --output-dir. Default: <input stem>.md
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for the Markdown output and the checkpoint file.
    #[arg(long, env = "PDF2MD_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Only convert the first N pages.
    #[arg(long, env = "PDF2MD_MAX_PAGES",
          value_parser = clap::value_parser!(u64).range(1..))]
    max_pages: Option<u64>,

    /// Pages per chunk (one remote request per chunk).
    #[arg(long, env = "PDF2MD_CHUNK_SIZE", default_value_t = 25,
          value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Chunks converted concurrently.
    #[arg(short, long, env = "PDF2MD_WORKERS", default_value_t = 4,
          value_parser = clap::value_parser!(u64).range(1..))]
    workers: u64,

    /// Page content sent to the model.
    #[arg(long, env = "PDF2MD_MODE", value_enum, default_value = "text")]
    mode: ModeArg,

    /// Failing chunks of at most this many pages are not subdivided.
    #[arg(long, env = "PDF2MD_MIN_SUBDIVISION", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    min_subdivision: u64,

    /// Retries of a whole chunk after a transient failure.
    #[arg(long, env = "PDF2MD_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[arg(long, env = "PDF2MD_RETRY_BACKOFF_MS", default_value_t = 5000)]
    retry_backoff_ms: u64,

    /// Minimum gap between two remote requests, across all workers.
    #[arg(long, env = "PDF2MD_REQUEST_DELAY_MS", default_value_t = 0)]
    request_delay_ms: u64,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens per request.
    #[arg(long, env = "PDF2MD_MAX_TOKENS", default_value_t = 50_000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Timeout in seconds for a request covering several pages.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Timeout in seconds for a single-page request.
    #[arg(long, env = "PDF2MD_PAGE_API_TIMEOUT", default_value_t = 60)]
    page_api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Rendering DPI in image mode (72–400).
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Discard any existing checkpoint and convert every chunk.
    #[arg(long, env = "PDF2MD_NO_RESUME")]
    no_resume: bool,

    /// Print statistics and the chunk report as JSON on stdout.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Text,
    Image,
}

impl From<ModeArg> for ContentMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Text => ContentMode::Text,
            ModeArg::Image => ContentMode::Image,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-chunk feedback; INFO logs would only
    // tear it apart.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let mut builder = BatchConfig::builder().download_timeout_secs(cli.download_timeout);
        if let Some(ref p) = cli.password {
            builder = builder.password(p.clone());
        }
        let config = builder.build().context("Invalid configuration")?;
        let meta = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            println!(
                "Chunks:       {} of {} pages",
                meta.page_count.div_ceil(cli.chunk_size as usize),
                cli.chunk_size
            );
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let cancellation = CancellationFlag::new();
    spawn_interrupt_handler(cancellation.clone(), cli.quiet);

    let config = build_config(&cli, progress_cb, cancellation).await?;
    let output_path = match cli.output {
        Some(ref name) => config.output_dir.join(name),
        None => default_output_path(&cli.input, &config),
    };

    // ── Run conversion ───────────────────────────────────────────────────
    match convert_to_file(&cli.input, &output_path, &config).await {
        Ok(stats) => {
            if cli.json {
                let json = serde_json::to_string_pretty(&serde_json::json!({
                    "status": "assembled",
                    "output": output_path,
                    "stats": stats,
                }))
                .context("Failed to serialise stats")?;
                println!("{json}");
            } else if !cli.quiet {
                print_summary(&stats, &output_path);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(report) = partial_report(&e) {
                if cli.json {
                    let json = serde_json::to_string_pretty(&serde_json::json!({
                        "status": "aborted",
                        "error": e.to_string(),
                        "report": report,
                    }))
                    .context("Failed to serialise report")?;
                    println!("{json}");
                } else {
                    print_report(report);
                }
            }
            Err(e).context("Conversion failed")
        }
    }
}

/// First Ctrl-C stops dispatching and lets in-flight chunks land in the
/// checkpoint; a second one exits immediately.
fn spawn_interrupt_handler(flag: CancellationFlag, quiet: bool) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        flag.cancel();
        if !quiet {
            eprintln!(
                "\n{} Interrupted: finishing in-flight chunks so they are checkpointed. \
                 Press Ctrl-C again to exit now.",
                yellow("⚠")
            );
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(1);
        }
    });
}

/// Map CLI args to `BatchConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    cancellation: CancellationFlag,
) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .chunk_size(cli.chunk_size as usize)
        .workers(cli.workers as usize)
        .mode(cli.mode.into())
        .min_subdivision_pages(cli.min_subdivision as usize)
        .max_attempts(cli.max_retries.saturating_add(1))
        .initial_backoff_ms(cli.retry_backoff_ms)
        .request_delay_ms(cli.request_delay_ms)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .page_api_timeout_secs(cli.page_api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .dpi(cli.dpi)
        .output_dir(cli.output_dir.clone())
        .resume(!cli.no_resume)
        .cancellation(cancellation);

    if let Some(n) = cli.max_pages {
        builder = builder.max_pages(n as usize);
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(ref p) = cli.password {
        builder = builder.password(p.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn partial_report(err: &BatchError) -> Option<&BatchReport> {
    match err {
        BatchError::BatchAborted { report, .. } | BatchError::Cancelled { report, .. } => {
            Some(&**report)
        }
        _ => None,
    }
}

fn print_summary(stats: &BatchStats, output_path: &Path) {
    eprintln!(
        "{}  {} pages in {} chunks  ({} resumed, {} converted, {} subdivided)  {}ms  →  {}",
        if stats.failed_pages == 0 {
            green("✔")
        } else {
            yellow("⚠")
        },
        stats.total_pages,
        stats.num_chunks,
        stats.resumed_chunks,
        stats.converted_chunks,
        stats.subdivided_chunks,
        stats.total_duration_ms,
        bold(&output_path.display().to_string()),
    );
    if stats.failed_pages > 0 {
        eprintln!(
            "   {} pages could not be converted; search the output for \"Failed to process page\"",
            red(&stats.failed_pages.to_string())
        );
    }
}

/// Itemised per-chunk report for a run that did not assemble.
fn print_report(report: &BatchReport) {
    eprintln!("\n{}", bold("Chunk report:"));
    for chunk in &report.chunks {
        let pages = dim(&format!("pages {:>4}-{:<4}", chunk.first_page, chunk.last_page));
        let line = match &chunk.status {
            ChunkStatus::Resumed => format!("{} resumed", green("↺")),
            ChunkStatus::Converted => format!("{} converted", green("✓")),
            ChunkStatus::Subdivided {
                sub_units,
                failed_pages,
            } if failed_pages.is_empty() => {
                format!("{} converted in {sub_units} parts", yellow("✓"))
            }
            ChunkStatus::Subdivided {
                sub_units,
                failed_pages,
            } => {
                let pages: Vec<String> = failed_pages.iter().map(|f| f.page.to_string()).collect();
                format!(
                    "{} converted in {sub_units} parts, failed pages: {}",
                    yellow("✓"),
                    pages.join(", ")
                )
            }
            ChunkStatus::Failed { error } => {
                format!("{} failed: {}", red("✗"), truncate(&error.to_string(), 100))
            }
            ChunkStatus::NotDispatched => format!("{} not dispatched", dim("·")),
        };
        eprintln!("  Chunk {:>3}  {}  {}", chunk.index + 1, pages, line);
    }
    eprintln!(
        "{} of {} chunks are checkpointed. Rerun the same command to resume.",
        report.completed_count(),
        report.chunks.len()
    );
}
