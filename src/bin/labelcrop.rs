//! CLI binary for labelcrop.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` / `ConversionParams` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use labelcrop::{
    download_name, ConversionParams, Converter, RetentionMode, ServiceConfig, StatusReport,
    Upload,
};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Crop a shipping label onto a 4x6in page (writes label_print.pdf)
  labelcrop convert label.pdf

  # Custom margin and output path
  labelcrop convert label.pdf --margin-mm -10 -o out/label.pdf

  # 100mm x 150mm stock at 72pt/in
  labelcrop convert label.pdf --width-inches 3.937 --height-inches 5.906

  # What is on disk right now?
  labelcrop status --json

  # Reclaim expired artifacts once, or keep sweeping until Ctrl-C
  labelcrop sweep
  labelcrop janitor --sweep-interval-secs 600

GEOMETRY:
  The clip starts at  page_width / 2 - margin_mm * 2.83465  and runs to the
  right edge over the full page height. A negative margin widens the clip.
  The clipped region is scaled to fill the whole canvas.

ENVIRONMENT VARIABLES:
  LABELCROP_BASE_DIR             Artifact root (default: ./storage)
  LABELCROP_RETENTION_SECS       Max artifact age before reclaim (default: 86400)
  LABELCROP_SWEEP_INTERVAL_SECS  Janitor interval (default: 3600)
  LABELCROP_RETENTION_MODE       eager | janitor (default: eager)
  RUST_LOG                       Overrides -v / -q log filtering
"#;

#[derive(Parser, Debug)]
#[command(
    name = "labelcrop",
    version,
    about = "Crop PDF pages onto fixed-size label canvases",
    long_about = "Clip every page of a PDF from a margin off its centre line to its right edge \
and scale the result onto a fixed label canvas (4in x 6in by default). Output stays vector.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the uploads/, outputs/ and scratch/ areas.
    #[arg(long, global = true, env = "LABELCROP_BASE_DIR", default_value = "storage")]
    base_dir: PathBuf,

    /// Maximum artifact age, in seconds, before the janitor reclaims it.
    #[arg(long, global = true, env = "LABELCROP_RETENTION_SECS", default_value_t = 86_400)]
    retention_secs: u64,

    /// Seconds between janitor sweeps.
    #[arg(long, global = true, env = "LABELCROP_SWEEP_INTERVAL_SECS", default_value_t = 3_600)]
    sweep_interval_secs: u64,

    /// Who deletes outputs once served.
    #[arg(long, global = true, env = "LABELCROP_RETENTION_MODE", value_enum, default_value = "eager")]
    retention_mode: RetentionModeArg,

    /// Debug-level logging.
    #[arg(short, long, global = true, env = "LABELCROP_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "LABELCROP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one PDF.
    Convert(ConvertArgs),
    /// Show artifact counts per area.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run one janitor sweep and exit.
    Sweep {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the janitor loop until Ctrl-C.
    Janitor,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input PDF.
    input: PathBuf,

    /// Output path. Default: `{input stem}_print.pdf` next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Signed margin in millimetres; negative widens the clip.
    #[arg(long, default_value_t = -24.0, allow_negative_numbers = true)]
    margin_mm: f64,

    #[arg(long, default_value_t = 4.0)]
    width_inches: f64,

    #[arg(long, default_value_t = 6.0)]
    height_inches: f64,

    #[arg(long, default_value_t = 72)]
    points_per_inch: u32,

    /// Print a JSON summary instead of the human one.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RetentionModeArg {
    Eager,
    Janitor,
}

impl From<RetentionModeArg> for RetentionMode {
    fn from(v: RetentionModeArg) -> Self {
        match v {
            RetentionModeArg::Eager => RetentionMode::Eager,
            RetentionModeArg::Janitor => RetentionMode::Janitor,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    // ── Build config ─────────────────────────────────────────────────────
    let config = ServiceConfig::builder()
        .base_dir(&cli.base_dir)
        .retention_window(Duration::from_secs(cli.retention_secs))
        .sweep_interval(Duration::from_secs(cli.sweep_interval_secs))
        .retention_mode(cli.retention_mode.into())
        .build()
        .context("Invalid configuration")?;
    let converter = Converter::start(config).context("Failed to open artifact store")?;

    match cli.command {
        Command::Convert(args) => run_convert(&converter, args, cli.quiet).await,
        Command::Status { json } => {
            let report = converter.status().await.context("Failed to read status")?;
            print_status(&report, json)
        }
        Command::Sweep { json } => {
            let report = converter.janitor().sweep_once().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !cli.quiet {
                eprintln!(
                    "{} swept {} artifacts: {} removed, {} retained, {} failed",
                    green("✔"),
                    report.scanned,
                    bold(&report.removed.to_string()),
                    report.retained,
                    report.failed
                );
            }
            Ok(())
        }
        Command::Janitor => {
            let handle = converter.janitor().spawn();
            if !cli.quiet {
                eprintln!("{} janitor running, Ctrl-C to stop", cyan("◆"));
            }
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            handle.shutdown().await;
            Ok(())
        }
    }
}

async fn run_convert(converter: &Converter, args: ConvertArgs, quiet: bool) -> Result<()> {
    let start = Instant::now();
    let params = ConversionParams::builder()
        .margin_mm(args.margin_mm)
        .width_inches(args.width_inches)
        .height_inches(args.height_inches)
        .points_per_inch(args.points_per_inch)
        .build()
        .context("Invalid conversion parameters")?;

    let upload = Upload::from_path(&args.input)
        .await
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let document = converter
        .convert(upload, &params)
        .await
        .context("Conversion failed")?;

    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.input, &document.filename));
    let job_id = document.job_id;
    let page_count = document.page_count;
    let written = document
        .save_to(&output_path)
        .await
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if args.json {
        let summary = serde_json::json!({
            "job_id": job_id,
            "output": output_path,
            "pages": page_count,
            "bytes": written,
            "duration_ms": elapsed_ms,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        eprintln!(
            "{}  {} pages  {}  {}ms  →  {}",
            green("✔"),
            page_count,
            dim(&format!("{written} bytes")),
            elapsed_ms,
            bold(&output_path.display().to_string()),
        );
    }
    Ok(())
}

/// Next to the input, named after it.
fn default_output_path(input: &Path, served_name: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| download_name(&n.to_string_lossy()))
        .unwrap_or_else(|| served_name.to_string());
    input.with_file_name(name)
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialise status")?
        );
        return Ok(());
    }
    println!("Generated:  {}", report.generated_at.to_rfc3339());
    for (name, counts) in [
        ("Inbound", report.inbound),
        ("Outbound", report.outbound),
        ("Scratch", report.scratch),
    ] {
        println!(
            "{:<10}  {:>5} artifacts  {}",
            format!("{name}:"),
            counts.artifacts,
            dim(&format!("{} bytes", counts.bytes))
        );
    }
    println!("Jobs:       {:>5}", report.jobs);
    Ok(())
}
