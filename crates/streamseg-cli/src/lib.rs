use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use streamseg_config::Config;
use streamseg_core::{ContentSegment, ReconcileSettings};
use tokio::io::AsyncReadExt;
use tracing::info;

pub mod replay;

use replay::{replay, ReplayOptions, ReplayReport};

#[derive(Parser)]
#[command(name = "streamseg")]
#[command(about = "Replay LLM output through the tool-call segment reconciler")]
#[command(version)]
pub struct Cli {
    /// File holding the assistant message (reads stdin when omitted)
    pub input: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Bytes per streamed delta
    #[arg(long, default_value = "16")]
    pub chunk_size: usize,

    /// Pause between deltas, in milliseconds
    #[arg(long, default_value = "20")]
    pub delay_ms: u64,

    /// Override the settle window, in milliseconds
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Approve tool calls as soon as they are complete
    #[arg(long)]
    pub auto_approve: bool,

    /// Approve every pending tool call once the message is stable
    #[arg(long)]
    pub approve_all: bool,

    /// Print the final message view as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = Config::load_with_overrides(
        cli.config.as_deref(),
        cli.auto_approve.then_some(true),
        cli.settle_ms,
    )?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let content = read_input(cli.input.as_ref()).await?;
    let options = ReplayOptions {
        chunk_size: cli.chunk_size,
        delay: Duration::from_millis(cli.delay_ms),
        approve_all: cli.approve_all,
    };

    let report = replay(&content, ReconcileSettings::from(&config), &options).await?;
    info!(
        "Replay finished with {} tool calls",
        report.view.tool_calls.len()
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("streamseg_cli={}", level).parse()?)
        .add_directive(format!("streamseg_core={}", level).parse()?)
        .add_directive(format!("streamseg_config={}", level).parse()?);

    // Logs go to stderr so --json output stays machine readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

async fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut content = String::new();
            tokio::io::stdin()
                .read_to_string(&mut content)
                .await
                .context("Failed to read stdin")?;
            Ok(content)
        }
    }
}

fn print_summary(report: &ReplayReport) {
    println!("Transitions:");
    for timed in &report.transitions {
        let t = &timed.transition;
        println!(
            "  [{:>6} ms] {} -> {} ({:?})",
            timed.at_ms, t.from, t.to, t.reason
        );
    }

    println!("Segments:");
    for segment in &report.view.segments {
        match segment {
            ContentSegment::Text { content, order } => {
                println!("  {:>3} text  {:?}", order, content);
            }
            ContentSegment::Tool {
                tool_call_id,
                order,
            } => {
                let call = report
                    .view
                    .tool_calls
                    .iter()
                    .find(|c| &c.id == tool_call_id);
                match call {
                    Some(call) => println!(
                        "  {:>3} tool  {} {} [{}]",
                        order, call.tool, call.id, call.status
                    ),
                    None => println!("  {:>3} tool  {}", order, tool_call_id),
                }
            }
        }
    }

    if let Some(partial) = &report.view.in_progress {
        println!(
            "Unfinished tool call at byte {}: {}",
            partial.object_offset,
            partial.tool.as_deref().unwrap_or("<unknown>")
        );
    }

    if !report.approved.is_empty() {
        println!("Approved: {}", report.approved.join(", "));
    }

    println!("Clean content:");
    println!("{}", report.view.clean_content);
}
