//! Command-line interface: composition root for the pipeline and the
//! diagnostic suite. All long-lived objects are constructed here and passed
//! down explicitly.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use inkstream_diag::config::{DiagConfig, RunnerPacing};
use inkstream_diag::runner::{Pipeline, SuiteReport, SuiteRunner, chunk_chars};
use inkstream_render::parser::ChunkParser;

#[derive(Debug, Parser)]
#[command(
    name = "inkstream",
    about = "Streaming markdown renderer and pipeline diagnostics",
    version
)]
struct Cli {
    /// Diagnostics config file (TOML); defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream a markdown file (or stdin) through the pipeline and print the
    /// serialized output tree.
    Render {
        /// Input file; stdin when omitted.
        path: Option<PathBuf>,

        /// Characters per chunk.
        #[arg(long, default_value_t = 3)]
        chunk_size: usize,

        /// Delay between chunks in milliseconds. Zero also disables the
        /// typing effect.
        #[arg(long, default_value_t = 10)]
        delay_ms: u64,
    },
    /// Run the systematic diagnostic suite and print the aggregate report.
    Diagnose {
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,

        /// Drop all pacing delays for a quick run.
        #[arg(long)]
        fast: bool,
    },
}

pub fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = DiagConfig::load_or_default(cli.config.as_deref())?;
    tracing::debug!(from_file = cli.config.is_some(), "diagnostics config resolved");
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        match cli.command {
            Command::Render {
                path,
                chunk_size,
                delay_ms,
            } => render(path, chunk_size, delay_ms).await,
            Command::Diagnose { json, fast } => diagnose(config, json, fast).await,
        }
    })
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn render(path: Option<PathBuf>, chunk_size: usize, delay_ms: u64) -> Result<()> {
    let input = match &path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    let mut pipeline = if delay_ms == 0 {
        Pipeline::with_line_parser_instant()
    } else {
        Pipeline::with_line_parser()
    };
    for chunk in chunk_chars(&input, chunk_size) {
        let instructions = pipeline.parser.process_chunk(chunk);
        if !instructions.is_empty() {
            pipeline.renderer.render(instructions).await?;
        }
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
    let tail = pipeline.parser.finalize();
    pipeline.renderer.render(tail).await?;
    pipeline.renderer.flush().await;

    print!("{}", pipeline.renderer.serialize().await);
    pipeline.renderer.dispose();
    Ok(())
}

async fn diagnose(mut config: DiagConfig, json: bool, fast: bool) -> Result<()> {
    if fast {
        config.pacing = RunnerPacing::instant();
    }
    let mut pipeline = if fast {
        Pipeline::with_line_parser_instant()
    } else {
        Pipeline::with_line_parser()
    };
    let mut runner = SuiteRunner::new(&config);
    let report = runner.run_all(&mut pipeline).await?;
    pipeline.renderer.dispose();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SuiteReport) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["category", "case", "result", "ms", "output chars"]);
    for case in &report.cases {
        let result = if case.passed {
            "pass".to_string()
        } else {
            match &case.failure {
                Some(failure) => format!("FAIL ({} / {})", failure.failure_type, failure.pattern),
                None => "FAIL".to_string(),
            }
        };
        table.add_row(vec![
            case.category.to_string(),
            case.name.to_string(),
            result,
            case.duration_ms.to_string(),
            case.output_chars.to_string(),
        ]);
    }
    println!("{table}");

    println!(
        "\n{}/{} passed, failure rate {:.1}%",
        report.passed, report.total, report.failure_rate
    );
    if let Some(perf) = &report.perf {
        println!(
            "case duration over successes: avg {:.1} ms, min {} ms, max {} ms",
            perf.avg_ms, perf.min_ms, perf.max_ms
        );
    }

    if !report.pattern_stats.is_empty() {
        let mut patterns = Table::new();
        patterns.set_content_arrangement(ContentArrangement::Dynamic);
        patterns.set_header(vec!["pattern", "frequency", "%", "stages", "failure types"]);
        for stats in &report.pattern_stats {
            patterns.add_row(vec![
                stats.pattern.to_string(),
                stats.frequency.to_string(),
                format!("{:.1}", stats.percentage),
                stats
                    .stages
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                stats
                    .failure_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            ]);
        }
        println!("\n{patterns}");
    }

    for recommendation in &report.recommendations {
        println!(
            "[{}] {}: {}",
            format!("{:?}", recommendation.priority).to_lowercase(),
            recommendation.pattern,
            recommendation.suggestion
        );
    }
}
