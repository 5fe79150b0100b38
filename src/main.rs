use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use mediacull::core::image::{media_type_for_path, MediaItem};
use mediacull::core::recommend::format_size;
use mediacull::services::analyzer::ItemAnalyzer;
use mediacull::services::{
    AnalysisPhase, AnalysisProgress, AnalysisStore, Decoder, IdentityMode, MediaDecoder,
    MediaScanner, Pipeline, RunReport, ScanOptions, SledStore, SqliteStore,
};
use mediacull::EngineConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "mediacull",
    version,
    about = "Find near-duplicate photos and videos and suggest which copy to keep"
)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a directory, group near-duplicates and print recommendations
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Engine config (default: the user config file, if present)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the similarity threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Override the worker count
        #[arg(long)]
        workers: Option<usize>,
        /// Only scan the top level of DIR
        #[arg(long)]
        no_recursive: bool,
        /// How items are identified
        #[arg(long, value_enum, default_value_t = IdentityArg::Path)]
        identity: IdentityArg,
        /// Where analyses are cached between runs
        #[arg(long, value_enum, default_value_t = StoreKind::Sqlite)]
        store: StoreKind,
        /// Cache location (default: `<DIR>/.mediacull.db` or `<DIR>/.mediacull.sled`)
        #[arg(long, value_name = "PATH")]
        store_path: Option<PathBuf>,
        /// Also write the full report as JSON
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,
    },

    /// Print the hashes, quality and enhancement verdict of a single file
    Hash {
        #[arg(short, long, value_name = "FILE")]
        path: PathBuf,
    },

    /// Print the effective configuration, or write the defaults to a file
    Config {
        /// Write defaults here instead of printing
        #[arg(long, value_name = "FILE")]
        write: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IdentityArg {
    Path,
    Content,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    Sqlite,
    Sled,
    None,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Scan {
            path,
            config,
            threshold,
            workers,
            no_recursive,
            identity,
            store,
            store_path,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(threshold) = threshold {
                config.similarity_threshold = threshold;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }

            let options = ScanOptions {
                recursive: !no_recursive,
                identity: match identity {
                    IdentityArg::Path => IdentityMode::Path,
                    IdentityArg::Content => IdentityMode::Content,
                },
                ..ScanOptions::default()
            };
            let report = scan(&path, config, options, store, store_path).await?;
            print_report(&report);

            if let Some(out) = json {
                fs::write(&out, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("Failed to write report to {}", out.display()))?;
                println!("\nReport written to {}", out.display());
            }
        }

        Commands::Hash { path } => {
            let config = load_config(None)?;
            let media_type = media_type_for_path(&path)
                .with_context(|| format!("Unsupported media type: {}", path.display()))?;
            let file_size = fs::metadata(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?
                .len();
            let item = MediaItem::new(path.to_string_lossy(), path.clone(), media_type, file_size);

            let decoder: Arc<dyn Decoder> =
                Arc::new(MediaDecoder::new(config.video_frame_offset_secs));
            let analyzer = ItemAnalyzer::new(decoder, None, config.quality_weights.clone());
            let record = analyzer.analyze(&item);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Config { write } => match write {
            Some(out) => {
                EngineConfig::default()
                    .save(&out)
                    .with_context(|| format!("Failed to write config to {}", out.display()))?;
                println!("Wrote default config to {}", out.display());
            }
            None => {
                let config = load_config(None)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => match EngineConfig::default_path() {
            Some(path) => EngineConfig::load_or_default(&path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(EngineConfig::default()),
        },
    }
}

fn open_store(
    kind: StoreKind,
    root: &Path,
    store_path: Option<PathBuf>,
) -> Result<Option<Arc<dyn AnalysisStore>>> {
    let store: Arc<dyn AnalysisStore> = match kind {
        StoreKind::None => return Ok(None),
        StoreKind::Sqlite => {
            let path = store_path.unwrap_or_else(|| root.join(".mediacull.db"));
            Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            )
        }
        StoreKind::Sled => {
            let path = store_path.unwrap_or_else(|| root.join(".mediacull.sled"));
            Arc::new(
                SledStore::open(&path)
                    .with_context(|| format!("Failed to open cache {}", path.display()))?,
            )
        }
    };
    Ok(Some(store))
}

async fn scan(
    root: &Path,
    config: EngineConfig,
    options: ScanOptions,
    store: StoreKind,
    store_path: Option<PathBuf>,
) -> Result<RunReport> {
    println!("▶ Scanning {}", root.display());
    let items = MediaScanner::new(options)
        .scan(root)
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    println!("▶ Found {} media files", items.len());

    let decoder: Arc<dyn Decoder> = Arc::new(MediaDecoder::new(config.video_frame_offset_secs));
    let (sender, receiver) = mpsc::unbounded_channel();
    let mut pipeline = Pipeline::new(config, decoder)
        .context("Invalid configuration")?
        .with_progress_sender(sender);
    if let Some(store) = open_store(store, root, store_path)? {
        pipeline = pipeline.with_store(store);
    }

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Cancelling; waiting for running analyses to finish");
            token.store(true, Ordering::Relaxed);
        }
    });

    let bar = ProgressBar::new(items.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let progress = tokio::spawn(drive_progress(bar, receiver));

    let start = Instant::now();
    let report = pipeline.run(items).await?;
    drop(pipeline);
    let _ = progress.await;
    println!("⏱ Analysis took {:.2?}", start.elapsed());

    Ok(report)
}

async fn drive_progress(bar: ProgressBar, mut receiver: mpsc::UnboundedReceiver<AnalysisProgress>) {
    bar.enable_steady_tick(Duration::from_millis(100));
    while let Some(progress) = receiver.recv().await {
        bar.set_length(progress.total as u64);
        bar.set_position(progress.processed as u64);
        bar.set_message(progress.current);
        if progress.phase == AnalysisPhase::Complete {
            break;
        }
    }
    bar.finish_with_message("done");
}

fn print_report(report: &RunReport) {
    if report.cancelled {
        println!(
            "\n⚠️  Run cancelled: {} item(s) were not analyzed",
            report.not_started.len()
        );
    }

    if report.clusters.is_empty() {
        println!("\nNo near-duplicates found.");
    } else {
        println!("\nFound {} group(s):", report.clusters.len());
    }

    for (i, cluster) in report.clusters.iter().enumerate() {
        let rec = &cluster.recommendation;
        println!(
            "\n✨ Group {} ({}, {} items, min similarity {:.2}):",
            i + 1,
            cluster.media_type.as_str(),
            cluster.members.len(),
            cluster.min_similarity
        );
        println!("   🏆 Keep     {} (quality {:.2})", rec.best, rec.best_quality);
        for identity in &rec.duplicates {
            if rec.exact_copies.contains(identity) {
                println!("   📦 Duplicate {} (exact copy)", identity);
            } else {
                println!("   📦 Duplicate {}", identity);
            }
        }
        for identity in &rec.lower_quality {
            println!("   📉 Lower    {}", identity);
        }
        for identity in &rec.ai_enhanced {
            println!("   🤖 Review   {}", identity);
        }
        println!("   {}", rec.explanation);
    }

    if !report.errors.is_empty() {
        println!("\n{} item(s) could not be analyzed:", report.errors.len());
        for entry in &report.errors {
            println!(
                "   ⚠️  {} [{}] {}",
                entry.identity,
                entry.status.as_str(),
                entry.message.as_deref().unwrap_or("")
            );
        }
    }
    if !report.partial.is_empty() {
        println!(
            "\n{} item(s) were scored on a subset of metrics",
            report.partial.len()
        );
    }
    if !report.skipped.is_empty() {
        println!("{} small file(s) skipped", report.skipped.len());
    }

    println!(
        "\nPotential savings: {}",
        format_size(report.total_potential_savings)
    );
}
