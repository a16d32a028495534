//! shotmill: migrate shot trees into a wide-column table
//!
//! Usage:
//!   # Print the document of one shot from a fixture directory
//!   shotmill walk --source ./trees --tree my_tree --shot 12345
//!
//!   # Flatten a stored document (file or stdin) into NDJSON rows
//!   shotmill flatten doc.json
//!
//!   # Register shots, then migrate the lowest unmigrated one
//!   shotmill seed --db shots.redb 12345 12346
//!   shotmill run --db shots.redb --source ./trees --config migrate.toml

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shotmill::{
    seed_shots, walk_shot, CancelToken, FixtureSource, Flattener, MigrateConfig, MigrationCursor,
    RedbSink, RowIdentity, RowWriter, ShotDocument, TimeWindow,
};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "shotmill")]
#[command(about = "Migrate shot trees into a wide-column table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk one shot and print its document as JSON
    Walk {
        /// Fixture directory holding `<tree>/<shot>.json`
        #[arg(long)]
        source: PathBuf,

        #[arg(long, default_value = "my_tree")]
        tree: String,

        #[arg(long)]
        shot: u64,

        /// Subtree to include (repeatable); every SUBTREE child of the root if omitted
        #[arg(long = "subtree")]
        subtrees: Vec<String>,
    },

    /// Flatten shot documents into NDJSON rows
    Flatten {
        /// Input file (use stdin if omitted)
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        /// Use the dotted node path as the row id instead of the node name
        #[arg(long)]
        node_path: bool,

        /// Also print skipped records, tagged with `_skipped`
        #[arg(long)]
        show_skipped: bool,

        /// Drop samples whose float key is below this value
        #[arg(long, requires = "until")]
        from: Option<f64>,

        /// Drop samples whose float key is above this value
        #[arg(long, requires = "from")]
        until: Option<f64>,
    },

    /// Register shot rows so `run` can find them
    Seed {
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(value_name = "SHOT", required = true)]
        shots: Vec<u64>,
    },

    /// Migrate the next unmigrated shot (or the given one)
    Run {
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Migrate this shot instead of scanning for one
        #[arg(long)]
        shot: Option<u64>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Cancel the invocation after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Walk {
            source,
            tree,
            shot,
            subtrees,
        } => {
            let source = FixtureSource::new(source);
            let subtrees = (!subtrees.is_empty()).then_some(subtrees);
            let document = walk_shot(&source, shot, &tree, subtrees.as_deref())
                .with_context(|| format!("Failed to walk {} shot {}", tree, shot))?;
            println!("{}", document.to_json_pretty()?);
        }

        Command::Flatten {
            input,
            node_path,
            show_skipped,
            from,
            until,
        } => {
            let identity = if node_path {
                RowIdentity::NodePath
            } else {
                RowIdentity::NodeName
            };
            let window = match (from, until) {
                (Some(start), Some(end)) if start <= end => Some(TimeWindow::new(start, end)),
                (Some(start), Some(end)) => bail!("--from {} is after --until {}", start, end),
                _ => None,
            };
            flatten_documents(input, identity, window, show_skipped)?;
        }

        Command::Seed { db, config, shots } => {
            let config = load_config(config.as_deref())?;
            let sink = open_sink(&db)?;
            let count = seed_shots(&sink, &config, &shots)?;
            info!(count, table = %config.table_id, "shots registered");
        }

        Command::Run {
            db,
            source,
            config,
            shot,
            batch_size,
            timeout,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            let sink = open_sink(&db)?;
            let source = FixtureSource::new(source);

            let cancel = CancelToken::new();
            if let Some(seconds) = timeout {
                let cancel = cancel.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(seconds));
                    warn!(seconds, "timeout reached, cancelling");
                    cancel.cancel();
                });
            }

            let mut cursor = MigrationCursor::new(&source, &sink, &config).with_cancel(cancel);
            let outcome = match shot {
                Some(shot) => cursor.migrate_shot(shot),
                None => cursor.run(),
            }
            .with_context(|| format!("Migration failed while {}", cursor.state()))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<MigrateConfig> {
    match path {
        Some(path) => MigrateConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(MigrateConfig::default()),
    }
}

fn open_sink(path: &Path) -> Result<RedbSink> {
    RedbSink::open(path).with_context(|| format!("Failed to open sink {}", path.display()))
}

/// Read documents from a file or stdin and write their rows to stdout
fn flatten_documents(
    input: Option<PathBuf>,
    identity: RowIdentity,
    window: Option<TimeWindow>,
    show_skipped: bool,
) -> Result<()> {
    let mut reader: Box<dyn Read> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(std::io::stdin()),
    };
    let mut content = Vec::new();
    reader.read_to_end(&mut content)?;

    let documents = parse_documents(content)?;
    let flattener = Flattener::new(identity).with_time_window(window);
    let stdout = std::io::stdout();
    let mut writer = RowWriter::new(stdout.lock());

    for document in &documents {
        let flattened = flattener.flatten(document);
        writer.write_rows(&flattened.rows)?;
        if show_skipped {
            writer.write_skipped(&flattened.skipped)?;
        }
    }
    writer.flush()?;

    info!(documents = documents.len(), rows = writer.rows_written(), "flatten complete");
    Ok(())
}

fn parse_documents(content: Vec<u8>) -> Result<Vec<ShotDocument>> {
    // simd-json parses in place, so keep the original bytes for the fallback
    let mut scratch = content.clone();
    if let Ok(document) = simd_json::serde::from_slice::<ShotDocument>(&mut scratch) {
        return Ok(vec![document]);
    }

    // Fallback to serde_json for NDJSON, one document per line
    let text = String::from_utf8_lossy(&content);
    let mut documents = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let document = ShotDocument::from_json(line)
            .with_context(|| format!("Failed to parse document on line {}", line_no + 1))?;
        documents.push(document);
    }
    if documents.is_empty() {
        bail!("No shot document found in input");
    }
    Ok(documents)
}
