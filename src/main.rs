//! canopy CLI - apply sparse updates to a JSON tree and report changes
//!
//! Loads a base JSON document into an observable tree, then merges each
//! patch document in turn with one notification flush per patch.

use anyhow::Context;
use canopy::{Change, Node, Path};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Apply sparse updates to an observable JSON tree")]
#[command(version)]
struct Cli {
    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge patches into a base document, flushing after each one
    Apply {
        /// Base JSON document (must be an object)
        base: PathBuf,
        /// Patch documents, merged in order (null deletes a key)
        patches: Vec<PathBuf>,
        /// Reclaim empty subtrees after each flush
        #[arg(long)]
        cleanup: bool,
    },

    /// Like apply, but only report what observers on the given paths see
    Watch {
        /// Base JSON document (must be an object)
        base: PathBuf,
        /// Patch documents, merged in order (null deletes a key)
        patches: Vec<PathBuf>,
        /// Dotted path to observe (repeatable). Every '.' separates keys,
        /// so keys that contain a '.' cannot be watched
        #[arg(short, long = "path", required = true, value_name = "DOTTED.PATH")]
        paths: Vec<String>,
    },
}

/// One observed change, tagged with the patch and watch that produced it
struct Event {
    patch: usize,
    watch: String,
    change: Change,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Apply {
            base,
            patches,
            cleanup,
        } => {
            let tree = load_base(&base)?;
            let mut reports = Vec::new();

            for (index, patch_path) in patches.iter().enumerate() {
                let patch = read_json(patch_path)?;
                tree.merge_value(&patch)
                    .with_context(|| format!("Failed to apply {}", patch_path.display()))?;
                let changes = tree.notify();
                if cleanup {
                    tree.cleanup();
                }
                tracing::info!(patch = index, changes = changes.len(), "applied patch");
                reports.push((patch_path.display().to_string(), changes));
            }

            match cli.format {
                OutputFormat::Json => {
                    let items: Vec<_> = reports
                        .iter()
                        .map(|(patch, changes)| {
                            serde_json::json!({
                                "patch": patch,
                                "count": changes.len(),
                                "changes": changes.iter().map(change_json).collect::<Vec<_>>()
                            })
                        })
                        .collect();
                    output_json(&serde_json::json!({
                        "status": "ok",
                        "patches": items,
                        "tree": tree.to_value()
                    }))?;
                }
                OutputFormat::Text => {
                    for (patch, changes) in &reports {
                        println!("== {}", patch);
                        for change in changes {
                            println!("  {}", change_line(change));
                        }
                    }
                    println!("{}", serde_json::to_string_pretty(&tree.to_value())?);
                }
            }
        }

        Commands::Watch {
            base,
            patches,
            paths,
        } => {
            let tree = load_base(&base)?;
            let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
            let current_patch = Arc::new(Mutex::new(0usize));

            for watch in &paths {
                let path: Path = watch.parse()?;
                let key = path
                    .last()
                    .ok_or_else(|| anyhow::anyhow!("Cannot watch the root path"))?
                    .to_string();
                let mut parent = path.clone();
                parent.pop();
                let node = tree.descend(&parent)?;

                let sink = Arc::clone(&events);
                let patch = Arc::clone(&current_patch);
                let watch = watch.clone();
                node.observe(&key, move |change: &Change| {
                    sink.lock().push(Event {
                        patch: *patch.lock(),
                        watch: watch.clone(),
                        change: change.clone(),
                    });
                });
            }

            for (index, patch_path) in patches.iter().enumerate() {
                let patch = read_json(patch_path)?;
                tree.merge_value(&patch)
                    .with_context(|| format!("Failed to apply {}", patch_path.display()))?;
                *current_patch.lock() = index;
                tree.notify();
            }

            let events = events.lock();
            match cli.format {
                OutputFormat::Json => {
                    let items: Vec<_> = events
                        .iter()
                        .map(|event| {
                            serde_json::json!({
                                "patch": patches[event.patch].display().to_string(),
                                "watch": event.watch,
                                "change": change_json(&event.change)
                            })
                        })
                        .collect();
                    output_json(&serde_json::json!({
                        "status": "ok",
                        "count": items.len(),
                        "events": items
                    }))?;
                }
                OutputFormat::Text => {
                    for event in events.iter() {
                        println!("[{}] {}", event.watch, change_line(&event.change));
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json(path: &PathBuf) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Load the base document and flush it, so only patch changes are reported
fn load_base(path: &PathBuf) -> anyhow::Result<Node> {
    let tree = Node::from_value(read_json(path)?)
        .with_context(|| format!("Invalid base document {}", path.display()))?;
    tree.notify();
    Ok(tree)
}

fn change_json(change: &Change) -> Value {
    serde_json::json!({
        "kind": change.kind(),
        "path": change.path.to_string(),
        "old": change.old,
        "new": change.new
    })
}

fn change_line(change: &Change) -> String {
    let show = |value: &Option<Value>| match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    };
    format!(
        "{:?} {}: {} -> {}",
        change.kind(),
        change.path,
        show(&change.old),
        show(&change.new)
    )
}

fn output_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
