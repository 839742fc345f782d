//! snapshot_admin - inspect, export and clear the detection history

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use leafwatch::{SnapshotStore, SqliteSnapshotStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the snapshot database.
    #[arg(long, env = "LEAFWATCH_DB_PATH", default_value = "detections.db")]
    db_path: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List snapshots, most recent first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Write one snapshot's PNG to a file.
    Export { id: i64, output: PathBuf },
    /// Delete every snapshot.
    Clear {
        /// Required; clearing cannot be undone.
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let store = SqliteSnapshotStore::open(&args.db_path)?;

    match args.command {
        Command::List { json } => {
            let snapshots = store.list_meta()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else if snapshots.is_empty() {
                println!("no snapshots in {}", args.db_path.display());
            } else {
                println!("{:>6}  {:<19}  {:>10}", "id", "timestamp", "bytes");
                for snapshot in snapshots {
                    println!(
                        "{:>6}  {:<19}  {:>10}",
                        snapshot.id, snapshot.timestamp, snapshot.bytes
                    );
                }
            }
        }
        Command::Export { id, output } => {
            let snapshot = store
                .get(id)?
                .ok_or_else(|| anyhow!("snapshot {} not found", id))?;
            std::fs::write(&output, &snapshot.image)
                .with_context(|| format!("write {}", output.display()))?;
            log::info!(
                "exported snapshot {} ({}) to {}",
                id,
                snapshot.timestamp,
                output.display()
            );
        }
        Command::Clear { yes } => {
            if !yes {
                return Err(anyhow!("refusing to clear without --yes"));
            }
            let removed = store.clear()?;
            println!("removed {} snapshots", removed);
        }
    }
    Ok(())
}
