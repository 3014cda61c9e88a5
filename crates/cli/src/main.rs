//! `statusq`: inspect and maintain persisted command queues.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use statusq_commands::{CommandUnit, InMemoryContext};
use statusq_infra::queue::QueueSnapshot;
use statusq_infra::{CommandQueue, DurableStore, FileDurableStore, QueueType};

/// Inspect and maintain the command queues of a queue directory.
#[derive(Parser)]
#[command(name = "statusq", version, about)]
struct Cli {
    /// Directory holding the queue files.
    #[arg(short, long, env = "STATUSQ_QUEUE_DIR", default_value = "queues")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the units of one queue, or of every queue, in drain order.
    List {
        queue: Option<QueueType>,
        /// Print JSON instead of one line per unit.
        #[arg(long)]
        json: bool,
    },
    /// Print the number of units in each queue.
    Count,
    /// Remove every unit from a queue.
    Clear { queue: QueueType },
    /// Append the units of one queue to another, skipping duplicates.
    Copy { from: QueueType, to: QueueType },
}

fn main() -> anyhow::Result<()> {
    statusq_observability::init();
    let cli = Cli::parse();

    let store = FileDurableStore::open(cli.dir.clone())
        .with_context(|| format!("failed to open queue directory {}", cli.dir.display()))?;

    match cli.command {
        Command::List { queue, json } => {
            let queues = match queue {
                Some(queue) => vec![queue],
                None => QueueType::ALL.to_vec(),
            };
            for queue in queues {
                let units = read_units(&store, queue)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&units)?);
                } else {
                    for line in render(queue, &units) {
                        println!("{line}");
                    }
                }
            }
        }
        Command::Count => {
            for queue in QueueType::ALL {
                println!("{queue}: {}", read_units(&store, queue)?.len());
            }
        }
        Command::Clear { queue } => {
            let removed = clear(&store, queue)?;
            info!(queue = %queue, removed, "queue cleared");
            println!("cleared {removed} unit(s) from {queue}");
        }
        Command::Copy { from, to } => {
            let copied = copy(&store, from, to)?;
            info!(from = %from, to = %to, copied, "queue copied");
            println!("copied {copied} unit(s) from {from} to {to}");
        }
    }
    Ok(())
}

fn read_units(store: &dyn DurableStore, queue: QueueType) -> anyhow::Result<Vec<CommandUnit>> {
    match store.read(queue.name())? {
        Some(bytes) => Ok(QueueSnapshot::decode(&bytes)
            .with_context(|| format!("queue {queue} is unreadable"))?
            .units),
        None => Ok(Vec::new()),
    }
}

fn write_units(
    store: &dyn DurableStore,
    queue: QueueType,
    units: Vec<CommandUnit>,
) -> anyhow::Result<()> {
    let blob = QueueSnapshot::new(queue, units).encode()?;
    store.write(queue.name(), &blob)?;
    Ok(())
}

fn render(queue: QueueType, units: &[CommandUnit]) -> Vec<String> {
    // Names of accounts, origins and users are not known here; summaries
    // fall back to row ids.
    let ctx = InMemoryContext::new();
    units
        .iter()
        .map(|unit| {
            let outcome = unit.outcome();
            let mut line = format!(
                "{queue}\t{}\t{}\tattempts={} retries_left={}",
                unit.id(),
                unit.summary(&ctx),
                outcome.execution_count(),
                outcome.retries_left()
            );
            if !outcome.message().is_empty() {
                line.push_str(&format!("\t{}", outcome.message()));
            }
            line
        })
        .collect()
}

fn clear(store: &dyn DurableStore, queue: QueueType) -> anyhow::Result<usize> {
    let removed = read_units(store, queue)?.len();
    write_units(store, queue, Vec::new())?;
    Ok(removed)
}

fn copy(store: &dyn DurableStore, from: QueueType, to: QueueType) -> anyhow::Result<usize> {
    anyhow::ensure!(from != to, "source and target queue are both {from}");

    let mut target = CommandQueue::new();
    for unit in read_units(store, to)? {
        target.add(unit);
    }
    let copied = read_units(store, from)?
        .into_iter()
        .filter(|unit| target.add(unit.clone()).is_added())
        .count();
    write_units(store, to, target.snapshot())?;
    Ok(copied)
}
