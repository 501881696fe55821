//! Interactive todo list driven by a trellis workflow tree.
//!
//! Reads commands from stdin, prints every new rendering, and optionally
//! saves the tree's snapshot on exit so the next run can pick up where this
//! one stopped.
//!
//! ```text
//! add <title>   add an item
//! toggle <n>    mark item n done / not done
//! rm <n>        remove item n
//! quit          end the session
//! ```

mod todo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis::{Runtime, RuntimeConfig, TracingListener};

use crate::todo::{ListScreen, SessionEnd, TodoList};

#[derive(Parser)]
#[command(name = "trellis-demo")]
#[command(about = "Todo list running on a trellis workflow tree")]
struct Cli {
    /// Seconds without input before the session ends
    #[arg(long, default_value_t = 300)]
    idle_secs: u64,

    /// Restore the tree from a snapshot file
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Write the final snapshot to this file
    #[arg(long)]
    save: Option<PathBuf>,

    /// Log every diagnostic event
    #[arg(long)]
    trace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,trellis=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = RuntimeConfig::from_env().context("Failed to load runtime config")?;
    let mut builder =
        Runtime::builder(TodoList, Duration::from_secs(cli.idle_secs)).with_config(config);
    if let Some(path) = &cli.restore {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        info!(path = %path.display(), bytes = bytes.len(), "restoring snapshot");
        builder = builder.with_snapshot(bytes);
    }
    if cli.trace {
        builder = builder.with_listener(Arc::new(TracingListener));
    }

    let mut handle = builder.launch()?;
    let mut renderings = handle.renderings();
    let mut outputs = handle.take_outputs().context("outputs already taken")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_screen(&renderings.borrow_and_update().rendering);

    let end = loop {
        tokio::select! {
            changed = renderings.changed() => {
                if changed.is_err() {
                    break None;
                }
                print_screen(&renderings.borrow_and_update().rendering);
            }
            output = outputs.recv() => break output,
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    if let Err(e) = dispatch(&renderings.borrow().rendering, &line) {
                        warn!(error = %e, "command rejected");
                    }
                }
                None => break None,
            },
        }
    };

    let snapshot = renderings.borrow().snapshot.clone();
    drop(outputs);
    handle.shutdown().await?;

    match end {
        Some(SessionEnd::Quit) => info!("session ended by user"),
        Some(SessionEnd::Idle) => info!(idle_secs = cli.idle_secs, "session ended after inactivity"),
        None => info!("input closed"),
    }

    if let Some(path) = cli.save {
        std::fs::write(&path, snapshot.bytes())
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!(path = %path.display(), bytes = snapshot.bytes().len(), "snapshot saved");
    }

    Ok(())
}

fn dispatch(screen: &ListScreen, line: &str) -> Result<()> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "" => {}
        "add" if !rest.is_empty() => screen.add.send(rest.to_string())?,
        "toggle" | "rm" => {
            let n: usize = rest.parse().context("expected an item number")?;
            let item = n
                .checked_sub(1)
                .and_then(|idx| screen.items.get(idx))
                .with_context(|| format!("no item {n}"))?;
            if command == "toggle" {
                item.toggle.send(())?;
            } else {
                item.remove.send(())?;
            }
        }
        "quit" => screen.quit.send(())?,
        other => anyhow::bail!("unknown command {other:?}; try add <title>, toggle <n>, rm <n>, quit"),
    }
    Ok(())
}

fn print_screen(screen: &ListScreen) {
    if screen.items.is_empty() {
        println!("(nothing to do)");
        return;
    }
    for (idx, item) in screen.items.iter().enumerate() {
        let mark = if item.done { "x" } else { " " };
        println!("{:>3}. [{mark}] {}", idx + 1, item.title);
    }
}
