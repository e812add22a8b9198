mod script;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use panekit_core::{Config, ContextTag, KeyCombo, ShortcutResolver};

use crate::script::{Replay, Script};

#[derive(Debug, Parser)]
#[command(name = "panekit", about = "Focus and input routing for multi-pane applications")]
struct Cli {
    /// Override config path (default: ~/.config/panekit/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the effective keybindings
    Bindings,
    /// Resolve a key combination against a context stack
    Resolve {
        combo: String,
        /// Context tags, innermost first; `global` is always appended
        #[arg(long = "context")]
        contexts: Vec<String>,
    },
    /// Run a scripted session through the focus core
    Replay {
        script: PathBuf,
        /// Snapshot file for `save`/`load` steps without a path
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("panekit v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref());

    match cli.command {
        Command::Bindings => {
            let resolver = resolver(&config);
            for binding in resolver.bindings() {
                println!(
                    "{:<16} {:<20} {}",
                    binding.context.as_str(),
                    binding.combo.to_string(),
                    binding.action.name()
                );
            }
        }
        Command::Resolve { combo, contexts } => {
            let resolver = resolver(&config);
            let combo: KeyCombo = combo.parse()?;
            let mut stack: Vec<ContextTag> = contexts.into_iter().map(ContextTag::from).collect();
            if !stack.iter().any(|c| c.as_str() == ContextTag::GLOBAL) {
                stack.push(ContextTag::global());
            }
            match resolver.resolve_with_context(&stack, &combo) {
                Some((context, action)) => println!("{combo} -> {} (from {context})", action.name()),
                None => println!("{combo} -> unbound"),
            }
        }
        Command::Replay { script, snapshot } => {
            let script = Script::load(&script)?;
            let snapshot = snapshot.unwrap_or_else(|| config.snapshot_path());
            let mut replay = Replay::new(&config, snapshot);
            for line in replay.run(&script)? {
                println!("{line}");
            }
            for line in replay.summary() {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    loaded.unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default()
    })
}

fn resolver(config: &Config) -> ShortcutResolver {
    let mut resolver = ShortcutResolver::new();
    for diagnostic in config.install_keybindings(&mut resolver) {
        eprintln!("warning: {diagnostic}");
    }
    resolver
}
