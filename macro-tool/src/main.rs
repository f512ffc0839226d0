//! macro-tool - record and replay keyboard/mouse macros

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ops::Range;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod controller;

#[derive(Parser)]
#[command(name = "macro-tool")]
#[command(about = "Record global keyboard/mouse input and replay it as synthetic input")]
#[command(version)]
struct Cli {
    /// Directory holding saved macros
    #[arg(long, global = true, env = "MACRO_TOOL_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record until Ctrl+C, then save under NAME
    Record {
        /// Macro name
        name: String,

        /// Drop mouse move events
        #[arg(long)]
        no_mouse_moves: bool,
    },

    /// Replay a saved macro
    Play {
        /// Macro name
        name: String,

        /// Repeat until Ctrl+C
        #[arg(long = "loop")]
        loop_playback: bool,

        /// Randomize each delay within the jitter range
        #[arg(long)]
        vary_speed: bool,

        /// Lower bound of the speed factor
        #[arg(long, default_value = "0.85")]
        jitter_min: f64,

        /// Upper bound of the speed factor
        #[arg(long, default_value = "1.15")]
        jitter_max: f64,

        /// Seed for reproducible jitter
        #[arg(long)]
        seed: Option<u64>,

        /// Bring this window to the foreground first
        #[arg(long)]
        window: Option<String>,

        /// Log events instead of synthesizing them
        #[arg(long)]
        dry_run: bool,
    },

    /// List saved macros
    List,

    /// Show a saved macro
    Show {
        /// Macro name
        name: String,

        /// Print every event
        #[arg(long)]
        all: bool,

        /// Print the stored JSON document
        #[arg(long, conflicts_with = "all")]
        json: bool,
    },

    /// Change a saved macro and save it again
    Edit {
        /// Macro name
        name: String,

        /// Remove events by index as shown by `show --all`: 5, 3..7 or 3..=7
        #[arg(long, value_parser = controller::parse_range)]
        drop: Option<Range<usize>>,

        /// Speed factor; 2 replays twice as fast
        #[arg(long)]
        speed: Option<f64>,

        /// Remove key presses that are never released
        #[arg(long)]
        trim_held_keys: bool,

        /// Save under another name instead of replacing the original
        #[arg(long)]
        save_as: Option<String>,
    },

    /// Delete a saved macro
    Delete {
        /// Macro name
        name: String,
    },

    /// List windows playback can target
    Windows,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let store = controller::open_store(cli.store_dir)?;

    match cli.command {
        Commands::Record {
            name,
            no_mouse_moves,
        } => controller::record(&store, &name, !no_mouse_moves).await,
        Commands::Play {
            name,
            loop_playback,
            vary_speed,
            jitter_min,
            jitter_max,
            seed,
            window,
            dry_run,
        } => {
            let options = controller::PlayOptions {
                loop_playback,
                vary_speed,
                jitter: (jitter_min, jitter_max),
                seed,
                window,
                dry_run,
            };
            controller::play(&store, &name, options).await
        }
        Commands::List => controller::list(&store),
        Commands::Show { name, all, json } => controller::show(&store, &name, all, json),
        Commands::Edit {
            name,
            drop,
            speed,
            trim_held_keys,
            save_as,
        } => {
            let options = controller::EditOptions {
                drop,
                speed,
                trim_held_keys,
                save_as,
            };
            controller::edit(&store, &name, options)
        }
        Commands::Delete { name } => controller::delete(&store, &name),
        Commands::Windows => controller::windows(),
    }
}
