// THEORY:
// `track_replay` drives the `pan_tracker` pipeline from a recorded stream of
// detection output instead of a live camera. Each line of the input is either
// one frame's detections or one operator control, so a whole session can be
// scripted, replayed, and reviewed afterwards from the activity history.

mod replay;
mod review;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "track_replay", about = "Replay recorded face detections through the pan tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON-lines detection recording through the tracking loop.
    Run(replay::RunArgs),
    /// Browse saved activity sessions.
    History {
        /// Directory holding the activity logs.
        #[arg(long, default_value = "history")]
        dir: PathBuf,
        #[command(subcommand)]
        action: review::HistoryAction,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pan_tracker=info,track_replay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let totals = replay::execute(args).await?;
            println!("{totals}");
        }
        Commands::History { dir, action } => review::execute(&dir, action)?,
    }
    Ok(())
}
