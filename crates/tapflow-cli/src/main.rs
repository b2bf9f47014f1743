mod commands;
mod console;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tapflow_core::{get_app_data_dir, load_config, JsonFileStore};

/// Guided UI automation flows: inspect, edit and record step positions.
#[derive(Debug, Parser)]
#[command(name = "tapflow", version)]
struct Cli {
    /// Directory holding the stored flow and test contact
    #[arg(long, env = "TAPFLOW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// YAML configuration file (default: <data-dir>/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write logs to <data-dir>/logs
    #[arg(long)]
    log_file: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the stored flow
    Steps {
        /// Print the persisted JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Replace the stored flow with the default one
    Reset,
    /// Set the search text of a find-and-tap step
    SetText { id: String, text: String },
    /// Remember a contact name for test runs
    SetContact { name: String },
    /// Record the screen position of a tap or paste step
    Record { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(get_app_data_dir);
    let log_dir = data_dir.join("logs");
    logging::setup(cli.verbose, cli.log_file.then_some(log_dir.as_path()));

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join("config.yaml"));
    let config = load_config(&config_path);
    let store = Arc::new(JsonFileStore::new(&data_dir));

    match &cli.command {
        Command::Steps { json } => commands::steps(&store, &config, *json),
        Command::Reset => commands::reset(&store),
        Command::SetText { id, text } => commands::set_text(&store, &config, id, text),
        Command::SetContact { name } => commands::set_contact(&store, name),
        Command::Record { id } => commands::record(store.clone(), &config, id),
    }
}
