// PicoDB command-line tool.
//
// Only `init` and `config get` touch the storage core (spec.md §6); the
// remaining subcommands are named here because the spec's external CLI
// surface names them, but their behavior belongs to layers this crate does
// not implement (log replay, file relocation, version upgrades).

use clap::{Parser, Subcommand};
use colored::Colorize;
use picodb::storage::StorageManager;
use picodb::PicoConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "picodb", about = "PicoDB storage core administration tool")]
struct Cli {
    /// Database directory. Defaults to the platform's per-user app-data
    /// directory for "picodb".
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new database directory.
    Init {
        /// Page size in KiB. Must be a positive integer.
        #[arg(long, default_value_t = 64)]
        page_size_kb: u32,
        /// Overwrite an existing directory at the target path.
        #[arg(long)]
        overwrite: bool,
    },
    /// Inspect or report configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Out of scope for the storage core.
    Fix,
    /// Out of scope for the storage core.
    Rebuild,
    /// Out of scope for the storage core.
    Move,
    /// Out of scope for the storage core.
    Upgrade,
    /// Out of scope for the storage core.
    Log,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the on-disk page size for an initialized database.
    Get,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let dir = cli.dir.unwrap_or_else(|| PicoConfig::default().data_dir);

    match run(dir, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{} {}", "Fatal Error:".red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

async fn run(dir: PathBuf, command: Command) -> Result<(), String> {
    match command {
        Command::Init {
            page_size_kb,
            overwrite,
        } => {
            StorageManager::create(page_size_kb, &dir, overwrite).map_err(|e| e.to_string())?;
            println!(
                "initialized database at {} ({} KiB pages)",
                dir.display(),
                page_size_kb
            );
            Ok(())
        }
        Command::Config { action } => match action {
            ConfigAction::Get => {
                let metadata = StorageManager::get_metadata(&dir).map_err(|e| e.to_string())?;
                println!("page_size = {}", metadata.page_size);
                Ok(())
            }
        },
        Command::Fix | Command::Rebuild | Command::Move | Command::Upgrade | Command::Log => {
            Err("not part of the storage core".to_string())
        }
    }
}
