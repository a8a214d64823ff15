//! fieldsync: keep Provider farm/field records and the Store tree in step.
//!
//! # Usage
//!
//! ```text
//! fieldsync init [--force]
//! fieldsync sync [--json]
//! fieldsync aliases [--json]
//! fieldsync geometry to-geojson <WKT>
//! fieldsync geometry to-wkt <GEOJSON>
//! fieldsync daemon start|stop|status|poll
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    aliases::AliasesArgs, daemon::DaemonCommand, geometry::GeometryCommand, init::InitArgs,
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fieldsync",
    version,
    about = "Synchronize grower farm and field records between the Provider and the Store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default config to ~/.fieldsync/config.yaml.
    Init(InitArgs),

    /// Run one poll tick from the bootstrap cursor and print its report.
    Sync(SyncArgs),

    /// List the local alias journal.
    Aliases(AliasesArgs),

    /// Convert boundaries between WKT and GeoJSON.
    Geometry {
        #[command(subcommand)]
        command: GeometryCommand,
    },

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Aliases(args) => args.run(),
        Commands::Geometry { command } => commands::geometry::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
