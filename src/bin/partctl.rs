//! partctl
//!
//! Inspect and maintain part directories on a local disk.

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use partstore::disk::{DiskRef, LocalDisk, SingleDiskVolume, VolumeRef};
use partstore::part::{Checksums, PartStorage, RemovalOutcome};
use partstore::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Part storage maintenance tool
#[derive(Parser, Debug)]
#[command(name = "partctl")]
#[command(about = "Inspect and maintain column-store data parts")]
#[command(version)]
struct Args {
    /// Disk root directory
    #[arg(short, long, default_value = "./data")]
    disk: String,

    /// Table directory, relative to the disk root
    #[arg(short, long, default_value = "")]
    root: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the files of a part
    Ls {
        /// Part directory name
        part: String,
    },

    /// Print the total size of a part
    Size {
        part: String,
    },

    /// Print the (recovered) version metadata of a part
    Version {
        part: String,
    },

    /// Compare file sizes against checksums.txt
    Check {
        part: String,
    },

    /// Remove a part
    Remove {
        part: String,
    },

    /// Snapshot a part into another directory on the same disk
    Freeze {
        part: String,

        /// Destination directory, relative to the disk root
        #[arg(short, long)]
        to: String,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,partstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("partctl failed: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let disk: DiskRef = Arc::new(LocalDisk::new("default", &args.disk)?);
    let volume: VolumeRef = Arc::new(SingleDiskVolume::new("default", disk));

    let open = |part: &str| PartStorage::new(volume.clone(), args.root.clone(), part);

    match args.command {
        Commands::Ls { part } => {
            for entry in open(&part).iterate()? {
                let entry = entry?;
                let kind = if entry.is_file { "f" } else { "d" };
                println!("{} {}", kind, entry.name);
            }
        }
        Commands::Size { part } => {
            println!("{}", open(&part).calculate_total_size_on_disk()?);
        }
        Commands::Version { part } => {
            let mut out = std::io::stdout();
            open(&part).load_version_metadata()?.write(&mut out)?;
        }
        Commands::Check { part } => {
            let storage = open(&part);
            let checksums = storage.read_checksums()?;
            storage.check_consistency(&checksums)?;
            println!("{}: {} files OK", part, checksums.len());
        }
        Commands::Remove { part } => {
            let storage = open(&part);
            let checksums = match storage.read_checksums() {
                Ok(checksums) => checksums,
                Err(e) => {
                    tracing::warn!("Cannot read checksums of {}, removing recursively: {}", part, e);
                    Checksums::new()
                }
            };
            let outcome = storage.remove(true, &Default::default(), &checksums, &[])?;
            if outcome == RemovalOutcome::AlreadyGone {
                tracing::info!("Part {} was already removed", part);
            }
        }
        Commands::Freeze { part, to } => {
            let frozen = open(&part).freeze(&to, &part, false, None, false)?;
            println!("{}", frozen.full_path().display());
        }
    }

    Ok(())
}
