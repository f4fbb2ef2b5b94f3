//! RegionStore CLI Client
//!
//! Command-line interface for interacting with a RegionStore server.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use regionstore::{Client, RegionId, Result};

/// RegionStore CLI
#[derive(Parser, Debug)]
#[command(name = "regionstore-cli")]
#[command(about = "CLI for the RegionStore storage target")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    server: String,

    /// Largest payload sent inline; larger ones use bulk transfer
    #[arg(long)]
    eager_threshold: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a region and print its id
    Create {
        /// Region size in bytes
        size: u64,
    },

    /// Write a string into a region
    Write {
        /// Region id (32 hex characters)
        region: RegionId,

        /// Byte offset within the region
        offset: u64,

        /// The data to write
        data: String,

        /// Persist the written range
        #[arg(short, long)]
        persist: bool,
    },

    /// Create a region holding a string and print its id
    Put {
        /// The data to store
        data: String,

        /// Persist the region
        #[arg(short, long)]
        persist: bool,
    },

    /// Read bytes from a region
    Read {
        region: RegionId,
        offset: u64,
        size: u64,
    },

    /// Make a range of a region durable
    Persist {
        region: RegionId,
        offset: u64,
        size: u64,
    },

    /// Erase a region
    Erase { region: RegionId },

    /// Print the provider configuration
    Config,
}

fn run(args: Args) -> Result<()> {
    let client = Client::connect(&args.server)?;
    let target = client.target();
    if let Some(bytes) = args.eager_threshold {
        target.set_eager_write_threshold(bytes);
        target.set_eager_read_threshold(bytes);
    }

    match args.command {
        Commands::Create { size } => println!("{}", target.create(size)?),
        Commands::Write { region, offset, data, persist } => {
            target.write(&region, offset, data.as_bytes(), persist)?;
            println!("OK");
        }
        Commands::Put { data, persist } => {
            println!("{}", target.create_and_write(data.as_bytes(), persist)?);
        }
        Commands::Read { region, offset, size } => {
            let data = target.read(&region, offset, size)?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        Commands::Persist { region, offset, size } => {
            target.persist(&region, offset, size)?;
            println!("OK");
        }
        Commands::Erase { region } => {
            target.erase(&region)?;
            println!("OK");
        }
        Commands::Config => println!("{}", target.get_config()?),
    }
    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
