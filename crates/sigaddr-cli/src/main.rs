use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod hex_utils;

#[derive(Parser)]
#[command(name = "sigaddr")]
#[command(about = "Resolve named addresses in a module by byte signature")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a pattern and print its packed form
    Compile {
        /// Pattern text, e.g. "E8 ?? ?? ?? ?? 48 8B"
        pattern: String,

        /// Explicit offset of the resolution field inside the pattern
        #[arg(short, long)]
        offset: Option<u32>,

        /// Name shown in the output
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Resolve every signature of a signature file
    Scan {
        /// Signature set (JSON)
        #[arg(short, long)]
        signatures: PathBuf,

        /// Raw module dump to scan instead of a live process
        #[arg(long, requires = "base", conflicts_with = "pid")]
        dump: Option<PathBuf>,

        /// Virtual address the dump was taken at (hex)
        #[arg(long)]
        base: Option<String>,

        /// Process ID to attach to
        #[arg(short, long, required_unless_present = "dump")]
        pid: Option<u32>,

        /// Address cache file, reused when valid and rewritten after the scan
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Scanner settings (TOML)
        #[arg(long, env = "SIGADDR_CONFIG")]
        config: Option<PathBuf>,

        /// Bytes read per request
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Only scan executable regions
        #[arg(long)]
        executable_only: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sigaddr=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Compile {
            pattern,
            offset,
            name,
        } => commands::compile::run(&pattern, offset, name.as_deref()),
        Command::Scan {
            signatures,
            dump,
            base,
            pid,
            cache,
            config,
            chunk_size,
            executable_only,
        } => {
            let source = match (dump, base, pid) {
                (Some(path), Some(base), _) => commands::scan::Source::Dump {
                    path,
                    base: hex_utils::parse_hex_address(&base)?,
                },
                (_, _, Some(pid)) => commands::scan::Source::Process { pid },
                _ => anyhow::bail!("Either --dump with --base or --pid is required"),
            };
            let settings = config::resolve_scanner_config(
                config.as_deref(),
                chunk_size,
                executable_only,
            )?;
            commands::scan::run(&signatures, source, cache.as_deref(), settings)
        }
    }
}
