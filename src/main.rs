#![cfg(feature = "cli")]
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser};
use log::{error, info};

use psshscan::{find_pssh_boxes, PsshBox};

#[derive(Parser)]
#[command(name = "psshscan", version, disable_version_flag = true, about = "Find PSSH boxes in MP4 files")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// Stop after the first PSSH box.
    #[arg(short = 'f', long = "first", action = ArgAction::SetTrue)]
    first: bool,

    /// MP4 file to scan.
    #[arg(default_value = "sample.mp4")]
    path: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if cli.version {
        println!("psshscan {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    match run_scan(&cli.path, cli.first) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_scan(path: &Path, first: bool) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut walker = find_pssh_boxes(BufReader::new(file));

    let mut found = 0usize;
    for item in walker.by_ref() {
        let pssh = item.with_context(|| {
            format!(
                "Scan of {} failed after {} PSSH boxes",
                path.display(),
                found
            )
        })?;
        found += 1;
        print_pssh(found, &pssh)?;
        if first {
            break;
        }
    }

    info!("Scanned {} top-level boxes", walker.boxes_seen());
    if found == 0 {
        println!("No PSSH box found in {}", path.display());
    }
    Ok(())
}

fn print_pssh(index: usize, pssh: &PsshBox) -> anyhow::Result<()> {
    println!("PSSH box #{}", index);
    println!("  version: {}", pssh.version);
    println!("  flags: {:#08x}", pssh.flags);
    match pssh.known_system() {
        Some(system) => println!("  system_id: {} ({})", pssh.system_id, system.name()),
        None => println!("  system_id: {}", pssh.system_id),
    }
    for kid in pssh.key_ids.iter() {
        println!("  kid: {}", kid);
    }
    println!("  data (hex): {}", hex::encode(&pssh.data));
    println!("  pssh (base64): {}", pssh.to_base64()?);
    Ok(())
}
