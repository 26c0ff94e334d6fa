//! Auxiliary blocker process.
//!
//! Copied by the harness into fixture trees and launched to simulate a
//! file that is locked or in use while the update client runs. With
//! `--hold` it keeps an open handle on the given file; with `--spin` it
//! burns CPU instead of sleeping. Either way it exits on its own once the
//! duration elapses, so a crashed harness cannot leak it forever.

#![forbid(unsafe_code)]

use std::fs::File;
use std::time::{Duration, Instant};

use clap::Parser;

#[derive(Parser)]
#[command(name = "uth-blocker")]
#[command(author, version, about = "File blocker for update-client scenarios")]
struct Cli {
    /// Keep an open handle on this file for the whole run
    #[arg(long)]
    hold: Option<std::path::PathBuf>,

    /// How long to keep running
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Busy-loop instead of sleeping
    #[arg(long)]
    spin: bool,
}

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    // The handle stays open until the process exits.
    let _held = match &cli.hold {
        Some(path) => Some(File::open(path)?),
        None => None,
    };

    let deadline = Instant::now() + cli.duration;
    if cli.spin {
        let mut x = 0u64;
        while Instant::now() < deadline {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            std::hint::black_box(x);
        }
    } else {
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(500)));
        }
    }
    Ok(())
}
