//
// main.rs
// xnat2bids-launcher
//
// Tokio entry point that hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use std::process::ExitCode;

use xnat2bids_launcher::cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Submissions are I/O bound child processes; a single-threaded runtime is enough.
    cli::run().await
}
