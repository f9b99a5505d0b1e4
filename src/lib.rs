//
// lib.rs
// xnat2bids-launcher
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Configuration and compilation are pure; xnat, orchestrate, and sync touch the outside world.
pub mod cli;
pub mod compile;
pub mod config;
pub mod error;
pub mod launch;
pub mod layout;
pub mod models;
pub mod orchestrate;
pub mod schema;
pub mod simg;
pub mod sync;
pub mod xnat;

pub use cli::{run as run_cli, Cli};
