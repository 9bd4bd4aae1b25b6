pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge operator CLI",
    long_about = "Inspect effective configuration and validate runtime readiness for the concierge assistant.",
    after_help = "Examples:\n  concierge config\n  concierge doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, registry, tenant profiles, and provider readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
