//! `relocus` – command line front end for the localization core.
//!
//! ```text
//! relocus replay <script.jsonl>   feed a JSON-lines script through a coordinator
//! relocus config                  print the effective configuration
//! relocus config init             write the defaults to ~/.relocus/config.toml
//! ```
//!
//! Emitted events go to stdout as one JSON object per line; diagnostics go
//! to stderr.

mod config;
mod replay;
mod script;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::replay::Replayer;

#[derive(Parser)]
#[command(name = "relocus")]
#[command(about = "Replay odometry and landmark observations through a localization coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON-lines script through a coordinator
    Replay {
        /// Script file, one command per line
        path: PathBuf,
    },

    /// Print the effective configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the defaults to ~/.relocus/config.toml
    Init,
}

fn main() -> ExitCode {
    let _telemetry = relocus_runtime::init_tracing("relocus");

    let cli = Cli::parse();
    match cli.command {
        Commands::Replay { path } => cmd_replay(&path),
        Commands::Config { command: None } => cmd_config_show(),
        Commands::Config {
            command: Some(ConfigCommands::Init),
        } => cmd_config_init(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_replay(path: &Path) -> ExitCode {
    let cfg = match config::load_or_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("{}: {}: {}", "Cannot read script".red(), path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let commands = match script::parse_script(&text) {
        Ok(commands) => commands,
        Err(e) => {
            eprintln!("{}: {}", "Script error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    info!(path = %path.display(), commands = commands.len(), "replaying script");
    let mut replayer = Replayer::new(cfg.coordinator.clone(), &cfg.event_source);
    let mut failures = 0usize;
    for (line, command) in &commands {
        match replayer.apply(command) {
            Ok(events) => {
                for event in events {
                    match serde_json::to_string(&event) {
                        Ok(json) => println!("{json}"),
                        Err(e) => warn!(error = %e, "failed to serialize event"),
                    }
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} line {}: {}", "✗".red().bold(), line, e);
            }
        }
    }

    print_summary(&replayer, cfg.history_dump_depth, failures);
    ExitCode::SUCCESS
}

fn cmd_config_show() -> ExitCode {
    match config::load_or_default() {
        Ok(cfg) => {
            eprintln!("  Config path: {}", config::config_path().display().to_string().bold());
            match toml::to_string_pretty(&cfg) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}: {}", "Failed to render config".red(), e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_config_init() -> ExitCode {
    match config::load() {
        Ok(Some(_)) => {
            eprintln!(
                "  Config already exists at {}",
                config::config_path().display().to_string().bold()
            );
            return ExitCode::SUCCESS;
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    }
    match config::save(&config::Config::default()) {
        Ok(()) => {
            eprintln!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_summary(replayer: &Replayer, dump_depth: usize, failures: usize) {
    let coord = replayer.coordinator();
    let pose = coord.pose();
    eprintln!();
    eprintln!("  {}", "Replay finished".bold());
    eprintln!("    state        {:?}", coord.state());
    eprintln!("    world origin {}", coord.world_origin());
    eprintln!("    frame epoch  {}", coord.frame_epoch());
    eprintln!(
        "    pose         ({:.1}, {:.1}, {:.1}) @ {:.3} rad",
        pose.translation().x,
        pose.translation().y,
        pose.translation().z,
        pose.heading()
    );
    if failures > 0 {
        eprintln!("    {}", format!("{failures} command(s) failed").yellow());
    } else {
        eprintln!("    {}", "all commands succeeded".green());
    }
    eprintln!();
    eprint!("{}", coord.history().dump(dump_depth).dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_replay_and_config_subcommands() {
        let cli = Cli::try_parse_from(["relocus", "replay", "run.jsonl"]).unwrap();
        assert!(matches!(cli.command, Commands::Replay { path } if path == PathBuf::from("run.jsonl")));

        let cli = Cli::try_parse_from(["relocus", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { command: None }));

        let cli = Cli::try_parse_from(["relocus", "config", "init"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: Some(ConfigCommands::Init)
            }
        ));
    }

    #[test]
    fn replay_requires_a_script_path() {
        assert!(Cli::try_parse_from(["relocus", "replay"]).is_err());
        assert!(Cli::try_parse_from(["relocus", "teleport"]).is_err());
    }
}
