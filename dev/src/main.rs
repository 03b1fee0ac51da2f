//! Manual configuration inspection tool: loads an `EngineConfig` the same
//! way `overlay_host` does (defaults -> file -> env) and prints the
//! effective values, or validates a candidate config file on its own
//! without starting anything. Grounded on the teacher's own `dev` crate
//! being a small standalone `clap` CLI alongside the main binary and test
//! driver, rather than folded into either of them.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use overlay_engine::EngineConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration (defaults merged with an optional
    /// file and environment overrides)
    ShowConfig {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Check that a config file parses and passes validation, without
    /// touching the environment
    ValidateConfig { file: PathBuf },
}

fn main() {
    let args = Args::parse();

    match args.command {
        Commands::ShowConfig { file } => show_config(file.as_deref()),
        Commands::ValidateConfig { file } => validate_config(&file),
    }
}

fn show_config(file: Option<&std::path::Path>) {
    match EngineConfig::load(file) {
        Ok(config) => print_config(&config),
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

fn validate_config(file: &std::path::Path) {
    if !file.exists() {
        eprintln!("{} {} does not exist", "error:".red().bold(), file.display());
        std::process::exit(1);
    }
    match EngineConfig::load(Some(file)) {
        Ok(config) => {
            println!("{} {}", "ok:".green().bold(), file.display());
            print_config(&config);
        }
        Err(err) => {
            eprintln!("{} {err}", "invalid:".red().bold());
            std::process::exit(1);
        }
    }
}

fn print_config(config: &EngineConfig) {
    println!("{}", "effective configuration".bold());
    println!("  shared_region_bytes     = {}", config.shared_region_bytes);
    println!("  fixup_table_capacity    = {}", config.fixup_table_capacity);
    println!("  reserved_overlay_layers = {}", config.reserved_overlay_layers);
    println!("  runtime_max_layers      = {}", config.runtime_max_layers);
    println!("  layer_budget            = {}", config.layer_budget());
    println!("  ipc_poll_period_ms      = {}", config.ipc_poll_period_ms);
    println!("  wait_frame_timeout_ms   = {}", config.wait_frame_timeout_ms);
    println!("  event_queue_capacity    = {}", config.event_queue_capacity);
    println!("  negotiation_region_name = {}", config.negotiation_region_name);
    println!("  handshake_timeout_ms    = {}", config.handshake_timeout_ms);
    println!("  log_level               = {}", config.log_level);
    println!(
        "  log_file                = {}",
        config.log_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(default)".to_string())
    );
    println!(
        "  sentry_dsn              = {}",
        if config.sentry_dsn.is_some() { "(set)" } else { "(unset)" }
    );
}
