use std::process::ExitCode;

use clap::Parser;
use tally::{
    config::{CliArgs, Config, LoggingConfig},
    schema_tool,
};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            match std::error::Error::source(&e) {
                Some(source) => eprintln!("Error: {}: {}", e, source),
                None => eprintln!("Error: {}", e),
            }
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);

    match schema_tool::run(&config, cli.command) {
        Ok(discrepancies) if discrepancies.is_empty() => {
            tracing::info!("schema matches the configured types");
            println!("schema is up to date");
            ExitCode::SUCCESS
        }
        Ok(discrepancies) => {
            for discrepancy in &discrepancies {
                println!("{}", discrepancy);
            }
            tracing::warn!(count = discrepancies.len(), "schema discrepancies found");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                source = ?std::error::Error::source(&e),
                "schema tool failed"
            );
            ExitCode::FAILURE
        }
    }
}
