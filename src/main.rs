use clap::Parser;
use tracing_subscriber::EnvFilter;

mod browsers;
mod cli;
mod config;
mod ingest;
mod lock;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;

use cli::Command;
use config::Config;
use ingest::CancelToken;

/// Logs go to stderr so JSON on stdout stays machine-readable.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let mut config = Config::load()?;
    init_logging(args.debug || config.debug);
    for (level, message) in config.take_notices() {
        log::log!(level, "{}", message);
    }
    log::debug!("Using base directory {}", config.base_path().display());

    match args.command {
        Command::Index {
            browser,
            force,
            limit,
            concurrency,
            no_progress,
        } => {
            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                log::info!("Received shutdown signal, finishing the current batch");
                handler_token.cancel();
            })?;
            cli::handle_index(&config, browser, force, limit, concurrency, no_progress, cancel)
        }
        Command::Search {
            query,
            limit,
            filters,
            no_distances,
        } => cli::handle_search(&config, &query, limit, &filters, no_distances),
        Command::Get { id, vector } => cli::handle_get(&config, &id, vector),
        Command::Delete { ids } => cli::handle_delete(&config, &ids),
        Command::Stats {} => cli::handle_stats(&config),
        Command::Export { path } => cli::handle_export(&config, &path),
        Command::Import { path } => cli::handle_import(&config, &path),
        Command::Clear { yes } => cli::handle_clear(&config, yes),
        Command::Drop { yes } => cli::handle_drop(&config, yes),
        Command::Browsers {} => cli::handle_browsers(&config),
        Command::Failures {} => cli::handle_failures(&config),
    }
}
