use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::browsers::Browser;
use crate::semantic::DEFAULT_LIMIT;

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about = "Semantic search over your browser bookmarks", long_about = None)]
pub struct Args {
    /// Verbose logging, same as `debug: true` in config.yaml
    #[clap(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch bookmarked pages and add them to the collection
    Index {
        /// Only these browsers (chrome, chromium, edge, brave, opera, vivaldi, firefox, atlas, comet)
        #[clap(short, long)]
        browser: Vec<Browser>,

        /// Reprocess URLs that were already indexed
        #[clap(short, long, default_value = "false")]
        force: bool,

        /// Stop after this many URLs
        #[clap(short, long)]
        limit: Option<usize>,

        /// Simultaneous page fetches
        #[clap(short, long)]
        concurrency: Option<usize>,

        /// Hide the progress bar
        #[clap(long, default_value = "false")]
        no_progress: bool,
    },

    /// Find bookmarks by meaning
    Search {
        query: String,

        /// Maximum number of results
        #[clap(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Metadata filter as key=value, repeatable
        #[clap(short, long = "filter")]
        filters: Vec<String>,

        /// Leave distances out of the output
        #[clap(long, default_value = "false")]
        no_distances: bool,
    },

    /// Print one stored document
    Get {
        id: String,

        /// Include the stored embedding
        #[clap(long, default_value = "false")]
        vector: bool,
    },

    /// Remove documents by id
    Delete {
        #[clap(required = true)]
        ids: Vec<String>,
    },

    /// Collection and ledger statistics
    Stats {},

    /// Write the collection to a portable file
    Export { path: PathBuf },

    /// Load documents from an export file
    Import { path: PathBuf },

    /// Remove every document from the collection
    Clear {
        /// Skip confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Delete the collection directory
    Drop {
        /// Skip confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// List detected browsers and their bookmark files
    Browsers {},

    /// Show URLs that failed to index
    Failures {},
}
