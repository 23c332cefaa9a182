//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ragbus",
    version,
    about = "RPC-over-AMQP retrieval-augmented query service",
    long_about = "Ragbus serves search, recommendation and quiz-generation requests over \
                  RabbitMQ, backed by a Qdrant vector index and a llama.cpp completion \
                  server. It also ships the offline CSV indexer and a thin RPC client for \
                  exercising a running service."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ragbus/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the query service: consume RPC requests from the broker
    Serve,

    /// Index CSV article dumps into the vector collection
    Index {
        /// CSV file or directory (defaults to indexer.input_dir from config)
        input: Option<PathBuf>,
    },

    /// Send a search request to a running service
    Search {
        /// Search query text
        query: String,

        /// Filter by author
        #[arg(short, long)]
        author: Option<String>,

        /// Filter by publication date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,

        /// Filter by topic
        #[arg(short, long)]
        topic: Option<String>,
    },

    /// Ask a running service for articles similar to a URL
    Recommend {
        /// Seed article URL
        url: String,

        /// Number of recommendations to return
        #[arg(short = 'n', long, default_value = "5")]
        top_k: usize,
    },

    /// Ask a running service to generate a quiz from article URLs
    Quiz {
        /// Article URLs to build the quiz from
        #[arg(required = true)]
        urls: Vec<String>,

        /// Number of questions to generate
        #[arg(short = 'n', long, default_value = "8")]
        n_questions: usize,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
