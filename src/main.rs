use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use watchstore::cli::{index, info, lists, progress, search};
use watchstore::config::Config;
use watchstore::store::ShowStore;

#[derive(Parser)]
#[command(name = "watchstore")]
#[command(about = "Inspect and maintain a show and movie watch-progress database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "watchstore.yaml")]
    config: String,

    /// Database file, overriding the configured path
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show schema version, fingerprint and row counts
    Info {
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the episode full-text index
    RebuildIndex,

    /// Search episode titles and overviews
    Search {
        term: String,

        /// Only episodes of this show id
        #[arg(long)]
        show: Option<i64>,

        /// Only episodes of this season number
        #[arg(long)]
        season: Option<i64>,

        /// Only unwatched episodes
        #[arg(long)]
        unwatched: bool,

        #[arg(long)]
        json: bool,
    },

    /// Suggest episode titles starting with a term
    Suggest {
        term: String,

        #[arg(long)]
        json: bool,
    },

    /// Show lists, or the items of one list
    Lists {
        /// List id
        #[arg(short, long)]
        list: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Watch progress of a show
    Progress {
        show_id: i64,

        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config)?;
    init_logging(&config.logging.level);

    let db_path = cli.database.unwrap_or_else(|| config.database_path());
    let store = ShowStore::open(&db_path, &config)
        .with_context(|| format!("opening {}", db_path.display()))?;

    match cli.command {
        Commands::Info { json } => {
            info::run(&store, &db_path, json)?;
        }
        Commands::RebuildIndex => {
            index::run(&store)?;
        }
        Commands::Search {
            term,
            show,
            season,
            unwatched,
            json,
        } => {
            let filter = search::filter_from_args(show, season, unwatched);
            search::run(&store, &term, filter.as_ref(), json)?;
        }
        Commands::Suggest { term, json } => {
            search::suggest(&store, &term, json)?;
        }
        Commands::Lists { list, json } => match list {
            Some(list_id) => lists::items(&store, &list_id, json)?,
            None => lists::run(&store, json)?,
        },
        Commands::Progress { show_id, json } => {
            progress::run(&store, show_id, json)?;
        }
    }

    Ok(())
}
