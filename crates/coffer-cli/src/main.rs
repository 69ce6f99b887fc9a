mod app;

use anyhow::{anyhow, Result};
use app::App;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use coffer_core::paths;
use coffer_core::{EntryType, SearchFilter};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Search the encrypted Coffer vault", long_about = None)]
struct Cli {
    /// Data directory (defaults to COFFER_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep keys in memory instead of the OS keyring. Keys vanish on exit, so
    /// `add` stores fields unencrypted in this mode
    #[arg(long, global = true)]
    memory_keys: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from every module
    Rebuild,

    /// Search the index
    Search {
        query: String,
        /// Restrict to these entry types
        #[arg(short = 't', long = "type")]
        types: Vec<EntryType>,
        /// Earliest timestamp (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        from: Option<DateTime<Utc>>,
        /// Latest timestamp (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        to: Option<DateTime<Utc>>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or clear recent queries
    Recent {
        #[arg(long)]
        clear: bool,
    },

    /// Entry counts per type
    Stats,

    /// Drop every index entry
    ResetIndex,

    /// Add a record to a module and index it
    Add {
        entry_type: EntryType,
        id: String,
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,
        /// Store fields unencrypted (implied by --memory-keys)
        #[arg(long)]
        plain: bool,
    },

    /// Remove a record from a module and the index
    Remove { entry_type: EntryType, id: String },
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    day.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| anyhow!("invalid date {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    let app = App::open(&data_dir, cli.memory_keys)?;
    let service = &app.service;

    match cli.command {
        Commands::Rebuild => {
            let report = service.spawn_rebuild().await?;
            service.index().flush().await;
            for failed in report.failed_sources() {
                eprintln!(
                    "{}: {}",
                    failed.source,
                    failed.error.as_deref().unwrap_or("failed")
                );
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Search {
            query,
            types,
            from,
            to,
            json,
        } => {
            let mut filter = SearchFilter::default();
            if !types.is_empty() {
                filter = filter.with_types(types);
            }
            if let Some(from) = from {
                filter = filter.from(from);
            }
            if let Some(to) = to {
                filter = filter.until(to);
            }
            let results = service.search(&query, &filter);
            service.record_query(&query)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("no results");
            } else {
                for r in &results {
                    println!("{:>4}  [{}] {}  {}", r.relevance, r.entry_type, r.title, r.id);
                    if !r.preview.is_empty() {
                        println!("        {}", r.preview);
                    }
                }
            }
        }

        Commands::Recent { clear } => {
            if clear {
                service.clear_recent_queries()?;
            } else {
                for query in service.recent_queries() {
                    println!("{query}");
                }
            }
        }

        Commands::Stats => {
            for (entry_type, count) in service.stats() {
                println!("{entry_type:<12} {count}");
            }
        }

        Commands::ResetIndex => {
            service.reset_index();
            service.index().flush().await;
            info!("index cleared");
        }

        Commands::Add {
            entry_type,
            id,
            title,
            content,
            keywords,
            plain,
        } => {
            app.add_record(entry_type, id, title, content, keywords, plain)?;
            let report = service.spawn_rebuild().await?;
            service.index().flush().await;
            info!(indexed = report.indexed, "record added");
        }

        Commands::Remove { entry_type, id } => {
            if !app.remove_record(entry_type, &id)? {
                return Err(anyhow!("no {entry_type} with id {id}"));
            }
            service.index().flush().await;
            info!("record removed");
        }
    }

    Ok(())
}
