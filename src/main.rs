mod config;
mod db;
mod error;
mod fetch;
mod parser;
mod pipeline;
mod stage;
mod urls;
mod validate;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

use crate::config::Settings;
use crate::db::{Barangay, CityMunicipality, Level, Province, Record, Region};
use crate::fetch::HttpFetcher;
use crate::parser::cells::parse_count;
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "psgc_scraper", about = "Philippine Standard Geographic Code crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite file holding the stage snapshots (overrides PSGC_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Parent pages fetched at once within a stage
    #[arg(short = 'c', long, global = true)]
    concurrency: Option<usize>,

    /// Page ceiling for one barangay listing
    #[arg(long, global = true)]
    max_pages: Option<usize>,

    /// Skip duplicate-code and parent-code checks before saving
    #[arg(long, global = true)]
    no_validate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every level in order, regions to barangays
    Run {
        /// Start from this level, reusing the stored snapshots above it
        #[arg(long, value_enum, default_value = "regions")]
        from: Level,
    },
    /// Crawl a single level from the stored snapshot of its parent
    Stage {
        #[arg(value_enum)]
        level: Level,
    },
    /// Write stored snapshots as JSON arrays
    Export {
        /// Only this level (default: all)
        #[arg(short, long, value_enum)]
        level: Option<Level>,
        /// Output directory
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
    /// Show stage runs and totals
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = settings(&cli)?;

    let result = match cli.command {
        Commands::Run { from } => {
            let pipeline = open_pipeline(&settings)?;
            let reports = pipeline.run(from).await?;
            for r in &reports {
                println!("{:<10} {:>8} records", r.level, r.records);
            }
            Ok(())
        }
        Commands::Stage { level } => {
            let pipeline = open_pipeline(&settings)?;
            let saved = pipeline
                .run_stage(level)
                .await
                .with_context(|| format!("{} stage failed", level))?;
            println!("Saved {} {}.", saved, level);
            Ok(())
        }
        Commands::Export { level, out } => {
            let conn = open_store(&settings.db_path)?;
            fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let levels = level.map(|l| vec![l]).unwrap_or_else(|| Level::ALL.to_vec());
            for level in levels {
                let (path, written) = match level {
                    Level::Region => export::<Region>(&conn, &out)?,
                    Level::Province => export::<Province>(&conn, &out)?,
                    Level::CityMunicipality => export::<CityMunicipality>(&conn, &out)?,
                    Level::Barangay => export::<Barangay>(&conn, &out)?,
                };
                println!("Wrote {} {} to {}", written, level, path.display());
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = open_store(&settings.db_path)?;
            print_stats(&conn)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Environment and defaults first, then whatever the command line overrides.
fn settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load()?;
    if let Some(db) = &cli.db {
        settings.db_path = db.clone();
    }
    if let Some(n) = cli.concurrency {
        settings.concurrency = n;
    }
    if let Some(n) = cli.max_pages {
        settings.max_pages = n;
    }
    if cli.no_validate {
        settings.validate_references = false;
    }
    Ok(settings)
}

fn open_store(path: &Path) -> anyhow::Result<Connection> {
    let conn = db::connect(path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn open_pipeline(settings: &Settings) -> anyhow::Result<Pipeline<HttpFetcher>> {
    let conn = open_store(&settings.db_path)?;
    let fetcher = HttpFetcher::new(settings).context("Failed to build HTTP client")?;
    Ok(Pipeline::new(Arc::new(fetcher), conn, settings))
}

fn export<R: Record + Serialize>(conn: &Connection, dir: &Path) -> anyhow::Result<(PathBuf, usize)> {
    let records = db::load::<R>(conn)?;
    let path = dir.join(format!("{}.json", R::LEVEL.table()));
    let json = serde_json::to_string_pretty(&records)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok((path, records.len()))
}

fn print_stats(conn: &Connection) -> anyhow::Result<()> {
    println!("{:<10} | {:>8} | {}", "Level", "Records", "Completed");
    println!("{}", "-".repeat(48));
    for level in Level::ALL {
        match db::stage_run(conn, level)? {
            Some(run) => println!("{:<10} | {:>8} | {}", run.level, run.records, run.completed_at),
            None => println!("{:<10} | {:>8} | never", level, "-"),
        }
    }

    let regions = db::load::<Region>(conn)?;
    if regions.is_empty() {
        return Ok(());
    }

    let mut population = 0u64;
    let mut barangays = 0u64;
    let mut unreadable = 0usize;
    for r in &regions {
        match (parse_count(&r.stats.population), parse_count(&r.stats.barangays)) {
            (Ok(p), Ok(b)) => {
                population += p;
                barangays += b;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Region {} ({}): {}", r.code, r.name, e);
                unreadable += 1;
            }
        }
    }

    println!("\nPopulation (per region pages): {}", population);
    println!("Barangays (per region pages):  {}", barangays);
    let stored = db::stage_run(conn, Level::Barangay)?.map(|run| run.records);
    if let Some(stored) = stored {
        if unreadable == 0 && stored as u64 != barangays {
            warn!(
                "Stored {} barangays but region pages report {}",
                stored, barangays
            );
        }
    }
    if unreadable > 0 {
        println!("{} regions with unreadable counts (see warnings)", unreadable);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn export_writes_nested_feed_records() {
        let conn = memory();
        let provinces = vec![fixtures::province("012800000", "010000000")];
        let barangays = vec![fixtures::barangay("012801001", "010000000", "012800000", "012801000")];
        db::save(&conn, &provinces).unwrap();
        db::save(&conn, &barangays).unwrap();

        let dir = std::env::temp_dir().join(format!("psgc_export_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let (path, written) = export::<Province>(&conn, &dir).unwrap();
        assert_eq!(written, 1);
        assert_eq!(path, dir.join("provinces.json"));
        let (barangay_path, _) = export::<Barangay>(&conn, &dir).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let province = &json[0];
        assert_eq!(province["stats"]["population"], "609,588");
        assert!(province.get("population").is_none());
        assert_eq!(province["url"]["citimuni"], "http://psgc.test/?q=psgc/citimuni/012800000");

        let text = fs::read_to_string(&barangay_path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json[0]["type"], "Rural");
        assert_eq!(json[0]["stats"]["population"], "1,113");
        assert_eq!(json[0]["url"]["barangays"], "http://psgc.test/?q=psgc/barangays/012801001");
        let read_back: Vec<Barangay> = serde_json::from_str(&text).unwrap();
        assert_eq!(read_back, barangays);

        fs::remove_dir_all(&dir).unwrap();
    }
}
