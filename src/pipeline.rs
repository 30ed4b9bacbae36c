use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::config::Settings;
use crate::db::{self, Barangay, CityMunicipality, Level, Province, Record, Region};
use crate::error::StageError;
use crate::fetch::Fetcher;
use crate::stage::StageRunner;
use crate::urls::Catalog;
use crate::validate;

/// Where the coordinator is in the fixed Region → Barangay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Regions,
    Provinces,
    CityMuni,
    Barangays,
    Done,
}

impl Stage {
    pub fn starting_at(level: Level) -> Stage {
        match level {
            Level::Region => Stage::Regions,
            Level::Province => Stage::Provinces,
            Level::CityMunicipality => Stage::CityMuni,
            Level::Barangay => Stage::Barangays,
        }
    }

    pub fn level(self) -> Option<Level> {
        match self {
            Stage::Regions => Some(Level::Region),
            Stage::Provinces => Some(Level::Province),
            Stage::CityMuni => Some(Level::CityMunicipality),
            Stage::Barangays => Some(Level::Barangay),
            Stage::Done => None,
        }
    }

    pub fn next(self) -> Stage {
        match self {
            Stage::Regions => Stage::Provinces,
            Stage::Provinces => Stage::CityMuni,
            Stage::CityMuni => Stage::Barangays,
            Stage::Barangays | Stage::Done => Stage::Done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub level: Level,
    pub records: usize,
}

/// Runs stages in order, each one reading its input from the store the
/// previous one committed.
pub struct Pipeline<F> {
    runner: StageRunner<F>,
    conn: Connection,
    validate: bool,
}

impl<F: Fetcher> Pipeline<F> {
    pub fn new(fetcher: Arc<F>, conn: Connection, settings: &Settings) -> Self {
        Pipeline {
            runner: StageRunner::new(fetcher, Catalog::new(&settings.base_url), settings),
            conn,
            validate: settings.validate_references,
        }
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run from `from` through the barangay stage. Stops at the first failing
    /// stage; later stages are not started.
    pub async fn run(&self, from: Level) -> Result<Vec<StageReport>> {
        let mut stage = Stage::starting_at(from);
        let mut reports = Vec::new();
        while let Some(level) = stage.level() {
            let records = self
                .run_stage(level)
                .await
                .with_context(|| format!("{} stage failed", level))?;
            reports.push(StageReport { level, records });
            stage = stage.next();
        }
        Ok(reports)
    }

    /// Crawl one level and commit its snapshot. Nothing is written if the
    /// crawl or the checks fail.
    pub async fn run_stage(&self, level: Level) -> Result<usize> {
        let t0 = Instant::now();
        let saved = match level {
            Level::Region => {
                let regions = self.runner.regions().await?;
                self.commit(&regions)?
            }
            Level::Province => {
                let regions: Vec<Region> = self.parents(level)?;
                let provinces = self.runner.provinces(&regions).await?;
                self.check_lineage(&provinces, &regions)?;
                self.commit(&provinces)?
            }
            Level::CityMunicipality => {
                let provinces: Vec<Province> = self.parents(level)?;
                let towns = self.runner.citimuni(&provinces).await?;
                self.check_lineage(&towns, &provinces)?;
                self.commit(&towns)?
            }
            Level::Barangay => {
                let towns: Vec<CityMunicipality> = self.parents(level)?;
                let barangays: Vec<Barangay> = self.runner.barangays(&towns).await?;
                self.check_lineage(&barangays, &towns)?;
                self.commit(&barangays)?
            }
        };
        info!(
            "{} stage: saved {} records in {:.1}s",
            level,
            saved,
            t0.elapsed().as_secs_f64()
        );
        Ok(saved)
    }

    /// Load the parent level's snapshot; a level that never completed is an
    /// error, not an empty input.
    fn parents<P: Record>(&self, level: Level) -> Result<Vec<P>> {
        debug_assert_eq!(level.parent(), Some(P::LEVEL));
        if db::stage_run(&self.conn, P::LEVEL)?.is_none() {
            return Err(StageError::MissingInput {
                level,
                parent_level: P::LEVEL,
            }
            .into());
        }
        db::load(&self.conn)
    }

    fn check_lineage<C: Record, P: Record>(&self, children: &[C], parents: &[P]) -> Result<(), StageError> {
        if self.validate {
            validate::lineage(children, parents)?;
        }
        Ok(())
    }

    fn commit<R: Record>(&self, records: &[R]) -> Result<usize> {
        if self.validate {
            validate::unique_codes(records)?;
        }
        db::save(&self.conn, records)
    }
}
