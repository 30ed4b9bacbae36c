use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use scraper::Html;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::Settings;
use crate::db::{Barangay, CityMunicipality, Level, Province, Region};
use crate::error::{ExtractError, StageError};
use crate::fetch::{FetchedPage, Fetcher};
use crate::parser::extract::{barangays, citimuni, provinces, regions, BarangayEntry};
use crate::urls::{self, Catalog};

/// Crawls one administrative level at a time from the records of the level
/// above it.
pub struct StageRunner<F> {
    fetcher: Arc<F>,
    catalog: Arc<Catalog>,
    concurrency: usize,
    max_pages: usize,
}

impl<F: Fetcher> StageRunner<F> {
    pub fn new(fetcher: Arc<F>, catalog: Catalog, settings: &Settings) -> Self {
        StageRunner {
            fetcher,
            catalog: Arc::new(catalog),
            concurrency: settings.concurrency.max(1),
            max_pages: settings.max_pages.max(1),
        }
    }

    pub async fn regions(&self) -> Result<Vec<Region>, StageError> {
        let level = Level::Region;
        let url = self.catalog.seed();
        info!("{} stage: {}", level, url);
        let page = fetch(&*self.fetcher, level, "seed", 0, &url).await?;
        let entries = parse(level, "seed", 0, &page, regions::extract)?;
        Ok(entries
            .into_iter()
            .map(|e| Region {
                urls: self.catalog.children(&e.code),
                code: e.code,
                name: e.name,
                stats: e.stats,
            })
            .collect())
    }

    pub async fn provinces(&self, regions: &[Region]) -> Result<Vec<Province>, StageError> {
        let jobs: Vec<_> = regions
            .iter()
            .map(|region| {
                provinces_of(
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.catalog),
                    region.code.clone(),
                    region.urls.provinces.clone(),
                )
            })
            .collect();
        fan_out(Level::Province, jobs, self.concurrency).await
    }

    /// Follows each province's `citimuni` listing, not its `provinces` one.
    pub async fn citimuni(&self, provinces: &[Province]) -> Result<Vec<CityMunicipality>, StageError> {
        let jobs: Vec<_> = provinces
            .iter()
            .map(|province| {
                citimuni_of(
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.catalog),
                    province.clone(),
                )
            })
            .collect();
        fan_out(Level::CityMunicipality, jobs, self.concurrency).await
    }

    pub async fn barangays(&self, towns: &[CityMunicipality]) -> Result<Vec<Barangay>, StageError> {
        let jobs: Vec<_> = towns
            .iter()
            .map(|town| {
                barangays_of(
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.catalog),
                    town.clone(),
                    self.max_pages,
                )
            })
            .collect();
        fan_out(Level::Barangay, jobs, self.concurrency).await
    }
}

async fn provinces_of<F: Fetcher>(
    fetcher: Arc<F>,
    catalog: Arc<Catalog>,
    region_code: String,
    url: String,
) -> Result<Vec<Province>, StageError> {
    let level = Level::Province;
    let page = fetch(&*fetcher, level, &region_code, 0, &url).await?;
    let entries = parse(level, &region_code, 0, &page, provinces::extract)?;
    Ok(entries
        .into_iter()
        .map(|e| Province {
            urls: catalog.children(&e.code),
            code: e.code,
            name: e.name,
            region_code: region_code.clone(),
            info: e.info,
            income_class: e.income_class,
            population: e.population,
        })
        .collect())
}

async fn citimuni_of<F: Fetcher>(
    fetcher: Arc<F>,
    catalog: Arc<Catalog>,
    province: Province,
) -> Result<Vec<CityMunicipality>, StageError> {
    let level = Level::CityMunicipality;
    let page = fetch(&*fetcher, level, &province.code, 0, &province.urls.citimuni).await?;
    let entries = parse(level, &province.code, 0, &page, citimuni::extract)?;
    Ok(entries
        .into_iter()
        .map(|e| CityMunicipality {
            urls: catalog.children(&e.code),
            code: e.code,
            name: e.name,
            region_code: province.region_code.clone(),
            province_code: province.code.clone(),
            income_class: e.income_class,
            population: e.population,
        })
        .collect())
}

async fn barangays_of<F: Fetcher>(
    fetcher: Arc<F>,
    catalog: Arc<Catalog>,
    town: CityMunicipality,
    max_pages: usize,
) -> Result<Vec<Barangay>, StageError> {
    let entries = paginate(&*fetcher, &town.urls.barangays, &town.code, max_pages).await?;
    Ok(entries
        .into_iter()
        .map(|e| Barangay {
            urls: catalog.children(&e.code),
            code: e.code,
            name: e.name,
            region_code: town.region_code.clone(),
            province_code: town.province_code.clone(),
            citimuni_code: town.code.clone(),
            kind: e.kind,
            population: e.population,
        })
        .collect())
}

async fn fetch<F: Fetcher>(
    fetcher: &F,
    level: Level,
    parent: &str,
    page: usize,
    url: &str,
) -> Result<FetchedPage, StageError> {
    fetcher
        .fetch(url)
        .await
        .map_err(|source| StageError::Transport {
            level,
            parent: parent.to_string(),
            page,
            source,
        })
}

/// Parse a fetched page. The document lives only inside this call.
fn parse<T>(
    level: Level,
    parent: &str,
    page_no: usize,
    page: &FetchedPage,
    extract: fn(&Html) -> Result<T, ExtractError>,
) -> Result<T, StageError> {
    let doc = page.document();
    extract(&doc).map_err(|source| StageError::Extract {
        level,
        parent: parent.to_string(),
        page: page_no,
        url: page.url.clone(),
        source,
    })
}

/// Walk one barangay listing to its last page.
///
/// Pages are fetched strictly one after another. The chain stops with an
/// error if a next link points back at a page already fetched, or if it
/// runs past `max_pages`.
async fn paginate<F: Fetcher>(
    fetcher: &F,
    first_url: &str,
    parent: &str,
    max_pages: usize,
) -> Result<Vec<BarangayEntry>, StageError> {
    let level = Level::Barangay;
    let mut visited = HashSet::from([first_url.to_string()]);
    let mut url = first_url.to_string();
    let mut entries = Vec::new();
    let mut fetched = 0;

    loop {
        let page = fetch(fetcher, level, parent, fetched, &url).await?;
        let parsed = parse(level, parent, fetched, &page, barangays::extract)?;
        fetched += 1;
        entries.extend(parsed.entries);

        let Some(href) = parsed.next else {
            debug!(parent, pages = fetched, rows = entries.len(), "pagination done");
            return Ok(entries);
        };
        let next = urls::resolve(&page.url, &href).ok_or_else(|| StageError::BadLink {
            level,
            parent: parent.to_string(),
            base: page.url.clone(),
            href: href.clone(),
        })?;
        if !visited.insert(next.clone()) {
            return Err(StageError::PaginationLoop {
                level,
                parent: parent.to_string(),
                url: next,
            });
        }
        if fetched >= max_pages {
            return Err(StageError::PageLimit {
                level,
                parent: parent.to_string(),
                limit: max_pages,
            });
        }
        url = next;
    }
}

/// Run one job per parent record, at most `concurrency` at a time, and
/// concatenate the results in job order whatever order they finish in.
///
/// The first failure aborts every job still running.
async fn fan_out<T, Fut>(
    level: Level,
    jobs: Vec<Fut>,
    concurrency: usize,
) -> Result<Vec<T>, StageError>
where
    T: Send + 'static,
    Fut: Future<Output = Result<Vec<T>, StageError>> + Send + 'static,
{
    let total = jobs.len();
    info!("{} stage: {} parents, {} at a time", level, total, concurrency);

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut set = JoinSet::new();
    for (index, job) in jobs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (index, job.await)
        });
    }

    let pb = progress_bar(level, total);
    let mut slots: Vec<Option<Vec<T>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (index, result) = joined.map_err(|e| StageError::Worker {
            level,
            message: e.to_string(),
        })?;
        match result {
            Ok(records) => {
                slots[index] = Some(records);
                pb.inc(1);
            }
            Err(e) => {
                set.abort_all();
                pb.abandon();
                return Err(e);
            }
        }
    }
    pb.finish_and_clear();

    Ok(slots.into_iter().flatten().flatten().collect())
}

fn progress_bar(level: Level, total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{prefix:>10} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    pb.set_style(style);
    pb.set_prefix(level.table());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use crate::error::FetchError;
    use crate::fetch::testing::StaticSite;
    use crate::parser::fixtures::{listing, page, region_table, summary_table};

    const BASE: &str = "http://psgc.test";

    fn runner(site: &Arc<StaticSite>, concurrency: usize, max_pages: usize) -> StageRunner<StaticSite> {
        let settings = Settings {
            concurrency,
            max_pages,
            ..Settings::default()
        };
        StageRunner::new(Arc::clone(site), Catalog::new(BASE), &settings)
    }

    fn listing_page(rows: &[Vec<String>], next: Option<&str>) -> String {
        let refs: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(String::as_str).collect())
            .collect();
        let slices: Vec<&[&str]> = refs.iter().map(Vec::as_slice).collect();
        page(&[summary_table("0"), listing(&slices)], next)
    }

    fn barangay_rows(parent: &str, start: usize, n: usize) -> Vec<Vec<String>> {
        (start..start + n)
            .map(|i| {
                vec![
                    format!("Barangay {}", i),
                    format!("{}-{:03}", parent, i),
                    "Rural".to_string(),
                    "1,000".to_string(),
                ]
            })
            .collect()
    }

    fn town(code: &str) -> CityMunicipality {
        fixtures::citimuni(code, "010000000", "012800000")
    }

    fn barangay_url(code: &str) -> String {
        format!("{}/?q=psgc/barangays/{}", BASE, code)
    }

    #[tokio::test]
    async fn regions_get_child_urls_from_catalog() {
        let html = page(
            &[region_table("Region I", "010000000", ["4", "9", "116", "3,265", "5,301,139"])],
            None,
        );
        let site = Arc::new(StaticSite::new().page(format!("{}/?q=psgc/regions", BASE), html));
        let regions = runner(&site, 1, 10).regions().await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].urls, fixtures::urls("010000000"));
    }

    #[tokio::test]
    async fn provinces_take_region_code_from_parent() {
        let region = fixtures::region("010000000");
        let html = listing_page(
            &[vec![
                "Ilocos Norte".into(),
                "012800000".into(),
                "Prov".into(),
                "609,588".into(),
            ]],
            None,
        );
        let site = Arc::new(StaticSite::new().page(region.urls.provinces.clone(), html));
        let provinces = runner(&site, 2, 10).provinces(&[region]).await.unwrap();
        assert_eq!(provinces.len(), 1);
        assert_eq!(provinces[0].region_code, "010000000");
        assert_eq!(provinces[0].income_class, "");
        assert_eq!(provinces[0].urls, fixtures::urls("012800000"));
    }

    #[tokio::test]
    async fn output_follows_parent_order_not_completion_order() {
        let slow = fixtures::region("010000000");
        let fast = fixtures::region("020000000");
        let row = |code: &str| vec![format!("P{}", code), code.to_string(), "Prov".into(), "1".into()];
        let site = Arc::new(
            StaticSite::new()
                .page(slow.urls.provinces.clone(), listing_page(&[row("012800000"), row("012900000")], None))
                .delay(slow.urls.provinces.clone(), 60)
                .page(fast.urls.provinces.clone(), listing_page(&[row("020900000")], None)),
        );

        let provinces = runner(&site, 2, 10).provinces(&[slow, fast]).await.unwrap();
        let codes: Vec<&str> = provinces.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, ["012800000", "012900000", "020900000"]);
    }

    #[tokio::test]
    async fn citimuni_uses_province_citimuni_listing() {
        let province = fixtures::province("012800000", "010000000");
        let html = listing_page(
            &[vec!["Adams".into(), "012801000".into(), "5th".into(), "1,785".into()]],
            None,
        );
        let site = Arc::new(StaticSite::new().page(province.urls.citimuni.clone(), html));
        let towns = runner(&site, 1, 10).citimuni(&[province]).await.unwrap();
        assert_eq!(towns.len(), 1);
        assert_eq!(towns[0].region_code, "010000000");
        assert_eq!(towns[0].province_code, "012800000");
        assert_eq!(site.hits_containing("psgc/citimuni/012800000"), 1);
        assert_eq!(site.hits_containing("psgc/provinces/"), 0);
    }

    #[tokio::test]
    async fn barangay_pagination_collects_every_page() {
        let first = barangay_url("012801000");
        let second = format!("{}&page=1", first);
        let site = Arc::new(
            StaticSite::new()
                .page(
                    first.clone(),
                    listing_page(
                        &barangay_rows("012801000", 0, 20),
                        Some("?q=psgc/barangays/012801000&amp;page=1"),
                    ),
                )
                .page(second.clone(), listing_page(&barangay_rows("012801000", 20, 5), None)),
        );

        let barangays = runner(&site, 1, 10).barangays(&[town("012801000")]).await.unwrap();
        assert_eq!(barangays.len(), 25);
        assert_eq!(site.hits(), vec![first, second]);
        assert!(barangays.iter().all(|b| b.citimuni_code == "012801000"
            && b.province_code == "012800000"
            && b.region_code == "010000000"));
        assert_eq!(barangays[24].code, "012801000-024");
    }

    #[tokio::test]
    async fn chains_for_different_towns_stay_separate() {
        let a = barangay_url("012801000");
        let b = barangay_url("012802000");
        let site = Arc::new(
            StaticSite::new()
                .page(a.clone(), listing_page(&barangay_rows("A", 0, 2), Some("?q=psgc/barangays/012801000&amp;page=1")))
                .delay(a.clone(), 30)
                .page(format!("{}&page=1", a), listing_page(&barangay_rows("A", 2, 1), None))
                .page(b.clone(), listing_page(&barangay_rows("B", 0, 3), None)),
        );

        let barangays = runner(&site, 2, 10)
            .barangays(&[town("012801000"), town("012802000")])
            .await
            .unwrap();
        let codes: Vec<&str> = barangays.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, ["A-000", "A-001", "A-002", "B-000", "B-001", "B-002"]);
        assert_eq!(barangays[2].citimuni_code, "012801000");
        assert_eq!(barangays[3].citimuni_code, "012802000");
    }

    #[tokio::test]
    async fn next_link_to_itself_is_a_loop() {
        let first = barangay_url("012801000");
        let second = format!("{}&page=1", first);
        let site = Arc::new(
            StaticSite::new()
                .page(first.clone(), listing_page(&barangay_rows("X", 0, 2), Some("?q=psgc/barangays/012801000&amp;page=1")))
                .page(second.clone(), listing_page(&barangay_rows("X", 2, 2), Some("?q=psgc/barangays/012801000&amp;page=1"))),
        );

        let err = runner(&site, 1, 100).barangays(&[town("012801000")]).await.unwrap_err();
        match err {
            StageError::PaginationLoop { parent, url, .. } => {
                assert_eq!(parent, "012801000");
                assert_eq!(url, second);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(site.hits().len(), 2);
    }

    #[tokio::test]
    async fn next_link_back_to_first_page_is_a_loop() {
        let first = barangay_url("012801000");
        let site = Arc::new(
            StaticSite::new()
                .page(first.clone(), listing_page(&barangay_rows("X", 0, 1), Some("?q=psgc/barangays/012801000&amp;page=1")))
                .page(format!("{}&page=1", first), listing_page(&barangay_rows("X", 1, 1), Some("?q=psgc/barangays/012801000"))),
        );

        let err = runner(&site, 1, 100).barangays(&[town("012801000")]).await.unwrap_err();
        assert!(matches!(err, StageError::PaginationLoop { .. }));
    }

    #[tokio::test]
    async fn page_ceiling_stops_endless_distinct_links() {
        let first = barangay_url("012801000");
        let mut site = StaticSite::new();
        for i in 0..10 {
            let url = if i == 0 { first.clone() } else { format!("{}&page={}", first, i) };
            let next = format!("?q=psgc/barangays/012801000&amp;page={}", i + 1);
            site = site.page(url, listing_page(&barangay_rows("X", i, 1), Some(&next)));
        }
        let site = Arc::new(site);

        let err = runner(&site, 1, 3).barangays(&[town("012801000")]).await.unwrap_err();
        assert!(matches!(err, StageError::PageLimit { limit: 3, .. }));
        assert_eq!(site.hits().len(), 3);
    }

    #[tokio::test]
    async fn missing_page_aborts_stage_with_context() {
        let good = fixtures::region("010000000");
        let gone = fixtures::region("020000000");
        let html = listing_page(
            &[vec!["A".into(), "012800000".into(), "Prov".into(), "1".into()]],
            None,
        );
        let site = Arc::new(StaticSite::new().page(good.urls.provinces.clone(), html));

        let err = runner(&site, 2, 10).provinces(&[good, gone]).await.unwrap_err();
        match err {
            StageError::Transport { level, parent, page, source } => {
                assert_eq!(level, Level::Province);
                assert_eq!(parent, "020000000");
                assert_eq!(page, 0);
                assert!(matches!(source, FetchError::Status { status: 404, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_row_on_second_page_names_the_page() {
        let first = barangay_url("012801000");
        let mut rows = barangay_rows("X", 1, 1);
        rows[0].pop();
        let site = Arc::new(
            StaticSite::new()
                .page(first.clone(), listing_page(&barangay_rows("X", 0, 1), Some("?q=psgc/barangays/012801000&amp;page=1")))
                .page(format!("{}&page=1", first), listing_page(&rows, None)),
        );

        let err = runner(&site, 1, 10).barangays(&[town("012801000")]).await.unwrap_err();
        match err {
            StageError::Extract { page, source, .. } => {
                assert_eq!(page, 1);
                assert!(matches!(source, ExtractError::RowArityMismatch { found: 3, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_parents_means_no_requests() {
        let site = Arc::new(StaticSite::new());
        let towns = runner(&site, 4, 10).citimuni(&[]).await.unwrap();
        assert!(towns.is_empty());
        assert!(site.hits().is_empty());
    }
}
