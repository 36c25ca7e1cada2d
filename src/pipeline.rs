use anyhow::Result;
use tracing::{info, warn};

use crate::ai::{LlmProvider, SkillExtractor};
use crate::db::Database;
use crate::models::{NewJob, ScrapedJob, SearchQuery};
use crate::scraper::{LinkedInScraper, PageFetcher};

const SOURCE_PLATFORM: &str = "linkedin";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub scraped: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub selected: usize,
    pub enriched: usize,
    pub no_skills: usize,
    pub links_created: usize,
}

/// One scrape-and-enrich cycle over a single store connection.
pub struct Pipeline<'a, F, P> {
    db: &'a Database,
    scraper: LinkedInScraper<F>,
    extractor: SkillExtractor<P>,
    query: SearchQuery,
    enrich_limit: usize,
}

impl<'a, F: PageFetcher, P: LlmProvider> Pipeline<'a, F, P> {
    pub fn new(
        db: &'a Database,
        scraper: LinkedInScraper<F>,
        extractor: SkillExtractor<P>,
        query: SearchQuery,
        enrich_limit: usize,
    ) -> Self {
        Self {
            db,
            scraper,
            extractor,
            query,
            enrich_limit,
        }
    }

    /// scrape → upsert → select → enrich, committed once at the end. Any error
    /// (or dropping the future mid-way) rolls the whole cycle back.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let tx = self.db.begin()?;
        let mut stats = CycleStats::default();

        let scraped = self.scraper.scrape(&self.query).await?;
        stats.scraped = scraped.len();
        info!(count = stats.scraped, "scraped job cards");

        for (index, job) in scraped.into_iter().enumerate() {
            let title = job.title.clone();
            let Some(payload) = to_new_job(job) else {
                warn!(title = %title, "skipping job card missing company/title");
                stats.skipped += 1;
                continue;
            };
            let stored = self.db.upsert_job(&payload)?;
            stats.upserted += 1;
            info!(
                job_id = stored.id,
                "upserted job {}/{}: {}",
                index + 1,
                stats.scraped,
                stored.title
            );
        }

        let backlog = self.db.select_unenriched(self.enrich_limit)?;
        stats.selected = backlog.len();
        info!(count = stats.selected, "starting skill extraction");

        for job in backlog {
            let Some(extraction) = self
                .extractor
                .extract(job.description.as_deref().unwrap_or(""))
                .await
            else {
                warn!(job_id = job.id, "no skills extracted, will retry next cycle");
                continue;
            };

            if extraction.skills.is_empty() {
                info!(job_id = job.id, "model found no skills, job stays in the backlog");
                stats.no_skills += 1;
            }

            match self.db.link_skills(job.id, &extraction) {
                Ok(created) => {
                    stats.enriched += 1;
                    stats.links_created += created;
                }
                Err(e) => warn!(job_id = job.id, error = %e, "failed to save skills"),
            }
        }

        tx.commit()?;
        info!(?stats, "cycle committed");
        Ok(stats)
    }
}

fn to_new_job(job: ScrapedJob) -> Option<NewJob> {
    let title = Some(job.title).filter(|t| !t.trim().is_empty())?;
    let company = job.company.filter(|c| !c.trim().is_empty())?;
    Some(NewJob {
        company,
        title,
        location: job.location,
        description: job.description,
        url: job.url,
        posted_date: job.posted_date,
        source_platform: Some(SOURCE_PLATFORM.to_string()),
        raw_html: job.raw_html,
        ..Default::default()
    })
}
