use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as DateDelta, NaiveDate};
use rand::Rng;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DelayRange, ScrapeConfig};
use crate::error::ScrapeError;
use crate::models::{ScrapedJob, SearchQuery};

const SEARCH_URL: &str = "https://www.linkedin.com/jobs/search";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

// Tried in order on the detail page; the first non-empty one wins.
const DESCRIPTION_SELECTORS: &[&str] = &[
    ".show-more-less-html__markup",
    ".description__text",
    ".jobs-description__content",
    "#job-details",
];

/// Network boundary for the scraper: GET a page, return its body.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad status fetching {}", url))?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))
    }
}

pub struct LinkedInScraper<F> {
    fetcher: F,
    search_delay: DelayRange,
    detail_delay: DelayRange,
}

impl<F: PageFetcher> LinkedInScraper<F> {
    pub fn new(fetcher: F, config: &ScrapeConfig) -> Self {
        Self {
            fetcher,
            search_delay: config.search_delay,
            detail_delay: config.detail_delay,
        }
    }

    /// Fetches one search page and the detail page of every retained card,
    /// one at a time with a random pause before each request.
    pub async fn scrape(&self, query: &SearchQuery) -> Result<Vec<ScrapedJob>> {
        let url = build_search_url(query)?;

        pause(self.search_delay).await;
        info!(%url, "fetching search results");
        let html = self
            .fetcher
            .fetch(url.as_str())
            .await
            .context("Failed to fetch search results")?;

        let today = chrono::Local::now().date_naive();
        let mut jobs = parse_cards(&html, today)?;
        if jobs.is_empty() {
            info!("no job cards found");
        }
        if let Some(cap) = query.max_results {
            jobs.truncate(cap);
        }

        for job in &mut jobs {
            if job.location.is_none() {
                job.location = Some(query.location.trim().to_string());
            }

            let Some(detail_url) = job.url.clone() else {
                continue;
            };

            pause(self.detail_delay).await;
            match self.fetcher.fetch(&detail_url).await {
                Ok(page) => {
                    job.description = parse_description(&page);
                    if job.description.is_none() {
                        warn!(url = %detail_url, "no description found on detail page");
                    }
                }
                Err(e) => {
                    warn!(url = %detail_url, error = %e, "failed to fetch job description");
                }
            }
        }

        debug!(count = jobs.len(), "scrape finished");
        Ok(jobs)
    }
}

pub fn build_search_url(query: &SearchQuery) -> Result<Url> {
    let keywords = query.keywords.trim();
    let location = query.location.trim();
    if keywords.is_empty() || location.is_empty() {
        return Err(ScrapeError::InvalidQuery(
            "query must include keywords and location".to_string(),
        )
        .into());
    }

    let mut params = vec![("keywords", keywords.to_string()), ("location", location.to_string())];
    if let Some(job_type) = query.job_type.as_deref() {
        match job_type_code(job_type) {
            Some(code) => params.push(("f_JT", code.to_string())),
            None => warn!(job_type, "ignoring unknown job type filter"),
        }
    }

    Url::parse_with_params(SEARCH_URL, &params).map_err(|e| anyhow!("Bad search URL: {}", e))
}

fn job_type_code(job_type: &str) -> Option<&'static str> {
    match job_type.trim().to_lowercase().replace([' ', '_'], "-").as_str() {
        "full-time" | "fulltime" | "f" => Some("F"),
        "part-time" | "parttime" | "p" => Some("P"),
        "contract" | "c" => Some("C"),
        "temporary" | "t" => Some("T"),
        "internship" | "i" => Some("I"),
        "volunteer" | "v" => Some("V"),
        "other" | "o" => Some("O"),
        _ => None,
    }
}

async fn pause(range: DelayRange) {
    let delay = pick_delay(range);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

pub fn pick_delay(range: DelayRange) -> Duration {
    match range.max {
        Some(max) if max > range.min => {
            let secs = rand::thread_rng().gen_range(range.min.as_secs_f64()..=max.as_secs_f64());
            Duration::from_secs_f64(secs)
        }
        _ => range.min,
    }
}

struct CardSelectors {
    card: Selector,
    title: Selector,
    title_fallback: Selector,
    company: Selector,
    company_fallback: Selector,
    location: Selector,
    time: Selector,
    link: Selector,
    link_fallback: Selector,
}

impl CardSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            card: selector("div.base-card")?,
            title: selector("h3.base-search-card__title")?,
            title_fallback: selector("h3")?,
            company: selector("h4.base-search-card__subtitle")?,
            company_fallback: selector("h4")?,
            location: selector(".job-search-card__location")?,
            time: selector("time")?,
            link: selector("a.base-card__full-link")?,
            link_fallback: selector("a[href]")?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{}': {:?}", css, e))
}

/// Parses every job card on a search results page. Cards without a title are noise
/// and are dropped.
pub fn parse_cards(html: &str, today: NaiveDate) -> Result<Vec<ScrapedJob>> {
    let sel = CardSelectors::new()?;
    let document = Html::parse_document(html);

    let jobs = document
        .select(&sel.card)
        .filter_map(|card| parse_card(card, &sel, today))
        .collect();
    Ok(jobs)
}

fn parse_card(card: ElementRef, sel: &CardSelectors, today: NaiveDate) -> Option<ScrapedJob> {
    let title = first_text(card, &[&sel.title, &sel.title_fallback])?;
    let company = first_text(card, &[&sel.company, &sel.company_fallback]);
    let location = first_text(card, &[&sel.location]);

    let posted_date = card.select(&sel.time).next().and_then(|time| {
        clean_text(time)
            .and_then(|text| parse_relative_date(&text, today))
            .or_else(|| {
                time.value()
                    .attr("datetime")
                    .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
            })
    });

    let url = [&sel.link, &sel.link_fallback]
        .iter()
        .find_map(|s| card.select(s).next())
        .and_then(|a| a.value().attr("href"))
        .and_then(canonical_url);

    Some(ScrapedJob {
        title,
        company,
        location,
        posted_date,
        url,
        description: None,
        raw_html: Some(card.html()),
    })
}

fn first_text(element: ElementRef, selectors: &[&Selector]) -> Option<String> {
    selectors
        .iter()
        .find_map(|s| element.select(s).next().and_then(clean_text))
}

fn clean_text(element: ElementRef) -> Option<String> {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Pulls the posting text out of a detail page; `None` when the known content
/// regions are missing or empty.
pub fn parse_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    for css in DESCRIPTION_SELECTORS {
        let Ok(sel) = Selector::parse(css) else { continue };
        if let Some(element) = document.select(&sel).next() {
            let text = element
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Resolves "3 days ago" style text against `today`. Unrecognised text is `None`.
pub fn parse_relative_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if cleaned == "just now" {
        return Some(today);
    }

    let re = Regex::new(r"^(\d+) (hour|day|week|month|year)s? ago$").ok()?;
    let caps = re.captures(&cleaned)?;
    let amount: i64 = caps[1].parse().ok()?;
    let days = match &caps[2] {
        "hour" => 0,
        "day" => amount,
        "week" => amount.checked_mul(7)?,
        "month" => amount.checked_mul(30)?,
        "year" => amount.checked_mul(365)?,
        _ => return None,
    };
    today.checked_sub_signed(DateDelta::try_days(days)?)
}

/// Strips tracking query parameters and fragments so one posting has one URL.
pub fn canonical_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    Some(url[..end].to_string())
}
