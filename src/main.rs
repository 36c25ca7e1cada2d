mod ai;
mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod scheduler;
mod scraper;
mod tui;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ai::{create_provider, LlmProvider, SkillExtractor};
use crate::config::{Config, ScheduleConfig};
use crate::db::Database;
use crate::models::{Job, JobFilter, SearchQuery};
use crate::pipeline::Pipeline;
use crate::scheduler::DailySchedule;
use crate::scraper::{HttpFetcher, LinkedInScraper};

/// Upper bound on rows pulled before in-memory filtering.
const ACTIVE_JOB_CAP: usize = 10_000;

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Track job postings - scrape, enrich with skills, and follow up")]
struct Cli {
    /// Path to the SQLite database (overrides JOBTRACK_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct QueryArgs {
    /// Search keywords (overrides SCRAPE_KEYWORDS)
    #[arg(short, long)]
    keywords: Option<String>,

    /// Search location (overrides SCRAPE_LOCATION)
    #[arg(short, long)]
    location: Option<String>,

    /// Job type: full-time, part-time, contract, temporary, internship
    #[arg(long)]
    job_type: Option<String>,

    /// Stop after this many cards
    #[arg(long)]
    max_results: Option<usize>,
}

impl QueryArgs {
    fn apply(self, query: &mut SearchQuery) {
        if let Some(keywords) = self.keywords {
            query.keywords = keywords;
        }
        if let Some(location) = self.location {
            query.location = location;
        }
        if self.job_type.is_some() {
            query.job_type = self.job_type;
        }
        if self.max_results.is_some() {
            query.max_results = self.max_results;
        }
    }
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Match title or company (case-insensitive)
    #[arg(short, long)]
    search: Option<String>,

    /// Match location (case-insensitive)
    #[arg(short, long)]
    location: Option<String>,

    /// Restrict to source platforms (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,
}

impl From<FilterArgs> for JobFilter {
    fn from(args: FilterArgs) -> Self {
        JobFilter {
            search: args.search,
            location: args.location,
            sources: args.sources,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run one scrape-and-enrich cycle now
    Scrape {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Run the cycle every day at a fixed local time
    Run {
        /// Also run one cycle immediately
        #[arg(long)]
        now: bool,

        /// Hour of day, 0-23 (overrides SCHEDULE_HOUR)
        #[arg(long)]
        hour: Option<u32>,

        /// Minute, 0-59 (overrides SCHEDULE_MINUTE)
        #[arg(long)]
        minute: Option<u32>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// List active jobs, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// Number of jobs to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Show job details
    Show {
        /// Job ID
        id: i64,
    },

    /// Hide a job from the active list
    Archive {
        /// Job ID
        id: i64,
    },

    /// Delete a job and its skill links
    Delete {
        /// Job ID
        id: i64,
    },

    /// Delete every job whose location does not contain the given text
    Cleanup {
        /// Location substring to keep (case-sensitive)
        #[arg(long)]
        keep: String,

        /// Show what would be removed without removing
        #[arg(long)]
        dry_run: bool,
    },

    /// Start tracking an application for a job
    Track {
        /// Job ID
        id: i64,

        /// Initial status
        #[arg(short, long, default_value = "applied")]
        status: String,
    },

    /// List tracked applications
    Apps,

    /// Update an application's status
    AppStatus {
        /// Application ID
        id: i64,

        /// New status (applied, interview, offer, rejected, ...)
        status: String,
    },

    /// Set or clear an application's notes
    AppNotes {
        /// Application ID
        id: i64,

        /// Notes text; omit to clear
        notes: Option<String>,
    },

    /// Show the most requested skills
    Skills {
        /// Number of skills to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Interactive job browser
    Browse {
        #[command(flatten)]
        filter: FilterArgs,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL")
                .map_err(anyhow::Error::from)
                .and_then(|level| EnvFilter::try_new(level).map_err(anyhow::Error::from))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_pipeline<'a>(
    db: &'a Database,
    config: &Config,
) -> Result<Pipeline<'a, HttpFetcher, Box<dyn LlmProvider>>> {
    let fetcher = HttpFetcher::new(config.scrape.request_timeout)?;
    let scraper = LinkedInScraper::new(fetcher, &config.scrape);
    let extractor = SkillExtractor::new(create_provider(&config.llm)?);
    Ok(Pipeline::new(
        db,
        scraper,
        extractor,
        config.scrape.query.clone(),
        config.enrich_limit,
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    init_tracing();

    if let Some(path) = cli.db {
        config.database_path = path;
    }
    let db = Database::open(&config.database_path)?;

    if !matches!(cli.command, Commands::Init) {
        db.ensure_initialized()?;
    }

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Scrape { query } => {
            query.apply(&mut config.scrape.query);
            let pipeline = build_pipeline(&db, &config)?;
            let stats = pipeline.run_cycle().await?;

            println!("\nResults:");
            println!("  Cards scraped:  {}", stats.scraped);
            println!("  Jobs upserted:  {}", stats.upserted);
            if stats.skipped > 0 {
                println!("  Cards skipped:  {}", stats.skipped);
            }
            println!("  Jobs enriched:  {}/{}", stats.enriched, stats.selected);
            if stats.no_skills > 0 {
                println!("  No skills found: {}", stats.no_skills);
            }
            println!("  Skill links:    {}", stats.links_created);
        }

        Commands::Run {
            now,
            hour,
            minute,
            query,
        } => {
            query.apply(&mut config.scrape.query);
            let schedule = DailySchedule::new(ScheduleConfig {
                hour: hour.unwrap_or(config.schedule.hour),
                minute: minute.unwrap_or(config.schedule.minute),
            })?;
            let pipeline = build_pipeline(&db, &config)?;
            scheduler::run_daily(&pipeline, schedule, now, shutdown_signal()).await;
        }

        Commands::List { filter, limit } => {
            let filter = JobFilter::from(filter);
            let mut jobs = filter.apply(db.get_active_jobs(ACTIVE_JOB_CAP)?);
            jobs.truncate(limit);
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                print_job_table(&jobs);
            }
        }

        Commands::Show { id } => match db.get_job(id)? {
            Some(job) => print_job(&db, &job)?,
            None => println!("Job #{} not found.", id),
        },

        Commands::Archive { id } => {
            if db.archive_job(id)? {
                println!("Archived job #{}.", id);
            } else {
                println!("Job #{} not found.", id);
            }
        }

        Commands::Delete { id } => {
            if db.delete_job(id)? {
                println!("Deleted job #{}.", id);
            } else {
                println!("Job #{} not found.", id);
            }
        }

        Commands::Cleanup { keep, dry_run } => {
            if keep.is_empty() {
                return Err(anyhow!("--keep must not be empty"));
            }
            if dry_run {
                let count = db.count_cleanup(&keep)?;
                println!("Would remove {} job(s) without '{}' in location", count, keep);
            } else {
                let removed = db.cleanup_jobs(&keep)?;
                println!("Removed {} job(s) without '{}' in location", removed, keep);
            }
        }

        Commands::Track { id, status } => {
            if db.get_job(id)?.is_none() {
                println!("Job #{} not found.", id);
            } else {
                let app = db.create_application(id, &status)?;
                println!(
                    "Tracking application #{} for job #{} ({})",
                    app.id, app.job_id, app.status
                );
            }
        }

        Commands::Apps => {
            let apps = db.list_applications()?;
            if apps.is_empty() {
                println!("No applications tracked.");
            } else {
                println!(
                    "{:<6} {:<6} {:<12} {:<30} {:<20} {:<12}",
                    "ID", "JOB", "STATUS", "TITLE", "COMPANY", "APPLIED"
                );
                println!("{}", "-".repeat(90));
                for app in apps {
                    println!(
                        "{:<6} {:<6} {:<12} {:<30} {:<20} {:<12}",
                        app.id,
                        app.job_id,
                        truncate(&app.status, 10),
                        truncate(&app.job_title.unwrap_or_default(), 28),
                        truncate(&app.company.unwrap_or_default(), 18),
                        app.applied_date.map(|d| d.to_string()).unwrap_or_default()
                    );
                }
            }
        }

        Commands::AppStatus { id, status } => match db.update_application_status(id, &status)? {
            Some(app) => println!("Application #{} is now '{}'.", app.id, app.status),
            None => println!("Application #{} not found.", id),
        },

        Commands::AppNotes { id, notes } => {
            match db.update_application_notes(id, notes.as_deref())? {
                Some(app) if app.notes.is_some() => println!("Updated notes for application #{}.", id),
                Some(_) => println!("Cleared notes for application #{}.", id),
                None => println!("Application #{} not found.", id),
            }
        }

        Commands::Skills { limit } => {
            let skills = db.top_skills(limit)?;
            if skills.is_empty() {
                println!("No skills extracted yet.");
            } else {
                println!("{:<5} {:<30} {:>6}", "RANK", "SKILL", "JOBS");
                println!("{}", "-".repeat(43));
                for (i, (skill, jobs)) in skills.iter().enumerate() {
                    println!("{:<5} {:<30} {:>6}", i + 1, truncate(&skill.skill_name, 28), jobs);
                }
            }
        }

        Commands::Browse { filter } => {
            tui::run_browse(&db, &JobFilter::from(filter))?;
        }
    }

    Ok(())
}

fn print_job_table(jobs: &[Job]) {
    println!(
        "{:<6} {:<30} {:<20} {:<20} {:<12}",
        "ID", "TITLE", "COMPANY", "LOCATION", "POSTED"
    );
    println!("{}", "-".repeat(92));
    for job in jobs {
        println!(
            "{:<6} {:<30} {:<20} {:<20} {:<12}",
            job.id,
            truncate(&job.title, 28),
            truncate(&job.company, 18),
            truncate(job.location.as_deref().unwrap_or("-"), 18),
            job.posted_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }
}

fn print_job(db: &Database, job: &Job) -> Result<()> {
    println!("Job #{}", job.id);
    println!("Title: {}", job.title);
    println!("Company: {}", job.company);
    if let Some(location) = &job.location {
        println!("Location: {}", location);
    }
    println!("Status: {}", job.status);
    if let Some(url) = &job.url {
        println!("URL: {}", url);
    }
    println!("Source: {}", job.source_label());
    if let Some(posted) = job.posted_date {
        println!("Posted: {}", posted);
    }
    if let Some(deadline) = job.deadline {
        println!("Deadline: {}", deadline);
    }
    println!("Scraped: {}", job.scraped_at.format("%Y-%m-%d %H:%M"));

    let skills = db.job_skill_names(job.id)?;
    if !skills.is_empty() {
        println!("Skills: {}", skills.join(", "));
    }

    if let Some(description) = &job.description {
        println!("\n--- Description ---");
        println!("{}", textwrap::fill(description, 80));
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Senior Python Developer", 10), "Senior ...");
        assert_eq!(truncate("Développeur Python", 8), "Dével...");
    }

    #[test]
    fn test_query_args_override_only_given_fields() {
        let mut query = SearchQuery {
            keywords: "Python".to_string(),
            location: "Remote".to_string(),
            ..Default::default()
        };
        QueryArgs {
            location: Some("Berlin".to_string()),
            max_results: Some(5),
            ..Default::default()
        }
        .apply(&mut query);

        assert_eq!(query.keywords, "Python");
        assert_eq!(query.location, "Berlin");
        assert_eq!(query.max_results, Some(5));
        assert_eq!(query.job_type, None);
    }

    #[test]
    fn test_cli_parses_global_db_and_filters() {
        let cli = Cli::try_parse_from([
            "jobtrack", "list", "--search", "rust", "--source", "linkedin", "--db", "/tmp/x.db",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Commands::List { filter, limit } => {
                assert_eq!(filter.search.as_deref(), Some("rust"));
                assert_eq!(filter.sources, vec!["linkedin"]);
                assert_eq!(limit, 50);
            }
            _ => panic!("expected list command"),
        }
    }
}
