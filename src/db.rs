use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Transaction};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Application, ExtractionResult, Job, JobStatus, NewJob, Skill};

const JOB_COLUMNS: &str = "id, company, title, location, description, skills_raw, url, \
     posted_date, deadline, scraped_at, status, source_platform, raw_html";

const APPLICATION_SELECT: &str = "SELECT a.id, a.job_id, j.title, j.company, a.applied_date, \
     a.status, a.notes, a.last_updated
     FROM applications a
     LEFT JOIN jobs j ON a.job_id = j.id";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrack") {
            proj_dirs.data_dir().join("jobtrack.db")
        } else {
            PathBuf::from("jobtrack.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company TEXT NOT NULL,
                title TEXT NOT NULL,
                location TEXT,
                description TEXT,
                skills_raw TEXT,
                url TEXT UNIQUE,
                posted_date TEXT,
                deadline TEXT,
                scraped_at TEXT NOT NULL DEFAULT (datetime('now')),
                status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'archived')),
                source_platform TEXT,
                raw_html TEXT
            );

            CREATE TABLE IF NOT EXISTS skills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                skill_name TEXT NOT NULL UNIQUE,
                category TEXT,
                frequency INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS job_skills (
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                skill_id INTEGER NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
                confidence_score REAL,
                PRIMARY KEY (job_id, skill_id)
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                applied_date TEXT,
                status TEXT NOT NULL DEFAULT 'applied',
                notes TEXT,
                last_updated TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status_scraped ON jobs(status, scraped_at);
            CREATE INDEX IF NOT EXISTS idx_job_skills_skill ON job_skills(skill_id);
            CREATE INDEX IF NOT EXISTS idx_applications_job ON applications(job_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobtrack init' first."
            ));
        }
        Ok(())
    }

    /// Opens the per-cycle transaction. Store calls made while it is alive run
    /// inside it; dropping it without `commit` rolls everything back.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
    }

    /// Runs `op` under a savepoint so a failure discards only its own writes.
    pub fn with_savepoint<T>(&self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("SAVEPOINT jobtrack_op")?;
        match op(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE jobtrack_op")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self
                    .conn
                    .execute_batch("ROLLBACK TO jobtrack_op; RELEASE jobtrack_op")
                {
                    debug!(error = %rollback_err, "savepoint rollback failed");
                }
                Err(e)
            }
        }
    }

    // --- Job operations ---

    pub fn upsert_job(&self, job: &NewJob) -> Result<Job> {
        let existing = match job.canonical_url() {
            Some(url) => self.find_job_id_by_url(url)?,
            None => None,
        };

        let Some(id) = existing else {
            return self.insert_job(job);
        };

        self.conn
            .execute(
                "UPDATE jobs SET
                    company = ?1,
                    title = ?2,
                    location = COALESCE(?3, location),
                    description = COALESCE(?4, description),
                    skills_raw = COALESCE(?5, skills_raw),
                    posted_date = COALESCE(?6, posted_date),
                    deadline = COALESCE(?7, deadline),
                    status = COALESCE(?8, status),
                    source_platform = COALESCE(?9, source_platform),
                    raw_html = COALESCE(?10, raw_html)
                 WHERE id = ?11",
                params![
                    job.company,
                    job.title,
                    job.location,
                    job.description,
                    job.skills_raw,
                    job.posted_date,
                    job.deadline,
                    job.status,
                    job.source_platform,
                    job.raw_html,
                    id,
                ],
            )
            .map_err(StoreError::from_sqlite)?;

        debug!(job_id = id, "updated existing job");
        self.get_job(id)?
            .ok_or_else(|| anyhow!("Job #{} vanished during upsert", id))
    }

    /// Plain insert. A duplicate URL surfaces as `StoreError::IntegrityViolation`.
    pub fn insert_job(&self, job: &NewJob) -> Result<Job> {
        let scraped_at = Local::now().naive_local();
        self.conn
            .execute(
                "INSERT INTO jobs (company, title, location, description, skills_raw, url,
                                   posted_date, deadline, scraped_at, status, source_platform, raw_html)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    job.company,
                    job.title,
                    job.location,
                    job.description,
                    job.skills_raw,
                    job.canonical_url(),
                    job.posted_date,
                    job.deadline,
                    scraped_at,
                    job.status.unwrap_or(JobStatus::Active),
                    job.source_platform,
                    job.raw_html,
                ],
            )
            .map_err(StoreError::from_sqlite)?;

        let id = self.conn.last_insert_rowid();
        debug!(job_id = id, "inserted job");
        self.get_job(id)?
            .ok_or_else(|| anyhow!("Job #{} missing right after insert", id))
    }

    fn find_job_id_by_url(&self, url: &str) -> Result<Option<i64>> {
        let result = self
            .conn
            .query_row("SELECT id FROM jobs WHERE url = ?1", [url], |row| row.get(0));
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let result = self.conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            Self::row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_active_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'active'
             ORDER BY scraped_at DESC, id DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list active jobs")
    }

    /// Jobs with no skill links yet, newest first: the enrichment backlog.
    pub fn select_unenriched(&self, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE NOT EXISTS (SELECT 1 FROM job_skills s WHERE s.job_id = jobs.id)
             ORDER BY scraped_at DESC, id DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to select unenriched jobs")
    }

    pub fn delete_job(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", [id])
            .map_err(StoreError::from_sqlite)?;
        Ok(affected > 0)
    }

    pub fn archive_job(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2",
                params![JobStatus::Archived, id],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(affected > 0)
    }

    /// Hard-deletes every job whose location is missing or lacks `keep`
    /// (case-sensitive). Irreversible.
    pub fn cleanup_jobs(&self, keep: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM jobs WHERE location IS NULL OR instr(location, ?1) = 0",
                [keep],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(removed)
    }

    pub fn count_cleanup(&self, keep: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE location IS NULL OR instr(location, ?1) = 0",
            [keep],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get(0)?,
            company: row.get(1)?,
            title: row.get(2)?,
            location: row.get(3)?,
            description: row.get(4)?,
            skills_raw: row.get(5)?,
            url: row.get(6)?,
            posted_date: row.get(7)?,
            deadline: row.get(8)?,
            scraped_at: row.get(9)?,
            status: row.get(10)?,
            source_platform: row.get(11)?,
            raw_html: row.get(12)?,
        })
    }

    // --- Skill operations ---

    /// Records the extractor output on the job and links every skill to it.
    /// Skill names are expected already normalized. Returns the number of new links.
    pub fn link_skills(&self, job_id: i64, extraction: &ExtractionResult) -> Result<usize> {
        self.with_savepoint(|db| {
            let updated = db
                .conn
                .execute(
                    "UPDATE jobs SET skills_raw = ?1 WHERE id = ?2",
                    params![extraction.raw.to_string(), job_id],
                )
                .map_err(StoreError::from_sqlite)?;
            if updated == 0 {
                return Err(anyhow!("Job #{} not found", job_id));
            }

            let mut created = 0;
            for name in &extraction.skills {
                let skill_id = db.get_or_create_skill(name)?;
                created += db
                    .conn
                    .execute(
                        "INSERT OR IGNORE INTO job_skills (job_id, skill_id) VALUES (?1, ?2)",
                        params![job_id, skill_id],
                    )
                    .map_err(StoreError::from_sqlite)?;
            }
            Ok(created)
        })
    }

    pub fn get_or_create_skill(&self, name: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO skills (skill_name) VALUES (?1) ON CONFLICT(skill_name) DO NOTHING",
                [name],
            )
            .map_err(StoreError::from_sqlite)?;
        let id = self.conn.query_row(
            "SELECT id FROM skills WHERE skill_name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn job_skill_names(&self, job_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.skill_name FROM job_skills js
             JOIN skills s ON js.skill_id = s.id
             WHERE js.job_id = ?1
             ORDER BY s.skill_name",
        )?;
        let rows = stmt.query_map([job_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load job skills")
    }

    /// Vocabulary ordered by how many jobs mention each skill.
    pub fn top_skills(&self, limit: usize) -> Result<Vec<(Skill, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.skill_name, s.category, s.frequency, s.priority, COUNT(js.job_id) AS jobs
             FROM skills s
             LEFT JOIN job_skills js ON js.skill_id = s.id
             GROUP BY s.id
             ORDER BY jobs DESC, s.skill_name
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                Skill {
                    id: row.get(0)?,
                    skill_name: row.get(1)?,
                    category: row.get(2)?,
                    frequency: row.get(3)?,
                    priority: row.get(4)?,
                },
                row.get(5)?,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list skills")
    }

    // --- Application operations ---

    /// Returns the job's existing application if there is one.
    pub fn create_application(&self, job_id: i64, status: &str) -> Result<Application> {
        if let Some(existing) = self.get_application_for_job(job_id)? {
            return Ok(existing);
        }

        let now = Local::now();
        self.conn
            .execute(
                "INSERT INTO applications (job_id, applied_date, status, last_updated)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, now.date_naive(), status, now.naive_local()],
            )
            .map_err(StoreError::from_sqlite)?;

        let id = self.conn.last_insert_rowid();
        self.get_application(id)?
            .ok_or_else(|| anyhow!("Application #{} missing right after insert", id))
    }

    pub fn list_applications(&self) -> Result<Vec<Application>> {
        let mut stmt = self.conn.prepare(&format!(
            "{APPLICATION_SELECT} ORDER BY a.last_updated DESC, a.id DESC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_application)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list applications")
    }

    pub fn get_application(&self, id: i64) -> Result<Option<Application>> {
        self.query_application(&format!("{APPLICATION_SELECT} WHERE a.id = ?1"), id)
    }

    fn get_application_for_job(&self, job_id: i64) -> Result<Option<Application>> {
        self.query_application(
            &format!("{APPLICATION_SELECT} WHERE a.job_id = ?1 ORDER BY a.id LIMIT 1"),
            job_id,
        )
    }

    fn query_application(&self, sql: &str, key: i64) -> Result<Option<Application>> {
        match self.conn.query_row(sql, [key], Self::row_to_application) {
            Ok(app) => Ok(Some(app)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_application_status(&self, id: i64, status: &str) -> Result<Option<Application>> {
        let affected = self.conn.execute(
            "UPDATE applications SET status = ?1, last_updated = ?2 WHERE id = ?3",
            params![status, now(), id],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        self.get_application(id)
    }

    pub fn update_application_notes(
        &self,
        id: i64,
        notes: Option<&str>,
    ) -> Result<Option<Application>> {
        let affected = self.conn.execute(
            "UPDATE applications SET notes = ?1, last_updated = ?2 WHERE id = ?3",
            params![notes, now(), id],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        self.get_application(id)
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            job_id: row.get(1)?,
            job_title: row.get(2)?,
            company: row.get(3)?,
            applied_date: row.get(4)?,
            status: row.get(5)?,
            notes: row.get(6)?,
            last_updated: row.get(7)?,
        })
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn payload(company: &str, title: &str, url: Option<&str>) -> NewJob {
        NewJob {
            url: url.map(str::to_string),
            ..NewJob::new(company, title)
        }
    }

    fn set_scraped_at(db: &Database, id: i64, ts: &str) {
        db.conn
            .execute(
                "UPDATE jobs SET scraped_at = ?1 WHERE id = ?2",
                params![ts, id],
            )
            .unwrap();
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn extraction(skills: &[&str]) -> ExtractionResult {
        ExtractionResult {
            skills: skills.iter().map(|s| s.to_string()).collect(),
            raw: json!({ "skills": skills }),
        }
    }

    #[test]
    fn test_upsert_same_url_updates_in_place() {
        let db = test_db();
        let url = "https://jobs.example.com/acme/backend";

        let first = db.upsert_job(&payload("Acme Corp", "Backend Engineer", Some(url))).unwrap();

        let mut second = payload("Acme Inc", "Senior Backend Engineer", Some(url));
        second.location = Some("Sydney, Australia".to_string());
        second.description = Some("Rust and Postgres".to_string());
        let updated = db.upsert_job(&second).unwrap();

        assert_eq!(count(&db, "jobs"), 1);
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.company, "Acme Inc");
        assert_eq!(updated.title, "Senior Backend Engineer");
        assert_eq!(updated.location.as_deref(), Some("Sydney, Australia"));
        assert_eq!(updated.description.as_deref(), Some("Rust and Postgres"));
        assert_eq!(updated.scraped_at, first.scraped_at);
    }

    #[test]
    fn test_upsert_without_url_always_inserts() {
        let db = test_db();
        let a = db.upsert_job(&payload("Acme", "Data Engineer", None)).unwrap();
        let b = db.upsert_job(&payload("Acme", "Data Engineer", None)).unwrap();
        let c = db.upsert_job(&payload("Acme", "Data Engineer", Some("  "))).unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_eq!(c.url, None);
        assert_eq!(count(&db, "jobs"), 3);
    }

    #[test]
    fn test_upsert_keeps_fields_missing_from_payload() {
        let db = test_db();
        let url = "https://jobs.example.com/acme/ml";
        let mut first = payload("Acme", "ML Engineer", Some(url));
        first.description = Some("PyTorch".to_string());
        first.skills_raw = Some("{\"skills\":[\"pytorch\"]}".to_string());
        let stored = db.upsert_job(&first).unwrap();
        db.archive_job(stored.id).unwrap();

        let updated = db.upsert_job(&payload("Acme", "ML Engineer", Some(url))).unwrap();

        assert_eq!(updated.description.as_deref(), Some("PyTorch"));
        assert!(updated.skills_raw.is_some());
        assert_eq!(updated.status, JobStatus::Archived);
        assert_eq!(updated.url.as_deref(), Some(url));
    }

    #[test]
    fn test_insert_duplicate_url_is_integrity_violation() {
        let db = test_db();
        let url = "https://jobs.example.com/acme/dup";
        db.insert_job(&payload("Acme", "First", Some(url))).unwrap();

        let err = db.insert_job(&payload("Acme", "Second", Some(url))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::IntegrityViolation(_))
        ));
        assert_eq!(count(&db, "jobs"), 1);
    }

    #[test]
    fn test_get_active_jobs_orders_and_limits() {
        let db = test_db();
        let stamps = [
            ("Oldest", "2024-01-01 09:00:00"),
            ("Newest", "2024-01-04 09:00:00"),
            ("Middle", "2024-01-03 09:00:00"),
            ("Archived", "2024-01-05 09:00:00"),
        ];
        for (i, (title, ts)) in stamps.iter().enumerate() {
            let url = format!("https://jobs.example.com/{i}");
            let job = db.upsert_job(&payload("Acme", title, Some(&url))).unwrap();
            set_scraped_at(&db, job.id, ts);
            if *title == "Archived" {
                assert!(db.archive_job(job.id).unwrap());
            }
        }

        let active = db.get_active_jobs(2).unwrap();
        let titles: Vec<&str> = active.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["Newest", "Middle"]);
    }

    #[test]
    fn test_get_job_returns_none_for_missing_id() {
        let db = test_db();
        let job = db.upsert_job(&payload("Acme", "Backend", None)).unwrap();
        assert_eq!(db.get_job(job.id).unwrap().unwrap().title, "Backend");
        assert!(db.get_job(9999).unwrap().is_none());
    }

    #[test]
    fn test_delete_and_archive_report_affected_rows() {
        let db = test_db();
        let job = db.upsert_job(&payload("Acme", "Data Engineer", None)).unwrap();

        assert!(db.archive_job(job.id).unwrap());
        assert_eq!(db.get_job(job.id).unwrap().unwrap().status, JobStatus::Archived);
        assert!(!db.archive_job(9999).unwrap());

        assert!(db.delete_job(job.id).unwrap());
        assert!(!db.delete_job(job.id).unwrap());
        assert_eq!(count(&db, "jobs"), 0);
    }

    #[test]
    fn test_cleanup_removes_non_matching_and_missing_locations() {
        let db = test_db();
        for (i, location) in [Some("Sydney, Australia"), Some("Remote - US"), None]
            .into_iter()
            .enumerate()
        {
            let mut job = payload("Acme", &format!("Role {i}"), None);
            job.location = location.map(str::to_string);
            db.upsert_job(&job).unwrap();
        }

        assert_eq!(db.count_cleanup("Australia").unwrap(), 2);
        assert_eq!(db.cleanup_jobs("Australia").unwrap(), 2);

        let remaining = db.get_active_jobs(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].location.as_deref(), Some("Sydney, Australia"));
    }

    #[test]
    fn test_cleanup_is_case_sensitive() {
        let db = test_db();
        let mut job = payload("Acme", "Role", None);
        job.location = Some("sydney, australia".to_string());
        db.upsert_job(&job).unwrap();

        assert_eq!(db.cleanup_jobs("Australia").unwrap(), 1);
    }

    #[test]
    fn test_link_skills_is_idempotent() {
        let db = test_db();
        let job = db.upsert_job(&payload("Acme", "Backend", None)).unwrap();
        let result = extraction(&["python", "sql"]);

        assert_eq!(db.link_skills(job.id, &result).unwrap(), 2);
        assert_eq!(db.link_skills(job.id, &result).unwrap(), 0);

        assert_eq!(count(&db, "skills"), 2);
        assert_eq!(count(&db, "job_skills"), 2);
        assert_eq!(db.job_skill_names(job.id).unwrap(), vec!["python", "sql"]);

        let stored = db.get_job(job.id).unwrap().unwrap();
        let raw: serde_json::Value = serde_json::from_str(stored.skills_raw.as_deref().unwrap()).unwrap();
        assert_eq!(raw, json!({ "skills": ["python", "sql"] }));
    }

    #[test]
    fn test_link_skills_shares_vocabulary_across_jobs() {
        let db = test_db();
        let a = db.upsert_job(&payload("Acme", "Backend", None)).unwrap();
        let b = db.upsert_job(&payload("Globex", "Data", None)).unwrap();

        db.link_skills(a.id, &extraction(&["python", "sql"])).unwrap();
        db.link_skills(b.id, &extraction(&["sql", "spark"])).unwrap();

        assert_eq!(count(&db, "skills"), 3);
        let top = db.top_skills(1).unwrap();
        assert_eq!(top[0].0.skill_name, "sql");
        assert_eq!(top[0].1, 2);
        assert_eq!(top[0].0.frequency, 1);
    }

    #[test]
    fn test_link_skills_missing_job_leaves_no_rows() {
        let db = test_db();
        assert!(db.link_skills(42, &extraction(&["python"])).is_err());
        assert_eq!(count(&db, "skills"), 0);
    }

    #[test]
    fn test_select_unenriched_skips_linked_jobs() {
        let db = test_db();
        let a = db.upsert_job(&payload("Acme", "Linked", None)).unwrap();
        let b = db.upsert_job(&payload("Acme", "Older", None)).unwrap();
        let c = db.upsert_job(&payload("Acme", "Newer", None)).unwrap();
        set_scraped_at(&db, b.id, "2024-01-01 09:00:00");
        set_scraped_at(&db, c.id, "2024-01-02 09:00:00");
        db.link_skills(a.id, &extraction(&["rust"])).unwrap();

        let backlog = db.select_unenriched(10).unwrap();
        let titles: Vec<&str> = backlog.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer", "Older"]);
        assert_eq!(db.select_unenriched(1).unwrap().len(), 1);
    }

    #[test]
    fn test_deleting_job_cascades_links_and_applications() {
        let db = test_db();
        let job = db.upsert_job(&payload("Acme", "Backend", None)).unwrap();
        db.link_skills(job.id, &extraction(&["go"])).unwrap();
        db.create_application(job.id, "applied").unwrap();

        db.delete_job(job.id).unwrap();

        assert_eq!(count(&db, "job_skills"), 0);
        assert_eq!(count(&db, "applications"), 0);
        assert_eq!(count(&db, "skills"), 1);
    }

    #[test]
    fn test_transaction_dropped_without_commit_rolls_back() {
        let db = test_db();
        {
            let _tx = db.begin().unwrap();
            db.upsert_job(&payload("Acme", "Doomed", None)).unwrap();
        }
        assert_eq!(count(&db, "jobs"), 0);

        let tx = db.begin().unwrap();
        db.upsert_job(&payload("Acme", "Kept", None)).unwrap();
        tx.commit().unwrap();
        assert_eq!(count(&db, "jobs"), 1);
    }

    #[test]
    fn test_create_application_returns_existing() {
        let db = test_db();
        let job = db.upsert_job(&payload("Acme", "Backend", None)).unwrap();

        let first = db.create_application(job.id, "applied").unwrap();
        let second = db.create_application(job.id, "interview").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, "applied");
        assert_eq!(second.job_title.as_deref(), Some("Backend"));
        assert_eq!(count(&db, "applications"), 1);
    }

    #[test]
    fn test_create_application_for_missing_job_fails() {
        let db = test_db();
        let err = db.create_application(404, "applied").unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());
    }

    #[test]
    fn test_update_application_status_and_notes() {
        let db = test_db();
        let a = db.upsert_job(&payload("Acme", "First", None)).unwrap();
        let b = db.upsert_job(&payload("Globex", "Second", None)).unwrap();
        let app_a = db.create_application(a.id, "applied").unwrap();
        let app_b = db.create_application(b.id, "applied").unwrap();
        db.conn
            .execute(
                "UPDATE applications SET last_updated = '2024-01-01 00:00:00'",
                [],
            )
            .unwrap();

        let updated = db.update_application_status(app_a.id, "interview").unwrap().unwrap();
        assert_eq!(updated.status, "interview");
        let noted = db
            .update_application_notes(app_b.id, Some("Recruiter call Friday"))
            .unwrap()
            .unwrap();
        assert_eq!(noted.notes.as_deref(), Some("Recruiter call Friday"));
        assert!(db.update_application_status(999, "offer").unwrap().is_none());

        let listed = db.list_applications().unwrap();
        assert_eq!(listed[0].id, app_b.id);
        assert_eq!(listed[1].id, app_a.id);
    }
}
