use anyhow::{anyhow, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;
use tracing::warn;

use crate::db::Database;
use crate::models::{Job, JobFilter};

const BROWSE_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy)]
enum Action {
    Track,
    Archive,
    Delete,
}

struct AppState {
    jobs: Vec<Job>,
    selected: usize,
    scroll_offset: u16,
    skills: Vec<String>,
    message: Option<String>,
}

impl AppState {
    fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs,
            selected: 0,
            scroll_offset: 0,
            skills: Vec::new(),
            message: None,
        }
    }

    fn current_job(&self) -> Option<&Job> {
        self.jobs.get(self.selected)
    }

    fn load_skills(&mut self, db: &Database) {
        let Some(job) = self.current_job() else {
            self.skills.clear();
            return;
        };
        match db.job_skill_names(job.id) {
            Ok(skills) => self.skills = skills,
            Err(e) => {
                self.skills.clear();
                self.message = Some(format!("Error loading skills: {e}"));
            }
        }
    }

    fn next(&mut self) {
        if !self.jobs.is_empty() && self.selected < self.jobs.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    /// Applies `action` to the selected job. On failure the list is left as
    /// it was and the error goes to the footer.
    fn perform(&mut self, db: &Database, action: Action) {
        let Some(job) = self.current_job() else { return };
        let (id, title) = (job.id, job.title.clone());

        let result = db.with_savepoint(|db| match action {
            Action::Track => db
                .create_application(id, "applied")
                .map(|app| format!("Tracking application #{} for '{}'", app.id, title)),
            Action::Archive => db
                .archive_job(id)?
                .then(|| format!("Archived '{}'", title))
                .ok_or_else(|| anyhow!("Job #{} no longer exists", id)),
            Action::Delete => db
                .delete_job(id)?
                .then(|| format!("Deleted '{}'", title))
                .ok_or_else(|| anyhow!("Job #{} no longer exists", id)),
        });

        match result {
            Ok(message) => {
                if matches!(action, Action::Archive | Action::Delete) {
                    self.remove_selected();
                }
                self.message = Some(message);
            }
            Err(e) => {
                warn!(job_id = id, error = %e, "dashboard action failed");
                self.message = Some(format!("Error: {e}"));
            }
        }
    }

    fn remove_selected(&mut self) {
        if self.selected < self.jobs.len() {
            self.jobs.remove(self.selected);
        }
        if self.selected >= self.jobs.len() {
            self.selected = self.jobs.len().saturating_sub(1);
        }
        self.scroll_offset = 0;
    }
}

pub fn run_browse(db: &Database, filter: &JobFilter) -> Result<()> {
    let jobs = filter.apply(db.get_active_jobs(BROWSE_CAP)?);
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    let mut state = AppState::new(jobs);
    state.load_skills(db);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, db);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    db: &Database,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let prev_selected = state.selected;
            let prev_len = state.jobs.len();
            state.message = None;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('t') => state.perform(db, Action::Track),
                KeyCode::Char('a') => state.perform(db, Action::Archive),
                KeyCode::Char('d') => state.perform(db, Action::Delete),
                _ => {}
            }
            if state.selected != prev_selected || state.jobs.len() != prev_len {
                list_state.select((!state.jobs.is_empty()).then_some(state.selected));
                state.load_skills(db);
            }
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[0]);

    // Left panel: job list
    let items: Vec<ListItem> = state
        .jobs
        .iter()
        .map(|job| {
            ListItem::new(format!(
                "#{:<4} {} | {}",
                job.id,
                crate::truncate(&job.title, 35),
                job.company
            ))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Jobs ({}) ", state.jobs.len())),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: job detail
    let detail_width = chunks[1].width.saturating_sub(2).max(20) as usize;
    let detail_widget = Paragraph::new(build_detail(state, detail_width))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    // Footer: last action result, else key help
    let footer = match &state.message {
        Some(message) if message.starts_with("Error") => {
            Paragraph::new(format!(" {message}")).style(Style::default().fg(Color::Red))
        }
        Some(message) => {
            Paragraph::new(format!(" {message}")).style(Style::default().fg(Color::Green))
        }
        None => Paragraph::new(
            " j/k:navigate  J/K:scroll  t:track  a:archive  d:delete  q:quit",
        )
        .style(Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(footer, rows[1]);
}

fn build_detail<'a>(state: &'a AppState, width: usize) -> Text<'a> {
    let Some(job) = state.current_job() else {
        return Text::raw("No jobs left");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        &job.title,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", job.company)));

    if let Some(location) = &job.location {
        lines.push(Line::from(format!("Location: {}", location)));
    }
    if let Some(posted) = job.posted_date {
        lines.push(Line::from(format!("Posted: {}", posted)));
    }
    if let Some(url) = &job.url {
        lines.push(Line::from(format!("URL: {}", url)));
    }
    lines.push(Line::from(format!("Source: {}", job.source_label())));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "Skills",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    if state.skills.is_empty() {
        lines.push(Line::from(Span::styled(
            "  (not extracted yet)",
            Style::default().fg(Color::DarkGray),
        )));
    } else {
        for line in textwrap::fill(&state.skills.join(", "), width.saturating_sub(2)).lines() {
            lines.push(Line::from(Span::styled(
                format!("  {}", line),
                Style::default().fg(Color::Cyan),
            )));
        }
    }
    lines.push(Line::from(""));

    match &job.description {
        Some(text) => {
            lines.push(Line::from(Span::styled(
                "Description",
                Style::default().add_modifier(Modifier::BOLD),
            )));
            for line in textwrap::fill(text, width).lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        None => lines.push(Line::from(Span::styled(
            "(No description fetched)",
            Style::default().fg(Color::DarkGray),
        ))),
    }

    Text::from(lines)
}
