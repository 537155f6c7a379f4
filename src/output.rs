//! Output writer
//!
//! Everything a run leaves behind, under `REVERIE_HOME`:
//!
//! ```text
//! <date>/round-NN.json     one file per persisted round
//! <date>/findings.md       assembled findings
//! <date>/meta.json         run record
//! <date>/drift.md          drift rounds of the day's last drift run
//! latest-findings.md       copy of the most recent findings
//! last-run-meta.json       copy of the most recent run record
//! creative-journal.md      append-only drift journal
//! ```

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Mode, Paths, RunConfig};
use crate::error::OutputResult;
use crate::thinker::Round;

/// Phase promoted to the top of the findings
pub const SYNTHESIS_PHASE: &str = "synthesis";

const PROBLEM_HEADING_CHARS: usize = 100;

const JOURNAL_HEADER: &str =
    "# Creative Journal\n\n*Drift sessions, kept for the ideas that survive the morning.*\n";

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Stopped,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Error => "error",
        }
    }

    /// Whether a CLI invocation should exit successfully
    pub fn is_success(&self) -> bool {
        !matches!(self, RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one run produced. Exactly one per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub mode: Mode,
    pub rounds_completed: usize,
    pub problems_processed: usize,
    pub research_queries: usize,
    pub duration_minutes: f64,
    /// Why the run ended the way it did, when that is not obvious
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Persisted run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub date: String,
    pub started: DateTime<Local>,
    pub ended: DateTime<Local>,
    pub mode: Mode,
    pub rounds_completed: usize,
    pub problems_processed: usize,
    pub research_queries: usize,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_minutes: f64,
    pub config: RunConfig,
}

impl RunMeta {
    pub fn new(
        outcome: &RunOutcome,
        started: DateTime<Local>,
        ended: DateTime<Local>,
        config: &RunConfig,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            date: started.format("%Y-%m-%d").to_string(),
            started,
            ended,
            mode: outcome.mode,
            rounds_completed: outcome.rounds_completed,
            problems_processed: outcome.problems_processed,
            research_queries: outcome.research_queries,
            status: outcome.status,
            reason: outcome.reason.clone(),
            duration_minutes: outcome.duration_minutes,
            config: config.clone(),
        }
    }
}

/// Writes one run's artifacts into its dated directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    paths: Paths,
    date: String,
}

impl OutputWriter {
    pub fn new(paths: Paths, date: impl Into<String>) -> Self {
        Self {
            paths,
            date: date.into(),
        }
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn run_dir(&self) -> PathBuf {
        self.paths.run_dir(&self.date)
    }

    pub fn round_path(&self, sequence: u32) -> PathBuf {
        self.run_dir().join(format!("round-{:02}.json", sequence))
    }

    pub fn findings_path(&self) -> PathBuf {
        self.run_dir().join("findings.md")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.run_dir().join("meta.json")
    }

    /// Persist a single round. Written once, never updated.
    pub fn write_round(&self, round: &Round) -> OutputResult<PathBuf> {
        let path = self.round_path(round.sequence);
        write_atomic(&path, serde_json::to_string_pretty(round)?.as_bytes())?;
        info!("  Saved round {} -> {}", round.sequence, path.display());
        Ok(path)
    }

    /// Write `findings.md` and mirror it to `latest-findings.md`
    pub fn write_findings(
        &self,
        mode: Mode,
        rounds: &[Round],
        problems: &[String],
    ) -> OutputResult<PathBuf> {
        let content = render_findings(&self.date, mode, rounds, problems);
        let path = self.findings_path();
        write_atomic(&path, content.as_bytes())?;
        info!("Findings written -> {} ({} chars)", path.display(), content.len());

        let latest = self.paths.latest_findings();
        if let Err(e) = write_atomic(&latest, content.as_bytes()) {
            warn!("Failed to update {}: {}", latest.display(), e);
        }
        Ok(path)
    }

    /// Write `meta.json` and mirror it to `last-run-meta.json`
    pub fn write_meta(&self, meta: &RunMeta) -> OutputResult<PathBuf> {
        let body = serde_json::to_string_pretty(meta)?;
        let path = self.meta_path();
        write_atomic(&path, body.as_bytes())?;
        write_atomic(&self.paths.last_run_meta(), body.as_bytes())?;
        info!("Meta written -> {}", path.display());
        Ok(path)
    }

    /// Append drift rounds to the creative journal and write `drift.md`
    pub fn write_creative_journal(
        &self,
        drift_rounds: &[Round],
        at: DateTime<Local>,
    ) -> OutputResult<PathBuf> {
        let entry = render_journal_entry(drift_rounds, at);
        let journal = self.paths.creative_journal();
        if let Some(parent) = journal.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let is_new = !journal.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal)?;
        if is_new {
            file.write_all(JOURNAL_HEADER.as_bytes())?;
        }
        file.write_all(entry.as_bytes())?;
        info!("Creative journal updated -> {} (+{} chars)", journal.display(), entry.len());

        write_atomic(&self.run_dir().join("drift.md"), entry.as_bytes())?;
        Ok(journal)
    }
}

/// End time of the most recent finished run, of any status
pub fn last_run_ended(paths: &Paths) -> Option<DateTime<Local>> {
    #[derive(Deserialize)]
    struct LastRun {
        ended: Option<DateTime<Local>>,
        started: Option<DateTime<Local>>,
    }

    let raw = std::fs::read_to_string(paths.last_run_meta()).ok()?;
    let last: LastRun = serde_json::from_str(&raw).ok()?;
    last.ended.or(last.started)
}

/// Assemble the findings document. Pure: identical inputs give identical
/// bytes.
pub fn render_findings(date: &str, mode: Mode, rounds: &[Round], problems: &[String]) -> String {
    let mut lines: Vec<String> = vec![
        format!("# Findings: {}", date),
        String::new(),
        format!("*Mode: {}*", mode),
        format!("*Rounds: {}*", rounds.len()),
        String::new(),
    ];

    let synthesis = rounds
        .iter()
        .find(|r| r.phase == SYNTHESIS_PHASE && r.problem.is_none());
    let exploratory: Vec<&Round> = rounds
        .iter()
        .filter(|r| r.problem.is_none() && !r.is_drift())
        .filter(|r| !synthesis.is_some_and(|s| std::ptr::eq(*r, s)))
        .collect();
    let drift: Vec<&Round> = rounds.iter().filter(|r| r.is_drift()).collect();

    if let Some(round) = synthesis {
        lines.push("---".into());
        lines.push(String::new());
        lines.push(format!("## {}", round.title));
        lines.push(String::new());
        lines.push(round.output.clone());
        lines.push(String::new());
    }

    if !exploratory.is_empty() {
        lines.push("---".into());
        lines.push(String::new());
        lines.push("## Detailed Analysis".into());
        lines.push(String::new());
        for round in exploratory {
            push_round(&mut lines, round);
        }
    }

    if !problems.is_empty() {
        lines.push("---".into());
        lines.push(String::new());
        for (index, problem) in problems.iter().enumerate() {
            let heading: String = problem.chars().take(PROBLEM_HEADING_CHARS).collect();
            lines.push(format!("## Problem: {}", heading));
            lines.push(String::new());

            let mut any = false;
            for round in rounds.iter().filter(|r| r.problem_index == Some(index)) {
                push_round(&mut lines, round);
                any = true;
            }
            if !any {
                lines.push("*No rounds completed for this problem.*".into());
                lines.push(String::new());
            }
        }
    }

    if !drift.is_empty() {
        lines.push("---".into());
        lines.push(String::new());
        lines.push("## Creative Drift".into());
        lines.push(String::new());
        for round in drift {
            push_round(&mut lines, round);
        }
    }

    lines.join("\n")
}

fn push_round(lines: &mut Vec<String>, round: &Round) {
    lines.push(format!("### {}", round.title));
    lines.push(String::new());
    if !round.seeds.is_empty() {
        lines.push(format!("*Seeds: {}*", seed_list(&round.seeds)));
        lines.push(String::new());
    }
    lines.push(round.output.clone());
    lines.push(String::new());
}

fn seed_list(seeds: &[String]) -> String {
    seeds
        .iter()
        .map(|s| format!("[{}]", s))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_journal_entry(drift_rounds: &[Round], at: DateTime<Local>) -> String {
    let mut lines = vec![
        "\n---\n".to_string(),
        format!("## {} Drift Session", at.format("%Y-%m-%d %H:%M")),
        String::new(),
    ];
    for round in drift_rounds {
        let title = round.title.strip_prefix("Drift: ").unwrap_or(&round.title);
        lines.push(format!("### {}", title));
        if !round.seeds.is_empty() {
            lines.push(format!("*Seeds: {}*", seed_list(&round.seeds)));
        }
        lines.push(String::new());
        lines.push(round.output.trim().to_string());
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Write via a sibling temp file and rename, creating parent directories
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
