//! Configuration management
//!
//! Three pieces live here:
//! - [`Paths`]: where every artifact lives on disk
//! - [`RunConfig`]: typed run settings over documented defaults, reloaded
//!   from `overnight-config.json` on every scheduler tick
//! - the directed-problem queue ([`ProblemQueue`], [`FileProblemQueue`])

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::ConfigError;

/// On-disk layout rooted at `REVERIE_HOME`
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from `REVERIE_HOME`, falling back to the platform
    /// data directory
    pub fn from_env() -> Self {
        let root = std::env::var("REVERIE_HOME")
            .map(|raw| PathBuf::from(shellexpand::tilde(&raw).into_owned()))
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("reverie")
                    .join("overnight")
            });
        Self { root }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("overnight-config.json")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.root.join("overnight-queue.json")
    }

    pub fn runner_pid(&self) -> PathBuf {
        self.root.join("overnight.pid")
    }

    pub fn scheduler_pid(&self) -> PathBuf {
        self.root.join("scheduler.pid")
    }

    pub fn pause_file(&self) -> PathBuf {
        self.root.join("brain-pause")
    }

    pub fn latest_findings(&self) -> PathBuf {
        self.root.join("latest-findings.md")
    }

    pub fn last_run_meta(&self) -> PathBuf {
        self.root.join("last-run-meta.json")
    }

    pub fn creative_journal(&self) -> PathBuf {
        self.root.join("creative-journal.md")
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        self.root.join("knowledge")
    }

    /// Stamp file touched by the assistant on every user interaction
    pub fn activity_stamp(&self) -> PathBuf {
        self.root.join("session-activity")
    }

    /// Heartbeat file kept fresh by the companion process while it works
    pub fn companion_heartbeat(&self) -> PathBuf {
        self.root.join("companion-heartbeat")
    }

    /// Output directory for one run date (`YYYY-MM-DD`)
    pub fn run_dir(&self, date: &str) -> PathBuf {
        self.root.join(date)
    }
}

/// Thinking mode, as configured or requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Directed when the queue has problems, exploratory otherwise
    #[default]
    Auto,
    Exploratory,
    Directed,
    /// Free-associative drift rounds only
    Drift,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Exploratory => "exploratory",
            Self::Directed => "directed",
            Self::Drift => "drift",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "exploratory" => Ok(Self::Exploratory),
            "directed" => Ok(Self::Directed),
            "drift" => Ok(Self::Drift),
            other => Err(format!(
                "unknown mode '{}' (expected auto, exploratory, directed or drift)",
                other
            )),
        }
    }
}

/// Scheduler strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Wait for the user to go idle, then keep a minimum gap between runs
    #[default]
    SessionAware,
    /// Run on a fixed interval, only dodging live activity
    Scheduled,
}

/// Run settings. Every field has a default; unknown keys in the config
/// file are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock budget for one run, in hours
    pub max_hours: f64,
    /// Time of day (HH:MM) after which no new phase starts; `None` disables
    pub stop_at: Option<String>,
    /// Model used for every generation call
    pub think_model: String,
    pub mode: Mode,
    /// Directed phases per problem (capped by the directed program length)
    pub rounds_per_problem: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub enable_research: bool,
    /// Drift rounds run after the structured phases (0 disables)
    pub drift_rounds: usize,
    pub drift_temperature: f32,
    pub ollama_url: String,
    /// Knowledge window handed to the gatherer
    pub context_days: u32,
    /// Hard cap on the rendered knowledge block
    pub context_max_chars: usize,
    /// Tail of cumulative prior output fed to later phases
    pub prior_output_chars: usize,

    pub schedule_mode: ScheduleMode,
    /// Scheduled strategy: hours between runs
    pub interval_hours: f64,
    /// Session-aware strategy: minimum hours between runs
    pub min_gap_hours: f64,
    /// Session-aware strategy: idle minutes required after user activity
    pub activity_cooldown_minutes: i64,
    /// Scheduled strategy: buffer around live activity
    pub activity_buffer_minutes: i64,
    /// Quiet window start hour (0-23); equal start/end disables
    pub quiet_hours_start: u32,
    pub quiet_hours_end: u32,
    pub poll_interval_secs: u64,

    /// Shell commands run best-effort before gathering (overdue analyses etc.)
    pub catch_up_commands: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_hours: 6.0,
            stop_at: Some("07:00".to_string()),
            think_model: "qwen2.5:32b".to_string(),
            mode: Mode::Auto,
            rounds_per_problem: 5,
            max_tokens: 2048,
            temperature: 0.7,
            enable_research: true,
            drift_rounds: 0,
            drift_temperature: 0.95,
            ollama_url: "http://localhost:11434".to_string(),
            context_days: 30,
            context_max_chars: 6000,
            prior_output_chars: 3000,
            schedule_mode: ScheduleMode::SessionAware,
            interval_hours: 6.0,
            min_gap_hours: 4.0,
            activity_cooldown_minutes: 30,
            activity_buffer_minutes: 5,
            quiet_hours_start: 3,
            quiet_hours_end: 6,
            poll_interval_secs: 60,
            catch_up_commands: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Run time budget
    pub fn max_duration(&self) -> Duration {
        Duration::milliseconds((self.max_hours.max(0.0) * 3_600_000.0).round() as i64)
    }

    /// Parsed hard-stop time of day, if configured
    pub fn hard_stop_time(&self) -> Result<Option<NaiveTime>, ConfigError> {
        match self.stop_at.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_time_of_day(raw).map(Some),
        }
    }

    /// Whether `hour` falls inside the quiet window (which may wrap midnight)
    pub fn in_quiet_hours(&self, hour: u32) -> bool {
        let (start, end) = (self.quiet_hours_start, self.quiet_hours_end);
        if start == end {
            return false;
        }
        if start < end {
            start <= hour && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    pub fn quiet_hours_label(&self) -> String {
        format!("{:02}:00-{:02}:00", self.quiet_hours_start, self.quiet_hours_end)
    }
}

/// Upper bound for minute-valued settings (one year)
pub(crate) const MAX_MINUTES: i64 = 525_600;
/// Upper bound for hour-valued settings (one year)
const MAX_HOURS: f64 = 8_760.0;
/// Upper bound for the knowledge window (ten years)
pub(crate) const MAX_CONTEXT_DAYS: u32 = 3_650;
const MAX_POLL_SECS: u64 = 86_400;

impl RunConfig {
    /// Pull hand-edited values into ranges the time arithmetic can hold
    pub fn clamped(mut self) -> Self {
        self.max_hours = clamp_hours(self.max_hours);
        self.interval_hours = clamp_hours(self.interval_hours);
        self.min_gap_hours = clamp_hours(self.min_gap_hours);
        self.activity_cooldown_minutes = self.activity_cooldown_minutes.clamp(0, MAX_MINUTES);
        self.activity_buffer_minutes = self.activity_buffer_minutes.clamp(0, MAX_MINUTES);
        self.context_days = self.context_days.min(MAX_CONTEXT_DAYS);
        self.poll_interval_secs = self.poll_interval_secs.clamp(1, MAX_POLL_SECS);
        self
    }
}

fn clamp_hours(hours: f64) -> f64 {
    if hours.is_nan() {
        0.0
    } else {
        hours.clamp(0.0, MAX_HOURS)
    }
}

/// Parse `HH:MM`
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidTimeOfDay(raw.to_string()))
}

/// Loads [`RunConfig`] fresh from disk
#[derive(Debug, Clone)]
pub struct ConfigStore {
    paths: Paths,
}

impl ConfigStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Load the config file over defaults. A missing file is normal; a
    /// malformed one is logged and ignored.
    pub fn load_config(&self) -> RunConfig {
        let mut config = match self.read_config_file() {
            Ok(Some(config)) => config,
            Ok(None) => RunConfig::default(),
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", self.paths.config_file().display(), e);
                RunConfig::default()
            }
        };

        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.ollama_url = url;
        }

        config.clamped()
    }

    fn read_config_file(&self) -> Result<Option<RunConfig>, ConfigError> {
        let path = self.paths.config_file();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: RunConfig = serde_json::from_str(&raw)?;
        // Validate eagerly so a typo surfaces on load, not mid-run
        config.hard_stop_time()?;
        Ok(Some(config))
    }

    pub fn queue(&self) -> FileProblemQueue {
        FileProblemQueue::new(self.paths.queue_file())
    }
}

/// One directed-thinking problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ProblemItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Queue entries accept a bare string or an object
#[derive(Deserialize)]
#[serde(untagged)]
enum RawProblem {
    Text(String),
    Detailed {
        #[serde(alias = "problem")]
        text: String,
        #[serde(default)]
        context: Option<String>,
    },
}

impl From<RawProblem> for ProblemItem {
    fn from(raw: RawProblem) -> Self {
        match raw {
            RawProblem::Text(text) => ProblemItem::new(text),
            RawProblem::Detailed { text, context } => ProblemItem {
                text,
                context: context.filter(|c| !c.trim().is_empty()),
            },
        }
    }
}

/// Read-only view of the directed-problem queue. Lifecycle of the queue
/// (adding, retiring problems) is owned elsewhere.
pub trait ProblemQueue: Send + Sync {
    fn load(&self) -> Vec<ProblemItem>;
}

impl ProblemQueue for Vec<ProblemItem> {
    fn load(&self) -> Vec<ProblemItem> {
        self.clone()
    }
}

/// JSON-file backed queue
#[derive(Debug, Clone)]
pub struct FileProblemQueue {
    path: PathBuf,
}

impl FileProblemQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProblemQueue for FileProblemQueue {
    fn load(&self) -> Vec<ProblemItem> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(serde_json::Value::Array(entries)) => entries,
            Ok(_) => {
                warn!("Queue {} is not a JSON array, ignoring", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Queue {} is malformed: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<RawProblem>(entry) {
                Ok(raw) => Some(ProblemItem::from(raw)),
                Err(e) => {
                    debug!("Skipping queue entry: {}", e);
                    None
                }
            })
            .filter(|item| !item.text.trim().is_empty())
            .collect()
    }
}
