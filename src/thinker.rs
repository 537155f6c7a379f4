//! Thinker
//!
//! Drives the structured phase programs. Each phase renders its template
//! with the knowledge block and the tail of earlier output, calls the
//! gateway, optionally does one research-enriched re-call, then persists the
//! round before the next phase starts. A failed call skips the phase; only
//! the stop predicate ends a segment early.

use chrono::{DateTime, Duration, Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{ProblemItem, RunConfig};
use crate::llm::{Gateway, GenerateOptions};
use crate::output::OutputWriter;
use crate::prompts::{self, Phase, PromptVars, DIRECTED_PHASES, EXPLORATORY_PHASES, SYSTEM_PROMPT};
use crate::research::Researcher;

/// Placeholder for `{prev_output}` before any phase produced output
pub const FIRST_ROUND_PLACEHOLDER: &str = "(first round)";

/// One persisted model invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub sequence: u32,
    pub phase: String,
    pub title: String,
    pub output: String,
    /// Research block used for the final output, empty when none
    #[serde(default)]
    pub research: String,
    pub duration_secs: f64,
    pub timestamp: DateTime<Local>,
    /// Originating problem (directed rounds only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    /// Queue position of the originating problem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_index: Option<usize>,
    /// Categories of the sampled items (drift rounds only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<String>,
}

impl Round {
    pub fn is_drift(&self) -> bool {
        self.phase.starts_with("drift_")
    }
}

/// Why a segment stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit stop request
    Cancelled,
    /// Run exceeded `max_hours`
    TimeBudget,
    /// Wall clock passed the configured stop time
    HardStop,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Cancelled => "cancelled",
            StopReason::TimeBudget => "time budget exhausted",
            StopReason::HardStop => "hard stop time reached",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time limits of one run, anchored at its start
#[derive(Clone)]
pub struct RunBudget {
    clock: Arc<dyn Clock>,
    started: DateTime<Local>,
    max_duration: Duration,
    hard_stop: Option<DateTime<Local>>,
}

impl RunBudget {
    /// Start the budget now. A stop time that precedes the start refers to
    /// the next day.
    pub fn start(clock: Arc<dyn Clock>, max_duration: Duration, stop_at: Option<NaiveTime>) -> Self {
        let started = clock.now();
        let hard_stop = stop_at.and_then(|time| {
            let at = started
                .date_naive()
                .and_time(time)
                .and_local_timezone(Local)
                .earliest()?;
            Some(if at < started { at + Duration::days(1) } else { at })
        });

        Self {
            clock,
            started,
            max_duration,
            hard_stop,
        }
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn hard_stop(&self) -> Option<DateTime<Local>> {
        self.hard_stop
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now() - self.started
    }

    /// First limit that is hit, if any. Cancellation wins over time limits.
    pub fn check(&self, cancel: &CancellationToken) -> Option<StopReason> {
        if cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        let now = self.clock.now();
        if now - self.started >= self.max_duration {
            return Some(StopReason::TimeBudget);
        }
        match self.hard_stop {
            Some(stop) if now >= stop => Some(StopReason::HardStop),
            _ => None,
        }
    }
}

/// Last `max_chars` characters of `text`
pub fn bounded_tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Cumulative output handed from phase to phase
#[derive(Debug, Clone, Default)]
pub struct PriorOutput {
    text: String,
    max_chars: usize,
}

impl PriorOutput {
    pub fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            max_chars,
        }
    }

    /// Start from supplementary context (directed problems)
    pub fn seeded(seed: impl Into<String>, max_chars: usize) -> Self {
        let mut prior = Self::new(max_chars);
        prior.text = seed.into();
        prior.trim();
        prior
    }

    pub fn push(&mut self, title: &str, output: &str) {
        self.text.push_str("\n\n### ");
        self.text.push_str(title);
        self.text.push('\n');
        self.text.push_str(output);
        self.trim();
    }

    fn trim(&mut self) {
        let keep = bounded_tail(&self.text, self.max_chars).len();
        if keep < self.text.len() {
            self.text.drain(..self.text.len() - keep);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Value for the `{prev_output}` slot
    pub fn as_prompt(&self) -> &str {
        if self.text.is_empty() {
            FIRST_ROUND_PLACEHOLDER
        } else {
            &self.text
        }
    }
}

/// Runs exploratory and directed segments for one run
pub struct Thinker {
    gateway: Arc<dyn Gateway>,
    researcher: Researcher,
    writer: OutputWriter,
    clock: Arc<dyn Clock>,
    budget: RunBudget,
    cancel: CancellationToken,
    context: String,
    options: GenerateOptions,
    research_enabled: bool,
    rounds_per_problem: usize,
    prior_output_chars: usize,
    next_sequence: u32,
    research_queries: usize,
    stop_reason: Option<StopReason>,
}

impl Thinker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn Gateway>,
        researcher: Researcher,
        writer: OutputWriter,
        clock: Arc<dyn Clock>,
        budget: RunBudget,
        cancel: CancellationToken,
        context: String,
        config: &RunConfig,
    ) -> Self {
        Self {
            gateway,
            researcher,
            writer,
            clock,
            budget,
            cancel,
            context,
            options: GenerateOptions::structured(
                config.think_model.clone(),
                config.temperature,
                config.max_tokens,
            ),
            research_enabled: config.enable_research,
            rounds_per_problem: config.rounds_per_problem,
            prior_output_chars: config.prior_output_chars,
            next_sequence: 1,
            research_queries: 0,
            stop_reason: None,
        }
    }

    /// Rounds persisted so far
    pub fn rounds_completed(&self) -> usize {
        (self.next_sequence - 1) as usize
    }

    /// Searches issued so far
    pub fn research_queries(&self) -> usize {
        self.research_queries
    }

    /// Why the last segment stopped early, if it did
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    fn should_stop(&mut self) -> bool {
        match self.budget.check(&self.cancel) {
            Some(reason) => {
                if self.stop_reason.is_none() {
                    info!("Stopping: {}", reason);
                }
                self.stop_reason = Some(reason);
                true
            }
            None => false,
        }
    }

    /// Run every exploratory phase in order
    pub async fn run_exploratory(&mut self) -> Vec<Round> {
        info!("=== EXPLORATORY THINKING ({} phases) ===", EXPLORATORY_PHASES.len());
        let mut prior = PriorOutput::new(self.prior_output_chars);
        let mut rounds = Vec::new();

        for phase in EXPLORATORY_PHASES.iter() {
            if self.should_stop() {
                break;
            }
            if let Some(round) = self.run_phase(phase, &mut prior, None).await {
                rounds.push(round);
            }
        }

        rounds
    }

    /// Run the directed program once per queued problem
    pub async fn run_directed(&mut self, queue: &[ProblemItem]) -> Vec<Round> {
        if queue.is_empty() {
            return Vec::new();
        }

        let phases = &DIRECTED_PHASES[..self.rounds_per_problem.min(DIRECTED_PHASES.len())];
        info!(
            "=== DIRECTED THINKING ({} problems, {} phases each) ===",
            queue.len(),
            phases.len()
        );
        let mut rounds = Vec::new();

        for (index, item) in queue.iter().enumerate() {
            if self.should_stop() {
                break;
            }
            info!("Problem: {}", item.text.chars().take(80).collect::<String>());

            let mut prior = match item.context.as_deref().map(str::trim) {
                Some(ctx) if !ctx.is_empty() => {
                    PriorOutput::seeded(format!("Additional context: {}\n", ctx), self.prior_output_chars)
                }
                _ => PriorOutput::new(self.prior_output_chars),
            };

            for phase in phases {
                if self.should_stop() {
                    break;
                }
                if let Some(round) = self
                    .run_phase(phase, &mut prior, Some((index, item.text.as_str())))
                    .await
                {
                    rounds.push(round);
                }
            }
        }

        rounds
    }

    async fn run_phase(
        &mut self,
        phase: &Phase,
        prior: &mut PriorOutput,
        problem: Option<(usize, &str)>,
    ) -> Option<Round> {
        let started = self.clock.now();
        let mut vars = PromptVars {
            context: &self.context,
            prev_output: prior.as_prompt(),
            problem: problem.map(|(_, text)| text).unwrap_or_default(),
            research: "",
            items: "",
        };

        info!(phase = phase.name, "Round {}: {}", self.next_sequence, phase.title);
        let mut output = match self.think(&prompts::render(phase.template, &vars)).await {
            Some(output) => output,
            None => {
                warn!("Phase '{}' produced no output, skipping", phase.name);
                return None;
            }
        };

        let report = self
            .researcher
            .research_if_needed(&output, self.research_enabled)
            .await;
        self.research_queries += report.queries_run;

        if !report.is_empty() {
            vars.research = &report.text;
            info!(phase = phase.name, "  Re-running with research");
            match self.think(&prompts::render(phase.template, &vars)).await {
                Some(enriched) => output = enriched,
                None => warn!("  Enriched call failed, keeping original output"),
            }
        }

        let round = Round {
            sequence: self.next_sequence,
            phase: phase.name.to_string(),
            title: phase.title.to_string(),
            output,
            research: report.text,
            duration_secs: seconds(self.clock.now() - started),
            timestamp: self.clock.now(),
            problem: problem.map(|(_, text)| text.to_string()),
            problem_index: problem.map(|(index, _)| index),
            seeds: Vec::new(),
        };
        self.next_sequence += 1;

        if let Err(e) = self.writer.write_round(&round) {
            warn!("Failed to persist round {}: {}", round.sequence, e);
        }
        prior.push(&round.title, &round.output);
        Some(round)
    }

    async fn think(&self, prompt: &str) -> Option<String> {
        let started = self.clock.now();
        match self.gateway.generate(prompt, SYSTEM_PROMPT, &self.options).await {
            Ok(output) => {
                info!(
                    "  Done in {:.1}s ({} chars)",
                    seconds(self.clock.now() - started),
                    output.len()
                );
                Some(output)
            }
            Err(e) => {
                warn!("  Generation failed: {}", e);
                None
            }
        }
    }
}

pub(crate) fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn clock_at(h: u32, m: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Local.with_ymd_and_hms(2026, 5, 2, h, m, 0).unwrap()))
    }

    #[test]
    fn test_bounded_tail_is_char_safe() {
        assert_eq!(bounded_tail("abcdef", 3), "def");
        assert_eq!(bounded_tail("abc", 10), "abc");
        assert_eq!(bounded_tail("abc", 0), "");
        assert_eq!(bounded_tail("héllo wörld", 5), "wörld");
    }

    #[test]
    fn test_prior_output_accumulates_and_caps() {
        let mut prior = PriorOutput::new(40);
        assert_eq!(prior.as_prompt(), FIRST_ROUND_PLACEHOLDER);

        prior.push("Patterns", "late nights");
        assert_eq!(prior.as_prompt(), "\n\n### Patterns\nlate nights");

        prior.push("Risks", "the sync engine has no tests at all");
        assert_eq!(prior.as_prompt().chars().count(), 40);
        assert!(prior.as_prompt().ends_with("no tests at all"));
    }

    #[test]
    fn test_seeded_prior_output() {
        let prior = PriorOutput::seeded("Additional context: deadline Friday\n", 3000);
        assert_eq!(prior.as_prompt(), "Additional context: deadline Friday\n");
    }

    #[test]
    fn test_budget_time_limit() {
        let clock = clock_at(23, 0);
        let budget = RunBudget::start(clock.clone(), Duration::minutes(30), None);
        let cancel = CancellationToken::new();

        assert_eq!(budget.check(&cancel), None);
        clock.advance(Duration::minutes(30));
        assert_eq!(budget.check(&cancel), Some(StopReason::TimeBudget));

        cancel.cancel();
        assert_eq!(budget.check(&cancel), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_hard_stop_rolls_to_next_day() {
        let clock = clock_at(23, 0);
        let stop = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let budget = RunBudget::start(clock.clone(), Duration::hours(24), Some(stop));
        let cancel = CancellationToken::new();

        assert_eq!(
            budget.hard_stop(),
            Some(Local.with_ymd_and_hms(2026, 5, 3, 7, 0, 0).unwrap())
        );
        clock.advance(Duration::hours(7));
        assert_eq!(budget.check(&cancel), None);
        clock.advance(Duration::hours(1));
        assert_eq!(budget.check(&cancel), Some(StopReason::HardStop));
    }

    #[test]
    fn test_hard_stop_later_same_day() {
        let clock = clock_at(1, 0);
        let stop = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let budget = RunBudget::start(clock, Duration::hours(24), Some(stop));
        assert_eq!(
            budget.hard_stop(),
            Some(Local.with_ymd_and_hms(2026, 5, 2, 7, 0, 0).unwrap())
        );
    }
}
