//! Runner
//!
//! Executes exactly one run end to end and always returns a [`RunOutcome`]:
//!
//! 1. hold the runner liveness marker for the whole invocation
//! 2. verify the gateway is reachable (fatal if not)
//! 3. run catch-up tasks, best-effort
//! 4. gather and render the knowledge block (fatal if empty)
//! 5. resolve the mode
//! 6. bail out as stopped if cancellation is already requested
//! 7. run the structured segments, then drift
//! 8. write findings when at least one round exists
//! 9. write the run record

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Mode, Paths, ProblemItem, ProblemQueue, RunConfig};
use crate::drift::{DriftThinker, TECHNIQUES};
use crate::gather::{format_for_prompt, FileKnowledgeSource, KnowledgeContext, KnowledgeSource};
use crate::liveness::LivenessMarker;
use crate::llm::{Gateway, OllamaGateway};
use crate::output::{OutputWriter, RunMeta, RunOutcome, RunStatus};
use crate::preflight::{run_preflight, tasks_from_commands, PreflightTask};
use crate::research::{DuckDuckGoSearch, NoSearch, Researcher, SearchProvider};
use crate::thinker::{seconds, Round, RunBudget, Thinker};

/// Pick the mode for a run: explicit override, then a configured non-auto
/// mode, then directed when problems are queued.
pub fn resolve_mode(override_mode: Option<Mode>, configured: Mode, queue_has_items: bool) -> Mode {
    match override_mode.filter(|m| *m != Mode::Auto) {
        Some(mode) => mode,
        None if configured != Mode::Auto => configured,
        None if queue_has_items => Mode::Directed,
        None => Mode::Exploratory,
    }
}

/// One overnight run with its collaborators
pub struct Runner {
    paths: Paths,
    config: RunConfig,
    gateway: Arc<dyn Gateway>,
    knowledge: Arc<dyn KnowledgeSource>,
    queue: Arc<dyn ProblemQueue>,
    search: Arc<dyn SearchProvider>,
    clock: Arc<dyn Clock>,
    preflight: Vec<Box<dyn PreflightTask>>,
    mode_override: Option<Mode>,
    drift_seed: Option<u64>,
}

impl Runner {
    /// Runner with explicit gateway and knowledge source. The queue, search
    /// and catch-up tasks default to the file/web backed ones.
    pub fn new(
        paths: Paths,
        config: RunConfig,
        gateway: Arc<dyn Gateway>,
        knowledge: Arc<dyn KnowledgeSource>,
    ) -> Self {
        let search: Arc<dyn SearchProvider> = if config.enable_research {
            Arc::new(DuckDuckGoSearch::new())
        } else {
            Arc::new(NoSearch)
        };

        Self {
            queue: Arc::new(crate::config::FileProblemQueue::new(paths.queue_file())),
            preflight: tasks_from_commands(&config.catch_up_commands),
            paths,
            config,
            gateway,
            knowledge,
            search,
            clock: Arc::new(SystemClock),
            mode_override: None,
            drift_seed: None,
        }
    }

    /// Production wiring: Ollama gateway and file-backed knowledge
    pub fn from_config(paths: Paths, config: RunConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let gateway = Arc::new(OllamaGateway::new(config.ollama_url.clone(), clock.clone())?);
        let knowledge = Arc::new(FileKnowledgeSource::new(paths.knowledge_dir(), clock.clone()));
        Ok(Self::new(paths, config, gateway, knowledge).with_clock(clock))
    }

    pub fn with_queue(mut self, queue: Arc<dyn ProblemQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = search;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_preflight(mut self, tasks: Vec<Box<dyn PreflightTask>>) -> Self {
        self.preflight = tasks;
        self
    }

    pub fn with_mode_override(mut self, mode: Option<Mode>) -> Self {
        self.mode_override = mode;
        self
    }

    /// Seed drift's RNG for reproducible runs
    pub fn with_drift_seed(mut self, seed: u64) -> Self {
        self.drift_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute one run. Never fails: every path ends in a written run
    /// record and a returned outcome.
    pub async fn run(&self, cancel: CancellationToken) -> RunOutcome {
        let _marker = match LivenessMarker::acquire(self.paths.runner_pid()) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("Could not write runner marker {}: {}", self.paths.runner_pid().display(), e);
                None
            }
        };

        let started = self.clock.now();
        let writer = OutputWriter::new(self.paths.clone(), started.format("%Y-%m-%d").to_string());
        let hard_stop = self.config.hard_stop_time().unwrap_or_else(|e| {
            warn!("Ignoring stop time: {}", e);
            None
        });
        let budget = RunBudget::start(self.clock.clone(), self.config.max_duration(), hard_stop);

        let queue = self.queue.load();
        let mode = resolve_mode(self.mode_override, self.config.mode, !queue.is_empty());
        info!("Overnight run starting, mode: {}", mode);

        let mut run = RunState::new(mode);
        self.execute(&cancel, &writer, &budget, &queue, &mut run).await;
        self.finish(&cancel, &writer, &budget, run)
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        writer: &OutputWriter,
        budget: &RunBudget,
        queue: &[ProblemItem],
        run: &mut RunState,
    ) {
        self.gateway.invalidate_availability();
        if !self.gateway.is_available().await {
            error!("Gateway not available at {}, cannot think", self.config.ollama_url);
            run.fail("gateway unavailable");
            return;
        }
        info!("Gateway available");

        let failed = run_preflight(&self.preflight).await;
        if failed > 0 {
            warn!("{} catch-up task(s) failed, continuing", failed);
        }

        let knowledge = self.knowledge.gather_all(self.config.context_days).await;
        let context = format_for_prompt(&knowledge, self.config.context_max_chars);
        info!("Context formatted: {} chars", context.chars().count());
        if context.trim().is_empty() {
            error!("No context gathered, nothing to think about");
            run.fail("no knowledge context");
            return;
        }

        if cancel.is_cancelled() {
            info!("Stop requested before the first round");
            run.reason = Some("stopped before thinking".into());
            return;
        }

        let mut thinker = Thinker::new(
            self.gateway.clone(),
            Researcher::new(self.search.clone()),
            writer.clone(),
            self.clock.clone(),
            budget.clone(),
            cancel.clone(),
            context,
            &self.config,
        );

        match run.mode {
            Mode::Exploratory | Mode::Auto => {
                let rounds = thinker.run_exploratory().await;
                run.rounds.extend(rounds);
            }
            Mode::Directed => {
                run.problems = queue.iter().map(|p| p.text.clone()).collect();
                let rounds = thinker.run_directed(queue).await;
                run.rounds.extend(rounds);
            }
            Mode::Drift => {}
        }
        run.research_queries = thinker.research_queries();
        run.stop_reason = thinker.stop_reason().map(|r| r.to_string());

        let drift_rounds = match (run.mode, self.config.drift_rounds) {
            (Mode::Drift, 0) => TECHNIQUES.len(),
            (_, n) => n,
        };
        if drift_rounds > 0 && budget.check(cancel).is_none() {
            self.drift(cancel, writer, &knowledge, drift_rounds, run).await;
        }

        if !run.rounds.is_empty() {
            if let Err(e) = writer.write_findings(run.mode, &run.rounds, &run.problems) {
                error!("Failed to write findings: {}", e);
            }
        }
    }

    async fn drift(
        &self,
        cancel: &CancellationToken,
        writer: &OutputWriter,
        knowledge: &KnowledgeContext,
        rounds: usize,
        run: &mut RunState,
    ) {
        let mut drifter = DriftThinker::new(
            self.gateway.clone(),
            writer.clone(),
            self.clock.clone(),
            cancel.clone(),
            &self.config,
        );
        if let Some(seed) = self.drift_seed {
            drifter = drifter.with_seed(seed);
        }

        let drift_rounds = drifter.run(knowledge, rounds).await;
        if drift_rounds.is_empty() {
            return;
        }
        if let Err(e) = writer.write_creative_journal(&drift_rounds, self.clock.now()) {
            warn!("Failed to update creative journal: {}", e);
        }
        run.rounds.extend(drift_rounds);
    }

    fn finish(
        &self,
        cancel: &CancellationToken,
        writer: &OutputWriter,
        budget: &RunBudget,
        run: RunState,
    ) -> RunOutcome {
        // A failed precondition is an error even if a stop arrived meanwhile
        let status = if run.fatal {
            RunStatus::Error
        } else if cancel.is_cancelled() {
            RunStatus::Stopped
        } else if run.rounds.is_empty() {
            RunStatus::Error
        } else {
            RunStatus::Completed
        };

        let reason = match status {
            RunStatus::Error => run.reason.or_else(|| Some("no rounds produced".into())),
            RunStatus::Stopped => run.reason.or_else(|| Some("cancelled".into())),
            RunStatus::Completed => run.stop_reason,
        };

        let problems_processed = run
            .rounds
            .iter()
            .filter_map(|r| r.problem_index)
            .collect::<HashSet<_>>()
            .len();

        let outcome = RunOutcome {
            status,
            mode: run.mode,
            rounds_completed: run.rounds.len(),
            problems_processed,
            research_queries: run.research_queries,
            duration_minutes: (seconds(budget.elapsed()) / 60.0 * 10.0).round() / 10.0,
            reason,
        };

        let meta = RunMeta::new(&outcome, budget.started(), self.clock.now(), &self.config);
        if let Err(e) = writer.write_meta(&meta) {
            error!("Failed to write run record: {}", e);
        }

        info!("=== OVERNIGHT RUN FINISHED ===");
        info!("  Mode: {}", outcome.mode);
        info!("  Rounds: {}", outcome.rounds_completed);
        info!("  Research queries: {}", outcome.research_queries);
        info!("  Duration: {:.1} minutes", outcome.duration_minutes);
        info!("  Status: {}", outcome.status);
        outcome
    }
}

/// Mutable bookkeeping for one run
struct RunState {
    mode: Mode,
    rounds: Vec<Round>,
    problems: Vec<String>,
    research_queries: usize,
    reason: Option<String>,
    stop_reason: Option<String>,
    fatal: bool,
}

impl RunState {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            rounds: Vec::new(),
            problems: Vec::new(),
            research_queries: 0,
            reason: None,
            stop_reason: None,
            fatal: false,
        }
    }

    fn fail(&mut self, reason: &str) {
        self.fatal = true;
        self.reason = Some(reason.to_string());
    }
}
