//! Runner Integration Tests
//!
//! End-to-end runs against a scripted gateway, an in-memory knowledge
//! context and a manual clock. Everything lands in a temp directory.

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use parking_lot::Mutex;
use reverie::config::Paths;
use reverie::error::{GatewayError, GatewayResult};
use reverie::{
    ContextSection, Gateway, GenerateOptions, KnowledgeContext, ManualClock, Mode, ProblemItem,
    Round, RunConfig, RunStatus, Runner, SearchHit, SearchProvider,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(usize, &str) -> Option<String> + Send + Sync>;

/// Gateway that answers from a script and can move the clock or cancel
struct ScriptedGateway {
    available: bool,
    respond: Responder,
    prompts: Mutex<Vec<String>>,
    clock: Arc<ManualClock>,
    latency: chrono::Duration,
    cancel_on_call: Option<(usize, CancellationToken)>,
    cancel_on_probe: Option<CancellationToken>,
}

impl ScriptedGateway {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            available: true,
            respond: Box::new(|n, _| Some(format!("Insight number {}", n + 1))),
            prompts: Mutex::new(Vec::new()),
            clock,
            latency: chrono::Duration::seconds(2),
            cancel_on_call: None,
            cancel_on_probe: None,
        }
    }

    fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn responding(mut self, respond: Responder) -> Self {
        self.respond = respond;
        self
    }

    fn with_latency(mut self, latency: chrono::Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Cancel while serving the `n`th call (1-based)
    fn cancelling_on(mut self, n: usize, cancel: CancellationToken) -> Self {
        self.cancel_on_call = Some((n, cancel));
        self
    }

    /// Cancel while the availability probe is in flight
    fn cancelling_on_probe(mut self, cancel: CancellationToken) -> Self {
        self.cancel_on_probe = Some(cancel);
        self
    }

    fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn is_available(&self) -> bool {
        if let Some(cancel) = &self.cancel_on_probe {
            cancel.cancel();
        }
        self.available
    }

    async fn generate(
        &self,
        prompt: &str,
        _system: &str,
        _options: &GenerateOptions,
    ) -> GatewayResult<String> {
        let n = {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.to_string());
            prompts.len() - 1
        };
        self.clock.advance(self.latency);
        if let Some((at, cancel)) = &self.cancel_on_call {
            if n + 1 == *at {
                cancel.cancel();
            }
        }
        (self.respond)(n, prompt).ok_or(GatewayError::EmptyResponse)
    }
}

/// Search stub that counts queries
#[derive(Default)]
struct CountingSearch {
    queries: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchProvider for CountingSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Vec<SearchHit> {
        self.queries.lock().push(query.to_string());
        vec![SearchHit {
            title: "Result".into(),
            url: "https://example.com/result".into(),
            snippet: "Something relevant".into(),
        }]
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Local.with_ymd_and_hms(2026, 5, 2, 23, 0, 0).unwrap(),
    ))
}

fn knowledge() -> Arc<KnowledgeContext> {
    Arc::new(KnowledgeContext::new(vec![
        ContextSection::new("goals", "ACTIVE GOALS", vec!["Ship the garden planner beta".into()]),
        ContextSection::new(
            "episodes",
            "RECENT EPISODES",
            vec!["Rewrote the sync engine".into(), "Skipped the gym twice".into()],
        ),
        ContextSection::new("mood", "MOOD", vec!["Energetic in the mornings".into()]),
    ]))
}

fn config() -> RunConfig {
    RunConfig {
        stop_at: None,
        ..RunConfig::default()
    }
}

fn runner(
    dir: &TempDir,
    config: RunConfig,
    gateway: Arc<ScriptedGateway>,
    clock: Arc<ManualClock>,
) -> Runner {
    Runner::new(Paths::new(dir.path()), config, gateway, knowledge())
        .with_clock(clock)
        .with_queue(Arc::new(Vec::<ProblemItem>::new()))
        .with_search(Arc::new(CountingSearch::default()))
        .with_preflight(Vec::new())
}

fn run_dir(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("2026-05-02")
}

fn read_round(dir: &TempDir, sequence: u32) -> Round {
    let path = run_dir(dir).join(format!("round-{:02}.json", sequence));
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn round_files(dir: &TempDir) -> usize {
    std::fs::read_dir(run_dir(dir))
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().starts_with("round-"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_exploratory_runs_every_phase() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));

    let outcome = runner(&dir, config(), gateway.clone(), clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.mode, Mode::Exploratory);
    assert_eq!(outcome.rounds_completed, 10);
    assert_eq!(gateway.calls(), 10);
    assert_eq!(round_files(&dir), 10);
    for sequence in 1..=10 {
        assert_eq!(read_round(&dir, sequence).sequence, sequence);
    }

    let findings = std::fs::read_to_string(run_dir(&dir).join("findings.md")).unwrap();
    assert!(findings.contains("## Final Synthesis"));
    assert!(findings.contains("## Detailed Analysis"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("latest-findings.md")).unwrap(),
        findings
    );

    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir(&dir).join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["status"], "completed");
    assert_eq!(meta["rounds_completed"], 10);
    assert!(!dir.path().join("overnight.pid").exists());
}

#[tokio::test]
async fn test_prior_output_flows_between_phases() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));

    runner(&dir, config(), gateway.clone(), clock)
        .run(CancellationToken::new())
        .await;

    let prompts = gateway.prompts.lock();
    assert!(prompts[0].contains("Ship the garden planner beta"));
    assert!(prompts[1].contains("### State of Everything\nInsight number 1"));
}

#[tokio::test]
async fn test_unreachable_gateway_is_an_error() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).unavailable());

    let outcome = runner(&dir, config(), gateway.clone(), clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.rounds_completed, 0);
    assert_eq!(outcome.reason.as_deref(), Some("gateway unavailable"));
    assert_eq!(gateway.calls(), 0);
    assert!(!run_dir(&dir).join("findings.md").exists());
    assert!(!dir.path().join("latest-findings.md").exists());

    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("last-run-meta.json")).unwrap()).unwrap();
    assert_eq!(meta["status"], "error");
}

#[tokio::test]
async fn test_unreachable_gateway_wins_over_stop_request() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let cancel = CancellationToken::new();
    let gateway = Arc::new(
        ScriptedGateway::new(clock.clone())
            .unavailable()
            .cancelling_on_probe(cancel.clone()),
    );

    let outcome = runner(&dir, config(), gateway.clone(), clock).run(cancel.clone()).await;

    assert!(cancel.is_cancelled());
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.reason.as_deref(), Some("gateway unavailable"));
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_empty_knowledge_is_an_error() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));

    let outcome = Runner::new(
        Paths::new(dir.path()),
        config(),
        gateway.clone(),
        Arc::new(KnowledgeContext::default()),
    )
    .with_clock(clock)
    .with_queue(Arc::new(Vec::<ProblemItem>::new()))
    .with_preflight(Vec::new())
    .run(CancellationToken::new())
    .await;

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.reason.as_deref(), Some("no knowledge context"));
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_research_marker_triggers_one_lookup() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).responding(Box::new(|n, prompt| {
        if n == 0 {
            Some("Not sure about this.\nRESEARCH: foo bar".into())
        } else if prompt.contains("=== RESEARCH RESULTS ===") {
            Some("Enriched answer".into())
        } else {
            Some(format!("Plain answer {}", n))
        }
    })));
    let search = Arc::new(CountingSearch::default());

    let outcome = runner(&dir, config(), gateway.clone(), clock)
        .with_search(search.clone())
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.rounds_completed, 10);
    assert_eq!(outcome.research_queries, 1);
    assert_eq!(*search.queries.lock(), vec!["foo bar".to_string()]);
    assert_eq!(gateway.calls(), 11);

    let first = read_round(&dir, 1);
    assert_eq!(first.output, "Enriched answer");
    assert!(first.research.contains("Search: foo bar"));
    for sequence in 2..=10 {
        assert!(read_round(&dir, sequence).research.is_empty());
    }
}

#[tokio::test]
async fn test_research_disabled_keeps_original_output() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(
        ScriptedGateway::new(clock.clone()).responding(Box::new(|_, _| Some("RESEARCH: anything".into()))),
    );
    let search = Arc::new(CountingSearch::default());
    let config = RunConfig {
        enable_research: false,
        ..config()
    };

    let outcome = runner(&dir, config, gateway.clone(), clock)
        .with_search(search.clone())
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.research_queries, 0);
    assert!(search.queries.lock().is_empty());
    assert_eq!(gateway.calls(), 10);
}

#[tokio::test]
async fn test_cancel_before_phase_k_keeps_earlier_rounds() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let cancel = CancellationToken::new();
    // Cancelling during call 3 stops before phase 4
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).cancelling_on(3, cancel.clone()));

    let outcome = runner(&dir, config(), gateway.clone(), clock).run(cancel).await;

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.rounds_completed, 3);
    assert_eq!(round_files(&dir), 3);
    assert_eq!(gateway.calls(), 3);
    assert!(run_dir(&dir).join("findings.md").exists());
}

#[tokio::test]
async fn test_cancel_before_start_is_stopped() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = runner(&dir, config(), gateway.clone(), clock).run(cancel).await;

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.rounds_completed, 0);
    assert_eq!(gateway.calls(), 0);
    assert!(!run_dir(&dir).join("findings.md").exists());
}

#[tokio::test]
async fn test_failed_round_is_skipped() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).responding(Box::new(|n, _| {
        (n != 1).then(|| format!("Answer {}", n))
    })));

    let outcome = runner(&dir, config(), gateway.clone(), clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rounds_completed, 9);
    assert_eq!(gateway.calls(), 10);
    // Sequence numbers stay contiguous; the skipped phase leaves no gap
    assert_eq!(read_round(&dir, 2).phase, "connections");
    assert_eq!(read_round(&dir, 9).phase, "evolution");
    assert!(!run_dir(&dir).join("round-10.json").exists());
}

#[tokio::test]
async fn test_all_rounds_failing_is_an_error() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).responding(Box::new(|_, _| None)));

    let outcome = runner(&dir, config(), gateway, clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.rounds_completed, 0);
    assert!(!run_dir(&dir).join("findings.md").exists());
}

#[tokio::test]
async fn test_directed_groups_rounds_by_problem() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));
    let queue = vec![
        ProblemItem::new("Choose a sync backend").with_context("Must work offline"),
        ProblemItem::new("Halve CI build times"),
    ];
    let config = RunConfig {
        rounds_per_problem: 3,
        ..config()
    };

    let outcome = runner(&dir, config, gateway.clone(), clock)
        .with_queue(Arc::new(queue))
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.mode, Mode::Directed);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rounds_completed, 6);
    assert_eq!(outcome.problems_processed, 2);

    for sequence in 1..=3 {
        assert_eq!(read_round(&dir, sequence).problem.as_deref(), Some("Choose a sync backend"));
    }
    for sequence in 4..=6 {
        assert_eq!(read_round(&dir, sequence).problem.as_deref(), Some("Halve CI build times"));
    }

    let prompts = gateway.prompts.lock();
    assert!(prompts[0].contains("Additional context: Must work offline"));
    assert!(prompts[3].contains("(first round)"));

    let findings = std::fs::read_to_string(run_dir(&dir).join("findings.md")).unwrap();
    assert_eq!(findings.matches("## Problem: ").count(), 2);
}

#[tokio::test]
async fn test_duplicate_queue_entries_stay_separate() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));
    let queue = vec![ProblemItem::new("Same question"), ProblemItem::new("Same question")];
    let config = RunConfig {
        rounds_per_problem: 2,
        ..config()
    };

    let outcome = runner(&dir, config, gateway, clock)
        .with_queue(Arc::new(queue))
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.rounds_completed, 4);
    assert_eq!(outcome.problems_processed, 2);
    assert_eq!(read_round(&dir, 2).problem_index, Some(0));
    assert_eq!(read_round(&dir, 3).problem_index, Some(1));

    let findings = std::fs::read_to_string(run_dir(&dir).join("findings.md")).unwrap();
    assert_eq!(findings.matches("## Problem: Same question").count(), 2);
    for n in 1..=4 {
        assert_eq!(findings.matches(&format!("Insight number {}\n", n)).count(), 1);
    }
}

#[tokio::test]
async fn test_time_budget_exhaustion_completes() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    // 0.01h is 36s; the first call alone takes longer
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).with_latency(chrono::Duration::seconds(40)));
    let config = RunConfig {
        max_hours: 0.01,
        ..config()
    };

    let outcome = runner(&dir, config, gateway.clone(), clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rounds_completed, 1);
    assert_eq!(outcome.reason.as_deref(), Some("time budget exhausted"));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_hard_stop_time_ends_run() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    // 23:00 start, 23:01 stop, 40s per call: two rounds fit
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).with_latency(chrono::Duration::seconds(40)));
    let config = RunConfig {
        stop_at: Some("23:01".into()),
        ..config()
    };

    let outcome = runner(&dir, config, gateway, clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rounds_completed, 2);
    assert_eq!(outcome.reason.as_deref(), Some("hard stop time reached"));
}

#[tokio::test]
async fn test_drift_mode_writes_journal() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));

    let outcome = runner(&dir, config(), gateway.clone(), clock)
        .with_mode_override(Some(Mode::Drift))
        .with_drift_seed(42)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.mode, Mode::Drift);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rounds_completed, 5);

    let mut phases: Vec<String> = (101..=105).map(|s| read_round(&dir, s).phase).collect();
    phases.sort();
    assert_eq!(
        phases,
        vec![
            "drift_free_association",
            "drift_inversion",
            "drift_letter",
            "drift_metaphor",
            "drift_spark"
        ]
    );

    let journal = std::fs::read_to_string(dir.path().join("creative-journal.md")).unwrap();
    assert!(journal.contains("Drift Session"));
    assert!(run_dir(&dir).join("drift.md").exists());
    let findings = std::fs::read_to_string(run_dir(&dir).join("findings.md")).unwrap();
    assert!(findings.contains("## Creative Drift"));
}

#[tokio::test]
async fn test_cancel_during_drift_keeps_earlier_techniques() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let cancel = CancellationToken::new();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()).cancelling_on(2, cancel.clone()));

    let outcome = runner(&dir, config(), gateway.clone(), clock)
        .with_mode_override(Some(Mode::Drift))
        .with_drift_seed(42)
        .run(cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.rounds_completed, 2);
    assert_eq!(gateway.calls(), 2);
    assert_eq!(round_files(&dir), 2);
    assert!(run_dir(&dir).join("round-101.json").exists());
    assert!(run_dir(&dir).join("round-102.json").exists());
    assert!(!run_dir(&dir).join("round-103.json").exists());
}

#[tokio::test]
async fn test_drift_alongside_structured_rounds() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));
    let config = RunConfig {
        drift_rounds: 2,
        ..config()
    };

    let outcome = runner(&dir, config, gateway.clone(), clock)
        .with_drift_seed(7)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome.mode, Mode::Exploratory);
    assert_eq!(outcome.rounds_completed, 12);
    assert!(run_dir(&dir).join("round-101.json").exists());
    assert!(run_dir(&dir).join("round-102.json").exists());
}

#[tokio::test]
async fn test_identical_rounds_render_identical_findings() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let gateway = Arc::new(ScriptedGateway::new(clock.clone()));
    runner(&dir, config(), gateway, clock.clone())
        .run(CancellationToken::new())
        .await;

    let rounds: Vec<Round> = (1..=10).map(|s| read_round(&dir, s)).collect();
    let first = reverie::output::render_findings("2026-05-02", Mode::Exploratory, &rounds, &[]);
    clock.advance(chrono::Duration::hours(3));
    let second = reverie::output::render_findings("2026-05-02", Mode::Exploratory, &rounds, &[]);
    assert_eq!(first, second);
    assert_eq!(
        first,
        std::fs::read_to_string(run_dir(&dir).join("findings.md")).unwrap()
    );
}
