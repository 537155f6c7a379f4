//! Reverie
//!
//! Autonomous background thinking engine for a personal knowledge assistant.
//! It decides when conditions justify an unattended run, drives structured
//! reasoning rounds against a local Ollama model, looks things up on the web
//! when the model asks, and leaves a findings document for the morning.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──► Runner ──┬── Thinker ──┬── Gateway (Ollama)
//!  (poll loop)  (1 run)  │             └── Research (DuckDuckGo)
//!                        ├── Drift ───── Gateway
//!                        └── OutputWriter (rounds, findings, meta)
//! ```
//!
//! Cancellation is a [`tokio_util::sync::CancellationToken`] passed down from
//! the scheduler (or the binary's signal handler). It is polled between
//! phases, problems and drift techniques; a call in flight is never
//! interrupted.

pub mod activity;
pub mod clock;
pub mod config;
pub mod drift;
pub mod error;
pub mod gather;
pub mod liveness;
pub mod llm;
pub mod output;
pub mod preflight;
pub mod prompts;
pub mod research;
pub mod runner;
pub mod scheduler;
pub mod thinker;

pub use activity::{ActivityProbe, FileActivityProbe, NoActivity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigStore, FileProblemQueue, Mode, Paths, ProblemItem, ProblemQueue, RunConfig, ScheduleMode};
pub use drift::DriftThinker;
pub use error::{ConfigError, GatewayError, OutputError};
pub use gather::{format_for_prompt, ContextSection, FileKnowledgeSource, KnowledgeContext, KnowledgeSource};
pub use liveness::LivenessMarker;
pub use llm::{AvailabilityCache, Gateway, GenerateOptions, OllamaGateway};
pub use output::{OutputWriter, RunMeta, RunOutcome, RunStatus};
pub use preflight::{CommandTask, PreflightTask};
pub use research::{DuckDuckGoSearch, NoSearch, Researcher, ResearchReport, SearchHit, SearchProvider};
pub use runner::{resolve_mode, Runner};
pub use scheduler::{RunnerFactory, Scheduler, SchedulerDecision};
pub use thinker::{bounded_tail, PriorOutput, Round, RunBudget, StopReason, Thinker};
