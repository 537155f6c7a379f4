//! Creative drift
//!
//! Instead of the structured programs, drift samples a few items from
//! different knowledge categories and asks the model to free-associate,
//! invert or re-imagine them. Output goes to the creative journal as well as
//! the findings.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RunConfig;
use crate::gather::KnowledgeContext;
use crate::llm::{Gateway, GenerateOptions};
use crate::output::OutputWriter;
use crate::prompts::{self, PromptVars, DRIFT_SYSTEM_PROMPT};
use crate::thinker::{seconds, Round};

/// Drift round files are numbered from here to stay clear of structured rounds
pub const DRIFT_SEQUENCE_OFFSET: u32 = 100;

/// One drift technique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Technique {
    pub name: &'static str,
    pub title: &'static str,
    pub template: &'static str,
    /// Items sampled from the context
    pub sample_size: usize,
}

pub static TECHNIQUES: [Technique; 5] = [
    Technique {
        name: "free_association",
        title: "Free Association",
        template: prompts::FREE_ASSOCIATION,
        sample_size: 3,
    },
    Technique {
        name: "inversion",
        title: "Inversion",
        template: prompts::INVERSION,
        sample_size: 1,
    },
    Technique {
        name: "metaphor",
        title: "Metaphor",
        template: prompts::METAPHOR,
        sample_size: 3,
    },
    Technique {
        name: "spark",
        title: "Spark",
        template: prompts::SPARK,
        sample_size: 2,
    },
    Technique {
        name: "letter",
        title: "Letter to Morning",
        template: prompts::LETTER,
        sample_size: 3,
    },
];

/// A sampled `(category, text)` item
pub type SeedItem = (String, String);

/// Pick `n` items, one per distinct category first. Repeats of a category
/// are only allowed once every category has been used.
pub fn sample_items<R: rand::Rng + ?Sized>(buckets: &[SeedItem], n: usize, rng: &mut R) -> Vec<SeedItem> {
    if buckets.len() <= n {
        let mut all = buckets.to_vec();
        all.shuffle(rng);
        return all;
    }

    let mut order: Vec<usize> = (0..buckets.len()).collect();
    order.shuffle(rng);

    let mut picked: Vec<usize> = Vec::with_capacity(n);
    let mut used: HashSet<&str> = HashSet::new();
    for &i in &order {
        if picked.len() == n {
            break;
        }
        if used.insert(buckets[i].0.as_str()) {
            picked.push(i);
        }
    }
    for &i in &order {
        if picked.len() == n {
            break;
        }
        if !picked.contains(&i) {
            picked.push(i);
        }
    }

    picked.into_iter().map(|i| buckets[i].clone()).collect()
}

/// Numbered `[CATEGORY] text` lines
pub fn format_items(items: &[SeedItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, (category, text))| format!("{}. [{}] {}", i + 1, category.to_uppercase(), text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Runs drift rounds
pub struct DriftThinker {
    gateway: Arc<dyn Gateway>,
    writer: OutputWriter,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    options: GenerateOptions,
    rng: StdRng,
}

impl DriftThinker {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        writer: OutputWriter,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        config: &RunConfig,
    ) -> Self {
        Self {
            gateway,
            writer,
            clock,
            cancel,
            options: GenerateOptions::drift(
                config.think_model.clone(),
                config.drift_temperature,
                config.max_tokens,
            ),
            rng: StdRng::from_entropy(),
        }
    }

    /// Fix the RNG for reproducible technique and item choices
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run `rounds` techniques drawn from shuffled cycles of the menu
    pub async fn run(&mut self, context: &KnowledgeContext, rounds: usize) -> Vec<Round> {
        let buckets = context.buckets();
        let mut deck: Vec<&Technique> = Vec::new();
        let mut outputs = Vec::new();

        info!("=== CREATIVE DRIFT ({} rounds) ===", rounds);

        for index in 1..=rounds {
            if self.cancel.is_cancelled() {
                info!("Drift stopped early");
                break;
            }

            if deck.is_empty() {
                deck = TECHNIQUES.iter().collect();
                deck.shuffle(&mut self.rng);
            }
            let Some(technique) = deck.pop() else {
                break;
            };

            let items = sample_items(&buckets, technique.sample_size, &mut self.rng);
            if items.is_empty() {
                warn!("No context items for drift, skipping");
                continue;
            }

            let categories: Vec<String> = items.iter().map(|(c, _)| c.clone()).collect();
            info!(
                "Drift {}: {} with {} items from [{}]",
                index,
                technique.title,
                items.len(),
                categories.join(", ")
            );

            let prompt = prompts::render(
                technique.template,
                &PromptVars {
                    items: &format_items(&items),
                    ..Default::default()
                },
            );

            let started = self.clock.now();
            let output = match self
                .gateway
                .generate(&prompt, DRIFT_SYSTEM_PROMPT, &self.options)
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    warn!("  Drift round {} failed: {}", index, e);
                    continue;
                }
            };
            let duration = self.clock.now() - started;
            info!("  Drift done in {:.1}s ({} chars)", seconds(duration), output.len());

            let round = Round {
                sequence: DRIFT_SEQUENCE_OFFSET + index as u32,
                phase: format!("drift_{}", technique.name),
                title: format!("Drift: {}", technique.title),
                output,
                research: String::new(),
                duration_secs: seconds(duration),
                timestamp: self.clock.now(),
                problem: None,
                problem_index: None,
                seeds: categories,
            };
            if let Err(e) = self.writer.write_round(&round) {
                warn!("Failed to persist drift round {}: {}", round.sequence, e);
            }
            outputs.push(round);
        }

        info!("Creative drift complete: {} rounds", outputs.len());
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets() -> Vec<SeedItem> {
        vec![
            ("goals".into(), "Ship the planner".into()),
            ("goals".into(), "Learn Portuguese".into()),
            ("goals".into(), "Run a half marathon".into()),
            ("episodes".into(), "Debugged the sync engine".into()),
            ("mood".into(), "Restless".into()),
        ]
    }

    #[test]
    fn test_sample_prefers_distinct_categories() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let items = sample_items(&buckets(), 3, &mut rng);
            let categories: HashSet<_> = items.iter().map(|(c, _)| c.as_str()).collect();
            assert_eq!(items.len(), 3);
            assert_eq!(categories.len(), 3);
        }
    }

    #[test]
    fn test_sample_repeats_only_when_exhausted() {
        let mut rng = StdRng::seed_from_u64(7);
        let items = sample_items(&buckets(), 4, &mut rng);
        let categories: HashSet<_> = items.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(items.len(), 4);
        assert_eq!(categories.len(), 3);
        let distinct: HashSet<_> = items.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_sample_small_pool_returns_everything() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = vec![("mood".to_string(), "Calm".to_string())];
        assert_eq!(sample_items(&pool, 3, &mut rng), pool);
        assert!(sample_items(&[], 2, &mut rng).is_empty());
    }

    #[test]
    fn test_format_items() {
        let items = vec![
            ("goals".to_string(), "Ship it".to_string()),
            ("mood".to_string(), "Calm".to_string()),
        ];
        assert_eq!(format_items(&items), "1. [GOALS] Ship it\n\n2. [MOOD] Calm");
    }

    #[test]
    fn test_menu_sample_sizes() {
        let sizes: Vec<_> = TECHNIQUES.iter().map(|t| (t.name, t.sample_size)).collect();
        assert_eq!(
            sizes,
            vec![
                ("free_association", 3),
                ("inversion", 1),
                ("metaphor", 3),
                ("spark", 2),
                ("letter", 3)
            ]
        );
    }
}
