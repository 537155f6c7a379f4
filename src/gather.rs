//! Knowledge gathering
//!
//! The gathering layer proper (episodes, goals, mood, corrections...) is an
//! external collaborator behind [`KnowledgeSource`]. This module defines the
//! context shape it hands over, renders it into a bounded prompt block, and
//! ships a file-backed source that reads pre-exported category snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MAX_CONTEXT_DAYS;

/// Marker appended to a block cut by the character budget
const TRUNCATION_MARKER: &str = "\n[...truncated]";

/// Minimum room left before a partial block is worth emitting
const MIN_PARTIAL_BLOCK: usize = 100;

/// One category of gathered knowledge
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSection {
    /// Top-level category (e.g. "goals", "episodes")
    pub category: String,
    /// Heading used in prompts
    pub title: String,
    pub items: Vec<String>,
}

impl ContextSection {
    pub fn new(category: impl Into<String>, title: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            category: category.into(),
            title: title.into(),
            items,
        }
    }
}

/// Everything gathered for one run, highest priority section first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeContext {
    pub sections: Vec<ContextSection>,
}

impl KnowledgeContext {
    pub fn new(sections: Vec<ContextSection>) -> Self {
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.items.is_empty())
    }

    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// Flatten to `(category, text)` pairs for sampling
    pub fn buckets(&self) -> Vec<(String, String)> {
        self.sections
            .iter()
            .flat_map(|s| s.items.iter().map(move |item| (s.category.clone(), item.clone())))
            .collect()
    }
}

/// Render context into a prompt block of at most `max_chars` characters.
///
/// Sections are emitted in priority order. The block that crosses the
/// budget is cut, and everything after it is dropped.
pub fn format_for_prompt(context: &KnowledgeContext, max_chars: usize) -> String {
    let mut output: Vec<String> = Vec::new();
    let mut total = 0usize;

    for section in context.sections.iter().filter(|s| !s.items.is_empty()) {
        let body = section
            .items
            .iter()
            .map(|item| format!("  - {}", item))
            .collect::<Vec<_>>()
            .join("\n");
        let block = format!("=== {} ===\n{}\n", section.title, body);
        let block_len = block.chars().count();

        // +1 for the joining newline
        let cost = block_len + usize::from(!output.is_empty());
        if total + cost > max_chars {
            let remaining = max_chars.saturating_sub(total + usize::from(!output.is_empty()));
            let marker_len = TRUNCATION_MARKER.chars().count();
            if remaining > MIN_PARTIAL_BLOCK {
                let keep = remaining - marker_len;
                let cut: String = block.chars().take(keep).collect();
                output.push(format!("{}{}", cut, TRUNCATION_MARKER));
            }
            break;
        }

        output.push(block);
        total += cost;
    }

    output.join("\n")
}

/// Supplies gathered knowledge for one run
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn gather_all(&self, window_days: u32) -> KnowledgeContext;
}

#[async_trait]
impl KnowledgeSource for KnowledgeContext {
    async fn gather_all(&self, _window_days: u32) -> KnowledgeContext {
        self.clone()
    }
}

/// Snapshot file: `{ "title"?, "priority"?, "items": [...] }`
#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default)]
    items: Vec<SnapshotItem>,
}

fn default_priority() -> i32 {
    100
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotItem {
    Text(String),
    Stamped {
        text: String,
        #[serde(default)]
        timestamp: Option<DateTime<Local>>,
    },
}

/// Reads `knowledge/*.json` category snapshots exported by the gathering
/// layer. The category is the file stem; lower `priority` sorts first.
pub struct FileKnowledgeSource {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileKnowledgeSource {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    fn load_sections(&self, window_days: u32) -> Vec<ContextSection> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Knowledge directory {} unreadable: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let window = Duration::days(i64::from(window_days.min(MAX_CONTEXT_DAYS)));
        let cutoff = self.clock.now().checked_sub_signed(window);
        let mut ranked: Vec<(i32, String, ContextSection)> = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(category) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let snapshot: SnapshotFile = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
            {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping knowledge file {}: {}", path.display(), e);
                    continue;
                }
            };

            let items: Vec<String> = snapshot
                .items
                .into_iter()
                .filter_map(|item| match item {
                    SnapshotItem::Text(text) => Some(text),
                    SnapshotItem::Stamped { text, timestamp } => match timestamp {
                        Some(ts) if cutoff.is_some_and(|cutoff| ts < cutoff) => None,
                        _ => Some(text),
                    },
                })
                .filter(|text| !text.trim().is_empty())
                .collect();

            debug!("  {}: {} items", category, items.len());
            let title = snapshot
                .title
                .unwrap_or_else(|| category.replace(['_', '-'], " ").to_uppercase());
            ranked.push((
                snapshot.priority,
                category.clone(),
                ContextSection::new(category, title, items),
            ));
        }

        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, _, section)| section).collect()
    }
}

#[async_trait]
impl KnowledgeSource for FileKnowledgeSource {
    async fn gather_all(&self, window_days: u32) -> KnowledgeContext {
        info!("Gathering knowledge (last {} days)...", window_days);
        let context = KnowledgeContext::new(self.load_sections(window_days));
        info!(
            "Gathered {} items across {} sections",
            context.item_count(),
            context.sections.len()
        );
        context
    }
}
