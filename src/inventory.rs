//! Step Inventory (component B).
//!
//! Holds the indexed catalogue of step definitions keyed by Gherkin verb.
//! Rebuilds replace the active snapshot atomically: readers always see
//! either the fully-old or fully-new inventory, never a partial one.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::GrizzlyError;
use crate::normalizer::{self, PlaceholderSlot};

/// Gherkin verb under which a step definition is registered. `And`/`But`/`*`
/// are never stored here — they resolve to one of these via the Analyzer's
/// inheritance rule before the inventory is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Given,
    When,
    Then,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Given => "given",
            Verb::When => "when",
            Verb::Then => "then",
        }
    }

    pub const ALL: [Verb; 3] = [Verb::Given, Verb::When, Verb::Then];
}

#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: u32,
}

/// One catalogued step definition.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub verb: Verb,
    pub expression: String,
    pub clean_expression: String,
    pub regex_patterns: Vec<Regex>,
    pub expression_variants: Vec<String>,
    pub slots: Vec<PlaceholderSlot>,
    pub help: Option<String>,
    pub source_location: Option<SourceLocation>,
}

impl StepDefinition {
    /// Build a definition from a raw harvested pattern, normalizing it with
    /// the Pattern Normalizer. Returns `Err` (skip, non-fatal) on malformed
    /// braces.
    pub fn from_pattern(
        verb: Verb,
        pattern: &str,
        help: Option<String>,
        source_location: Option<SourceLocation>,
        registry: &normalizer::ParseTypeRegistry,
    ) -> Result<Self, GrizzlyError> {
        let normalized = normalizer::normalize(pattern, registry)?;
        Ok(Self {
            verb,
            expression: pattern.to_string(),
            clean_expression: normalized.clean_expression,
            regex_patterns: normalized.regex_patterns,
            expression_variants: normalized.expression_variants,
            slots: normalized.slots,
            help,
            source_location,
        })
    }

    /// Index (within `regex_patterns`/`expression_variants`) of the first
    /// pattern matching `text`, if any.
    pub fn matching_variant(&self, text: &str) -> Option<usize> {
        self.regex_patterns.iter().position(|re| re.is_match(text))
    }
}

/// One immutable snapshot of the catalogue.
#[derive(Debug, Default)]
struct Snapshot {
    by_verb: std::collections::HashMap<Verb, Vec<Arc<StepDefinition>>>,
    revision: u64,
}

impl Snapshot {
    fn definitions(&self, verb: Verb) -> &[Arc<StepDefinition>] {
        self.by_verb.get(&verb).map(Vec::as_slice).unwrap_or(&[])
    }
}

enum RebuildSlot {
    Idle,
    InFlight(Arc<Notify>),
}

/// The process-wide, swappable step-definition catalogue.
pub struct Inventory {
    snapshot: RwLock<Arc<Snapshot>>,
    revision: AtomicU64,
    rebuild_slot: Mutex<RebuildSlot>,
}

impl Inventory {
    pub fn empty() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            revision: AtomicU64::new(0),
            rebuild_slot: Mutex::new(RebuildSlot::Idle),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Replace the active inventory atomically. `definitions` is the new,
    /// complete catalogue; grouping by verb and the revision bump happen
    /// entirely before the new snapshot becomes visible.
    pub async fn build(&self, definitions: Vec<StepDefinition>) {
        let mut by_verb: std::collections::HashMap<Verb, Vec<Arc<StepDefinition>>> =
            std::collections::HashMap::new();
        for def in definitions {
            by_verb.entry(def.verb).or_default().push(Arc::new(def));
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot { by_verb, revision });

        let mut guard = self.snapshot.write().await;
        *guard = snapshot;
    }

    /// Run `loader` to produce a fresh catalogue and install it, coalescing
    /// concurrent callers onto a single in-flight rebuild: if a rebuild is
    /// already running when this is called, this call waits for it and
    /// returns its outcome rather than starting a second one.
    pub async fn rebuild_with<F, Fut>(&self, loader: F) -> Result<(), GrizzlyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<StepDefinition>, GrizzlyError>>,
    {
        let notify = {
            let mut slot = self.rebuild_slot.lock().await;
            match &*slot {
                RebuildSlot::InFlight(existing) => {
                    let existing = Arc::clone(existing);
                    drop(slot);
                    existing.notified().await;
                    return Ok(());
                }
                RebuildSlot::Idle => {
                    let notify = Arc::new(Notify::new());
                    *slot = RebuildSlot::InFlight(Arc::clone(&notify));
                    notify
                }
            }
        };

        let result = loader().await;
        if let Ok(definitions) = &result {
            self.build(definitions.clone()).await;
        }

        let mut slot = self.rebuild_slot.lock().await;
        *slot = RebuildSlot::Idle;
        drop(slot);
        notify.notify_waiters();

        result.map(|_| ())
    }

    /// First definition under `verb`, in registration order, with any
    /// matching pattern; ties within a definition break on lowest pattern
    /// index.
    pub async fn lookup(&self, verb: Verb, text: &str) -> Option<(Arc<StepDefinition>, usize)> {
        let snapshot = self.snapshot.read().await;
        for def in snapshot.definitions(verb) {
            if let Some(idx) = def.matching_variant(text) {
                return Some((Arc::clone(def), idx));
            }
        }
        None
    }

    /// Definitions under `verb` with at least one expression variant whose
    /// normalized text contains the normalized `prefix`. Empty prefix
    /// returns all. This is the catalogue-level pre-filter the Completion
    /// Engine narrows further, variant by variant, when ranking.
    pub async fn candidates(&self, verb: Verb, prefix: &str) -> Vec<Arc<StepDefinition>> {
        let normalized_prefix = normalizer::normalize_text(prefix);
        let snapshot = self.snapshot.read().await;
        snapshot
            .definitions(verb)
            .iter()
            .filter(|def| {
                normalized_prefix.is_empty()
                    || def
                        .expression_variants
                        .iter()
                        .any(|variant| normalizer::normalize_text(variant).contains(&normalized_prefix))
            })
            .cloned()
            .collect()
    }

    pub async fn all(&self, verb: Verb) -> Vec<Arc<StepDefinition>> {
        self.snapshot.read().await.definitions(verb).to_vec()
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::ParseTypeRegistry;

    fn def(verb: Verb, pattern: &str) -> StepDefinition {
        StepDefinition::from_pattern(verb, pattern, Some("help text".to_string()), None, &ParseTypeRegistry::new())
            .unwrap()
    }

    #[tokio::test]
    async fn build_then_lookup_finds_first_match_in_order() {
        let inventory = Inventory::empty();
        inventory
            .build(vec![
                def(Verb::Given, r#"set context variable "{name}" to "{value}""#),
                def(Verb::Given, r#"set global context variable "{name}" to "{value}""#),
            ])
            .await;

        let (found, _) = inventory
            .lookup(Verb::Given, r#"set context variable "foo" to "bar""#)
            .await
            .unwrap();
        assert_eq!(found.expression, r#"set context variable "{name}" to "{value}""#);
    }

    #[tokio::test]
    async fn lookup_returns_none_without_match() {
        let inventory = Inventory::empty();
        inventory
            .build(vec![def(Verb::Given, r#"set context variable "{name}" to "{value}""#)])
            .await;
        assert!(inventory.lookup(Verb::When, "anything").await.is_none());
    }

    #[tokio::test]
    async fn candidates_filters_by_normalized_prefix() {
        let inventory = Inventory::empty();
        inventory
            .build(vec![
                def(Verb::Given, r#"set context variable "{name}" to "{value}""#),
                def(Verb::Given, r#"ask for value of variable "{name}""#),
            ])
            .await;

        let found = inventory.candidates(Verb::Given, "set context").await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn candidates_matches_mid_expression_not_just_prefix() {
        let inventory = Inventory::empty();
        inventory
            .build(vec![
                def(Verb::Given, r#"set context variable "{name}" to "{value}""#),
                def(Verb::Given, r#"ask for value of variable "{name}""#),
            ])
            .await;

        let found = inventory.candidates(Verb::Given, "variable").await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn candidates_with_empty_prefix_returns_all() {
        let inventory = Inventory::empty();
        inventory
            .build(vec![
                def(Verb::Given, r#"set context variable "{name}" to "{value}""#),
                def(Verb::Given, r#"ask for value of variable "{name}""#),
            ])
            .await;
        assert_eq!(inventory.candidates(Verb::Given, "").await.len(), 2);
    }

    #[tokio::test]
    async fn revision_bumps_on_each_build() {
        let inventory = Inventory::empty();
        assert_eq!(inventory.revision(), 0);
        inventory.build(vec![]).await;
        assert_eq!(inventory.revision(), 1);
        inventory.build(vec![]).await;
        assert_eq!(inventory.revision(), 2);
    }

    #[tokio::test]
    async fn concurrent_rebuilds_coalesce() {
        let inventory = Arc::new(Inventory::empty());
        let a = Arc::clone(&inventory);
        let b = Arc::clone(&inventory);

        let (r1, r2) = tokio::join!(
            a.rebuild_with(|| async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(vec![def(Verb::Given, "a step")])
            }),
            b.rebuild_with(|| async { Ok(vec![def(Verb::When, "another step")]) })
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert!(inventory.revision() >= 1);
    }
}
