//! Completion Engine (component E).
//!
//! Produces ranked completion items for the four cursor contexts the
//! Gherkin Analyzer can report: keyword, step, variable reference, and
//! enumerated argument. Keyword legality is the small finite automaton
//! over `(has_feature, has_background, scenarios_seen)` from the design
//! notes; step ranking and snippet synthesis follow the Step Inventory's
//! ordering guarantees directly.

use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind, InsertTextFormat, Range};

use crate::analyzer::SeenKeywords;
use crate::document::Document;
use crate::inventory::{Inventory, StepDefinition, Verb};
use crate::normalizer;

/// Canonical order the boundary/round-trip tests rely on.
const STRUCTURAL_KEYWORDS: &[&str] = &["Feature", "Background", "Scenario", "Scenario Outline", "Scenario Template"];
const STEP_KEYWORDS: &[&str] = &["Given", "When", "Then", "And", "But"];
const EXAMPLE_KEYWORDS: &[&str] = &["Examples", "Scenarios"];

/// Whether `prefix`'s characters all appear, in order, within `candidate`
/// (case-insensitive). The documented resolution of the open fuzzy-match
/// question: subsequence membership, no gap scoring.
fn is_subsequence(prefix: &str, candidate: &str) -> bool {
    let mut chars = candidate.to_ascii_lowercase().chars().collect::<Vec<_>>().into_iter();
    prefix.to_ascii_lowercase().chars().all(|pc| chars.by_ref().any(|cc| cc == pc))
}

fn legal_keywords(seen: &SeenKeywords) -> Vec<&'static str> {
    if !seen.has_feature {
        return vec!["Feature"];
    }

    let mut legal = Vec::new();
    if seen.scenarios_seen == 0 {
        for kw in STRUCTURAL_KEYWORDS.iter().skip(1) {
            if *kw == "Background" && seen.has_background {
                continue;
            }
            legal.push(*kw);
        }
    } else {
        legal.extend(STEP_KEYWORDS.iter().copied());
        legal.extend(EXAMPLE_KEYWORDS.iter().copied());
    }
    legal
}

fn keyword_insert_text(keyword: &str) -> String {
    if STEP_KEYWORDS.contains(&keyword) {
        format!("{keyword} ")
    } else {
        format!("{keyword}: ")
    }
}

/// Keyword completion for a `Keyword`-classified cursor. `prefix` is the
/// (possibly empty) partial text already typed at the cursor on that line.
pub fn keyword_completions(seen: &SeenKeywords, prefix: &str, range: Range) -> Vec<CompletionItem> {
    legal_keywords(seen)
        .into_iter()
        .filter(|kw| prefix.is_empty() || is_subsequence(prefix, kw))
        .map(|kw| CompletionItem {
            label: kw.to_string(),
            kind: Some(CompletionItemKind::KEYWORD),
            insert_text: Some(keyword_insert_text(kw)),
            insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
            text_edit: Some(tower_lsp::lsp_types::CompletionTextEdit::Edit(tower_lsp::lsp_types::TextEdit {
                range,
                new_text: keyword_insert_text(kw),
            })),
            ..Default::default()
        })
        .collect()
}

/// Replace every quoted slot (`""`) in `variant` with `"$n"`, numbering
/// left to right from 1, producing the snippet insert text for a step
/// candidate.
fn snippet_insert_text(variant: &str) -> String {
    let mut result = String::with_capacity(variant.len());
    let mut chars = variant.chars().peekable();
    let mut tab_stop = 1;

    while let Some(ch) = chars.next() {
        if ch == '"' {
            // Detect an empty quoted slot: "" with nothing between.
            if chars.peek() == Some(&'"') {
                chars.next();
                result.push('"');
                result.push_str(&format!("${tab_stop}"));
                result.push('"');
                tab_stop += 1;
            } else {
                result.push('"');
            }
        } else {
            result.push(ch);
        }
    }
    result
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    exact_prefix: std::cmp::Reverse<bool>,
    variant_index: usize,
    registration_index: usize,
}

/// Step completion for a `Step(verb)`-classified cursor.
pub async fn step_completions(
    inventory: &Inventory,
    verb: Verb,
    typed_text: &str,
    replacement_range: Range,
) -> Vec<CompletionItem> {
    let normalized = normalizer::normalize_text(typed_text);
    let relevant = inventory.candidates(verb, typed_text).await;

    let mut ranked: Vec<(RankKey, std::sync::Arc<StepDefinition>, usize)> = Vec::new();
    for (registration_index, def) in relevant.iter().enumerate() {
        for (variant_index, variant) in def.expression_variants.iter().enumerate() {
            let normalized_variant = normalizer::normalize_text(variant);
            let matches = normalized.is_empty()
                || normalized_variant.contains(&normalized);
            if !matches {
                continue;
            }
            let exact_prefix = normalized.is_empty() || normalized_variant.starts_with(&normalized);
            ranked.push((
                RankKey {
                    exact_prefix: std::cmp::Reverse(exact_prefix),
                    variant_index,
                    registration_index,
                },
                std::sync::Arc::clone(def),
                variant_index,
            ));
        }
    }
    ranked.sort_by(|a, b| a.0.cmp(&b.0));

    ranked
        .into_iter()
        .map(|(_, def, variant_index)| {
            let label = def.expression_variants[variant_index].clone();
            let insert_text = snippet_insert_text(&label);
            CompletionItem {
                label,
                kind: Some(CompletionItemKind::FUNCTION),
                insert_text_format: Some(InsertTextFormat::SNIPPET),
                documentation: def.help.clone().map(|help| {
                    tower_lsp::lsp_types::Documentation::MarkupContent(tower_lsp::lsp_types::MarkupContent {
                        kind: tower_lsp::lsp_types::MarkupKind::Markdown,
                        value: help,
                    })
                }),
                text_edit: Some(tower_lsp::lsp_types::CompletionTextEdit::Edit(tower_lsp::lsp_types::TextEdit {
                    range: replacement_range,
                    new_text: insert_text.clone(),
                })),
                insert_text: Some(insert_text),
                ..Default::default()
            }
        })
        .collect()
}

/// Variable completion inside `{{ ... }}`.
pub fn variable_completions(document: &Document, partial: &str, range: Range, closes_brace: bool, closes_quote: bool) -> Vec<CompletionItem> {
    let mut names: Vec<&String> = document
        .declared_variables
        .iter()
        .filter(|name| name.to_ascii_lowercase().starts_with(&partial.to_ascii_lowercase()))
        .collect();
    names.sort();

    names
        .into_iter()
        .map(|name| {
            let mut insert_text = format!(" {name} ");
            if !closes_brace {
                insert_text.push_str("}}");
            }
            if !closes_quote {
                insert_text.push('"');
            }
            CompletionItem {
                label: name.clone(),
                kind: Some(CompletionItemKind::VARIABLE),
                insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
                text_edit: Some(tower_lsp::lsp_types::CompletionTextEdit::Edit(tower_lsp::lsp_types::TextEdit {
                    range,
                    new_text: insert_text.clone(),
                })),
                insert_text: Some(insert_text),
                ..Default::default()
            }
        })
        .collect()
}

/// Argument-enum completion: list of literal alternatives, verbatim.
pub fn argument_enum_completions(alternatives: &[String], range: Range) -> Vec<CompletionItem> {
    alternatives
        .iter()
        .map(|value| CompletionItem {
            label: value.clone(),
            kind: Some(CompletionItemKind::ENUM_MEMBER),
            insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
            text_edit: Some(tower_lsp::lsp_types::CompletionTextEdit::Edit(tower_lsp::lsp_types::TextEdit {
                range,
                new_text: value.clone(),
            })),
            insert_text: Some(value.clone()),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_range() -> Range {
        Range::default()
    }

    #[test]
    fn empty_buffer_suggests_only_feature() {
        let seen = SeenKeywords::default();
        let items = keyword_completions(&seen, "", zero_range());
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Feature"]);
    }

    #[test]
    fn after_feature_suggests_structural_keywords_order_stable() {
        let seen = SeenKeywords {
            has_feature: true,
            has_background: false,
            scenarios_seen: 0,
        };
        let items = keyword_completions(&seen, "", zero_range());
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Background", "Scenario", "Scenario Outline", "Scenario Template"]);
    }

    #[test]
    fn background_not_resuggested_once_present() {
        let seen = SeenKeywords {
            has_feature: true,
            has_background: true,
            scenarios_seen: 0,
        };
        let items = keyword_completions(&seen, "", zero_range());
        assert!(items.iter().all(|i| i.label != "Background"));
    }

    #[test]
    fn step_insert_text_appends_trailing_space() {
        let seen = SeenKeywords {
            has_feature: true,
            has_background: true,
            scenarios_seen: 1,
        };
        let items = keyword_completions(&seen, "", zero_range());
        let given = items.iter().find(|i| i.label == "Given").unwrap();
        assert_eq!(given.insert_text.as_deref(), Some("Given "));
    }

    #[test]
    fn fuzzy_narrow_is_case_insensitive_subsequence() {
        assert!(is_subsequence("en", "Given"));
        assert!(is_subsequence("EN", "then"));
        assert!(!is_subsequence("en", "But"));
    }

    #[test]
    fn snippet_numbers_quoted_slots_left_to_right() {
        let result = snippet_insert_text(r#"set context variable "" to """#);
        assert_eq!(result, r#"set context variable "$1" to "$2""#);
    }

    #[tokio::test]
    async fn step_completion_ranks_exact_prefix_first() {
        use crate::inventory::StepDefinition;
        use crate::normalizer::ParseTypeRegistry;

        let inventory = Inventory::empty();
        inventory
            .build(vec![
                StepDefinition::from_pattern(Verb::Given, r#"ask for value of variable "{name}""#, None, None, &ParseTypeRegistry::new()).unwrap(),
                StepDefinition::from_pattern(Verb::Given, r#"set context variable "{name}" to "{value}""#, None, None, &ParseTypeRegistry::new()).unwrap(),
            ])
            .await;

        let items = step_completions(&inventory, Verb::Given, "variable", zero_range()).await;
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        // Neither candidate is a prefix match on "variable" alone but both
        // contain it; original registration order breaks remaining ties.
        assert_eq!(labels.len(), 2);
    }
}
