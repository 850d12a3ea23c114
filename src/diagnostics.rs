//! Diagnostics Engine (component G).
//!
//! Pipeline: render templated fragments, parse the result as Gherkin,
//! match each parsed step against the inventory, and emit diagnostics for
//! unknown steps, parse failures, render failures, and invalid arguments.
//! Every diagnostic is built from a [`GrizzlyError`] variant so the
//! error-handling design in SPEC_FULL.md §5/§7 and the diagnostics actually
//! emitted stay the same thing, not two parallel representations.
//!
//! Step matching walks `gherkin::Feature`'s own parsed structure
//! (`background`, `scenarios`) instead of re-deriving step text line by
//! line, so Background steps are distinguished from Scenario steps and
//! Scenario Outline `<placeholder>` tokens are substituted from the
//! scenario's `Examples` table before matching, the way the real parser
//! already resolves them.

use std::sync::Arc;

use regex::Regex;
use tera::Tera;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range};

use crate::error::GrizzlyError;
use crate::inventory::{Inventory, StepDefinition, Verb};
use crate::normalizer;

/// Render template fragments in `text` via a one-shot `tera` context.
/// `on_the_fly` preview rendering uses the same function; diagnostics
/// always render internally regardless of that flag's value (see
/// SPEC_FULL.md's Open Question decision).
pub fn render_template(text: &str) -> Result<String, GrizzlyError> {
    let mut tera = Tera::default();
    tera.add_raw_template("__document__", text)
        .map_err(|err| GrizzlyError::RenderFailed {
            reason: err.to_string(),
            line: 1,
        })?;
    let context = tera::Context::new();
    tera.render("__document__", &context).map_err(|err| GrizzlyError::RenderFailed {
        reason: err.to_string(),
        line: 1,
    })
}

/// Hand-rolled Levenshtein edit distance between two strings (char-wise).
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let above = row[j];
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            row[j] = (row[j - 1] + 1).min(above + 1).min(prev_diag + cost);
            prev_diag = above;
        }
    }
    row[b.len()]
}

/// Nearest candidate (by edit distance over the clean expression) among
/// all definitions under `verb`, used as the `UnknownStep` suggestion.
async fn nearest_candidate(inventory: &Inventory, verb: Verb, text: &str) -> Option<String> {
    let normalized_text = normalizer::normalize_text(text);
    let candidates = inventory.all(verb).await;
    candidates
        .iter()
        .min_by_key(|def| levenshtein_distance(&normalized_text, &normalizer::normalize_text(&def.clean_expression)))
        .map(|def| def.clean_expression.clone())
}

fn line_range(line: u32) -> Range {
    Range {
        start: Position { line: line.saturating_sub(1), character: 0 },
        end: Position {
            line: line.saturating_sub(1),
            character: u32::MAX,
        },
    }
}

fn error_code(err: &GrizzlyError) -> &'static str {
    match err {
        GrizzlyError::RenderFailed { .. } => "E0001",
        GrizzlyError::ParseFailed { .. } => "E0002",
        GrizzlyError::UnknownStep { .. } => "E0003",
        GrizzlyError::ArgumentInvalid { .. } => "E0004",
        GrizzlyError::PatternMalformed { .. } => "E0005",
        GrizzlyError::SourceLoadFailed { .. } => "E0006",
        GrizzlyError::Internal(_) => "E0099",
    }
}

fn error_line(err: &GrizzlyError) -> u32 {
    match err {
        GrizzlyError::RenderFailed { line, .. } | GrizzlyError::ParseFailed { line, .. } => *line,
        _ => 1,
    }
}

/// Build a `Diagnostic` from a `GrizzlyError`, routing every failure kind
/// through its typed representation rather than a hand-rolled string code.
fn diagnostic_from_error(err: &GrizzlyError) -> Diagnostic {
    Diagnostic {
        range: line_range(error_line(err)),
        severity: Some(DiagnosticSeverity::ERROR),
        code: Some(NumberOrString::String(error_code(err).to_string())),
        source: Some("grizzly-ls".to_string()),
        message: err.to_string(),
        ..Default::default()
    }
}

fn step_verb(ty: gherkin::StepType) -> Verb {
    match ty {
        gherkin::StepType::Given => Verb::Given,
        gherkin::StepType::When => Verb::When,
        gherkin::StepType::Then => Verb::Then,
    }
}

/// One step occurrence ready for matching: its effective verb, its text
/// with any Scenario Outline placeholders already substituted, and the
/// source line to attach a diagnostic to.
struct StepOccurrence {
    verb: Verb,
    text: String,
    line: u32,
}

/// Substitute every `<name>` placeholder in `text` with the corresponding
/// value from one Examples row, mirroring the cross-product expansion a
/// Gherkin runner performs before executing a Scenario Outline (the
/// `gherkin` crate itself exposes the unexpanded template and the example
/// rows; substitution is this crate's own job since it has no "expand"
/// step of its own).
fn substitute_placeholders(text: &str, row: &[(String, String)]) -> String {
    let mut result = text.to_string();
    for (placeholder, value) in row {
        result = result.replace(placeholder, value);
    }
    result
}

/// One substitution row per Examples data row, each row a list of
/// `(<name>, value)` pairs; a scenario without examples produces a single
/// empty row, i.e. its steps are matched unmodified.
fn outline_rows(examples: &Option<gherkin::Examples>) -> Vec<Vec<(String, String)>> {
    let Some(examples) = examples else {
        return vec![Vec::new()];
    };
    let Some((header, data_rows)) = examples.table.rows.split_first() else {
        return vec![Vec::new()];
    };

    data_rows
        .iter()
        .map(|data_row| {
            header
                .iter()
                .zip(data_row.iter())
                .map(|(name, value)| (format!("<{name}>"), value.clone()))
                .collect()
        })
        .collect()
}

/// Flatten a parsed feature into every concrete step occurrence: each
/// Background step once, and each Scenario/Scenario Outline step once per
/// Examples row (once, unmodified, for a plain Scenario).
fn step_occurrences(feature: &gherkin::Feature) -> Vec<StepOccurrence> {
    let mut occurrences = Vec::new();

    if let Some(background) = &feature.background {
        for step in &background.steps {
            occurrences.push(StepOccurrence {
                verb: step_verb(step.ty),
                text: step.value.clone(),
                line: step.position.line as u32,
            });
        }
    }

    for scenario in &feature.scenarios {
        for row in outline_rows(&scenario.examples) {
            for step in &scenario.steps {
                occurrences.push(StepOccurrence {
                    verb: step_verb(step.ty),
                    text: substitute_placeholders(&step.value, &row),
                    line: step.position.line as u32,
                });
            }
        }
    }

    occurrences
}

/// Check a matched step's captured arguments against any registered
/// format validators. Placeholders with enumerated alternatives are never
/// captured (they are baked into the regex as literals, one per variant),
/// so only free-text slots can ever fail validation here.
fn validate_arguments(def: &Arc<StepDefinition>, variant_idx: usize, text: &str) -> Vec<GrizzlyError> {
    let Some(pattern) = def.regex_patterns.get(variant_idx) else {
        return Vec::new();
    };
    let Some(captures) = pattern.captures(text) else {
        return Vec::new();
    };

    let captured_slots = def.slots.iter().filter(|slot| slot.alternatives.is_none());

    captured_slots
        .zip(captures.iter().skip(1))
        .filter_map(|(slot, group)| {
            let format: &Regex = slot.format.as_ref()?;
            let value = group?.as_str();
            if format.is_match(value) {
                None
            } else {
                Some(GrizzlyError::ArgumentInvalid {
                    text: text.to_string(),
                    value: value.to_string(),
                    reason: format!("does not match the registered format for `{}`", slot.name.clone().unwrap_or_default()),
                })
            }
        })
        .collect()
}

/// Run the full diagnostics pipeline over `text`. Render or parse
/// failures short-circuit the remaining stages with a single diagnostic,
/// per the pipeline's "abort subsequent stages" rule.
pub async fn diagnose(text: &str, inventory: &Inventory) -> Vec<Diagnostic> {
    let rendered = match render_template(text) {
        Ok(rendered) => rendered,
        Err(err @ GrizzlyError::RenderFailed { .. }) => return vec![diagnostic_from_error(&err)],
        Err(_) => return Vec::new(),
    };

    let env = gherkin::GherkinEnv::default();
    let feature = match gherkin::Feature::parse(&rendered, env) {
        Ok(feature) => feature,
        Err(err) => {
            // The reported line is best-effort; the parser error's Display
            // impl carries the precise position for the editor's log.
            let parse_error = GrizzlyError::ParseFailed { reason: err.to_string(), line: 1 };
            return vec![diagnostic_from_error(&parse_error)];
        }
    };

    let mut diagnostics = Vec::new();

    for occurrence in step_occurrences(&feature) {
        let trimmed = occurrence.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        match inventory.lookup(occurrence.verb, trimmed).await {
            Some((def, variant_idx)) => {
                for invalid in validate_arguments(&def, variant_idx, trimmed) {
                    let mut diagnostic = diagnostic_from_error(&invalid);
                    diagnostic.range = line_range(occurrence.line);
                    diagnostics.push(diagnostic);
                }
            }
            None => {
                let suggestion = nearest_candidate(inventory, occurrence.verb, trimmed).await;
                let unknown = GrizzlyError::UnknownStep {
                    text: trimmed.to_string(),
                    verb: occurrence.verb.as_str().to_string(),
                    suggestion: suggestion.clone(),
                };
                let mut message = unknown.to_string();
                if let Some(suggestion) = &suggestion {
                    message.push_str(&format!(" — did you mean `{suggestion}`?"));
                }
                let mut diagnostic = diagnostic_from_error(&unknown);
                diagnostic.range = line_range(occurrence.line);
                diagnostic.message = message;
                diagnostic.data = suggestion.map(serde_json::Value::String);
                diagnostics.push(diagnostic);
            }
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{StepDefinition, Verb};
    use crate::normalizer::ParseTypeRegistry;

    #[test]
    fn levenshtein_zero_for_identical_strings() {
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
    }

    #[test]
    fn levenshtein_counts_single_substitution() {
        assert_eq!(levenshtein_distance("cat", "bat"), 1);
    }

    #[tokio::test]
    async fn unknown_step_gets_nearest_candidate_suggestion() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(Verb::Given, r#"set context variable "{name}" to "{value}""#, None, None, &ParseTypeRegistry::new()).unwrap();
        inventory.build(vec![def]).await;

        let suggestion = nearest_candidate(&inventory, Verb::Given, "set context varaible \"x\" to \"y\"").await;
        assert!(suggestion.is_some());
    }

    #[tokio::test]
    async fn matched_step_produces_no_diagnostics() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(Verb::Given, r#"a plain step"#, None, None, &ParseTypeRegistry::new()).unwrap();
        inventory.build(vec![def]).await;

        let text = "Feature: x\n  Scenario: y\n    Given a plain step\n";
        let diagnostics = diagnose(text, &inventory).await;
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn unmatched_step_produces_unknown_step_diagnostic() {
        let inventory = Inventory::empty();
        let text = "Feature: x\n  Scenario: y\n    Given nothing registered\n";
        let diagnostics = diagnose(text, &inventory).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, Some(NumberOrString::String("E0003".to_string())));
    }

    #[tokio::test]
    async fn background_step_is_matched_against_inventory() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(Verb::Given, "a shared fixture", None, None, &ParseTypeRegistry::new()).unwrap();
        inventory.build(vec![def]).await;

        let text = "Feature: x\n  Background:\n    Given a shared fixture\n  Scenario: y\n    Given a shared fixture\n";
        let diagnostics = diagnose(text, &inventory).await;
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn scenario_outline_placeholder_is_substituted_before_matching() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(Verb::Given, r#"a user of type "{type}""#, None, None, &ParseTypeRegistry::new()).unwrap();
        inventory.build(vec![def]).await;

        let text = concat!(
            "Feature: x\n",
            "  Scenario Outline: y\n",
            "    Given a user of type \"<kind>\"\n",
            "    Examples:\n",
            "      | kind |\n",
            "      | api  |\n",
            "      | ui   |\n",
        );
        let diagnostics = diagnose(text, &inventory).await;
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn invalid_argument_is_flagged_against_registered_format() {
        let mut registry = ParseTypeRegistry::new();
        registry.register_format("Weight", r"^\d+$");
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(Verb::Given, r#"a user with weight "{weight:Weight}""#, None, None, &registry).unwrap();
        inventory.build(vec![def]).await;

        let text = "Feature: x\n  Scenario: y\n    Given a user with weight \"heavy\"\n";
        let diagnostics = diagnose(text, &inventory).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, Some(NumberOrString::String("E0004".to_string())));
    }
}
