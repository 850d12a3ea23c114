//! Gherkin Analyzer (component D).
//!
//! Tokenizes a buffer around a cursor position into the three questions
//! the rest of the server asks: what kind of token is under the cursor,
//! what verb a step line inherits, and the literal `(verb, text)` pair for
//! a step line. Operates on raw buffer text — before template rendering —
//! so variable-reference classification sees `{{ ... }}` exactly as typed.

use crate::inventory::{Inventory, Verb};

/// What the cursor is sitting on or inside.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorContext {
    Keyword,
    Step(Verb),
    VariableRef { partial: String },
    ArgumentEnum { alternatives: Vec<String> },
    Outside,
}

/// An explicit or inheriting Gherkin step keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKeyword {
    Given,
    When,
    Then,
    And,
    But,
    Star,
}

impl StepKeyword {
    fn explicit_verb(self) -> Option<Verb> {
        match self {
            StepKeyword::Given => Some(Verb::Given),
            StepKeyword::When => Some(Verb::When),
            StepKeyword::Then => Some(Verb::Then),
            StepKeyword::And | StepKeyword::But | StepKeyword::Star => None,
        }
    }
}

const SCENARIO_HEADERS: &[&str] = &[
    "scenario outline:",
    "scenario template:",
    "scenario:",
    "background:",
    "feature:",
    "examples:",
    "scenarios:",
];

fn is_scenario_boundary(trimmed_lower: &str) -> bool {
    SCENARIO_HEADERS.iter().any(|h| trimmed_lower.starts_with(h))
}

/// Parse a line's leading step keyword, returning the keyword and the
/// character column immediately after "Keyword " (keyword plus exactly
/// one separating space).
fn parse_step_keyword(line: &str) -> Option<(StepKeyword, usize)> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();

    const KEYWORDS: &[(&str, StepKeyword)] = &[
        ("Given ", StepKeyword::Given),
        ("When ", StepKeyword::When),
        ("Then ", StepKeyword::Then),
        ("And ", StepKeyword::And),
        ("But ", StepKeyword::But),
        ("* ", StepKeyword::Star),
    ];

    for (prefix, kw) in KEYWORDS {
        if trimmed.starts_with(prefix) {
            return Some((*kw, indent + prefix.chars().count()));
        }
    }
    None
}

/// Nearest preceding line (strictly before `line_idx`, within the same
/// scenario) carrying an explicit verb; `given` if none found.
pub fn effective_verb(lines: &[String], line_idx: usize) -> Verb {
    for idx in (0..line_idx).rev() {
        let line = &lines[idx];
        let trimmed_lower = line.trim().to_ascii_lowercase();
        if is_scenario_boundary(&trimmed_lower) {
            break;
        }
        if let Some((kw, _)) = parse_step_keyword(line) {
            if let Some(verb) = kw.explicit_verb() {
                return verb;
            }
        }
    }
    Verb::Given
}

/// `(verb, text, verb_end_column)` for a step line, or `None` if the line
/// has no step keyword at all.
pub fn step_text(lines: &[String], line_idx: usize) -> Option<(Verb, String, usize)> {
    let line = lines.get(line_idx)?;
    let (keyword, verb_end_col) = parse_step_keyword(line)?;
    let verb = keyword.explicit_verb().unwrap_or_else(|| effective_verb(lines, line_idx));
    let text = line.chars().skip(verb_end_col).collect();
    Some((verb, text, verb_end_col))
}

/// Keywords already present above `up_to_line` (exclusive), informing
/// which structural keywords remain legal (used by the Completion Engine).
#[derive(Debug, Clone, Default)]
pub struct SeenKeywords {
    pub has_feature: bool,
    pub has_background: bool,
    pub scenarios_seen: usize,
}

pub fn seen_keywords(lines: &[String], up_to_line: usize) -> SeenKeywords {
    let mut seen = SeenKeywords::default();
    for line in lines.iter().take(up_to_line) {
        let trimmed_lower = line.trim().to_ascii_lowercase();
        if trimmed_lower.starts_with("feature:") {
            seen.has_feature = true;
        } else if trimmed_lower.starts_with("background:") {
            seen.has_background = true;
        } else if trimmed_lower.starts_with("scenario outline:")
            || trimmed_lower.starts_with("scenario template:")
            || trimmed_lower.starts_with("scenario:")
        {
            seen.scenarios_seen += 1;
        }
    }
    seen
}

/// Scan backward on `line` from `column` for an unterminated `{{`, i.e.
/// the cursor sits inside a `{{ ... }}` reference that hasn't been closed
/// yet to the left.
fn variable_ref_partial(line: &str, column: usize) -> Option<String> {
    let prefix: Vec<char> = line.chars().take(column).collect();
    let joined: String = prefix.iter().collect();
    let last_open = joined.rfind("{{")?;
    let after_open = &joined[last_open + 2..];
    if after_open.contains("}}") {
        return None;
    }
    Some(after_open.trim_start().to_string())
}

/// Count `"` occurrences strictly before `column`; used to determine
/// whether the cursor sits inside an open quoted slot and which slot index
/// (0-based, among quoted slots on the line) that is.
fn quote_slot_index(line: &str, column: usize) -> Option<usize> {
    let prefix: Vec<char> = line.chars().take(column).collect();
    let quote_count = prefix.iter().filter(|c| **c == '"').count();
    if quote_count % 2 == 0 {
        None
    } else {
        Some(quote_count / 2)
    }
}

/// Classify the token at `(line_idx, column)` (character offsets, not
/// UTF-16 code units — callers convert first).
pub async fn classify(lines: &[String], line_idx: usize, column: usize, inventory: &Inventory) -> CursorContext {
    let Some(line) = lines.get(line_idx) else {
        return CursorContext::Outside;
    };

    let leading: String = line.chars().take(column).collect();
    if leading.trim().is_empty() {
        return CursorContext::Keyword;
    }

    if let Some(partial) = variable_ref_partial(line, column) {
        return CursorContext::VariableRef { partial };
    }

    if let Some(slot_index) = quote_slot_index(line, column) {
        if let Some((verb, text, _)) = step_text(lines, line_idx) {
            if let Some((definition, _variant)) = inventory.lookup(verb, text.trim()).await {
                if let Some(slot) = definition.slots.get(slot_index) {
                    if let Some(alternatives) = &slot.alternatives {
                        return CursorContext::ArgumentEnum {
                            alternatives: alternatives.clone(),
                        };
                    }
                }
            }
        }
        return CursorContext::Outside;
    }

    if parse_step_keyword(line).is_some() {
        let verb = step_text(lines, line_idx).map(|(v, _, _)| v).unwrap_or(Verb::Given);
        return CursorContext::Step(verb);
    }

    CursorContext::Outside
}
