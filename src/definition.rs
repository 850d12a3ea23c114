//! Hover & Definition (component F) — definition half.
//!
//! Two behaviors: a step's `source_location` becomes an external-file
//! target; a payload-like literal (a quoted argument whose placeholder
//! name reads as a filename reference) resolves against a configured
//! project subdirectory.

use std::path::{Path, PathBuf};

use tower_lsp::lsp_types::{GotoDefinitionResponse, Location, Position, Range, Url};

use crate::analyzer;
use crate::document::Document;
use crate::inventory::Inventory;

/// Placeholder names treated as filename references for go-to-definition.
/// Grounded in the worked example's `"hello.txt"` argument: names whose
/// text reads like a file/payload reference, not a registered type tag.
fn looks_like_file_reference(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("file") || lower.contains("payload") || lower.contains("path")
}

fn quote_spans(line: &str) -> Vec<(usize, usize)> {
    let chars: Vec<char> = line.chars().collect();
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in chars.iter().enumerate() {
        if *ch == '"' {
            match start {
                None => start = Some(idx),
                Some(s) => {
                    spans.push((s, idx));
                    start = None;
                }
            }
        }
    }
    spans
}

/// Resolve go-to-definition for the step line under the cursor.
pub async fn definition_for_step(
    document: &Document,
    line_idx: usize,
    column: usize,
    inventory: &Inventory,
    payload_root: &Path,
) -> Option<GotoDefinitionResponse> {
    let lines = document.lines();
    let (verb, text, verb_end_col) = analyzer::step_text(&lines, line_idx)?;
    let trimmed = text.trim();
    let (definition, _variant) = inventory.lookup(verb, trimmed).await?;

    let line = &lines[line_idx];
    let spans = quote_spans(line);

    // Is the cursor inside one of the quoted argument spans?
    if let Some((slot_index, (start, end))) = spans
        .iter()
        .enumerate()
        .find(|(_, (s, e))| column > *s && column <= *e)
    {
        if let Some(slot) = definition.slots.get(slot_index) {
            if let Some(name) = &slot.name {
                if looks_like_file_reference(name) {
                    let literal: String = line.chars().skip(start + 1).take(end - start - 1).collect();
                    let candidate = payload_root.join(&literal);
                    if candidate.is_file() {
                        let target_uri = Url::from_file_path(&candidate).ok()?;
                        let line_start_char = document.position_to_char(Position { line: line_idx as u32, character: 0 });
                        let origin_range = Range {
                            start: document.char_to_position(line_start_char + start),
                            end: document.char_to_position(line_start_char + end + 1),
                        };
                        return Some(GotoDefinitionResponse::Scalar(Location {
                            uri: target_uri,
                            range: origin_range,
                        }));
                    }
                    return None;
                }
            }
        }
    }

    let _ = verb_end_col;
    let location = definition.source_location.as_ref()?;
    let target_uri = path_to_url(&location.path)?;
    Some(GotoDefinitionResponse::Scalar(Location {
        uri: target_uri,
        range: Range {
            start: Position { line: location.line.saturating_sub(1), character: 0 },
            end: Position { line: location.line.saturating_sub(1), character: 0 },
        },
    }))
}

fn path_to_url(path: &PathBuf) -> Option<Url> {
    if path.is_absolute() {
        Url::from_file_path(path).ok()
    } else {
        Url::parse(&format!("file:///{}", path.display())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{SourceLocation, StepDefinition, Verb};
    use crate::normalizer::ParseTypeRegistry;

    #[tokio::test]
    async fn definition_resolves_to_source_location() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(
            Verb::Given,
            r#"a plain step"#,
            None,
            Some(SourceLocation {
                path: PathBuf::from("/steps/plain.py"),
                line: 12,
            }),
            &ParseTypeRegistry::new(),
        )
        .unwrap();
        inventory.build(vec![def]).await;

        let uri = Url::parse("file:///tmp/a.feature").unwrap();
        let document = Document::new(uri, "Feature: x\n  Scenario: y\n    Given a plain step\n", 1);
        let result = definition_for_step(&document, 2, 10, &inventory, Path::new("/tmp")).await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn missing_payload_file_returns_none() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(
            Verb::Then,
            r#"post request "{filename}" with name "{name}" to endpoint "{endpoint}""#,
            None,
            None,
            &ParseTypeRegistry::new(),
        )
        .unwrap();
        inventory.build(vec![def]).await;

        let uri = Url::parse("file:///tmp/a.feature").unwrap();
        let document = Document::new(
            uri,
            "Feature: x\n  Scenario: y\n    Then post request \"hello.txt\" with name \"hello\" to endpoint \"/hello\"\n",
            1,
        );
        let line = &document.lines()[2];
        let column = line.find("hello.txt").unwrap() + 2;
        let result = definition_for_step(&document, 2, column, &inventory, Path::new("/nonexistent/root")).await;
        assert!(result.is_none());
    }
}
