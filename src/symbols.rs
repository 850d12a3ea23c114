//! `textDocument/documentSymbol` support (supplemented feature).
//!
//! Groups matched steps under their enclosing Scenario/Background as a
//! simple two-level outline. Near-zero marginal cost over the inventory's
//! existing per-line matches.

#![allow(deprecated)] // `DocumentSymbol::deprecated` has no replacement in lsp-types yet.

use tower_lsp::lsp_types::{DocumentSymbol, Position, Range, SymbolKind};

use crate::document::Document;

fn symbol_range(document: &Document, line_idx: usize) -> Range {
    let line_start = document.position_to_char(Position { line: line_idx as u32, character: 0 });
    let line = document.lines().get(line_idx).cloned().unwrap_or_default();
    let line_end = line_start + line.chars().count();
    document.range_for_chars(line_start, line_end)
}

/// Build a flat-by-container outline: `Feature` at the root (implicit,
/// not emitted), one container symbol per `Scenario`/`Background`, with
/// its matched steps as children.
pub fn document_symbols(document: &Document) -> Vec<DocumentSymbol> {
    let lines = document.lines();
    let mut symbols = Vec::new();
    let mut current: Option<DocumentSymbol> = None;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        let trimmed_lower = trimmed.to_ascii_lowercase();
        let is_container_header = trimmed_lower.starts_with("scenario outline:")
            || trimmed_lower.starts_with("scenario template:")
            || trimmed_lower.starts_with("scenario:")
            || trimmed_lower.starts_with("background:");

        if is_container_header {
            if let Some(finished) = current.take() {
                symbols.push(finished);
            }
            let name = trimmed.splitn(2, ':').nth(1).map(str::trim).unwrap_or("").to_string();
            let range = symbol_range(document, idx);
            current = Some(DocumentSymbol {
                name: if name.is_empty() { trimmed.to_string() } else { name },
                detail: None,
                kind: SymbolKind::NAMESPACE,
                tags: None,
                deprecated: None,
                range,
                selection_range: range,
                children: Some(Vec::new()),
            });
            continue;
        }

        if let Some((verb, text)) = document.matched_steps.get(&idx) {
            let range = symbol_range(document, idx);
            let step_symbol = DocumentSymbol {
                name: format!("{} {}", verb.as_str(), text),
                detail: None,
                kind: SymbolKind::FUNCTION,
                tags: None,
                deprecated: None,
                range,
                selection_range: range,
                children: None,
            };
            if let Some(container) = current.as_mut() {
                container.children.get_or_insert_with(Vec::new).push(step_symbol);
            } else {
                symbols.push(step_symbol);
            }
        }
    }

    if let Some(finished) = current.take() {
        symbols.push(finished);
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Inventory, StepDefinition, Verb};
    use crate::config::WorkspaceConfig;
    use crate::normalizer::ParseTypeRegistry;
    use tower_lsp::lsp_types::Url;

    #[tokio::test]
    async fn groups_steps_under_scenario() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(Verb::Given, "a plain step", None, None, &ParseTypeRegistry::new()).unwrap();
        inventory.build(vec![def]).await;

        let uri = Url::parse("file:///tmp/a.feature").unwrap();
        let mut document = Document::new(uri, "Feature: x\n  Scenario: y\n    Given a plain step\n", 1);
        document.rebuild_matched_steps(&inventory, &WorkspaceConfig::default_snapshot()).await;

        let symbols = document_symbols(&document);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "y");
        assert_eq!(symbols[0].children.as_ref().unwrap().len(), 1);
    }
}
