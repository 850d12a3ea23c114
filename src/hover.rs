//! Hover & Definition (component F) — hover half.

use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind, Range};

use crate::analyzer;
use crate::document::Document;
use crate::inventory::Inventory;

/// Resolve hover for the step line under the cursor. Returns `None` when
/// the line isn't a step, or the step has no matching inventory entry.
pub async fn hover_for_step(document: &Document, line_idx: usize, inventory: &Inventory) -> Option<Hover> {
    let lines = document.lines();
    let (verb, text, verb_end_col) = analyzer::step_text(&lines, line_idx)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (definition, _variant) = inventory.lookup(verb, trimmed).await?;
    let help = definition.help.clone()?;

    let line = &lines[line_idx];
    let start_char = verb_end_col;
    let end_char = line.chars().count();
    let line_start_char = document.position_to_char(tower_lsp::lsp_types::Position { line: line_idx as u32, character: 0 });

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: help,
        }),
        range: Some(Range {
            start: document.char_to_position(line_start_char + start_char),
            end: document.char_to_position(line_start_char + end_char),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{StepDefinition, Verb};
    use crate::normalizer::ParseTypeRegistry;
    use tower_lsp::lsp_types::Url;

    #[tokio::test]
    async fn hover_returns_help_text_for_matched_step() {
        let inventory = Inventory::empty();
        let def = StepDefinition::from_pattern(
            Verb::Given,
            r#"a user of type "{type}" with weight "{weight}" load testing "{host}""#,
            Some("Registers a virtual user.".to_string()),
            None,
            &ParseTypeRegistry::new(),
        )
        .unwrap();
        inventory.build(vec![def]).await;

        let uri = Url::parse("file:///tmp/a.feature").unwrap();
        let document = Document::new(
            uri,
            "Feature: x\n  Scenario: y\n    Given a user of type \"RestApi\" with weight \"1\" load testing \"http://x\"\n",
            1,
        );

        let hover = hover_for_step(&document, 2, &inventory).await.unwrap();
        match hover.contents {
            HoverContents::Markup(content) => assert_eq!(content.value, "Registers a virtual user."),
            other => panic!("unexpected hover contents: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hover_is_none_for_unmatched_step() {
        let inventory = Inventory::empty();
        let uri = Url::parse("file:///tmp/a.feature").unwrap();
        let document = Document::new(uri, "Feature: x\n  Scenario: y\n    Given nothing matches\n", 1);
        assert!(hover_for_step(&document, 2, &inventory).await.is_none());
    }
}
