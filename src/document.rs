//! Per-buffer document state.
//!
//! Rope-backed text storage with incremental edits and UTF-16 aware
//! position conversion, since LSP measures `character` in UTF-16 code
//! units while Rust strings are UTF-8. Each document additionally carries
//! the analyzer's derived view: a `line -> (verb, expression)` map for
//! matched step lines and the set of variable names declared in it.

use std::collections::{HashMap, HashSet};

use ropey::Rope;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};

use crate::inventory::Verb;

#[derive(Debug, Clone)]
pub struct Document {
    pub uri: Url,
    pub version: i32,
    rope: Rope,
    /// Derived on every replace: matched step lines, keyed by 0-indexed
    /// line number.
    pub matched_steps: HashMap<usize, (Verb, String)>,
    /// Names declared by `variable_pattern` matches across the document.
    pub declared_variables: HashSet<String>,
}

impl Document {
    pub fn new(uri: Url, text: &str, version: i32) -> Self {
        let mut doc = Self {
            uri,
            version,
            rope: Rope::from_str(text),
            matched_steps: HashMap::new(),
            declared_variables: HashSet::new(),
        };
        doc.reanalyze_steps();
        doc
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn lines(&self) -> Vec<String> {
        self.rope.lines().map(|l| l.to_string().trim_end_matches('\n').to_string()).collect()
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Apply a full-document or incremental set of changes and re-derive
    /// matched steps. The previous analysis is discarded unconditionally,
    /// matching the "replaced atomically" document model.
    pub fn apply_changes(&mut self, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        for change in changes {
            match change.range {
                Some(range) => {
                    let start = self.position_to_char(range.start);
                    let end = self.position_to_char(range.end);
                    self.rope.remove(start..end);
                    self.rope.insert(start, &change.text);
                }
                None => {
                    self.rope = Rope::from_str(&change.text);
                }
            }
        }
        self.version = version;
        self.reanalyze_steps();
    }

    /// Re-derive `matched_steps`. Variable declarations require a
    /// configuration snapshot and are populated by the caller (the Server
    /// Core has the active `WorkspaceConfig`; this module has no
    /// configuration dependency).
    fn reanalyze_steps(&mut self) {
        // Populated lazily by `Self::rebuild_matched_steps` once an
        // inventory snapshot is available; left empty at construction.
        self.matched_steps.clear();
    }

    /// Recompute `matched_steps` and `declared_variables` against the
    /// current inventory and configuration. Called by the Server Core
    /// after every change, and whenever the inventory itself is rebuilt.
    pub async fn rebuild_matched_steps(
        &mut self,
        inventory: &crate::inventory::Inventory,
        config: &crate::config::WorkspaceConfig,
    ) {
        self.matched_steps.clear();
        self.declared_variables.clear();

        let lines = self.lines();
        for (idx, _) in lines.iter().enumerate() {
            let Some((verb, text, _)) = crate::analyzer::step_text(&lines, idx) else {
                continue;
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some((_, _)) = inventory.lookup(verb, trimmed).await {
                self.matched_steps.insert(idx, (verb, trimmed.to_string()));
                for name in config.declared_variables(trimmed) {
                    self.declared_variables.insert(name);
                }
            }
        }
    }

    pub fn position_to_char(&self, position: Position) -> usize {
        let line_idx = (position.line as usize).min(self.rope.len_lines().saturating_sub(1));
        let line_start_char = self.rope.line_to_char(line_idx);
        let line = self.rope.line(line_idx);

        let mut utf16_budget = position.character as usize;
        let mut char_offset = 0;
        for ch in line.chars() {
            if ch == '\n' {
                break;
            }
            if utf16_budget == 0 {
                break;
            }
            utf16_budget -= ch.len_utf16();
            char_offset += 1;
        }
        line_start_char + char_offset
    }

    pub fn char_to_position(&self, char_idx: usize) -> Position {
        let char_idx = char_idx.min(self.rope.len_chars());
        let line_idx = self.rope.char_to_line(char_idx);
        let line_start_char = self.rope.line_to_char(line_idx);
        let line = self.rope.line(line_idx);

        let mut utf16_offset = 0u32;
        let mut remaining = char_idx - line_start_char;
        for ch in line.chars() {
            if remaining == 0 {
                break;
            }
            utf16_offset += ch.len_utf16() as u32;
            remaining -= 1;
        }

        Position {
            line: line_idx as u32,
            character: utf16_offset,
        }
    }

    pub fn range_for_chars(&self, start_char: usize, end_char: usize) -> Range {
        Range {
            start: self.char_to_position(start_char),
            end: self.char_to_position(end_char),
        }
    }
}
