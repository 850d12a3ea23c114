//! Pattern Normalizer (component A).
//!
//! Converts a step-definition pattern string into one-or-more anchored
//! regexes plus a canonical "clean" form used for display and prefix
//! matching. Placeholders come in three shapes: unnamed `{}`, named
//! `{name}`, and typed `{name:Type}`. A typed placeholder whose type is
//! registered with an enumeration of alternatives expands into the
//! Cartesian product of those alternatives, one pattern per combination.

use std::collections::HashMap;

use itertools::Itertools;
use regex::Regex;

use crate::error::GrizzlyError;

/// Registry of parse-type names to their enumerated literal alternatives,
/// harvested alongside the step definitions themselves by the Source
/// Loader (component C).
#[derive(Debug, Clone, Default)]
pub struct ParseTypeRegistry {
    alternatives: HashMap<String, Vec<String>>,
    formats: HashMap<String, Regex>,
}

impl ParseTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parse type with its enumeration of literal alternatives.
    /// Alternatives are stored pre-sorted so expansion order only ever
    /// depends on the content, not insertion order.
    pub fn register(&mut self, type_name: impl Into<String>, mut alternatives: Vec<String>) {
        alternatives.sort();
        self.alternatives.insert(type_name.into(), alternatives);
    }

    /// Register a parse type's validation format: a regex (no capture
    /// groups required) a captured argument of this type must match,
    /// mirroring a `Parameter`'s `REGEX` in the step library's own
    /// expression language. Invalid regex sources are dropped, non-fatally.
    pub fn register_format(&mut self, type_name: impl Into<String>, pattern: &str) {
        let type_name = type_name.into();
        match Regex::new(pattern) {
            Ok(re) => {
                self.formats.insert(type_name, re);
            }
            Err(err) => {
                tracing::warn!(type_name, pattern, error = %err, "invalid parse-type format regex, ignoring");
            }
        }
    }

    pub fn alternatives_for(&self, type_name: &str) -> Option<&[String]> {
        self.alternatives.get(type_name).map(Vec::as_slice)
    }

    pub fn format_for(&self, type_name: &str) -> Option<&Regex> {
        self.formats.get(type_name)
    }
}

#[derive(Debug, Clone)]
struct Placeholder {
    name: Option<String>,
    type_name: Option<String>,
    /// True when the brace group is immediately enclosed by `"` on both
    /// sides, i.e. it sits inside a quoted argument slot.
    quoted: bool,
    /// Verbatim `{...}` text, used to reconstruct bare (unquoted)
    /// placeholders in the clean expression unchanged.
    raw: String,
}

/// Positional metadata for one placeholder of a pattern, in source order.
/// Exposed so callers (argument-enum completion, go-to-definition) can map
/// a quoted slot in a matched step back to the placeholder that produced
/// it, independent of which regex variant matched.
#[derive(Debug, Clone)]
pub struct PlaceholderSlot {
    pub name: Option<String>,
    pub quoted: bool,
    /// `Some` (sorted) when the placeholder's type is registered with an
    /// enumeration of literal alternatives.
    pub alternatives: Option<Vec<String>>,
    /// `Some` when the placeholder's type is registered with a validation
    /// format instead of (or in addition to) an enumeration. Only
    /// meaningful for placeholders without `alternatives`, since an
    /// alternation placeholder is always baked into the regex as a literal
    /// rather than captured.
    pub format: Option<Regex>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Result of normalizing a single pattern string.
#[derive(Debug, Clone)]
pub struct NormalizedPattern {
    /// Pattern with every quoted placeholder emptied; used for display
    /// and normalized-prefix matching.
    pub clean_expression: String,
    /// One compiled, anchored regex per alternation combination. Always
    /// non-empty.
    pub regex_patterns: Vec<Regex>,
    /// Human-readable expansion parallel to `regex_patterns`, with
    /// alternation placeholders substituted by their concrete variant.
    pub expression_variants: Vec<String>,
    /// Every placeholder in the pattern, in source order, regardless of
    /// whether it ended up as a capture group or a baked-in literal.
    pub slots: Vec<PlaceholderSlot>,
}

/// Parse `pattern` into segments, erroring on unbalanced braces.
fn tokenize(pattern: &str) -> Result<Vec<Segment>, GrizzlyError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '{' {
            let open = i;
            let mut depth = 1;
            let mut j = i + 1;
            while j < chars.len() && depth > 0 {
                match chars[j] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth == 0 {
                    break;
                }
                j += 1;
            }
            if depth != 0 {
                return Err(GrizzlyError::PatternMalformed {
                    pattern: pattern.to_string(),
                    reason: "unbalanced '{'".to_string(),
                });
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let content: String = chars[open + 1..j].iter().collect();
            let raw: String = chars[open..=j].iter().collect();
            let quoted = open > 0 && chars[open - 1] == '"' && chars.get(j + 1) == Some(&'"');
            let mut parts = content.splitn(2, ':');
            let name = parts.next().filter(|s| !s.is_empty()).map(|s| s.to_string());
            let type_name = parts.next().map(|s| s.to_string());

            segments.push(Segment::Placeholder(Placeholder {
                name,
                type_name,
                quoted,
                raw,
            }));

            i = j + 1;
        } else if ch == '}' {
            return Err(GrizzlyError::PatternMalformed {
                pattern: pattern.to_string(),
                reason: "unbalanced '}'".to_string(),
            });
        } else {
            literal.push(ch);
            i += 1;
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

/// Normalize a single pattern string into its regex(es) and clean form.
pub fn normalize(
    pattern: &str,
    registry: &ParseTypeRegistry,
) -> Result<NormalizedPattern, GrizzlyError> {
    let segments = tokenize(pattern)?;

    // clean_expression: quoted placeholders vanish (the surrounding quotes
    // are already literal text); bare placeholders are left verbatim.
    let clean_expression: String = segments
        .iter()
        .map(|seg| match seg {
            Segment::Literal(text) => text.clone(),
            Segment::Placeholder(p) if p.quoted => String::new(),
            Segment::Placeholder(p) => p.raw.clone(),
        })
        .collect();

    // Alternatives per placeholder index, sorted lexicographically; `None`
    // for placeholders with no registered (or no) alternation.
    let alternative_lists: Vec<Option<&[String]>> = segments
        .iter()
        .map(|seg| match seg {
            Segment::Placeholder(p) => p
                .type_name
                .as_deref()
                .and_then(|t| registry.alternatives_for(t)),
            Segment::Literal(_) => None,
        })
        .collect();

    let varying_indices: Vec<usize> = alternative_lists
        .iter()
        .enumerate()
        .filter_map(|(i, alts)| alts.map(|_| i))
        .collect();

    let combinations: Vec<Vec<Option<String>>> = if varying_indices.is_empty() {
        vec![vec![None; segments.len()]]
    } else {
        let per_index: Vec<Vec<String>> = varying_indices
            .iter()
            .filter_map(|&i| alternative_lists[i].map(<[String]>::to_vec))
            .collect();

        per_index
            .into_iter()
            .multi_cartesian_product()
            .map(|chosen| {
                let mut row: Vec<Option<String>> = vec![None; segments.len()];
                for (&idx, value) in varying_indices.iter().zip(chosen.into_iter()) {
                    row[idx] = Some(value);
                }
                row
            })
            .collect()
    };

    let mut regex_patterns = Vec::with_capacity(combinations.len());
    let mut expression_variants = Vec::with_capacity(combinations.len());

    for combination in &combinations {
        let mut regex_src = String::from("^");
        let mut variant = String::new();

        for (seg, chosen) in segments.iter().zip(combination.iter()) {
            match (seg, chosen) {
                (Segment::Literal(text), _) => {
                    regex_src.push_str(&regex::escape(text));
                    variant.push_str(text);
                }
                (Segment::Placeholder(_), Some(value)) => {
                    regex_src.push_str(&regex::escape(value));
                    variant.push_str(value);
                }
                (Segment::Placeholder(p), None) if p.quoted => {
                    regex_src.push_str("([^\"]*)");
                }
                (Segment::Placeholder(p), None) => {
                    regex_src.push_str("(.*)");
                    variant.push_str(&p.raw);
                }
            }
        }
        regex_src.push('$');

        let compiled = Regex::new(&regex_src).map_err(|err| GrizzlyError::PatternMalformed {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;

        regex_patterns.push(compiled);
        expression_variants.push(variant);
    }

    let slots = segments
        .iter()
        .zip(alternative_lists.iter())
        .filter_map(|(seg, alts)| match seg {
            Segment::Placeholder(p) => Some(PlaceholderSlot {
                name: p.name.clone(),
                quoted: p.quoted,
                alternatives: alts.map(|a| a.to_vec()),
                format: match alts {
                    Some(_) => None,
                    None => p.type_name.as_deref().and_then(|t| registry.format_for(t)).cloned(),
                },
            }),
            Segment::Literal(_) => None,
        })
        .collect();

    Ok(NormalizedPattern {
        clean_expression,
        regex_patterns,
        expression_variants,
        slots,
    })
}

/// Normalize free text for prefix/lookup comparisons: trim, lowercase,
/// collapse internal whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_expression_empties_quoted_slots() {
        let result = normalize(r#"set context variable "{name}" to "{value}""#, &ParseTypeRegistry::new()).unwrap();
        assert_eq!(result.clean_expression, r#"set context variable "" to """#);
    }

    #[test]
    fn at_least_one_pattern_is_emitted() {
        let result = normalize("a plain step", &ParseTypeRegistry::new()).unwrap();
        assert_eq!(result.regex_patterns.len(), 1);
        assert_eq!(result.expression_variants.len(), 1);
    }

    #[test]
    fn regex_matches_its_own_clean_expression() {
        let result = normalize(r#"set context variable "{name}" to "{value}""#, &ParseTypeRegistry::new()).unwrap();
        assert!(result.regex_patterns[0].is_match(&result.clean_expression));
    }

    #[test]
    fn regexes_are_anchored() {
        let result = normalize(r#"a user of type "{type:StrictResponse}""#, &registry_with_strict_response()).unwrap();
        for re in &result.regex_patterns {
            let src = re.as_str();
            assert!(src.starts_with('^'));
            assert!(src.ends_with('$'));
        }
    }

    #[test]
    fn typed_alternation_expands_cartesian_product() {
        let result = normalize(
            r#"a user of type "{type:StrictResponse}" with weight "{weight}""#,
            &registry_with_strict_response(),
        )
        .unwrap();
        assert_eq!(result.regex_patterns.len(), 3);
        assert_eq!(result.expression_variants.len(), 3);
        // lexicographic order: get, post, put
        assert!(result.expression_variants[0].contains("get"));
        assert!(result.expression_variants[1].contains("post"));
        assert!(result.expression_variants[2].contains("put"));
    }

    #[test]
    fn order_stable_across_runs() {
        let registry = registry_with_strict_response();
        let first = normalize(r#"a user of type "{type:StrictResponse}""#, &registry).unwrap();
        let second = normalize(r#"a user of type "{type:StrictResponse}""#, &registry).unwrap();
        assert_eq!(first.expression_variants, second.expression_variants);
    }

    #[test]
    fn malformed_braces_are_rejected() {
        let result = normalize("a step with {unbalanced", &ParseTypeRegistry::new());
        assert!(result.is_err());
    }

    #[test]
    fn registered_format_attaches_to_unenumerated_slot() {
        let mut registry = ParseTypeRegistry::new();
        registry.register_format("Weight", r"^\d+(\.\d+)?$");
        let result = normalize(r#"a user with weight "{weight:Weight}""#, &registry).unwrap();
        let slot = result.slots.last().unwrap();
        assert!(slot.alternatives.is_none());
        assert!(slot.format.as_ref().unwrap().is_match("12.5"));
        assert!(!slot.format.as_ref().unwrap().is_match("heavy"));
    }

    #[test]
    fn invalid_format_regex_is_dropped_non_fatally() {
        let mut registry = ParseTypeRegistry::new();
        registry.register_format("Weight", "(unbalanced");
        assert!(registry.format_for("Weight").is_none());
    }

    #[test]
    fn normalize_text_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_text("  Set   Variable  "), "set variable");
    }

    fn registry_with_strict_response() -> ParseTypeRegistry {
        let mut registry = ParseTypeRegistry::new();
        registry.register(
            "StrictResponse",
            vec!["post".to_string(), "get".to_string(), "put".to_string()],
        );
        registry
    }
}
