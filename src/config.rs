//! Workspace configuration.
//!
//! Mirrors the `initializationOptions` object the editor sends on
//! `initialize` (spec §6). Configuration is immutable between applies: a
//! new `InitializationOptions` fully replaces the previous snapshot,
//! atomically, via `ArcSwap`-style `Arc` assignment in the server core.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Raw configuration as received from the editor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitializationOptions {
    /// Regexes, each with exactly one capture group, used to recognize a
    /// step as declaring a variable name.
    #[serde(default)]
    pub variable_pattern: Vec<String>,

    /// Whether to provision an isolated environment for the workspace's
    /// step library before loading it.
    #[serde(default)]
    pub use_virtual_environment: bool,

    /// Alternate package index for environment provisioning.
    #[serde(default)]
    pub pip_extra_index_url: Option<String>,

    /// Run diagnostics only on save instead of on every change.
    #[serde(default)]
    pub diagnostics_on_save_only: bool,

    /// Quick-fix configuration.
    #[serde(default)]
    pub quick_fix: QuickFixOptions,

    /// Glob patterns excluded while scanning for step-definition sources.
    #[serde(default)]
    pub file_ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuickFixOptions {
    /// Opaque template used when offering "create step" fixes. Supports
    /// `{{verb}}`, `{{expression}}` and `{{params}}` placeholders,
    /// substituted by plain string replacement (see SPEC_FULL.md Open
    /// Questions — the real template language is owned by the external
    /// library maintainers).
    #[serde(default)]
    pub step_impl_template: Option<String>,
}

/// A compiled, validated configuration snapshot used by the rest of the
/// server. Constructing this from `InitializationOptions` is the single
/// point where a bad `variable_pattern` regex is downgraded to "ignored"
/// rather than propagated as a panic.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub raw: InitializationOptions,
    variable_patterns: Vec<Regex>,
}

impl WorkspaceConfig {
    pub fn from_options(raw: InitializationOptions) -> Self {
        let variable_patterns = raw
            .variable_pattern
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) if re.captures_len() == 2 => Some(re),
                Ok(_) => {
                    tracing::warn!(
                        pattern = %pattern,
                        "variable_pattern must have exactly one capture group, ignoring"
                    );
                    None
                }
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "invalid variable_pattern regex, ignoring");
                    None
                }
            })
            .collect();

        Self {
            raw,
            variable_patterns,
        }
    }

    pub fn default_snapshot() -> Self {
        Self::from_options(InitializationOptions::default())
    }

    /// Extract declared variable names from a step's matched text using
    /// every configured `variable_pattern`, in order.
    pub fn declared_variables(&self, text: &str) -> Vec<String> {
        self.variable_patterns
            .iter()
            .filter_map(|re| re.captures(text))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    pub fn diagnostics_on_save_only(&self) -> bool {
        self.raw.diagnostics_on_save_only
    }

    pub fn use_virtual_environment(&self) -> bool {
        self.raw.use_virtual_environment
    }

    pub fn file_ignore_patterns(&self) -> &[String] {
        &self.raw.file_ignore_patterns
    }

    /// Render the quick-fix step-implementation template, if configured.
    pub fn render_step_impl_template(&self, verb: &str, expression: &str, params: &str) -> Option<String> {
        let template = self.raw.quick_fix.step_impl_template.as_ref()?;
        let mut substitutions = HashMap::new();
        substitutions.insert("{{verb}}", verb);
        substitutions.insert("{{expression}}", expression);
        substitutions.insert("{{params}}", params);

        let mut rendered = template.clone();
        for (placeholder, value) in substitutions {
            rendered = rendered.replace(placeholder, value);
        }
        Some(rendered)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::default_snapshot()
    }
}

/// Process-wide fallback used by call sites that run before `initialize`
/// has completed (e.g. very early completion requests).
pub fn fallback_config() -> &'static WorkspaceConfig {
    static FALLBACK: OnceCell<WorkspaceConfig> = OnceCell::new();
    FALLBACK.get_or_init(WorkspaceConfig::default_snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pattern_without_single_capture_group() {
        let opts = InitializationOptions {
            variable_pattern: vec!["no group here".to_string()],
            ..Default::default()
        };
        let config = WorkspaceConfig::from_options(opts);
        assert!(config.declared_variables("no group here").is_empty());
    }

    #[test]
    fn extracts_variable_from_matching_step() {
        let opts = InitializationOptions {
            variable_pattern: vec![r#"value for variable "(\w+)" is ".*""#.to_string()],
            ..Default::default()
        };
        let config = WorkspaceConfig::from_options(opts);
        let vars = config.declared_variables(r#"value for variable "foo" is "none""#);
        assert_eq!(vars, vec!["foo".to_string()]);
    }

    #[test]
    fn renders_step_impl_template() {
        let opts = InitializationOptions {
            quick_fix: QuickFixOptions {
                step_impl_template: Some("@{{verb}}(\"{{expression}}\")\ndef step({{params}}):\n    ...".to_string()),
            },
            ..Default::default()
        };
        let config = WorkspaceConfig::from_options(opts);
        let rendered = config
            .render_step_impl_template("given", "a user", "")
            .unwrap();
        assert!(rendered.contains("@given(\"a user\")"));
    }
}
