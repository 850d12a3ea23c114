//! Source Loader (component C).
//!
//! Causes the external step-definition library to register its patterns,
//! then harvests them as `(verb, pattern, documentation, source_location)`
//! triples plus the parse-type alternation registry the Pattern Normalizer
//! needs. Two harvesting strategies are supported:
//!
//! - subprocess mode: spawn the configured discovery command inside the
//!   workspace's environment and read a JSON manifest from its stdout;
//! - offline/manifest mode: read the same JSON shape directly from a file
//!   on disk. This is the mechanism the test suite uses, since it needs no
//!   external interpreter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{EnvironmentError, GrizzlyError};
use crate::inventory::{SourceLocation, Verb};
use crate::normalizer::ParseTypeRegistry;

/// One harvested, not-yet-normalized step definition.
#[derive(Debug, Clone)]
pub struct HarvestedDefinition {
    pub verb: Verb,
    pub pattern: String,
    pub documentation: Option<String>,
    pub source_location: Option<SourceLocation>,
}

/// How and where to find the workspace's step-definition library.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub workspace_root: PathBuf,
    /// Discovery command and arguments, run inside `workspace_root` with
    /// the prepared environment on `PATH`. Expected to print the manifest
    /// JSON (see [`ManifestFile`]) to stdout and exit zero.
    pub discovery_command: Vec<String>,
    /// Command and arguments that provision the isolated environment
    /// (installing the workspace's declared step-library dependencies)
    /// before `discovery_command` runs. Only invoked when
    /// `use_virtual_environment` is set.
    pub environment_command: Vec<String>,
    pub use_virtual_environment: bool,
    pub pip_extra_index_url: Option<String>,
    pub timeout: Duration,
    /// When set, bypasses subprocess discovery entirely and reads the
    /// manifest from this path instead. Environment preparation is also
    /// skipped in this mode: the offline manifest is meant for testing
    /// without an external interpreter at all.
    pub offline_manifest: Option<PathBuf>,
}

impl LoaderConfig {
    pub fn offline(workspace_root: PathBuf, manifest_path: PathBuf) -> Self {
        Self {
            workspace_root,
            discovery_command: Vec::new(),
            environment_command: Vec::new(),
            use_virtual_environment: false,
            pip_extra_index_url: None,
            timeout: Duration::from_secs(60),
            offline_manifest: Some(manifest_path),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    parse_types: HashMap<String, Vec<String>>,
    #[serde(default)]
    parse_type_formats: HashMap<String, String>,
    #[serde(default)]
    steps: Vec<ManifestStep>,
}

#[derive(Debug, Deserialize)]
struct ManifestStep {
    verb: String,
    pattern: String,
    #[serde(default)]
    documentation: Option<String>,
    #[serde(default)]
    source_path: Option<String>,
    #[serde(default)]
    source_line: Option<u32>,
}

fn parse_verb(raw: &str) -> Option<Verb> {
    match raw.to_ascii_lowercase().as_str() {
        "given" => Some(Verb::Given),
        "when" => Some(Verb::When),
        "then" => Some(Verb::Then),
        _ => None,
    }
}

fn manifest_to_harvest(manifest: ManifestFile) -> (Vec<HarvestedDefinition>, ParseTypeRegistry) {
    let mut registry = ParseTypeRegistry::new();
    for (type_name, alternatives) in manifest.parse_types {
        registry.register(type_name, alternatives);
    }
    for (type_name, pattern) in manifest.parse_type_formats {
        registry.register_format(type_name, &pattern);
    }

    let definitions = manifest
        .steps
        .into_iter()
        .filter_map(|step| {
            let verb = parse_verb(&step.verb)?;
            let source_location = step.source_path.map(|path| SourceLocation {
                path: PathBuf::from(path),
                line: step.source_line.unwrap_or(1),
            });
            Some(HarvestedDefinition {
                verb,
                pattern: step.pattern,
                documentation: step.documentation,
                source_location,
            })
        })
        .collect();

    (definitions, registry)
}

async fn read_manifest_file(path: &Path) -> Result<ManifestFile, EnvironmentError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| EnvironmentError::ManifestUnreadable(path.to_path_buf(), err.to_string()))?;
    serde_json::from_str(&raw).map_err(|err| EnvironmentError::ManifestMalformed(path.to_path_buf(), err.to_string()))
}

/// Run the configured discovery command and parse its stdout as a
/// manifest, bounded by `timeout`.
async fn run_discovery_command(config: &LoaderConfig) -> Result<ManifestFile, EnvironmentError> {
    let Some((program, args)) = config.discovery_command.split_first() else {
        return Err(EnvironmentError::SpawnFailed(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "no discovery command configured",
        )));
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&config.workspace_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(index_url) = &config.pip_extra_index_url {
        command.env("PIP_EXTRA_INDEX_URL", index_url);
    }

    let run = async {
        let output = command
            .output()
            .await
            .map_err(EnvironmentError::SpawnFailed)?;
        if !output.status.success() {
            return Err(EnvironmentError::InstallFailed(output.status.code().unwrap_or(-1)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout)
            .map_err(|err| EnvironmentError::ManifestMalformed(PathBuf::from(program), err.to_string()))
    };

    match tokio::time::timeout(config.timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(EnvironmentError::Timeout(config.timeout)),
    }
}

/// Install the workspace's declared step-library dependencies into its
/// dedicated environment, bounded by `timeout`. A no-op (not invoked) when
/// `environment_command` is empty, so a workspace that sets
/// `use_virtual_environment` without configuring a command simply skips
/// this stage rather than failing.
async fn prepare_environment(config: &LoaderConfig) -> Result<(), EnvironmentError> {
    let Some((program, args)) = config.environment_command.split_first() else {
        return Ok(());
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&config.workspace_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(index_url) = &config.pip_extra_index_url {
        command.env("PIP_EXTRA_INDEX_URL", index_url);
    }

    let run = async {
        let output = command.output().await.map_err(EnvironmentError::SpawnFailed)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EnvironmentError::InstallFailed(output.status.code().unwrap_or(-1)))
        }
    };

    match tokio::time::timeout(config.timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(EnvironmentError::Timeout(config.timeout)),
    }
}

/// Prepare the environment (if configured) and harvest step definitions.
/// Any failure becomes `GrizzlyError::SourceLoadFailed`; the caller is
/// expected to leave the previous inventory active on error.
pub async fn load(config: &LoaderConfig) -> Result<(Vec<HarvestedDefinition>, ParseTypeRegistry), GrizzlyError> {
    if !config.workspace_root.exists() {
        return Err(GrizzlyError::SourceLoadFailed {
            source_path: config.workspace_root.display().to_string(),
            reason: EnvironmentError::MissingRoot(config.workspace_root.clone()).to_string(),
        });
    }

    if config.use_virtual_environment && config.offline_manifest.is_none() {
        prepare_environment(config).await.map_err(|err| GrizzlyError::SourceLoadFailed {
            source_path: config.workspace_root.display().to_string(),
            reason: err.to_string(),
        })?;
    }

    let manifest = if let Some(path) = &config.offline_manifest {
        read_manifest_file(path).await
    } else {
        run_discovery_command(config).await
    }
    .map_err(|err| GrizzlyError::SourceLoadFailed {
        source_path: config.workspace_root.display().to_string(),
        reason: err.to_string(),
    })?;

    Ok(manifest_to_harvest(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_steps_and_parse_types_from_manifest() {
        let manifest = write_manifest(
            r#"{
                "parse_types": {"StrictResponse": ["post", "get"]},
                "steps": [
                    {"verb": "given", "pattern": "a step", "documentation": "does a thing", "source_path": "steps.py", "source_line": 4}
                ]
            }"#,
        );
        let config = LoaderConfig::offline(std::env::temp_dir(), manifest.path().to_path_buf());
        let (definitions, registry) = load(&config).await.unwrap();

        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].verb, Verb::Given);
        assert_eq!(registry.alternatives_for("StrictResponse").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_manifest_is_source_load_failed() {
        let config = LoaderConfig::offline(std::env::temp_dir(), PathBuf::from("/nonexistent/manifest.json"));
        let result = load(&config).await;
        assert!(matches!(result, Err(GrizzlyError::SourceLoadFailed { .. })));
    }

    #[tokio::test]
    async fn missing_workspace_root_is_source_load_failed() {
        let config = LoaderConfig::offline(PathBuf::from("/definitely/not/here"), PathBuf::from("manifest.json"));
        let result = load(&config).await;
        assert!(matches!(result, Err(GrizzlyError::SourceLoadFailed { .. })));
    }

    #[tokio::test]
    async fn offline_manifest_mode_skips_environment_preparation() {
        // `environment_command` is left empty by `LoaderConfig::offline`,
        // and `use_virtual_environment` defaults to false, so loading an
        // offline manifest never needs a real installer on PATH.
        let manifest = write_manifest(r#"{"steps": [{"verb": "given", "pattern": "a step"}]}"#);
        let config = LoaderConfig::offline(std::env::temp_dir(), manifest.path().to_path_buf());
        assert!(config.environment_command.is_empty());
        assert!(load(&config).await.is_ok());
    }

    #[tokio::test]
    async fn loads_parse_type_formats_from_manifest() {
        let manifest = write_manifest(
            r#"{
                "parse_type_formats": {"Weight": "^\\d+$"},
                "steps": [{"verb": "given", "pattern": "a step"}]
            }"#,
        );
        let config = LoaderConfig::offline(std::env::temp_dir(), manifest.path().to_path_buf());
        let (_, registry) = load(&config).await.unwrap();
        assert!(registry.format_for("Weight").unwrap().is_match("42"));
    }

    #[tokio::test]
    async fn unknown_verb_is_skipped_not_fatal() {
        let manifest = write_manifest(
            r#"{"steps": [{"verb": "oops", "pattern": "a step"}, {"verb": "when", "pattern": "another"}]}"#,
        );
        let config = LoaderConfig::offline(std::env::temp_dir(), manifest.path().to_path_buf());
        let (definitions, _) = load(&config).await.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].verb, Verb::When);
    }
}
