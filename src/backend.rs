//! Server Core (component H).
//!
//! Owns workspace state — the active inventory, the open document map, the
//! configuration snapshot, and the rebuild state machine — and routes
//! `tower_lsp::LanguageServer` requests to the other components. Custom
//! operations (`grizzly-ls/install`, `grizzly-ls/rebuild-inventory`,
//! `grizzly-ls/run-diagnostics`, `grizzly-ls/render-gherkin`,
//! `grizzly-ls/create-step`) are exposed through `workspace/executeCommand`,
//! matching the editor-agnostic request surface without inventing bespoke
//! JSON-RPC methods. Unknown-step diagnostics also surface a quick-fix via
//! `textDocument/codeAction`, and inventory rebuilds report their progress
//! over `$/progress`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result as RpcResult;
use tower_lsp::lsp_types::{notification, request};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::analyzer::{self, CursorContext};
use crate::completion;
use crate::config::{InitializationOptions, WorkspaceConfig};
use crate::definition;
use crate::diagnostics;
use crate::document::Document;
use crate::hover;
use crate::inventory::{Inventory, StepDefinition};
use crate::loader::{self, LoaderConfig};
use crate::normalizer::ParseTypeRegistry;
use crate::symbols;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

pub struct GrizzlyBackend {
    client: Client,
    documents: Arc<DashMap<Url, Document>>,
    inventory: Arc<Inventory>,
    registry: Arc<RwLock<ParseTypeRegistry>>,
    config: Arc<RwLock<WorkspaceConfig>>,
    rebuild_state: Arc<RwLock<RebuildState>>,
    workspace_root: Arc<RwLock<Option<PathBuf>>>,
}

impl GrizzlyBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(DashMap::new()),
            inventory: Arc::new(Inventory::empty()),
            registry: Arc::new(RwLock::new(ParseTypeRegistry::new())),
            config: Arc::new(RwLock::new(WorkspaceConfig::default_snapshot())),
            rebuild_state: Arc::new(RwLock::new(RebuildState::Idle)),
            workspace_root: Arc::new(RwLock::new(None)),
        }
    }

    async fn loader_config(&self) -> Option<LoaderConfig> {
        let root = self.workspace_root.read().await.clone()?;
        let config = self.config.read().await;

        let mut discovery_command = vec!["grizzly-ls-discover".to_string()];
        for pattern in config.file_ignore_patterns() {
            discovery_command.push("--ignore".to_string());
            discovery_command.push(pattern.clone());
        }

        Some(LoaderConfig {
            workspace_root: root,
            discovery_command,
            environment_command: vec!["grizzly-ls-discover".to_string(), "--prepare-environment".to_string()],
            use_virtual_environment: config.use_virtual_environment(),
            pip_extra_index_url: config.raw.pip_extra_index_url.clone(),
            timeout: Duration::from_secs(120),
            offline_manifest: None,
        })
    }

    /// Announce the start of a long-running operation via `$/progress`,
    /// creating the token first as the protocol requires. Best-effort: a
    /// client that never asked for `window/workDoneProgress` simply
    /// ignores these, so request/notification failures are swallowed.
    async fn begin_progress(&self, token: &NumberOrString, title: &str) {
        let _ = self
            .client
            .send_request::<request::WorkDoneProgressCreate>(WorkDoneProgressCreateParams { token: token.clone() })
            .await;
        self.client
            .send_notification::<notification::Progress>(ProgressParams {
                token: token.clone(),
                value: ProgressParamsValue::WorkDone(WorkDoneProgress::Begin(WorkDoneProgressBegin {
                    title: title.to_string(),
                    cancellable: Some(false),
                    message: None,
                    percentage: None,
                })),
            })
            .await;
    }

    async fn end_progress(&self, token: &NumberOrString, message: Option<String>) {
        self.client
            .send_notification::<notification::Progress>(ProgressParams {
                token: token.clone(),
                value: ProgressParamsValue::WorkDone(WorkDoneProgress::End(WorkDoneProgressEnd { message })),
            })
            .await;
    }

    /// Rebuild the inventory: load via the configured `LoaderConfig`,
    /// normalize every harvested pattern (skipping malformed ones
    /// non-fatally), and install the result. Concurrent callers coalesce
    /// onto the inventory's own in-flight rebuild. Reports `$/progress`
    /// around the rebuild, per the Install/ensure-environment operation's
    /// "progress notifications" return value.
    pub async fn rebuild_inventory(&self) -> Result<(), String> {
        let Some(loader_config) = self.loader_config().await else {
            return Err("workspace root not yet known".to_string());
        };

        let token = NumberOrString::String("grizzly-ls/rebuild-inventory".to_string());
        self.begin_progress(&token, "Rebuilding step inventory").await;

        *self.rebuild_state.write().await = RebuildState::Loading;

        let registry_handle = Arc::clone(&self.registry);
        let result = self
            .inventory
            .rebuild_with(move || async move {
                let (harvested, registry) = loader::load(&loader_config).await?;
                let mut definitions = Vec::with_capacity(harvested.len());
                for item in harvested {
                    match StepDefinition::from_pattern(
                        item.verb,
                        &item.pattern,
                        item.documentation,
                        item.source_location,
                        &registry,
                    ) {
                        Ok(def) => definitions.push(def),
                        Err(err) => tracing::warn!(error = %err, "skipping malformed step pattern"),
                    }
                }
                *registry_handle.write().await = registry;
                Ok(definitions)
            })
            .await;

        match &result {
            Ok(()) => *self.rebuild_state.write().await = RebuildState::Ready,
            Err(err) => *self.rebuild_state.write().await = RebuildState::Failed(err.to_string()),
        }

        self.reanalyze_open_documents().await;

        let end_message = match &result {
            Ok(()) => None,
            Err(err) => Some(err.to_string()),
        };
        self.end_progress(&token, end_message).await;

        result.map_err(|err| err.to_string())
    }

    async fn reanalyze_open_documents(&self) {
        let config = self.config.read().await;
        let uris: Vec<Url> = self.documents.iter().map(|entry| entry.key().clone()).collect();
        for uri in uris {
            if let Some(mut doc) = self.documents.get_mut(&uri) {
                doc.rebuild_matched_steps(&self.inventory, &config).await;
            }
        }
    }

    async fn publish_diagnostics_for(&self, uri: Url) {
        let text = match self.documents.get(&uri) {
            Some(doc) => doc.text(),
            None => return,
        };
        let diagnostics = diagnostics::diagnose(&text, &self.inventory).await;
        self.client.publish_diagnostics(uri, diagnostics, None).await;
    }

    async fn lines_of(&self, uri: &Url) -> Option<Vec<String>> {
        self.documents.get(uri).map(|doc| doc.lines())
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for GrizzlyBackend {
    async fn initialize(&self, params: InitializeParams) -> RpcResult<InitializeResult> {
        if let Some(root_uri) = params.root_uri {
            if let Ok(path) = root_uri.to_file_path() {
                *self.workspace_root.write().await = Some(path);
            }
        }

        if let Some(options) = params.initialization_options {
            if let Ok(parsed) = serde_json::from_value::<InitializationOptions>(options) {
                *self.config.write().await = WorkspaceConfig::from_options(parsed);
            }
        }

        Ok(InitializeResult {
            capabilities: crate::capabilities::server_capabilities(),
            server_info: Some(ServerInfo {
                name: "grizzly-ls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        tracing::info!("grizzly-ls initialized");
        if self.rebuild_inventory().await.is_err() {
            tracing::warn!("initial inventory rebuild failed; previous (empty) inventory remains active");
        }
    }

    async fn shutdown(&self) -> RpcResult<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        let mut document = Document::new(uri.clone(), &params.text_document.text, params.text_document.version);
        let config = self.config.read().await;
        document.rebuild_matched_steps(&self.inventory, &config).await;
        drop(config);
        self.documents.insert(uri.clone(), document);
        if !self.config.read().await.diagnostics_on_save_only() {
            self.publish_diagnostics_for(uri).await;
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        if let Some(mut doc) = self.documents.get_mut(&uri) {
            doc.apply_changes(params.content_changes, params.text_document.version);
            let config = self.config.read().await;
            doc.rebuild_matched_steps(&self.inventory, &config).await;
        }
        if !self.config.read().await.diagnostics_on_save_only() {
            self.publish_diagnostics_for(uri).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        self.publish_diagnostics_for(params.text_document.uri).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.documents.remove(&params.text_document.uri);
    }

    async fn completion(&self, params: CompletionParams) -> RpcResult<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let Some(lines) = self.lines_of(&uri).await else {
            return Ok(None);
        };
        let line_idx = position.line as usize;
        let Some(document) = self.documents.get(&uri) else {
            return Ok(None);
        };
        let column = document.position_to_char(position) - document.position_to_char(Position { line: position.line, character: 0 });
        drop(document);

        let context = analyzer::classify(&lines, line_idx, column, &self.inventory).await;

        let items = match context {
            CursorContext::Keyword => {
                let seen = analyzer::seen_keywords(&lines, line_idx);
                let line = lines.get(line_idx).cloned().unwrap_or_default();
                let prefix = line.trim();
                let range = Range {
                    start: Position { line: position.line, character: 0 },
                    end: position,
                };
                completion::keyword_completions(&seen, prefix, range)
            }
            CursorContext::Step(verb) => {
                let (_, text, verb_end_col) = match analyzer::step_text(&lines, line_idx) {
                    Some(v) => v,
                    None => return Ok(None),
                };
                let line_start = Position { line: position.line, character: 0 };
                let doc = match self.documents.get(&uri) {
                    Some(d) => d,
                    None => return Ok(None),
                };
                let line_start_char = doc.position_to_char(line_start);
                let range = Range {
                    start: doc.char_to_position(line_start_char + verb_end_col),
                    end: position,
                };
                drop(doc);
                completion::step_completions(&self.inventory, verb, text.trim(), range).await
            }
            CursorContext::VariableRef { partial } => {
                let doc = match self.documents.get(&uri) {
                    Some(d) => d,
                    None => return Ok(None),
                };
                let range = Range { start: position, end: position };
                let rest_of_line: String = lines[line_idx].chars().skip(column).collect();
                let closes_brace = rest_of_line.trim_start().starts_with("}}");
                let closes_quote = rest_of_line.contains('"');
                let items = completion::variable_completions(&doc, &partial, range, closes_brace, closes_quote);
                drop(doc);
                items
            }
            CursorContext::ArgumentEnum { alternatives } => {
                let range = Range { start: position, end: position };
                completion::argument_enum_completions(&alternatives, range)
            }
            CursorContext::Outside => Vec::new(),
        };

        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn hover(&self, params: HoverParams) -> RpcResult<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(document) = self.documents.get(&uri) else {
            return Ok(None);
        };
        Ok(hover::hover_for_step(&document, position.line as usize, &self.inventory).await)
    }

    async fn goto_definition(&self, params: GotoDefinitionParams) -> RpcResult<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(document) = self.documents.get(&uri) else {
            return Ok(None);
        };
        let column = document.position_to_char(position) - document.position_to_char(Position { line: position.line, character: 0 });
        let payload_root = self
            .workspace_root
            .read()
            .await
            .clone()
            .map(|root| root.join("features").join("requests"))
            .unwrap_or_else(|| PathBuf::from("features/requests"));

        Ok(definition::definition_for_step(&document, position.line as usize, column, &self.inventory, &payload_root).await)
    }

    async fn document_symbol(&self, params: DocumentSymbolParams) -> RpcResult<Option<DocumentSymbolResponse>> {
        let Some(document) = self.documents.get(&params.text_document.uri) else {
            return Ok(None);
        };
        Ok(Some(DocumentSymbolResponse::Nested(symbols::document_symbols(&document))))
    }

    async fn code_action(&self, params: CodeActionParams) -> RpcResult<Option<CodeActionResponse>> {
        let uri = params.text_document.uri;
        let Some(lines) = self.lines_of(&uri).await else {
            return Ok(None);
        };
        let config = self.config.read().await;

        let mut actions = Vec::new();
        for diagnostic in &params.context.diagnostics {
            if diagnostic.code != Some(NumberOrString::String("E0003".to_string())) {
                continue;
            }
            let line_idx = diagnostic.range.start.line as usize;
            let Some((verb, text, _)) = analyzer::step_text(&lines, line_idx) else {
                continue;
            };
            let Some(template) = config.render_step_impl_template(verb.as_str(), text.trim(), "") else {
                continue;
            };
            actions.push(CodeActionOrCommand::CodeAction(CodeAction {
                title: format!("Create step implementation for `{}`", text.trim()),
                kind: Some(CodeActionKind::QUICKFIX),
                diagnostics: Some(vec![diagnostic.clone()]),
                command: Some(Command {
                    title: "Create step implementation".to_string(),
                    command: "grizzly-ls/create-step".to_string(),
                    arguments: Some(vec![Value::String(template)]),
                }),
                ..Default::default()
            }));
        }

        if actions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(actions))
        }
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> RpcResult<Option<Value>> {
        match params.command.as_str() {
            "grizzly-ls/install" | "grizzly-ls/rebuild-inventory" => {
                let result = self.rebuild_inventory().await;
                Ok(Some(serde_json::json!({ "success": result.is_ok() })))
            }
            "grizzly-ls/run-diagnostics" => {
                if let Some(Value::String(uri)) = params.arguments.first() {
                    if let Ok(uri) = Url::parse(uri) {
                        self.publish_diagnostics_for(uri).await;
                    }
                }
                Ok(Some(Value::Null))
            }
            "grizzly-ls/render-gherkin" => {
                let content = params
                    .arguments
                    .first()
                    .and_then(|v| v.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match diagnostics::render_template(content) {
                    Ok(rendered) => Ok(Some(serde_json::json!([true, rendered]))),
                    Err(err) => Ok(Some(serde_json::json!([false, err.to_string()]))),
                }
            }
            "grizzly-ls/create-step" => Ok(params.arguments.first().cloned()),
            _ => Ok(None),
        }
    }
}

pub fn rebuild_state_label(state: &RebuildState) -> &'static str {
    match state {
        RebuildState::Idle => "idle",
        RebuildState::Loading => "loading",
        RebuildState::Ready => "ready",
        RebuildState::Failed(_) => "failed",
    }
}
