//! Session creation: mode resolution, MCP server resolution, the harness
//! RPC and the initial session record.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use agent_protocol::{EnvVariable, Harness, HarnessError, McpServerSpec, NewSessionRequest};
use regex::{Captures, Regex};
use serde::Deserialize;
use session_store::{
    IdError, McpServer, Session, SessionId, SessionMetadata, SessionMode, Store, StoreError,
};
use thiserror::Error;

use crate::config::{EnvConfig, MODE_ENV};
use crate::stream::{Clock, SystemClock};

/// Placeholder that always resolves to the session working directory.
pub const WORKSPACE_VARIABLE: &str = "WORKSPACE";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("harness returned an invalid session id: {0}")]
    InvalidSessionId(#[from] IdError),
}

/// MCP server definitions before placeholder substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl McpConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Substitutes `${NAME}` placeholders in commands and arguments.
    pub fn resolve(&self, lookup: impl Fn(&str) -> Option<String>) -> Vec<McpServer> {
        self.mcp_servers
            .iter()
            .map(|(name, server)| McpServer {
                name: name.clone(),
                command: substitute_variables(&server.command, &lookup),
                args: server
                    .args
                    .iter()
                    .map(|arg| substitute_variables(arg, &lookup))
                    .collect(),
                env: server.env.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSessionParams {
    pub cwd: String,
    pub mode: Option<SessionMode>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub title: Option<String>,
    pub agent_id: Option<String>,
    pub parent_session_id: Option<SessionId>,
    pub mcp: Option<McpConfig>,
}

impl CreateSessionParams {
    #[must_use]
    pub fn new(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Self::default()
        }
    }
}

/// Picks the session mode: explicit value, then the environment value, then
/// [`SessionMode::Auto`]. Invalid environment values are ignored.
#[must_use]
pub fn resolve_session_mode(explicit: Option<SessionMode>, env_value: Option<&str>) -> SessionMode {
    if let Some(mode) = explicit {
        return mode;
    }

    match env_value.map(str::parse::<SessionMode>) {
        Some(Ok(mode)) => mode,
        Some(Err(error)) => {
            tracing::warn!(%error, "ignoring {MODE_ENV}");
            SessionMode::default()
        }
        None => SessionMode::default(),
    }
}

fn placeholder_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex must compile")
    })
}

/// Replaces `${NAME}` with `lookup(NAME)`. Unknown names are left as written.
pub fn substitute_variables(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    placeholder_regex()
        .replace_all(input, |captures: &Captures<'_>| {
            lookup(&captures[1]).unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

/// Creates sessions on a harness and records them in the store.
pub struct SessionLifecycle {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    env_mode: Option<String>,
}

impl SessionLifecycle {
    /// Reads the default mode from `SESSION_STREAM_MODE`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            env_mode: EnvConfig::from_env().session_mode,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_env_mode(mut self, env_mode: Option<String>) -> Self {
        self.env_mode = env_mode;
        self
    }

    pub fn create_session(
        &self,
        harness: &dyn Harness,
        params: CreateSessionParams,
    ) -> Result<Session, LifecycleError> {
        let mode = resolve_session_mode(params.mode, self.env_mode.as_deref());
        let mcp_servers = params
            .mcp
            .as_ref()
            .map(|config| {
                config.resolve(|name| {
                    if name == WORKSPACE_VARIABLE {
                        Some(params.cwd.clone())
                    } else {
                        std::env::var(name).ok()
                    }
                })
            })
            .unwrap_or_default();

        let response = harness.create_session(NewSessionRequest {
            cwd: params.cwd.clone(),
            mcp_servers: mcp_servers.iter().map(server_spec).collect(),
        })?;
        let session_id = SessionId::parse(response.session_id)?;

        let now = self.clock.now();
        let agent_id = params
            .agent_id
            .unwrap_or_else(|| harness.harness_id().to_string());
        let metadata = SessionMetadata {
            mcp_servers,
            model: params.model.clone(),
            temperature: params.temperature,
            parent_session_id: params.parent_session_id,
        };
        let metadata = (metadata != SessionMetadata::default()).then_some(metadata);

        // The stream driver may already be appending to this session; edit
        // the stored record in place so its message list survives.
        let session = self.store.update_session(&session_id, &mut |existing| {
            let mut session =
                existing.unwrap_or_else(|| Session::new(session_id.clone(), now));
            session.updated_at = now;
            session.mode = mode;
            if let Some(title) = &params.title {
                session.title = Some(title.clone());
            }
            session.agent_id = Some(agent_id.clone());
            session.metadata = metadata.clone();
            session
        })?;

        let capabilities = harness.capabilities();
        if capabilities.set_mode {
            harness.set_session_mode(session_id.as_str(), mode.as_str())?;
        }
        if let (true, Some(model)) = (capabilities.set_model, params.model.as_deref()) {
            harness.set_session_model(session_id.as_str(), model)?;
        }

        tracing::info!(
            session_id = %session_id,
            harness = harness.harness_id(),
            mode = mode.as_str(),
            "session created"
        );
        Ok(session)
    }
}

fn server_spec(server: &McpServer) -> McpServerSpec {
    McpServerSpec {
        name: server.name.clone(),
        command: server.command.clone(),
        args: server.args.clone(),
        env: server
            .env
            .iter()
            .map(|(name, value)| EnvVariable {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/dev".to_string()),
            "WORKSPACE" => Some("/work/repo".to_string()),
            _ => None,
        }
    }

    #[test]
    fn explicit_mode_beats_environment() {
        assert_eq!(
            resolve_session_mode(Some(SessionMode::ReadOnly), Some("full-access")),
            SessionMode::ReadOnly
        );
    }

    #[test]
    fn environment_mode_beats_default() {
        assert_eq!(
            resolve_session_mode(None, Some("full-access")),
            SessionMode::FullAccess
        );
        assert_eq!(resolve_session_mode(None, None), SessionMode::Auto);
    }

    #[test]
    fn invalid_environment_mode_falls_back_to_auto() {
        assert_eq!(resolve_session_mode(None, Some("yolo")), SessionMode::Auto);
    }

    #[test]
    fn placeholders_are_substituted_and_unknown_ones_kept() {
        assert_eq!(
            substitute_variables("${WORKSPACE}/bin:${HOME}/.local/${MISSING}", lookup),
            "/work/repo/bin:/home/dev/.local/${MISSING}"
        );
        assert_eq!(substitute_variables("$HOME ${ }", lookup), "$HOME ${ }");
    }

    #[test]
    fn mcp_config_resolves_commands_and_args() {
        let config = McpConfig::from_json(
            r#"{"mcpServers": {"files": {"command": "${WORKSPACE}/mcp", "args": ["--root", "${WORKSPACE}"], "env": {"TOKEN": "${HOME}"}}}}"#,
        )
        .expect("config should parse");

        let servers = config.resolve(lookup);

        assert_eq!(
            servers,
            vec![McpServer {
                name: "files".to_string(),
                command: "/work/repo/mcp".to_string(),
                args: vec!["--root".to_string(), "/work/repo".to_string()],
                env: BTreeMap::from([("TOKEN".to_string(), "${HOME}".to_string())]),
            }]
        );
    }
}
