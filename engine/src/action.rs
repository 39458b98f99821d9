//! Configured actions and their execution.
//!
//! An [`ActionConfig`] is the persisted, loosely typed form. It is turned
//! into a validated [`Action`] through `TryFrom`, and only a validated action
//! can run. Each variant implements [`Execute`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::RemoteApi;
use crate::error::{preview, Error, Result, RESPONSE_PREVIEW_LIMIT};
use crate::event::Event;
use crate::store::{self, SqlValue, Store};
use crate::token::ExecutionContext;

/// Persisted action definition: a type tag plus named arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ActionConfig {
    /// Build a config from a type tag and a JSON object of arguments.
    /// Non-object `args` are treated as empty.
    pub fn new(kind: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            args,
        }
    }

    /// Check the config without running it.
    pub fn validate(&self) -> Result<()> {
        Action::try_from(self).map(|_| ())
    }
}

/// A persisted binding of an event (and optional source) to actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAction {
    #[serde(default)]
    pub name: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub run: Vec<ActionConfig>,
}

impl EventAction {
    /// Entry name for an event and optional source: `event` or `event_source`.
    pub fn default_name(event: &str, source: Option<&str>) -> String {
        match source {
            Some(source) if !source.is_empty() => format!("{event}_{source}"),
            _ => event.to_string(),
        }
    }

    /// Whether this entry fires for `event`.
    pub fn matches(&self, event: &Event) -> bool {
        if self.event != event.event_type.as_str() {
            return false;
        }
        match self.source.as_deref() {
            Some(source) if !source.is_empty() => source == event.source,
            _ => true,
        }
    }
}

/// Where a db action's SQL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    /// A named command looked up in the store's dialect catalog.
    Command(String),
    /// Literal SQL text.
    Query(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbAction {
    pub target: DbTarget,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiAction {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecAction {
    pub command: String,
    pub args: Vec<String>,
    pub use_shell: bool,
}

/// A validated action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Db(DbAction),
    Api(ApiAction),
    Exec(ExecAction),
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidAction(msg.into())
}

fn non_empty_str(args: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Some(Value::String(_)) => Err(invalid(format!("'{key}' must not be empty"))),
        Some(_) => Err(invalid(format!("'{key}' must be a string"))),
    }
}

impl TryFrom<&ActionConfig> for Action {
    type Error = Error;

    fn try_from(config: &ActionConfig) -> Result<Self> {
        let args = &config.args;
        match config.kind.trim().to_ascii_lowercase().as_str() {
            "db" => {
                let target = match (non_empty_str(args, "command")?, non_empty_str(args, "query")?) {
                    (Some(_), Some(_)) => {
                        return Err(invalid("db action takes 'command' or 'query', not both"))
                    }
                    (Some(cmd), None) => DbTarget::Command(cmd),
                    (None, Some(q)) => DbTarget::Query(q),
                    (None, None) => return Err(invalid("db action requires 'command' or 'query'")),
                };
                let args = match args.get("args") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.clone(),
                    Some(_) => return Err(invalid("db action 'args' must be a list")),
                };
                Ok(Action::Db(DbAction { target, args }))
            }
            "api" => {
                let endpoint = non_empty_str(args, "endpoint")?
                    .ok_or_else(|| invalid("api action requires an 'endpoint'"))?;
                let method = non_empty_str(args, "method")?.unwrap_or_else(|| "GET".into());
                if !method.eq_ignore_ascii_case("GET") {
                    return Err(invalid(format!(
                        "api action only supports GET, got '{method}'"
                    )));
                }
                Ok(Action::Api(ApiAction { endpoint }))
            }
            "exec" => {
                let command = non_empty_str(args, "command")?
                    .ok_or_else(|| invalid("exec action requires a 'command'"))?;
                let use_shell = match args.get("use_shell") {
                    None | Some(Value::Null) => true,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => return Err(invalid("exec action 'use_shell' must be a boolean")),
                };
                let exec_args = match args.get("args") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s.clone()),
                            _ => Err(invalid("exec action 'args' must be strings")),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    Some(_) => return Err(invalid("exec action 'args' must be a list")),
                };
                if use_shell && !exec_args.is_empty() {
                    return Err(invalid(
                        "exec action 'args' are only supported when use_shell is set to false",
                    ));
                }
                Ok(Action::Exec(ExecAction {
                    command,
                    args: exec_args,
                    use_shell,
                }))
            }
            other => Err(invalid(format!("unknown action type: '{other}'"))),
        }
    }
}

/// Parse `db:<command>`, `api:<endpoint>` or `exec:<command>`.
pub fn parse_action_shorthand(input: &str) -> Result<ActionConfig> {
    let (kind, value) = input
        .split_once(':')
        .ok_or_else(|| invalid(format!("invalid action format: {input}")))?;
    let key = match kind.trim() {
        "db" | "exec" => "command",
        "api" => "endpoint",
        other => return Err(invalid(format!("unknown action type: '{other}'"))),
    };
    let mut args = Map::new();
    args.insert(key.to_string(), Value::String(value.trim().to_string()));
    let config = ActionConfig {
        kind: kind.trim().to_string(),
        args,
    };
    config.validate()?;
    Ok(config)
}

/// Runs validated actions against the engine's collaborators.
#[derive(Clone)]
pub struct ActionExecutor {
    store: Arc<dyn Store>,
    api: Arc<dyn RemoteApi>,
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn Store>, api: Arc<dyn RemoteApi>) -> Self {
        Self { store, api }
    }

    /// Validate and run one action to completion.
    pub async fn execute(&self, config: &ActionConfig, ctx: Option<&ExecutionContext>) -> Result<()> {
        let action = Action::try_from(config)?;
        action.execute(self, ctx).await
    }

    /// Validate now, then run the action on its own task.
    ///
    /// Invalid configs are rejected here and never spawned.
    pub fn run_detached(
        &self,
        config: &ActionConfig,
        ctx: Option<ExecutionContext>,
    ) -> Result<JoinHandle<Result<()>>> {
        let action = Action::try_from(config)?;
        let executor = self.clone();
        Ok(tokio::spawn(async move {
            action.execute(&executor, ctx.as_ref()).await
        }))
    }
}

/// The common capability of every action variant.
#[async_trait]
pub trait Execute {
    async fn execute(&self, executor: &ActionExecutor, ctx: Option<&ExecutionContext>) -> Result<()>;
}

fn render(ctx: Option<&ExecutionContext>, input: &str) -> String {
    match ctx {
        Some(ctx) => ctx.render(input),
        None => input.to_string(),
    }
}

#[async_trait]
impl Execute for Action {
    async fn execute(&self, executor: &ActionExecutor, ctx: Option<&ExecutionContext>) -> Result<()> {
        match self {
            Action::Db(a) => a.execute(executor, ctx).await,
            Action::Api(a) => a.execute(executor, ctx).await,
            Action::Exec(a) => a.execute(executor, ctx).await,
        }
    }
}

impl DbAction {
    /// Positional arguments with tokens substituted.
    pub fn bound_args(&self, ctx: Option<&ExecutionContext>) -> Vec<SqlValue> {
        self.args
            .iter()
            .map(|arg| match ctx {
                Some(ctx) => SqlValue::from_json(&ctx.render_value(arg)),
                None => SqlValue::from_json(arg),
            })
            .collect()
    }
}

#[async_trait]
impl Execute for DbAction {
    async fn execute(&self, executor: &ActionExecutor, ctx: Option<&ExecutionContext>) -> Result<()> {
        let store = executor.store.as_ref();
        let sql = match &self.target {
            DbTarget::Command(name) => {
                store::command_sql(store, &render(ctx, name))?.to_string()
            }
            DbTarget::Query(query) => render(ctx, query),
        };
        let args = self.bound_args(ctx);
        let affected = store.execute(&sql, &args).await?;
        debug!(affected, "db action executed");
        Ok(())
    }
}

#[async_trait]
impl Execute for ApiAction {
    async fn execute(&self, executor: &ActionExecutor, ctx: Option<&ExecutionContext>) -> Result<()> {
        let endpoint = render(ctx, &self.endpoint);
        let body = executor.api.get_raw(&endpoint).await?;
        debug!(endpoint = %endpoint, bytes = body.len(), "api action executed");
        Ok(())
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

fn default_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd.exe", "/C")
    } else {
        ("sh", "-c")
    }
}

impl ExecAction {
    /// Resolve tokens and build the program, arguments and environment.
    pub fn prepare(&self, ctx: Option<&ExecutionContext>) -> PreparedCommand {
        let command = render(ctx, &self.command);
        let env = ctx.map(ExecutionContext::env).unwrap_or_default();
        if self.use_shell {
            let (shell, flag) = default_shell();
            PreparedCommand {
                program: shell.to_string(),
                args: vec![flag.to_string(), command],
                env,
            }
        } else {
            PreparedCommand {
                program: command,
                args: self.args.iter().map(|a| render(ctx, a)).collect(),
                env,
            }
        }
    }
}

#[async_trait]
impl Execute for ExecAction {
    async fn execute(&self, _executor: &ActionExecutor, ctx: Option<&ExecutionContext>) -> Result<()> {
        let prepared = self.prepare(ctx);
        let output = tokio::process::Command::new(&prepared.program)
            .args(&prepared.args)
            .envs(prepared.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await
            .map_err(|e| Error::ActionFailed(format!("failed to start '{}': {e}", prepared.program)))?;

        if output.status.success() {
            return Ok(());
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim();
        let mut message = format!("command exited with {}", output.status);
        if !combined.is_empty() {
            message.push_str(": ");
            message.push_str(&preview(combined, RESPONSE_PREVIEW_LIMIT));
        }
        Err(Error::ActionFailed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_db_actions() {
        let ok = ActionConfig::new("db", json!({"command": "MergeRoutes", "args": [1, "$EVENT_TYPE"]}));
        assert!(matches!(
            Action::try_from(&ok).unwrap(),
            Action::Db(DbAction { target: DbTarget::Command(_), .. })
        ));

        let query = ActionConfig::new("db", json!({"query": "DELETE FROM Routes"}));
        assert!(query.validate().is_ok());

        for bad in [
            json!({}),
            json!({"command": ""}),
            json!({"command": "A", "query": "B"}),
            json!({"command": "A", "args": "x"}),
            json!({"function": "refresh"}),
        ] {
            assert!(ActionConfig::new("db", bad.clone()).validate().is_err(), "{bad}");
        }
    }

    #[test]
    fn validates_api_actions() {
        assert!(ActionConfig::new("api", json!({"endpoint": "customers/"})).validate().is_ok());
        assert!(ActionConfig::new("api", json!({"endpoint": "x", "method": "get"})).validate().is_ok());
        assert!(ActionConfig::new("api", json!({"endpoint": "x", "method": "POST"})).validate().is_err());
        assert!(ActionConfig::new("api", json!({})).validate().is_err());
    }

    #[test]
    fn validates_exec_actions() {
        assert!(ActionConfig::new("exec", json!({"command": "echo hi"})).validate().is_ok());
        assert!(ActionConfig::new(
            "exec",
            json!({"command": "echo", "args": ["hi"], "use_shell": false})
        )
        .validate()
        .is_ok());

        let err = ActionConfig::new("exec", json!({"command": "echo", "args": ["hi"]}))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("use_shell"));

        assert!(ActionConfig::new("exec", json!({"command": "x", "use_shell": "no"})).validate().is_err());
        assert!(ActionConfig::new("email", json!({"to": "x"})).validate().is_err());
    }

    #[test]
    fn shorthand_builds_configs() {
        let cfg = parse_action_shorthand("db:MergeRoutes").unwrap();
        assert_eq!(cfg.kind, "db");
        assert_eq!(cfg.args["command"], "MergeRoutes");

        let cfg = parse_action_shorthand("api:customers/").unwrap();
        assert_eq!(cfg.args["endpoint"], "customers/");

        let cfg = parse_action_shorthand("exec:echo a:b").unwrap();
        assert_eq!(cfg.args["command"], "echo a:b");

        assert!(parse_action_shorthand("nope").is_err());
        assert!(parse_action_shorthand("ftp:x").is_err());
        assert!(parse_action_shorthand("db:").is_err());
    }

    #[test]
    fn exec_substitutes_payload_field_and_exports_env() {
        let action = ExecAction {
            command: "notify".into(),
            args: vec!["$EVENT_PAYLOAD[account.id]".into()],
            use_shell: false,
        };
        let ctx = ExecutionContext::new("push.item.success", "accounts", json!({"account": {"id": "123"}}));
        let prepared = action.prepare(Some(&ctx));
        assert_eq!(prepared.program, "notify");
        assert_eq!(prepared.args, vec!["123"]);
        assert!(prepared.env.contains(&(
            "BADGER_EVENT_PAYLOAD_JSON".to_string(),
            r#"{"account":{"id":"123"}}"#.to_string()
        )));
    }

    #[test]
    fn shell_exec_wraps_command() {
        let action = ExecAction {
            command: "echo $EVENT_SOURCE".into(),
            args: vec![],
            use_shell: true,
        };
        let ctx = ExecutionContext::new("e", "routes", Value::Null);
        let prepared = action.prepare(Some(&ctx));
        assert_eq!(prepared.args.last().map(String::as_str), Some("echo routes"));

        let bare = action.prepare(None);
        assert!(bare.env.is_empty());
        assert_eq!(bare.args.last().map(String::as_str), Some("echo $EVENT_SOURCE"));
    }

    #[test]
    fn db_args_render_nested_tokens() {
        let action = DbAction {
            target: DbTarget::Query("UPDATE x SET y = ?".into()),
            args: vec![json!("$EVENT_PAYLOAD[id]"), json!(5), json!(["$EVENT_SOURCE"])],
        };
        let ctx = ExecutionContext::new("e", "routes", json!({"id": 9}));
        assert_eq!(
            action.bound_args(Some(&ctx)),
            vec![
                SqlValue::Text("9".into()),
                SqlValue::Int(5),
                SqlValue::Text(r#"["routes"]"#.into()),
            ]
        );
    }

    #[test]
    fn event_action_matching() {
        let entry = EventAction {
            name: "pull.complete_routes".into(),
            event: "pull.complete".into(),
            source: Some("routes".into()),
            run: vec![],
        };
        let hit = Event::new(crate::event::EventType::PullComplete, "routes");
        let miss = Event::new(crate::event::EventType::PullComplete, "accounts");
        assert!(entry.matches(&hit));
        assert!(!entry.matches(&miss));
        assert_eq!(
            EventAction::default_name("pull.complete", Some("routes")),
            entry.name
        );
        assert_eq!(EventAction::default_name("pull.complete", None), "pull.complete");
    }
}
