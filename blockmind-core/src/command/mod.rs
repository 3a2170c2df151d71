//! Command specs, argument validation and the command registry.
//!
//! Commands are the only things a decision can make the agent do. Each one
//! declares a typed argument schema and a risk class; the registry is closed
//! after startup, so a decision naming anything else is rejected before any
//! side effect happens.

pub mod builtin;

use crate::error::{CommandError, CommandResult, Error, ValidationError, ValidationResult};
use crate::id::TriggerId;
use crate::memory::MemoryStore;
use crate::transport::ChatSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Failure codes recorded in [`ActionResult::error`]
pub mod codes {
    /// Decision named an unknown command or carried invalid arguments
    pub const INVALID_DECISION: &str = "invalid_decision";
    /// Nobody confirmed a risky command in time
    pub const CONFIRMATION_TIMEOUT: &str = "confirmation_timeout";
    /// A confirmation arrived with the wrong token, or nothing was pending
    pub const CONFIRMATION_MISMATCH: &str = "confirmation_mismatch";
    /// A newer risky command replaced this pending one
    pub const CONFIRMATION_SUPERSEDED: &str = "confirmation_superseded";
    /// The player cancelled the pending command
    pub const CONFIRMATION_CANCELLED: &str = "confirmation_cancelled";
    /// Work was abandoned because the session shut down
    pub const CANCELLED: &str = "cancelled";
}

/// Safety tier of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Executes as soon as it validates
    Safe,
    /// Waits for the requesting player to confirm
    NeedsConfirmation,
}

/// JSON type an argument must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// JSON string
    String,
    /// JSON integer
    Integer,
    /// Any JSON number
    Number,
    /// JSON boolean
    Boolean,
}

impl ArgType {
    fn json_name(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
        }
    }
}

/// Extra restriction on an argument's value
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Inclusive integer bounds
    IntRange { min: i64, max: i64 },
    /// Inclusive numeric bounds
    NumberRange { min: f64, max: f64 },
    /// Value must be one of these strings (case-insensitive)
    OneOf(Vec<String>),
    /// At most this many characters
    MaxLength(usize),
    /// Chat-safe text: at most this many characters, no leading `/`, no
    /// control characters
    PlainText { max_len: usize },
}

/// One declared argument
#[derive(Debug, Clone)]
pub struct ArgSpec {
    /// Argument name
    pub name: String,
    /// Expected JSON type
    pub ty: ArgType,
    /// Whether the argument must be present
    pub required: bool,
    /// Description shown to the model
    pub description: String,
    /// Value restriction
    pub constraint: Option<Constraint>,
}

impl ArgSpec {
    /// A required argument
    pub fn required(name: impl Into<String>, ty: ArgType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: description.into(),
            constraint: None,
        }
    }

    /// An optional argument
    pub fn optional(name: impl Into<String>, ty: ArgType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty, description)
        }
    }

    /// Attach a constraint
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    fn coerce(&self, command: &str, value: &Value) -> ValidationResult<ArgValue> {
        let wrong_type = || ValidationError::WrongType {
            command: command.to_string(),
            arg: self.name.clone(),
            expected: self.ty.json_name(),
        };
        match self.ty {
            ArgType::String => value.as_str().map(|s| ArgValue::Str(s.to_string())),
            ArgType::Integer => value
                .as_i64()
                .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(ArgValue::Int),
            ArgType::Number => value.as_f64().map(ArgValue::Num),
            ArgType::Boolean => value.as_bool().map(ArgValue::Bool),
        }
        .ok_or_else(wrong_type)
    }

    fn check(&self, command: &str, value: ArgValue) -> ValidationResult<ArgValue> {
        let violated = |reason: String| ValidationError::ConstraintViolated {
            command: command.to_string(),
            arg: self.name.clone(),
            reason,
        };
        match (&self.constraint, value) {
            (None, value) => Ok(value),
            (Some(Constraint::IntRange { min, max }), ArgValue::Int(n)) => {
                if (*min..=*max).contains(&n) {
                    Ok(ArgValue::Int(n))
                } else {
                    Err(violated(format!("must be between {min} and {max}, got {n}")))
                }
            }
            (Some(Constraint::NumberRange { min, max }), ArgValue::Num(n)) => {
                if n.is_finite() && *min <= n && n <= *max {
                    Ok(ArgValue::Num(n))
                } else {
                    Err(violated(format!("must be between {min} and {max}, got {n}")))
                }
            }
            (Some(Constraint::OneOf(allowed)), ArgValue::Str(s)) => allowed
                .iter()
                .find(|a| a.eq_ignore_ascii_case(s.trim()))
                .map(|a| ArgValue::Str(a.clone()))
                .ok_or_else(|| violated(format!("'{s}' is not one of: {}", allowed.join(", ")))),
            (Some(Constraint::MaxLength(max_len)), ArgValue::Str(s)) => {
                if s.chars().count() > *max_len {
                    Err(violated(format!("must be at most {max_len} characters")))
                } else {
                    Ok(ArgValue::Str(s))
                }
            }
            (Some(Constraint::PlainText { max_len }), ArgValue::Str(s)) => {
                let s = s.trim().to_string();
                if s.is_empty() {
                    Err(violated("must not be empty".to_string()))
                } else if s.chars().count() > *max_len {
                    Err(violated(format!("must be at most {max_len} characters")))
                } else if s.starts_with('/') {
                    Err(violated("must not start with '/'".to_string()))
                } else if s.chars().any(char::is_control) {
                    Err(violated("must not contain control characters".to_string()))
                } else {
                    Ok(ArgValue::Str(s))
                }
            }
            (Some(_), value) => Ok(value),
        }
    }

    fn schema(&self) -> Value {
        let mut schema = json!({
            "type": self.ty.json_name(),
            "description": self.description,
        });
        match &self.constraint {
            Some(Constraint::IntRange { min, max }) => {
                schema["minimum"] = json!(min);
                schema["maximum"] = json!(max);
            }
            Some(Constraint::NumberRange { min, max }) => {
                schema["minimum"] = json!(min);
                schema["maximum"] = json!(max);
            }
            Some(Constraint::OneOf(allowed)) => schema["enum"] = json!(allowed),
            Some(Constraint::MaxLength(max_len)) | Some(Constraint::PlainText { max_len }) => {
                schema["maxLength"] = json!(max_len)
            }
            None => {}
        }
        schema
    }
}

/// A validated argument value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// String value
    Str(String),
    /// Integer value
    Int(i64),
    /// Floating point value
    Num(f64),
    /// Boolean value
    Bool(bool),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Str(s) => write!(f, "{s}"),
            ArgValue::Int(n) => write!(f, "{n}"),
            ArgValue::Num(n) => write!(f, "{n}"),
            ArgValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Arguments that passed validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(BTreeMap<String, ArgValue>);

impl Arguments {
    /// Look up any argument
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    /// String argument
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ArgValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Integer argument
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(ArgValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Number argument
    pub fn num(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(ArgValue::Num(n)) => Some(*n),
            Some(ArgValue::Int(n)) => Some(*n as f64),
            _ => None,
        }
    }

    /// Boolean argument
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(ArgValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// String argument that the schema marked required
    pub fn require_str(&self, name: &str) -> CommandResult<&str> {
        self.str(name).ok_or_else(|| missing(name))
    }

    /// Integer argument that the schema marked required
    pub fn require_int(&self, name: &str) -> CommandResult<i64> {
        self.int(name).ok_or_else(|| missing(name))
    }

    /// Number argument that the schema marked required
    pub fn require_num(&self, name: &str) -> CommandResult<f64> {
        self.num(name).ok_or_else(|| missing(name))
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, name: String, value: ArgValue) {
        self.0.insert(name, value);
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(" "))
    }
}

fn missing(name: &str) -> CommandError {
    CommandError::Failed {
        reason: format!("argument '{name}' missing after validation"),
    }
}

/// Everything a handler may touch while running
#[derive(Clone)]
pub struct CommandContext {
    /// Player on whose behalf the command runs
    pub player: String,
    /// Trigger that led to this command
    pub trigger_id: Option<TriggerId>,
    /// Outgoing chat
    pub chat: Arc<dyn ChatSink>,
    /// Memory store
    pub memory: Arc<dyn MemoryStore>,
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("player", &self.player)
            .field("trigger_id", &self.trigger_id)
            .finish_non_exhaustive()
    }
}

/// Performs a command's in-game effect
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command; the returned string describes the effect
    async fn execute(&self, ctx: &CommandContext, args: &Arguments) -> CommandResult<String>;
}

/// A registered command
#[derive(Clone)]
pub struct CommandSpec {
    /// Unique name the model uses
    pub name: String,
    /// What the command does
    pub description: String,
    /// Declared arguments
    pub args: Vec<ArgSpec>,
    /// Safety tier
    pub risk: RiskClass,
    /// Implementation
    pub handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("risk", &self.risk)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    /// A safe command with no arguments
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            risk: RiskClass::Safe,
            handler: Arc::new(handler),
        }
    }

    /// Declare an argument
    pub fn with_arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    /// Set the risk class
    pub fn with_risk(mut self, risk: RiskClass) -> Self {
        self.risk = risk;
        self
    }

    /// Whether execution waits for confirmation
    pub fn needs_confirmation(&self) -> bool {
        self.risk == RiskClass::NeedsConfirmation
    }

    /// Check raw decision arguments against the schema
    pub fn validate(&self, arguments: &Map<String, Value>) -> ValidationResult<Arguments> {
        if let Some(unexpected) = arguments
            .keys()
            .find(|k| !self.args.iter().any(|a| &a.name == *k))
        {
            return Err(ValidationError::UnexpectedArgument {
                command: self.name.clone(),
                arg: unexpected.clone(),
            });
        }

        let mut validated = Arguments::default();
        for arg in &self.args {
            match arguments.get(&arg.name) {
                None | Some(Value::Null) if arg.required => {
                    return Err(ValidationError::MissingArgument {
                        command: self.name.clone(),
                        arg: arg.name.clone(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(raw) => {
                    let value = arg.coerce(&self.name, raw)?;
                    validated.insert(arg.name.clone(), arg.check(&self.name, value)?);
                }
            }
        }
        Ok(validated)
    }

    /// Description of this command for the model
    pub fn summary(&self) -> CommandSummary {
        let properties: Map<String, Value> = self
            .args
            .iter()
            .map(|a| (a.name.clone(), a.schema()))
            .collect();
        let required: Vec<&str> = self
            .args
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.as_str())
            .collect();

        CommandSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            risk: self.risk,
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Command definition for LLM consumption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSummary {
    /// Command name
    pub name: String,
    /// Command description
    pub description: String,
    /// Risk class
    pub risk: RiskClass,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// Outcome of one executed or rejected command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Command name (or `noop`)
    pub command: String,
    /// Player the command ran for
    pub player: String,
    /// Originating trigger
    pub trigger_id: Option<TriggerId>,
    /// Whether the command took effect
    pub success: bool,
    /// What happened
    pub effect: String,
    /// Failure code or description
    pub error: Option<String>,
    /// Wall time spent
    pub duration_ms: u64,
    /// When the result was produced
    pub recorded_at: DateTime<Utc>,
}

impl ActionResult {
    /// A successful result
    pub fn success(
        command: impl Into<String>,
        player: impl Into<String>,
        effect: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            player: player.into(),
            trigger_id: None,
            success: true,
            effect: effect.into(),
            error: None,
            duration_ms: 0,
            recorded_at: Utc::now(),
        }
    }

    /// A failed result
    pub fn failure(
        command: impl Into<String>,
        player: impl Into<String>,
        error: impl Into<String>,
        effect: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success(command, player, effect)
        }
    }

    /// Attach the originating trigger
    pub fn with_trigger(mut self, trigger_id: Option<TriggerId>) -> Self {
        self.trigger_id = trigger_id;
        self
    }

    /// Record elapsed time
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    /// Whether this failed with the given code
    pub fn failed_with(&self, code: &str) -> bool {
        !self.success && self.error.as_deref() == Some(code)
    }
}

/// Closed set of commands available in a session
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandSpec>>,
    timeout: Duration,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("command_count", &self.commands.len())
            .field("commands", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Default per-command execution timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Build a registry from a catalog, keeping only `enabled` commands and
    /// forcing confirmation on `force_confirmation`.
    ///
    /// Unknown names in either list are a configuration error.
    pub fn from_catalog(
        catalog: Vec<CommandSpec>,
        enabled: &[String],
        force_confirmation: &[String],
    ) -> Result<Self, Error> {
        let mut available: HashMap<String, CommandSpec> =
            catalog.into_iter().map(|c| (c.name.clone(), c)).collect();

        if let Some(unknown) = enabled
            .iter()
            .chain(force_confirmation)
            .find(|name| !available.contains_key(name.as_str()))
        {
            return Err(Error::Config(format!("unknown command '{unknown}'")));
        }

        let mut registry = Self::new();
        for name in enabled {
            if let Some(mut spec) = available.remove(name) {
                if force_confirmation.contains(name) {
                    spec.risk = RiskClass::NeedsConfirmation;
                }
                registry.register(spec);
            }
        }
        Ok(registry)
    }

    /// Set the per-command execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a command, replacing any with the same name
    pub fn register(&mut self, spec: CommandSpec) -> &mut Self {
        self.commands.insert(spec.name.clone(), Arc::new(spec));
        self
    }

    /// Look up a command by name
    pub fn resolve(&self, name: &str) -> ValidationResult<Arc<CommandSpec>> {
        self.commands
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownCommand {
                name: name.to_string(),
            })
    }

    /// Validate raw arguments for a command.
    ///
    /// The command must be the one registered under its name, so a spec
    /// disabled by configuration cannot be slipped past the registry.
    pub fn validate(
        &self,
        spec: &CommandSpec,
        arguments: &Map<String, Value>,
    ) -> ValidationResult<Arguments> {
        let registered = self.resolve(&spec.name)?;
        if !std::ptr::eq(registered.as_ref(), spec) {
            return Err(ValidationError::UnknownCommand {
                name: spec.name.clone(),
            });
        }
        spec.validate(arguments)
    }

    /// Run a command's handler.
    ///
    /// The handler runs in its own task so a panic, a hang or a session
    /// shutdown all end up as a failed [`ActionResult`].
    pub async fn execute(
        &self,
        spec: &CommandSpec,
        args: Arguments,
        ctx: CommandContext,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let started = Instant::now();
        let player = ctx.player.clone();
        let trigger_id = ctx.trigger_id;
        let handler = spec.handler.clone();

        tracing::debug!(command = %spec.name, %player, args = %args, "executing command");

        let mut task = tokio::spawn(async move { handler.execute(&ctx, &args).await });
        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(effect)) => Ok(effect),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) if e.is_panic() => Err("handler panicked".to_string()),
                Err(_) => Err("handler aborted".to_string()),
            },
            _ = tokio::time::sleep(self.timeout) => {
                task.abort();
                Err(format!("timed out after {:?}", self.timeout))
            }
            _ = cancel.cancelled() => {
                task.abort();
                Err(codes::CANCELLED.to_string())
            }
        };

        let result = match outcome {
            Ok(effect) => ActionResult::success(&spec.name, player, effect),
            Err(error) => {
                tracing::warn!(command = %spec.name, %player, %error, "command failed");
                ActionResult::failure(&spec.name, player, error, "command did not complete")
            }
        };
        result
            .with_trigger(trigger_id)
            .with_duration(started.elapsed())
    }

    /// Whether a command exists
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// All command names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Summaries of all commands, sorted by name
    pub fn summaries(&self) -> Vec<CommandSummary> {
        let mut summaries: Vec<CommandSummary> =
            self.commands.values().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::testing::RecordingChat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl CommandHandler for Counting {
        async fn execute(&self, _ctx: &CommandContext, args: &Arguments) -> CommandResult<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran with {args}"))
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandHandler for Failing {
        async fn execute(&self, _ctx: &CommandContext, _args: &Arguments) -> CommandResult<String> {
            Err(CommandError::InvalidTarget {
                reason: "player is offline".to_string(),
            })
        }
    }

    struct Panicking;

    #[async_trait]
    impl CommandHandler for Panicking {
        async fn execute(&self, _ctx: &CommandContext, _args: &Arguments) -> CommandResult<String> {
            panic!("boom")
        }
    }

    struct Hanging;

    #[async_trait]
    impl CommandHandler for Hanging {
        async fn execute(&self, _ctx: &CommandContext, _args: &Arguments) -> CommandResult<String> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    fn give_spec(counter: Arc<AtomicUsize>) -> CommandSpec {
        CommandSpec::new("give_item", "Give an item", Counting(counter))
            .with_arg(
                ArgSpec::required("item", ArgType::String, "Item id")
                    .with_constraint(Constraint::OneOf(vec!["diamond_sword".to_string()])),
            )
            .with_arg(
                ArgSpec::optional("qty", ArgType::Integer, "How many")
                    .with_constraint(Constraint::IntRange { min: 1, max: 64 }),
            )
    }

    fn ctx() -> CommandContext {
        CommandContext {
            player: "Steve".to_string(),
            trigger_id: None,
            chat: Arc::new(RecordingChat::new()),
            memory: Arc::new(InMemoryStore::new()),
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = CommandRegistry::new();
        assert_eq!(
            registry.resolve("teleport_admin").unwrap_err(),
            ValidationError::UnknownCommand {
                name: "teleport_admin".to_string()
            }
        );
    }

    #[test]
    fn test_validate_accepts_and_canonicalises() {
        let spec = give_spec(Arc::default());
        let validated = spec
            .validate(&args(json!({"item": "Diamond_Sword", "qty": 2.0})))
            .unwrap();
        assert_eq!(validated.str("item"), Some("diamond_sword"));
        assert_eq!(validated.int("qty"), Some(2));
    }

    #[test]
    fn test_validate_rejections() {
        let spec = give_spec(Arc::default());
        assert!(matches!(
            spec.validate(&args(json!({"qty": 1}))),
            Err(ValidationError::MissingArgument { .. })
        ));
        assert!(matches!(
            spec.validate(&args(json!({"item": 5}))),
            Err(ValidationError::WrongType { expected: "string", .. })
        ));
        assert!(matches!(
            spec.validate(&args(json!({"item": "bedrock"}))),
            Err(ValidationError::ConstraintViolated { .. })
        ));
        assert!(matches!(
            spec.validate(&args(json!({"item": "diamond_sword", "qty": 65}))),
            Err(ValidationError::ConstraintViolated { .. })
        ));
        assert!(matches!(
            spec.validate(&args(json!({"item": "diamond_sword", "target": "@a"}))),
            Err(ValidationError::UnexpectedArgument { .. })
        ));
    }

    #[test]
    fn test_plain_text_blocks_server_commands() {
        let spec = CommandSpec::new("say", "Say something", Failing).with_arg(
            ArgSpec::required("message", ArgType::String, "Text")
                .with_constraint(Constraint::PlainText { max_len: 10 }),
        );
        assert!(spec.validate(&args(json!({"message": "/op Steve"}))).is_err());
        assert!(spec.validate(&args(json!({"message": "a\nb"}))).is_err());
        assert!(spec.validate(&args(json!({"message": "much too long text"}))).is_err());
        assert!(spec.validate(&args(json!({"message": "  hi  "}))).is_ok());
    }

    #[test]
    fn test_summary_schema() {
        let summary = give_spec(Arc::default()).summary();
        assert_eq!(summary.parameters["required"], json!(["item"]));
        assert_eq!(summary.parameters["properties"]["qty"]["maximum"], json!(64));
        assert_eq!(summary.risk, RiskClass::Safe);
    }

    #[test]
    fn test_from_catalog_filters_and_overrides() {
        let catalog = vec![
            give_spec(Arc::default()),
            CommandSpec::new("explode", "Not enabled", Failing),
        ];
        let registry = CommandRegistry::from_catalog(
            catalog,
            &["give_item".to_string()],
            &["give_item".to_string()],
        )
        .unwrap();
        assert_eq!(registry.names(), vec!["give_item"]);
        assert!(registry.resolve("give_item").unwrap().needs_confirmation());
        assert!(!registry.contains("explode"));
    }

    #[test]
    fn test_from_catalog_rejects_unknown_names() {
        let err = CommandRegistry::from_catalog(Vec::new(), &["fly".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_registry_validate_requires_registered_spec() {
        let registry =
            CommandRegistry::from_catalog(vec![give_spec(Arc::default())], &["give_item".to_string()], &[])
                .unwrap();
        let registered = registry.resolve("give_item").unwrap();
        let validated = registry
            .validate(&registered, &args(json!({"item": "diamond_sword"})))
            .unwrap();
        assert_eq!(validated.str("item"), Some("diamond_sword"));

        // Same name, but not the instance the registry holds
        let stray = give_spec(Arc::default());
        assert!(matches!(
            registry.validate(&stray, &args(json!({"item": "diamond_sword"}))),
            Err(ValidationError::UnknownCommand { .. })
        ));
        assert!(registry.validate(&registered, &args(json!({"item": "bedrock"}))).is_err());
    }

    #[tokio::test]
    async fn test_execute_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let spec = give_spec(counter.clone());
        let validated = spec.validate(&args(json!({"item": "diamond_sword"}))).unwrap();
        let result = CommandRegistry::new()
            .execute(&spec, validated, ctx(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.player, "Steve");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_converts_failures() {
        let registry = CommandRegistry::new().with_timeout(Duration::from_millis(50));
        let cancel = CancellationToken::new();

        let failing = CommandSpec::new("f", "", Failing);
        let result = registry.execute(&failing, Arguments::default(), ctx(), &cancel).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Invalid target: player is offline"));

        let panicking = CommandSpec::new("p", "", Panicking);
        let result = registry.execute(&panicking, Arguments::default(), ctx(), &cancel).await;
        assert_eq!(result.error.as_deref(), Some("handler panicked"));

        let hanging = CommandSpec::new("h", "", Hanging);
        let result = registry.execute(&hanging, Arguments::default(), ctx(), &cancel).await;
        assert!(result.error.unwrap().starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_execute_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let hanging = CommandSpec::new("h", "", Hanging);
        let result = CommandRegistry::new()
            .execute(&hanging, Arguments::default(), ctx(), &cancel)
            .await;
        assert!(result.failed_with(codes::CANCELLED));
    }
}
