//! The model's proposed action and the wire format it is parsed from.
//!
//! The model is asked for a single JSON object:
//!
//! ```json
//! {"action": "give_item", "arguments": {"item": "diamond_sword", "qty": 1}, "rationale": "asked politely"}
//! ```
//!
//! Replies are untrusted. Parsing only checks the shape and that the action
//! was offered; argument schemas are enforced later by the command registry.

use crate::error::DecisionError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved action meaning "do nothing"
pub const NOOP_ACTION: &str = "noop";

/// Rationales attached to decisions the gateway or loop makes on its own
pub mod rationale {
    /// Every attempt timed out
    pub const TIMEOUT: &str = "timeout";
    /// The model never produced a valid decision
    pub const UNPARSEABLE: &str = "unparseable_response";
    /// The provider returned an error
    pub const PROVIDER_ERROR: &str = "provider_error";
    /// The session shut down mid-call
    pub const CANCELLED: &str = "cancelled";
    /// Built locally from a fixed chat command, no model involved
    pub const DIRECT_COMMAND: &str = "direct_command";
}

/// Where a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionOrigin {
    /// Parsed from a model reply
    #[default]
    Model,
    /// Built from a direct chat command
    Direct,
    /// Substituted by the gateway after a failure
    Synthetic,
}

/// A proposed action: command name, arguments and the model's reasoning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Command name
    pub action: String,
    /// Argument name to JSON value
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Free-text reasoning
    #[serde(default)]
    pub rationale: String,
    /// Provenance, never serialized
    #[serde(skip)]
    pub origin: DecisionOrigin,
}

impl Decision {
    /// A model decision
    pub fn new(
        action: impl Into<String>,
        arguments: Map<String, Value>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            arguments,
            rationale: rationale.into(),
            origin: DecisionOrigin::Model,
        }
    }

    /// A decision built from a direct chat command
    pub fn direct(action: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            origin: DecisionOrigin::Direct,
            ..Self::new(action, arguments, rationale::DIRECT_COMMAND)
        }
    }

    /// A synthetic no-op standing in for a failed model call
    pub fn noop(reason: impl Into<String>) -> Self {
        Self {
            origin: DecisionOrigin::Synthetic,
            ..Self::new(NOOP_ACTION, Map::new(), reason)
        }
    }

    /// Whether this decision does nothing
    pub fn is_noop(&self) -> bool {
        self.action == NOOP_ACTION
    }

    /// Whether the gateway substituted this decision after a failure
    pub fn is_synthetic(&self) -> bool {
        self.origin == DecisionOrigin::Synthetic
    }

    /// Parse a raw model reply, accepting only offered actions and `noop`
    pub fn parse<S: AsRef<str>>(raw: &str, offered: &[S]) -> Result<Self, DecisionError> {
        let json = extract_json_object(raw).ok_or_else(|| DecisionError::Unparseable {
            reason: "no JSON object in reply".to_string(),
        })?;

        let wire: DecisionWire =
            serde_json::from_str(json).map_err(|e| DecisionError::Unparseable {
                reason: e.to_string(),
            })?;

        let action = wire.action.trim().to_string();
        if action.is_empty() {
            return Err(DecisionError::Unparseable {
                reason: "empty action".to_string(),
            });
        }
        if action != NOOP_ACTION && !offered.iter().any(|o| o.as_ref() == action) {
            return Err(DecisionError::UnknownAction { name: action });
        }

        let arguments = match wire.arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(DecisionError::MalformedArguments {
                    reason: format!("expected an object, got {other}"),
                })
            }
        };

        Ok(Self::new(action, arguments, wire.rationale.unwrap_or_default()))
    }
}

#[derive(Debug, Deserialize)]
struct DecisionWire {
    action: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    rationale: Option<String>,
}

/// Find the first balanced `{...}` object in free text.
///
/// Models wrap JSON in code fences or prose; braces inside string literals
/// are skipped.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OFFERED: &[&str] = &["give_item", "say"];

    #[test]
    fn test_parse_plain_json() {
        let d = Decision::parse(
            r#"{"action":"give_item","arguments":{"item":"diamond_sword","qty":1},"rationale":"asked"}"#,
            OFFERED,
        )
        .unwrap();
        assert_eq!(d.action, "give_item");
        assert_eq!(d.arguments["qty"], json!(1));
        assert_eq!(d.origin, DecisionOrigin::Model);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let raw = "Sure!\n```json\n{\"action\": \"say\", \"arguments\": {\"message\": \"hi {there}\"}}\n```";
        let d = Decision::parse(raw, OFFERED).unwrap();
        assert_eq!(d.arguments["message"], json!("hi {there}"));
        assert_eq!(d.rationale, "");
    }

    #[test]
    fn test_missing_arguments_defaults_to_empty() {
        let d = Decision::parse(r#"{"action":"noop"}"#, OFFERED).unwrap();
        assert!(d.is_noop());
        assert!(!d.is_synthetic());
        assert!(d.arguments.is_empty());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = Decision::parse(r#"{"action":"teleport_admin"}"#, OFFERED).unwrap_err();
        assert_eq!(
            err,
            DecisionError::UnknownAction {
                name: "teleport_admin".to_string()
            }
        );
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = Decision::parse(r#"{"action":"say","arguments":"hi"}"#, OFFERED).unwrap_err();
        assert!(matches!(err, DecisionError::MalformedArguments { .. }));
    }

    #[test]
    fn test_prose_only_rejected() {
        let err = Decision::parse("I will give you a sword!", OFFERED).unwrap_err();
        assert!(matches!(err, DecisionError::Unparseable { .. }));
    }

    #[test]
    fn test_extract_handles_escaped_quotes() {
        let raw = r#"x {"a": "quote \" and } brace"} y"#;
        assert_eq!(
            extract_json_object(raw),
            Some(r#"{"a": "quote \" and } brace"}"#)
        );
        assert_eq!(extract_json_object("{ unterminated"), None);
    }

    #[test]
    fn test_synthetic_noop() {
        let d = Decision::noop(rationale::TIMEOUT);
        assert!(d.is_noop());
        assert!(d.is_synthetic());
        assert_eq!(d.rationale, "timeout");
    }
}
