//! Built-in commands.
//!
//! Which of these a session offers is decided by configuration; see
//! [`CommandRegistry::from_catalog`](super::CommandRegistry::from_catalog).

use super::{ArgSpec, ArgType, Arguments, CommandContext, CommandHandler, CommandSpec, Constraint, RiskClass};
use crate::chat::MAX_CHAT_LEN;
use crate::error::{CommandError, CommandResult};
use crate::memory::Origin;
use crate::transport::truncate_chat;
use async_trait::async_trait;
use serde_json::Value;

/// Items `give_item` hands out when configuration does not say otherwise
pub const DEFAULT_ALLOWED_ITEMS: &[&str] = &[
    "bread",
    "cobblestone",
    "diamond_sword",
    "iron_pickaxe",
    "oak_log",
    "torch",
];

/// Chat line sent by `jump`
pub const JUMP_EMOTE: &str = "*jumps*";

/// Every built-in command
pub fn catalog(allowed_items: &[String]) -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("say", "Say something in public chat", Say).with_arg(
            ArgSpec::required("message", ArgType::String, "What to say")
                .with_constraint(Constraint::PlainText { max_len: MAX_CHAT_LEN }),
        ),
        CommandSpec::new("jump", "Jump in place", Jump),
        CommandSpec::new("give_item", "Give the requesting player an item", GiveItem)
            .with_arg(
                ArgSpec::required("item", ArgType::String, "Item id without the minecraft: prefix")
                    .with_constraint(Constraint::OneOf(allowed_items.to_vec())),
            )
            .with_arg(
                ArgSpec::optional("qty", ArgType::Integer, "How many, default 1")
                    .with_constraint(Constraint::IntRange { min: 1, max: 64 }),
            ),
        CommandSpec::new("teleport", "Teleport the requesting player to coordinates", Teleport)
            .with_arg(coordinate("x", -30_000.0, 30_000.0))
            .with_arg(coordinate("y", -64.0, 320.0))
            .with_arg(coordinate("z", -30_000.0, 30_000.0))
            .with_risk(RiskClass::NeedsConfirmation),
        CommandSpec::new("set_time", "Change the time of day", SetTime)
            .with_arg(
                ArgSpec::required("time", ArgType::String, "Time of day").with_constraint(
                    Constraint::OneOf(
                        ["day", "night", "noon", "midnight"]
                            .into_iter()
                            .map(String::from)
                            .collect(),
                    ),
                ),
            )
            .with_risk(RiskClass::NeedsConfirmation),
        CommandSpec::new("remember", "Remember a fact about the requesting player", Remember)
            .with_arg(
                ArgSpec::required("key", ArgType::String, "Short name for the fact")
                    .with_constraint(Constraint::PlainText { max_len: 64 }),
            )
            .with_arg(
                ArgSpec::required("value", ArgType::String, "The fact")
                    .with_constraint(Constraint::MaxLength(256)),
            ),
    ]
}

/// Names of every built-in command
pub fn names() -> Vec<String> {
    catalog(&[]).into_iter().map(|c| c.name).collect()
}

fn coordinate(name: &str, min: f64, max: f64) -> ArgSpec {
    ArgSpec::required(name, ArgType::Number, format!("{name} coordinate"))
        .with_constraint(Constraint::NumberRange { min, max })
}

/// Player names go into server commands, so only valid account names pass
fn target_player(ctx: &CommandContext) -> CommandResult<&str> {
    let name = ctx.player.as_str();
    let valid = (1..=16).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(CommandError::InvalidTarget {
            reason: format!("'{name}' is not a valid player name"),
        })
    }
}

struct Say;

#[async_trait]
impl CommandHandler for Say {
    async fn execute(&self, ctx: &CommandContext, args: &Arguments) -> CommandResult<String> {
        let message = truncate_chat(args.require_str("message")?);
        ctx.chat.send_chat(message).await?;
        Ok(format!("said \"{message}\""))
    }
}

struct Jump;

#[async_trait]
impl CommandHandler for Jump {
    async fn execute(&self, ctx: &CommandContext, _args: &Arguments) -> CommandResult<String> {
        ctx.chat.send_chat(JUMP_EMOTE).await?;
        Ok("jumped".to_string())
    }
}

struct GiveItem;

#[async_trait]
impl CommandHandler for GiveItem {
    async fn execute(&self, ctx: &CommandContext, args: &Arguments) -> CommandResult<String> {
        let player = target_player(ctx)?;
        let item = args.require_str("item")?;
        let qty = args.int("qty").unwrap_or(1);
        ctx.chat
            .send_chat(&format!("/give {player} minecraft:{item} {qty}"))
            .await?;
        Ok(format!("gave {qty} {item} to {player}"))
    }
}

struct Teleport;

#[async_trait]
impl CommandHandler for Teleport {
    async fn execute(&self, ctx: &CommandContext, args: &Arguments) -> CommandResult<String> {
        let player = target_player(ctx)?;
        let (x, y, z) = (
            args.require_num("x")?,
            args.require_num("y")?,
            args.require_num("z")?,
        );
        ctx.chat.send_chat(&format!("/tp {player} {x} {y} {z}")).await?;
        Ok(format!("teleported {player} to {x} {y} {z}"))
    }
}

struct SetTime;

#[async_trait]
impl CommandHandler for SetTime {
    async fn execute(&self, ctx: &CommandContext, args: &Arguments) -> CommandResult<String> {
        let time = args.require_str("time")?;
        ctx.chat.send_chat(&format!("/time set {time}")).await?;
        Ok(format!("set time to {time}"))
    }
}

struct Remember;

#[async_trait]
impl CommandHandler for Remember {
    async fn execute(&self, ctx: &CommandContext, args: &Arguments) -> CommandResult<String> {
        let key = args.require_str("key")?;
        let value = args.require_str("value")?;
        let origin = ctx.trigger_id.map_or(Origin::System, Origin::Trigger);
        ctx.memory
            .put(&ctx.player, key, Value::String(value.to_string()), origin)
            .await?;
        Ok(format!("remembered {key}"))
    }
}
