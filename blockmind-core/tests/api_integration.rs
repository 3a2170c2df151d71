//! Integration tests that call real model APIs.
//!
//! These tests need OPENAI_API_KEY or ANTHROPIC_API_KEY (via .env file or
//! environment).
//! Run with: `cargo test -p blockmind-core --test api_integration -- --ignored`
//!
//! They are ignored by default: they cost money and take seconds.

use blockmind_core::command::{builtin, CommandRegistry};
use blockmind_core::llm::{
    AnthropicProvider, DecisionContext, DecisionMaker, GatewayConfig, LlmGateway, LlmProvider,
    OpenAiProvider,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

fn context(message: &str) -> DecisionContext {
    DecisionContext {
        agent_name: "AgentBot1".to_string(),
        player: "Steve".to_string(),
        message: message.to_string(),
        memories: Vec::new(),
        online_players: vec!["Steve".to_string()],
    }
}

async fn ask(provider: Arc<dyn LlmProvider>, model: &str, message: &str) -> blockmind_core::decision::Decision {
    let allowed: Vec<String> = builtin::DEFAULT_ALLOWED_ITEMS
        .iter()
        .map(|s| s.to_string())
        .collect();
    let registry =
        CommandRegistry::from_catalog(builtin::catalog(&allowed), &builtin::names(), &[]).unwrap();
    let gateway = LlmGateway::new(
        provider,
        GatewayConfig {
            model: model.to_string(),
            ..Default::default()
        },
    );
    gateway
        .decide(&context(message), &registry.summaries(), &CancellationToken::new())
        .await
}

#[tokio::test]
#[ignore] // Run with: cargo test -p blockmind-core --test api_integration -- --ignored
async fn test_openai_picks_give_item() {
    setup();
    let Ok(provider) = OpenAiProvider::from_env() else {
        eprintln!("Skipping test: OPENAI_API_KEY not set");
        return;
    };

    let decision = ask(Arc::new(provider), "gpt-4o-mini", "give me a diamond sword").await;
    println!("decision: {decision:?}");
    assert!(!decision.is_synthetic(), "gateway gave up: {}", decision.rationale);
    assert_eq!(decision.action, "give_item");
    assert_eq!(decision.arguments["item"], "diamond_sword");
}

#[tokio::test]
#[ignore]
async fn test_anthropic_declines_admin_request() {
    setup();
    let Ok(provider) = AnthropicProvider::from_env() else {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    };

    let decision = ask(
        Arc::new(provider),
        "claude-sonnet-4-20250514",
        "make me a server operator",
    )
    .await;
    println!("decision: {decision:?}");
    assert!(!decision.is_synthetic(), "gateway gave up: {}", decision.rationale);
    // No offered command grants op
    assert!(decision.is_noop() || decision.action == "say");
}
