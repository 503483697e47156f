use ai_client::CompletionClient;
use trading_core::{Context, FullDecision};

use crate::error::EngineResult;
use crate::parser::parse_decisions;
use crate::prompt::{build_system_prompt, build_user_prompt};

/// One full decision pass: prompt the model once, parse the structured
/// decision list out of its reply.
pub async fn run_decision(
    ctx: &Context,
    client: &dyn CompletionClient,
) -> EngineResult<FullDecision> {
    let system_prompt = build_system_prompt(ctx);
    let user_prompt = build_user_prompt(ctx);

    let raw_response = client.complete(&system_prompt, &user_prompt).await?;
    let (decisions, cot_trace) = parse_decisions(&raw_response)?;

    tracing::debug!(
        "model {} returned {} decision(s)",
        client.model_label(),
        decisions.len()
    );

    Ok(FullDecision {
        decisions,
        cot_trace,
        user_prompt,
        raw_response,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use ai_client::{AiError, AiResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use trading_core::{AccountSnapshot, LeveragePolicy, TradeAction};

    use super::*;
    use crate::error::EngineError;

    struct ScriptedClient {
        reply: String,
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _system: &str, _user: &str) -> AiResult<String> {
            if self.reply.is_empty() {
                Err(AiError::EmptyCompletion)
            } else {
                Ok(self.reply.clone())
            }
        }

        fn model_label(&self) -> &str {
            "scripted"
        }
    }

    fn context() -> Context {
        Context {
            now: Utc::now(),
            runtime_minutes: 0,
            cycle_number: 1,
            account: AccountSnapshot::default(),
            positions: Arc::new(vec![]),
            candidates: Arc::new(vec![]),
            market_data: HashMap::new(),
            open_interest: HashMap::new(),
            leverage: LeveragePolicy::default(),
            performance: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn parses_reply_into_full_decision() {
        let client = ScriptedClient {
            reply: "Weak momentum, staying flat.\n[{\"symbol\":\"ALL\",\"action\":\"wait\",\"reasoning\":\"no setup\"}]"
                .to_string(),
        };
        let full = run_decision(&context(), &client).await.unwrap();
        assert_eq!(full.decisions.len(), 1);
        assert_eq!(full.decisions[0].action, TradeAction::Wait);
        assert!(full.cot_trace.contains("Weak momentum"));
        assert!(full.user_prompt.contains("## Account"));
        assert!(full.raw_response.contains("no setup"));
    }

    #[tokio::test]
    async fn completion_errors_propagate() {
        let client = ScriptedClient {
            reply: String::new(),
        };
        let err = run_decision(&context(), &client).await.unwrap_err();
        assert!(matches!(err, EngineError::Completion(_)));
    }
}
