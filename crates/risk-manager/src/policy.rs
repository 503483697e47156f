use trading_core::{Context, Decision, LeveragePolicy};

/// Result of vetting one cycle's decision list.
#[derive(Debug, Clone, Default)]
pub struct PolicyOutcome {
    /// Surviving decisions in execution order: injected auto-take-profit
    /// closes first, then the AI's own decisions.
    pub decisions: Vec<Decision>,
    /// Human-readable rejection entries for the cycle's execution log.
    pub rejections: Vec<String>,
}

/// Pure per-decision risk gate applied between the decision source and the
/// position store.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    pub leverage: LeveragePolicy,
    /// Inject a close once a position's return on margin reaches this
    /// percentage. 0 disables the injection.
    pub auto_take_profit_pct: f64,
}

const DEFAULT_LEVERAGE: f64 = 5.0;

impl RiskPolicy {
    pub fn new(leverage: LeveragePolicy, auto_take_profit_pct: f64) -> Self {
        Self {
            leverage,
            auto_take_profit_pct,
        }
    }

    /// Vet a decision list against the current context.
    ///
    /// Rejections are recorded, never fatal; the remaining decisions keep
    /// their relative order.
    pub fn apply(&self, ctx: &Context, decisions: Vec<Decision>) -> PolicyOutcome {
        let mut outcome = PolicyOutcome::default();

        // Auto-take-profit closes go in front of the AI's decisions.
        if self.auto_take_profit_pct > 0.0 {
            for position in ctx.positions.iter() {
                let roi = position.return_on_margin_pct();
                if roi >= self.auto_take_profit_pct {
                    tracing::info!(
                        "auto take-profit: {} {} at {:.2}% return on margin",
                        position.symbol,
                        position.side.as_str(),
                        roi
                    );
                    outcome.decisions.push(Decision {
                        symbol: position.symbol.clone(),
                        action: position.side.close_action(),
                        quantity: position.quantity,
                        leverage: position.leverage,
                        take_profit: 0.0,
                        stop_loss: 0.0,
                        confidence: 0.0,
                        reasoning: format!(
                            "auto take-profit: {:.2}% return on margin >= {:.2}%",
                            roi, self.auto_take_profit_pct
                        ),
                    });
                }
            }
        }

        for decision in decisions {
            match self.vet(ctx, decision) {
                Ok(decision) => outcome.decisions.push(decision),
                Err(reason) => {
                    tracing::warn!("risk policy rejection: {}", reason);
                    outcome.rejections.push(reason);
                }
            }
        }

        outcome
    }

    fn vet(&self, ctx: &Context, mut decision: Decision) -> Result<Decision, String> {
        if !decision.action.is_open() && !decision.action.is_close() {
            return Ok(decision);
        }

        if !ctx.market_data.contains_key(&decision.symbol) {
            return Err(format!(
                "rejected {} {}: no market data for symbol",
                decision.action, decision.symbol
            ));
        }

        if decision.action.is_open() {
            let cap = self.leverage.cap_for(&decision.symbol);
            let requested = if decision.leverage > 0.0 {
                decision.leverage
            } else {
                DEFAULT_LEVERAGE
            };
            decision.leverage = requested.min(cap);

            let side = decision.action.side().expect("open action has a side");
            if ctx
                .positions
                .iter()
                .any(|p| p.symbol == decision.symbol && p.side == side)
            {
                return Err(format!(
                    "rejected {} {}: position already open on this side",
                    decision.action, decision.symbol
                ));
            }

            let price = ctx.market_data[&decision.symbol].price;
            let required_margin = decision.quantity * price / decision.leverage;
            if required_margin > ctx.account.available_balance {
                return Err(format!(
                    "rejected {} {}: margin {:.2} exceeds available balance {:.2}",
                    decision.action,
                    decision.symbol,
                    required_margin,
                    ctx.account.available_balance
                ));
            }
        }

        Ok(decision)
    }
}
