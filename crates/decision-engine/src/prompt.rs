use std::fmt::Write;

use trading_core::Context;

/// System prompt: the trading contract the model must honor, including the
/// exact JSON shape expected back.
pub fn build_system_prompt(ctx: &Context) -> String {
    format!(
        "You are a disciplined cryptocurrency perpetual futures trader. \
Each cycle you receive the account state, open positions, candidate coins, \
and market data, and you reply with your analysis followed by a JSON array \
of decisions.

Rules:
- Allowed actions: open_long, open_short, close_long, close_short, hold, wait.
- Maximum leverage: {:.0}x on BTCUSDT/ETHUSDT, {:.0}x on all other symbols.
- Never open a position whose margin (quantity * price / leverage) exceeds the available balance.
- Never open a duplicate position on the same symbol and side.
- Only trade symbols present in the market data section.
- If nothing is worth doing, reply with a single decision: {{\"symbol\": \"ALL\", \"action\": \"wait\", \"reasoning\": \"...\"}}.

Your reply MUST end with a JSON array of decision objects:
[{{\"symbol\": \"BTCUSDT\", \"action\": \"open_long\", \"quantity\": 0.1, \"leverage\": 5, \"take_profit\": 21000, \"stop_loss\": 19000, \"confidence\": 75, \"reasoning\": \"...\"}}]

quantity is in base units, confidence is 0-100, take_profit and stop_loss are prices (0 when unused).",
        ctx.leverage.btc_eth_leverage, ctx.leverage.altcoin_leverage
    )
}

/// User prompt: the current snapshot the decision is made against.
pub fn build_user_prompt(ctx: &Context) -> String {
    let mut p = String::new();

    let _ = writeln!(p, "Time: {}", ctx.now.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        p,
        "Cycle: {} | Running for {} minutes",
        ctx.cycle_number, ctx.runtime_minutes
    );
    let _ = writeln!(p);
    let _ = writeln!(p, "## Account");
    let _ = writeln!(
        p,
        "Total balance: {:.2} USDT | Available: {:.2} USDT | Unrealized P&L: {:.2} USDT | Margin used: {:.1}%",
        ctx.account.total_balance,
        ctx.account.available_balance,
        ctx.account.unrealized_profit,
        ctx.account.margin_used_pct
    );

    let _ = writeln!(p);
    if ctx.positions.is_empty() {
        let _ = writeln!(p, "## Positions\nNone");
    } else {
        let _ = writeln!(p, "## Positions");
        for pos in ctx.positions.iter() {
            let _ = writeln!(
                p,
                "{} {} qty={} entry={:.4} mark={:.4} uPnL={:.2} lev={:.0}x liq={:.4}",
                pos.symbol,
                pos.side.as_str(),
                pos.quantity,
                pos.entry_price,
                pos.mark_price,
                pos.unrealized_profit,
                pos.leverage,
                pos.liquidation_price
            );
        }
    }

    let _ = writeln!(p);
    let _ = writeln!(p, "## Candidate coins");
    for coin in ctx.candidates.iter() {
        let _ = writeln!(
            p,
            "{} price={:.4} change24h={:+.2}% volume24h={:.0}",
            coin.symbol, coin.price, coin.change_24h_pct, coin.volume_24h
        );
    }

    if !ctx.market_data.is_empty() {
        let _ = writeln!(p);
        let _ = writeln!(p, "## Market data");
        let mut symbols: Vec<&String> = ctx.market_data.keys().collect();
        symbols.sort();
        for symbol in symbols {
            let m = &ctx.market_data[symbol];
            let _ = writeln!(
                p,
                "{} price={:.4} high24h={:.4} low24h={:.4} change24h={:+.2}% volume24h={:.0} funding={:.6}",
                m.symbol, m.price, m.high_24h, m.low_24h, m.change_24h_pct, m.volume_24h, m.funding_rate
            );
        }
    }

    if !ctx.open_interest.is_empty() {
        let _ = writeln!(p);
        let _ = writeln!(p, "## Open interest leaders");
        let mut symbols: Vec<&String> = ctx.open_interest.keys().collect();
        symbols.sort();
        for symbol in symbols {
            let oi = &ctx.open_interest[symbol];
            let _ = writeln!(
                p,
                "{} oi={:.0} oiChange24h={:+.2}% longShortRatio={:.2}",
                oi.symbol, oi.open_interest, oi.oi_change_24h_pct, oi.long_short_ratio
            );
        }
    }

    if !ctx.performance.is_null() {
        let _ = writeln!(p);
        let _ = writeln!(p, "## Performance so far");
        let _ = writeln!(p, "{}", ctx.performance);
    }

    p
}
