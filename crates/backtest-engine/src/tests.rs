use chrono::{DateTime, Duration, TimeZone, Utc};
use trading_core::{ActionRecord, DecisionRecord, Side, TradeAction};

use crate::models::Trade;
use crate::reconstructor::reconstruct_trades;
use crate::report::{build_report, latest_report, summarize_table, write_report};
use crate::simulator::simulate;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn action(
    kind: TradeAction,
    symbol: &str,
    quantity: f64,
    leverage: Option<f64>,
    price: f64,
    at: DateTime<Utc>,
    success: bool,
) -> ActionRecord {
    ActionRecord {
        action: kind,
        symbol: symbol.to_string(),
        quantity,
        leverage,
        price,
        order_id: Some("ord".to_string()),
        timestamp: at,
        success,
        error: if success { None } else { Some("rejected".to_string()) },
    }
}

fn record(cycle: i64, at: DateTime<Utc>, actions: Vec<ActionRecord>) -> DecisionRecord {
    record_with_json(cycle, at, actions, "[]")
}

fn record_with_json(
    cycle: i64,
    at: DateTime<Utc>,
    actions: Vec<ActionRecord>,
    decision_json: &str,
) -> DecisionRecord {
    DecisionRecord {
        trader_id: "t1".to_string(),
        cycle_number: cycle,
        timestamp: at,
        input_prompt: String::new(),
        cot_trace: String::new(),
        decision_json: decision_json.to_string(),
        raw_response: None,
        success: true,
        error_message: None,
        account_total_balance: 10000.0,
        account_available_balance: 10000.0,
        account_unrealized_profit: 0.0,
        account_margin_used_pct: 0.0,
        positions: Vec::new(),
        actions,
        candidate_coins: Vec::new(),
        execution_log: Vec::new(),
    }
}

/// One winning BTC long: open 0.1 @ 20000 5x, close @ 21000 an hour later.
fn winning_long_journal() -> Vec<DecisionRecord> {
    vec![
        record(
            1,
            t0(),
            vec![action(
                TradeAction::OpenLong,
                "BTCUSDT",
                0.1,
                Some(5.0),
                20000.0,
                t0(),
                true,
            )],
        ),
        record(
            2,
            t0() + Duration::hours(1),
            vec![action(
                TradeAction::CloseLong,
                "BTCUSDT",
                0.1,
                None,
                21000.0,
                t0() + Duration::hours(1),
                true,
            )],
        ),
    ]
}

// =============================================================================
// Reconstruction
// =============================================================================

#[test]
fn reconstructs_a_winning_long() {
    let trades = reconstruct_trades(&winning_long_journal());
    assert_eq!(trades.len(), 1);

    let trade = &trades[0];
    assert_eq!(trade.symbol, "BTCUSDT");
    assert_eq!(trade.side, Side::Long);
    assert!((trade.pnl - 100.0).abs() < 1e-9);
    assert!((trade.margin_used() - 400.0).abs() < 1e-9);
    assert!((trade.pnl_pct - 25.0).abs() < 1e-9);
    assert!((trade.hold_minutes() - 60.0).abs() < 1e-9);
}

#[test]
fn short_pnl_is_inverted() {
    let records = vec![
        record(
            1,
            t0(),
            vec![action(
                TradeAction::OpenShort,
                "ETHUSDT",
                1.0,
                Some(4.0),
                3000.0,
                t0(),
                true,
            )],
        ),
        record(
            2,
            t0() + Duration::hours(2),
            vec![action(
                TradeAction::CloseShort,
                "ETHUSDT",
                1.0,
                None,
                2900.0,
                t0() + Duration::hours(2),
                true,
            )],
        ),
    ];
    let trades = reconstruct_trades(&records);
    assert_eq!(trades.len(), 1);
    assert!((trades[0].pnl - 100.0).abs() < 1e-9);
    // margin = 3000/4 = 750, pnl_pct = 100/750*100
    assert!((trades[0].pnl_pct - 13.333333333333334).abs() < 1e-9);
}

#[test]
fn failed_actions_do_not_participate() {
    let mut records = winning_long_journal();
    records[1].actions[0].success = false;
    let trades = reconstruct_trades(&records);
    assert!(trades.is_empty());
}

#[test]
fn reopening_drops_the_prior_open() {
    let records = vec![
        record(
            1,
            t0(),
            vec![
                action(TradeAction::OpenLong, "BTCUSDT", 0.1, Some(5.0), 20000.0, t0(), true),
                action(
                    TradeAction::OpenLong,
                    "BTCUSDT",
                    0.2,
                    Some(5.0),
                    20500.0,
                    t0(),
                    true,
                ),
            ],
        ),
        record(
            2,
            t0() + Duration::hours(1),
            vec![action(
                TradeAction::CloseLong,
                "BTCUSDT",
                0.2,
                None,
                21000.0,
                t0() + Duration::hours(1),
                true,
            )],
        ),
    ];
    let trades = reconstruct_trades(&records);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].open_price, 20500.0);
    assert_eq!(trades[0].quantity, 0.2);
}

#[test]
fn orphan_closes_and_residual_opens_are_ignored() {
    let records = vec![
        record(
            1,
            t0(),
            vec![
                action(TradeAction::CloseLong, "BTCUSDT", 0.1, None, 21000.0, t0(), true),
                action(TradeAction::OpenShort, "ETHUSDT", 1.0, Some(3.0), 3000.0, t0(), true),
            ],
        ),
    ];
    assert!(reconstruct_trades(&records).is_empty());
}

#[test]
fn take_profit_lifted_from_opening_decision() {
    let json = r#"[{"symbol":"BTCUSDT","action":"open_long","quantity":0.1,"leverage":5,"take_profit":22000,"stop_loss":19000,"confidence":70,"reasoning":"breakout"}]"#;
    let records = vec![
        record_with_json(
            1,
            t0(),
            vec![action(TradeAction::OpenLong, "BTCUSDT", 0.1, Some(5.0), 20000.0, t0(), true)],
            json,
        ),
        record(
            2,
            t0() + Duration::hours(1),
            vec![action(
                TradeAction::CloseLong,
                "BTCUSDT",
                0.1,
                None,
                21000.0,
                t0() + Duration::hours(1),
                true,
            )],
        ),
    ];
    let trades = reconstruct_trades(&records);
    assert_eq!(trades[0].take_profit, Some(22000.0));
    assert_eq!(trades[0].stop_loss, Some(19000.0));
}

// =============================================================================
// Auto-close simulation
// =============================================================================

#[test]
fn two_percent_auto_close_clips_the_winner() {
    let trades = reconstruct_trades(&winning_long_journal());
    let results = simulate(&trades, &[2.0]);
    let result = &results[0];

    // price_change_pct = 2/(100*5) = 0.004 -> auto close at 20080.
    assert_eq!(result.early_closes, 1);
    assert!((result.total_pnl - 8.0).abs() < 1e-9);
    assert!((result.missed_profit - 92.0).abs() < 1e-9);
    assert_eq!(result.wins, 1);
    assert_eq!(result.losses, 0);
    assert_eq!(result.win_rate, 100.0);
    assert_eq!(result.profit_factor, 999.0);
}

#[test]
fn zero_threshold_matches_historical_pnl() {
    let mut records = winning_long_journal();
    // Add a losing short on top: open 1 ETH @ 3000 3x, close @ 3100.
    records.push(record(
        3,
        t0() + Duration::hours(2),
        vec![action(
            TradeAction::OpenShort,
            "ETHUSDT",
            1.0,
            Some(3.0),
            3000.0,
            t0() + Duration::hours(2),
            true,
        )],
    ));
    records.push(record(
        4,
        t0() + Duration::hours(3),
        vec![action(
            TradeAction::CloseShort,
            "ETHUSDT",
            1.0,
            None,
            3100.0,
            t0() + Duration::hours(3),
            true,
        )],
    ));

    let trades = reconstruct_trades(&records);
    let historical: f64 = trades.iter().map(|t| t.pnl).sum();
    let results = simulate(&trades, &[0.0]);
    assert!((results[0].total_pnl - historical).abs() < 1e-9);
    assert_eq!(results[0].early_closes, 0);
    assert_eq!(results[0].missed_profit, 0.0);
}

#[test]
fn missed_profit_grows_as_threshold_shrinks() {
    let trades = reconstruct_trades(&winning_long_journal());
    let results = simulate(&trades, &[2.0, 5.0, 10.0, 50.0]);

    let missed: Vec<f64> = results.iter().map(|r| r.missed_profit).collect();
    // Ascending thresholds -> non-increasing missed profit.
    for pair in missed.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
    // 50% on 5x margin needs a 10% move; the 5% historical move never hits it.
    assert_eq!(results[3].missed_profit, 0.0);
    assert_eq!(results[3].early_closes, 0);
}

#[test]
fn losses_are_never_reclipped() {
    let records = vec![
        record(
            1,
            t0(),
            vec![action(TradeAction::OpenLong, "BTCUSDT", 0.1, Some(5.0), 20000.0, t0(), true)],
        ),
        record(
            2,
            t0() + Duration::hours(1),
            vec![action(
                TradeAction::CloseLong,
                "BTCUSDT",
                0.1,
                None,
                19000.0,
                t0() + Duration::hours(1),
                true,
            )],
        ),
    ];
    let trades = reconstruct_trades(&records);
    let results = simulate(&trades, &[2.0]);
    assert!((results[0].total_pnl - (-100.0)).abs() < 1e-9);
    assert_eq!(results[0].early_closes, 0);
    assert_eq!(results[0].losses, 1);
}

#[test]
fn drawdown_tracks_equity_from_ten_thousand() {
    let mk = |open: f64, close: f64| Trade {
        symbol: "BTCUSDT".to_string(),
        side: Side::Long,
        open_price: open,
        close_price: close,
        open_time: t0(),
        close_time: t0() + Duration::hours(1),
        quantity: 1.0,
        leverage: 5.0,
        take_profit: None,
        stop_loss: None,
        pnl: close - open,
        pnl_pct: 0.0,
    };
    // +1000 then -2000: peak 11000, trough 9000 -> 18.18% drawdown.
    let trades = vec![mk(20000.0, 21000.0), mk(21000.0, 19000.0)];
    let results = simulate(&trades, &[0.0]);
    assert!((results[0].max_drawdown_pct - (2000.0 / 11000.0 * 100.0)).abs() < 1e-9);
}

// =============================================================================
// Report
// =============================================================================

#[test]
fn best_thresholds_break_ties_low() {
    let trades = reconstruct_trades(&winning_long_journal());
    // 50 and 100 both leave the single trade untouched: identical results,
    // so the lower threshold must win the tie.
    let results = simulate(&trades, &[50.0, 100.0]);
    let report = build_report("t1", &winning_long_journal(), trades.len(), results);
    assert_eq!(report.best_by_pnl, 50.0);
    assert_eq!(report.best_by_win_rate, 50.0);
    assert_eq!(report.total_cycles, 2);
    assert_eq!(report.total_trades, 1);
}

#[test]
fn report_round_trips_through_disk() {
    let dir = std::env::temp_dir().join(format!("backtest-report-test-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let trades = reconstruct_trades(&winning_long_journal());
    let results = simulate(&trades, &[0.0, 2.0]);
    let report = build_report("t1", &winning_long_journal(), trades.len(), results);

    let path = write_report(&dir, &report).unwrap();
    assert!(path.starts_with(dir.join("t1")));

    let loaded = latest_report(&dir, "t1").unwrap().unwrap();
    assert_eq!(loaded.trader_id, "t1");
    assert_eq!(loaded.results.len(), 2);

    let table = summarize_table(&[("t1".to_string(), Some(loaded)), ("t2".to_string(), None)]);
    assert!(table.contains("t1"));
    assert!(table.contains("no backtest found"));

    let _ = std::fs::remove_dir_all(&dir);
}
