//! End-to-end settlement flow
//!
//! Exercises the full lifecycle over a real SQLite file: build a
//! master -> agent -> member hierarchy, fund the member, place bets,
//! publish a draw result, settle the draw, and audit every balance against
//! the transaction log.

use std::collections::HashMap;
use std::sync::Arc;

use lottodesk_backend::models::{
    AccountRole, BetStatus, BetType, CommissionRates, CreditAction, CreditReason, DrawResult,
};
use lottodesk_backend::settlement::{place_bet, NewBet, NewBetLine, SettlementEngine};
use lottodesk_backend::storage::Store;

use chrono::Utc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    engine: SettlementEngine,
    master_id: String,
    agent_id: String,
    member_id: String,
}

fn flat_rates(pct: f64) -> CommissionRates {
    let mut rates: CommissionRates = HashMap::new();
    let by_type = rates.entry("thai_gov".to_string()).or_default();
    for bt in BetType::ALL {
        by_type.insert(bt, pct);
    }
    rates
}

/// Hierarchy with 10% agent and 2% master commission, member funded at 1000.
fn fixture() -> Fixture {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("settlement_test.db");
    let store = Arc::new(Store::new(db_path.to_str().unwrap()).expect("Failed to open store"));

    let master = store
        .create_account("master", AccountRole::Master, None, &flat_rates(2.0))
        .unwrap();
    let agent = store
        .create_account("agent01", AccountRole::Agent, Some(&master.id), &flat_rates(10.0))
        .unwrap();
    let member = store
        .create_account("member01", AccountRole::Member, Some(&agent.id), &HashMap::new())
        .unwrap();

    store
        .ledger()
        .apply(&member.id, CreditAction::Add, 1000.0, CreditReason::Adjust, None)
        .unwrap();

    let engine = SettlementEngine::new(store.clone());
    Fixture {
        _dir: dir,
        store,
        engine,
        master_id: master.id,
        agent_id: agent.id,
        member_id: member.id,
    }
}

fn line(bet_type: BetType, number: &str, stake: f64, payout_rate: f64) -> NewBetLine {
    NewBetLine {
        bet_type,
        number: number.to_string(),
        stake,
        payout_rate,
    }
}

fn draw_result() -> DrawResult {
    DrawResult {
        draw_id: "2026-08-01".to_string(),
        three_top: Some("123".to_string()),
        two_top: Some("23".to_string()),
        two_bottom: Some("45".to_string()),
        run_top: vec!["1".to_string(), "8".to_string()],
        run_bottom: vec!["4".to_string()],
        published_at: Utc::now(),
    }
}

#[tokio::test]
async fn full_draw_settlement_flow() {
    let fx = fixture();
    let ledger = fx.store.ledger();

    // Bet A: a tod permutation win plus a two-bottom win.
    let bet_a = place_bet(
        &fx.store,
        &ledger,
        NewBet {
            account_id: fx.member_id.clone(),
            draw_id: "2026-08-01".to_string(),
            category: "thai_gov".to_string(),
            lines: vec![
                line(BetType::ThreeTod, "321", 50.0, 100.0),
                line(BetType::TwoBottom, "45", 50.0, 90.0),
            ],
        },
    )
    .unwrap();

    // Bet B: loses everything.
    let bet_b = place_bet(
        &fx.store,
        &ledger,
        NewBet {
            account_id: fx.member_id.clone(),
            draw_id: "2026-08-01".to_string(),
            category: "thai_gov".to_string(),
            lines: vec![line(BetType::TwoTop, "99", 100.0, 90.0)],
        },
    )
    .unwrap();

    // Both stakes collected up front.
    assert_eq!(
        fx.store.get_account(&fx.member_id).unwrap().unwrap().credit,
        800.0
    );

    let result = draw_result();
    fx.store.insert_draw_result(&result).unwrap();
    let report = fx.engine.settle_draw(&result).await.unwrap();

    assert_eq!(report.settled, 2);
    assert_eq!(report.won, 1);
    assert_eq!(report.lost, 1);
    assert!(report.failures.is_empty());

    // Bet A: 50 x 100 + 50 x 90 = 9500 paid out.
    let stored_a = fx.store.get_bet(&bet_a.id).unwrap().unwrap();
    assert_eq!(stored_a.status, BetStatus::Won);
    assert_eq!(stored_a.total_win_amount, 9500.0);
    assert_eq!(stored_a.lines[0].is_win, Some(true));
    assert_eq!(stored_a.lines[1].win_amount, Some(4500.0));

    let stored_b = fx.store.get_bet(&bet_b.id).unwrap().unwrap();
    assert_eq!(stored_b.status, BetStatus::Lost);
    assert_eq!(stored_b.total_win_amount, 0.0);
    assert_eq!(stored_b.lines[0].is_win, Some(false));

    // Member: 800 + 9500 payout.
    assert_eq!(
        fx.store.get_account(&fx.member_id).unwrap().unwrap().credit,
        10300.0
    );
    // Agent: 10% of each bet's 100 stake, win or lose.
    assert_eq!(
        fx.store.get_account(&fx.agent_id).unwrap().unwrap().credit,
        20.0
    );
    // Master: 2% of each bet's 100 stake.
    assert_eq!(
        fx.store.get_account(&fx.master_id).unwrap().unwrap().credit,
        4.0
    );

    // Every account's cached credit reconciles against its transaction log.
    for id in [&fx.member_id, &fx.agent_id, &fx.master_id] {
        ledger.verify_chain(id).unwrap();
        let account = fx.store.get_account(id).unwrap().unwrap();
        assert_eq!(ledger.replay_balance(id).unwrap(), account.credit);
    }

    // Member audit trail: opening adjust, two stakes, one payout.
    let history = ledger.history(&fx.member_id, 50).unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].reason, CreditReason::Payout);
    assert_eq!(history[3].reason, CreditReason::Adjust);
}

#[tokio::test]
async fn resettling_a_draw_moves_no_money() {
    let fx = fixture();
    let ledger = fx.store.ledger();

    let bet = place_bet(
        &fx.store,
        &ledger,
        NewBet {
            account_id: fx.member_id.clone(),
            draw_id: "2026-08-01".to_string(),
            category: "thai_gov".to_string(),
            lines: vec![line(BetType::RunTop, "8", 100.0, 3.0)],
        },
    )
    .unwrap();

    let result = draw_result();
    fx.store.insert_draw_result(&result).unwrap();
    fx.engine.settle_draw(&result).await.unwrap();

    let member_credit = fx.store.get_account(&fx.member_id).unwrap().unwrap().credit;
    let agent_credit = fx.store.get_account(&fx.agent_id).unwrap().unwrap().credit;
    assert_eq!(member_credit, 900.0 + 300.0);

    // Direct retry of the already-settled bet is an idempotent no-op.
    let summary = fx.engine.settle_bet(&bet.id, &result).await.unwrap();
    assert_eq!(summary.status, BetStatus::Won);
    assert_eq!(summary.total_win_amount, 300.0);

    // A second draw-wide pass finds nothing pending.
    let report = fx.engine.settle_draw(&result).await.unwrap();
    assert_eq!(report.settled, 0);

    assert_eq!(
        fx.store.get_account(&fx.member_id).unwrap().unwrap().credit,
        member_credit
    );
    assert_eq!(
        fx.store.get_account(&fx.agent_id).unwrap().unwrap().credit,
        agent_credit
    );
    ledger.verify_chain(&fx.member_id).unwrap();
}

#[tokio::test]
async fn unpublished_categories_never_match() {
    let fx = fixture();
    let ledger = fx.store.ledger();

    // Result with only the bottom two digits published.
    let result = DrawResult {
        draw_id: "2026-08-16".to_string(),
        three_top: None,
        two_top: None,
        two_bottom: Some("45".to_string()),
        run_top: vec![],
        run_bottom: vec![],
        published_at: Utc::now(),
    };

    let bet = place_bet(
        &fx.store,
        &ledger,
        NewBet {
            account_id: fx.member_id.clone(),
            draw_id: "2026-08-16".to_string(),
            category: "thai_gov".to_string(),
            lines: vec![
                line(BetType::ThreeTop, "123", 10.0, 500.0),
                line(BetType::TwoBottom, "45", 10.0, 90.0),
            ],
        },
    )
    .unwrap();

    fx.store.insert_draw_result(&result).unwrap();
    let report = fx.engine.settle_draw(&result).await.unwrap();
    assert_eq!(report.won, 1);

    let stored = fx.store.get_bet(&bet.id).unwrap().unwrap();
    // The three-top line cannot win against an unpublished field.
    assert_eq!(stored.lines[0].is_win, Some(false));
    assert_eq!(stored.lines[1].is_win, Some(true));
    assert_eq!(stored.total_win_amount, 900.0);
}
