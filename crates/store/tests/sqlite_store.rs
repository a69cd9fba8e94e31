use sqlx::{Connection, SqliteConnection};

use common::{Direction, StoreConnection, TradeAction, TradeInstruction, TrackerState};
use store::SqlStoreConnection;

/// Fresh in-memory database with the schema applied, one configuration row,
/// and any extra seed statements. In-memory sqlite is per-connection, so
/// everything in a test goes through this single connection.
async fn seeded(extra_sql: &[&str]) -> SqlStoreConnection {
    let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
    store::MIGRATOR.run(&mut conn).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO strategy_configurations
            (config_id, ticker, ticker_jid, timeframe_signal_id,
             timeframe_confirmation_id, timeframe_trend_id, open_volume,
             trading_start_utc, trading_close_utc, broker_id, platform_id,
             max_position_checks, check_interval_seconds)
        VALUES (7, 'XAUUSD', 13, 3, 3, 5, 0.01, NULL, '21:45:00', 2, 1, 30, 0.1)
        "#,
    )
    .execute(&mut conn)
    .await
    .unwrap();

    for sql in extra_sql {
        sqlx::query(sql).execute(&mut conn).await.unwrap();
    }

    SqlStoreConnection::new(conn)
}

#[tokio::test]
async fn register_returns_config_and_tracks_start() {
    let mut store = seeded(&[]).await;
    let cfg = store.register_strategy(7).await.unwrap();

    assert_eq!(cfg.ticker, "XAUUSD");
    assert_eq!(cfg.ticker_jid, 13);
    assert_eq!(
        cfg.trading_close_utc,
        chrono::NaiveTime::from_hms_opt(21, 45, 0)
    );
    assert!(cfg.trading_start_utc.is_none());
    assert!(!cfg.instance_token.is_empty());

    // A second registration issues a fresh instance token.
    let again = store.register_strategy(7).await.unwrap();
    assert_ne!(cfg.instance_token, again.instance_token);
}

#[tokio::test]
async fn register_unknown_config_is_config_not_found() {
    let mut store = seeded(&[]).await;
    assert!(matches!(
        store.register_strategy(99).await,
        Err(common::Error::ConfigNotFound(99))
    ));
}

#[tokio::test]
async fn current_signal_reads_latest_snapshot_for_the_triple() {
    let mut store = seeded(&[
        "INSERT INTO signal_snapshots
            (ticker_jid, timeframe_signal_id, timeframe_confirmation_id,
             timeframe_trend_id, trading_signal, computed_at)
         VALUES (13, 3, 3, 5, 'buy',  '2026-08-01T10:00:00Z'),
                (13, 3, 3, 5, 'sell', '2026-08-01T11:00:00Z'),
                (13, 3, 3, 5, NULL,   '2026-08-01T09:00:00Z')",
    ])
    .await;

    assert_eq!(
        store.current_signal(13, 3, 3, 5).await.unwrap(),
        Some(Direction::Sell),
        "latest computed_at wins"
    );
    // A different timeframe triple sees nothing.
    assert_eq!(store.current_signal(13, 1, 3, 5).await.unwrap(), None);
}

#[tokio::test]
async fn open_positions_filters_closed_and_foreign_rows() {
    let mut store = seeded(&[
        "INSERT INTO trades (config_id, ticker, direction, volume, order_uuid, trade_type, status, opened_at)
         VALUES (7, 'XAUUSD', 'Buy',  0.01, 'u-1', 'POSITION', 'OPEN',   '2026-08-01T08:00:00Z'),
                (7, 'XAUUSD', 'Sell', 0.01, 'u-2', 'POSITION', 'CLOSED', '2026-08-01T08:05:00Z'),
                (9, 'EURUSD', 'Buy',  0.10, 'u-3', 'POSITION', 'OPEN',   '2026-08-01T08:10:00Z')",
    ])
    .await;

    let positions = store.open_positions(7).await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].direction, Direction::Buy);
    assert_eq!(positions[0].correlation_token.as_deref(), Some("u-1"));
}

#[tokio::test]
async fn instruction_and_log_round_trip() {
    let mut store = seeded(&[]).await;
    let cfg = store.register_strategy(7).await.unwrap();

    store
        .create_trade_signal(&TradeInstruction::open(&cfg, Direction::Buy))
        .await
        .unwrap();

    let record = store
        .log_execution(7, TradeAction::Buy, 0.01, None, None)
        .await
        .unwrap();
    store.attach_execution_token(record, "uuid-7").await.unwrap();

    // Attaching to a missing record is an error, not a silent no-op.
    assert!(store
        .attach_execution_token(record + 100, "uuid-x")
        .await
        .is_err());
}

#[tokio::test]
async fn termination_queue_orders_and_completes() {
    let mut store = seeded(&[
        "INSERT INTO termination_requests (config_id, requested_at)
         VALUES (7, '2026-08-01T10:00:00Z'), (9, '2026-08-01T09:00:00Z')",
    ])
    .await;

    let pending = store.pending_terminations().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].config_id, 9, "earliest request first");

    let first_id = pending[0].termination_id;
    store.mark_termination_completed(first_id).await.unwrap();
    let pending = store.pending_terminations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].config_id, 7);
}

#[tokio::test]
async fn tracker_state_upserts_without_conflict() {
    let mut store = seeded(&[]).await;
    store
        .update_strategy_state(7, TrackerState::Start)
        .await
        .unwrap();
    store
        .update_strategy_state(7, TrackerState::Heartbeat)
        .await
        .unwrap();
    store
        .update_strategy_state(7, TrackerState::Terminated)
        .await
        .unwrap();
}
