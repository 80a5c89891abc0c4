//! Ingestion Scenario Integration Tests
//!
//! Vendor events in through the feed callbacks, rows out of storage.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use market_recorder::application::ports::FeedClient;
use market_recorder::domain::event::{BookSide, Table};
use market_recorder::domain::push::{PushDepthLevel, PushTrade};
use market_recorder::infrastructure::storage::count_rows;
use market_recorder::{
    EventKind, InMemoryStorage, PipelineController, PipelineSettings, PushDepth, PushQuote,
    PushTrades, ReplayFeed, SqliteConnectionFactory, TradeDirection, TradeStatus,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        poll_interval: Duration::from_millis(20),
        ..PipelineSettings::default()
    }
}

fn running(storage: &InMemoryStorage) -> PipelineController {
    let pipeline = PipelineController::new(settings(), Arc::new(storage.clone())).unwrap();
    pipeline.start().unwrap();
    pipeline
}

fn quote(last_done: &str, volume: i64) -> PushQuote {
    PushQuote {
        last_done: dec(last_done),
        open: dec("148.50"),
        high: dec("151.20"),
        low: dec("147.90"),
        timestamp: None,
        volume,
        turnover: dec("150000.00"),
        trade_status: TradeStatus::Normal,
        current_volume: 10,
        current_turnover: dec("1500.00"),
    }
}

fn push_trade(price: &str, volume: i64, direction: TradeDirection) -> PushTrade {
    PushTrade {
        price: dec(price),
        volume,
        timestamp: None,
        trade_type: String::new(),
        direction,
    }
}

fn level(position: i32, price: &str, volume: i64, order_num: i64) -> PushDepthLevel {
    PushDepthLevel {
        position,
        price: dec(price),
        volume,
        order_num,
    }
}

#[tokio::test]
async fn quote_becomes_one_row_stamped_at_receipt() {
    let storage = InMemoryStorage::new();
    let pipeline = running(&storage);
    let t0 = Utc::now();

    pipeline.ingest_handle().on_quote("AAPL", quote("150.00", 1000));
    pipeline.stop().await.unwrap();

    let rows = storage.quotes();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "AAPL");
    assert_eq!(rows[0].last_done, dec("150.00"));
    assert_eq!(rows[0].volume, 1000);
    assert!(rows[0].ts >= t0);
}

#[tokio::test]
async fn trade_batch_becomes_one_row_per_trade() {
    let storage = InMemoryStorage::new();
    let pipeline = running(&storage);

    pipeline.ingest_handle().on_trades(
        "700.HK",
        PushTrades {
            trades: vec![
                push_trade("320.0", 100, TradeDirection::Up),
                push_trade("320.2", 200, TradeDirection::Down),
                push_trade("320.4", 300, TradeDirection::Neutral),
            ],
        },
    );
    pipeline.stop().await.unwrap();

    let rows = storage.trades();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.symbol == "700.HK"));
    assert!(rows.iter().all(|r| r.ts == rows[0].ts));
    let volumes: Vec<_> = rows.iter().map(|r| r.volume).collect();
    assert_eq!(volumes, vec![100, 200, 300]);
}

#[tokio::test]
async fn depth_becomes_one_row_per_level() {
    let storage = InMemoryStorage::new();
    let pipeline = running(&storage);

    pipeline.ingest_handle().on_depth(
        "700.HK",
        PushDepth {
            asks: vec![level(1, "320.6", 500, 3), level(2, "320.8", 800, 6)],
            bids: vec![
                level(1, "320.4", 400, 2),
                level(2, "320.2", 900, 7),
                level(3, "320.0", 1200, 9),
            ],
        },
    );
    pipeline.stop().await.unwrap();

    let rows = storage.depths();
    assert_eq!(rows.len(), 5);
    let asks: Vec<_> = rows.iter().filter(|r| r.side == BookSide::Ask).collect();
    let bids: Vec<_> = rows.iter().filter(|r| r.side == BookSide::Bid).collect();
    assert_eq!(asks.len(), 2);
    assert_eq!(bids.len(), 3);
    assert_eq!(
        bids.iter().map(|r| r.position).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(bids[2].order_count, 9);
}

#[tokio::test]
async fn malformed_events_never_reach_storage() {
    let storage = InMemoryStorage::new();
    let pipeline = running(&storage);
    let handle = pipeline.ingest_handle();

    handle.on_trades("AAPL", PushTrades { trades: vec![] });
    handle.on_depth(
        "AAPL",
        PushDepth {
            asks: vec![],
            bids: vec![],
        },
    );
    handle.on_quote("  ", quote("1.00", 1));
    handle.on_depth(
        "AAPL",
        PushDepth {
            asks: vec![level(0, "1.0", 1, 1)],
            bids: vec![],
        },
    );
    pipeline.stop().await.unwrap();

    assert_eq!(pipeline.stats().dropped_invalid, 4);
    assert_eq!(storage.row_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_feed_threads_keep_per_symbol_order() {
    const PER_THREAD: i64 = 250;
    let storage = InMemoryStorage::new();
    let pipeline = running(&storage);
    let handler = pipeline.ingest_handle().push_handler();

    let symbols = ["AAPL", "MSFT", "NVDA", "TSLA"];
    let threads: Vec<_> = symbols
        .iter()
        .map(|symbol| {
            let handler = Arc::clone(&handler);
            let symbol = (*symbol).to_string();
            std::thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    let trades = PushTrades {
                        trades: vec![PushTrade {
                            price: Decimal::from(seq),
                            volume: 1,
                            timestamp: None,
                            trade_type: String::new(),
                            direction: TradeDirection::Up,
                        }],
                    };
                    handler(&symbol, market_recorder::PushEvent::Trades(trades));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let report = pipeline.stop().await.unwrap();
    assert_eq!(report.persisted, 1_000);

    let rows = storage.trades();
    for symbol in symbols {
        let prices: Vec<_> = rows
            .iter()
            .filter(|r| r.symbol == symbol)
            .map(|r| r.price)
            .collect();
        let expected: Vec<_> = (0..PER_THREAD).map(Decimal::from).collect();
        assert_eq!(prices, expected, "order broken for {symbol}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_backend_records_all_three_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let factory = SqliteConnectionFactory::new(dir.path().join("market.db"), Duration::from_secs(5));
    factory.ensure_schema().unwrap();

    let pipeline =
        PipelineController::new(settings(), Arc::new(factory.clone())).unwrap();
    pipeline.start().unwrap();
    let handle = pipeline.ingest_handle();

    handle.on_quote("700.HK", quote("320.40", 5_000));
    handle.on_trades(
        "700.HK",
        PushTrades {
            trades: vec![
                push_trade("320.4", 100, TradeDirection::Up),
                push_trade("320.6", 200, TradeDirection::Up),
            ],
        },
    );
    handle.on_depth(
        "700.HK",
        PushDepth {
            asks: vec![level(1, "320.6", 500, 3)],
            bids: vec![level(1, "320.4", 400, 2)],
        },
    );
    let report = pipeline.stop().await.unwrap();

    assert_eq!(report.persisted, 3);
    assert_eq!(report.rows_written, 5);
    assert_eq!(count_rows(&factory, Table::Quotes).unwrap(), 1);
    assert_eq!(count_rows(&factory, Table::Trades).unwrap(), 2);
    assert_eq!(count_rows(&factory, Table::Depths).unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_feed_drives_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feed.ndjson");
    let lines = [
        r#"{"symbol":"700.HK","snapshot":true,"event":{"type":"quote","last_done":"320.40","open":"318.00","high":"321.00","low":"317.20","volume":1000,"turnover":"320400.00"}}"#,
        r#"{"symbol":"700.HK","event":{"type":"trades","trades":[{"price":"320.40","volume":100,"direction":"up"}]}}"#,
        r#"{"symbol":"9988.HK","event":{"type":"trades","trades":[{"price":"80.10","volume":100}]}}"#,
        r"garbage",
        r#"{"symbol":"700.HK","event":{"type":"depth","asks":[{"position":1,"price":"320.60","volume":500,"order_num":3}]}}"#,
    ];
    std::fs::write(&path, lines.join("\n")).unwrap();

    let storage = InMemoryStorage::new();
    let pipeline = running(&storage);

    let feed = Arc::new(ReplayFeed::new(&path));
    let handler = pipeline.ingest_handle().push_handler();
    for kind in EventKind::all() {
        feed.register_callback(*kind, Arc::clone(&handler));
    }
    feed.subscribe(&["700.HK".to_string()], EventKind::all(), false)
        .unwrap();

    let summary = Arc::clone(&feed)
        .start(CancellationToken::new())
        .unwrap()
        .join()
        .unwrap();
    let report = pipeline.stop().await.unwrap();

    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.snapshots_skipped, 1);
    assert_eq!(summary.filtered, 1);
    assert_eq!(summary.malformed, 1);
    assert_eq!(report.persisted, 2);
    assert!(storage.quotes().is_empty());
    assert_eq!(storage.trades().len(), 1);
    assert_eq!(storage.depths().len(), 1);
}
