//! Replay feed.
//!
//! Plays back recorded push events from a newline-delimited JSON file,
//! delivering them to registered callbacks from a dedicated OS thread the
//! way the vendor SDK does. Each line is an envelope:
//!
//! ```json
//! {"symbol": "700.HK", "snapshot": false, "event": {"type": "quote", ...}}
//! ```
//!
//! Lines for unsubscribed symbols or kinds are skipped, as are snapshot
//! lines when the subscription did not ask for the first push. Lines that
//! fail to parse are logged and skipped.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{FeedClient, FeedError, PushHandler, SubscriptionKind};
use crate::domain::push::PushEvent;

/// Longest uninterrupted sleep while pacing.
const PACE_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct FeedLine {
    symbol: String,
    #[serde(default)]
    snapshot: bool,
    event: PushEvent,
}

#[derive(Debug, Default)]
struct Subscription {
    symbols: HashSet<String>,
    kinds: HashSet<SubscriptionKind>,
    first_push: bool,
}

/// Counts from one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Non-empty lines read.
    pub lines: u64,
    /// Events handed to a callback.
    pub dispatched: u64,
    /// Lines outside the subscription or without a callback.
    pub filtered: u64,
    /// Snapshot lines skipped because the first push was not requested.
    pub snapshots_skipped: u64,
    /// Lines that failed to parse.
    pub malformed: u64,
}

/// File-backed [`FeedClient`].
pub struct ReplayFeed {
    path: PathBuf,
    pace: Duration,
    handlers: RwLock<HashMap<SubscriptionKind, PushHandler>>,
    subscription: RwLock<Subscription>,
}

impl std::fmt::Debug for ReplayFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayFeed")
            .field("path", &self.path)
            .field("pace", &self.pace)
            .field("handlers", &self.handlers.read().len())
            .finish_non_exhaustive()
    }
}

impl ReplayFeed {
    /// Feed reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pace: Duration::ZERO,
            handlers: RwLock::new(HashMap::new()),
            subscription: RwLock::new(Subscription::default()),
        }
    }

    /// Sleep this long between lines.
    #[must_use]
    pub const fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Replay the file on a dedicated thread until it ends or `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::State`] if nothing is subscribed, and
    /// [`FeedError::Source`] if the file cannot be opened or the thread
    /// cannot be spawned.
    pub fn start(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<ReplaySummary>, FeedError> {
        if self.subscription.read().symbols.is_empty() {
            return Err(FeedError::State("replay started before subscribe".to_string()));
        }

        let file = File::open(&self.path)?;
        info!(path = %self.path.display(), "Starting feed replay");

        let handle = std::thread::Builder::new()
            .name("feed-replay".to_string())
            .spawn(move || self.replay(BufReader::new(file), &cancel))?;
        Ok(handle)
    }

    /// Replay every line of `reader` on the calling thread.
    pub fn replay<R: BufRead>(&self, reader: R, cancel: &CancellationToken) -> ReplaySummary {
        let mut summary = ReplaySummary::default();

        for (index, line) in reader.lines().enumerate() {
            if cancel.is_cancelled() {
                info!(lines = summary.lines, "Feed replay cancelled");
                break;
            }

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Failed to read replay line, stopping");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            summary.lines += 1;

            match serde_json::from_str::<FeedLine>(&line) {
                Ok(parsed) => self.dispatch(parsed, &mut summary),
                Err(e) => {
                    summary.malformed += 1;
                    warn!(line = index + 1, error = %e, "Skipping malformed replay line");
                }
            }

            self.pause(cancel);
        }

        info!(
            lines = summary.lines,
            dispatched = summary.dispatched,
            filtered = summary.filtered,
            malformed = summary.malformed,
            "Feed replay finished"
        );
        summary
    }

    fn pause(&self, cancel: &CancellationToken) {
        let mut remaining = self.pace;
        while !remaining.is_zero() && !cancel.is_cancelled() {
            let slice = remaining.min(PACE_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
    }

    fn dispatch(&self, line: FeedLine, summary: &mut ReplaySummary) {
        let kind = line.event.kind();
        {
            let subscription = self.subscription.read();
            if !subscription.symbols.contains(&line.symbol) || !subscription.kinds.contains(&kind) {
                summary.filtered += 1;
                return;
            }
            if line.snapshot && !subscription.first_push {
                summary.snapshots_skipped += 1;
                return;
            }
        }

        let handler = self.handlers.read().get(&kind).cloned();
        match handler {
            Some(handler) => {
                handler(&line.symbol, line.event);
                summary.dispatched += 1;
            }
            None => {
                debug!(kind = %kind, "No callback registered, skipping event");
                summary.filtered += 1;
            }
        }
    }
}

impl FeedClient for ReplayFeed {
    fn register_callback(&self, kind: SubscriptionKind, handler: PushHandler) {
        self.handlers.write().insert(kind, handler);
    }

    fn subscribe(
        &self,
        symbols: &[String],
        kinds: &[SubscriptionKind],
        is_first_push: bool,
    ) -> Result<(), FeedError> {
        if symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(FeedError::Subscribe("empty symbol".to_string()));
        }
        if kinds.is_empty() {
            return Err(FeedError::Subscribe("no subscription kinds".to_string()));
        }

        let mut subscription = self.subscription.write();
        subscription.symbols.extend(symbols.iter().cloned());
        subscription.kinds.extend(kinds.iter().copied());
        subscription.first_push |= is_first_push;

        info!(
            symbols = ?symbols,
            kinds = ?kinds,
            is_first_push,
            "Subscribed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use parking_lot::Mutex;

    use super::*;
    use crate::domain::event::EventKind;

    const QUOTE: &str = r#"{"type":"quote","last_done":"150.00","open":"148.50","high":"151.20","low":"147.90","volume":1000,"turnover":"150000.00"}"#;
    const TRADES: &str = r#"{"type":"trades","trades":[{"price":"150.00","volume":10,"direction":"up"}]}"#;

    fn line(symbol: &str, snapshot: bool, event: &str) -> String {
        format!(r#"{{"symbol":"{symbol}","snapshot":{snapshot},"event":{event}}}"#)
    }

    fn recording_feed(first_push: bool) -> (ReplayFeed, Arc<Mutex<Vec<(String, EventKind)>>>) {
        let feed = ReplayFeed::new("unused.ndjson");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::all() {
            let seen = Arc::clone(&seen);
            feed.register_callback(
                *kind,
                Arc::new(move |symbol: &str, event: PushEvent| {
                    seen.lock().push((symbol.to_string(), event.kind()));
                }),
            );
        }
        feed.subscribe(&["AAPL".to_string()], EventKind::all(), first_push)
            .unwrap();
        (feed, seen)
    }

    #[test]
    fn dispatches_subscribed_lines_in_order() {
        let (feed, seen) = recording_feed(true);
        let input = [
            line("AAPL", true, QUOTE),
            line("AAPL", false, TRADES),
            line("MSFT", false, QUOTE),
        ]
        .join("\n");

        let summary = feed.replay(Cursor::new(input), &CancellationToken::new());

        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.filtered, 1);
        assert_eq!(
            *seen.lock(),
            vec![
                ("AAPL".to_string(), EventKind::Quote),
                ("AAPL".to_string(), EventKind::Trade)
            ]
        );
    }

    #[test]
    fn snapshots_skipped_without_first_push() {
        let (feed, seen) = recording_feed(false);
        let input = [line("AAPL", true, QUOTE), line("AAPL", false, QUOTE)].join("\n");

        let summary = feed.replay(Cursor::new(input), &CancellationToken::new());

        assert_eq!(summary.snapshots_skipped, 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (feed, seen) = recording_feed(true);
        let input = format!("not json\n\n{}\n{{\"symbol\":\"AAPL\"}}", line("AAPL", false, TRADES));

        let summary = feed.replay(Cursor::new(input), &CancellationToken::new());

        assert_eq!(summary.lines, 3);
        assert_eq!(summary.malformed, 2);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn cancelled_replay_dispatches_nothing() {
        let (feed, seen) = recording_feed(true);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = feed.replay(Cursor::new(line("AAPL", false, QUOTE)), &cancel);

        assert_eq!(summary, ReplaySummary::default());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn start_requires_subscription() {
        let feed = Arc::new(ReplayFeed::new("missing.ndjson"));
        let err = feed.start(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, FeedError::State(_)));
    }

    #[test]
    fn subscribe_rejects_empty_input() {
        let feed = ReplayFeed::new("unused.ndjson");
        assert!(feed.subscribe(&[" ".to_string()], EventKind::all(), true).is_err());
        assert!(feed.subscribe(&["AAPL".to_string()], &[], true).is_err());
    }

    #[test]
    fn start_replays_file_on_own_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");
        std::fs::write(&path, format!("{}\n{}\n", line("AAPL", false, QUOTE), line("AAPL", false, TRADES)))
            .unwrap();

        let feed = ReplayFeed::new(&path);
        let threads = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&threads);
        feed.register_callback(
            EventKind::Quote,
            Arc::new(move |_: &str, _: PushEvent| {
                recorded
                    .lock()
                    .push(std::thread::current().name().map(str::to_string));
            }),
        );
        feed.subscribe(&["AAPL".to_string()], &[EventKind::Quote], true)
            .unwrap();

        let summary = Arc::new(feed)
            .start(CancellationToken::new())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.filtered, 1);
        assert_eq!(*threads.lock(), vec![Some("feed-replay".to_string())]);
    }

    #[test]
    fn cancel_interrupts_pacing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");
        std::fs::write(&path, format!("{}\n{}\n", line("AAPL", false, QUOTE), line("AAPL", false, TRADES)))
            .unwrap();

        let feed = ReplayFeed::new(&path).with_pace(Duration::from_secs(60));
        let dispatched = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&dispatched);
        feed.register_callback(
            EventKind::Quote,
            Arc::new(move |_: &str, _: PushEvent| *counter.lock() += 1),
        );
        feed.subscribe(&["AAPL".to_string()], &[EventKind::Quote], true)
            .unwrap();

        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();
        let handle = Arc::new(feed).start(cancel.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        let summary = handle.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.dispatched, 1);
        assert_eq!(*dispatched.lock(), 1);
    }
}
