//! Elapsed-time tracking
//!
//! Wall-clock sources and the per-session clock that derives the recording
//! duration. Paused spans are excluded from the duration while the session
//! anchor stays fixed.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Epoch-anchored clock that advances with the tokio timer.
///
/// Reads the wall clock once, then moves forward monotonically. Under a paused
/// tokio runtime it follows virtual time, which keeps ticks and durations in
/// agreement.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin_ms: i64,
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin_ms: Utc::now().timestamp_millis(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.origin_ms + self.origin.elapsed().as_millis() as i64
    }
}

/// Manually driven clock
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Identifier of the one repeating ticker a session may have armed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerHandle(u64);

/// Per-session elapsed-time clock
#[derive(Debug, Default)]
pub struct ElapsedClock {
    anchor_ms: Option<i64>,
    paused_at_ms: Option<i64>,
    paused_total_ms: i64,
    elapsed_seconds: u64,
    ticker: Option<TickerHandle>,
    next_ticker: u64,
}

impl ElapsedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor a new session at `now_ms` and arm the ticker
    pub fn start(&mut self, now_ms: i64) -> TickerHandle {
        self.reset();
        self.anchor_ms = Some(now_ms);
        self.arm()
    }

    /// Freeze the duration and cancel the ticker
    pub fn pause(&mut self, now_ms: i64) {
        if self.paused_at_ms.is_none() {
            self.paused_at_ms = Some(now_ms);
        }
        self.disarm();
    }

    /// Re-arm the ticker; the anchor is kept and the paused span discounted
    pub fn resume(&mut self, now_ms: i64) -> TickerHandle {
        if let Some(paused_at) = self.paused_at_ms.take() {
            self.paused_total_ms += (now_ms - paused_at).max(0);
        }
        self.arm()
    }

    /// Cancel the ticker, keeping the last published duration
    pub fn stop(&mut self) {
        self.disarm();
    }

    pub fn reset(&mut self) {
        self.disarm();
        self.anchor_ms = None;
        self.paused_at_ms = None;
        self.paused_total_ms = 0;
        self.elapsed_seconds = 0;
    }

    /// Recompute the duration on a ticker period. Returns `None` when no
    /// ticker is armed.
    pub fn tick(&mut self, now_ms: i64) -> Option<u64> {
        self.ticker?;
        let anchor = self.anchor_ms?;
        let active_ms = (now_ms - anchor - self.paused_total_ms).max(0);
        let seconds = (active_ms / 1000) as u64;
        // never rewind, even if the wall clock steps backwards
        self.elapsed_seconds = self.elapsed_seconds.max(seconds);
        Some(self.elapsed_seconds)
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn anchor_ms(&self) -> Option<i64> {
        self.anchor_ms
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn ticker(&self) -> Option<TickerHandle> {
        self.ticker
    }

    fn arm(&mut self) -> TickerHandle {
        if let Some(existing) = self.ticker {
            tracing::warn!("Ticker already armed, keeping {:?}", existing);
            return existing;
        }
        self.next_ticker += 1;
        let handle = TickerHandle(self.next_ticker);
        self.ticker = Some(handle);
        handle
    }

    fn disarm(&mut self) {
        self.ticker = None;
    }
}
