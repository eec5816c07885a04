use crate::request::Direction;
use ::metrics::{counter, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Stat {
    count: AtomicU64,
    bytes: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Stat {
    fn observe(&self, bytes: u64, dur: Duration) {
        let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ns = self.total_ns.load(Ordering::Relaxed);
        let avg_ns = if count == 0 {
            0.0
        } else {
            total_ns as f64 / count as f64
        };
        StatSnapshot {
            count,
            bytes: self.bytes.load(Ordering::Relaxed),
            avg_ns,
            max_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }
}

static READ: Stat = Stat {
    count: AtomicU64::new(0),
    bytes: AtomicU64::new(0),
    total_ns: AtomicU64::new(0),
    max_ns: AtomicU64::new(0),
};
static WRITE: Stat = Stat {
    count: AtomicU64::new(0),
    bytes: AtomicU64::new(0),
    total_ns: AtomicU64::new(0),
    max_ns: AtomicU64::new(0),
};

static STATUS_POLLS: AtomicU64 = AtomicU64::new(0);
static SINGLE_BLOCK_FALLBACKS: AtomicU64 = AtomicU64::new(0);
static REINITS: AtomicU64 = AtomicU64::new(0);
static REMOVALS: AtomicU64 = AtomicU64::new(0);
static FATAL_REQUESTS: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Default)]
pub struct StatSnapshot {
    pub count: u64,
    pub bytes: u64,
    pub avg_ns: f64,
    pub max_ns: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub read: StatSnapshot,
    pub write: StatSnapshot,
    pub status_polls: u64,
    pub single_block_fallbacks: u64,
    pub reinits: u64,
    pub removals: u64,
    pub fatal_requests: u64,
}

pub fn observe_transfer(direction: Direction, bytes: u64, dur: Duration) {
    let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
    match direction {
        Direction::Read => {
            counter!("cardio_read_count").increment(1);
            counter!("cardio_read_bytes").increment(bytes);
            histogram!("cardio_read_latency_ns").record(ns as f64);
            READ.observe(bytes, dur);
        }
        Direction::Write => {
            counter!("cardio_write_count").increment(1);
            counter!("cardio_write_bytes").increment(bytes);
            histogram!("cardio_write_latency_ns").record(ns as f64);
            WRITE.observe(bytes, dur);
        }
    }
}

pub fn record_status_poll() {
    counter!("cardio_status_polls").increment(1);
    STATUS_POLLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_single_block_fallback() {
    counter!("cardio_single_block_fallbacks").increment(1);
    SINGLE_BLOCK_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reinit() {
    counter!("cardio_reinits").increment(1);
    REINITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_removal() {
    counter!("cardio_removals").increment(1);
    REMOVALS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fatal_request() {
    counter!("cardio_fatal_requests").increment(1);
    FATAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        read: READ.snapshot(),
        write: WRITE.snapshot(),
        status_polls: STATUS_POLLS.load(Ordering::Relaxed),
        single_block_fallbacks: SINGLE_BLOCK_FALLBACKS.load(Ordering::Relaxed),
        reinits: REINITS.load(Ordering::Relaxed),
        removals: REMOVALS.load(Ordering::Relaxed),
        fatal_requests: FATAL_REQUESTS.load(Ordering::Relaxed),
    }
}
