//! Per-remote-address abuse tracking (spec §4.5): login-error blocklist plus
//! a socket-error counter, both expired lazily at read time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// The minimum blocking window honored; values below it fall back to the
/// 10-minute default rather than clamping up to the floor (spec §8 boundary
/// test: `blockingTime = 30s` is normalized to 10 min, not 1 min).
const MIN_BLOCKING_TIME: Duration = Duration::from_secs(60);
const DEFAULT_BLOCKING_TIME: Duration = Duration::from_secs(600);

/// Socket errors only block once the count exceeds this.
const SOCKET_ERROR_BLOCK_THRESHOLD: u32 = 3;

fn normalize_blocking_time(d: Duration) -> Duration {
    if d < MIN_BLOCKING_TIME {
        DEFAULT_BLOCKING_TIME
    } else {
        d
    }
}

/// Tracks login failures and socket errors per remote address string.
///
/// Mirrors how shared connection state is guarded behind a `tokio::sync::Mutex`
/// elsewhere in the workspace: one lock per map, held only for the duration of
/// a single read or write.
pub struct AbuseGuard {
    blocking_time: Duration,
    login_errors: Mutex<HashMap<String, Instant>>,
    socket_errors: Mutex<HashMap<String, (u32, Instant)>>,
}

impl AbuseGuard {
    /// `blocking_time` below one minute normalizes to the 10-minute default.
    pub fn new(blocking_time: Duration) -> Self {
        Self {
            blocking_time: normalize_blocking_time(blocking_time),
            login_errors: Mutex::new(HashMap::new()),
            socket_errors: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if `addr` should be rejected on accept.
    pub async fn is_blocked(&self, addr: &str) -> bool {
        let now = Instant::now();

        let login_blocked = self
            .login_errors
            .lock()
            .await
            .get(addr)
            .is_some_and(|t| now.duration_since(*t) < self.blocking_time);
        if login_blocked {
            return true;
        }

        self.socket_errors
            .lock()
            .await
            .get(addr)
            .is_some_and(|(count, last)| {
                *count > SOCKET_ERROR_BLOCK_THRESHOLD && now.duration_since(*last) < self.blocking_time
            })
    }

    /// Record that `addr` exceeded the login-error limit.
    pub async fn record_login_error(&self, addr: &str) {
        self.login_errors.lock().await.insert(addr.to_string(), Instant::now());
    }

    /// Record a protocol error, login timeout, or I/O failure from `addr`.
    pub async fn record_socket_error(&self, addr: &str) {
        let mut map = self.socket_errors.lock().await;
        let entry = map.entry(addr.to_string()).or_insert((0, Instant::now()));
        entry.0 += 1;
        entry.1 = Instant::now();
    }
}
