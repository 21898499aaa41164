//! TTL de-duplication cache for forge delivery GUIDs.
//!
//! Bounded by its own eviction, not by capacity: entries fall off the
//! front of an insertion-sorted list once their TTL elapses. The TTL is
//! constant per cache and `Instant::now()` is monotonic, so the list stays
//! sorted by expiry without ever being re-sorted.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default TTL used whenever the configured value is zero or negative.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15);

struct Inner {
    map: HashSet<String>,
    list: VecDeque<(String, Instant)>,
}

/// A bounded-by-time set of delivery fingerprints.
///
/// No suspension point ever occurs while the internal lock is held —
/// every operation is synchronous — so this uses a plain `std::sync::Mutex`
/// rather than an async one.
pub struct TtlCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl TtlCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        Self {
            ttl,
            inner: Mutex::new(Inner {
                map: HashSet::new(),
                list: VecDeque::new(),
            }),
        }
    }

    /// Admit `id` if it has not been seen within the last `ttl`. Returns
    /// `true` if this is the first admission, `false` for a duplicate.
    #[allow(clippy::unwrap_used)]
    pub fn try_add(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        while let Some((_, expiry)) = inner.list.front() {
            if *expiry > now {
                break;
            }
            let (expired_id, _) = inner.list.pop_front().unwrap();
            inner.map.remove(&expired_id);
        }

        if inner.map.contains(id) {
            return false;
        }

        inner.map.insert(id.to_owned());
        inner.list.push_back((id.to_owned(), now + self.ttl));
        true
    }
}
