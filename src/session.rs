//! Session identity, host identity and timestamps
//!
//! A session id is generated once per engine and attached to every persisted
//! record and failure report. It carries no meaning beyond correlation.

use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque per-process correlation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier (32 hex chars)
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, used in local file names
    pub fn prefix(&self, n: usize) -> &str {
        leading_chars(&self.0, n)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// First `n` characters of `id`
pub fn leading_chars(id: &str, n: usize) -> &str {
    match id.char_indices().nth(n) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Hostname of this machine, or "unknown" when it cannot be read
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Seconds since the Unix epoch as a float
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Numeric record identifiers: epoch milliseconds plus random low bits
///
/// The random offset is drawn once at construction, so `next` touches no
/// thread-local state and stays usable from `atexit` handlers. Ids from
/// one generator are strictly increasing.
#[derive(Debug)]
pub struct RecordIds {
    jitter: u64,
    last: AtomicU64,
}

impl RecordIds {
    pub fn new() -> Self {
        Self {
            jitter: rand::thread_rng().gen_range(0..1_000),
            last: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        let candidate = epoch_millis() * 1_000 + self.jitter;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let id = candidate.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, id, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return id,
                Err(current) => last = current,
            }
        }
    }
}

impl Default for RecordIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_distinct() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_prefix_is_bounded() {
        let id = SessionId::from("abcdef");
        assert_eq!(id.prefix(4), "abcd");
        assert_eq!(id.prefix(100), "abcdef");
    }

    #[test]
    fn test_hostname_never_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_timestamp_is_positive() {
        assert!(unix_timestamp() > 1_600_000_000.0);
    }

    #[test]
    fn test_prefix_respects_char_boundaries() {
        assert_eq!(leading_chars("añb", 2), "añ");
        assert_eq!(leading_chars("", 8), "");
    }

    #[test]
    fn test_record_ids_are_time_based_and_increasing() {
        let ids = RecordIds::new();
        let first = ids.next();
        assert!(first > 1_600_000_000_000 * 1_000);
        let rest: Vec<u64> = (0..100).map(|_| ids.next()).collect();
        assert!(rest[0] > first);
        assert!(rest.windows(2).all(|w| w[1] > w[0]));
    }
}
