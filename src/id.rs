//! Time-ordered token identifiers.
//!
//! An id is the number of milliseconds since [`EPOCH_MILLIS`] written in a
//! base-34 alphabet (digits and uppercase letters without `O` and `I`) and
//! left-padded with `0` to [`ID_WIDTH`] characters. Padding keeps
//! lexicographic and chronological order identical, which is what the
//! store's primary-key scans rely on.
//!
//! Clients see the short, unpadded form ([`id_out`]); anything coming back
//! in goes through [`id_in`].

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub const ID_WIDTH: usize = 32;

const ALPHABET: &[u8; 34] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// 2021-01-01T00:00:00Z
pub const EPOCH_MILLIS: i64 = 1_609_459_200_000;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct IdGenerator {
    clock: Clock,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Generator reading time from `clock` instead of the system clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// A fresh padded id for the current millisecond.
    ///
    /// Two calls within the same millisecond return the same id; the store
    /// rejects the second create and the caller retries (see
    /// [`crate::tokens::TokenBook::put_token`]).
    pub fn generate(&self) -> String {
        let millis = (self.clock)().timestamp_millis() - EPOCH_MILLIS;
        pad(&encode(millis.max(0) as u64))
    }
}

/// Base-34 encoding without padding. `0` encodes as `"0"`.
pub fn encode(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(ALPHABET[(n % 34) as usize]);
        n /= 34;
    }
    digits.reverse();
    // alphabet is ASCII
    String::from_utf8(digits).unwrap_or_default()
}

fn pad(id: &str) -> String {
    format!("{:0>width$}", id, width = ID_WIDTH)
}

/// Strip padding for display. Inverse of [`id_in`].
pub fn id_out(id: &str) -> String {
    let trimmed = id.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalize a client-supplied id: case-insensitive, padded to [`ID_WIDTH`].
pub fn id_in(id: &str) -> String {
    pad(&id.trim().to_ascii_uppercase())
}

/// Whether `id` consists only of alphabet characters and fits the width.
pub fn is_valid(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= ID_WIDTH
        && id.bytes().all(|b| ALPHABET.contains(&b.to_ascii_uppercase()))
}
