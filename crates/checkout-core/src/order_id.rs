//! Order Identifier Generator
//!
//! Ids are `<prefix><YYYYMMDDHHMMSS><seq><random>`:
//!
//! ```text
//! demo 20261019143005 00a7 k3x9qz
//! │    │              │    └── 6 random alphanumerics
//! │    │              └── 4 base36 digits of a process-wide sequence
//! │    └── UTC wall clock, second resolution
//! └── fixed prefix tag
//! ```
//!
//! The sequence breaks ties inside one wall-clock second; the random tail keeps
//! ids from separate processes apart in practice. This is not a distributed
//! unique-id scheme.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{CheckoutError, Result};
use crate::session::OrderId;

const TIMESTAMP_LEN: usize = 14;
const SEQUENCE_LEN: usize = 4;
const RANDOM_LEN: usize = 6;
const SEQUENCE_SPACE: u64 = 36u64.pow(SEQUENCE_LEN as u32);
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates order ids with a fixed prefix and length
#[derive(Clone, Debug)]
pub struct OrderIdGenerator {
    prefix: String,
}

impl Default for OrderIdGenerator {
    fn default() -> Self {
        Self { prefix: "demo".into() }
    }
}

impl OrderIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CheckoutError::Config(format!(
                "order prefix '{}' must be non-empty ASCII alphanumerics",
                prefix
            )));
        }
        Ok(Self { prefix })
    }

    /// Length of every id this generator produces
    pub fn id_len(&self) -> usize {
        self.prefix.len() + TIMESTAMP_LEN + SEQUENCE_LEN + RANDOM_LEN
    }

    pub fn next(&self) -> OrderId {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed) % SEQUENCE_SPACE;
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();

        OrderId::from_string(format!(
            "{}{}{}{}",
            self.prefix,
            timestamp,
            encode_base36(sequence),
            random
        ))
    }
}

fn encode_base36(mut value: u64) -> String {
    let mut digits = [b'0'; SEQUENCE_LEN];
    for slot in digits.iter_mut().rev() {
        *slot = BASE36[(value % 36) as usize];
        value /= 36;
    }
    digits.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_distinct() {
        let generator = OrderIdGenerator::default();
        let ids: HashSet<_> = (0..10_000).map(|_| generator.next()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_fixed_length_and_format() {
        let generator = OrderIdGenerator::new("shop").unwrap();
        for _ in 0..1_000 {
            let id = generator.next();
            assert_eq!(id.as_str().len(), generator.id_len());
            assert!(id.as_str().starts_with("shop"));
            assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_base36_padding() {
        assert_eq!(encode_base36(0), "0000");
        assert_eq!(encode_base36(35), "000z");
        assert_eq!(encode_base36(36), "0010");
        assert_eq!(encode_base36(SEQUENCE_SPACE - 1), "zzzz");
    }

    #[test]
    fn test_prefix_validation() {
        assert!(OrderIdGenerator::new("").is_err());
        assert!(OrderIdGenerator::new("demo_").is_err());
    }
}
