//! Client order id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use super::types::ClientOrderId;

/// Generates unique, alphanumeric client order ids: `<prefix><session><counter>`.
///
/// The session tag is six random base-36 characters drawn at construction, so
/// ids from a previous run are not reused even across quick restarts. The
/// exchange treats a duplicate id as a no-op and would silently drop the new
/// order.
#[derive(Debug)]
pub struct ClientOrderIdGenerator {
    prefix: String,
    session: String,
    counter: AtomicU64,
}

impl ClientOrderIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_session(prefix, random_session(&mut rand::rng()))
    }

    pub fn with_session(prefix: impl Into<String>, session: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        let prefix: String = prefix.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        Self {
            prefix,
            session: session.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> ClientOrderId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        ClientOrderId::new(format!("{}{}{:06}", self.prefix, self.session, n))
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

const SESSION_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SESSION_LEN: usize = 6;

fn random_session<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SESSION_LEN)
        .map(|_| SESSION_ALPHABET[rng.random_range(0..SESSION_ALPHABET.len())] as char)
        .collect()
}
