//! Bridge between the key ring and rustls' ticket hooks.

use std::sync::Arc;
use std::time::Duration;

use rustls::server::ProducesTickets;

use crate::tickets::ring::KeyRing;

/// `ProducesTickets` backed by the live key ring.
///
/// Every call reads the current snapshot, so a rotation takes effect on the
/// next ticket without rebuilding the server configuration.
#[derive(Debug)]
pub struct KeyRingTicketer {
    ring: Arc<KeyRing>,
    lifetime: u32,
}

impl KeyRingTicketer {
    pub fn new(ring: Arc<KeyRing>, lifetime: Duration) -> Self {
        Self {
            ring,
            lifetime: u32::try_from(lifetime.as_secs()).unwrap_or(u32::MAX),
        }
    }
}

impl ProducesTickets for KeyRingTicketer {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        self.lifetime
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        self.ring.current_keys().seal(plain)
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        self.ring.current_keys().open(cipher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_follow_rotation() {
        let ring = Arc::new(KeyRing::generated());
        let ticketer = KeyRingTicketer::new(Arc::clone(&ring), Duration::from_secs(86_400));
        assert_eq!(ticketer.lifetime(), 86_400);

        let ticket = ticketer.encrypt(b"session").unwrap();
        assert_eq!(ticketer.decrypt(&ticket).unwrap(), b"session");
        assert!(ticketer.decrypt(b"garbage").is_none());
    }
}
