//! Session ticket keys and the RFC 5077 ticket envelope.
//!
//! # Ticket Layout
//! ```text
//! key_name[16] | iv[16] | AES-128-CTR(state) | HMAC-SHA256(key_name | iv | ciphertext)[32]
//! ```
//!
//! The 32-byte key is expanded with SHA-512 into the key name, the AES key
//! and the HMAC key, so a ticket minted by any tool holding the same 32 bytes
//! opens here.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use aes::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Width of one session ticket key in bytes.
pub const KEY_LEN: usize = 32;

const KEY_NAME_LEN: usize = 16;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// Bytes a ticket adds on top of the sealed state.
pub const TICKET_OVERHEAD: usize = KEY_NAME_LEN + IV_LEN + MAC_LEN;

/// A 32-byte session ticket key with its derived sub-keys.
#[derive(Clone)]
pub struct SessionTicketKey {
    secret: [u8; KEY_LEN],
    name: [u8; KEY_NAME_LEN],
    aes_key: [u8; 16],
    hmac_key: [u8; 16],
}

impl SessionTicketKey {
    /// Build a key from raw bytes.
    pub fn from_bytes(secret: [u8; KEY_LEN]) -> Self {
        let digest = Sha512::digest(secret);
        let mut name = [0u8; KEY_NAME_LEN];
        let mut aes_key = [0u8; 16];
        let mut hmac_key = [0u8; 16];
        name.copy_from_slice(&digest[..16]);
        aes_key.copy_from_slice(&digest[16..32]);
        hmac_key.copy_from_slice(&digest[32..48]);

        Self {
            secret,
            name,
            aes_key,
            hmac_key,
        }
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut secret = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        let key = Self::from_bytes(secret);
        secret.zeroize();
        key
    }

    /// Raw key material, as stored in key files and base64 blobs.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }

    /// Public 16-byte key name carried in the clear at the front of every ticket.
    pub fn name(&self) -> &[u8; KEY_NAME_LEN] {
        &self.name
    }

    /// Seal `state` into a ticket under this key with a random IV.
    pub fn seal(&self, state: &[u8]) -> Option<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        self.seal_with_iv(state, &iv)
    }

    fn seal_with_iv(&self, state: &[u8], iv: &[u8; IV_LEN]) -> Option<Vec<u8>> {
        let mut ticket = Vec::with_capacity(state.len() + TICKET_OVERHEAD);
        ticket.extend_from_slice(&self.name);
        ticket.extend_from_slice(iv);
        ticket.extend_from_slice(state);

        let mut cipher = Aes128Ctr::new_from_slices(&self.aes_key, iv).ok()?;
        cipher.apply_keystream(&mut ticket[KEY_NAME_LEN + IV_LEN..]);

        let mut mac = HmacSha256::new_from_slice(&self.hmac_key).ok()?;
        mac.update(&ticket);
        ticket.extend_from_slice(&mac.finalize().into_bytes());
        Some(ticket)
    }

    /// Open a ticket sealed under this key.
    ///
    /// Returns `None` when the key name differs, the MAC does not verify, or
    /// the ticket is too short to hold the envelope.
    pub fn open(&self, ticket: &[u8]) -> Option<Vec<u8>> {
        if ticket.len() < TICKET_OVERHEAD {
            return None;
        }
        if !bool::from(ticket[..KEY_NAME_LEN].ct_eq(&self.name)) {
            return None;
        }

        let (authenticated, tag) = ticket.split_at(ticket.len() - MAC_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key).ok()?;
        mac.update(authenticated);
        mac.verify_slice(tag).ok()?;

        let iv = &authenticated[KEY_NAME_LEN..KEY_NAME_LEN + IV_LEN];
        let mut state = authenticated[KEY_NAME_LEN + IV_LEN..].to_vec();
        let mut cipher = Aes128Ctr::new_from_slices(&self.aes_key, iv).ok()?;
        cipher.apply_keystream(&mut state);
        Some(state)
    }
}

impl Drop for SessionTicketKey {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.aes_key.zeroize();
        self.hmac_key.zeroize();
    }
}

impl PartialEq for SessionTicketKey {
    fn eq(&self, other: &Self) -> bool {
        self.secret.ct_eq(&other.secret).into()
    }
}

impl Eq for SessionTicketKey {}

impl std::fmt::Debug for SessionTicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTicketKey")
            .field("name", &hex::encode(self.name))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_recovers_state() {
        let key = SessionTicketKey::generate();
        let ticket = key.seal(b"resumption state").unwrap();
        assert_eq!(ticket.len(), b"resumption state".len() + TICKET_OVERHEAD);
        assert_eq!(&ticket[..16], key.name());
        assert_eq!(key.open(&ticket).unwrap(), b"resumption state");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = SessionTicketKey::from_bytes([7u8; KEY_LEN]);
        let b = SessionTicketKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(a.name(), b.name());

        let iv = [3u8; IV_LEN];
        assert_eq!(a.seal_with_iv(b"x", &iv), b.seal_with_iv(b"x", &iv));
    }

    #[test]
    fn other_key_cannot_open() {
        let key = SessionTicketKey::generate();
        let other = SessionTicketKey::generate();
        let ticket = key.seal(b"state").unwrap();
        assert!(other.open(&ticket).is_none());
    }

    #[test]
    fn tampered_ticket_is_rejected() {
        let key = SessionTicketKey::generate();
        let mut ticket = key.seal(b"state").unwrap();
        let mid = KEY_NAME_LEN + IV_LEN;
        ticket[mid] ^= 0x01;
        assert!(key.open(&ticket).is_none());
    }

    #[test]
    fn short_ticket_is_rejected() {
        let key = SessionTicketKey::generate();
        assert!(key.open(&[0u8; TICKET_OVERHEAD - 1]).is_none());
        assert!(key.open(&[]).is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let key = SessionTicketKey::from_bytes([0xAB; KEY_LEN]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("abababab"));
        assert!(rendered.contains("name"));
    }
}
