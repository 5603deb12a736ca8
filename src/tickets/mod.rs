//! Session ticket key lifecycle.
//!
//! # Data Flow
//! ```text
//! key source (base64 blob | key file)
//!     → ring.rs (KeyRing, atomic KeySnapshot)
//!     → ticketer.rs (rustls mints/opens tickets with the live snapshot)
//!     → hello inspection (opens client-presented tickets)
//!
//! Every 24h:
//!     rotation.rs → KeyRing::rotate → snapshot swap → on_rotate listeners
//! ```
//!
//! # Design Decisions
//! - Keys are ordered newest first; only entry 0 mints tickets
//! - In-memory rings rotate by circular shift, file-backed rings prepend a
//!   fresh key and may cap the window with `max_keys`
//! - Ticket envelope follows RFC 5077 §4 (AES-128-CTR + HMAC-SHA256)

pub mod key;
pub mod ring;
pub mod rotation;
pub mod ticketer;

pub use key::{SessionTicketKey, KEY_LEN};
pub use ring::{KeyRing, KeyRingError, KeySnapshot, KeySource};
pub use rotation::{spawn_rotation, DEFAULT_ROTATION_INTERVAL};
pub use ticketer::KeyRingTicketer;
