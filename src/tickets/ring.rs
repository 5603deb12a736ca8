//! Session ticket key ring.
//!
//! # Responsibilities
//! - Load key material from a base64 blob or a legacy key file
//! - Publish the ordered key list (newest first) as an immutable snapshot
//! - Rotate keys and notify registered listeners
//! - Persist the key file after each file-backed rotation
//!
//! # Design Decisions
//! - Readers never lock: the snapshot lives behind `ArcSwap` and rotation
//!   publishes a fresh `Arc<KeySnapshot>`
//! - Rotations are serialized by a mutex so listeners observe them in order
//! - A failed key-file write never blocks rotation

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::observability::metrics;
use crate::tickets::key::{SessionTicketKey, KEY_LEN};

/// Errors raised while loading or persisting key material.
#[derive(Debug, Error)]
pub enum KeyRingError {
    /// Key material is unusable; fatal at startup.
    #[error("invalid session ticket keys: {0}")]
    Config(String),

    /// The key file could not be written.
    #[error("failed to persist session ticket keys to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the ring's key material comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Base64 of concatenated 32-byte keys. Rotation never touches disk.
    InMemory(String),
    /// Flat binary file of concatenated 32-byte keys, newest first.
    File {
        path: PathBuf,
        /// Keep at most this many keys after a rotation. `None` keeps all of them.
        max_keys: Option<usize>,
    },
}

/// Immutable, ordered view of the ring. Entry 0 mints new tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySnapshot {
    keys: Vec<SessionTicketKey>,
}

impl KeySnapshot {
    /// Split a blob of concatenated keys.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, KeyRingError> {
        if blob.is_empty() {
            return Err(KeyRingError::Config("no key material".into()));
        }
        if blob.len() % KEY_LEN != 0 {
            return Err(KeyRingError::Config(format!(
                "key material is {} bytes, not a multiple of {}",
                blob.len(),
                KEY_LEN
            )));
        }

        let keys = blob
            .chunks_exact(KEY_LEN)
            .map(|chunk| {
                let mut secret = [0u8; KEY_LEN];
                secret.copy_from_slice(chunk);
                SessionTicketKey::from_bytes(secret)
            })
            .collect();
        Ok(Self { keys })
    }

    /// Decode a base64 blob of concatenated keys.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyRingError> {
        let blob = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyRingError::Config(format!("keys are not valid base64: {}", e)))?;
        Self::from_bytes(&blob)
    }

    /// Build a snapshot from already constructed keys, newest first.
    pub fn from_keys(keys: Vec<SessionTicketKey>) -> Result<Self, KeyRingError> {
        if keys.is_empty() {
            return Err(KeyRingError::Config("no key material".into()));
        }
        Ok(Self { keys })
    }

    /// Concatenated key bytes, newest first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.keys.len() * KEY_LEN);
        for key in &self.keys {
            blob.extend_from_slice(key.as_bytes());
        }
        blob
    }

    /// Base64 rendering of [`KeySnapshot::to_bytes`].
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// The key used for new tickets.
    pub fn newest(&self) -> &SessionTicketKey {
        &self.keys[0]
    }

    /// All keys, newest first.
    pub fn keys(&self) -> &[SessionTicketKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Seal ticket state under the newest key.
    pub fn seal(&self, state: &[u8]) -> Option<Vec<u8>> {
        self.newest().seal(state)
    }

    /// Try every key, newest first, stopping at the first that opens the ticket.
    pub fn open(&self, ticket: &[u8]) -> Option<Vec<u8>> {
        self.keys.iter().find_map(|key| key.open(ticket))
    }

    /// The minting key (entry 0) moves to the back; the next key starts minting.
    fn shifted(&self) -> Self {
        let mut keys = self.keys.clone();
        keys.rotate_left(1);
        Self { keys }
    }

    /// A fresh key in front, trimmed to `max_keys` when set.
    fn prepended(&self, fresh: SessionTicketKey, max_keys: Option<usize>) -> Self {
        let mut keys = Vec::with_capacity(self.keys.len() + 1);
        keys.push(fresh);
        keys.extend(self.keys.iter().cloned());
        if let Some(max) = max_keys {
            keys.truncate(max.max(1));
        }
        Self { keys }
    }
}

/// Listener invoked with the new snapshot after every rotation.
pub type RotationListener = Box<dyn Fn(&KeySnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
enum Mode {
    InMemory,
    File { path: PathBuf, max_keys: Option<usize> },
}

/// Shared, rotating set of session ticket keys.
pub struct KeyRing {
    current: ArcSwap<KeySnapshot>,
    mode: Mode,
    listeners: Mutex<Vec<RotationListener>>,
    rotation: Mutex<()>,
}

impl KeyRing {
    /// Load the ring from its configured source.
    ///
    /// A missing key file is created with one freshly generated key.
    pub fn initialize(source: KeySource) -> Result<Self, KeyRingError> {
        match source {
            KeySource::InMemory(encoded) => {
                let snapshot = KeySnapshot::from_base64(&encoded)?;
                tracing::info!(keys = snapshot.len(), "Loaded in-memory session ticket keys");
                Ok(Self::with_mode(snapshot, Mode::InMemory))
            }
            KeySource::File { path, max_keys } => {
                let snapshot = load_or_create(&path)?;
                tracing::info!(
                    path = %path.display(),
                    keys = snapshot.len(),
                    "Loaded session ticket key file"
                );
                Ok(Self::with_mode(snapshot, Mode::File { path, max_keys }))
            }
        }
    }

    /// A single freshly generated in-memory key.
    pub fn generated() -> Self {
        let snapshot = KeySnapshot {
            keys: vec![SessionTicketKey::generate()],
        };
        Self::with_mode(snapshot, Mode::InMemory)
    }

    fn with_mode(snapshot: KeySnapshot, mode: Mode) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            mode,
            listeners: Mutex::new(Vec::new()),
            rotation: Mutex::new(()),
        }
    }

    /// The ordered key list, newest first.
    pub fn current_keys(&self) -> Arc<KeySnapshot> {
        self.current.load_full()
    }

    /// Whether rotation persists to a key file.
    pub fn is_file_backed(&self) -> bool {
        matches!(self.mode, Mode::File { .. })
    }

    /// Register a rotation listener.
    ///
    /// Listeners run synchronously on the rotating task and must not call
    /// back into [`KeyRing::on_rotate`].
    pub fn on_rotate<F>(&self, listener: F)
    where
        F: Fn(&KeySnapshot) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// Rotate once. Returns `false` when a single-key ring has nothing to rotate into.
    pub fn rotate(&self) -> bool {
        let _serialized = lock(&self.rotation);
        let current = self.current.load_full();
        if current.len() < 2 {
            tracing::debug!("Single session ticket key, skipping rotation");
            return false;
        }

        let next = match &self.mode {
            Mode::InMemory => current.shifted(),
            Mode::File { path, max_keys } => {
                let next = current.prepended(SessionTicketKey::generate(), *max_keys);
                if let Err(e) = persist(path, &next) {
                    tracing::warn!(error = %e, "Rotating session ticket keys in memory only");
                }
                next
            }
        };

        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        metrics::record_key_rotation();
        tracing::info!(keys = next.len(), "Rotated session ticket keys");

        for listener in lock(&self.listeners).iter() {
            listener(&next);
        }
        true
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("mode", &self.mode)
            .field("keys", &self.current.load().len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn load_or_create(path: &Path) -> Result<KeySnapshot, KeyRingError> {
    match fs::read(path) {
        Ok(blob) => KeySnapshot::from_bytes(&blob),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let snapshot = KeySnapshot {
                keys: vec![SessionTicketKey::generate()],
            };
            persist(path, &snapshot).map_err(|e| KeyRingError::Config(e.to_string()))?;
            tracing::info!(path = %path.display(), "Created new session ticket key file");
            Ok(snapshot)
        }
        Err(e) => Err(KeyRingError::Config(format!(
            "cannot read key file {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Rewrite the whole key file through a temporary sibling and rename.
pub fn persist(path: &Path, snapshot: &KeySnapshot) -> Result<(), KeyRingError> {
    let to_error = |source| KeyRingError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp).map_err(to_error)?;
    file.write_all(&snapshot.to_bytes()).map_err(to_error)?;
    file.sync_all().map_err(to_error)?;
    drop(file);
    fs::rename(&tmp, path).map_err(to_error)
}
