//! Background key rotation task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::tickets::ring::KeyRing;

/// Default rotation period for session ticket keys.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn the single task that rotates `ring` every `interval` until shutdown.
///
/// The first rotation happens one full interval after start.
pub fn spawn_rotation(
    ring: Arc<KeyRing>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            file_backed = ring.is_file_backed(),
            "Session ticket key rotation started"
        );

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ring.rotate();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Key rotation received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::ring::KeySource;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rotates_on_each_tick_and_stops_on_shutdown() {
        let blob: Vec<u8> = (1..=3u8).flat_map(|i| [i; 32]).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(blob);
        let ring = Arc::new(KeyRing::initialize(KeySource::InMemory(encoded)).unwrap());

        let rotations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rotations);
        ring.on_rotate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = broadcast::channel(1);
        let task = spawn_rotation(Arc::clone(&ring), Duration::from_secs(60), rx);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rotations.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(100)).await;
        assert_eq!(rotations.load(Ordering::SeqCst), 2);

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
