//! Bidirectional byte relay with per-direction counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// How long the surviving direction may run once the other has ended.
pub const RELAY_LINGER: Duration = Duration::from_secs(2);

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_site: u64,
    pub site_to_client: u64,
}

/// Copy bytes between `client` and `site` until one side is done.
///
/// EOF or an error on either read side shuts down the opposite writer.
/// The other direction then gets [`RELAY_LINGER`] to finish before both
/// ends are dropped.
pub async fn relay<C, S>(client: C, site: S) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (site_read, site_write) = tokio::io::split(site);
    let sent = AtomicU64::new(0);
    let received = AtomicU64::new(0);

    let upstream = pump(client_read, site_write, &sent);
    let downstream = pump(site_read, client_write, &received);
    tokio::pin!(upstream, downstream);

    tokio::select! {
        _ = &mut upstream => {
            let _ = timeout(RELAY_LINGER, &mut downstream).await;
        }
        _ = &mut downstream => {
            let _ = timeout(RELAY_LINGER, &mut upstream).await;
        }
    }

    RelayStats {
        client_to_site: sent.load(Ordering::Relaxed),
        site_to_client: received.load(Ordering::Relaxed),
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W, counter: &AtomicU64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if writer.write_all(&buf[..n]).await.is_err() {
                    return;
                }
                counter.fetch_add(n as u64, Ordering::Relaxed);
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn counts_both_directions() {
        let (mut client, client_side) = duplex(1024);
        let (site_side, mut site) = duplex(1024);
        let relay = tokio::spawn(relay(client_side, site_side));

        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut request = [0u8; 18];
        site.read_exact(&mut request).await.unwrap();
        assert_eq!(&request, b"GET / HTTP/1.0\r\n\r\n");

        site.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
        drop(site);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.0 200 OK\r\n\r\n");
        drop(client);

        let stats = relay.await.unwrap();
        assert_eq!(
            stats,
            RelayStats {
                client_to_site: 18,
                site_to_client: 19,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_client_is_cut_after_site_closes() {
        let (_client, client_side) = duplex(64);
        let (site_side, site) = duplex(64);
        drop(site);

        let stats = relay(client_side, site_side).await;
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_site_is_cut_after_client_closes() {
        let (client, client_side) = duplex(64);
        let (site_side, _site) = duplex(64);
        drop(client);

        let stats = timeout(Duration::from_secs(3600), relay(client_side, site_side))
            .await
            .expect("relay must end once the client has gone");
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn site_reply_within_linger_still_reaches_client() {
        let (mut client, client_side) = duplex(1024);
        let (site_side, mut site) = duplex(1024);
        let relay = tokio::spawn(relay(client_side, site_side));

        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        let mut request = Vec::new();
        site.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"ping");
        site.write_all(b"pong").await.unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        let stats = relay.await.unwrap();
        assert_eq!(
            stats,
            RelayStats {
                client_to_site: 4,
                site_to_client: 4,
            }
        );
    }
}
