//! Target application reachability

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{VerifyError, VerifyResult};
use crate::scenario::origin_of;

/// Wait until the origin of `target` answers HTTP.
///
/// Any response counts, whatever its status: a single-page app may answer
/// unknown paths with 404 and still be up. Returns the number of attempts.
pub async fn wait_until_reachable(target: &str, timeout_duration: Duration) -> VerifyResult<usize> {
    let origin = origin_of(target);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < timeout_duration {
        attempts += 1;

        match client.get(origin).send().await {
            Ok(resp) => {
                info!("Target {} is up ({})", origin, resp.status());
                return Ok(attempts);
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} to start...", origin);
                }
                // Connection refused is expected while the dev server starts
                if !e.is_connect() {
                    warn!("Reachability check error: {}", e);
                }
            }
        }

        sleep(Duration::from_millis(250)).await;
    }

    Err(VerifyError::TargetUnreachable {
        url: origin.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let target = format!("http://127.0.0.1:{}/timelines/tl1", port);
        let attempts = wait_until_reachable(&target, Duration::from_secs(5)).await.unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let target = format!("http://127.0.0.1:{}/", port);
        let err = wait_until_reachable(&target, Duration::from_millis(600)).await.unwrap_err();
        assert!(matches!(err, VerifyError::TargetUnreachable { attempts, .. } if attempts >= 1));
    }
}
