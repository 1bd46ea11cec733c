// ============================================================================
// Binlog Pump Client
// ============================================================================
//
// Side channel that ships replication-log records to a pump service. Dialing
// goes through the same bounded retrier as store opening, with its own
// policy so the worst-case wait can be tuned independently.
//
// ============================================================================

use crate::config::SessionConfig;
use crate::core::{DbError, Result};
use crate::util::{Attempt, RetryPolicy, run_with_retry};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

/// Default attempts when dialing a pump
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 3;

/// Default base interval between dial attempts
pub const DEFAULT_DIAL_INTERVAL: Duration = Duration::from_millis(10);

/// Established connection to a pump
#[async_trait]
pub trait PumpTransport: Send {
    /// Sends one binlog record
    async fn write_frame(&mut self, payload: &[u8]) -> Result<()>;
}

/// Establishes pump connections
#[async_trait]
pub trait PumpDialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Box<dyn PumpTransport>>;
}

/// Dials pumps over TCP. Frames are a big-endian `u32` length followed by the payload.
#[derive(Debug, Clone)]
pub struct TcpPumpDialer {
    connect_timeout: Duration,
}

impl TcpPumpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpPumpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl PumpTransport for TcpTransport {
    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| DbError::ExecutionError("binlog frame too large".into()))?;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl PumpDialer for TcpPumpDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn PumpTransport>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DbError::Backend(format!("dial {}: timed out", addr)))?
            .map_err(|err| DbError::Backend(format!("dial {}: {}", addr, err)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpTransport { stream }))
    }
}

/// Connected pump client
pub struct PumpClient {
    addr: String,
    transport: Box<dyn PumpTransport>,
    frames_written: u64,
}

impl PumpClient {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub async fn write_binlog(&mut self, payload: &[u8]) -> Result<()> {
        self.transport.write_frame(payload).await?;
        self.frames_written += 1;
        Ok(())
    }
}

impl std::fmt::Debug for PumpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpClient")
            .field("addr", &self.addr)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

/// Dials `addr` with the pump retry policy of `config`
pub async fn dial_pump_client(addr: &str, dialer: &dyn PumpDialer, config: &SessionConfig) -> Result<PumpClient> {
    dial_pump_client_with_retry(addr, dialer, &config.pump_retry).await
}

/// Dials `addr` through `dialer`, retrying transient failures per `policy`.
///
/// After the attempts are used up the dialer's last error is returned as is.
pub async fn dial_pump_client_with_retry(
    addr: &str,
    dialer: &dyn PumpDialer,
    policy: &RetryPolicy,
) -> Result<PumpClient> {
    policy.validate()?;
    if addr.trim().is_empty() {
        return Err(DbError::ParseError("pump address is empty".into()));
    }

    let transport = run_with_retry(policy, || async move {
        dialer.dial(addr).await.map_err(|err| {
            if err.is_retryable() {
                Attempt::Retry(err)
            } else {
                Attempt::Stop(err)
            }
        })
    })
    .await?;

    info!(%addr, "pump client connected");
    Ok(PumpClient {
        addr: addr.to_string(),
        transport,
        frames_written: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_dial_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut len = [0u8; 4];
            socket.read_exact(&mut len).await.unwrap();
            let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
            socket.read_exact(&mut payload).await.unwrap();
            payload
        });

        let dialer = TcpPumpDialer::default();
        let policy = RetryPolicy::linear(DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_INTERVAL);
        let mut client = dial_pump_client_with_retry(&addr, &dialer, &policy).await.unwrap();
        client.write_binlog(b"prewrite").await.unwrap();

        assert_eq!(client.frames_written(), 1);
        assert_eq!(server.await.unwrap(), b"prewrite".to_vec());
    }

    struct CountingDialer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PumpDialer for CountingDialer {
        async fn dial(&self, _addr: &str) -> Result<Box<dyn PumpTransport>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Backend("pump unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_config_pump_retry_sets_attempts() {
        let dialer = CountingDialer {
            calls: AtomicU32::new(0),
        };
        let config = SessionConfig::new().pump_retry(RetryPolicy::constant(5, Duration::from_millis(1)));

        let err = dial_pump_client("127.0.0.1:1", &dialer, &config).await.err().unwrap();
        assert_eq!(err.to_string(), "pump unreachable");
        assert_eq!(dialer.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_empty_address_is_rejected() {
        let dialer = TcpPumpDialer::default();
        let result = dial_pump_client_with_retry(" ", &dialer, &RetryPolicy::once()).await;
        assert!(matches!(result, Err(DbError::ParseError(_))));
    }
}
