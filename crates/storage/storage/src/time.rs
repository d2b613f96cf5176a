//! Time sources for storages that cannot supply their own clock.
//!
//! The protocol clock is [`crate::storage::LockStorage::get_time`]. Backends
//! with a server-side clock (relational databases) answer from there; local
//! backends (memory, file system) delegate to a [`TimeProvider`]. The
//! default is the process clock, documented as the lower-correctness option;
//! [`NtpTimeProvider`] exists as a fallback shared source for deployments
//! where the backend has no clock but participants span machines.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::StorageError;

/// An authoritative time source. Accuracy matters less than consistency:
/// every participant must see the same, forward-moving clock.
#[async_trait]
pub trait TimeProvider: Send + Sync {
    async fn now(&self) -> Result<DateTime<Utc>, StorageError>;
}

/// The process wall clock.
///
/// Only correct when every participant shares the clock, i.e. single-machine
/// deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

#[async_trait]
impl TimeProvider for SystemTimeProvider {
    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        Ok(Utc::now())
    }
}

/// Public NTP servers queried by [`NtpTimeProvider`] when none are supplied.
pub const DEFAULT_NTP_SERVERS: &[&str] = &[
    "time.windows.com",
    "time.nist.gov",
    "time.google.com",
    "pool.ntp.org",
    "time.cloudflare.com",
];

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_EPOCH_DELTA: u64 = 2_208_988_800;

/// Per-server query timeout before falling through to the next server.
const NTP_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// SNTP v4 client querying a list of servers in order.
///
/// Returns the first server's answer; only when every server fails does the
/// call surface [`StorageError::TimeProviderUnavailable`].
pub struct NtpTimeProvider {
    servers: Vec<String>,
}

impl NtpTimeProvider {
    /// Query the given servers, falling back to [`DEFAULT_NTP_SERVERS`] when
    /// the list is empty. Inside a cloud network, pointing this at the
    /// provider's internal NTP endpoint is both faster and more reliable.
    #[must_use]
    pub fn new(servers: Vec<String>) -> Self {
        let servers = if servers.is_empty() {
            DEFAULT_NTP_SERVERS.iter().map(ToString::to_string).collect()
        } else {
            servers
        };
        Self { servers }
    }

    async fn query_server(server: &str) -> Result<DateTime<Utc>, StorageError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((server, 123_u16)).await?;

        // 48-byte SNTP request: LI = 0, version = 4, mode = 3 (client).
        let mut packet = [0_u8; 48];
        packet[0] = 0x23;
        socket.send(&packet).await?;

        let mut response = [0_u8; 48];
        let received = socket.recv(&mut response).await?;
        if received < 48 {
            return Err(StorageError::TimeProviderUnavailable(format!(
                "short NTP response from {server}: {received} bytes"
            )));
        }

        // Transmit timestamp: seconds + fraction, both big-endian u32,
        // at offset 40.
        let seconds = u64::from(u32::from_be_bytes([
            response[40],
            response[41],
            response[42],
            response[43],
        ]));
        let fraction = u64::from(u32::from_be_bytes([
            response[44],
            response[45],
            response[46],
            response[47],
        ]));

        let unix_seconds = seconds.checked_sub(NTP_UNIX_EPOCH_DELTA).ok_or_else(|| {
            StorageError::TimeProviderUnavailable(format!(
                "NTP timestamp from {server} predates the Unix epoch"
            ))
        })?;
        let nanos = u32::try_from((fraction * 1_000_000_000) >> 32).unwrap_or(0);

        Utc.timestamp_opt(
            i64::try_from(unix_seconds).map_err(|_| {
                StorageError::TimeProviderUnavailable(format!(
                    "NTP timestamp from {server} out of range"
                ))
            })?,
            nanos,
        )
        .single()
        .ok_or_else(|| {
            StorageError::TimeProviderUnavailable(format!("unrepresentable NTP time from {server}"))
        })
    }
}

impl Default for NtpTimeProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl TimeProvider for NtpTimeProvider {
    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        let mut last_error = None;

        for server in &self.servers {
            match tokio::time::timeout(NTP_QUERY_TIMEOUT, Self::query_server(server)).await {
                Ok(Ok(now)) => return Ok(now),
                Ok(Err(e)) => {
                    debug!(server = %server, error = %e, "NTP query failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    debug!(server = %server, "NTP query timed out");
                    last_error = Some(format!("query to {server} timed out"));
                }
            }
        }

        Err(StorageError::TimeProviderUnavailable(
            last_error.unwrap_or_else(|| "no NTP servers configured".to_owned()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_provider_moves_forward() {
        let provider = SystemTimeProvider;
        let a = provider.now().await.unwrap();
        let b = provider.now().await.unwrap();
        assert!(b >= a);
    }

    #[test]
    fn empty_server_list_falls_back_to_defaults() {
        let provider = NtpTimeProvider::new(Vec::new());
        assert_eq!(provider.servers.len(), DEFAULT_NTP_SERVERS.len());
    }
}
