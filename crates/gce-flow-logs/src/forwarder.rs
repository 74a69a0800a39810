// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::errors::ForwardError;

/// Transport for encoded wire records.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Writes `buf` as a single datagram. No retries.
    async fn send(&self, buf: &[u8]) -> Result<(), ForwardError>;
}

/// UDP exporter owning one socket connected to the collector for the process lifetime.
///
/// `send` only needs `&self`, so one instance is shared by every message task.
#[derive(Debug)]
pub struct UdpForwarder {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpForwarder {
    /// Resolves `address` (`host:port`, IPv4 only) and connects an ephemeral local socket to it.
    pub async fn connect(address: &str) -> Result<UdpForwarder, ForwardError> {
        let destination = tokio::net::lookup_host(address)
            .await
            .map_err(|source| ForwardError::Resolve {
                address: address.to_string(),
                source,
            })?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| ForwardError::NoIpv4Address(address.to_string()))?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(ForwardError::Bind)?;
        socket
            .connect(destination)
            .await
            .map_err(|source| ForwardError::Connect {
                address: destination.to_string(),
                source,
            })?;

        debug!("Exporting flow records to {}", destination);
        Ok(UdpForwarder {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

#[async_trait]
impl Forwarder for UdpForwarder {
    async fn send(&self, buf: &[u8]) -> Result<(), ForwardError> {
        let written = self.socket.send(buf).await?;
        if written != buf.len() {
            return Err(ForwardError::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        trace!("Sent {} bytes to {}", written, self.destination);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    async fn listener() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap().to_string();
        (socket, address)
    }

    #[tokio::test]
    async fn test_send_one_datagram() {
        let (collector, address) = listener().await;
        let forwarder = UdpForwarder::connect(&address).await.unwrap();
        assert_eq!(forwarder.destination().to_string(), address);

        forwarder.send(b"hello collector").await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), collector.recv_from(&mut buf))
            .await
            .expect("datagram never arrived")
            .unwrap();
        assert_eq!(&buf[..len], b"hello collector");
    }

    #[tokio::test]
    async fn test_concurrent_senders_share_one_socket() {
        let (collector, address) = listener().await;
        let forwarder = Arc::new(UdpForwarder::connect(&address).await.unwrap());

        let mut tasks = Vec::new();
        for i in 0u16..50 {
            let forwarder = Arc::clone(&forwarder);
            tasks.push(tokio::spawn(async move {
                forwarder.send(&i.to_le_bytes()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut seen = HashSet::new();
        let mut buf = [0u8; 8];
        while seen.len() < 50 {
            let (len, _) = timeout(Duration::from_secs(1), collector.recv_from(&mut buf))
                .await
                .expect("datagram never arrived")
                .unwrap();
            assert_eq!(len, 2);
            seen.insert(u16::from_le_bytes([buf[0], buf[1]]));
        }
        assert_eq!(seen, (0u16..50).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        assert!(matches!(
            UdpForwarder::connect("no-port-here").await,
            Err(ForwardError::Resolve { .. })
        ));
        assert!(matches!(
            UdpForwarder::connect("[::1]:8104").await,
            Err(ForwardError::NoIpv4Address(_))
        ));
    }
}
