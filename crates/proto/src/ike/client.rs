//! Asynchronous IKE client driver
//!
//! Owns the UDP socket and the timers, and serialises every external
//! input (datagrams, local requests, timer expirations) into the
//! [`IkeSession`] state machine's event queue. All handlers run to
//! completion; nothing inside the state machine blocks on I/O.
//!
//! # Example
//!
//! ```rust,no_run
//! use burrow_proto::ike::client::IkeClient;
//! use burrow_proto::ike::config::{AuthConfig, IkeSessionConfig};
//! use burrow_proto::ike::payload::Identification;
//! use burrow_proto::ike::session::SessionCallback;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IkeSessionConfig::builder()
//!         .with_server_address("203.0.113.1:500".parse()?)
//!         .with_local_identification(Identification::Fqdn("client.example.com".into()))
//!         .with_remote_identification(Identification::Fqdn("vpn.example.com".into()))
//!         .with_local_auth(AuthConfig::Psk(b"swordfish".to_vec()))
//!         .with_remote_auth(AuthConfig::Psk(b"swordfish".to_vec()))
//!         .build()?;
//!
//!     let mut client = IkeClient::open(config, None, None, None).await?;
//!
//!     while let Some(callback) = client.next_callback().await {
//!         match callback {
//!             SessionCallback::IkeEstablished => println!("tunnel up"),
//!             SessionCallback::IkeClosed { reason } => {
//!                 println!("tunnel down: {}", reason);
//!                 break;
//!             }
//!             other => println!("event: {:?}", other),
//!         }
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use super::config::IkeSessionConfig;
use super::constants::NON_ESP_MARKER;
use super::session::{
    IkeSession, LocalRequestKind, SessionAction, SessionCallback, SessionEvent,
};
use crate::ike::{Error, Result};
use burrow_platform::{ChildSaInstaller, SimAuthenticator, SubscriberIdSource};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

const EVENT_QUEUE_DEPTH: usize = 64;
const CALLBACK_QUEUE_DEPTH: usize = 64;

/// Prefix a datagram with the non-ESP marker for UDP-encapsulated IKE.
fn encapsulate(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(NON_ESP_MARKER.len() + bytes.len());
    out.extend_from_slice(&NON_ESP_MARKER);
    out.extend_from_slice(bytes);
    out
}

/// Strip the non-ESP marker from a received datagram, rejecting ESP
/// packets that share the port.
fn decapsulate(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < NON_ESP_MARKER.len() || bytes[..NON_ESP_MARKER.len()] != NON_ESP_MARKER {
        return None;
    }
    Some(&bytes[NON_ESP_MARKER.len()..])
}

/// An open IKE session driven by a background task
pub struct IkeClient {
    events: mpsc::Sender<SessionEvent>,
    callbacks: mpsc::Receiver<SessionCallback>,
    task: tokio::task::JoinHandle<()>,
}

impl IkeClient {
    /// Bind a socket, start the driver task, and kick off the
    /// IKE_SA_INIT/IKE_AUTH handshake.
    pub async fn open(
        config: IkeSessionConfig,
        sim: Option<Box<dyn SimAuthenticator>>,
        subscriber: Option<Box<dyn SubscriberIdSource>>,
        installer: Option<Box<dyn ChildSaInstaller>>,
    ) -> Result<Self> {
        let peer_addr = config.server_address;
        let udp_encap = config.udp_encap;
        let session = IkeSession::new(config, sim, subscriber)?;

        let local: SocketAddr = if peer_addr.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid bind address")
        } else {
            "[::]:0".parse().expect("valid bind address")
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer_addr).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (callbacks_tx, callbacks_rx) = mpsc::channel(CALLBACK_QUEUE_DEPTH);

        let task = tokio::spawn(run_driver(
            session,
            socket,
            udp_encap,
            events_rx,
            events_tx.clone(),
            callbacks_tx,
            installer,
        ));

        let client = IkeClient {
            events: events_tx,
            callbacks: callbacks_rx,
            task,
        };

        client
            .request(LocalRequestKind::CreateIke)
            .await?;

        Ok(client)
    }

    /// Enqueue a local request.
    pub async fn request(&self, kind: LocalRequestKind) -> Result<()> {
        self.events
            .send(SessionEvent::LocalRequest(kind))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Receive the next session callback, or `None` once the driver has
    /// stopped.
    pub async fn next_callback(&mut self) -> Option<SessionCallback> {
        self.callbacks.recv().await
    }

    /// Request an orderly teardown and wait for the driver to finish.
    pub async fn close(self) -> Result<()> {
        // The session may already be closed; a failed enqueue is fine
        let _ = self
            .events
            .send(SessionEvent::LocalRequest(LocalRequestKind::DeleteIke))
            .await;

        drop(self.events);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Driver task panicked: {}", e)))
    }
}

async fn run_driver(
    mut session: IkeSession,
    socket: UdpSocket,
    udp_encap: bool,
    mut events: mpsc::Receiver<SessionEvent>,
    loopback: mpsc::Sender<SessionEvent>,
    callbacks: mpsc::Sender<SessionCallback>,
    mut installer: Option<Box<dyn ChildSaInstaller>>,
) {
    let mut buf = vec![0u8; 65536];
    let mut retransmit_at: Option<Instant> = None;
    let mut await_at: Option<Instant> = None;
    let far_future = Duration::from_secs(24 * 60 * 60);

    loop {
        let retransmit_deadline =
            retransmit_at.unwrap_or_else(|| Instant::now() + far_future);
        let await_deadline = await_at.unwrap_or_else(|| Instant::now() + far_future);

        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            received = socket.recv(&mut buf) => match received {
                Ok(len) => {
                    let datagram = &buf[..len];
                    let payload = if udp_encap {
                        match decapsulate(datagram) {
                            Some(inner) => inner,
                            None => {
                                tracing::debug!("Dropping non-IKE datagram on NAT-T port");
                                continue;
                            }
                        }
                    } else {
                        datagram
                    };
                    SessionEvent::RxPacket(payload.to_vec())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Socket receive failed");
                    continue;
                }
            },
            _ = tokio::time::sleep_until(retransmit_deadline), if retransmit_at.is_some() => {
                retransmit_at = None;
                SessionEvent::RetransmitTimeout
            }
            _ = tokio::time::sleep_until(await_deadline), if await_at.is_some() => {
                await_at = None;
                SessionEvent::AwaitTimeout
            }
        };

        let actions = session.handle_event(event);
        let mut closed = false;

        for action in actions {
            match action {
                SessionAction::Send(bytes) => {
                    let datagram = if udp_encap {
                        encapsulate(&bytes)
                    } else {
                        bytes
                    };
                    if let Err(e) = socket.send(&datagram).await {
                        tracing::warn!(error = %e, "Socket send failed");
                    }
                }
                SessionAction::StartRetransmitTimer(delay) => {
                    retransmit_at = Some(Instant::now() + delay);
                }
                SessionAction::CancelRetransmitTimer => {
                    retransmit_at = None;
                }
                SessionAction::StartAwaitTimer(delay) => {
                    await_at = Some(Instant::now() + delay);
                }
                SessionAction::InstallChildSa { spi, inbound, keys } => {
                    if let Some(installer) = installer.as_mut() {
                        if let Err(e) = installer.install_child_sa(spi, inbound, keys) {
                            tracing::error!(error = %e, spi, "Child SA installation failed");
                            // Dataplane failures are fatal; tear the
                            // session down through the queue
                            let _ = loopback
                                .try_send(SessionEvent::LocalRequest(LocalRequestKind::DeleteIke));
                        }
                    }
                }
                SessionAction::DeleteChildSa { spi } => {
                    if let Some(installer) = installer.as_mut() {
                        if let Err(e) = installer.delete_child_sa(spi) {
                            tracing::warn!(error = %e, spi, "Child SA removal failed");
                        }
                    }
                }
                SessionAction::Callback(callback) => {
                    if matches!(callback, SessionCallback::IkeClosed { .. }) {
                        closed = true;
                    }
                    if callbacks.send(callback).await.is_err() {
                        // Caller went away; keep driving the session until
                        // it closes
                        tracing::debug!("Callback receiver dropped");
                    }
                }
            }
        }

        if closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::config::AuthConfig;
    use crate::ike::constants::{ExchangeType, IKE_HEADER_SIZE};
    use crate::ike::message::IkeHeader;
    use crate::ike::payload::Identification;

    #[test]
    fn test_encapsulation_roundtrip() {
        let bytes = vec![1, 2, 3, 4, 5];
        let encapsulated = encapsulate(&bytes);
        assert_eq!(encapsulated.len(), bytes.len() + 4);
        assert_eq!(&encapsulated[..4], &[0, 0, 0, 0]);
        assert_eq!(decapsulate(&encapsulated).unwrap(), &bytes[..]);
    }

    #[test]
    fn test_decapsulate_rejects_esp() {
        // An ESP packet starts with a non-zero SPI
        let esp = vec![0xAA, 0xBB, 0xCC, 0xDD, 1, 2, 3];
        assert!(decapsulate(&esp).is_none());
        assert!(decapsulate(&[0, 0]).is_none());
    }

    #[tokio::test]
    async fn test_open_sends_ike_sa_init() {
        // A fake gateway that just captures the first datagram
        let gateway = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = gateway.local_addr().unwrap();

        let config = IkeSessionConfig::builder()
            .with_server_address(gateway_addr)
            .with_local_identification(Identification::Fqdn("client.example.com".into()))
            .with_remote_identification(Identification::Fqdn("vpn.example.com".into()))
            .with_local_auth(AuthConfig::Psk(b"swordfish".to_vec()))
            .with_remote_auth(AuthConfig::Psk(b"swordfish".to_vec()))
            .build()
            .unwrap();

        let client = IkeClient::open(config, None, None, None).await.unwrap();

        let mut buf = vec![0u8; 65536];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), gateway.recv_from(&mut buf))
            .await
            .expect("no IKE_SA_INIT within timeout")
            .unwrap();

        assert!(len >= IKE_HEADER_SIZE);
        let header = IkeHeader::from_bytes(&buf[..len]).unwrap();
        assert_eq!(header.exchange_type, ExchangeType::IkeSaInit);
        assert_eq!(header.message_id, 0);
        assert_eq!(header.responder_spi, [0u8; 8]);
        assert!(header.flags.is_initiator());

        drop(client);
    }

    #[tokio::test]
    async fn test_open_with_nat_t_prepends_marker() {
        let gateway = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = gateway.local_addr().unwrap();

        let config = IkeSessionConfig::builder()
            .with_server_address(gateway_addr)
            .with_local_identification(Identification::Fqdn("client.example.com".into()))
            .with_remote_identification(Identification::Fqdn("vpn.example.com".into()))
            .with_local_auth(AuthConfig::Psk(b"swordfish".to_vec()))
            .with_remote_auth(AuthConfig::Psk(b"swordfish".to_vec()))
            .with_udp_encap()
            .build()
            .unwrap();

        let client = IkeClient::open(config, None, None, None).await.unwrap();

        let mut buf = vec![0u8; 65536];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), gateway.recv_from(&mut buf))
            .await
            .expect("no datagram within timeout")
            .unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
        assert!(IkeHeader::from_bytes(&buf[4..len]).is_ok());

        drop(client);
    }
}
