//! IKE session state machine
//!
//! One [`IkeSession`] drives a single initiator-side IKE SA through its
//! life: the IKE_SA_INIT/IKE_AUTH handshake (with optional EAP), child SA
//! negotiation, INFORMATIONAL exchanges, rekeys, and teardown.
//!
//! The machine is synchronous and run-to-completion: every external input
//! arrives as a [`SessionEvent`], every effect leaves as a
//! [`SessionAction`]. The driver in [`crate::ike::client`] owns the socket
//! and timers and serialises events through a queue, so handlers never
//! block.
//!
//! # States
//!
//! ```text
//! Initial → CreateIkeLocalInit → CreateIkeLocalAuth → Idle ⇄ Receiving
//!
//! Idle → RekeyIkeLocalCreate ───────────────► RekeyIkeLocalDelete ──► Idle
//!           │ (peer rekey request crosses)
//!           ▼
//!        SimulRekeyIkeLocalCreate ──► SimulRekeyIkeLocalDeleteRemoteDelete
//!                                        │                │
//!                          SimulRekeyIkeLocalDelete   SimulRekeyIkeRemoteDelete
//!                                        └───────► Idle ◄┘
//!
//! Idle → RekeyIkeRemoteDelete → Idle        Idle → DeleteIkeLocal → Closed
//! ```
//!
//! Simultaneous rekeys are resolved by comparing each candidate SA's
//! concatenated creation nonces; both peers independently keep the greater
//! one and delete the old SA via INFORMATIONAL exchanges. A request
//! arriving on the surviving SA during the delete phase is deferred and
//! doubles as the peer's acknowledgement that the rekey completed.

use super::auth as ike_auth;
use super::child::{
    self, allocate_child_spi, default_traffic_selectors, ChildSaPair, ChildSaState,
};
use super::config::{AuthConfig, IkeSessionConfig};
use super::constants::{ExchangeType, IkeFlags, NotifyType, PayloadType};
use super::crypto::{DhExchange, DhGroup, KeyMaterial};
use super::message::{IkeHeader, IkeMessage};
use super::payload::{
    ConfigAttribute, ConfigPayload, ConfigType, DeletePayload, IdPayload, IkePayload, KePayload,
    NoncePayload, NotifyPayload, SaPayload,
};
use super::proposal::{select_proposal, Proposal, ProtocolId};
use super::retransmit::RetransmitSchedule;
use super::sa::IkeSaRecord;
use super::spi::IkeSpi;
use crate::eap::{EapAuthenticator, EapResult};
use crate::ike::{logging, Error, ErrorKind, Result};
use burrow_platform::{ChildSaKeys, SimAuthenticator, SubscriberIdSource};
use rand::RngCore;
use std::collections::VecDeque;
use std::time::Duration;

/// How long the machine waits for the peer's half of a rekey cleanup
pub const AWAIT_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No exchange started
    Initial,
    /// IKE_SA_INIT request outstanding
    CreateIkeLocalInit,
    /// IKE_AUTH exchange (possibly multiple EAP rounds) outstanding
    CreateIkeLocalAuth,
    /// Established, no exchange outstanding
    Idle,
    /// Processing an inbound request
    Receiving,
    /// Our rekey request is outstanding
    RekeyIkeLocalCreate,
    /// Our rekey request is outstanding and the peer's rekey crossed it
    SimulRekeyIkeLocalCreate,
    /// Collision resolved; both delete exchanges outstanding
    SimulRekeyIkeLocalDeleteRemoteDelete,
    /// Collision resolved; only our delete's response outstanding
    SimulRekeyIkeLocalDelete,
    /// Collision resolved; only the peer's delete request outstanding
    SimulRekeyIkeRemoteDelete,
    /// Clean local rekey; deleting the old SA
    RekeyIkeLocalDelete,
    /// Peer rekeyed; waiting for it to delete the old SA
    RekeyIkeRemoteDelete,
    /// Tearing down at local request
    DeleteIkeLocal,
    /// Terminal
    Closed,
}

/// Kinds of locally requested procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRequestKind {
    /// Open the session
    CreateIke,
    /// Close the session
    DeleteIke,
    /// Rekey the IKE SA
    RekeyIke,
    /// Liveness / generic INFORMATIONAL
    Info,
    /// Negotiate an additional child SA
    CreateChild,
    /// Delete the active child SAs
    DeleteChild,
    /// Rekey the oldest active child SA
    RekeyChild,
}

/// Inputs to the state machine
#[derive(Debug)]
pub enum SessionEvent {
    /// A locally requested procedure
    LocalRequest(LocalRequestKind),
    /// A datagram from the socket
    RxPacket(Vec<u8>),
    /// Payloads handed over by a child negotiation to ship in a
    /// CREATE_CHILD_SA request
    ChildPayloads(Vec<IkePayload>),
    /// The retransmission timer fired
    RetransmitTimeout,
    /// The cleanup-await timer fired
    AwaitTimeout,
}

/// Callbacks surfaced to the caller
#[derive(Debug)]
pub enum SessionCallback {
    /// The IKE SA is authenticated and established
    IkeEstablished,
    /// A child SA pair is installed
    ChildEstablished {
        /// Identifier for later delete/rekey calls
        child_id: u32,
        /// Inbound (remote→local) SPI
        inbound_spi: u32,
        /// Outbound (local→remote) SPI
        outbound_spi: u32,
    },
    /// A child SA pair was removed
    ChildClosed {
        /// The identifier from `ChildEstablished`
        child_id: u32,
    },
    /// The IKE SA is gone
    IkeClosed {
        /// Why the session ended
        reason: String,
    },
    /// A recoverable or fatal error
    Error {
        /// Coarse classification
        kind: ErrorKind,
        /// Human-readable detail
        detail: String,
    },
    /// Payloads received in response to a `ChildPayloads` hand-off
    ChildPayloadsReceived(Vec<IkePayload>),
}

/// Effects the driver must perform
#[derive(Debug)]
pub enum SessionAction {
    /// Transmit a datagram to the peer
    Send(Vec<u8>),
    /// (Re)arm the retransmission timer
    StartRetransmitTimer(Duration),
    /// Cancel the retransmission timer
    CancelRetransmitTimer,
    /// Arm the cleanup-await timer
    StartAwaitTimer(Duration),
    /// Install a child SA into the dataplane
    InstallChildSa {
        /// SA SPI
        spi: u32,
        /// Direction
        inbound: bool,
        /// Keying material
        keys: ChildSaKeys,
    },
    /// Remove a child SA from the dataplane
    DeleteChildSa {
        /// SA SPI
        spi: u32,
    },
    /// Notify the caller
    Callback(SessionCallback),
}

/// Exchange subtype of an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeSubtype {
    /// IKE_SA_INIT
    IkeInit,
    /// IKE_AUTH
    IkeAuth,
    /// CREATE_CHILD_SA creating a fresh child
    CreateChild,
    /// CREATE_CHILD_SA rekeying a child SA
    RekeyChild,
    /// CREATE_CHILD_SA rekeying the IKE SA
    RekeyIke,
    /// INFORMATIONAL deleting the IKE SA
    DeleteIke,
    /// INFORMATIONAL deleting child SAs
    DeleteChild,
    /// Any other INFORMATIONAL
    GenericInfo,
}

impl ExchangeSubtype {
    /// Infer the subtype of a decoded request.
    ///
    /// An IKE-SA delete supersedes any co-resident child deletes in the
    /// same message.
    pub fn infer(message: &IkeMessage) -> Result<Self> {
        match message.header.exchange_type {
            ExchangeType::IkeSaInit => Ok(ExchangeSubtype::IkeInit),
            ExchangeType::IkeAuth => Ok(ExchangeSubtype::IkeAuth),
            ExchangeType::CreateChildSa => {
                let rekey_notify = message.payloads.iter().find_map(|p| match p {
                    IkePayload::Notify(n) if n.typed() == Some(NotifyType::RekeySa) => Some(n),
                    _ => None,
                });
                match rekey_notify {
                    None => Ok(ExchangeSubtype::CreateChild),
                    Some(n) if n.protocol_id == 0 => Ok(ExchangeSubtype::RekeyIke),
                    Some(n) if n.protocol_id == ProtocolId::Esp.to_u8() => {
                        Ok(ExchangeSubtype::RekeyChild)
                    }
                    Some(n) => Err(Error::InvalidSyntax(format!(
                        "REKEY_SA with unexpected protocol {}",
                        n.protocol_id
                    ))),
                }
            }
            ExchangeType::Informational => {
                let mut saw_child_delete = false;
                for payload in &message.payloads {
                    if let IkePayload::Delete(d) = payload {
                        if d.protocol_id == ProtocolId::Ike {
                            return Ok(ExchangeSubtype::DeleteIke);
                        }
                        saw_child_delete = true;
                    }
                }
                if saw_child_delete {
                    Ok(ExchangeSubtype::DeleteChild)
                } else {
                    Ok(ExchangeSubtype::GenericInfo)
                }
            }
        }
    }
}

struct InitScratch {
    local_spi: Option<IkeSpi>,
    dh: Option<DhExchange>,
    nonce_i: Vec<u8>,
    request_bytes: Vec<u8>,
    response_bytes: Vec<u8>,
}

struct RekeyScratch {
    local_spi: Option<IkeSpi>,
    dh: Option<DhExchange>,
    nonce: Vec<u8>,
}

struct PendingChild {
    kind: LocalRequestKind,
    inbound_spi: u32,
    nonce_i: Vec<u8>,
    rekeyed_child: Option<u32>,
}

enum PendingExchange {
    Info,
    DeleteChild(Vec<u32>),
    Child(PendingChild),
    Passthrough,
}

/// The IKE session state machine (initiator role)
pub struct IkeSession {
    config: IkeSessionConfig,
    state: SessionState,
    sa: Option<IkeSaRecord>,
    init: Option<InitScratch>,
    rekey: Option<RekeyScratch>,
    local_rekey_sa: Option<IkeSaRecord>,
    remote_rekey_sa: Option<IkeSaRecord>,
    survivor_is_local: bool,
    retransmit: Option<RetransmitSchedule>,
    pending_exchange: Option<PendingExchange>,
    deferred: VecDeque<SessionEvent>,
    children: Vec<ChildSaPair>,
    next_child_id: u32,
    eap: Option<EapAuthenticator>,
    eap_msk: Option<Vec<u8>>,
    sim: Option<Box<dyn SimAuthenticator>>,
    subscriber: Option<Box<dyn SubscriberIdSource>>,
}

impl IkeSession {
    /// Create a session in the `Initial` state.
    ///
    /// The SIM applet and subscriber source are only consulted when the
    /// configuration selects a SIM/AKA EAP method.
    pub fn new(
        config: IkeSessionConfig,
        sim: Option<Box<dyn SimAuthenticator>>,
        subscriber: Option<Box<dyn SubscriberIdSource>>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(IkeSession {
            config,
            state: SessionState::Initial,
            sa: None,
            init: None,
            rekey: None,
            local_rekey_sa: None,
            remote_rekey_sa: None,
            survivor_is_local: false,
            retransmit: None,
            pending_exchange: None,
            deferred: VecDeque::new(),
            children: Vec::new(),
            next_child_id: 1,
            eap: None,
            eap_msk: None,
            sim,
            subscriber,
        })
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Active child SA identifiers
    pub fn child_ids(&self) -> Vec<u32> {
        self.children
            .iter()
            .filter(|c| c.state == ChildSaState::Active)
            .map(|c| c.child_id)
            .collect()
    }

    /// Feed one event through the machine, collecting the effects.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if self.state == SessionState::Closed {
            if let SessionEvent::LocalRequest(_) = event {
                actions.push(error_callback(&Error::SessionClosed));
            }
            return actions;
        }

        match event {
            SessionEvent::LocalRequest(kind) => self.handle_local_request(kind, &mut actions),
            SessionEvent::RxPacket(bytes) => self.handle_rx_packet(bytes, &mut actions),
            SessionEvent::ChildPayloads(payloads) => {
                self.handle_child_payloads(payloads, &mut actions)
            }
            SessionEvent::RetransmitTimeout => self.handle_retransmit_timeout(&mut actions),
            SessionEvent::AwaitTimeout => self.handle_await_timeout(&mut actions),
        }

        actions
    }

    // Local requests

    fn handle_local_request(&mut self, kind: LocalRequestKind, actions: &mut Vec<SessionAction>) {
        match (self.state, kind) {
            (SessionState::Initial, LocalRequestKind::CreateIke) => {
                if let Err(e) = self.start_init(actions) {
                    self.fail(e, actions);
                }
            }
            // Nothing on the wire yet; closing is purely local
            (
                SessionState::Initial | SessionState::CreateIkeLocalInit,
                LocalRequestKind::DeleteIke,
            ) => {
                self.close_session("Closed before establishment".into(), actions);
            }
            (SessionState::Idle, LocalRequestKind::DeleteIke) => {
                if let Err(e) = self.start_delete_ike(actions) {
                    self.fail(e, actions);
                }
            }
            (SessionState::Idle, LocalRequestKind::RekeyIke) => {
                if let Err(e) = self.start_rekey_ike(actions) {
                    self.fail(e, actions);
                }
            }
            (SessionState::Idle, LocalRequestKind::Info) => {
                if let Err(e) = self.start_info(actions) {
                    self.fail(e, actions);
                }
            }
            (
                SessionState::Idle,
                LocalRequestKind::CreateChild
                | LocalRequestKind::DeleteChild
                | LocalRequestKind::RekeyChild,
            ) => {
                if let Err(e) = self.start_child_exchange(kind, actions) {
                    self.fail(e, actions);
                }
            }
            (SessionState::Initial, _) | (_, LocalRequestKind::CreateIke) => {
                actions.push(error_callback(&Error::InvalidState(format!(
                    "Local request {:?} not valid in state {:?}",
                    kind, self.state
                ))));
            }
            // Busy with another exchange: replay once Idle again
            _ => self
                .deferred
                .push_back(SessionEvent::LocalRequest(kind)),
        }
    }

    fn start_init(&mut self, actions: &mut Vec<SessionAction>) -> Result<()> {
        let local_spi = IkeSpi::allocate(self.config.server_address.ip())?;
        let dh = DhExchange::new(self.config.initial_dh_group()?)?;
        let mut nonce = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);

        let header = IkeHeader::new(
            local_spi.to_bytes(),
            [0u8; 8],
            PayloadType::SA.to_u8(),
            ExchangeType::IkeSaInit,
            IkeFlags::request(true),
            0,
            0,
        );

        let message = IkeMessage::new(
            header,
            vec![
                IkePayload::Sa(SaPayload::new(self.config.sa_proposals.clone())),
                IkePayload::Ke(KePayload::new(
                    dh.group().transform_id(),
                    dh.public_key().to_vec(),
                )),
                IkePayload::Nonce(NoncePayload::new(nonce.clone())?),
            ],
        );
        let bytes = message.encode_plain();

        self.init = Some(InitScratch {
            local_spi: Some(local_spi),
            dh: Some(dh),
            nonce_i: nonce,
            request_bytes: bytes.clone(),
            response_bytes: Vec::new(),
        });

        self.transition(SessionState::CreateIkeLocalInit);
        self.send_request(bytes, actions);
        Ok(())
    }

    fn start_delete_ike(&mut self, actions: &mut Vec<SessionAction>) -> Result<()> {
        let message = {
            let sa = self.current_sa()?;
            IkeMessage::new(
                sa.header(ExchangeType::Informational, 0, false),
                vec![IkePayload::Delete(DeletePayload::delete_ike_sa())],
            )
        };
        let bytes = self.seal_request_on_current(message)?;

        self.transition(SessionState::DeleteIkeLocal);
        self.send_request(bytes, actions);
        Ok(())
    }

    fn start_rekey_ike(&mut self, actions: &mut Vec<SessionAction>) -> Result<()> {
        let group = {
            let sa = self.current_sa()?;
            DhGroup::from_transform_id(sa.algorithms.dh_group).ok_or_else(|| {
                Error::Internal("Negotiated DH group lost support".into())
            })?
        };

        let local_spi = IkeSpi::allocate(self.config.server_address.ip())?;
        let dh = DhExchange::new(group)?;
        let mut nonce = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);

        let proposals: Vec<Proposal> = self
            .config
            .sa_proposals
            .iter()
            .cloned()
            .map(|p| p.with_spi(local_spi.to_bytes().to_vec()))
            .collect();

        let message = {
            let sa = self.current_sa()?;
            IkeMessage::new(
                sa.header(ExchangeType::CreateChildSa, 0, false),
                vec![
                    IkePayload::Notify(NotifyPayload {
                        protocol_id: 0,
                        spi: Vec::new(),
                        notify_type: NotifyType::RekeySa.to_u16(),
                        data: Vec::new(),
                    }),
                    IkePayload::Sa(SaPayload::new(proposals)),
                    IkePayload::Nonce(NoncePayload::new(nonce.clone())?),
                    IkePayload::Ke(KePayload::new(
                        group.transform_id(),
                        dh.public_key().to_vec(),
                    )),
                ],
            )
        };
        let bytes = self.seal_request_on_current(message)?;

        self.rekey = Some(RekeyScratch {
            local_spi: Some(local_spi),
            dh: Some(dh),
            nonce,
        });

        logging::log_ike_rekey_start(
            &self.current_sa()?.initiator_spi_bytes(),
            &self.current_sa()?.responder_spi_bytes(),
        );
        self.transition(SessionState::RekeyIkeLocalCreate);
        self.send_request(bytes, actions);
        Ok(())
    }

    fn start_info(&mut self, actions: &mut Vec<SessionAction>) -> Result<()> {
        let message = {
            let sa = self.current_sa()?;
            IkeMessage::new(sa.header(ExchangeType::Informational, 0, false), Vec::new())
        };
        let bytes = self.seal_request_on_current(message)?;

        self.pending_exchange = Some(PendingExchange::Info);
        self.send_request(bytes, actions);
        Ok(())
    }

    fn start_child_exchange(
        &mut self,
        kind: LocalRequestKind,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        match kind {
            LocalRequestKind::DeleteChild => {
                let spis: Vec<u32> = self
                    .children
                    .iter()
                    .filter(|c| c.state == ChildSaState::Active)
                    .map(|c| c.inbound_spi)
                    .collect();
                if spis.is_empty() {
                    return Err(Error::InvalidState("No active child SAs to delete".into()));
                }

                let message = {
                    let sa = self.current_sa()?;
                    IkeMessage::new(
                        sa.header(ExchangeType::Informational, 0, false),
                        vec![IkePayload::Delete(DeletePayload::delete_child_sas(
                            spis.iter().map(|s| s.to_be_bytes().to_vec()).collect(),
                        ))],
                    )
                };
                let bytes = self.seal_request_on_current(message)?;
                self.pending_exchange = Some(PendingExchange::DeleteChild(spis));
                self.send_request(bytes, actions);
            }
            LocalRequestKind::CreateChild | LocalRequestKind::RekeyChild => {
                let rekeyed_child = if kind == LocalRequestKind::RekeyChild {
                    let child = self
                        .children
                        .iter()
                        .find(|c| c.state == ChildSaState::Active)
                        .ok_or_else(|| {
                            Error::InvalidState("No active child SA to rekey".into())
                        })?;
                    Some(child.child_id)
                } else {
                    None
                };

                let inbound_spi = allocate_child_spi();
                let mut nonce = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut nonce);

                let proposals: Vec<Proposal> = self
                    .config
                    .child_proposals
                    .iter()
                    .cloned()
                    .map(|p| p.with_spi(inbound_spi.to_be_bytes().to_vec()))
                    .collect();

                let mut payloads = Vec::new();
                if let Some(child_id) = rekeyed_child {
                    let child = self
                        .children
                        .iter()
                        .find(|c| c.child_id == child_id)
                        .expect("selected above");
                    payloads.push(IkePayload::Notify(NotifyPayload::rekey_sa(
                        child.inbound_spi.to_be_bytes().to_vec(),
                    )));
                }
                payloads.push(IkePayload::Sa(SaPayload::new(proposals)));
                payloads.push(IkePayload::Nonce(NoncePayload::new(nonce.clone())?));
                payloads.push(IkePayload::TsInit(default_traffic_selectors()));
                payloads.push(IkePayload::TsResp(default_traffic_selectors()));

                let message = {
                    let sa = self.current_sa()?;
                    IkeMessage::new(sa.header(ExchangeType::CreateChildSa, 0, false), payloads)
                };
                let bytes = self.seal_request_on_current(message)?;

                self.pending_exchange = Some(PendingExchange::Child(PendingChild {
                    kind,
                    inbound_spi,
                    nonce_i: nonce,
                    rekeyed_child,
                }));
                self.send_request(bytes, actions);
            }
            _ => unreachable!("filtered by caller"),
        }
        Ok(())
    }

    fn handle_child_payloads(
        &mut self,
        payloads: Vec<IkePayload>,
        actions: &mut Vec<SessionAction>,
    ) {
        if self.state != SessionState::Idle {
            self.deferred
                .push_back(SessionEvent::ChildPayloads(payloads));
            return;
        }

        let result = (|| -> Result<Vec<u8>> {
            let message = {
                let sa = self.current_sa()?;
                IkeMessage::new(sa.header(ExchangeType::CreateChildSa, 0, false), payloads)
            };
            self.seal_request_on_current(message)
        })();

        match result {
            Ok(bytes) => {
                self.pending_exchange = Some(PendingExchange::Passthrough);
                self.send_request(bytes, actions);
            }
            Err(e) => self.fail(e, actions),
        }
    }

    // Packet handling

    fn handle_rx_packet(&mut self, bytes: Vec<u8>, actions: &mut Vec<SessionAction>) {
        let header = match IkeHeader::from_bytes(&bytes) {
            Ok(header) => header,
            Err(e) => {
                // Unknown exchange types are fatal; anything else on
                // unauthenticated bytes is dropped silently
                if matches!(e, Error::UnsupportedExchangeType(_)) {
                    self.fail(e, actions);
                } else {
                    tracing::debug!(error = %e, "Dropping undecodable datagram");
                }
                return;
            }
        };

        if self.state == SessionState::CreateIkeLocalInit {
            if let Err(e) = self.process_init_response(&bytes, &header, actions) {
                // Errors while the SA is unauthenticated tear the session
                // down locally; there is nothing trustworthy to answer
                self.fail(e, actions);
            }
            return;
        }

        // Route to the record owning this SPI pair
        let spi_pair = (
            u64::from_be_bytes(header.initiator_spi),
            u64::from_be_bytes(header.responder_spi),
        );

        let on_survivor = self.surviving_candidate_pair() == Some(spi_pair)
            && !header.flags.is_response();
        if on_survivor && self.in_rekey_delete_phase() {
            // The peer is already using the new SA: take it as the
            // acknowledgement that the rekey completed, finish cleanup,
            // and replay the packet on the promoted SA
            tracing::debug!("Request on surviving SA during delete phase; completing rekey");
            self.deferred.push_back(SessionEvent::RxPacket(bytes));
            self.complete_rekey(actions);
            return;
        }

        let is_response = header.flags.is_response();
        let decoded = match self.record_for(spi_pair) {
            Some(record) => record.decode_and_decrypt(&bytes).and_then(|message| {
                record
                    .record_received(header.message_id, !is_response)
                    .map(|_| message)
            }),
            None => {
                tracing::debug!(?spi_pair, "Datagram for unknown SA; dropping");
                return;
            }
        };

        let message = match decoded {
            Ok(message) => message,
            Err(Error::IntegrityCheckFailed) => {
                // Fatal on an authenticated SA
                self.fail(Error::IntegrityCheckFailed, actions);
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping message");
                return;
            }
        };

        if is_response {
            actions.push(SessionAction::CancelRetransmitTimer);
            self.retransmit = None;
            if let Err(e) = self.process_response(spi_pair, message, actions) {
                self.handle_exchange_error(e, actions);
            }
        } else {
            let previous = self.state;
            self.transition(SessionState::Receiving);
            let result = self.process_request(previous, spi_pair, message, actions);
            if self.state == SessionState::Receiving {
                self.transition(previous);
            }
            if let Err(e) = result {
                self.handle_exchange_error(e, actions);
            }
        }
    }

    fn process_init_response(
        &mut self,
        bytes: &[u8],
        header: &IkeHeader,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        if !header.flags.is_response() || header.message_id != 0 {
            return Err(Error::InvalidSyntax(
                "Unexpected message during IKE_SA_INIT".into(),
            ));
        }

        let message = IkeMessage::decode_plain(bytes)?;

        // A bare error notify ends the negotiation
        for payload in &message.payloads {
            if let IkePayload::Notify(n) = payload {
                if n.is_error() {
                    return Err(Error::AuthenticationFailed(format!(
                        "Gateway rejected IKE_SA_INIT with notify {}",
                        n.notify_type
                    )));
                }
            }
        }

        let sa_payload = message
            .find(|p| match p {
                IkePayload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("IKE_SA_INIT response missing SA".into()))?;
        let ke_payload = message
            .find(|p| match p {
                IkePayload::Ke(ke) => Some(ke),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("IKE_SA_INIT response missing KE".into()))?;
        let nonce_payload = message
            .find(|p| match p {
                IkePayload::Nonce(n) => Some(n),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("IKE_SA_INIT response missing Nonce".into()))?;

        let selected = select_proposal(&sa_payload.proposals, &self.config.sa_proposals)?.clone();

        let scratch = self
            .init
            .as_mut()
            .ok_or_else(|| Error::Internal("INIT scratch missing".into()))?;
        scratch.response_bytes = bytes.to_vec();

        let local_spi = scratch
            .local_spi
            .take()
            .ok_or_else(|| Error::Internal("Local SPI already consumed".into()))?;
        let remote_spi = IkeSpi::reserve(
            self.config.server_address.ip(),
            u64::from_be_bytes(header.responder_spi),
        )?;

        let shared_secret = scratch
            .dh
            .take()
            .ok_or_else(|| Error::Internal("DH exchange already consumed".into()))?
            .compute_shared_secret(&ke_payload.key_data)?;

        let nonce_i = scratch.nonce_i.clone();
        let nonce_r = nonce_payload.nonce.clone();

        let algorithms = super::sa::NegotiatedAlgorithms::from_proposal(&selected)?;
        let keys = KeyMaterial::derive(
            algorithms.prf,
            &nonce_i,
            &nonce_r,
            &shared_secret,
            &local_spi.to_bytes(),
            &remote_spi.to_bytes(),
            algorithms.encr_key_len(),
            algorithms.integ_key_len(),
        )?;

        let mut sa = IkeSaRecord::new(
            local_spi, remote_spi, true, nonce_i, nonce_r, selected, keys, None,
        )?;

        // Message ID 0 was consumed by the INIT exchange
        let init_id = sa.next_message_id();
        sa.record_received(init_id, false)?;
        self.sa = Some(sa);

        self.transition(SessionState::CreateIkeLocalAuth);
        let bytes = self.build_auth_request(true, None)?;
        self.send_request(bytes, actions);
        Ok(())
    }

    fn build_auth_request(
        &mut self,
        first: bool,
        eap_payload: Option<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let mut payloads = Vec::new();

        if first {
            payloads.push(IkePayload::IdInit(IdPayload::new(
                self.config.local_identification.clone(),
            )));

            match &self.config.local_auth {
                AuthConfig::Psk(psk) => {
                    let auth_data = self.local_auth_data(psk)?;
                    payloads.push(IkePayload::Auth(super::payload::AuthPayload::new(
                        super::payload::AuthMethod::SharedKeyMic,
                        auth_data,
                    )));
                }
                AuthConfig::PubKeySignature { cert_chain, key } => {
                    for cert in cert_chain {
                        payloads.push(IkePayload::Cert(cert.clone()));
                    }
                    let octets = self.local_signed_octets()?;
                    payloads.push(IkePayload::Auth(super::payload::AuthPayload::new(
                        super::payload::AuthMethod::DigitalSignature,
                        ike_auth::sign_auth(key, &octets)?,
                    )));
                }
                // EAP: the AUTH payload is omitted until the method
                // completes and exports its MSK
                AuthConfig::Eap(_) => {}
            }

            let inbound_spi = allocate_child_spi();
            let proposals: Vec<Proposal> = self
                .config
                .child_proposals
                .iter()
                .cloned()
                .map(|p| p.with_spi(inbound_spi.to_be_bytes().to_vec()))
                .collect();

            payloads.push(IkePayload::Sa(SaPayload::new(proposals)));
            payloads.push(IkePayload::TsInit(default_traffic_selectors()));
            payloads.push(IkePayload::TsResp(default_traffic_selectors()));
            payloads.push(IkePayload::Config(ConfigPayload::new(
                ConfigType::Request,
                vec![
                    ConfigAttribute::Ipv4Address(None),
                    ConfigAttribute::Ipv4Dns(None),
                ],
            )));

            let nonce_i = self
                .init
                .as_ref()
                .map(|s| s.nonce_i.clone())
                .unwrap_or_default();
            self.pending_exchange = Some(PendingExchange::Child(PendingChild {
                kind: LocalRequestKind::CreateChild,
                inbound_spi,
                nonce_i,
                rekeyed_child: None,
            }));
        } else if let Some(eap) = eap_payload {
            payloads.push(IkePayload::Eap(eap));
        } else {
            // Final AUTH after EAP success
            let msk = self
                .eap_msk
                .clone()
                .ok_or_else(|| Error::Internal("EAP MSK missing for final AUTH".into()))?;
            let auth_data = self.local_auth_data(&msk)?;
            payloads.push(IkePayload::Auth(super::payload::AuthPayload::new(
                super::payload::AuthMethod::SharedKeyMic,
                auth_data,
            )));
        }

        let message = {
            let sa = self.current_sa()?;
            IkeMessage::new(sa.header(ExchangeType::IkeAuth, 0, false), payloads)
        };
        self.seal_request_on_current(message)
    }

    fn local_signed_octets(&self) -> Result<Vec<u8>> {
        let scratch = self
            .init
            .as_ref()
            .ok_or_else(|| Error::Internal("INIT scratch missing".into()))?;
        let sa = self.current_sa()?;

        Ok(ike_auth::signed_octets(
            &scratch.request_bytes,
            &sa.nonce_r,
            sa.algorithms.prf,
            &sa.keys.sk_pi,
            &self.config.local_identification,
        ))
    }

    fn local_auth_data(&self, secret: &[u8]) -> Result<Vec<u8>> {
        let octets = self.local_signed_octets()?;
        let sa = self.current_sa()?;
        Ok(ike_auth::shared_key_auth(sa.algorithms.prf, secret, &octets))
    }

    fn verify_remote_auth(&self, message: &IkeMessage) -> Result<()> {
        let auth_payload = message
            .find(|p| match p {
                IkePayload::Auth(a) => Some(a),
                _ => None,
            })
            .ok_or_else(|| {
                Error::AuthenticationFailed("IKE_AUTH response missing AUTH".into())
            })?;

        let remote_id = message
            .find(|p| match p {
                IkePayload::IdResp(id) => Some(id),
                _ => None,
            })
            .map(|p| p.id.clone())
            .unwrap_or_else(|| self.config.remote_identification.clone());

        if remote_id != self.config.remote_identification {
            return Err(Error::AuthenticationFailed(
                "Gateway identification mismatch".into(),
            ));
        }

        let scratch = self
            .init
            .as_ref()
            .ok_or_else(|| Error::Internal("INIT scratch missing".into()))?;
        let sa = self.current_sa()?;

        let octets = ike_auth::signed_octets(
            &scratch.response_bytes,
            &sa.nonce_i,
            sa.algorithms.prf,
            &sa.keys.sk_pr,
            &remote_id,
        );

        match &self.config.remote_auth {
            AuthConfig::Psk(psk) => ike_auth::verify_shared_key_auth(
                sa.algorithms.prf,
                psk,
                &octets,
                &auth_payload.data,
            ),
            AuthConfig::PubKeySignature { key, .. } => {
                ike_auth::verify_signature_auth(key, &octets, &auth_payload.data)
            }
            AuthConfig::Eap(_) => Err(Error::Internal(
                "Gateway cannot authenticate with EAP".into(),
            )),
        }
    }

    fn process_auth_response(
        &mut self,
        message: IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        // Error notifies end the handshake
        for payload in &message.payloads {
            if let IkePayload::Notify(n) = payload {
                if n.is_error() {
                    return Err(Error::AuthenticationFailed(format!(
                        "Gateway rejected IKE_AUTH with notify {}",
                        n.notify_type
                    )));
                }
            }
        }

        // EAP rounds continue inside IKE_AUTH
        if let Some(eap_packet) = message.find(|p| match p {
            IkePayload::Eap(data) => Some(data),
            _ => None,
        }) {
            if self.eap.is_none() {
                let config = match &self.config.local_auth {
                    AuthConfig::Eap(config) => config.clone(),
                    _ => {
                        return Err(Error::AuthenticationFailed(
                            "Gateway demanded EAP but none is configured".into(),
                        ))
                    }
                };
                self.eap = Some(EapAuthenticator::new(
                    config,
                    self.sim.take(),
                    self.subscriber.take(),
                )?);
            }
            let eap = self.eap.as_mut().expect("constructed above");

            match eap.process_packet(eap_packet)? {
                EapResult::Response(packet) => {
                    let bytes = self.build_auth_request(false, Some(packet))?;
                    self.send_request(bytes, actions);
                    return Ok(());
                }
                EapResult::Success { msk, emsk: _ } => {
                    self.eap_msk = Some(msk);
                    let bytes = self.build_auth_request(false, None)?;
                    self.send_request(bytes, actions);
                    return Ok(());
                }
                EapResult::Failure => {
                    return Err(Error::AuthenticationFailed("EAP failure".into()));
                }
            }
        }

        // Final AUTH response
        self.verify_remote_auth(&message)?;

        // Configuration payload replies are validated strictly; a stray
        // netmask is a syntax error that tears the session down
        if let Some(cp) = message.find(|p| match p {
            IkePayload::Config(cp) => Some(cp),
            _ => None,
        }) {
            if cp.cfg_type == ConfigType::Reply {
                cp.validate_reply()?;
            }
        }

        self.complete_first_child(&message, actions)?;

        logging::log_ike_established(
            &self.current_sa()?.initiator_spi_bytes(),
            &self.current_sa()?.responder_spi_bytes(),
        );
        actions.push(SessionAction::Callback(SessionCallback::IkeEstablished));
        self.transition(SessionState::Idle);
        self.replay_deferred(actions);
        Ok(())
    }

    fn complete_first_child(
        &mut self,
        message: &IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        let pending = match self.pending_exchange.take() {
            Some(PendingExchange::Child(pending)) => pending,
            other => {
                self.pending_exchange = other;
                return Err(Error::Internal("First child negotiation missing".into()));
            }
        };

        self.install_negotiated_child(pending, message, actions)
    }

    fn install_negotiated_child(
        &mut self,
        pending: PendingChild,
        message: &IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        let sa_payload = message
            .find(|p| match p {
                IkePayload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Child negotiation missing SA".into()))?;
        let chosen = sa_payload
            .proposals
            .first()
            .ok_or_else(|| Error::NoProposalChosen)?;
        if !chosen.is_acceptable(&self.config.child_proposals) {
            return Err(Error::NoProposalChosen);
        }
        if chosen.spi.len() != 4 {
            return Err(Error::InvalidSyntax("Child SA SPI must be 4 bytes".into()));
        }
        let outbound_spi = u32::from_be_bytes([
            chosen.spi[0],
            chosen.spi[1],
            chosen.spi[2],
            chosen.spi[3],
        ]);

        let ts_init = message
            .find(|p| match p {
                IkePayload::TsInit(ts) => Some(ts),
                _ => None,
            })
            .cloned()
            .unwrap_or_else(default_traffic_selectors);
        let ts_resp = message
            .find(|p| match p {
                IkePayload::TsResp(ts) => Some(ts),
                _ => None,
            })
            .cloned()
            .unwrap_or_else(default_traffic_selectors);

        child::validate_narrowing(&default_traffic_selectors(), &ts_init)?;
        child::validate_narrowing(&default_traffic_selectors(), &ts_resp)?;

        // Child nonces: the IKE_AUTH child reuses the INIT nonces; a
        // CREATE_CHILD_SA child uses the nonces of that exchange
        let nonce_r = message
            .find(|p| match p {
                IkePayload::Nonce(n) => Some(n),
                _ => None,
            })
            .map(|n| n.nonce.clone());

        let (prf, sk_d, nonce_i, nonce_r) = {
            let sa = self.current_sa()?;
            let nonce_i;
            let nonce_r = match nonce_r {
                Some(nr) => {
                    nonce_i = pending.nonce_i.clone();
                    nr
                }
                None => {
                    nonce_i = sa.nonce_i.clone();
                    sa.nonce_r.clone()
                }
            };
            (
                sa.algorithms.prf,
                sa.keys.sk_d.clone(),
                nonce_i,
                nonce_r,
            )
        };

        let keys = child::derive_child_keys(prf, &sk_d, &nonce_i, &nonce_r, chosen)?;

        let child_id = self.next_child_id;
        self.next_child_id += 1;

        actions.push(SessionAction::InstallChildSa {
            spi: pending.inbound_spi,
            inbound: true,
            keys: keys.inbound,
        });
        actions.push(SessionAction::InstallChildSa {
            spi: outbound_spi,
            inbound: false,
            keys: keys.outbound,
        });
        actions.push(SessionAction::Callback(SessionCallback::ChildEstablished {
            child_id,
            inbound_spi: pending.inbound_spi,
            outbound_spi,
        }));

        self.children.push(ChildSaPair {
            child_id,
            inbound_spi: pending.inbound_spi,
            outbound_spi,
            proposal: chosen.clone(),
            ts_init,
            ts_resp,
            state: ChildSaState::Active,
        });

        // A child rekey retires the SA it replaced
        if let Some(old_id) = pending.rekeyed_child {
            if let Some(old) = self.children.iter_mut().find(|c| c.child_id == old_id) {
                old.state = ChildSaState::Rekeyed;
                actions.push(SessionAction::DeleteChildSa {
                    spi: old.inbound_spi,
                });
                actions.push(SessionAction::DeleteChildSa {
                    spi: old.outbound_spi,
                });
                actions.push(SessionAction::Callback(SessionCallback::ChildClosed {
                    child_id: old_id,
                }));
            }
        }

        Ok(())
    }

    // Response dispatch for established-phase exchanges

    fn process_response(
        &mut self,
        spi_pair: (u64, u64),
        message: IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        match self.state {
            SessionState::CreateIkeLocalAuth => self.process_auth_response(message, actions),
            SessionState::RekeyIkeLocalCreate | SessionState::SimulRekeyIkeLocalCreate => {
                self.process_rekey_response(message, actions)
            }
            SessionState::DeleteIkeLocal => {
                self.close_session("Deleted at local request".into(), actions);
                Ok(())
            }
            SessionState::RekeyIkeLocalDelete => {
                self.survivor_is_local = true;
                self.complete_rekey(actions);
                Ok(())
            }
            SessionState::SimulRekeyIkeLocalDeleteRemoteDelete => {
                self.transition(SessionState::SimulRekeyIkeRemoteDelete);
                actions.push(SessionAction::StartAwaitTimer(AWAIT_DELETE_TIMEOUT));
                Ok(())
            }
            SessionState::SimulRekeyIkeLocalDelete => {
                self.complete_rekey(actions);
                Ok(())
            }
            SessionState::Idle => self.process_idle_response(spi_pair, message, actions),
            state => Err(Error::InvalidState(format!(
                "Unexpected response in state {:?}",
                state
            ))),
        }
    }

    fn process_idle_response(
        &mut self,
        _spi_pair: (u64, u64),
        message: IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        match self.pending_exchange.take() {
            Some(PendingExchange::Info) => Ok(()),
            Some(PendingExchange::DeleteChild(spis)) => {
                for spi in &spis {
                    actions.push(SessionAction::DeleteChildSa { spi: *spi });
                }
                self.children.retain(|child| {
                    if spis.contains(&child.inbound_spi) {
                        actions.push(SessionAction::DeleteChildSa {
                            spi: child.outbound_spi,
                        });
                        actions.push(SessionAction::Callback(SessionCallback::ChildClosed {
                            child_id: child.child_id,
                        }));
                        false
                    } else {
                        true
                    }
                });
                Ok(())
            }
            Some(PendingExchange::Child(pending)) => {
                // A TEMPORARY_FAILURE response abandons the attempt
                let rejected = message.payloads.iter().any(|p| {
                    matches!(p, IkePayload::Notify(n) if n.is_error())
                });
                if rejected {
                    actions.push(error_callback(&Error::NoProposalChosen));
                    return Ok(());
                }
                self.install_negotiated_child(pending, &message, actions)
            }
            Some(PendingExchange::Passthrough) => {
                actions.push(SessionAction::Callback(
                    SessionCallback::ChildPayloadsReceived(message.payloads),
                ));
                Ok(())
            }
            None => {
                tracing::debug!("Unsolicited response in Idle; dropping");
                Ok(())
            }
        }
    }

    // Rekey machinery

    fn process_rekey_response(
        &mut self,
        message: IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        // TEMPORARY_FAILURE means the peer wants us to retry later; fall
        // back to Idle
        if message
            .payloads
            .iter()
            .any(|p| matches!(p, IkePayload::Notify(n) if n.is_error()))
        {
            self.rekey = None;
            self.transition(SessionState::Idle);
            actions.push(error_callback(&Error::NoProposalChosen));
            self.replay_deferred(actions);
            return Ok(());
        }

        let scratch = self
            .rekey
            .as_mut()
            .ok_or_else(|| Error::Internal("Rekey scratch missing".into()))?;

        let sa_payload = message
            .find(|p| match p {
                IkePayload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Rekey response missing SA".into()))?;
        let ke_payload = message
            .find(|p| match p {
                IkePayload::Ke(ke) => Some(ke),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Rekey response missing KE".into()))?;
        let nonce_payload = message
            .find(|p| match p {
                IkePayload::Nonce(n) => Some(n),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Rekey response missing Nonce".into()))?;

        let chosen = sa_payload
            .proposals
            .first()
            .ok_or_else(|| Error::NoProposalChosen)?
            .clone();
        if !chosen.is_acceptable(&self.config.sa_proposals) {
            return Err(Error::NoProposalChosen);
        }
        if chosen.spi.len() != 8 {
            return Err(Error::InvalidSyntax("Rekeyed IKE SPI must be 8 bytes".into()));
        }

        let local_spi = scratch
            .local_spi
            .take()
            .ok_or_else(|| Error::Internal("Rekey SPI already consumed".into()))?;
        let remote_spi = IkeSpi::reserve(
            self.config.server_address.ip(),
            u64::from_be_bytes(chosen.spi.clone().try_into().expect("checked above")),
        )?;

        let shared_secret = scratch
            .dh
            .take()
            .ok_or_else(|| Error::Internal("Rekey DH already consumed".into()))?
            .compute_shared_secret(&ke_payload.key_data)?;

        let nonce_i = scratch.nonce.clone();
        let nonce_r = nonce_payload.nonce.clone();
        self.rekey = None;

        let candidate = self.derive_rekeyed_sa(
            local_spi, remote_spi, true, nonce_i, nonce_r, chosen, &shared_secret,
        )?;
        self.local_rekey_sa = Some(candidate);

        match self.state {
            SessionState::RekeyIkeLocalCreate => {
                self.survivor_is_local = true;
                let bytes = self.build_old_sa_delete()?;
                self.transition(SessionState::RekeyIkeLocalDelete);
                self.send_request(bytes, actions);
            }
            SessionState::SimulRekeyIkeLocalCreate => {
                // Both candidates exist: the greater nonce pair survives
                let local = self.local_rekey_sa.as_ref().expect("just set");
                let remote = self
                    .remote_rekey_sa
                    .as_ref()
                    .ok_or_else(|| Error::Internal("Remote rekey candidate missing".into()))?;
                self.survivor_is_local =
                    local.compare_nonces(remote) == std::cmp::Ordering::Greater;
                logging::log_rekey_collision(self.survivor_is_local);

                let bytes = self.build_old_sa_delete()?;
                self.transition(SessionState::SimulRekeyIkeLocalDeleteRemoteDelete);
                self.send_request(bytes, actions);
                actions.push(SessionAction::StartAwaitTimer(AWAIT_DELETE_TIMEOUT));
            }
            state => {
                return Err(Error::InvalidState(format!(
                    "Rekey response in state {:?}",
                    state
                )))
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn derive_rekeyed_sa(
        &mut self,
        local_spi: IkeSpi,
        remote_spi: IkeSpi,
        local_is_initiator: bool,
        nonce_i: Vec<u8>,
        nonce_r: Vec<u8>,
        proposal: Proposal,
        shared_secret: &[u8],
    ) -> Result<IkeSaRecord> {
        let old = self.current_sa()?;
        let algorithms = super::sa::NegotiatedAlgorithms::from_proposal(&proposal)?;

        let (spi_i, spi_r) = if local_is_initiator {
            (local_spi.to_bytes(), remote_spi.to_bytes())
        } else {
            (remote_spi.to_bytes(), local_spi.to_bytes())
        };

        // SK_d of the old SA seeds the new schedule exactly once
        let keys = KeyMaterial::derive_rekey(
            algorithms.prf,
            &old.keys.sk_d,
            &nonce_i,
            &nonce_r,
            shared_secret,
            &spi_i,
            &spi_r,
            algorithms.encr_key_len(),
            algorithms.integ_key_len(),
        )?;

        let parent = Some(old.spi_pair());
        IkeSaRecord::new(
            local_spi,
            remote_spi,
            local_is_initiator,
            nonce_i,
            nonce_r,
            proposal,
            keys,
            parent,
        )
    }

    fn process_remote_rekey_request(
        &mut self,
        message: &IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        let sa_payload = message
            .find(|p| match p {
                IkePayload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Rekey request missing SA".into()))?;
        let ke_payload = message
            .find(|p| match p {
                IkePayload::Ke(ke) => Some(ke),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Rekey request missing KE".into()))?;
        let nonce_payload = message
            .find(|p| match p {
                IkePayload::Nonce(n) => Some(n),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidSyntax("Rekey request missing Nonce".into()))?;

        let chosen = select_proposal(&sa_payload.proposals, &self.config.sa_proposals)?.clone();
        if chosen.spi.len() != 8 {
            return Err(Error::InvalidSyntax("Rekeyed IKE SPI must be 8 bytes".into()));
        }

        let group = DhGroup::from_transform_id(ke_payload.dh_group)
            .ok_or(Error::NoProposalChosen)?;
        let dh = DhExchange::new(group)?;
        let our_public = dh.public_key().to_vec();
        let shared_secret = dh.compute_shared_secret(&ke_payload.key_data)?;

        let local_spi = IkeSpi::allocate(self.config.server_address.ip())?;
        let remote_spi = IkeSpi::reserve(
            self.config.server_address.ip(),
            u64::from_be_bytes(chosen.spi.clone().try_into().expect("checked above")),
        )?;

        let mut nonce_r = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_r);

        let response_proposal = chosen.clone().with_spi(local_spi.to_bytes().to_vec());

        let candidate = self.derive_rekeyed_sa(
            local_spi,
            remote_spi,
            false,
            nonce_payload.nonce.clone(),
            nonce_r.clone(),
            chosen,
            &shared_secret,
        )?;
        self.remote_rekey_sa = Some(candidate);

        // Answer with our SPI, nonce and KE on the old SA
        let response = {
            let sa = self.current_sa()?;
            IkeMessage::new(
                sa.header(
                    ExchangeType::CreateChildSa,
                    message.header.message_id,
                    true,
                ),
                vec![
                    IkePayload::Sa(SaPayload::new(vec![response_proposal])),
                    IkePayload::Nonce(NoncePayload::new(nonce_r)?),
                    IkePayload::Ke(KePayload::new(group.transform_id(), our_public)),
                ],
            )
        };
        let bytes = self.current_sa()?.encrypt_and_encode(&response)?;
        actions.push(SessionAction::Send(bytes));
        Ok(())
    }

    fn build_old_sa_delete(&mut self) -> Result<Vec<u8>> {
        let message = {
            let sa = self.current_sa()?;
            IkeMessage::new(
                sa.header(ExchangeType::Informational, 0, false),
                vec![IkePayload::Delete(DeletePayload::delete_ike_sa())],
            )
        };
        self.seal_request_on_current(message)
    }

    fn complete_rekey(&mut self, actions: &mut Vec<SessionAction>) {
        // Any in-flight request on the old SA dies with it
        actions.push(SessionAction::CancelRetransmitTimer);
        self.retransmit = None;

        let survivor = if self.survivor_is_local {
            self.local_rekey_sa.take()
        } else {
            self.remote_rekey_sa.take()
        };

        // The loser and the old SA drop here, releasing their SPIs
        self.local_rekey_sa = None;
        self.remote_rekey_sa = None;

        match survivor {
            Some(survivor) => {
                logging::log_ike_rekey_complete(
                    &survivor.initiator_spi_bytes(),
                    &survivor.responder_spi_bytes(),
                );
                self.sa = Some(survivor);
                self.transition(SessionState::Idle);
                self.replay_deferred(actions);
            }
            None => {
                self.fail(
                    Error::Internal("Rekey completed without a surviving SA".into()),
                    actions,
                );
            }
        }
    }

    // Request dispatch

    fn process_request(
        &mut self,
        previous_state: SessionState,
        spi_pair: (u64, u64),
        message: IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        let subtype = ExchangeSubtype::infer(&message)?;
        let _ = spi_pair;

        match (previous_state, subtype) {
            // Remote tears the IKE SA down
            (_, ExchangeSubtype::DeleteIke) => {
                let response = self.empty_response(&message)?;
                actions.push(SessionAction::Send(response));

                match previous_state {
                    SessionState::RekeyIkeRemoteDelete => {
                        // The old SA dies; the peer's replacement lives on
                        self.survivor_is_local = false;
                        self.complete_rekey(actions);
                    }
                    SessionState::RekeyIkeLocalDelete => {
                        self.survivor_is_local = true;
                        self.complete_rekey(actions);
                    }
                    SessionState::SimulRekeyIkeLocalDeleteRemoteDelete => {
                        self.transition(SessionState::SimulRekeyIkeLocalDelete);
                    }
                    SessionState::SimulRekeyIkeRemoteDelete => {
                        self.complete_rekey(actions);
                    }
                    _ => {
                        self.close_session("Deleted by the gateway".into(), actions);
                    }
                }
                Ok(())
            }

            (SessionState::Idle, ExchangeSubtype::DeleteChild) => {
                self.process_remote_child_delete(&message, actions)
            }

            (_, ExchangeSubtype::GenericInfo) => {
                let response = self.empty_response(&message)?;
                actions.push(SessionAction::Send(response));
                Ok(())
            }

            // Peer starts an IKE rekey
            (SessionState::Idle, ExchangeSubtype::RekeyIke) => {
                self.process_remote_rekey_request(&message, actions)?;
                self.survivor_is_local = false;
                self.transition(SessionState::RekeyIkeRemoteDelete);
                actions.push(SessionAction::StartAwaitTimer(AWAIT_DELETE_TIMEOUT));
                Ok(())
            }

            // ... and it crossed our own rekey: a collision
            (SessionState::RekeyIkeLocalCreate, ExchangeSubtype::RekeyIke) => {
                self.process_remote_rekey_request(&message, actions)?;
                self.transition(SessionState::SimulRekeyIkeLocalCreate);
                Ok(())
            }

            // We do not accept remote-initiated child negotiation
            (_, ExchangeSubtype::CreateChild | ExchangeSubtype::RekeyChild) => {
                let response = self.notify_response(
                    &message,
                    NotifyType::NoAdditionalSas,
                )?;
                actions.push(SessionAction::Send(response));
                Ok(())
            }

            (state, subtype) => Err(Error::InvalidState(format!(
                "Request {:?} not handled in state {:?}",
                subtype, state
            ))),
        }
    }

    fn process_remote_child_delete(
        &mut self,
        message: &IkeMessage,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        let mut deleted_spis: Vec<Vec<u8>> = Vec::new();

        for payload in &message.payloads {
            if let IkePayload::Delete(d) = payload {
                if d.protocol_id != ProtocolId::Esp {
                    continue;
                }
                for spi in &d.spis {
                    if spi.len() != 4 {
                        continue;
                    }
                    let outbound = u32::from_be_bytes([spi[0], spi[1], spi[2], spi[3]]);
                    // The peer names the SPIs of its inbound SAs, which
                    // are our outbound SPIs
                    self.children.retain(|child| {
                        if child.outbound_spi == outbound {
                            actions.push(SessionAction::DeleteChildSa {
                                spi: child.inbound_spi,
                            });
                            actions.push(SessionAction::DeleteChildSa {
                                spi: child.outbound_spi,
                            });
                            actions.push(SessionAction::Callback(
                                SessionCallback::ChildClosed {
                                    child_id: child.child_id,
                                },
                            ));
                            deleted_spis.push(child.inbound_spi.to_be_bytes().to_vec());
                            false
                        } else {
                            true
                        }
                    });
                }
            }
        }

        let payloads = if deleted_spis.is_empty() {
            Vec::new()
        } else {
            vec![IkePayload::Delete(DeletePayload::delete_child_sas(
                deleted_spis,
            ))]
        };

        let response = {
            let sa = self.current_sa()?;
            IkeMessage::new(
                sa.header(
                    ExchangeType::Informational,
                    message.header.message_id,
                    true,
                ),
                payloads,
            )
        };
        let bytes = self.current_sa()?.encrypt_and_encode(&response)?;
        actions.push(SessionAction::Send(bytes));
        Ok(())
    }

    // Timers

    fn handle_retransmit_timeout(&mut self, actions: &mut Vec<SessionAction>) {
        let schedule = match self.retransmit.as_mut() {
            Some(schedule) => schedule,
            None => return,
        };

        match schedule.on_timeout() {
            Some((bytes, delay)) => {
                logging::log_retransmit(schedule.attempts());
                actions.push(SessionAction::Send(bytes));
                actions.push(SessionAction::StartRetransmitTimer(delay));
            }
            None => {
                self.fail(Error::RetransmitExhausted, actions);
            }
        }
    }

    fn handle_await_timeout(&mut self, actions: &mut Vec<SessionAction>) {
        match self.state {
            SessionState::SimulRekeyIkeLocalDeleteRemoteDelete
            | SessionState::SimulRekeyIkeLocalDelete
            | SessionState::SimulRekeyIkeRemoteDelete
            | SessionState::RekeyIkeRemoteDelete => {
                tracing::warn!("Peer never finished rekey cleanup; promoting survivor");
                self.complete_rekey(actions);
            }
            SessionState::DeleteIkeLocal => {
                self.close_session("Delete response never arrived".into(), actions);
            }
            _ => {}
        }
    }

    // Plumbing

    fn current_sa(&self) -> Result<&IkeSaRecord> {
        self.sa
            .as_ref()
            .ok_or_else(|| Error::SaNotFound("No established IKE SA".into()))
    }

    fn record_for(&mut self, spi_pair: (u64, u64)) -> Option<&mut IkeSaRecord> {
        if let Some(sa) = self.sa.as_mut() {
            if sa.spi_pair() == spi_pair {
                return Some(sa);
            }
        }
        if let Some(sa) = self.local_rekey_sa.as_mut() {
            if sa.spi_pair() == spi_pair {
                return Some(sa);
            }
        }
        if let Some(sa) = self.remote_rekey_sa.as_mut() {
            if sa.spi_pair() == spi_pair {
                return Some(sa);
            }
        }
        None
    }

    fn surviving_candidate_pair(&self) -> Option<(u64, u64)> {
        let survivor = if self.survivor_is_local {
            self.local_rekey_sa.as_ref()
        } else {
            self.remote_rekey_sa.as_ref()
        };
        survivor.map(|sa| sa.spi_pair())
    }

    fn in_rekey_delete_phase(&self) -> bool {
        matches!(
            self.state,
            SessionState::SimulRekeyIkeLocalDeleteRemoteDelete
                | SessionState::SimulRekeyIkeLocalDelete
                | SessionState::SimulRekeyIkeRemoteDelete
                | SessionState::RekeyIkeLocalDelete
                | SessionState::RekeyIkeRemoteDelete
        )
    }

    fn seal_request_on_current(&mut self, mut message: IkeMessage) -> Result<Vec<u8>> {
        let sa = self
            .sa
            .as_mut()
            .ok_or_else(|| Error::SaNotFound("No established IKE SA".into()))?;
        message.header.message_id = sa.next_message_id();
        sa.encrypt_and_encode(&message)
    }

    fn empty_response(&self, request: &IkeMessage) -> Result<Vec<u8>> {
        let sa = self.current_sa()?;
        let response = IkeMessage::new(
            sa.header(
                request.header.exchange_type,
                request.header.message_id,
                true,
            ),
            Vec::new(),
        );
        sa.encrypt_and_encode(&response)
    }

    fn notify_response(&self, request: &IkeMessage, notify: NotifyType) -> Result<Vec<u8>> {
        let sa = self.current_sa()?;
        let response = IkeMessage::new(
            sa.header(
                request.header.exchange_type,
                request.header.message_id,
                true,
            ),
            vec![IkePayload::Notify(NotifyPayload::new(notify, Vec::new()))],
        );
        sa.encrypt_and_encode(&response)
    }

    fn send_request(&mut self, bytes: Vec<u8>, actions: &mut Vec<SessionAction>) {
        let schedule = RetransmitSchedule::new(bytes.clone());
        actions.push(SessionAction::Send(bytes));
        actions.push(SessionAction::StartRetransmitTimer(schedule.current_delay()));
        self.retransmit = Some(schedule);
    }

    fn replay_deferred(&mut self, actions: &mut Vec<SessionAction>) {
        // Deferred messages replay in arrival order; handlers may defer
        // again, so drain a bounded snapshot
        let pending: Vec<SessionEvent> = self.deferred.drain(..).collect();
        for event in pending {
            let mut replayed = self.handle_event(event);
            actions.append(&mut replayed);
        }
    }

    fn handle_exchange_error(&mut self, error: Error, actions: &mut Vec<SessionAction>) {
        match error.kind() {
            ErrorKind::Silent => {
                tracing::debug!(error = %error, "Dropping message");
            }
            // A syntax violation on an authenticated SA questions the SA
            // itself: issue a delete rather than answering the exchange
            ErrorKind::Protocol(NotifyType::InvalidSyntax) if self.sa.is_some() => {
                actions.push(error_callback(&error));
                self.start_local_teardown(actions);
            }
            ErrorKind::Protocol(_)
                if matches!(
                    self.state,
                    SessionState::CreateIkeLocalInit | SessionState::CreateIkeLocalAuth
                ) =>
            {
                // Handshake-phase protocol errors end the session
                self.fail(error, actions);
            }
            ErrorKind::Protocol(_) => {
                // A single exchange failed; report it and stay up
                actions.push(error_callback(&error));
                self.transition(SessionState::Idle);
                self.replay_deferred(actions);
            }
            ErrorKind::InvalidRequest | ErrorKind::Unavailable => {
                actions.push(error_callback(&error));
                // The EAP session cannot continue; fail authentication
                if self.state == SessionState::CreateIkeLocalAuth {
                    self.fail(Error::AuthenticationFailed(error.to_string()), actions);
                }
            }
            ErrorKind::Fatal => self.fail(error, actions),
        }
    }

    fn start_local_teardown(&mut self, actions: &mut Vec<SessionAction>) {
        match self.build_old_sa_delete() {
            Ok(bytes) => {
                self.transition(SessionState::DeleteIkeLocal);
                self.send_request(bytes, actions);
            }
            Err(e) => self.fail(e, actions),
        }
    }

    fn fail(&mut self, error: Error, actions: &mut Vec<SessionAction>) {
        actions.push(error_callback(&error));
        self.close_session(error.to_string(), actions);
    }

    fn close_session(&mut self, reason: String, actions: &mut Vec<SessionAction>) {
        actions.push(SessionAction::CancelRetransmitTimer);
        self.retransmit = None;

        for child in &self.children {
            if child.state == ChildSaState::Active {
                actions.push(SessionAction::DeleteChildSa {
                    spi: child.inbound_spi,
                });
                actions.push(SessionAction::DeleteChildSa {
                    spi: child.outbound_spi,
                });
            }
        }
        self.children.clear();

        // Pending local requests become SessionClosed errors
        for event in self.deferred.drain(..) {
            if let SessionEvent::LocalRequest(_) = event {
                actions.push(error_callback(&Error::SessionClosed));
            }
        }

        self.sa = None;
        self.local_rekey_sa = None;
        self.remote_rekey_sa = None;
        self.init = None;
        self.rekey = None;
        self.pending_exchange = None;

        actions.push(SessionAction::Callback(SessionCallback::IkeClosed {
            reason,
        }));
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            logging::log_session_transition(&format!("{:?}", self.state), &format!("{:?}", next));
        }
        self.state = next;
    }
}

fn error_callback(error: &Error) -> SessionAction {
    SessionAction::Callback(SessionCallback::Error {
        kind: error.kind(),
        detail: error.to_string(),
    })
}
