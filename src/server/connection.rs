use alloc::vec::Vec;

use pki_types::CertificateDer;

use crate::buffer::BufChain;
use crate::crypto::hkdf::OkmBlock;
use crate::enums::{
    AlertDescription, CertificateCompressionAlgorithm, HandshakeType, NamedGroup, ProtocolVersion,
    SignatureScheme,
};
use crate::error::Error;
use crate::log::{debug, trace, warn};
use crate::msgs::enums::{AlertLevel, PskKeyExchangeMode};
use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};
use crate::record_layer::{KeyRefresh, ReadEvent, ReadRecordLayer, WriteRecordLayer};
use crate::server::actions::{Action, Actions, ActionsExt, EndOfDataReason};
use crate::server::config::{HandshakeLogging, ReplayCacheResult, ResumptionState, ServerConfig};
use crate::server::{hs, tls13};
use crate::sync::Arc;
use crate::tls13::key_schedule::KeyScheduler;
use crate::tls13::Tls13CipherSuite;
use crate::transcript::{HandshakeContext, HandshakeContextBuffer};

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEnum {
    Uninitialized,
    ExpectingClientHello,
    ExpectingCertificate,
    ExpectingCertificateVerify,
    AcceptingEarlyData,
    ExpectingFinished,
    AcceptingData,
    ExpectingCloseNotify,
    Closed,
    Error,
}

/// How the PSK offer resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PskType {
    NotSupported,
    NotAttempted,
    Rejected,
    External,
    Resumption,
}

/// Which key exchange flow the connection used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeType {
    /// PSK-only: no (EC)DHE.
    None,
    OneRtt,
    HelloRetry,
}

/// How the early data offer resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyDataType {
    NotAttempted,
    Rejected,
    /// Rejected specifically because the replay cache flagged the ticket.
    Replay,
    Accepted,
}

/// The transcript, before and after the hash function is known.
pub(crate) enum Transcript {
    Buffer(HandshakeContextBuffer),
    Hash(HandshakeContext),
}

impl Transcript {
    pub(crate) fn append(&mut self, encoding: &[u8]) {
        match self {
            Self::Buffer(buffer) => buffer.append(encoding),
            Self::Hash(ctx) => ctx.append(encoding),
        }
    }

    pub(crate) fn ctx(&mut self) -> &mut HandshakeContext {
        match self {
            // the suite is decided before any digest is needed
            Self::Buffer(_) => unreachable!("transcript hash not started"),
            Self::Hash(ctx) => ctx,
        }
    }
}

/// Everything the state machine carries between events.
///
/// Fields become populated as negotiation proceeds; the invariants tying
/// them to `state` are maintained by the handlers in `hs` and `tls13`.
pub(crate) struct ConnectionCore {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) state: StateEnum,

    // negotiated parameters
    pub(crate) version: Option<ProtocolVersion>,
    pub(crate) suite: Option<&'static Tls13CipherSuite>,
    pub(crate) group: Option<NamedGroup>,
    pub(crate) sig_scheme: Option<SignatureScheme>,
    pub(crate) psk_type: Option<PskType>,
    pub(crate) psk_mode: Option<PskKeyExchangeMode>,
    pub(crate) key_exchange_type: Option<KeyExchangeType>,
    pub(crate) early_data_type: Option<EarlyDataType>,
    pub(crate) replay_cache_result: Option<ReplayCacheResult>,

    // secrets retained for later events
    pub(crate) client_handshake_secret: Option<OkmBlock>,
    pub(crate) client_app_secret: Option<OkmBlock>,
    pub(crate) server_app_secret: Option<OkmBlock>,
    pub(crate) exporter_master_secret: Option<OkmBlock>,
    pub(crate) early_exporter_master_secret: Option<OkmBlock>,
    pub(crate) resumption_master_secret: Option<OkmBlock>,

    // handles
    pub(crate) key_scheduler: Option<KeyScheduler>,
    pub(crate) read_record_layer: ReadRecordLayer,
    pub(crate) write_record_layer: WriteRecordLayer,
    /// Holds the handshake-keyed read layer while early data is active.
    pub(crate) handshake_read_record_layer: Option<ReadRecordLayer>,
    pub(crate) transcript: Option<Transcript>,
    /// Transcript digest at the server Finished, from which application
    /// traffic secrets derive.
    pub(crate) hash_at_server_fin: Option<crate::crypto::HashOutput>,

    // identity
    pub(crate) server_cert_chain: Option<Vec<CertificateDer<'static>>>,
    pub(crate) server_signer: Option<Arc<dyn crate::crypto::SigningKey>>,
    pub(crate) client_cert: Option<Vec<CertificateDer<'static>>>,
    pub(crate) unverified_cert_chain: Option<Vec<CertificateDer<'static>>>,
    pub(crate) server_cert_compression_algo: Option<CertificateCompressionAlgorithm>,

    // negotiation byproducts
    pub(crate) alpn: Option<Vec<u8>>,
    pub(crate) sni: Option<alloc::string::String>,
    pub(crate) client_clock_skew_millis: Option<i64>,
    pub(crate) handshake_time_millis: Option<u64>,
    pub(crate) handshake_logging: Option<HandshakeLogging>,

    // resumption and early data bookkeeping
    pub(crate) resumption: Option<ResumptionState>,
    pub(crate) early_data_left: u32,
    pub(crate) done_retry: bool,
    pub(crate) client_cert_requested: bool,
}

impl ConnectionCore {
    fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            state: StateEnum::Uninitialized,
            version: None,
            suite: None,
            group: None,
            sig_scheme: None,
            psk_type: None,
            psk_mode: None,
            key_exchange_type: None,
            early_data_type: None,
            replay_cache_result: None,
            client_handshake_secret: None,
            client_app_secret: None,
            server_app_secret: None,
            exporter_master_secret: None,
            early_exporter_master_secret: None,
            resumption_master_secret: None,
            key_scheduler: None,
            read_record_layer: ReadRecordLayer::new(),
            write_record_layer: WriteRecordLayer::new(),
            handshake_read_record_layer: None,
            transcript: Some(Transcript::Buffer(HandshakeContextBuffer::new())),
            hash_at_server_fin: None,
            server_cert_chain: None,
            server_signer: None,
            client_cert: None,
            unverified_cert_chain: None,
            server_cert_compression_algo: None,
            alpn: None,
            sni: None,
            client_clock_skew_millis: None,
            handshake_time_millis: None,
            handshake_logging: None,
            resumption: None,
            early_data_left: 0,
            done_retry: false,
            client_cert_requested: false,
        }
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.config.time_provider.current_time_millis()
    }

    /// The active transcript; panics only if called before the first
    /// ClientHello, which no handler does.
    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        // always Some between handler invocations
        self.transcript.as_mut().unwrap()
    }
}

/// A server-side TLS 1.3 connection, driven by events.
///
/// The caller owns the transport: it feeds received bytes to
/// [`read_tls`][ServerConnection::read_tls] and application requests to the
/// other event methods, then applies the returned [`Actions`] in order.
/// Methods take `&mut self`, which is the serialization contract: one event
/// at a time.
pub struct ServerConnection {
    core: ConnectionCore,
}

impl ServerConnection {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            core: ConnectionCore::new(config),
        }
    }

    /// Start serving: the connection now expects a ClientHello.
    pub fn accept(&mut self) -> Actions {
        let mut actions = Actions::new();
        match self.core.state {
            StateEnum::Uninitialized => {
                self.core.state = StateEnum::ExpectingClientHello;
            }
            _ => self.report_misuse(&mut actions, "accept on a started connection"),
        }
        actions
    }

    /// Feed bytes received from the transport.
    pub fn read_tls(&mut self, bytes: BufChain) -> Actions {
        let mut actions = Actions::new();
        match self.core.state {
            StateEnum::Closed => {
                actions.push(Action::EndOfData(EndOfDataReason::ConnectionClosed));
                return actions;
            }
            StateEnum::Error | StateEnum::Uninitialized => {
                self.report_misuse(&mut actions, "read on an unready connection");
                return actions;
            }
            _ => {}
        }

        self.core.read_record_layer.push_bytes(bytes);
        loop {
            let event = match self.core.read_record_layer.read_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    self.handle_error(&mut actions, e);
                    break;
                }
            };
            let result = match event {
                ReadEvent::Handshake { parsed, encoded } => {
                    self.dispatch_handshake(&mut actions, parsed, encoded)
                }
                ReadEvent::Alert(level, desc) => self.handle_alert(&mut actions, level, desc),
                ReadEvent::AppData(data) => self.handle_app_data(&mut actions, data),
            };
            if let Err(e) = result {
                self.handle_error(&mut actions, e);
                break;
            }
            if matches!(self.core.state, StateEnum::Closed | StateEnum::Error) {
                break;
            }
        }
        actions
    }

    /// Send application data.  Valid once our Finished is on the wire.
    pub fn write_app_data(&mut self, data: BufChain) -> Actions {
        let mut actions = Actions::new();
        match self.core.state {
            StateEnum::AcceptingEarlyData
            | StateEnum::ExpectingCertificate
            | StateEnum::ExpectingCertificateVerify
            | StateEnum::ExpectingFinished
            | StateEnum::AcceptingData => {
                if let Err(e) = self.encrypt_app_data(&mut actions, data) {
                    self.handle_error(&mut actions, e);
                }
            }
            _ => self.report_misuse(&mut actions, "write before handshake or after close"),
        }
        actions
    }

    /// Close the write side: send close_notify and await the peer's.
    pub fn close(&mut self) -> Actions {
        let mut actions = Actions::new();
        match self.core.state {
            StateEnum::Closed | StateEnum::Error | StateEnum::ExpectingCloseNotify => {
                actions.push(Action::EndOfData(EndOfDataReason::ConnectionClosed));
            }
            state => {
                match self
                    .core
                    .write_record_layer
                    .write_alert(AlertLevel::Warning, AlertDescription::CloseNotify)
                {
                    Ok(bytes) => actions.send(bytes, true),
                    Err(e) => {
                        self.handle_error(&mut actions, e);
                        return actions;
                    }
                }
                self.core.state = match state {
                    StateEnum::AcceptingData => StateEnum::ExpectingCloseNotify,
                    _ => StateEnum::Closed,
                };
            }
        }
        actions
    }

    /// Issue one NewSessionTicket on demand.
    pub fn send_ticket(&mut self) -> Actions {
        let mut actions = Actions::new();
        match self.core.state {
            StateEnum::AcceptingData => {
                if let Err(e) = tls13::emit_ticket(&mut self.core, &mut actions) {
                    self.handle_error(&mut actions, e);
                }
            }
            _ => self.report_misuse(&mut actions, "ticket before handshake completion"),
        }
        actions
    }

    /// The 0-RTT acceptance window timed out; stop waiting for early data.
    pub fn early_data_timeout(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.core.state == StateEnum::AcceptingEarlyData {
            debug!("early data window expired");
            if let Err(e) = tls13::abandon_early_data(&mut self.core) {
                self.handle_error(&mut actions, e);
            }
        }
        actions
    }

    /// Cancel the connection locally.
    pub fn abort(&mut self) -> Actions {
        let mut actions = Actions::new();
        if !matches!(self.core.state, StateEnum::Closed | StateEnum::Error) {
            self.handle_error(&mut actions, Error::Cancelled);
        }
        actions
    }

    fn dispatch_handshake(
        &mut self,
        actions: &mut Actions,
        parsed: HandshakeMessagePayload,
        encoded: Vec<u8>,
    ) -> Result<(), Error> {
        let core = &mut self.core;
        trace!("handshake message {:?} in {:?}", parsed.typ, core.state);
        match (core.state, parsed.payload) {
            (StateEnum::ExpectingClientHello, HandshakePayload::ClientHello(hello)) => {
                hs::handle_client_hello(core, actions, hello, &encoded)
            }
            (StateEnum::AcceptingEarlyData, HandshakePayload::EndOfEarlyData) => {
                tls13::handle_end_of_early_data(core, &encoded)
            }
            (StateEnum::ExpectingCertificate, HandshakePayload::Certificate(cert)) => {
                tls13::handle_certificate(core, cert, &encoded)
            }
            (
                StateEnum::ExpectingCertificateVerify,
                HandshakePayload::CertificateVerify(sig),
            ) => tls13::handle_certificate_verify(core, sig, &encoded),
            (StateEnum::ExpectingFinished, HandshakePayload::Finished(mac)) => {
                tls13::handle_finished(core, actions, &mac.0, &encoded)
            }
            (StateEnum::AcceptingData, HandshakePayload::KeyUpdate(request)) => {
                tls13::handle_key_update(core, actions, request)
            }
            (_, payload) => Err(Error::InappropriateHandshakeMessage {
                expect_types: expected_messages(core.state),
                got_type: handshake_type_of(&payload),
            }),
        }
    }

    fn handle_alert(
        &mut self,
        actions: &mut Actions,
        level: AlertLevel,
        desc: AlertDescription,
    ) -> Result<(), Error> {
        if desc == AlertDescription::CloseNotify {
            debug!("received close_notify");
            if self.core.state == StateEnum::AcceptingData {
                let bytes = self
                    .core
                    .write_record_layer
                    .write_alert(AlertLevel::Warning, AlertDescription::CloseNotify)?;
                actions.send(bytes, true);
            }
            self.core.state = StateEnum::Closed;
            self.core.write_record_layer.clear();
            actions.push(Action::EndOfData(EndOfDataReason::CloseNotifyReceived));
            return Ok(());
        }

        match level {
            AlertLevel::Warning => {
                warn!("ignoring warning alert {desc:?}");
                Ok(())
            }
            _ => Err(Error::AlertReceived(desc)),
        }
    }

    fn handle_app_data(&mut self, actions: &mut Actions, data: BufChain) -> Result<(), Error> {
        match self.core.state {
            StateEnum::AcceptingEarlyData => {
                let len = data.len() as u64;
                if len > u64::from(self.core.early_data_left) {
                    return Err(crate::error::PeerMisbehaved::TooMuchEarlyData.into());
                }
                self.core.early_data_left -= len as u32;
                actions.push(Action::DeliverEarlyAppData(data));
                Ok(())
            }
            StateEnum::AcceptingData | StateEnum::ExpectingCloseNotify => {
                actions.push(Action::DeliverAppData(data));
                Ok(())
            }
            _ => Err(Error::InappropriateMessage {
                expect_types: alloc::vec![crate::enums::ContentType::Handshake],
                got_type: crate::enums::ContentType::ApplicationData,
            }),
        }
    }

    fn encrypt_app_data(&mut self, actions: &mut Actions, data: BufChain) -> Result<(), Error> {
        let (bytes, refresh) = self.core.write_record_layer.write_app_data(data)?;
        actions.send(bytes, true);
        if refresh == KeyRefresh::Requested {
            tls13::initiate_key_update(&mut self.core, actions)?;
        }
        Ok(())
    }

    /// An error terminates the connection: emit the mapped alert under
    /// whatever keys are current, report, and stick in `Error`.
    fn handle_error(&mut self, actions: &mut Actions, error: Error) {
        warn!("connection failed: {error}");
        if let Some(desc) = error.alert_description() {
            if let Ok(bytes) = self
                .core
                .write_record_layer
                .write_alert(AlertLevel::Fatal, desc)
            {
                actions.send(bytes, true);
            }
        }
        self.core.state = StateEnum::Error;
        self.core.write_record_layer.clear();
        self.core.key_scheduler = None;
        actions.push(Action::ReportError(error));
    }

    fn report_misuse(&self, actions: &mut Actions, what: &str) {
        actions.push(Action::ReportError(Error::General(what.into())));
    }
}

/// Read-only views of the negotiated state.
impl ServerConnection {
    pub fn state(&self) -> StateEnum {
        self.core.state
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.core.version
    }

    pub fn cipher_suite(&self) -> Option<&'static Tls13CipherSuite> {
        self.core.suite
    }

    pub fn group(&self) -> Option<NamedGroup> {
        self.core.group
    }

    pub fn sig_scheme(&self) -> Option<SignatureScheme> {
        self.core.sig_scheme
    }

    pub fn psk_type(&self) -> Option<PskType> {
        self.core.psk_type
    }

    pub fn psk_mode(&self) -> Option<PskKeyExchangeMode> {
        self.core.psk_mode
    }

    pub fn key_exchange_type(&self) -> Option<KeyExchangeType> {
        self.core.key_exchange_type
    }

    pub fn early_data_type(&self) -> Option<EarlyDataType> {
        self.core.early_data_type
    }

    pub fn replay_cache_result(&self) -> Option<ReplayCacheResult> {
        self.core.replay_cache_result
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.core.alpn.as_deref()
    }

    pub fn sni(&self) -> Option<&str> {
        self.core.sni.as_deref()
    }

    /// How far the client's clock appeared to be from ours when it
    /// presented a ticket.  Negative means the client ran behind.
    pub fn client_clock_skew_millis(&self) -> Option<i64> {
        self.core.client_clock_skew_millis
    }

    /// When the handshake that authenticated this connection completed.
    pub fn handshake_time_millis(&self) -> Option<u64> {
        self.core.handshake_time_millis
    }

    pub fn handshake_logging(&self) -> Option<&HandshakeLogging> {
        self.core.handshake_logging.as_ref()
    }

    pub fn server_cert_compression_algo(&self) -> Option<CertificateCompressionAlgorithm> {
        self.core.server_cert_compression_algo
    }

    pub fn client_cert_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.core.client_cert.as_deref()
    }
}

fn expected_messages(state: StateEnum) -> Vec<HandshakeType> {
    match state {
        StateEnum::ExpectingClientHello => alloc::vec![HandshakeType::ClientHello],
        StateEnum::AcceptingEarlyData => alloc::vec![HandshakeType::EndOfEarlyData],
        StateEnum::ExpectingCertificate => alloc::vec![HandshakeType::Certificate],
        StateEnum::ExpectingCertificateVerify => alloc::vec![HandshakeType::CertificateVerify],
        StateEnum::ExpectingFinished => alloc::vec![HandshakeType::Finished],
        StateEnum::AcceptingData => alloc::vec![HandshakeType::KeyUpdate],
        _ => Vec::new(),
    }
}

fn handshake_type_of(payload: &HandshakePayload) -> HandshakeType {
    use HandshakePayload::*;
    match payload {
        ClientHello(_) => HandshakeType::ClientHello,
        ServerHello(_) | HelloRetryRequest(_) => HandshakeType::ServerHello,
        EncryptedExtensions(_) => HandshakeType::EncryptedExtensions,
        Certificate(_) => HandshakeType::Certificate,
        CompressedCertificate(_) => HandshakeType::CompressedCertificate,
        CertificateRequest(_) => HandshakeType::CertificateRequest,
        CertificateVerify(_) => HandshakeType::CertificateVerify,
        Finished(_) => HandshakeType::Finished,
        NewSessionTicket(_) => HandshakeType::NewSessionTicket,
        KeyUpdate(_) => HandshakeType::KeyUpdate,
        EndOfEarlyData => HandshakeType::EndOfEarlyData,
        MessageHash(_) => HandshakeType::MessageHash,
        Unknown(_) => HandshakeType::Unknown(0),
    }
}
