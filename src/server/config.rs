use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;

use pki_types::CertificateDer;

use crate::compress::CertCompressor;
use crate::crypto::{SecureRandom, SigningKey, SupportedKxGroup};
use crate::enums::{CipherSuite, NamedGroup, ProtocolVersion, SignatureScheme};
use crate::error::Error;
use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::PskKeyExchangeMode;
use crate::msgs::handshake::ClientHelloPayload;
use crate::sync::Arc;
use crate::tls13::Tls13CipherSuite;

/// How the server treats client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthRequirement {
    /// Never request one.
    None,
    /// Request one; an empty Certificate message is accepted.
    Optional,
    /// Request one; an empty Certificate message fails the handshake.
    Required,
}

/// Everything a sealed session ticket carries.
///
/// [`TicketCipher`] owns the sealed layout; this is the plaintext view both
/// sides of that boundary share.
#[derive(Clone, Debug)]
pub struct ResumptionState {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    /// The PSK itself.
    pub secret: Vec<u8>,
    pub alpn: Option<Vec<u8>>,
    /// Unix milliseconds at issuance.
    pub issued_at: u64,
    /// Validity in seconds from `issued_at`.
    pub lifetime: u32,
    /// Obfuscation offset for the client's ticket age.
    pub age_add: u32,
    pub max_early_data_size: u32,
    /// Opaque application token, checked by [`AppTokenValidator`] before
    /// early data is accepted.
    pub app_token: Vec<u8>,
    pub client_cert_chain: Option<Vec<CertificateDer<'static>>>,
}

impl Codec for ResumptionState {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.version.encode(bytes);
        self.cipher_suite.encode(bytes);
        PayloadU8::encode_slice(&self.secret, bytes);
        match &self.alpn {
            Some(alpn) => {
                1u8.encode(bytes);
                PayloadU8::encode_slice(alpn, bytes);
            }
            None => 0u8.encode(bytes),
        }
        self.issued_at.encode(bytes);
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.max_early_data_size.encode(bytes);
        PayloadU16::encode_slice(&self.app_token, bytes);
        match &self.client_cert_chain {
            Some(chain) => {
                (chain.len() as u8).encode(bytes);
                for cert in chain {
                    PayloadU16::encode_slice(cert.as_ref(), bytes);
                }
            }
            None => 0u8.encode(bytes),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, crate::error::InvalidMessage> {
        let version = ProtocolVersion::read(r)?;
        let cipher_suite = CipherSuite::read(r)?;
        let secret = PayloadU8::read(r)?.0;
        let alpn = match u8::read(r)? {
            0 => None,
            _ => Some(PayloadU8::read(r)?.0),
        };
        let issued_at = u64::read(r)?;
        let lifetime = u32::read(r)?;
        let age_add = u32::read(r)?;
        let max_early_data_size = u32::read(r)?;
        let app_token = PayloadU16::read(r)?.0;
        let chain_len = u8::read(r)?;
        let client_cert_chain = match chain_len {
            0 => None,
            n => {
                let mut chain = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    chain.push(CertificateDer::from(PayloadU16::read(r)?.0));
                }
                Some(chain)
            }
        };

        Ok(Self {
            version,
            cipher_suite,
            secret,
            alpn,
            issued_at,
            lifetime,
            age_add,
            max_early_data_size,
            app_token,
            client_cert_chain,
        })
    }
}

/// The credential chosen for one handshake.
pub struct SelectedCert {
    /// Leaf first.
    pub chain: Vec<CertificateDer<'static>>,
    /// Signs the CertificateVerify message.
    pub signer: Arc<dyn SigningKey>,
}

/// Chooses a server credential for each handshake.
pub trait CertManager: Send + Sync {
    /// Pick a certificate chain and signing key for a handshake with the
    /// given SNI and client capabilities.
    fn get_cert(
        &self,
        sni: Option<&str>,
        sig_schemes: &[SignatureScheme],
        groups: &[NamedGroup],
    ) -> Result<SelectedCert, Error>;
}

/// Verifies client certificates and their handshake signatures.
///
/// X.509 parsing and path building happen entirely behind this boundary.
pub trait CertVerifier: Send + Sync {
    /// Verify a presented chain (leaf first).
    fn verify_chain(&self, chain: &[CertificateDer<'_>]) -> Result<(), Error>;

    /// Verify `signature` over `message` by the leaf certificate's key.
    fn verify_signature(
        &self,
        scheme: SignatureScheme,
        message: &[u8],
        end_entity: &CertificateDer<'_>,
        signature: &[u8],
    ) -> Result<(), Error>;

    /// Signature schemes acceptable in the client's CertificateVerify.
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme>;
}

/// Seals and unseals session tickets.
pub trait TicketCipher: Send + Sync {
    /// Seal `state` into an opaque ticket.  `None` disables the ticket.
    fn encrypt(&self, state: &ResumptionState) -> Option<Vec<u8>>;

    /// Unseal a ticket.  `None` rejects it (the handshake continues
    /// without resumption).
    fn decrypt(&self, ticket: &[u8]) -> Option<ResumptionState>;
}

/// What the replay cache knows about a PSK identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCacheResult {
    NotReplay,
    MaybeReplay,
    Replay,
}

/// Limits 0-RTT replay by remembering observed PSK identities.
pub trait ReplayCache: Send + Sync {
    fn check(&self, psk_identity: &[u8]) -> ReplayCacheResult;
}

/// Application hook deciding whether a ticket's token still authorizes
/// early data.
pub trait AppTokenValidator: Send + Sync {
    fn validate(&self, state: &ResumptionState) -> bool;
}

/// Application hook contributing extensions to EncryptedExtensions.
pub trait ServerExtensions: Send + Sync {
    /// Observe the ClientHello before any reply is produced.
    fn on_client_hello(&self, _hello: &ClientHelloPayload) {}

    /// Raw `(extension type, body)` pairs appended to EncryptedExtensions.
    fn encrypted_extensions(&self) -> Vec<(u16, Vec<u8>)> {
        Vec::new()
    }
}

/// Supplies the current time, for ticket ages and handshake timestamps.
pub trait TimeProvider: Send + Sync + Debug {
    /// Unix time in milliseconds.
    fn current_time_millis(&self) -> u64;
}

/// Process-wide configuration shared by all connections.
///
/// Construct with [`ServerConfig::new`], adjust fields, wrap in an `Arc`.
pub struct ServerConfig {
    /// Supported cipher suites, server preference order.
    pub cipher_suites: Vec<&'static Tls13CipherSuite>,

    /// Supported key exchange groups, server preference order.
    pub kx_groups: Vec<&'static dyn SupportedKxGroup>,

    /// Prefer the client's cipher suite order over ours.
    pub honor_client_order: bool,

    /// ALPN protocols we speak, server preference order.  Empty disables
    /// ALPN.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// PSK key exchange modes we accept.
    pub psk_modes: Vec<PskKeyExchangeMode>,

    pub cert_manager: Arc<dyn CertManager>,

    pub client_auth: ClientAuthRequirement,

    /// Required when `client_auth` is not `None`.
    pub client_cert_verifier: Option<Arc<dyn CertVerifier>>,

    pub ticketer: Arc<dyn TicketCipher>,

    pub replay_cache: Arc<dyn ReplayCache>,

    pub app_token_validator: Arc<dyn AppTokenValidator>,

    /// Token sealed into tickets for `app_token_validator` to inspect later.
    pub app_token: Vec<u8>,

    pub server_extensions: Option<Arc<dyn ServerExtensions>>,

    pub time_provider: Arc<dyn TimeProvider>,

    pub random: &'static dyn SecureRandom,

    /// Early data bytes we will accept per connection.  Zero disables
    /// 0-RTT.
    pub max_early_data_size: u32,

    /// NewSessionTickets sent after each completed handshake.
    pub send_new_session_tickets: usize,

    /// Ticket validity in seconds.
    pub ticket_lifetime: u32,

    /// Tolerated disagreement between the client's ticket age and ours,
    /// in milliseconds.
    pub max_ticket_age_skew_millis: u64,

    /// Certificate compression algorithms offered to clients.
    pub cert_compressors: Vec<&'static dyn CertCompressor>,
}

impl ServerConfig {
    /// A config with library defaults: all suites and groups, one ticket
    /// per handshake, no client auth, no 0-RTT.
    pub fn new(cert_manager: Arc<dyn CertManager>) -> Self {
        Self {
            cipher_suites: crate::tls13::ALL_CIPHER_SUITES.to_vec(),
            kx_groups: crate::crypto::provider::kx::ALL_KX_GROUPS.to_vec(),
            honor_client_order: false,
            alpn_protocols: Vec::new(),
            psk_modes: alloc::vec![PskKeyExchangeMode::PSK_DHE_KE],
            cert_manager,
            client_auth: ClientAuthRequirement::None,
            client_cert_verifier: None,
            ticketer: Arc::new(super::handy::AeadTicketer::new()),
            replay_cache: Arc::new(super::handy::NoneReplayCache),
            app_token_validator: Arc::new(super::handy::AlwaysValidTokenValidator),
            app_token: Vec::new(),
            server_extensions: None,
            time_provider: Arc::new(super::handy::SystemTimeProvider),
            random: &crate::crypto::provider::RANDOM,
            max_early_data_size: 0,
            send_new_session_tickets: 1,
            ticket_lifetime: 6 * 60 * 60,
            max_ticket_age_skew_millis: 10_000,
            cert_compressors: crate::compress::default_cert_compressors().to_vec(),
        }
    }

    pub(crate) fn supports_psk_mode(&self, mode: PskKeyExchangeMode) -> bool {
        self.psk_modes.contains(&mode)
    }

    pub(crate) fn select_alpn(&self, offered: Option<&[crate::msgs::handshake::ProtocolName]>) -> Result<Option<Vec<u8>>, Error> {
        let Some(offered) = offered else {
            return Ok(None);
        };
        if self.alpn_protocols.is_empty() {
            return Ok(None);
        }
        for ours in &self.alpn_protocols {
            if offered.iter().any(|theirs| theirs.0 == *ours) {
                return Ok(Some(ours.clone()));
            }
        }
        Err(Error::NoApplicationProtocol)
    }
}

impl Debug for ServerConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("cipher_suites", &self.cipher_suites)
            .field("client_auth", &self.client_auth)
            .field("max_early_data_size", &self.max_early_data_size)
            .field("alpn_protocols", &ProtocolList(&self.alpn_protocols))
            .finish_non_exhaustive()
    }
}

struct ProtocolList<'a>(&'a [Vec<u8>]);

impl Debug for ProtocolList<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_list();
        for proto in self.0 {
            match core::str::from_utf8(proto) {
                Ok(s) => list.entry(&s),
                Err(_) => list.entry(proto),
            };
        }
        list.finish()
    }
}

/// Snapshot of the client's first flight, for observability only.
///
/// Populated from the first ClientHello and never consulted by the state
/// machine afterwards.
#[derive(Clone, Debug, Default)]
pub struct HandshakeLogging {
    pub client_legacy_version: Option<ProtocolVersion>,
    pub client_supported_versions: Vec<ProtocolVersion>,
    pub client_ciphers: Vec<CipherSuite>,
    pub client_extensions: Vec<u16>,
    pub client_sni: Option<String>,
    pub client_supported_groups: Vec<NamedGroup>,
    pub client_key_shares: Vec<NamedGroup>,
    pub client_key_exchange_modes: Vec<PskKeyExchangeMode>,
    pub client_signature_algorithms: Vec<SignatureScheme>,
    pub client_session_id_sent: bool,
    pub client_random: Option<[u8; 32]>,
}

impl HandshakeLogging {
    pub(crate) fn from_client_hello(hello: &ClientHelloPayload) -> Self {
        Self {
            client_legacy_version: Some(hello.client_version),
            client_supported_versions: hello
                .supported_versions()
                .unwrap_or_default()
                .to_vec(),
            client_ciphers: hello.cipher_suites.clone(),
            client_extensions: hello
                .extensions
                .iter()
                .map(|ext| u16::from(ext.ext_type()))
                .collect(),
            client_sni: hello.sni_hostname(),
            client_supported_groups: hello.named_groups().unwrap_or_default().to_vec(),
            client_key_shares: hello
                .key_shares()
                .unwrap_or_default()
                .iter()
                .map(|share| share.group)
                .collect(),
            client_key_exchange_modes: hello.psk_modes().unwrap_or_default().to_vec(),
            client_signature_algorithms: hello
                .signature_schemes()
                .unwrap_or_default()
                .to_vec(),
            client_session_id_sent: !hello.session_id.is_empty(),
            client_random: Some(hello.random.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumption_state_round_trip() {
        let state = ResumptionState {
            version: ProtocolVersion::TLSv1_3,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            secret: alloc::vec![0xab; 32],
            alpn: Some(b"h2".to_vec()),
            issued_at: 1_700_000_000_000,
            lifetime: 7200,
            age_add: 0xdead_beef,
            max_early_data_size: 16384,
            app_token: b"token".to_vec(),
            client_cert_chain: None,
        };
        let parsed = ResumptionState::read_bytes(&state.get_encoding()).unwrap();
        assert_eq!(parsed.cipher_suite, state.cipher_suite);
        assert_eq!(parsed.secret, state.secret);
        assert_eq!(parsed.alpn, state.alpn);
        assert_eq!(parsed.issued_at, state.issued_at);
        assert_eq!(parsed.age_add, state.age_add);
        assert_eq!(parsed.app_token, state.app_token);
        assert!(parsed.client_cert_chain.is_none());
    }

    #[test]
    fn alpn_selection_prefers_server_order() {
        let mut config = ServerConfig::new(Arc::new(super::super::handy::SingleCertManager::new(
            crate::server::handy::test_cert(),
        )));
        config.alpn_protocols = alloc::vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let offered = alloc::vec![
            crate::msgs::handshake::ProtocolName::new(b"http/1.1".to_vec()),
            crate::msgs::handshake::ProtocolName::new(b"h2".to_vec()),
        ];
        assert_eq!(
            config.select_alpn(Some(&offered)).unwrap(),
            Some(b"h2".to_vec())
        );

        let unknown = alloc::vec![crate::msgs::handshake::ProtocolName::new(b"spdy".to_vec())];
        assert!(config.select_alpn(Some(&unknown)).is_err());
        assert_eq!(config.select_alpn(None).unwrap(), None);
    }
}
