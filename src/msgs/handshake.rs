use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use pki_types::CertificateDer;

use crate::enums::{
    CertificateCompressionAlgorithm, CipherSuite, HandshakeType, NamedGroup, ProtocolVersion,
    SignatureScheme,
};
use crate::error::InvalidMessage;
use crate::msgs::base::{Payload, PayloadU16, PayloadU24, PayloadU8};
use crate::msgs::codec::{
    u24, Codec, LengthPrefixedBuffer, ListLength, Reader, TlsListElement,
};
use crate::msgs::enums::{
    Compression, ExtensionType, KeyUpdateRequest, PskKeyExchangeMode, ServerNameType,
};

/// The random value in {Client,Server}Hello.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Random(pub [u8; 32]);

/// The magic `ServerHello.random` marking a HelloRetryRequest.
pub static HELLO_RETRY_REQUEST_RANDOM: Random = Random([
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
]);

impl Codec for Random {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let Some(bytes) = r.take(32) else {
            return Err(InvalidMessage::MissingData("Random"));
        };
        let mut opaque = [0; 32];
        opaque.clone_from_slice(bytes);
        Ok(Self(opaque))
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::base::hex(f, &self.0)
    }
}

/// A session ID: up to 32 opaque bytes, echoed for middlebox compatibility.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SessionId {
    data: [u8; 32],
    len: usize,
}

impl SessionId {
    pub fn empty() -> Self {
        Self {
            data: [0; 32],
            len: 0,
        }
    }

    pub fn new(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= 32);
        let mut data = [0; 32];
        data[..bytes.len()].copy_from_slice(bytes);
        Self {
            data,
            len: bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl Codec for SessionId {
    fn encode(&self, bytes: &mut Vec<u8>) {
        PayloadU8::encode_slice(self.as_ref(), bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let len = u8::read(r)? as usize;
        if len > 32 {
            return Err(InvalidMessage::TrailingData("SessionId"));
        }
        let Some(bytes) = r.take(len) else {
            return Err(InvalidMessage::MissingData("SessionId"));
        };
        Ok(Self::new(bytes))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::base::hex(f, self.as_ref())
    }
}

/// An ALPN protocol name: one to 255 opaque bytes.
pub type ProtocolName = PayloadU8;

// covers both ALPN protocol lists and PSK binder lists
impl TlsListElement for PayloadU8 {
    const SIZE_LEN: ListLength = ListLength::U16;
}

impl TlsListElement for ProtocolVersion {
    const SIZE_LEN: ListLength = ListLength::U8;
}

impl TlsListElement for CipherSuite {
    const SIZE_LEN: ListLength = ListLength::U16;
}

impl TlsListElement for Compression {
    const SIZE_LEN: ListLength = ListLength::U8;
}

impl TlsListElement for NamedGroup {
    const SIZE_LEN: ListLength = ListLength::U16;
}

impl TlsListElement for SignatureScheme {
    const SIZE_LEN: ListLength = ListLength::U16;
}

impl TlsListElement for PskKeyExchangeMode {
    const SIZE_LEN: ListLength = ListLength::U8;
}

impl TlsListElement for CertificateCompressionAlgorithm {
    const SIZE_LEN: ListLength = ListLength::U8;
}

/// An extension we don't handle, carried opaquely.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownExtension {
    pub typ: ExtensionType,
    pub payload: Payload,
}

impl UnknownExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.payload.encode(bytes);
    }

    fn read(typ: ExtensionType, r: &mut Reader<'_>) -> Self {
        let payload = Payload::new(r.rest());
        Self { typ, payload }
    }
}

/// One client key share: a group plus its opaque key exchange payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub payload: PayloadU16,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, payload: &[u8]) -> Self {
        Self {
            group,
            payload: PayloadU16::new(payload.to_vec()),
        }
    }
}

impl Codec for KeyShareEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.group.encode(bytes);
        self.payload.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            group: NamedGroup::read(r)?,
            payload: PayloadU16::read(r)?,
        })
    }
}

impl TlsListElement for KeyShareEntry {
    const SIZE_LEN: ListLength = ListLength::U16;
}

/// One offered PSK identity with its obfuscated age.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PskIdentity {
    pub identity: PayloadU16,
    pub obfuscated_ticket_age: u32,
}

impl PskIdentity {
    pub fn new(id: Vec<u8>, age: u32) -> Self {
        Self {
            identity: PayloadU16::new(id),
            obfuscated_ticket_age: age,
        }
    }
}

impl Codec for PskIdentity {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identity.encode(bytes);
        self.obfuscated_ticket_age.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            identity: PayloadU16::read(r)?,
            obfuscated_ticket_age: u32::read(r)?,
        })
    }
}

impl TlsListElement for PskIdentity {
    const SIZE_LEN: ListLength = ListLength::U16;
}

/// A PSK binder: an HMAC proving knowledge of the PSK over a partial
/// ClientHello.
pub type PskBinder = PayloadU8;

/// The body of the `pre_shared_key` ClientHello extension.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresharedKeyOffer {
    pub identities: Vec<PskIdentity>,
    pub binders: Vec<PskBinder>,
}

impl PresharedKeyOffer {
    pub fn new(identity: PskIdentity, binder: Vec<u8>) -> Self {
        Self {
            identities: alloc::vec![identity],
            binders: alloc::vec![PskBinder::new(binder)],
        }
    }

    /// Wire size of the binders section, including its length prefix.
    pub(crate) fn binders_len(&self) -> usize {
        2 + self
            .binders
            .iter()
            .map(|b| 1 + b.0.len())
            .sum::<usize>()
    }
}

impl Codec for PresharedKeyOffer {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identities.encode(bytes);
        self.binders.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            identities: Vec::read(r)?,
            binders: Vec::read(r)?,
        })
    }
}

/// The `server_name` extension body, reduced to the single DNS hostname
/// case this library serves.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerNameRequest {
    raw: PayloadU16,
}

impl ServerNameRequest {
    pub fn single_hostname(name: &str) -> Self {
        let mut body = Vec::new();
        ServerNameType::HostName.encode(&mut body);
        PayloadU16::encode_slice(name.as_bytes(), &mut body);
        Self {
            raw: PayloadU16::new(body),
        }
    }

    /// The requested hostname, when exactly understood.
    pub fn dns_hostname(&self) -> Option<String> {
        let mut r = Reader::init(&self.raw.0);
        while r.any_left() {
            let typ = ServerNameType::read(&mut r).ok()?;
            let name = PayloadU16::read(&mut r).ok()?;
            if typ == ServerNameType::HostName {
                return String::from_utf8(name.0).ok();
            }
        }
        None
    }
}

impl Codec for ServerNameRequest {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.raw.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            raw: PayloadU16::read(r)?,
        })
    }
}

/// One extension in a ClientHello.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientExtension {
    ServerName(ServerNameRequest),
    SupportedVersions(Vec<ProtocolVersion>),
    NamedGroups(Vec<NamedGroup>),
    SignatureAlgorithms(Vec<SignatureScheme>),
    Protocols(Vec<ProtocolName>),
    KeyShare(Vec<KeyShareEntry>),
    PresharedKeyModes(Vec<PskKeyExchangeMode>),
    PresharedKey(PresharedKeyOffer),
    EarlyData,
    Cookie(PayloadU16),
    CertificateCompressionAlgorithms(Vec<CertificateCompressionAlgorithm>),
    Unknown(UnknownExtension),
}

impl ClientExtension {
    pub fn ext_type(&self) -> ExtensionType {
        match self {
            Self::ServerName(_) => ExtensionType::ServerName,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::NamedGroups(_) => ExtensionType::EllipticCurves,
            Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
            Self::Protocols(_) => ExtensionType::ALProtocolNegotiation,
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::PresharedKeyModes(_) => ExtensionType::PSKKeyExchangeModes,
            Self::PresharedKey(_) => ExtensionType::PreSharedKey,
            Self::EarlyData => ExtensionType::EarlyData,
            Self::Cookie(_) => ExtensionType::Cookie,
            Self::CertificateCompressionAlgorithms(_) => ExtensionType::CompressCertificate,
            Self::Unknown(r) => r.typ,
        }
    }
}

impl Codec for ClientExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.ext_type().encode(bytes);
        let nest = LengthPrefixedBuffer::new(ListLength::U16, bytes);
        match self {
            Self::ServerName(r) => r.encode(nest.buf),
            Self::SupportedVersions(r) => r.encode(nest.buf),
            Self::NamedGroups(r) => r.encode(nest.buf),
            Self::SignatureAlgorithms(r) => r.encode(nest.buf),
            Self::Protocols(r) => r.encode(nest.buf),
            Self::KeyShare(r) => r.encode(nest.buf),
            Self::PresharedKeyModes(r) => r.encode(nest.buf),
            Self::PresharedKey(r) => r.encode(nest.buf),
            Self::EarlyData => {}
            Self::Cookie(r) => r.encode(nest.buf),
            Self::CertificateCompressionAlgorithms(r) => r.encode(nest.buf),
            Self::Unknown(r) => r.encode(nest.buf),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::ServerName => Self::ServerName(ServerNameRequest::read(&mut sub)?),
            ExtensionType::SupportedVersions => Self::SupportedVersions(Vec::read(&mut sub)?),
            ExtensionType::EllipticCurves => Self::NamedGroups(Vec::read(&mut sub)?),
            ExtensionType::SignatureAlgorithms => Self::SignatureAlgorithms(Vec::read(&mut sub)?),
            ExtensionType::ALProtocolNegotiation => Self::Protocols(Vec::read(&mut sub)?),
            ExtensionType::KeyShare => Self::KeyShare(Vec::read(&mut sub)?),
            ExtensionType::PSKKeyExchangeModes => Self::PresharedKeyModes(Vec::read(&mut sub)?),
            ExtensionType::PreSharedKey => Self::PresharedKey(PresharedKeyOffer::read(&mut sub)?),
            ExtensionType::EarlyData => Self::EarlyData,
            ExtensionType::Cookie => Self::Cookie(PayloadU16::read(&mut sub)?),
            ExtensionType::CompressCertificate => {
                Self::CertificateCompressionAlgorithms(Vec::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        sub.expect_empty("ClientExtension")?;
        Ok(ext)
    }
}

impl TlsListElement for ClientExtension {
    const SIZE_LEN: ListLength = ListLength::U16;
}

/// One extension in a ServerHello or EncryptedExtensions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServerExtension {
    KeyShare(KeyShareEntry),
    PresharedKey(u16),
    SupportedVersions(ProtocolVersion),
    ServerNameAck,
    EarlyData,
    SelectedProtocol(ProtocolName),
    Unknown(UnknownExtension),
}

impl ServerExtension {
    pub fn ext_type(&self) -> ExtensionType {
        match self {
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::PresharedKey(_) => ExtensionType::PreSharedKey,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::ServerNameAck => ExtensionType::ServerName,
            Self::EarlyData => ExtensionType::EarlyData,
            Self::SelectedProtocol(_) => ExtensionType::ALProtocolNegotiation,
            Self::Unknown(r) => r.typ,
        }
    }
}

impl Codec for ServerExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.ext_type().encode(bytes);
        let nest = LengthPrefixedBuffer::new(ListLength::U16, bytes);
        match self {
            Self::KeyShare(r) => r.encode(nest.buf),
            Self::PresharedKey(r) => r.encode(nest.buf),
            Self::SupportedVersions(r) => r.encode(nest.buf),
            Self::ServerNameAck | Self::EarlyData => {}
            Self::SelectedProtocol(r) => {
                // a one-element protocol list
                let list = LengthPrefixedBuffer::new(ListLength::U16, nest.buf);
                r.encode(list.buf);
            }
            Self::Unknown(r) => r.encode(nest.buf),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::KeyShare => Self::KeyShare(KeyShareEntry::read(&mut sub)?),
            ExtensionType::PreSharedKey => Self::PresharedKey(u16::read(&mut sub)?),
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(ProtocolVersion::read(&mut sub)?)
            }
            ExtensionType::ServerName => Self::ServerNameAck,
            ExtensionType::EarlyData => Self::EarlyData,
            ExtensionType::ALProtocolNegotiation => {
                let mut protocols: Vec<ProtocolName> = Vec::read(&mut sub)?;
                match protocols.len() {
                    1 => Self::SelectedProtocol(protocols.remove(0)),
                    _ => return Err(InvalidMessage::InvalidDeclaredLength("ALPN")),
                }
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        sub.expect_empty("ServerExtension")?;
        Ok(ext)
    }
}

impl TlsListElement for ServerExtension {
    const SIZE_LEN: ListLength = ListLength::U16;
}

/// One extension in a HelloRetryRequest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HelloRetryExtension {
    KeyShare(NamedGroup),
    Cookie(PayloadU16),
    SupportedVersions(ProtocolVersion),
    Unknown(UnknownExtension),
}

impl HelloRetryExtension {
    pub fn ext_type(&self) -> ExtensionType {
        match self {
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::Cookie(_) => ExtensionType::Cookie,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::Unknown(r) => r.typ,
        }
    }
}

impl Codec for HelloRetryExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.ext_type().encode(bytes);
        let nest = LengthPrefixedBuffer::new(ListLength::U16, bytes);
        match self {
            Self::KeyShare(r) => r.encode(nest.buf),
            Self::Cookie(r) => r.encode(nest.buf),
            Self::SupportedVersions(r) => r.encode(nest.buf),
            Self::Unknown(r) => r.encode(nest.buf),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::KeyShare => Self::KeyShare(NamedGroup::read(&mut sub)?),
            ExtensionType::Cookie => Self::Cookie(PayloadU16::read(&mut sub)?),
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(ProtocolVersion::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        sub.expect_empty("HelloRetryExtension")?;
        Ok(ext)
    }
}

impl TlsListElement for HelloRetryExtension {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Debug)]
pub struct ClientHelloPayload {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<Compression>,
    pub extensions: Vec<ClientExtension>,
}

impl Codec for ClientHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.client_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suites.encode(bytes);
        self.compression_methods.encode(bytes);

        if !self.extensions.is_empty() {
            self.extensions.encode(bytes);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let mut ret = Self {
            client_version: ProtocolVersion::read(r)?,
            random: Random::read(r)?,
            session_id: SessionId::read(r)?,
            cipher_suites: Vec::read(r)?,
            compression_methods: Vec::read(r)?,
            extensions: Vec::new(),
        };

        if r.any_left() {
            ret.extensions = Vec::read(r)?;
        }

        match r.any_left() {
            true => Err(InvalidMessage::TrailingData("ClientHelloPayload")),
            false => Ok(ret),
        }
    }
}

impl ClientHelloPayload {
    pub fn find_extension(&self, ext: ExtensionType) -> Option<&ClientExtension> {
        self.extensions
            .iter()
            .find(|x| x.ext_type() == ext)
    }

    pub fn has_duplicate_extension(&self) -> bool {
        let mut seen = Vec::new();
        for ext in &self.extensions {
            let typ = u16::from(ext.ext_type());
            if seen.contains(&typ) {
                return true;
            }
            seen.push(typ);
        }
        false
    }

    pub fn supported_versions(&self) -> Option<&[ProtocolVersion]> {
        match self.find_extension(ExtensionType::SupportedVersions) {
            Some(ClientExtension::SupportedVersions(vers)) => Some(vers),
            _ => None,
        }
    }

    pub fn named_groups(&self) -> Option<&[NamedGroup]> {
        match self.find_extension(ExtensionType::EllipticCurves) {
            Some(ClientExtension::NamedGroups(groups)) => Some(groups),
            _ => None,
        }
    }

    pub fn signature_schemes(&self) -> Option<&[SignatureScheme]> {
        match self.find_extension(ExtensionType::SignatureAlgorithms) {
            Some(ClientExtension::SignatureAlgorithms(schemes)) => Some(schemes),
            _ => None,
        }
    }

    pub fn key_shares(&self) -> Option<&[KeyShareEntry]> {
        match self.find_extension(ExtensionType::KeyShare) {
            Some(ClientExtension::KeyShare(shares)) => Some(shares),
            _ => None,
        }
    }

    pub fn has_keyshare_extension_with_duplicates(&self) -> bool {
        if let Some(entries) = self.key_shares() {
            let mut seen = Vec::new();
            for entry in entries {
                let group = u16::from(entry.group);
                if seen.contains(&group) {
                    return true;
                }
                seen.push(group);
            }
        }
        false
    }

    pub fn psk(&self) -> Option<&PresharedKeyOffer> {
        match self.find_extension(ExtensionType::PreSharedKey) {
            Some(ClientExtension::PresharedKey(psk)) => Some(psk),
            _ => None,
        }
    }

    pub fn check_psk_ext_is_last(&self) -> bool {
        self.extensions
            .last()
            .map(|ext| ext.ext_type() == ExtensionType::PreSharedKey)
            .unwrap_or(false)
    }

    pub fn psk_modes(&self) -> Option<&[PskKeyExchangeMode]> {
        match self.find_extension(ExtensionType::PSKKeyExchangeModes) {
            Some(ClientExtension::PresharedKeyModes(modes)) => Some(modes),
            _ => None,
        }
    }

    pub fn psk_mode_offered(&self, mode: PskKeyExchangeMode) -> bool {
        self.psk_modes()
            .map(|modes| modes.contains(&mode))
            .unwrap_or(false)
    }

    pub fn early_data_offered(&self) -> bool {
        self.find_extension(ExtensionType::EarlyData)
            .is_some()
    }

    pub fn sni_hostname(&self) -> Option<String> {
        match self.find_extension(ExtensionType::ServerName) {
            Some(ClientExtension::ServerName(req)) => req.dns_hostname(),
            _ => None,
        }
    }

    pub fn alpn_protocols(&self) -> Option<&[ProtocolName]> {
        match self.find_extension(ExtensionType::ALProtocolNegotiation) {
            Some(ClientExtension::Protocols(protocols)) => Some(protocols),
            _ => None,
        }
    }

    pub fn certificate_compression_algorithms(
        &self,
    ) -> Option<&[CertificateCompressionAlgorithm]> {
        match self.find_extension(ExtensionType::CompressCertificate) {
            Some(ClientExtension::CertificateCompressionAlgorithms(algs)) => Some(algs),
            _ => None,
        }
    }

    pub fn cookie(&self) -> Option<&PayloadU16> {
        match self.find_extension(ExtensionType::Cookie) {
            Some(ClientExtension::Cookie(cookie)) => Some(cookie),
            _ => None,
        }
    }

    /// The message encoding with the binders section removed, which is what
    /// each binder authenticates (RFC 8446 section 4.2.11.2).
    ///
    /// `full_encoding` must be the complete handshake-framed encoding of
    /// this message.
    pub(crate) fn binder_plaintext_from(&self, full_encoding: &[u8]) -> Vec<u8> {
        let truncate = match self.psk() {
            Some(offer) => offer.binders_len(),
            None => 0,
        };
        full_encoding[..full_encoding.len() - truncate].to_vec()
    }
}

#[derive(Clone, Debug)]
pub struct ServerHelloPayload {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: Compression,
    pub extensions: Vec<ServerExtension>,
}

impl Codec for ServerHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.compression_method.encode(bytes);
        self.extensions.encode(bytes);
    }

    // The HRR discrimination on `random` happens a level up, in
    // `HandshakeMessagePayload::read`.
    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            legacy_version: ProtocolVersion::read(r)?,
            random: Random::read(r)?,
            session_id: SessionId::read(r)?,
            cipher_suite: CipherSuite::read(r)?,
            compression_method: Compression::read(r)?,
            extensions: Vec::read(r)?,
        })
    }
}

impl ServerHelloPayload {
    pub fn key_share(&self) -> Option<&KeyShareEntry> {
        self.extensions.iter().find_map(|ext| match ext {
            ServerExtension::KeyShare(share) => Some(share),
            _ => None,
        })
    }

    pub fn psk_index(&self) -> Option<u16> {
        self.extensions.iter().find_map(|ext| match ext {
            ServerExtension::PresharedKey(index) => Some(*index),
            _ => None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct HelloRetryRequest {
    pub legacy_version: ProtocolVersion,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub extensions: Vec<HelloRetryExtension>,
}

impl Codec for HelloRetryRequest {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        HELLO_RETRY_REQUEST_RANDOM.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        Compression::Null.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        // the random was consumed by the caller to identify us
        let session_id = SessionId::read(r)?;
        let cipher_suite = CipherSuite::read(r)?;
        let compression = Compression::read(r)?;
        if compression != Compression::Null {
            return Err(InvalidMessage::UnexpectedMessage("HelloRetryRequest"));
        }

        Ok(Self {
            legacy_version: ProtocolVersion::TLSv1_2,
            session_id,
            cipher_suite,
            extensions: Vec::read(r)?,
        })
    }
}

impl HelloRetryRequest {
    pub fn requested_key_share_group(&self) -> Option<NamedGroup> {
        self.extensions.iter().find_map(|ext| match ext {
            HelloRetryExtension::KeyShare(group) => Some(*group),
            _ => None,
        })
    }
}

/// One certificate in a Certificate message, with its per-entry extensions
/// kept opaque.
#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub cert: CertificateDer<'static>,
    pub exts: PayloadU16,
}

impl CertificateEntry {
    pub fn new(cert: CertificateDer<'static>) -> Self {
        Self {
            cert,
            exts: PayloadU16::empty(),
        }
    }
}

impl Codec for CertificateEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        u24(self.cert.as_ref().len() as u32).encode(bytes);
        bytes.extend_from_slice(self.cert.as_ref());
        self.exts.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let body = PayloadU24::read(r)?;
        Ok(Self {
            cert: CertificateDer::from(body.0),
            exts: PayloadU16::read(r)?,
        })
    }
}

impl TlsListElement for CertificateEntry {
    const SIZE_LEN: ListLength = ListLength::U24 { max: 0xff_ffff };
}

#[derive(Clone, Debug, Default)]
pub struct CertificatePayload {
    pub context: PayloadU8,
    pub entries: Vec<CertificateEntry>,
}

impl CertificatePayload {
    pub fn from_chain(chain: Vec<CertificateDer<'static>>) -> Self {
        Self {
            context: PayloadU8::empty(),
            entries: chain
                .into_iter()
                .map(CertificateEntry::new)
                .collect(),
        }
    }

    pub fn any_entry_has_extension(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| !entry.exts.0.is_empty())
    }

    pub fn into_chain(self) -> Vec<CertificateDer<'static>> {
        self.entries
            .into_iter()
            .map(|entry| entry.cert)
            .collect()
    }
}

impl Codec for CertificatePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        self.entries.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            context: PayloadU8::read(r)?,
            entries: Vec::read(r)?,
        })
    }
}

/// An RFC 8879 CompressedCertificate message body.
#[derive(Clone, Debug)]
pub struct CompressedCertificatePayload {
    pub algorithm: CertificateCompressionAlgorithm,
    pub uncompressed_len: u24,
    pub compressed: PayloadU24,
}

impl Codec for CompressedCertificatePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.algorithm.encode(bytes);
        self.uncompressed_len.encode(bytes);
        self.compressed.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            algorithm: CertificateCompressionAlgorithm::read(r)?,
            uncompressed_len: u24::read(r)?,
            compressed: PayloadU24::read(r)?,
        })
    }
}

/// One extension in a CertificateRequest.
#[derive(Clone, Debug)]
pub enum CertReqExtension {
    SignatureAlgorithms(Vec<SignatureScheme>),
    Unknown(UnknownExtension),
}

impl CertReqExtension {
    pub fn ext_type(&self) -> ExtensionType {
        match self {
            Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
            Self::Unknown(r) => r.typ,
        }
    }
}

impl Codec for CertReqExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.ext_type().encode(bytes);
        let nest = LengthPrefixedBuffer::new(ListLength::U16, bytes);
        match self {
            Self::SignatureAlgorithms(r) => r.encode(nest.buf),
            Self::Unknown(r) => r.encode(nest.buf),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::SignatureAlgorithms => {
                let schemes: Vec<SignatureScheme> = Vec::read(&mut sub)?;
                if schemes.is_empty() {
                    return Err(InvalidMessage::NoSignatureSchemes);
                }
                Self::SignatureAlgorithms(schemes)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        sub.expect_empty("CertReqExtension")?;
        Ok(ext)
    }
}

impl TlsListElement for CertReqExtension {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Debug)]
pub struct CertificateRequestPayload {
    pub context: PayloadU8,
    pub extensions: Vec<CertReqExtension>,
}

impl Codec for CertificateRequestPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            context: PayloadU8::read(r)?,
            extensions: Vec::read(r)?,
        })
    }
}

/// A signature with the scheme that produced it.
#[derive(Clone, Debug)]
pub struct DigitallySignedStruct {
    pub scheme: SignatureScheme,
    pub sig: PayloadU16,
}

impl DigitallySignedStruct {
    pub fn new(scheme: SignatureScheme, sig: Vec<u8>) -> Self {
        Self {
            scheme,
            sig: PayloadU16::new(sig),
        }
    }
}

impl Codec for DigitallySignedStruct {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.scheme.encode(bytes);
        self.sig.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            scheme: SignatureScheme::read(r)?,
            sig: PayloadU16::read(r)?,
        })
    }
}

/// One extension in a NewSessionTicket.
#[derive(Clone, Debug)]
pub enum NewSessionTicketExtension {
    EarlyData(u32),
    Unknown(UnknownExtension),
}

impl NewSessionTicketExtension {
    pub fn ext_type(&self) -> ExtensionType {
        match self {
            Self::EarlyData(_) => ExtensionType::EarlyData,
            Self::Unknown(r) => r.typ,
        }
    }
}

impl Codec for NewSessionTicketExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.ext_type().encode(bytes);
        let nest = LengthPrefixedBuffer::new(ListLength::U16, bytes);
        match self {
            Self::EarlyData(r) => r.encode(nest.buf),
            Self::Unknown(r) => r.encode(nest.buf),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::EarlyData => Self::EarlyData(u32::read(&mut sub)?),
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        sub.expect_empty("NewSessionTicketExtension")?;
        Ok(ext)
    }
}

impl TlsListElement for NewSessionTicketExtension {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Debug)]
pub struct NewSessionTicketPayload {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: PayloadU8,
    pub ticket: PayloadU16,
    pub extensions: Vec<NewSessionTicketExtension>,
}

impl NewSessionTicketPayload {
    pub fn new(lifetime: u32, age_add: u32, nonce: Vec<u8>, ticket: Vec<u8>) -> Self {
        Self {
            lifetime,
            age_add,
            nonce: PayloadU8::new(nonce),
            ticket: PayloadU16::new(ticket),
            extensions: Vec::new(),
        }
    }

    pub fn max_early_data_size(&self) -> Option<u32> {
        self.extensions.iter().find_map(|ext| match ext {
            NewSessionTicketExtension::EarlyData(sz) => Some(*sz),
            _ => None,
        })
    }
}

impl Codec for NewSessionTicketPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.nonce.encode(bytes);
        self.ticket.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            lifetime: u32::read(r)?,
            age_add: u32::read(r)?,
            nonce: PayloadU8::read(r)?,
            ticket: PayloadU16::read(r)?,
            extensions: Vec::read(r)?,
        })
    }
}

#[derive(Clone, Debug)]
pub enum HandshakePayload {
    ClientHello(ClientHelloPayload),
    ServerHello(ServerHelloPayload),
    HelloRetryRequest(HelloRetryRequest),
    EncryptedExtensions(Vec<ServerExtension>),
    Certificate(CertificatePayload),
    CompressedCertificate(CompressedCertificatePayload),
    CertificateRequest(CertificateRequestPayload),
    CertificateVerify(DigitallySignedStruct),
    Finished(Payload),
    NewSessionTicket(NewSessionTicketPayload),
    KeyUpdate(KeyUpdateRequest),
    EndOfEarlyData,
    MessageHash(Payload),
    Unknown(Payload),
}

impl HandshakePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        use self::HandshakePayload::*;
        match self {
            ClientHello(x) => x.encode(bytes),
            ServerHello(x) => x.encode(bytes),
            HelloRetryRequest(x) => x.encode(bytes),
            EncryptedExtensions(x) => x.encode(bytes),
            Certificate(x) => x.encode(bytes),
            CompressedCertificate(x) => x.encode(bytes),
            CertificateRequest(x) => x.encode(bytes),
            CertificateVerify(x) => x.encode(bytes),
            Finished(x) => x.encode(bytes),
            NewSessionTicket(x) => x.encode(bytes),
            KeyUpdate(x) => x.encode(bytes),
            EndOfEarlyData => {}
            MessageHash(x) => x.encode(bytes),
            Unknown(x) => x.encode(bytes),
        }
    }
}

/// A handshake message: the type byte, u24 length, and typed body.
#[derive(Clone, Debug)]
pub struct HandshakeMessagePayload {
    pub typ: HandshakeType,
    pub payload: HandshakePayload,
}

impl Codec for HandshakeMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        let nest = LengthPrefixedBuffer::new(ListLength::U24 { max: usize::MAX }, bytes);
        self.payload.encode(nest.buf);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = HandshakeType::read(r)?;
        let len = usize::from(u24::read(r)?);
        let mut sub = r.sub(len)?;

        let payload = match typ {
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerHello => {
                let version = ProtocolVersion::read(&mut sub)?;
                let random = Random::read(&mut sub)?;
                if random == HELLO_RETRY_REQUEST_RANDOM {
                    let mut hrr = HelloRetryRequest::read(&mut sub)?;
                    hrr.legacy_version = version;
                    HandshakePayload::HelloRetryRequest(hrr)
                } else {
                    let mut shp = ServerHelloPayload {
                        legacy_version: version,
                        random,
                        session_id: SessionId::read(&mut sub)?,
                        cipher_suite: CipherSuite::read(&mut sub)?,
                        compression_method: Compression::read(&mut sub)?,
                        extensions: Vec::new(),
                    };
                    shp.extensions = Vec::read(&mut sub)?;
                    HandshakePayload::ServerHello(shp)
                }
            }
            HandshakeType::EncryptedExtensions => {
                HandshakePayload::EncryptedExtensions(Vec::read(&mut sub)?)
            }
            HandshakeType::Certificate => {
                HandshakePayload::Certificate(CertificatePayload::read(&mut sub)?)
            }
            HandshakeType::CompressedCertificate => HandshakePayload::CompressedCertificate(
                CompressedCertificatePayload::read(&mut sub)?,
            ),
            HandshakeType::CertificateRequest => {
                HandshakePayload::CertificateRequest(CertificateRequestPayload::read(&mut sub)?)
            }
            HandshakeType::CertificateVerify => {
                HandshakePayload::CertificateVerify(DigitallySignedStruct::read(&mut sub)?)
            }
            HandshakeType::Finished => HandshakePayload::Finished(Payload::read(&mut sub)?),
            HandshakeType::NewSessionTicket => {
                HandshakePayload::NewSessionTicket(NewSessionTicketPayload::read(&mut sub)?)
            }
            HandshakeType::KeyUpdate => {
                let request = KeyUpdateRequest::read(&mut sub)?;
                if let KeyUpdateRequest::Unknown(_) = request {
                    return Err(InvalidMessage::InvalidKeyUpdate);
                }
                HandshakePayload::KeyUpdate(request)
            }
            HandshakeType::EndOfEarlyData => HandshakePayload::EndOfEarlyData,
            HandshakeType::MessageHash => HandshakePayload::MessageHash(Payload::read(&mut sub)?),
            _ => HandshakePayload::Unknown(Payload::read(&mut sub)?),
        };

        sub.expect_empty("HandshakeMessagePayload")?;
        Ok(Self { typ, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client_hello() -> ClientHelloPayload {
        ClientHelloPayload {
            client_version: ProtocolVersion::TLSv1_2,
            random: Random([0x55; 32]),
            session_id: SessionId::new(&[7; 12]),
            cipher_suites: alloc::vec![
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
            ],
            compression_methods: alloc::vec![Compression::Null],
            extensions: alloc::vec![
                ClientExtension::SupportedVersions(alloc::vec![ProtocolVersion::TLSv1_3]),
                ClientExtension::NamedGroups(alloc::vec![NamedGroup::X25519]),
                ClientExtension::SignatureAlgorithms(alloc::vec![
                    SignatureScheme::ECDSA_NISTP256_SHA256
                ]),
                ClientExtension::KeyShare(alloc::vec![KeyShareEntry::new(
                    NamedGroup::X25519,
                    &[0xab; 32],
                )]),
                ClientExtension::PresharedKeyModes(alloc::vec![PskKeyExchangeMode::PSK_DHE_KE]),
                ClientExtension::PresharedKey(PresharedKeyOffer::new(
                    PskIdentity::new(alloc::vec![1, 2, 3], 0x1000),
                    alloc::vec![0u8; 32],
                )),
            ],
        }
    }

    #[test]
    fn client_hello_round_trip() {
        let hello = sample_client_hello();
        let encoding = hello.get_encoding();
        let parsed = ClientHelloPayload::read_bytes(&encoding).unwrap();

        assert_eq!(parsed.supported_versions(), Some(&[ProtocolVersion::TLSv1_3][..]));
        assert_eq!(parsed.named_groups(), Some(&[NamedGroup::X25519][..]));
        assert!(parsed.check_psk_ext_is_last());
        assert!(!parsed.has_duplicate_extension());
        assert_eq!(parsed.psk().unwrap().identities.len(), 1);
        assert!(parsed.psk_mode_offered(PskKeyExchangeMode::PSK_DHE_KE));
        assert_eq!(parsed.get_encoding(), encoding);
    }

    #[test]
    fn binder_plaintext_strips_binders_only() {
        let hello = sample_client_hello();
        let msg = HandshakeMessagePayload {
            typ: HandshakeType::ClientHello,
            payload: HandshakePayload::ClientHello(hello.clone()),
        };
        let full = msg.get_encoding();
        let truncated = hello.binder_plaintext_from(&full);
        // binders: u16 list length + one 1+32 byte binder
        assert_eq!(full.len() - truncated.len(), 2 + 33);
    }

    #[test]
    fn server_hello_and_retry_share_wire_type() {
        let sh = HandshakeMessagePayload {
            typ: HandshakeType::ServerHello,
            payload: HandshakePayload::ServerHello(ServerHelloPayload {
                legacy_version: ProtocolVersion::TLSv1_2,
                random: Random([1; 32]),
                session_id: SessionId::empty(),
                cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
                compression_method: Compression::Null,
                extensions: alloc::vec![ServerExtension::SupportedVersions(
                    ProtocolVersion::TLSv1_3
                )],
            }),
        };
        let parsed = HandshakeMessagePayload::read_bytes(&sh.get_encoding()).unwrap();
        assert!(matches!(parsed.payload, HandshakePayload::ServerHello(_)));

        let hrr = HandshakeMessagePayload {
            typ: HandshakeType::ServerHello,
            payload: HandshakePayload::HelloRetryRequest(HelloRetryRequest {
                legacy_version: ProtocolVersion::TLSv1_2,
                session_id: SessionId::empty(),
                cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
                extensions: alloc::vec![
                    HelloRetryExtension::KeyShare(NamedGroup::X25519),
                    HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
                ],
            }),
        };
        let parsed = HandshakeMessagePayload::read_bytes(&hrr.get_encoding()).unwrap();
        match parsed.payload {
            HandshakePayload::HelloRetryRequest(hrr) => {
                assert_eq!(hrr.requested_key_share_group(), Some(NamedGroup::X25519));
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn unknown_extensions_survive_round_trip() {
        let mut hello = sample_client_hello();
        hello.extensions.insert(
            0,
            ClientExtension::Unknown(UnknownExtension {
                typ: ExtensionType::Unknown(0x1234),
                payload: Payload::new(alloc::vec![9, 9, 9]),
            }),
        );
        let parsed = ClientHelloPayload::read_bytes(&hello.get_encoding()).unwrap();
        assert_eq!(parsed.extensions.len(), hello.extensions.len());
        assert!(matches!(
            parsed.extensions[0],
            ClientExtension::Unknown(_)
        ));
    }

    #[test]
    fn new_session_ticket_early_data_extension() {
        let mut nst = NewSessionTicketPayload::new(3600, 0xdead, alloc::vec![0], alloc::vec![1; 8]);
        nst.extensions
            .push(NewSessionTicketExtension::EarlyData(16384));
        let parsed = NewSessionTicketPayload::read_bytes(&nst.get_encoding()).unwrap();
        assert_eq!(parsed.max_early_data_size(), Some(16384));
        assert_eq!(parsed.lifetime, 3600);
    }

    #[test]
    fn rejects_bogus_key_update() {
        let mut bytes = alloc::vec![u8::from(HandshakeType::KeyUpdate), 0, 0, 1, 0x05];
        assert!(HandshakeMessagePayload::read_bytes(&bytes).is_err());
        bytes[4] = 0x01;
        assert!(HandshakeMessagePayload::read_bytes(&bytes).is_ok());
    }
}
