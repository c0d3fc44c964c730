use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use std::error::Error as StdError;

use crate::enums::{AlertDescription, ContentType, HandshakeType};

/// Protocol errors this library reports.
///
/// Every variant that terminates a connection knows which TLS alert
/// describes it on the wire; see [`Error::alert_description`].
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// We received a TLS message that isn't valid right now.
    /// `expect_types` lists the message types we can expect right now.
    /// `got_type` is the type we found.  This error is typically
    /// caused by a buggy TLS stack (the peer or this one), a broken
    /// network, or an attack.
    InappropriateMessage {
        /// Which types we expected
        expect_types: Vec<ContentType>,
        /// What type we received
        got_type: ContentType,
    },

    /// We received a TLS handshake message that isn't valid right now.
    /// `expect_types` lists the handshake message types we can expect
    /// right now.  `got_type` is the type we found.
    InappropriateHandshakeMessage {
        /// Which handshake type we expected
        expect_types: Vec<HandshakeType>,
        /// What handshake type we received
        got_type: HandshakeType,
    },

    /// The peer sent us a syntactically incorrect TLS message.
    InvalidMessage(InvalidMessage),

    /// The peer doesn't support a protocol version/feature we require.
    PeerIncompatible(PeerIncompatible),

    /// The peer deviated from the standard TLS protocol.
    PeerMisbehaved(PeerMisbehaved),

    /// We received a fatal alert.  This means the peer is unhappy.
    AlertReceived(AlertDescription),

    /// We couldn't authenticate and decrypt a protected record.
    /// This is invariably fatal.
    DecryptError,

    /// The peer sent an oversized record/fragment.
    PeerSentOversizedRecord,

    /// An incoming connection did not support any known application protocol.
    NoApplicationProtocol,

    /// The presented client certificate chain was rejected by the verifier.
    InvalidCertificate(CertificateError),

    /// The connection was cancelled locally before completing.
    Cancelled,

    /// We failed to acquire random bytes from the system.
    FailedToGetRandomBytes,

    /// A cryptographic capability failed.
    ///
    /// A catch-all error for unlikely errors.
    General(String),
}

impl Error {
    /// The TLS alert this error is reported to the peer as.
    ///
    /// `None` for conditions that never produce an alert (for example,
    /// receiving one).
    pub fn alert_description(&self) -> Option<AlertDescription> {
        Some(match self {
            Self::InappropriateMessage { .. } | Self::InappropriateHandshakeMessage { .. } => {
                AlertDescription::UnexpectedMessage
            }
            Self::InvalidMessage(e) => e.alert_description(),
            Self::PeerIncompatible(e) => e.alert_description(),
            Self::PeerMisbehaved(e) => e.alert_description(),
            Self::DecryptError => AlertDescription::BadRecordMac,
            Self::PeerSentOversizedRecord => AlertDescription::RecordOverflow,
            Self::NoApplicationProtocol => AlertDescription::NoApplicationProtocol,
            Self::InvalidCertificate(e) => e.alert_description(),
            Self::Cancelled => AlertDescription::UserCanceled,
            Self::FailedToGetRandomBytes | Self::General(_) => AlertDescription::InternalError,
            Self::AlertReceived(_) => return None,
        })
    }
}

fn join<T: fmt::Debug>(items: &[T]) -> String {
    items
        .iter()
        .map(|x| alloc::format!("{x:?}"))
        .collect::<Vec<String>>()
        .join(" or ")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InappropriateMessage {
                expect_types,
                got_type,
            } => write!(
                f,
                "received unexpected message: got {:?} when expecting {}",
                got_type,
                join::<ContentType>(expect_types)
            ),
            Self::InappropriateHandshakeMessage {
                expect_types,
                got_type,
            } => write!(
                f,
                "received unexpected handshake message: got {:?} when expecting {}",
                got_type,
                join::<HandshakeType>(expect_types)
            ),
            Self::InvalidMessage(typ) => {
                write!(f, "received corrupt message of type {typ:?}")
            }
            Self::PeerIncompatible(why) => write!(f, "peer is incompatible: {why:?}"),
            Self::PeerMisbehaved(why) => write!(f, "peer misbehaved: {why:?}"),
            Self::AlertReceived(alert) => write!(f, "received fatal alert: {alert:?}"),
            Self::DecryptError => write!(f, "cannot decrypt peer's message"),
            Self::PeerSentOversizedRecord => write!(f, "peer sent excess record size"),
            Self::NoApplicationProtocol => write!(f, "peer doesn't support any known protocol"),
            Self::InvalidCertificate(e) => write!(f, "invalid peer certificate: {e:?}"),
            Self::Cancelled => write!(f, "connection cancelled locally"),
            Self::FailedToGetRandomBytes => write!(f, "failed to get random bytes"),
            Self::General(err) => write!(f, "unexpected error: {err}"),
        }
    }
}

impl StdError for Error {}

impl From<InvalidMessage> for Error {
    fn from(e: InvalidMessage) -> Self {
        Self::InvalidMessage(e)
    }
}

impl From<PeerIncompatible> for Error {
    fn from(e: PeerIncompatible) -> Self {
        Self::PeerIncompatible(e)
    }
}

impl From<PeerMisbehaved> for Error {
    fn from(e: PeerMisbehaved) -> Self {
        Self::PeerMisbehaved(e)
    }
}

impl From<CertificateError> for Error {
    fn from(e: CertificateError) -> Self {
        Self::InvalidCertificate(e)
    }
}

/// A corrupt TLS message payload that resulted in an error.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidMessage {
    /// The same extension appeared more than once.
    DuplicateExtension(u16),
    /// An advertised message was larger then expected.
    HandshakePayloadTooLarge,
    /// The peer sent us a syntactically incorrect ChangeCipherSpec payload.
    InvalidCcs,
    /// An unknown content type was encountered during message decoding.
    InvalidContentType,
    /// An odd-length list of signature schemes.
    InvalidDeclaredLength(&'static str),
    /// An empty value was offered where one is forbidden.
    InvalidEmptyPayload,
    /// A peer sent an invalid key update request.
    InvalidKeyUpdate,
    /// The content found in a record was inconsistent with its declared type.
    InvalidMessage(&'static str),
    /// Message is shorter than the expected length.
    MessageTooShort,
    /// Missing data for the named handshake payload value.
    MissingData(&'static str),
    /// A peer sent an empty list of signature schemes.
    NoSignatureSchemes,
    /// Trailing data found for the named handshake payload value.
    TrailingData(&'static str),
    /// A peer sent an unexpected message type.
    UnexpectedMessage(&'static str),
    /// An unknown TLS protocol was encountered during message decoding.
    UnknownProtocolVersion,
}

impl InvalidMessage {
    fn alert_description(&self) -> AlertDescription {
        match self {
            Self::InvalidCcs | Self::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Self::DuplicateExtension(_) => AlertDescription::IllegalParameter,
            _ => AlertDescription::DecodeError,
        }
    }
}

/// The peer doesn't support a protocol version/feature we require.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
#[allow(missing_docs)]
pub enum PeerIncompatible {
    Tls13NotOffered,
    NoCipherSuitesInCommon,
    NoKxGroupsInCommon,
    NoSignatureSchemesInCommon,
    SignatureAlgorithmsExtensionRequired,
    SupportedVersionsExtensionRequired,
    KeyShareExtensionRequired,
    NullCompressionRequired,
}

impl PeerIncompatible {
    fn alert_description(&self) -> AlertDescription {
        match self {
            Self::Tls13NotOffered | Self::SupportedVersionsExtensionRequired => {
                AlertDescription::ProtocolVersion
            }
            Self::SignatureAlgorithmsExtensionRequired | Self::KeyShareExtensionRequired => {
                AlertDescription::MissingExtension
            }
            Self::NullCompressionRequired => AlertDescription::IllegalParameter,
            _ => AlertDescription::HandshakeFailure,
        }
    }
}

/// The peer deviated from the standard TLS protocol.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
#[allow(missing_docs)]
pub enum PeerMisbehaved {
    DuplicateKeyShareEntries,
    HandshakeMessageSplitAcrossKeyChange,
    IllegalHelloRetryAnswer,
    IncorrectBinder,
    IncorrectFinished,
    KeyEpochWithPendingFragment,
    MessageInterleavedWithHandshakeMessage,
    OfferedEmptyPskIdentities,
    PskExtensionMustBeLast,
    PskBinderCountMismatch,
    RefusedToFollowHelloRetryRequest,
    SignedHandshakeWithUnadvertisedSigScheme,
    TooManyChangeCipherSpecs,
    TooMuchEarlyData,
    UnsolicitedCertificateExtensions,
}

impl PeerMisbehaved {
    fn alert_description(&self) -> AlertDescription {
        match self {
            Self::IncorrectBinder | Self::IncorrectFinished => AlertDescription::DecryptError,
            Self::TooManyChangeCipherSpecs
            | Self::TooMuchEarlyData
            | Self::HandshakeMessageSplitAcrossKeyChange
            | Self::KeyEpochWithPendingFragment
            | Self::MessageInterleavedWithHandshakeMessage => AlertDescription::UnexpectedMessage,
            Self::SignedHandshakeWithUnadvertisedSigScheme => AlertDescription::AccessDenied,
            _ => AlertDescription::IllegalParameter,
        }
    }
}

/// The ways in which a presented certificate chain can be rejected.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum CertificateError {
    /// The certificate chain was empty where one was required.
    NoCertificatesPresented,
    /// The verifier rejected the chain.
    BadCertificate,
    /// The signature over the handshake transcript did not verify.
    BadSignature,
}

impl CertificateError {
    fn alert_description(&self) -> AlertDescription {
        match self {
            Self::NoCertificatesPresented => AlertDescription::CertificateRequired,
            Self::BadCertificate => AlertDescription::BadCertificate,
            Self::BadSignature => AlertDescription::DecryptError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_mapping() {
        assert_eq!(
            Error::from(PeerIncompatible::Tls13NotOffered).alert_description(),
            Some(AlertDescription::ProtocolVersion)
        );
        assert_eq!(
            Error::from(PeerMisbehaved::IncorrectBinder).alert_description(),
            Some(AlertDescription::DecryptError)
        );
        assert_eq!(
            Error::DecryptError.alert_description(),
            Some(AlertDescription::BadRecordMac)
        );
        assert_eq!(
            Error::Cancelled.alert_description(),
            Some(AlertDescription::UserCanceled)
        );
        assert_eq!(
            Error::AlertReceived(AlertDescription::HandshakeFailure).alert_description(),
            None
        );
    }

    #[test]
    fn smoke() {
        let all = alloc::vec![
            Error::InappropriateMessage {
                expect_types: alloc::vec![ContentType::Alert],
                got_type: ContentType::Handshake,
            },
            Error::InappropriateHandshakeMessage {
                expect_types: alloc::vec![HandshakeType::ClientHello, HandshakeType::Finished],
                got_type: HandshakeType::ServerHello,
            },
            Error::InvalidMessage(InvalidMessage::MessageTooShort),
            Error::PeerIncompatible(PeerIncompatible::NoCipherSuitesInCommon),
            Error::PeerMisbehaved(PeerMisbehaved::IncorrectFinished),
            Error::AlertReceived(AlertDescription::DecodeError),
            Error::DecryptError,
            Error::PeerSentOversizedRecord,
            Error::NoApplicationProtocol,
            Error::InvalidCertificate(CertificateError::NoCertificatesPresented),
            Error::Cancelled,
            Error::FailedToGetRandomBytes,
            Error::General("undocumented error".into()),
        ];

        for err in all {
            let _ = alloc::format!("{err:?}: {err}");
        }
    }
}
