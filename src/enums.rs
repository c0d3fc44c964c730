#![allow(clippy::upper_case_acronyms)]
#![allow(non_camel_case_types)]

use crate::msgs::codec::{Codec, Reader};

enum_builder! {
    /// The `ContentType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum ContentType {
        ChangeCipherSpec => 0x14,
        Alert => 0x15,
        Handshake => 0x16,
        ApplicationData => 0x17,
    }
}

enum_builder! {
    /// The `HandshakeType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum HandshakeType {
        ClientHello => 0x01,
        ServerHello => 0x02,
        NewSessionTicket => 0x04,
        EndOfEarlyData => 0x05,
        EncryptedExtensions => 0x08,
        Certificate => 0x0b,
        CertificateRequest => 0x0d,
        CertificateVerify => 0x0f,
        Finished => 0x14,
        KeyUpdate => 0x18,
        CompressedCertificate => 0x19,
        MessageHash => 0xfe,
    }
}

enum_builder! {
    /// The `ProtocolVersion` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum ProtocolVersion {
        SSLv3 => 0x0300,
        TLSv1_0 => 0x0301,
        TLSv1_1 => 0x0302,
        TLSv1_2 => 0x0303,
        TLSv1_3 => 0x0304,
    }
}

enum_builder! {
    /// The `CipherSuite` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum CipherSuite {
        TLS13_AES_128_GCM_SHA256 => 0x1301,
        TLS13_AES_256_GCM_SHA384 => 0x1302,
        TLS13_CHACHA20_POLY1305_SHA256 => 0x1303,
        TLS_EMPTY_RENEGOTIATION_INFO_SCSV => 0x00ff,
    }
}

enum_builder! {
    /// The `SignatureScheme` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum SignatureScheme {
        RSA_PKCS1_SHA256 => 0x0401,
        RSA_PKCS1_SHA384 => 0x0501,
        RSA_PKCS1_SHA512 => 0x0601,
        ECDSA_NISTP256_SHA256 => 0x0403,
        ECDSA_NISTP384_SHA384 => 0x0503,
        ECDSA_NISTP521_SHA512 => 0x0603,
        RSA_PSS_SHA256 => 0x0804,
        RSA_PSS_SHA384 => 0x0805,
        RSA_PSS_SHA512 => 0x0806,
        ED25519 => 0x0807,
        ED448 => 0x0808,
    }
}

impl SignatureScheme {
    /// Whether a scheme may sign a TLS 1.3 CertificateVerify.
    ///
    /// RFC 8446 forbids the PKCS#1 schemes outside their legacy
    /// `signature_algorithms_cert` role.
    pub fn supported_in_tls13(&self) -> bool {
        matches!(
            self,
            Self::ECDSA_NISTP256_SHA256
                | Self::ECDSA_NISTP384_SHA384
                | Self::ECDSA_NISTP521_SHA512
                | Self::RSA_PSS_SHA256
                | Self::RSA_PSS_SHA384
                | Self::RSA_PSS_SHA512
                | Self::ED25519
                | Self::ED448
        )
    }
}

enum_builder! {
    /// The `NamedGroup` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum NamedGroup {
        secp256r1 => 0x0017,
        secp384r1 => 0x0018,
        secp521r1 => 0x0019,
        X25519 => 0x001d,
        X448 => 0x001e,
    }
}

enum_builder! {
    /// The `AlertDescription` TLS protocol enum.  Values in this enum are
    /// taken from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum AlertDescription {
        CloseNotify => 0x00,
        UnexpectedMessage => 0x0a,
        BadRecordMac => 0x14,
        RecordOverflow => 0x16,
        HandshakeFailure => 0x28,
        BadCertificate => 0x2a,
        IllegalParameter => 0x2f,
        CertificateRequired => 0x74,
        UnknownCA => 0x30,
        AccessDenied => 0x31,
        DecodeError => 0x32,
        DecryptError => 0x33,
        ProtocolVersion => 0x46,
        InsufficientSecurity => 0x47,
        InternalError => 0x50,
        InappropriateFallback => 0x56,
        UserCanceled => 0x5a,
        MissingExtension => 0x6d,
        UnsupportedExtension => 0x6e,
        UnrecognizedName => 0x70,
        BadCertificateStatusResponse => 0x71,
        NoApplicationProtocol => 0x78,
    }
}

enum_builder! {
    /// The `CertificateCompressionAlgorithm` TLS protocol enum, as defined
    /// for RFC 8879 certificate compression.
    #[repr(u16)]
    pub enum CertificateCompressionAlgorithm {
        Zlib => 0x0001,
        Brotli => 0x0002,
        Zstd => 0x0003,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::enums::tests::{test_enum16, test_enum8};

    #[test]
    fn test_enums() {
        test_enum8::<ContentType>(ContentType::ChangeCipherSpec, ContentType::ApplicationData);
        test_enum8::<HandshakeType>(HandshakeType::ClientHello, HandshakeType::Finished);
        test_enum16::<ProtocolVersion>(ProtocolVersion::SSLv3, ProtocolVersion::TLSv1_3);
        test_enum16::<CipherSuite>(
            CipherSuite::TLS13_AES_128_GCM_SHA256,
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
        );
        test_enum16::<SignatureScheme>(
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA512,
        );
        test_enum16::<NamedGroup>(NamedGroup::secp256r1, NamedGroup::X448);
        test_enum8::<AlertDescription>(
            AlertDescription::HandshakeFailure,
            AlertDescription::BadCertificate,
        );
        test_enum16::<CertificateCompressionAlgorithm>(
            CertificateCompressionAlgorithm::Zlib,
            CertificateCompressionAlgorithm::Zstd,
        );
    }

    #[test]
    fn tls13_signature_restrictions() {
        assert!(!SignatureScheme::RSA_PKCS1_SHA256.supported_in_tls13());
        assert!(SignatureScheme::ECDSA_NISTP256_SHA256.supported_in_tls13());
        assert!(SignatureScheme::ED25519.supported_in_tls13());
    }
}
