//! HKDF from RFC 5869, written over the [`Hmac`] boundary.

use alloc::boxed::Box;

use super::{Hmac, HmacKey, Tag, HASH_MAX_OUTPUT, HMAC_MAX_TAG};

pub(crate) struct Extractor {
    salt: Box<dyn HmacKey>,
    hmac: &'static dyn Hmac,
}

impl Extractor {
    pub(crate) fn no_salt(hmac: &'static dyn Hmac) -> Self {
        let zeroes = [0u8; HASH_MAX_OUTPUT];
        Self {
            salt: hmac.with_key(&zeroes[..hmac.hash_output_len()]),
            hmac,
        }
    }

    pub(crate) fn with_salt(hmac: &'static dyn Hmac, salt: &[u8]) -> Self {
        Self {
            salt: hmac.with_key(salt),
            hmac,
        }
    }

    pub(crate) fn extract(self, ikm: &[u8]) -> Expander {
        Expander(
            self.hmac
                .with_key(self.salt.sign(&[ikm]).as_ref()),
        )
    }
}

pub(crate) struct OutputLengthError;

/// A PRK ready for use via `expand()` et al.
pub(crate) struct Expander(Box<dyn HmacKey>);

/// A single block output from HKDF-Expand.
#[derive(Clone)]
pub(crate) struct OkmBlock(Tag);

impl OkmBlock {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self(Tag::new(bytes))
    }
}

impl AsRef<[u8]> for OkmBlock {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Expander {
    pub(crate) fn from_okm(okm: &OkmBlock, hmac: &'static dyn Hmac) -> Self {
        Self(hmac.with_key(okm.0.as_ref()))
    }

    fn expand_unchecked(&self, info: &[&[u8]], output: &mut [u8]) {
        let mut term = Tag::new(b"");

        for (n, chunk) in output
            .chunks_mut(self.0.tag_len())
            .enumerate()
        {
            term = self
                .0
                .sign_concat(term.as_ref(), info, &[(n + 1) as u8]);
            chunk.copy_from_slice(&term.as_ref()[..chunk.len()]);
        }
    }

    /// The length of one output block, ie the HMAC tag size.
    pub(crate) fn block_len(&self) -> usize {
        self.0.tag_len()
    }

    pub(crate) fn expand_slice(
        &self,
        info: &[&[u8]],
        output: &mut [u8],
    ) -> Result<(), OutputLengthError> {
        if output.len() > 255 * self.0.tag_len() {
            return Err(OutputLengthError);
        }

        self.expand_unchecked(info, output);
        Ok(())
    }

    pub(crate) fn expand_block(&self, info: &[&[u8]]) -> OkmBlock {
        let mut tag = [0u8; HMAC_MAX_TAG];
        let reduced_tag = &mut tag[..self.0.tag_len()];
        self.expand_unchecked(info, reduced_tag);
        OkmBlock(Tag::new(reduced_tag))
    }
}

#[cfg(test)]
mod tests {
    use super::Extractor;
    use crate::crypto::provider;

    /// Test cases from appendix A in the RFC.

    #[test]
    fn test_case_1() {
        let hmac = &provider::hmac::HMAC_SHA256;
        let ikm = &[0x0b; 22];
        let salt = &[
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
        ];
        let info: &[&[u8]] = &[
            &[0xf0, 0xf1, 0xf2],
            &[0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9],
        ];

        let mut output = [0u8; 42];
        Extractor::with_salt(hmac, salt)
            .extract(ikm)
            .expand_slice(info, &mut output)
            .map_err(|_| ())
            .unwrap();

        assert_eq!(
            &output,
            &[
                0x3c, 0xb2, 0x5f, 0x25, 0xfa, 0xac, 0xd5, 0x7a, 0x90, 0x43, 0x4f, 0x64, 0xd0, 0x36,
                0x2f, 0x2a, 0x2d, 0x2d, 0x0a, 0x90, 0xcf, 0x1a, 0x5a, 0x4c, 0x5d, 0xb0, 0x2d, 0x56,
                0xec, 0xc4, 0xc5, 0xbf, 0x34, 0x00, 0x72, 0x08, 0xd5, 0xb8, 0x87, 0x18, 0x58, 0x65
            ]
        );
    }

    #[test]
    fn test_case_3() {
        let hmac = &provider::hmac::HMAC_SHA256;
        let ikm = &[0x0b; 22];
        let info: &[&[u8]] = &[];

        let mut output = [0u8; 42];
        Extractor::with_salt(hmac, &[])
            .extract(ikm)
            .expand_slice(info, &mut output)
            .map_err(|_| ())
            .unwrap();

        assert_eq!(
            &output,
            &[
                0x8d, 0xa4, 0xe7, 0x75, 0xa5, 0x63, 0xc1, 0x8f, 0x71, 0x5f, 0x80, 0x2a, 0x06, 0x3c,
                0x5a, 0x31, 0xb8, 0xa1, 0x1f, 0x5c, 0x5e, 0xe1, 0x87, 0x9e, 0xc3, 0x45, 0x4e, 0x5f,
                0x3c, 0x73, 0x8d, 0x2d, 0x9d, 0x20, 0x13, 0x95, 0xfa, 0xa4, 0xb6, 0x1a, 0x96, 0xc8
            ]
        );
    }

    #[test]
    fn excessive_output_rejected() {
        let hmac = &provider::hmac::HMAC_SHA256;
        let expander = Extractor::no_salt(hmac).extract(b"key");
        let mut output = [0u8; 255 * 32 + 1];
        assert!(expander
            .expand_slice(&[], &mut output)
            .is_err());
    }
}
