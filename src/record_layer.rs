//! Record framing and protection.
//!
//! [`ReadRecordLayer`] accumulates transport bytes, frames records,
//! decrypts protected ones and reassembles handshake messages across record
//! boundaries.  [`WriteRecordLayer`] fragments outgoing payloads and
//! protects them.  Each direction owns its sequence number, which restarts
//! at zero whenever keys change.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::buffer::{Buf, BufChain};
use crate::crypto::cipher::{InboundOpaqueRecord, MessageDecrypter, MessageEncrypter};
use crate::enums::{AlertDescription, ContentType, ProtocolVersion};
use crate::error::{Error, InvalidMessage, PeerMisbehaved};
use crate::log::trace;
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::codec::Codec;
use crate::msgs::enums::AlertLevel;
use crate::msgs::handshake::HandshakeMessagePayload;

/// Maximum plaintext bytes in one record.
pub(crate) const MAX_FRAGMENT_LEN: usize = 16_384;

/// Maximum payload of a protected record on receive: plaintext plus an
/// allowance for the inner type byte, padding and tag.
const MAX_PROTECTED_LEN: usize = MAX_FRAGMENT_LEN + 256;

/// Record header: content type, legacy version, length.
pub(crate) const HEADER_SIZE: usize = 5;

/// Largest handshake message we will reassemble.
const MAX_HANDSHAKE_SIZE: usize = 0xffff;

/// ChangeCipherSpec records tolerated before we decide the peer is broken.
const MAX_CCS_TOLERANCE: u8 = 8;

/// Encrypting more messages than this under one key risks nonce reuse;
/// request a key update well before.
const SEQ_SOFT_LIMIT: u64 = 0xffff_ffff_ffff_0000;
const SEQ_HARD_LIMIT: u64 = 0xffff_ffff_ffff_fffe;

/// One parsed item from the read side.
pub(crate) enum ReadEvent {
    /// A complete handshake message, with its exact wire encoding for the
    /// transcript.
    Handshake {
        parsed: HandshakeMessagePayload,
        encoded: Vec<u8>,
    },
    /// An alert, already decrypted if keys are active.
    Alert(AlertLevel, AlertDescription),
    /// Application data under the active read keys.
    AppData(BufChain),
}

/// Which keys, if any, protect the read direction.
enum ReadState {
    Plaintext,
    Encrypted {
        decrypter: Box<dyn MessageDecrypter>,
        seq: u64,
    },
}

/// The read half of the record layer.
pub(crate) struct ReadRecordLayer {
    queue: BufChain,
    state: ReadState,
    joiner: HandshakeJoiner,
    ccs_seen: u8,
    ccs_allowed: bool,
    /// Ciphertext bytes we may silently skip after rejecting early data.
    skip_budget: usize,
    has_decrypted: bool,
}

impl ReadRecordLayer {
    pub(crate) fn new() -> Self {
        Self {
            queue: BufChain::new(),
            state: ReadState::Plaintext,
            joiner: HandshakeJoiner::new(),
            ccs_seen: 0,
            ccs_allowed: false,
            skip_budget: 0,
            has_decrypted: false,
        }
    }

    /// Queue more transport bytes.
    pub(crate) fn push_bytes(&mut self, mut bytes: BufChain) {
        self.queue.append(&mut bytes);
    }

    /// Move any buffered transport bytes into `other` (used when switching
    /// between the early-data and handshake read layers).
    pub(crate) fn drain_into(&mut self, other: &mut Self) {
        other.queue.append(&mut self.queue);
    }

    /// Install read protection.  A partially reassembled handshake message
    /// must not span a key change.
    pub(crate) fn set_decrypter(
        &mut self,
        decrypter: Box<dyn MessageDecrypter>,
    ) -> Result<(), Error> {
        if self.joiner.has_partial() {
            return Err(PeerMisbehaved::KeyEpochWithPendingFragment.into());
        }
        self.state = ReadState::Encrypted { decrypter, seq: 0 };
        Ok(())
    }

    /// Begin tolerating ChangeCipherSpec records (valid once the first
    /// ClientHello has arrived).
    pub(crate) fn allow_ccs(&mut self) {
        self.ccs_allowed = true;
    }

    /// Stop tolerating ChangeCipherSpec records (application data phase).
    pub(crate) fn forbid_ccs(&mut self) {
        self.ccs_allowed = false;
    }

    /// Permit up to `budget` bytes of undecryptable ciphertext, for
    /// discarding early data we rejected.
    pub(crate) fn set_skip_budget(&mut self, budget: usize) {
        self.skip_budget = budget;
    }

    /// True while a handshake message is only partially received.
    pub(crate) fn has_pending_handshake_data(&self) -> bool {
        self.joiner.has_partial()
    }

    /// Parse the next event out of the queued bytes.
    ///
    /// `Ok(None)` means more transport bytes are needed.
    pub(crate) fn read_event(&mut self) -> Result<Option<ReadEvent>, Error> {
        loop {
            if let Some((parsed, encoded)) = self.joiner.next_message()? {
                return Ok(Some(ReadEvent::Handshake { parsed, encoded }));
            }

            if self.queue.len() < HEADER_SIZE {
                return Ok(None);
            }

            let mut header = [0u8; HEADER_SIZE];
            self.queue.peek(HEADER_SIZE, &mut header);
            let (typ, len) = self.check_header(&header)?;

            if self.queue.len() < HEADER_SIZE + len {
                return Ok(None);
            }

            self.queue.advance(HEADER_SIZE);
            let body = self.queue.split_to(len);

            // reassembly in progress admits only more handshake records
            if self.joiner.has_partial() && typ != ContentType::Handshake {
                return Err(PeerMisbehaved::MessageInterleavedWithHandshakeMessage.into());
            }

            if typ == ContentType::ChangeCipherSpec {
                self.consume_ccs(body)?;
                continue;
            }

            match &mut self.state {
                ReadState::Plaintext => match typ {
                    ContentType::Handshake => {
                        self.joiner.push(&body.copy_to_vec())?;
                    }
                    ContentType::Alert => return Ok(Some(parse_alert(&body)?)),
                    _ => {
                        return Err(Error::InappropriateMessage {
                            expect_types: alloc::vec![
                                ContentType::Handshake,
                                ContentType::Alert
                            ],
                            got_type: typ,
                        });
                    }
                },
                ReadState::Encrypted { decrypter, seq } => {
                    if typ != ContentType::ApplicationData {
                        return Err(Error::InappropriateMessage {
                            expect_types: alloc::vec![ContentType::ApplicationData],
                            got_type: typ,
                        });
                    }

                    let encrypted_len = body.len();
                    let record = InboundOpaqueRecord {
                        header,
                        payload: body,
                    };
                    let plain = match decrypter.decrypt(record, *seq) {
                        Ok(plain) => plain,
                        Err(Error::DecryptError)
                            if self.skip_budget >= encrypted_len && !self.has_decrypted =>
                        {
                            trace!("dropping undecryptable record after rejected early data");
                            self.skip_budget -= encrypted_len;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    *seq += 1;
                    self.has_decrypted = true;

                    let (inner_type, plain) = strip_inner_plaintext(plain)?;
                    match inner_type {
                        ContentType::Handshake => {
                            if plain.is_empty() {
                                return Err(InvalidMessage::InvalidEmptyPayload.into());
                            }
                            self.joiner.push(&plain.copy_to_vec())?;
                        }
                        ContentType::Alert => return Ok(Some(parse_alert(&plain)?)),
                        ContentType::ApplicationData => {
                            return Ok(Some(ReadEvent::AppData(plain)));
                        }
                        // CCS is never protected
                        _ => return Err(InvalidMessage::InvalidContentType.into()),
                    }
                }
            }
        }
    }

    fn check_header(&self, header: &[u8; HEADER_SIZE]) -> Result<(ContentType, usize), Error> {
        let typ = ContentType::from(header[0]);
        if let ContentType::Unknown(_) = typ {
            return Err(InvalidMessage::InvalidContentType.into());
        }

        let version = u16::from_be_bytes([header[1], header[2]]);
        if version & 0xff00 != 0x0300 {
            return Err(InvalidMessage::UnknownProtocolVersion.into());
        }

        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        let max = match self.state {
            ReadState::Plaintext => MAX_FRAGMENT_LEN,
            ReadState::Encrypted { .. } => MAX_PROTECTED_LEN,
        };
        if len > max {
            return Err(Error::PeerSentOversizedRecord);
        }
        if len == 0 && typ != ContentType::ApplicationData {
            return Err(InvalidMessage::InvalidEmptyPayload.into());
        }

        Ok((typ, len))
    }

    fn consume_ccs(&mut self, body: BufChain) -> Result<(), Error> {
        if !self.ccs_allowed {
            return Err(Error::InappropriateMessage {
                expect_types: alloc::vec![ContentType::Handshake, ContentType::Alert],
                got_type: ContentType::ChangeCipherSpec,
            });
        }
        if body.len() != 1 || body.copy_to_vec() != [1] {
            return Err(InvalidMessage::InvalidCcs.into());
        }
        self.ccs_seen += 1;
        if self.ccs_seen > MAX_CCS_TOLERANCE {
            return Err(PeerMisbehaved::TooManyChangeCipherSpecs.into());
        }
        trace!("consumed middlebox compatibility ChangeCipherSpec");
        Ok(())
    }
}

fn parse_alert(body: &BufChain) -> Result<ReadEvent, Error> {
    let bytes = body.copy_to_vec();
    let alert = AlertMessagePayload::read_bytes(&bytes)?;
    Ok(ReadEvent::Alert(alert.level, alert.description))
}

/// Remove padding and the inner content type from a decrypted record.
fn strip_inner_plaintext(mut plain: BufChain) -> Result<(ContentType, BufChain), Error> {
    // zero padding then a nonzero type byte, scanned from the end
    loop {
        let mut last = [0u8; 1];
        if !plain.split_off_tail(&mut last) {
            return Err(InvalidMessage::InvalidEmptyPayload.into());
        }
        if last[0] != 0 {
            return Ok((ContentType::from(last[0]), plain));
        }
    }
}

/// Which keys, if any, protect the write direction.
enum WriteState {
    Plaintext,
    Encrypted {
        encrypter: Box<dyn MessageEncrypter>,
        seq: u64,
        update_requested: bool,
    },
    /// Terminal: keys have been dropped and nothing more may be written.
    Sealed,
}

/// The write half of the record layer.
pub(crate) struct WriteRecordLayer {
    state: WriteState,
}

/// Returned alongside written records when the write key is nearing
/// exhaustion.
#[derive(Debug, PartialEq)]
pub(crate) enum KeyRefresh {
    Nothing,
    /// Send a KeyUpdate soon.
    Requested,
}

impl WriteRecordLayer {
    pub(crate) fn new() -> Self {
        Self {
            state: WriteState::Plaintext,
        }
    }

    /// Install write protection; the sequence number restarts.
    pub(crate) fn set_encrypter(&mut self, encrypter: Box<dyn MessageEncrypter>) {
        self.state = WriteState::Encrypted {
            encrypter,
            seq: 0,
            update_requested: false,
        };
    }

    /// Drop write protection entirely; dropping the encrypter zeroizes its
    /// keys.  Terminal.
    pub(crate) fn clear(&mut self) {
        self.state = WriteState::Sealed;
    }

    /// Frame (and under keys, protect) a run of handshake message
    /// encodings.
    pub(crate) fn write_handshake_flight(&mut self, flight: &[u8]) -> Result<BufChain, Error> {
        self.write_fragmented(BufChain::copy_of(flight), ContentType::Handshake)
            .map(|(out, _)| out)
    }

    /// Protect application data, fragmenting to the record size limit.
    pub(crate) fn write_app_data(
        &mut self,
        payload: BufChain,
    ) -> Result<(BufChain, KeyRefresh), Error> {
        self.write_fragmented(payload, ContentType::ApplicationData)
    }

    /// Write an alert under whatever protection is active.
    pub(crate) fn write_alert(
        &mut self,
        level: AlertLevel,
        desc: AlertDescription,
    ) -> Result<BufChain, Error> {
        let body = AlertMessagePayload {
            level,
            description: desc,
        }
        .get_encoding();
        self.write_fragmented(BufChain::from(body), ContentType::Alert)
            .map(|(out, _)| out)
    }

    /// A plaintext ChangeCipherSpec record for middlebox compatibility.
    pub(crate) fn write_ccs(&mut self) -> BufChain {
        let mut out = BufChain::new();
        out.push_back(plaintext_record(ContentType::ChangeCipherSpec, &[1]));
        out
    }

    fn write_fragmented(
        &mut self,
        mut payload: BufChain,
        typ: ContentType,
    ) -> Result<(BufChain, KeyRefresh), Error> {
        let mut out = BufChain::new();
        let mut refresh = KeyRefresh::Nothing;

        // empty application data records are legal and sometimes useful
        if payload.is_empty() && typ == ContentType::ApplicationData {
            let mut record = self.protect_one(BufChain::new(), typ)?;
            out.append(&mut record);
        }

        while !payload.is_empty() {
            let take = core::cmp::min(MAX_FRAGMENT_LEN, payload.len());
            let fragment = payload.split_to(take);
            let mut record = self.protect_one(fragment, typ)?;
            out.append(&mut record);
        }

        if let WriteState::Encrypted {
            seq,
            update_requested,
            ..
        } = &mut self.state
        {
            if *seq >= SEQ_HARD_LIMIT {
                return Err(Error::General("write key exhausted".into()));
            }
            if *seq >= SEQ_SOFT_LIMIT {
                if *update_requested {
                    return Err(Error::General(
                        "write key exhausted with key update pending".into(),
                    ));
                }
                *update_requested = true;
                refresh = KeyRefresh::Requested;
            }
        }

        Ok((out, refresh))
    }

    fn protect_one(&mut self, fragment: BufChain, typ: ContentType) -> Result<BufChain, Error> {
        match &mut self.state {
            WriteState::Encrypted { encrypter, seq, .. } => {
                let record = encrypter.encrypt(fragment, typ, *seq)?;
                *seq += 1;
                Ok(record.payload)
            }
            WriteState::Plaintext => {
                let mut chain = BufChain::new();
                chain.push_back(plaintext_record(typ, &fragment.copy_to_vec()));
                Ok(chain)
            }
            WriteState::Sealed => Err(Error::General("connection closed".into())),
        }
    }
}

fn plaintext_record(typ: ContentType, body: &[u8]) -> Buf {
    debug_assert!(body.len() <= MAX_FRAGMENT_LEN);
    let mut buf = Buf::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&[u8::from(typ)]);
    buf.extend_from_slice(&u16::from(ProtocolVersion::TLSv1_2).to_be_bytes());
    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Reassembles handshake messages from record payloads.
struct HandshakeJoiner {
    buf: Vec<u8>,
}

impl HandshakeJoiner {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    fn push(&mut self, fragment: &[u8]) -> Result<(), Error> {
        self.buf.extend_from_slice(fragment);
        if self.buf.len() > MAX_HANDSHAKE_SIZE + 4 {
            return Err(InvalidMessage::HandshakePayloadTooLarge.into());
        }
        Ok(())
    }

    /// Pop one complete message, if present.
    fn next_message(&mut self) -> Result<Option<(HandshakeMessagePayload, Vec<u8>)>, Error> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let body_len =
            u32::from_be_bytes([0, self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if body_len > MAX_HANDSHAKE_SIZE {
            return Err(InvalidMessage::HandshakePayloadTooLarge.into());
        }
        let total = 4 + body_len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let rest = self.buf.split_off(total);
        let encoded = core::mem::replace(&mut self.buf, rest);
        let parsed = HandshakeMessagePayload::read_bytes(&encoded)?;
        Ok(Some((parsed, encoded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::HandshakeType;
    use crate::msgs::handshake::HandshakePayload;

    fn plaintext_records(typ: ContentType, body: &[u8], record_size: usize) -> BufChain {
        let mut out = BufChain::new();
        for chunk in body.chunks(record_size) {
            out.push_back(plaintext_record(typ, chunk));
        }
        out
    }

    #[test]
    fn joins_handshake_fragments_across_records() {
        // an EndOfEarlyData message, absurdly split into 1-byte records
        let msg = alloc::vec![u8::from(HandshakeType::EndOfEarlyData), 0, 0, 0];
        let mut layer = ReadRecordLayer::new();
        layer.push_bytes(plaintext_records(ContentType::Handshake, &msg, 1));

        let event = layer.read_event().unwrap().unwrap();
        match event {
            ReadEvent::Handshake { parsed, encoded } => {
                assert!(matches!(parsed.payload, HandshakePayload::EndOfEarlyData));
                assert_eq!(encoded, msg);
            }
            _ => panic!("wrong event"),
        }
        assert!(layer.read_event().unwrap().is_none());
    }

    #[test]
    fn incomplete_record_waits_for_more() {
        let msg = alloc::vec![u8::from(HandshakeType::EndOfEarlyData), 0, 0, 0];
        let record = plaintext_records(ContentType::Handshake, &msg, 16).copy_to_vec();

        let mut layer = ReadRecordLayer::new();
        layer.push_bytes(BufChain::copy_of(&record[..3]));
        assert!(layer.read_event().unwrap().is_none());
        layer.push_bytes(BufChain::copy_of(&record[3..6]));
        assert!(layer.read_event().unwrap().is_none());
        layer.push_bytes(BufChain::copy_of(&record[6..]));
        assert!(layer.read_event().unwrap().is_some());
    }

    #[test]
    fn rejects_unknown_content_type() {
        let mut layer = ReadRecordLayer::new();
        layer.push_bytes(BufChain::copy_of(&[0x99, 3, 3, 0, 1, 0]));
        assert!(layer.read_event().is_err());
    }

    #[test]
    fn rejects_plaintext_application_data() {
        let mut layer = ReadRecordLayer::new();
        let mut records = BufChain::new();
        records.push_back(plaintext_record(ContentType::ApplicationData, b"nope"));
        layer.push_bytes(records);
        assert!(matches!(
            layer.read_event(),
            Err(Error::InappropriateMessage { .. })
        ));
    }

    #[test]
    fn ccs_tolerance_is_bounded() {
        let mut layer = ReadRecordLayer::new();
        layer.allow_ccs();
        for _ in 0..MAX_CCS_TOLERANCE {
            let mut records = BufChain::new();
            records.push_back(plaintext_record(ContentType::ChangeCipherSpec, &[1]));
            layer.push_bytes(records);
            assert!(layer.read_event().unwrap().is_none());
        }
        let mut records = BufChain::new();
        records.push_back(plaintext_record(ContentType::ChangeCipherSpec, &[1]));
        layer.push_bytes(records);
        assert!(matches!(
            layer.read_event(),
            Err(Error::PeerMisbehaved(PeerMisbehaved::TooManyChangeCipherSpecs))
        ));
    }

    #[test]
    fn ccs_with_wrong_body_rejected() {
        let mut layer = ReadRecordLayer::new();
        layer.allow_ccs();
        let mut records = BufChain::new();
        records.push_back(plaintext_record(ContentType::ChangeCipherSpec, &[2]));
        layer.push_bytes(records);
        assert!(layer.read_event().is_err());
    }

    #[test]
    fn oversized_plaintext_record_rejected() {
        let mut layer = ReadRecordLayer::new();
        let mut header = alloc::vec![u8::from(ContentType::Handshake), 3, 3];
        header.extend(((MAX_FRAGMENT_LEN + 1) as u16).to_be_bytes());
        layer.push_bytes(BufChain::from(header));
        assert!(matches!(
            layer.read_event(),
            Err(Error::PeerSentOversizedRecord)
        ));
    }

    #[test]
    fn fragments_large_writes() {
        let mut writer = WriteRecordLayer::new();
        let payload = alloc::vec![0x5au8; MAX_FRAGMENT_LEN + 100];
        let out = writer
            .write_handshake_flight(&payload)
            .unwrap();
        // two records: 16384 + 100 bytes of payload plus two headers
        assert_eq!(out.len(), payload.len() + 2 * HEADER_SIZE);
        let bytes = out.copy_to_vec();
        assert_eq!(bytes[0], u8::from(ContentType::Handshake));
        let first_len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        assert_eq!(first_len, MAX_FRAGMENT_LEN);
    }
}
