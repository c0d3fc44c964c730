use alloc::vec::Vec;

use crate::error::InvalidMessage;
use crate::msgs::codec::{Codec, Reader};

#[derive(Debug)]
pub struct ChangeCipherSpecPayload;

impl Codec for ChangeCipherSpecPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        1u8.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        match u8::read(r)? {
            1 => r.expect_empty("ChangeCipherSpecPayload").map(|_| Self),
            _ => Err(InvalidMessage::InvalidCcs),
        }
    }
}
