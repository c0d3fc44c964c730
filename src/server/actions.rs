use alloc::vec::Vec;
use core::fmt;

use crate::buffer::BufChain;
use crate::error::Error;

pub use crate::tls13::key_schedule::SecretKind;

/// One effect a handler asks the caller to perform.
///
/// Handlers never touch the transport or the application; they describe
/// what should happen and the caller's pump applies the actions in order.
pub enum Action {
    /// Send these bytes on the transport.  `flush` marks the end of a
    /// flight; intermediate writes may be coalesced.
    WriteToSocket { bytes: BufChain, flush: bool },

    /// Application data received under the established keys.
    DeliverAppData(BufChain),

    /// Application data received during the 0-RTT window.
    DeliverEarlyAppData(BufChain),

    /// The handshake completed; both directions use application keys.
    ReportHandshakeSuccess,

    /// Early data was accepted; the 0-RTT window is open.
    ReportEarlyHandshakeSuccess,

    /// The connection failed.  The caller must tear down the transport.
    ReportError(Error),

    /// A secret became available, for export or diagnostics (an SSLKEYLOGFILE
    /// writer, for instance).
    SecretAvailable { kind: SecretKind, secret: Vec<u8> },

    /// No more data will arrive.
    EndOfData(EndOfDataReason),
}

/// Why the read side is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfDataReason {
    /// The peer sent close_notify.
    CloseNotifyReceived,
    /// The connection is already closed; the event was discarded.
    ConnectionClosed,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteToSocket { bytes, flush } => f
                .debug_struct("WriteToSocket")
                .field("len", &bytes.len())
                .field("flush", flush)
                .finish(),
            Self::DeliverAppData(data) => f
                .debug_tuple("DeliverAppData")
                .field(&data.len())
                .finish(),
            Self::DeliverEarlyAppData(data) => f
                .debug_tuple("DeliverEarlyAppData")
                .field(&data.len())
                .finish(),
            Self::ReportHandshakeSuccess => f.write_str("ReportHandshakeSuccess"),
            Self::ReportEarlyHandshakeSuccess => f.write_str("ReportEarlyHandshakeSuccess"),
            Self::ReportError(e) => f.debug_tuple("ReportError").field(e).finish(),
            Self::SecretAvailable { kind, .. } => f
                .debug_struct("SecretAvailable")
                .field("kind", kind)
                .finish(),
            Self::EndOfData(reason) => f.debug_tuple("EndOfData").field(reason).finish(),
        }
    }
}

/// The ordered list of effects produced by one event.
pub type Actions = Vec<Action>;

/// Internal helpers for accumulating actions.
pub(crate) trait ActionsExt {
    fn send(&mut self, bytes: BufChain, flush: bool);
    fn secret(&mut self, kind: SecretKind, secret: &[u8]);
}

impl ActionsExt for Actions {
    fn send(&mut self, bytes: BufChain, flush: bool) {
        if !bytes.is_empty() {
            self.push(Action::WriteToSocket { bytes, flush });
        }
    }

    fn secret(&mut self, kind: SecretKind, secret: &[u8]) {
        self.push(Action::SecretAvailable {
            kind,
            secret: secret.to_vec(),
        });
    }
}
