//! The server side of the protocol: configuration, capabilities, and the
//! event-driven connection state machine.

pub mod actions;
pub mod config;
pub mod handy;

mod connection;
mod hs;
mod tls13;

pub use actions::{Action, Actions, EndOfDataReason, SecretKind};
pub use config::{
    AppTokenValidator, CertManager, CertVerifier, ClientAuthRequirement, HandshakeLogging,
    ReplayCache, ReplayCacheResult, ResumptionState, SelectedCert, ServerConfig, ServerExtensions,
    TicketCipher, TimeProvider,
};
pub use connection::{
    EarlyDataType, KeyExchangeType, PskType, ServerConnection, StateEnum,
};
