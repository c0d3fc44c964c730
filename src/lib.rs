//! # seltz
//!
//! seltz is a sans-I/O server-side TLS 1.3 protocol engine.  It terminates
//! TLS 1.3 connections: the caller feeds raw transport bytes and
//! application events into a [`server::ServerConnection`], and applies the
//! ordered [`server::Actions`] it returns — bytes to write, application
//! data to deliver, secrets that became available, progress and error
//! reports.
//!
//! ## What it does
//!
//! * The full server handshake per RFC 8446: HelloRetryRequest, PSK
//!   resumption, 0-RTT early data acceptance and rejection, client
//!   authentication, session tickets, key updates and the close protocol.
//! * An authenticated record layer over scatter-gather
//!   [`buffer::BufChain`]s, encrypting and decrypting in place whenever
//!   buffer ownership allows.
//! * Certificate compression per RFC 8879 (brotli and zlib built in).
//!
//! ## What it leaves to the caller
//!
//! Transport I/O, timers and executors; X.509 parsing and verification
//! (behind [`server::CertManager`] / [`server::CertVerifier`]); ticket
//! storage policy ([`server::TicketCipher`]); 0-RTT replay limiting
//! ([`server::ReplayCache`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use seltz::buffer::BufChain;
//! use seltz::server::{handy, Action, ServerConfig, ServerConnection};
//!
//! let config = Arc::new(ServerConfig::new(Arc::new(
//!     handy::SingleCertManager::new(handy::test_cert()),
//! )));
//! let mut conn = ServerConnection::new(config);
//! conn.accept();
//!
//! // bytes arrive from your transport...
//! let incoming: Vec<u8> = Vec::new();
//! for action in conn.read_tls(BufChain::from(incoming)) {
//!     match action {
//!         Action::WriteToSocket { bytes, .. } => { /* write to the peer */ }
//!         Action::DeliverAppData(data) => { /* hand to the application */ }
//!         Action::ReportHandshakeSuccess => { /* connection established */ }
//!         Action::ReportError(err) => { /* tear down */ }
//!         _ => {}
//!     }
//! }
//! ```

// Require docs for public APIs, deny unsafe code, handle all results.
#![forbid(unsafe_code)]
#![warn(
    clippy::alloc_instead_of_core,
    clippy::manual_let_else,
    clippy::std_instead_of_core,
    clippy::use_self,
    clippy::upper_case_acronyms,
    elided_lifetimes_in_paths,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_import_braces,
    unused_extern_crates,
    unused_qualifications
)]
#![allow(clippy::new_without_default)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

mod log;

#[allow(missing_docs)]
#[macro_use]
pub mod msgs;

pub mod buffer;
pub mod compress;
pub mod crypto;
mod enums;
mod error;
mod record_layer;
pub mod server;
mod sync;
pub mod tls13;
mod transcript;

pub use crate::enums::{
    AlertDescription, CertificateCompressionAlgorithm, CipherSuite, ContentType, HandshakeType,
    NamedGroup, ProtocolVersion, SignatureScheme,
};
pub use crate::error::{
    CertificateError, Error, InvalidMessage, PeerIncompatible, PeerMisbehaved,
};
