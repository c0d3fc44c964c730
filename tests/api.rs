//! Public API surface tests: anything here compiles against the crate the
//! way an embedding application would.

use std::sync::Arc;

use seltz::buffer::BufChain;
use seltz::server::{
    handy, Action, EndOfDataReason, ReplayCache, ReplayCacheResult, ServerConfig,
    ServerConnection, StateEnum,
};
use seltz::{AlertDescription, ContentType, Error, ProtocolVersion};

fn test_config() -> Arc<ServerConfig> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(ServerConfig::new(Arc::new(handy::SingleCertManager::new(
        handy::test_cert(),
    ))))
}

#[test]
fn accept_is_required_before_reading() {
    let mut conn = ServerConnection::new(test_config());
    assert_eq!(conn.state(), StateEnum::Uninitialized);

    let actions = conn.read_tls(BufChain::copy_of(b"\x16\x03\x01\x00\x01\x00"));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::ReportError(_))));

    conn.accept();
    assert_eq!(conn.state(), StateEnum::ExpectingClientHello);
}

#[test]
fn double_accept_is_reported() {
    let mut conn = ServerConnection::new(test_config());
    conn.accept();
    let actions = conn.accept();
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::ReportError(_))));
}

#[test]
fn garbage_framing_produces_alert_and_error() {
    let mut conn = ServerConnection::new(test_config());
    conn.accept();

    let actions = conn.read_tls(BufChain::copy_of(&[0xff, 0x03, 0x03, 0x00, 0x01, 0x00]));

    let mut wrote_alert = false;
    let mut reported = false;
    for action in &actions {
        match action {
            Action::WriteToSocket { bytes, .. } => {
                let bytes = bytes.copy_to_vec();
                // a plaintext fatal alert record
                assert_eq!(bytes[0], u8::from(ContentType::Alert));
                assert_eq!(bytes[5], 2);
                wrote_alert = true;
            }
            Action::ReportError(_) => reported = true,
            _ => {}
        }
    }
    assert!(wrote_alert);
    assert!(reported);
    assert_eq!(conn.state(), StateEnum::Error);
}

#[test]
fn oversized_record_is_rejected() {
    let mut conn = ServerConnection::new(test_config());
    conn.accept();

    // handshake record claiming 2^14 + 1 bytes
    let header = [0x16, 0x03, 0x03, 0x40, 0x01];
    let actions = conn.read_tls(BufChain::copy_of(&header));
    let err = actions.iter().find_map(|a| match a {
        Action::ReportError(e) => Some(e.clone()),
        _ => None,
    });
    assert_eq!(err, Some(Error::PeerSentOversizedRecord));
}

#[test]
fn close_before_handshake_goes_straight_to_closed() {
    let mut conn = ServerConnection::new(test_config());
    conn.accept();

    let actions = conn.close();
    // a plaintext close_notify goes out
    assert!(actions.iter().any(|a| match a {
        Action::WriteToSocket { bytes, .. } => {
            let bytes = bytes.copy_to_vec();
            bytes[0] == u8::from(ContentType::Alert)
                && bytes[6] == u8::from(AlertDescription::CloseNotify)
        }
        _ => false,
    }));
    assert_eq!(conn.state(), StateEnum::Closed);

    let actions = conn.read_tls(BufChain::copy_of(b"late bytes"));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::EndOfData(EndOfDataReason::ConnectionClosed))));
}

#[test]
fn abort_reports_cancellation() {
    let mut conn = ServerConnection::new(test_config());
    conn.accept();

    let actions = conn.abort();
    let err = actions.iter().find_map(|a| match a {
        Action::ReportError(e) => Some(e.clone()),
        _ => None,
    });
    assert_eq!(err, Some(Error::Cancelled));
    assert_eq!(conn.state(), StateEnum::Error);
}

#[test]
fn config_defaults_are_sane() {
    let config = test_config();
    assert!(!config.cipher_suites.is_empty());
    assert!(!config.kx_groups.is_empty());
    assert_eq!(config.max_early_data_size, 0);
    assert_eq!(config.send_new_session_tickets, 1);
}

#[test]
fn replay_cache_capability_is_pluggable() {
    struct CountingCache(std::sync::atomic::AtomicUsize);
    impl ReplayCache for CountingCache {
        fn check(&self, _identity: &[u8]) -> ReplayCacheResult {
            self.0
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            ReplayCacheResult::NotReplay
        }
    }

    let mut config = ServerConfig::new(Arc::new(handy::SingleCertManager::new(
        handy::test_cert(),
    )));
    config.replay_cache = Arc::new(CountingCache(std::sync::atomic::AtomicUsize::new(0)));
    let conn = ServerConnection::new(Arc::new(config));
    assert_eq!(conn.version(), None::<ProtocolVersion>);
}
