//! ClientHello handling: negotiation, PSK selection, HelloRetryRequest,
//! the 0-RTT decision, and emission of the server's first flight.

use alloc::boxed::Box;
use alloc::vec::Vec;

use subtle::ConstantTimeEq;

use crate::crypto::cipher::{Tls13MessageDecrypter, Tls13MessageEncrypter};
use crate::crypto::hkdf::OkmBlock;
use crate::crypto::random_array;
use crate::enums::{HandshakeType, ProtocolVersion, SignatureScheme};
use crate::error::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
use crate::log::{debug, trace};
use crate::msgs::base::{Payload, PayloadU8, PayloadU24};
use crate::msgs::codec::{u24, Codec};
use crate::msgs::enums::PskKeyExchangeMode;
use crate::msgs::handshake::{
    CertReqExtension, CertificatePayload, CertificateRequestPayload, ClientHelloPayload,
    CompressedCertificatePayload, DigitallySignedStruct, HandshakeMessagePayload,
    HandshakePayload, HelloRetryExtension, HelloRetryRequest, KeyShareEntry, Random,
    ServerExtension, ServerHelloPayload, UnknownExtension,
};
use crate::record_layer::ReadRecordLayer;
use crate::server::actions::{Action, Actions, ActionsExt};
use crate::server::config::{ReplayCacheResult, ResumptionState};
use crate::server::connection::{
    ConnectionCore, EarlyDataType, KeyExchangeType, PskType, StateEnum, Transcript,
};
use crate::server::config::{ClientAuthRequirement, HandshakeLogging};
use crate::tls13::key_schedule::{hkdf_expand_label_block, KeyScheduler, SecretKind};
use crate::tls13::Tls13CipherSuite;

/// A PSK identity we decided to resume from.
struct ChosenPsk {
    index: usize,
    identity: Vec<u8>,
    resumption: ResumptionState,
    clock_skew_millis: i64,
}

pub(super) fn handle_client_hello(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    hello: ClientHelloPayload,
    encoded: &[u8],
) -> Result<(), Error> {
    trace!("we got a clienthello {hello:?}");

    if !core.done_retry {
        core.handshake_logging = Some(HandshakeLogging::from_client_hello(&hello));
    }
    if let Some(hook) = &core.config.server_extensions {
        hook.on_client_hello(&hello);
    }

    // middlebox compatibility CCS records become legal from here on
    core.read_record_layer.allow_ccs();

    validate_client_hello(core, &hello)?;

    let suite = choose_suite(core, &hello)?;
    debug!("decided upon suite {suite:?}");

    // PSK resolution must precede the key exchange decision: psk_ke needs
    // no key share at all.
    let chosen_psk = attempt_resumption(core, suite, &hello, encoded)?;
    let psk_mode = match &chosen_psk {
        Some(_) => Some(select_psk_mode(core, &hello)),
        None => None,
    };

    let need_kx = psk_mode != Some(PskKeyExchangeMode::PSK_KE);
    let chosen_share = match need_kx {
        true => match choose_key_share(core, &hello)? {
            ShareOutcome::Share(share) => Some(share),
            ShareOutcome::Retry(group) => {
                return emit_hello_retry_request(core, actions, suite, &hello, group, encoded);
            }
        },
        false => None,
    };

    core.alpn = core.config.select_alpn(hello.alpn_protocols())?;
    core.sni = core.sni.take().or_else(|| hello.sni_hostname());

    let early_data = decide_early_data(core, suite, &hello, &chosen_psk);
    core.early_data_type = Some(early_data);

    // the suite is settled: transcripts become incremental
    core.transcript = Some(match core.transcript.take() {
        Some(Transcript::Buffer(buffer)) => {
            Transcript::Hash(buffer.start_hash(suite.hash_provider))
        }
        Some(started) => started,
        None => return Err(Error::General("transcript missing".into())),
    });
    core.transcript_mut().append(encoded);

    let psk_index = chosen_psk.as_ref().map(|chosen| chosen.index as u16);
    let mut scheduler = match chosen_psk {
        Some(chosen) => {
            core.client_clock_skew_millis = Some(chosen.clock_skew_millis);
            core.psk_type = Some(PskType::Resumption);
            core.psk_mode = psk_mode;
            let scheduler = KeyScheduler::with_psk(suite, &chosen.resumption.secret);
            core.resumption = Some(chosen.resumption);
            scheduler
        }
        None => KeyScheduler::new(suite),
    };

    if early_data == EarlyDataType::Accepted {
        install_early_keys(core, actions, &mut scheduler)?;
    }

    // Key exchange and ServerHello
    let (server_share, shared_secret) = match chosen_share {
        Some(share) => {
            let kx = core
                .config
                .kx_groups
                .iter()
                .find(|skxg| skxg.name() == share.group)
                // chosen_share is drawn from this same list
                .unwrap()
                .start()?;
            let server_pub = kx.pub_key().to_vec();
            let secret = kx.complete(&share.payload.0)?;
            core.group = Some(share.group);
            core.key_exchange_type = Some(match core.done_retry {
                true => KeyExchangeType::HelloRetry,
                false => KeyExchangeType::OneRtt,
            });
            (
                Some(KeyShareEntry::new(share.group, &server_pub)),
                Some(secret),
            )
        }
        None => {
            core.key_exchange_type = Some(KeyExchangeType::None);
            (None, None)
        }
    };

    match &shared_secret {
        Some(secret) => scheduler.derive_handshake_secret(secret.secret_bytes()),
        None => {
            let zeroes = alloc::vec![0u8; suite.hash_provider.output_len()];
            scheduler.derive_handshake_secret(&zeroes);
        }
    }

    let sh = emit_server_hello(core, suite, &hello, server_share, psk_index)?;
    core.transcript_mut().append(&sh);
    actions.send(core.write_record_layer.write_handshake_flight(&sh)?, false);

    if !core.done_retry {
        actions.send(core.write_record_layer.write_ccs(), false);
    }

    install_handshake_keys(core, actions, suite, &mut scheduler)?;

    // everything from EncryptedExtensions on goes out in one protected
    // flight
    let mut flight = Vec::new();
    emit_encrypted_extensions(core, &hello, early_data, &mut flight);

    if core.psk_type != Some(PskType::Resumption) {
        if core.config.client_auth != ClientAuthRequirement::None {
            emit_certificate_request(core, &mut flight)?;
            core.client_cert_requested = true;
        }
        emit_certificate(core, &hello, &mut flight)?;
        emit_certificate_verify(core, &hello, &mut flight)?;
    }

    emit_finished(core, suite, &mut scheduler, &mut flight)?;

    // the flight goes out under the handshake keys; only then does the
    // write side move to application keys
    actions.send(
        core.write_record_layer.write_handshake_flight(&flight)?,
        true,
    );
    install_app_write_keys(core, actions, suite, &mut scheduler)?;

    core.version = Some(ProtocolVersion::TLSv1_3);
    core.suite = Some(suite);
    core.key_scheduler = Some(scheduler);
    core.psk_type = Some(core.psk_type.unwrap_or(match hello.psk() {
        Some(_) => PskType::Rejected,
        None => PskType::NotAttempted,
    }));

    core.state = match (early_data, core.client_cert_requested) {
        (EarlyDataType::Accepted, _) => StateEnum::AcceptingEarlyData,
        (_, true) => StateEnum::ExpectingCertificate,
        _ => StateEnum::ExpectingFinished,
    };
    Ok(())
}

fn validate_client_hello(
    core: &ConnectionCore,
    hello: &ClientHelloPayload,
) -> Result<(), Error> {
    if hello.compression_methods != [crate::msgs::enums::Compression::Null] {
        return Err(PeerIncompatible::NullCompressionRequired.into());
    }

    if hello.has_duplicate_extension() {
        return Err(InvalidMessage::DuplicateExtension(0).into());
    }

    match hello.supported_versions() {
        Some(versions) if versions.contains(&ProtocolVersion::TLSv1_3) => {}
        Some(_) => return Err(PeerIncompatible::Tls13NotOffered.into()),
        None => return Err(PeerIncompatible::SupportedVersionsExtensionRequired.into()),
    }

    if hello.signature_schemes().is_none() {
        return Err(PeerIncompatible::SignatureAlgorithmsExtensionRequired.into());
    }

    if hello.has_keyshare_extension_with_duplicates() {
        return Err(PeerMisbehaved::DuplicateKeyShareEntries.into());
    }

    if let Some(offer) = hello.psk() {
        if !hello.check_psk_ext_is_last() {
            return Err(PeerMisbehaved::PskExtensionMustBeLast.into());
        }
        if offer.identities.is_empty() {
            return Err(PeerMisbehaved::OfferedEmptyPskIdentities.into());
        }
        if offer.identities.len() != offer.binders.len() {
            return Err(PeerMisbehaved::PskBinderCountMismatch.into());
        }
    }

    if core.done_retry && core.sni != hello.sni_hostname() {
        return Err(PeerMisbehaved::IllegalHelloRetryAnswer.into());
    }

    Ok(())
}

fn choose_suite(
    core: &ConnectionCore,
    hello: &ClientHelloPayload,
) -> Result<&'static Tls13CipherSuite, Error> {
    let config = &core.config;
    let chosen = if config.honor_client_order {
        hello
            .cipher_suites
            .iter()
            .find_map(|offered| {
                config
                    .cipher_suites
                    .iter()
                    .find(|ours| ours.suite == *offered)
            })
            .copied()
    } else {
        config
            .cipher_suites
            .iter()
            .find(|ours| hello.cipher_suites.contains(&ours.suite))
            .copied()
    };

    let suite = chosen.ok_or(PeerIncompatible::NoCipherSuitesInCommon)?;

    // a retried hello must stick with the transcript's hash
    if core.done_retry {
        if let Some(Transcript::Hash(ctx)) = &core.transcript {
            if ctx.algorithm() != suite.hash_provider.algorithm() {
                return Err(PeerMisbehaved::IllegalHelloRetryAnswer.into());
            }
        }
    }

    Ok(suite)
}

enum ShareOutcome<'a> {
    Share(&'a KeyShareEntry),
    Retry(crate::enums::NamedGroup),
}

fn choose_key_share<'a>(
    core: &ConnectionCore,
    hello: &'a ClientHelloPayload,
) -> Result<ShareOutcome<'a>, Error> {
    let shares = hello
        .key_shares()
        .ok_or(PeerIncompatible::KeyShareExtensionRequired)?;

    let chosen = core.config.kx_groups.iter().find_map(|skxg| {
        shares
            .iter()
            .find(|share| share.group == skxg.name())
    });
    if let Some(share) = chosen {
        return Ok(ShareOutcome::Share(share));
    }

    if core.done_retry {
        return Err(PeerMisbehaved::RefusedToFollowHelloRetryRequest.into());
    }

    // no usable share; is there a group worth retrying for?
    let groups = hello.named_groups().unwrap_or_default();
    core.config
        .kx_groups
        .iter()
        .find(|skxg| groups.contains(&skxg.name()))
        .map(|skxg| ShareOutcome::Retry(skxg.name()))
        .ok_or_else(|| PeerIncompatible::NoKxGroupsInCommon.into())
}

fn emit_hello_retry_request(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    suite: &'static Tls13CipherSuite,
    hello: &ClientHelloPayload,
    group: crate::enums::NamedGroup,
    encoded: &[u8],
) -> Result<(), Error> {
    debug!("requesting retry for {group:?}");

    // the transcript restarts from a synthetic hash of the first hello
    let mut ctx = match core.transcript.take() {
        // the first ClientHello always finds the transcript buffering
        Some(Transcript::Buffer(buffer)) => buffer.start_hash(suite.hash_provider),
        _ => return Err(PeerMisbehaved::IllegalHelloRetryAnswer.into()),
    };
    ctx.append(encoded);
    ctx.rollup_for_retry();

    let hrr = HandshakeMessagePayload {
        typ: HandshakeType::ServerHello,
        payload: HandshakePayload::HelloRetryRequest(HelloRetryRequest {
            legacy_version: ProtocolVersion::TLSv1_2,
            session_id: hello.session_id,
            cipher_suite: suite.suite,
            extensions: alloc::vec![
                HelloRetryExtension::KeyShare(group),
                HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
            ],
        }),
    };
    let hrr_encoding = hrr.get_encoding();
    ctx.append(&hrr_encoding);
    core.transcript = Some(Transcript::Hash(ctx));

    actions.send(
        core.write_record_layer
            .write_handshake_flight(&hrr_encoding)?,
        false,
    );
    actions.send(core.write_record_layer.write_ccs(), true);

    if hello.early_data_offered() {
        core.early_data_type = Some(EarlyDataType::Rejected);
    }
    core.sni = hello.sni_hostname();
    core.key_exchange_type = Some(KeyExchangeType::HelloRetry);
    core.done_retry = true;
    core.state = StateEnum::ExpectingClientHello;
    Ok(())
}

fn select_psk_mode(core: &ConnectionCore, hello: &ClientHelloPayload) -> PskKeyExchangeMode {
    // resumption was only attempted when a common mode existed
    if hello.psk_mode_offered(PskKeyExchangeMode::PSK_DHE_KE)
        && core
            .config
            .supports_psk_mode(PskKeyExchangeMode::PSK_DHE_KE)
    {
        PskKeyExchangeMode::PSK_DHE_KE
    } else {
        PskKeyExchangeMode::PSK_KE
    }
}

fn attempt_resumption(
    core: &mut ConnectionCore,
    suite: &'static Tls13CipherSuite,
    hello: &ClientHelloPayload,
    encoded: &[u8],
) -> Result<Option<ChosenPsk>, Error> {
    let Some(offer) = hello.psk() else {
        return Ok(None);
    };

    let mode_usable = hello
        .psk_modes()
        .unwrap_or_default()
        .iter()
        .any(|mode| core.config.supports_psk_mode(*mode));
    if !mode_usable {
        debug!("no common psk key exchange mode; ignoring psk");
        core.psk_type = Some(PskType::NotSupported);
        return Ok(None);
    }

    let binder_plaintext = hello.binder_plaintext_from(encoded);
    let now = core.now_millis();

    for (i, psk_id) in offer.identities.iter().enumerate() {
        let Some(resumption) = core
            .config
            .ticketer
            .decrypt(&psk_id.identity.0)
        else {
            continue;
        };

        if resumption.version != ProtocolVersion::TLSv1_3
            || !suite.can_resume_from(resumption.cipher_suite, &core.config.cipher_suites)
        {
            continue;
        }

        let expired = now >= resumption
            .issued_at
            .saturating_add(u64::from(resumption.lifetime) * 1000);
        if expired {
            debug!("ticket {i} expired");
            continue;
        }

        // A valid ticket with a wrong binder fails the connection; it means
        // the peer does not actually hold the PSK.
        let scheduler = KeyScheduler::with_psk(suite, &resumption.secret);
        if !check_binder(&scheduler, suite, core, &binder_plaintext, &offer.binders[i].0) {
            return Err(PeerMisbehaved::IncorrectBinder.into());
        }

        let reported_age =
            u64::from(psk_id.obfuscated_ticket_age.wrapping_sub(resumption.age_add));
        let actual_age = now.saturating_sub(resumption.issued_at);
        let clock_skew_millis = reported_age as i64 - actual_age as i64;

        debug!("resuming from ticket {i} (skew {clock_skew_millis}ms)");
        return Ok(Some(ChosenPsk {
            index: i,
            identity: psk_id.identity.0.clone(),
            resumption,
            clock_skew_millis,
        }));
    }

    Ok(None)
}

fn check_binder(
    scheduler: &KeyScheduler,
    suite: &'static Tls13CipherSuite,
    core: &ConnectionCore,
    binder_plaintext: &[u8],
    binder: &[u8],
) -> bool {
    let digest = match &core.transcript {
        Some(Transcript::Buffer(buffer)) => {
            buffer.digest_given(suite.hash_provider, binder_plaintext)
        }
        Some(Transcript::Hash(ctx)) => ctx.digest_given(binder_plaintext),
        None => return false,
    };

    let binder_key = scheduler.resumption_binder_key();
    let finished_key =
        hkdf_expand_label_block(&binder_key, suite.hmac_provider, b"finished", &[]);
    let expect = suite
        .hmac_provider
        .with_key(finished_key.as_ref())
        .sign(&[digest.as_ref()]);

    expect.as_ref().ct_eq(binder).into()
}

fn decide_early_data(
    core: &mut ConnectionCore,
    suite: &'static Tls13CipherSuite,
    hello: &ClientHelloPayload,
    chosen: &Option<ChosenPsk>,
) -> EarlyDataType {
    if !hello.early_data_offered() {
        return EarlyDataType::NotAttempted;
    }
    if core.done_retry || core.config.max_early_data_size == 0 {
        return EarlyDataType::Rejected;
    }

    let Some(chosen) = chosen else {
        return EarlyDataType::Rejected;
    };

    // early data binds to the exact parameters of the original session,
    // offered as the first identity
    if chosen.index != 0
        || chosen.resumption.max_early_data_size == 0
        || chosen.resumption.cipher_suite != suite.suite
        || chosen.resumption.alpn != core.alpn
    {
        return EarlyDataType::Rejected;
    }

    if chosen.clock_skew_millis.unsigned_abs() > core.config.max_ticket_age_skew_millis {
        debug!("rejecting early data: ticket age skew too large");
        return EarlyDataType::Rejected;
    }

    // a failing validator rejects early data but never the connection
    if !core
        .config
        .app_token_validator
        .validate(&chosen.resumption)
    {
        debug!("rejecting early data: app token validator declined");
        return EarlyDataType::Rejected;
    }

    let replay = core.config.replay_cache.check(&chosen.identity);
    core.replay_cache_result = Some(replay);
    match replay {
        ReplayCacheResult::NotReplay => EarlyDataType::Accepted,
        ReplayCacheResult::MaybeReplay => EarlyDataType::Rejected,
        ReplayCacheResult::Replay => EarlyDataType::Replay,
    }
}

fn install_early_keys(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    scheduler: &mut KeyScheduler,
) -> Result<(), Error> {
    let digest = core.transcript_mut().ctx().current_digest();
    let early_secret =
        scheduler.derive_traffic_secret(SecretKind::ClientEarlyTrafficSecret, &digest);
    let early_exporter =
        scheduler.derive_traffic_secret(SecretKind::EarlyExporterMasterSecret, &digest);
    actions.secret(SecretKind::ClientEarlyTrafficSecret, early_secret.as_ref());
    actions.secret(SecretKind::EarlyExporterMasterSecret, early_exporter.as_ref());
    core.early_exporter_master_secret = Some(early_exporter);

    let suite = scheduler.suite();
    let (key, iv) = scheduler.get_traffic_key(&early_secret);
    let mut early_layer = ReadRecordLayer::new();
    early_layer.set_decrypter(Box::new(Tls13MessageDecrypter {
        cipher: suite.aead,
        key,
        iv,
    }))?;
    early_layer.allow_ccs();

    // the handshake-keyed layer waits aside until EndOfEarlyData
    core.read_record_layer.drain_into(&mut early_layer);
    let handshake_layer = core::mem::replace(&mut core.read_record_layer, early_layer);
    core.handshake_read_record_layer = Some(handshake_layer);

    // resumption state is populated before any early-data acceptance
    core.early_data_left = core
        .resumption
        .as_ref()
        .map(|r| r.max_early_data_size)
        .unwrap_or(0)
        .min(core.config.max_early_data_size);

    actions.push(Action::ReportEarlyHandshakeSuccess);
    Ok(())
}

fn emit_server_hello(
    core: &mut ConnectionCore,
    suite: &'static Tls13CipherSuite,
    hello: &ClientHelloPayload,
    server_share: Option<KeyShareEntry>,
    psk_index: Option<u16>,
) -> Result<Vec<u8>, Error> {
    let mut extensions = Vec::new();
    if let Some(share) = server_share {
        extensions.push(ServerExtension::KeyShare(share));
    }
    if let Some(index) = psk_index {
        extensions.push(ServerExtension::PresharedKey(index));
    }
    extensions.push(ServerExtension::SupportedVersions(ProtocolVersion::TLSv1_3));

    let sh = HandshakeMessagePayload {
        typ: HandshakeType::ServerHello,
        payload: HandshakePayload::ServerHello(ServerHelloPayload {
            legacy_version: ProtocolVersion::TLSv1_2,
            random: Random(random_array(core.config.random)?),
            session_id: hello.session_id,
            cipher_suite: suite.suite,
            compression_method: crate::msgs::enums::Compression::Null,
            extensions,
        }),
    };
    trace!("sending server hello {sh:?}");
    Ok(sh.get_encoding())
}

fn install_handshake_keys(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    suite: &'static Tls13CipherSuite,
    scheduler: &mut KeyScheduler,
) -> Result<(), Error> {
    let digest = core.transcript_mut().ctx().current_digest();

    let server_secret =
        scheduler.derive_traffic_secret(SecretKind::ServerHandshakeTrafficSecret, &digest);
    actions.secret(SecretKind::ServerHandshakeTrafficSecret, server_secret.as_ref());
    let (key, iv) = scheduler.get_traffic_key(&server_secret);
    core.write_record_layer
        .set_encrypter(Box::new(Tls13MessageEncrypter {
            cipher: suite.aead,
            key,
            iv,
        }));

    let client_secret =
        scheduler.derive_traffic_secret(SecretKind::ClientHandshakeTrafficSecret, &digest);
    actions.secret(SecretKind::ClientHandshakeTrafficSecret, client_secret.as_ref());
    let (key, iv) = scheduler.get_traffic_key(&client_secret);
    let decrypter = Box::new(Tls13MessageDecrypter {
        cipher: suite.aead,
        key,
        iv,
    });

    match &mut core.handshake_read_record_layer {
        // early data accepted: the stashed layer gets the handshake keys
        Some(stashed) => stashed.set_decrypter(decrypter)?,
        None => {
            core.read_record_layer.set_decrypter(decrypter)?;
            if matches!(
                core.early_data_type,
                Some(EarlyDataType::Rejected) | Some(EarlyDataType::Replay)
            ) {
                // in-flight early records must be skipped, not failed
                let budget = skip_budget(core);
                core.read_record_layer.set_skip_budget(budget);
            }
        }
    }

    core.client_handshake_secret = Some(client_secret);
    Ok(())
}

fn skip_budget(core: &ConnectionCore) -> usize {
    let from_ticket = core
        .resumption
        .as_ref()
        .map(|r| r.max_early_data_size)
        .unwrap_or(0);
    let budget = from_ticket.max(core.config.max_early_data_size) as usize;
    // room for record framing overhead on top of the raw payload budget
    budget + budget / crate::record_layer::MAX_FRAGMENT_LEN * 256 + 512
}

fn emit_encrypted_extensions(
    core: &mut ConnectionCore,
    hello: &ClientHelloPayload,
    early_data: EarlyDataType,
    flight: &mut Vec<u8>,
) {
    let mut extensions = Vec::new();
    if let Some(alpn) = &core.alpn {
        extensions.push(ServerExtension::SelectedProtocol(PayloadU8::new(
            alpn.clone(),
        )));
    }
    if early_data == EarlyDataType::Accepted {
        extensions.push(ServerExtension::EarlyData);
    }
    if hello.sni_hostname().is_some() {
        extensions.push(ServerExtension::ServerNameAck);
    }
    if let Some(hook) = &core.config.server_extensions {
        for (typ, body) in hook.encrypted_extensions() {
            extensions.push(ServerExtension::Unknown(UnknownExtension {
                typ: typ.into(),
                payload: Payload::new(body),
            }));
        }
    }

    let ee = HandshakeMessagePayload {
        typ: HandshakeType::EncryptedExtensions,
        payload: HandshakePayload::EncryptedExtensions(extensions),
    };
    trace!("sending encrypted extensions {ee:?}");
    let encoding = ee.get_encoding();
    core.transcript_mut().append(&encoding);
    flight.extend_from_slice(&encoding);
}

fn emit_certificate_request(
    core: &mut ConnectionCore,
    flight: &mut Vec<u8>,
) -> Result<(), Error> {
    let verifier = core
        .config
        .client_cert_verifier
        .as_ref()
        .ok_or_else(|| Error::General("client auth configured without a verifier".into()))?;

    let cr = HandshakeMessagePayload {
        typ: HandshakeType::CertificateRequest,
        payload: HandshakePayload::CertificateRequest(CertificateRequestPayload {
            context: PayloadU8::empty(),
            extensions: alloc::vec![CertReqExtension::SignatureAlgorithms(
                verifier.supported_verify_schemes()
            )],
        }),
    };
    trace!("sending certificate request {cr:?}");
    let encoding = cr.get_encoding();
    core.transcript_mut().append(&encoding);
    flight.extend_from_slice(&encoding);
    Ok(())
}

fn emit_certificate(
    core: &mut ConnectionCore,
    hello: &ClientHelloPayload,
    flight: &mut Vec<u8>,
) -> Result<(), Error> {
    let selected = core.config.cert_manager.get_cert(
        core.sni.as_deref(),
        hello.signature_schemes().unwrap_or_default(),
        hello.named_groups().unwrap_or_default(),
    )?;

    let cert_payload = CertificatePayload::from_chain(selected.chain.clone());
    core.server_cert_chain = Some(selected.chain);

    // pick the scheme now so CertificateVerify can use the same signer
    let tls13_schemes: Vec<SignatureScheme> = hello
        .signature_schemes()
        .unwrap_or_default()
        .iter()
        .filter(|scheme| scheme.supported_in_tls13())
        .copied()
        .collect();
    core.sig_scheme = Some(
        selected
            .signer
            .choose_scheme(&tls13_schemes)
            .ok_or(PeerIncompatible::NoSignatureSchemesInCommon)?,
    );
    core.server_signer = Some(selected.signer);

    let compressor = hello
        .certificate_compression_algorithms()
        .unwrap_or_default()
        .iter()
        .find_map(|offered| {
            core.config
                .cert_compressors
                .iter()
                .find(|ours| ours.algorithm() == *offered)
        });

    let msg = match compressor {
        Some(compressor) => {
            let uncompressed = {
                let mut body = Vec::new();
                cert_payload.encode(&mut body);
                body
            };
            match compressor.compress(uncompressed.clone()) {
                Ok(compressed) if compressed.len() < uncompressed.len() => {
                    debug!("compressing certificate with {:?}", compressor.algorithm());
                    core.server_cert_compression_algo = Some(compressor.algorithm());
                    HandshakeMessagePayload {
                        typ: HandshakeType::CompressedCertificate,
                        payload: HandshakePayload::CompressedCertificate(
                            CompressedCertificatePayload {
                                algorithm: compressor.algorithm(),
                                uncompressed_len: u24(uncompressed.len() as u32),
                                compressed: PayloadU24::new(compressed),
                            },
                        ),
                    }
                }
                // compression that fails or does not help is quietly skipped
                _ => HandshakeMessagePayload {
                    typ: HandshakeType::Certificate,
                    payload: HandshakePayload::Certificate(cert_payload),
                },
            }
        }
        None => HandshakeMessagePayload {
            typ: HandshakeType::Certificate,
            payload: HandshakePayload::Certificate(cert_payload),
        },
    };

    trace!("sending certificate");
    let encoding = msg.get_encoding();
    core.transcript_mut().append(&encoding);
    flight.extend_from_slice(&encoding);
    Ok(())
}

fn emit_certificate_verify(
    core: &mut ConnectionCore,
    _hello: &ClientHelloPayload,
    flight: &mut Vec<u8>,
) -> Result<(), Error> {
    let digest = core.transcript_mut().ctx().current_digest();
    let message = crate::tls13::construct_server_verify_message(&digest);

    // both set just above in emit_certificate
    let scheme = core.sig_scheme.unwrap();
    let signer = core.server_signer.as_ref().unwrap();
    let sig = signer.sign(scheme, &message)?;

    let cv = HandshakeMessagePayload {
        typ: HandshakeType::CertificateVerify,
        payload: HandshakePayload::CertificateVerify(DigitallySignedStruct::new(scheme, sig)),
    };
    trace!("sending certificate verify {cv:?}");
    let encoding = cv.get_encoding();
    core.transcript_mut().append(&encoding);
    flight.extend_from_slice(&encoding);
    Ok(())
}

fn emit_finished(
    core: &mut ConnectionCore,
    suite: &'static Tls13CipherSuite,
    scheduler: &mut KeyScheduler,
    flight: &mut Vec<u8>,
) -> Result<(), Error> {
    let server_secret = scheduler
        .get_secret(SecretKind::ServerHandshakeTrafficSecret)
        .cloned()
        .ok_or_else(|| Error::General("server handshake secret missing".into()))?;
    let verify_data = core
        .transcript_mut()
        .ctx()
        .finished_mac(&server_secret, suite.hmac_provider);

    let fin = HandshakeMessagePayload {
        typ: HandshakeType::Finished,
        payload: HandshakePayload::Finished(Payload::new(verify_data.as_ref().to_vec())),
    };
    trace!("sending finished");
    let encoding = fin.get_encoding();
    core.transcript_mut().append(&encoding);
    flight.extend_from_slice(&encoding);

    core.hash_at_server_fin = Some(core.transcript_mut().ctx().current_digest());
    Ok(())
}

fn install_app_write_keys(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    suite: &'static Tls13CipherSuite,
    scheduler: &mut KeyScheduler,
) -> Result<(), Error> {
    scheduler.derive_master_secret();

    // write keys change now; read keys change only after the client's
    // Finished is verified
    let digest = core
        .hash_at_server_fin
        .clone()
        .ok_or_else(|| Error::General("transcript digest missing".into()))?;

    let server_secret =
        scheduler.derive_traffic_secret(SecretKind::ServerApplicationTrafficSecret, &digest);
    actions.secret(
        SecretKind::ServerApplicationTrafficSecret,
        server_secret.as_ref(),
    );
    let (key, iv) = scheduler.get_traffic_key(&server_secret);
    core.write_record_layer
        .set_encrypter(Box::new(Tls13MessageEncrypter {
            cipher: suite.aead,
            key,
            iv,
        }));

    let client_secret =
        scheduler.derive_traffic_secret(SecretKind::ClientApplicationTrafficSecret, &digest);
    actions.secret(
        SecretKind::ClientApplicationTrafficSecret,
        client_secret.as_ref(),
    );

    let exporter = scheduler.derive_traffic_secret(SecretKind::ExporterMasterSecret, &digest);
    actions.secret(SecretKind::ExporterMasterSecret, exporter.as_ref());

    core.server_app_secret = Some(server_secret);
    core.client_app_secret = Some(client_secret);
    core.exporter_master_secret = Some(exporter);
    Ok(())
}

/// Build a protection pair for a traffic secret (used by the post-hello
/// handlers too).
pub(super) fn decrypter_for(
    suite: &'static Tls13CipherSuite,
    scheduler: &KeyScheduler,
    secret: &OkmBlock,
) -> Box<Tls13MessageDecrypter> {
    let (key, iv) = scheduler.get_traffic_key(secret);
    Box::new(Tls13MessageDecrypter {
        cipher: suite.aead,
        key,
        iv,
    })
}

pub(super) fn encrypter_for(
    suite: &'static Tls13CipherSuite,
    scheduler: &KeyScheduler,
    secret: &OkmBlock,
) -> Box<Tls13MessageEncrypter> {
    let (key, iv) = scheduler.get_traffic_key(secret);
    Box::new(Tls13MessageEncrypter {
        cipher: suite.aead,
        key,
        iv,
    })
}
