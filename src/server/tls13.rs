//! Handlers for everything after the server's first flight: the 0-RTT
//! window, client authentication, the client Finished, session tickets,
//! key updates and the close protocol.

use subtle::ConstantTimeEq;

use crate::crypto::random_array;
use crate::enums::HandshakeType;
use crate::error::{CertificateError, Error, PeerMisbehaved};
use crate::log::{debug, trace, warn};
use crate::msgs::codec::Codec;
use crate::msgs::enums::KeyUpdateRequest;
use crate::msgs::handshake::{
    CertificatePayload, DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload,
    NewSessionTicketExtension, NewSessionTicketPayload,
};
use crate::server::actions::{Action, Actions, ActionsExt};
use crate::server::config::{ClientAuthRequirement, ResumptionState};
use crate::server::connection::{ConnectionCore, StateEnum};
use crate::server::hs;
use crate::tls13::key_schedule::{next_traffic_secret, SecretKind};

/// The client is done with early data; future records use the handshake
/// keys held by the stashed read layer.
pub(super) fn handle_end_of_early_data(
    core: &mut ConnectionCore,
    encoded: &[u8],
) -> Result<(), Error> {
    restore_handshake_read_layer(core, 0)?;
    core.transcript_mut().append(encoded);
    core.state = StateEnum::ExpectingFinished;
    Ok(())
}

/// The 0-RTT window expired before EndOfEarlyData arrived.  Further early
/// records (including the EndOfEarlyData itself) will fail to decrypt under
/// the handshake keys and are silently skipped within the remaining budget.
pub(super) fn abandon_early_data(core: &mut ConnectionCore) -> Result<(), Error> {
    let budget = core.early_data_left as usize + 1024;
    restore_handshake_read_layer(core, budget)?;
    core.early_data_left = 0;
    core.state = StateEnum::ExpectingFinished;
    Ok(())
}

fn restore_handshake_read_layer(
    core: &mut ConnectionCore,
    skip_budget: usize,
) -> Result<(), Error> {
    let mut handshake_layer = core
        .handshake_read_record_layer
        .take()
        .ok_or_else(|| Error::General("handshake read layer missing".into()))?;
    core.read_record_layer
        .drain_into(&mut handshake_layer);
    if skip_budget > 0 {
        handshake_layer.set_skip_budget(skip_budget);
    }
    core.read_record_layer = handshake_layer;
    Ok(())
}

pub(super) fn handle_certificate(
    core: &mut ConnectionCore,
    cert: CertificatePayload,
    encoded: &[u8],
) -> Result<(), Error> {
    core.transcript_mut().append(encoded);

    if !cert.context.0.is_empty() {
        return Err(crate::error::InvalidMessage::InvalidMessage(
            "CertificateRequestContext",
        )
        .into());
    }
    // we solicited no per-entry extensions either
    if cert.any_entry_has_extension() {
        return Err(PeerMisbehaved::UnsolicitedCertificateExtensions.into());
    }

    let chain = cert.into_chain();
    if chain.is_empty() {
        return match core.config.client_auth {
            ClientAuthRequirement::Required => {
                Err(CertificateError::NoCertificatesPresented.into())
            }
            _ => {
                debug!("client declined certificate request");
                core.state = StateEnum::ExpectingFinished;
                Ok(())
            }
        };
    }

    core.unverified_cert_chain = Some(chain);
    core.state = StateEnum::ExpectingCertificateVerify;
    Ok(())
}

pub(super) fn handle_certificate_verify(
    core: &mut ConnectionCore,
    sig: DigitallySignedStruct,
    encoded: &[u8],
) -> Result<(), Error> {
    let verifier = core
        .config
        .client_cert_verifier
        .clone()
        .ok_or_else(|| Error::General("client auth configured without a verifier".into()))?;

    if !verifier
        .supported_verify_schemes()
        .contains(&sig.scheme)
    {
        return Err(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme.into());
    }

    let chain = core
        .unverified_cert_chain
        .take()
        .ok_or_else(|| Error::General("certificate chain missing".into()))?;

    // the signature covers the transcript up to (not including) this message
    let digest = core.transcript_mut().ctx().current_digest();
    let message = crate::tls13::construct_client_verify_message(&digest);

    verifier.verify_chain(&chain)?;
    verifier.verify_signature(sig.scheme, &message, &chain[0], &sig.sig.0)?;
    trace!("client CertificateVerify OK");

    core.client_cert = Some(chain);
    core.transcript_mut().append(encoded);
    core.state = StateEnum::ExpectingFinished;
    Ok(())
}

pub(super) fn handle_finished(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    verify_data: &[u8],
    encoded: &[u8],
) -> Result<(), Error> {
    let suite = core
        .suite
        .ok_or_else(|| Error::General("suite not negotiated".into()))?;
    let client_secret = core
        .client_handshake_secret
        .clone()
        .ok_or_else(|| Error::General("client handshake secret missing".into()))?;

    let expect = core
        .transcript_mut()
        .ctx()
        .finished_mac(&client_secret, suite.hmac_provider);

    if !bool::from(expect.as_ref().ct_eq(verify_data)) {
        warn!("client Finished MAC did not verify");
        return Err(PeerMisbehaved::IncorrectFinished.into());
    }

    // Finished joins the transcript before the resumption secret derives
    // from it
    core.transcript_mut().append(encoded);

    let scheduler = core
        .key_scheduler
        .as_mut()
        .ok_or_else(|| Error::General("key scheduler missing".into()))?;

    // switch the read side to application keys
    let client_app_secret = core
        .client_app_secret
        .clone()
        .ok_or_else(|| Error::General("client application secret missing".into()))?;
    let decrypter = hs::decrypter_for(suite, scheduler, &client_app_secret);
    core.read_record_layer.set_decrypter(decrypter)?;

    let digest = match &mut core.transcript {
        Some(crate::server::connection::Transcript::Hash(ctx)) => ctx.current_digest(),
        _ => return Err(Error::General("transcript missing".into())),
    };
    let resumption_master =
        scheduler.derive_traffic_secret(SecretKind::ResumptionMasterSecret, &digest);
    actions.secret(SecretKind::ResumptionMasterSecret, resumption_master.as_ref());
    core.resumption_master_secret = Some(resumption_master);
    scheduler.clear_master_secret();

    core.handshake_time_millis = Some(core.now_millis());
    core.state = StateEnum::AcceptingData;
    core.read_record_layer.forbid_ccs();
    actions.push(Action::ReportHandshakeSuccess);
    debug!("handshake complete");

    for _ in 0..core.config.send_new_session_tickets {
        emit_ticket(core, actions)?;
    }
    Ok(())
}

/// Seal and send one NewSessionTicket.
pub(super) fn emit_ticket(core: &mut ConnectionCore, actions: &mut Actions) -> Result<(), Error> {
    let scheduler = core
        .key_scheduler
        .as_ref()
        .ok_or_else(|| Error::General("key scheduler missing".into()))?;
    let suite = core
        .suite
        .ok_or_else(|| Error::General("suite not negotiated".into()))?;

    let nonce = random_array::<32>(core.config.random)?;
    let psk = scheduler.resumption_psk(&nonce)?;
    let age_add = u32::from_be_bytes(random_array::<4>(core.config.random)?);

    let state = ResumptionState {
        version: crate::enums::ProtocolVersion::TLSv1_3,
        cipher_suite: suite.suite,
        secret: psk.as_ref().to_vec(),
        alpn: core.alpn.clone(),
        issued_at: core.now_millis(),
        lifetime: core.config.ticket_lifetime,
        age_add,
        max_early_data_size: core.config.max_early_data_size,
        app_token: core.config.app_token.clone(),
        client_cert_chain: core.client_cert.clone(),
    };

    let Some(ticket) = core.config.ticketer.encrypt(&state) else {
        trace!("ticketer declined; not issuing ticket");
        return Ok(());
    };

    let mut payload = NewSessionTicketPayload::new(
        core.config.ticket_lifetime,
        age_add,
        nonce.to_vec(),
        ticket,
    );
    if core.config.max_early_data_size > 0 {
        payload
            .extensions
            .push(NewSessionTicketExtension::EarlyData(
                core.config.max_early_data_size,
            ));
    }

    let nst = HandshakeMessagePayload {
        typ: HandshakeType::NewSessionTicket,
        payload: HandshakePayload::NewSessionTicket(payload),
    };
    trace!("sending new session ticket");
    let bytes = core
        .write_record_layer
        .write_handshake_flight(&nst.get_encoding())?;
    actions.send(bytes, true);
    Ok(())
}

/// The client rolled its write keys, and may be asking us to roll ours.
pub(super) fn handle_key_update(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    request: KeyUpdateRequest,
) -> Result<(), Error> {
    if core.read_record_layer.has_pending_handshake_data() {
        return Err(PeerMisbehaved::HandshakeMessageSplitAcrossKeyChange.into());
    }

    let suite = core
        .suite
        .ok_or_else(|| Error::General("suite not negotiated".into()))?;
    let scheduler = core
        .key_scheduler
        .as_ref()
        .ok_or_else(|| Error::General("key scheduler missing".into()))?;

    // roll the read keys
    let old = core
        .client_app_secret
        .clone()
        .ok_or_else(|| Error::General("client application secret missing".into()))?;
    let new = next_traffic_secret(&old, suite.hmac_provider);
    let decrypter = hs::decrypter_for(suite, scheduler, &new);
    core.read_record_layer.set_decrypter(decrypter)?;
    core.client_app_secret = Some(new);
    debug!("client initiated key update ({request:?})");

    if request == KeyUpdateRequest::UpdateRequested {
        respond_key_update(core, actions, KeyUpdateRequest::UpdateNotRequested)?;
    }
    Ok(())
}

/// Our own write key is near exhaustion; roll it and ask the peer to do
/// the same.
pub(super) fn initiate_key_update(
    core: &mut ConnectionCore,
    actions: &mut Actions,
) -> Result<(), Error> {
    respond_key_update(core, actions, KeyUpdateRequest::UpdateRequested)
}

fn respond_key_update(
    core: &mut ConnectionCore,
    actions: &mut Actions,
    request: KeyUpdateRequest,
) -> Result<(), Error> {
    let suite = core
        .suite
        .ok_or_else(|| Error::General("suite not negotiated".into()))?;

    // the KeyUpdate itself goes out under the old keys
    let msg = HandshakeMessagePayload {
        typ: HandshakeType::KeyUpdate,
        payload: HandshakePayload::KeyUpdate(request),
    };
    let bytes = core
        .write_record_layer
        .write_handshake_flight(&msg.get_encoding())?;
    actions.send(bytes, true);

    let scheduler = core
        .key_scheduler
        .as_ref()
        .ok_or_else(|| Error::General("key scheduler missing".into()))?;
    let old = core
        .server_app_secret
        .clone()
        .ok_or_else(|| Error::General("server application secret missing".into()))?;
    let new = next_traffic_secret(&old, suite.hmac_provider);
    let encrypter = hs::encrypter_for(suite, scheduler, &new);
    core.write_record_layer.set_encrypter(encrypter);
    core.server_app_secret = Some(new);
    debug!("rolled server write keys");
    Ok(())
}
