//! Legacy Just Works pairing as LE central
//!
//! Randoms and AES passes come from the controller: each step queues an LE
//! Rand or LE Encrypt, records the request in the oracle mailbox, and the
//! dispatcher resumes here through [`on_oracle_result`] when the command
//! completes. Peer keys are persisted the moment they arrive.

use super::constants::*;
use super::crypto::{c1_p1, c1_p2, s1_r_prime, xor128};
use super::pdu::{KeyDistribution, PairingFeatures, SmpPdu};
use super::{SmpError, SmpResult};
use crate::gap::{AddressType, RemoteAddress};
use crate::hci::HciCommand;
use crate::host::{ConnFlags, DeviceSession, OracleMailbox, OracleOp, Sequencer};
use crate::keystore::{KeyStore, MasterIdent};
use crate::l2cap::constants::L2CAP_SMP_CID;
use log::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    PairingReqSent,
    GeneratingRandom,
    ComputingConfirm,
    AwaitingConfirm,
    AwaitingRandom,
    DerivingStk,
    AwaitingEncryption,
    AwaitingKeyDistribution,
}

/// Transient pairing data, dropped on completion or session reset
#[derive(Debug, Clone)]
pub struct PairingScratch {
    pub state: PairingState,
    /// Wire bytes of our Pairing Request
    pub preq: [u8; 7],
    /// Wire bytes of the peer's Pairing Response
    pub pres: [u8; 7],
    pub local_random: [u8; 16],
    pub peer_random: [u8; 16],
    /// Kept for logs only
    pub peer_confirm: [u8; 16],
    pub stk: [u8; 16],
    /// Keys we distribute, as negotiated
    pub local_keys: KeyDistribution,
    /// Keys the peer distributes, as negotiated
    pub peer_keys: KeyDistribution,
    /// Peer keys received so far
    pub received: KeyDistribution,
}

impl PairingScratch {
    fn new(preq: [u8; 7]) -> Self {
        Self {
            state: PairingState::PairingReqSent,
            preq,
            pres: [0; 7],
            local_random: [0; 16],
            peer_random: [0; 16],
            peer_confirm: [0; 16],
            stk: [0; 16],
            local_keys: KeyDistribution::empty(),
            peer_keys: KeyDistribution::empty(),
            received: KeyDistribution::empty(),
        }
    }
}

/// Outcome worth reporting to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpEvent {
    /// Pairing finished and keys were exchanged
    Complete,
    /// Link encrypted with a stored key
    Encrypted,
    /// Pairing abandoned with this reason
    Failed(u8),
}

/// What pairing needs besides the session itself
pub struct SmpContext<'a> {
    pub tx: &'a Sequencer,
    pub mailbox: &'a OracleMailbox,
    pub keys: &'a mut KeyStore,
    /// Our own address and type
    pub local: RemoteAddress,
}

fn smp_addr_type(kind: AddressType) -> u8 {
    match kind {
        AddressType::Random | AddressType::RandomIdentity => SMP_ADDR_TYPE_RANDOM,
        AddressType::Public | AddressType::PublicIdentity => SMP_ADDR_TYPE_PUBLIC,
    }
}

fn send(session: &DeviceSession, tx: &Sequencer, pdu: &SmpPdu) -> SmpResult<()> {
    let handle = session.acl_handle.ok_or(SmpError::NotConnected)?;
    debug!("session {}: SMP send 0x{:02x}", session.id, pdu.code());
    tx.send_l2cap(handle, L2CAP_SMP_CID, &pdu.serialize())?;
    Ok(())
}

/// Records the request, then queues the command that computes it
fn ask_oracle(
    session: &DeviceSession,
    ctx: &SmpContext<'_>,
    op: OracleOp,
    command: HciCommand,
) -> SmpResult<()> {
    ctx.mailbox.push(session.id, op);
    if let Err(e) = ctx.tx.send_command(&command) {
        ctx.mailbox.retract(session.id, op);
        return Err(e.into());
    }
    Ok(())
}

fn encrypt(
    session: &DeviceSession,
    ctx: &SmpContext<'_>,
    op: OracleOp,
    plaintext: [u8; 16],
) -> SmpResult<()> {
    ask_oracle(
        session,
        ctx,
        op,
        HciCommand::LeEncrypt {
            key: SMP_JUST_WORKS_TK,
            plaintext,
        },
    )
}

/// Drops pairing scratch and any oracle work still owed to it
fn end_pairing(session: &mut DeviceSession, mailbox: &OracleMailbox) {
    session.pairing = None;
    mailbox.discard(session.id);
}

fn abandon(session: &mut DeviceSession, ctx: &SmpContext<'_>, reason: u8) -> SmpResult<SmpEvent> {
    error!(
        "session {}: pairing failed: {}",
        session.id,
        reason_name(reason)
    );
    end_pairing(session, ctx.mailbox);
    send(session, ctx.tx, &SmpPdu::PairingFailed(reason))?;
    Ok(SmpEvent::Failed(reason))
}

/// Sends our Pairing Request; a pairing already running is left alone.
pub fn start_pairing(session: &mut DeviceSession, ctx: &mut SmpContext<'_>) -> SmpResult<()> {
    if session.pairing.is_some() {
        debug!("session {}: pairing already in progress", session.id);
        return Ok(());
    }
    let request = SmpPdu::PairingRequest(PairingFeatures::default());
    let mut preq = [0u8; 7];
    preq.copy_from_slice(&request.serialize());
    send(session, ctx.tx, &request)?;
    info!("session {}: pairing with {}", session.id, session.remote);
    session.pairing = Some(PairingScratch::new(preq));
    Ok(())
}

/// Encrypts with the stored key for this peer, pairing when there is none
pub fn start_security(session: &mut DeviceSession, ctx: &mut SmpContext<'_>) -> SmpResult<()> {
    if session.pairing.is_some() {
        return Ok(());
    }
    let handle = session.acl_handle.ok_or(SmpError::NotConnected)?;
    match ctx.keys.load_le(&session.remote) {
        Some((ltk, ident)) => {
            debug!("session {}: encrypting with stored LTK", session.id);
            ctx.tx.send_command(&HciCommand::LeEnableEncryption {
                handle,
                rand: ident.rand,
                ediv: ident.ediv,
                ltk,
            })?;
            Ok(())
        }
        None => start_pairing(session, ctx),
    }
}

/// Handles one PDU received on the SMP channel
pub fn handle_pdu(
    session: &mut DeviceSession,
    ctx: &mut SmpContext<'_>,
    data: &[u8],
) -> SmpResult<Option<SmpEvent>> {
    let pdu = match SmpPdu::parse(data) {
        Ok(pdu) => pdu,
        Err(SmpError::UnknownCommand(code)) => {
            warn!("session {}: unknown SMP command 0x{:02x}", session.id, code);
            send(
                session,
                ctx.tx,
                &SmpPdu::PairingFailed(SMP_REASON_COMMAND_NOT_SUPPORTED),
            )?;
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    debug!("session {}: SMP recv 0x{:02x}", session.id, pdu.code());

    let state = session.pairing.as_ref().map(|p| p.state);
    match (pdu, state) {
        (SmpPdu::PairingFailed(reason), _) => {
            error!(
                "session {}: peer aborted pairing: {}",
                session.id,
                reason_name(reason)
            );
            end_pairing(session, ctx.mailbox);
            Ok(Some(SmpEvent::Failed(reason)))
        }
        (SmpPdu::SecurityRequest(auth_req), None) => {
            debug!("session {}: security request {:?}", session.id, auth_req);
            if !session.flags.contains(ConnFlags::ENCRYPTED) {
                start_security(session, ctx)?;
            }
            Ok(None)
        }
        (SmpPdu::SecurityRequest(_), Some(_)) => Ok(None),
        (SmpPdu::PairingRequest(_), _) => {
            // Configuration clients connect without bonding
            warn!("session {}: peer-initiated pairing refused", session.id);
            send(
                session,
                ctx.tx,
                &SmpPdu::PairingFailed(SMP_REASON_PAIRING_NOT_SUPPORTED),
            )?;
            Ok(None)
        }
        (SmpPdu::PairingResponse(features), Some(PairingState::PairingReqSent)) => {
            on_pairing_response(session, ctx, features)
        }
        (SmpPdu::PairingConfirm(confirm), Some(PairingState::AwaitingConfirm)) => {
            let scratch = session.pairing.as_mut().ok_or(SmpError::NoPairing)?;
            scratch.peer_confirm = confirm;
            scratch.state = PairingState::AwaitingRandom;
            let random = scratch.local_random;
            send(session, ctx.tx, &SmpPdu::PairingRandom(random))?;
            Ok(None)
        }
        (SmpPdu::PairingRandom(random), Some(PairingState::AwaitingRandom)) => {
            let scratch = session.pairing.as_mut().ok_or(SmpError::NoPairing)?;
            // The peer's confirm is not checked against c1(random)
            scratch.peer_random = random;
            scratch.state = PairingState::DerivingStk;
            let r_prime = s1_r_prime(&scratch.local_random, &scratch.peer_random);
            encrypt(session, ctx, OracleOp::ShortTermKey, r_prime)?;
            Ok(None)
        }
        (pdu, Some(PairingState::AwaitingKeyDistribution)) => on_peer_key(session, ctx, pdu),
        (pdu, state) => {
            warn!(
                "session {}: SMP 0x{:02x} unexpected in {:?}",
                session.id,
                pdu.code(),
                state
            );
            Err(SmpError::UnexpectedPdu(pdu.code()))
        }
    }
}

fn on_pairing_response(
    session: &mut DeviceSession,
    ctx: &mut SmpContext<'_>,
    features: PairingFeatures,
) -> SmpResult<Option<SmpEvent>> {
    if features.max_key_size < SMP_MIN_ENCRYPTION_KEY_SIZE
        || features.max_key_size > SMP_MAX_ENCRYPTION_KEY_SIZE
    {
        return abandon(session, ctx, SMP_REASON_ENCRYPTION_KEY_SIZE).map(Some);
    }
    let scratch = session.pairing.as_mut().ok_or(SmpError::NoPairing)?;
    scratch
        .pres
        .copy_from_slice(&SmpPdu::PairingResponse(features).serialize());
    let offered = PairingFeatures::default();
    scratch.local_keys = features.initiator_keys & offered.initiator_keys;
    scratch.peer_keys = features.responder_keys & offered.responder_keys;
    scratch.state = PairingState::GeneratingRandom;
    debug!(
        "session {}: pairing response io 0x{:02x} keys {:?}/{:?}",
        session.id, features.io_capability, scratch.local_keys, scratch.peer_keys
    );

    ask_oracle(session, ctx, OracleOp::RandLow, HciCommand::LeRand)?;
    ask_oracle(session, ctx, OracleOp::RandHigh, HciCommand::LeRand)?;
    Ok(None)
}

/// Resumes pairing with the result of an LE Rand or LE Encrypt.
///
/// A result for a session that is no longer pairing, or that does not fit
/// the current pairing state, is dropped.
pub fn on_oracle_result(
    session: &mut DeviceSession,
    ctx: &mut SmpContext<'_>,
    op: OracleOp,
    data: &[u8],
) -> SmpResult<Option<SmpEvent>> {
    let local = ctx.local;
    let remote = session.remote;
    let handle = session.acl_handle.ok_or(SmpError::NotConnected)?;
    let Some(scratch) = session.pairing.as_mut() else {
        debug!("session {}: dropping {:?} result", session.id, op);
        return Ok(None);
    };
    let expected = match op {
        OracleOp::RandLow | OracleOp::RandHigh => PairingState::GeneratingRandom,
        OracleOp::ConfirmStage1 | OracleOp::ConfirmStage2 => PairingState::ComputingConfirm,
        OracleOp::ShortTermKey => PairingState::DerivingStk,
    };
    if scratch.state != expected {
        warn!(
            "session {}: {:?} result while {:?}, dropped",
            session.id, op, scratch.state
        );
        return Ok(None);
    }

    match op {
        OracleOp::RandLow | OracleOp::RandHigh => {
            let half = data
                .get(..8)
                .ok_or_else(|| SmpError::InvalidPdu("short LE Rand result".into()))?;
            let offset = if op == OracleOp::RandLow { 0 } else { 8 };
            scratch.local_random[offset..offset + 8].copy_from_slice(half);
            if op == OracleOp::RandHigh {
                scratch.state = PairingState::ComputingConfirm;
                let p1 = c1_p1(
                    &scratch.preq,
                    &scratch.pres,
                    smp_addr_type(local.kind),
                    smp_addr_type(remote.kind),
                );
                let block = xor128(&scratch.local_random, &p1);
                encrypt(session, ctx, OracleOp::ConfirmStage1, block)?;
            }
            Ok(None)
        }
        OracleOp::ConfirmStage1 => {
            let stage1 = block(data)?;
            let p2 = c1_p2(&local.addr, &remote.addr);
            encrypt(session, ctx, OracleOp::ConfirmStage2, xor128(&stage1, &p2))?;
            Ok(None)
        }
        OracleOp::ConfirmStage2 => {
            let confirm = block(data)?;
            scratch.state = PairingState::AwaitingConfirm;
            send(session, ctx.tx, &SmpPdu::PairingConfirm(confirm))?;
            Ok(None)
        }
        OracleOp::ShortTermKey => {
            scratch.stk = block(data)?;
            scratch.state = PairingState::AwaitingEncryption;
            let ltk = scratch.stk;
            ctx.tx.send_command(&HciCommand::LeEnableEncryption {
                handle,
                rand: [0; 8],
                ediv: 0,
                ltk,
            })?;
            Ok(None)
        }
    }
}

fn block(data: &[u8]) -> SmpResult<[u8; 16]> {
    data.get(..16)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| SmpError::InvalidPdu("short LE Encrypt result".into()))
}

/// Handles an Encryption Change for an LE link
pub fn on_encryption_changed(
    session: &mut DeviceSession,
    ctx: &mut SmpContext<'_>,
    status: u8,
    enabled: bool,
) -> SmpResult<Option<SmpEvent>> {
    let pairing = session.pairing.as_ref().map(|p| p.state);
    if status != 0 || !enabled {
        session.flags.remove(ConnFlags::ENCRYPTED);
        return match pairing {
            Some(_) => abandon(session, ctx, SMP_REASON_UNSPECIFIED_REASON).map(Some),
            None => {
                // The peer lost its bond with us; pair from scratch
                warn!(
                    "session {}: stored key rejected (0x{:02x}), pairing again",
                    session.id, status
                );
                ctx.keys.clear_le(&session.remote);
                start_pairing(session, ctx)?;
                Ok(None)
            }
        };
    }

    session.flags.insert(ConnFlags::ENCRYPTED);
    match pairing {
        None => {
            info!("session {}: link encrypted", session.id);
            Ok(Some(SmpEvent::Encrypted))
        }
        Some(PairingState::AwaitingEncryption) => {
            let scratch = session.pairing.as_mut().ok_or(SmpError::NoPairing)?;
            scratch.state = PairingState::AwaitingKeyDistribution;
            finish_if_complete(session, ctx)
        }
        Some(state) => {
            warn!(
                "session {}: encryption change while pairing in {:?}",
                session.id, state
            );
            Ok(None)
        }
    }
}

fn on_peer_key(
    session: &mut DeviceSession,
    ctx: &mut SmpContext<'_>,
    pdu: SmpPdu,
) -> SmpResult<Option<SmpEvent>> {
    let remote = session.remote;
    let scratch = session.pairing.as_mut().ok_or(SmpError::NoPairing)?;
    match pdu {
        SmpPdu::EncryptionInformation(ltk) => {
            ctx.keys.store_le_ltk(&remote, &ltk);
        }
        SmpPdu::MasterIdentification { ediv, rand } => {
            ctx.keys.store_le_ident(&remote, &MasterIdent { ediv, rand });
            scratch.received |= KeyDistribution::ENC_KEY;
        }
        SmpPdu::IdentityInformation(irk) => {
            debug!("session {}: peer IRK {}", session.id, hex::encode(irk));
        }
        SmpPdu::IdentityAddressInformation { addr_type, addr } => {
            info!(
                "session {}: peer identity {} type {}",
                session.id, addr, addr_type
            );
            scratch.received |= KeyDistribution::ID_KEY;
        }
        SmpPdu::SigningInformation(_) => {
            scratch.received |= KeyDistribution::SIGN_KEY;
        }
        other => return Err(SmpError::UnexpectedPdu(other.code())),
    }
    finish_if_complete(session, ctx)
}

/// Once the peer has sent everything it promised, distributes our keys
/// and ends pairing.
fn finish_if_complete(
    session: &mut DeviceSession,
    ctx: &mut SmpContext<'_>,
) -> SmpResult<Option<SmpEvent>> {
    let Some(scratch) = session.pairing.as_ref() else {
        return Ok(None);
    };
    if !scratch.received.contains(scratch.peer_keys) {
        return Ok(None);
    }
    let local_keys = scratch.local_keys;

    if local_keys.contains(KeyDistribution::ENC_KEY) {
        let ltk: [u8; 16] = rand::random();
        let ediv: u16 = rand::random();
        let rand: [u8; 8] = rand::random();
        send(session, ctx.tx, &SmpPdu::EncryptionInformation(ltk))?;
        send(session, ctx.tx, &SmpPdu::MasterIdentification { ediv, rand })?;
    }
    if local_keys.contains(KeyDistribution::ID_KEY) {
        let irk: [u8; 16] = rand::random();
        send(session, ctx.tx, &SmpPdu::IdentityInformation(irk))?;
        send(
            session,
            ctx.tx,
            &SmpPdu::IdentityAddressInformation {
                addr_type: smp_addr_type(ctx.local.kind),
                addr: ctx.local.addr,
            },
        )?;
    }

    end_pairing(session, ctx.mailbox);
    info!("session {}: paired with {}", session.id, session.remote);
    Ok(Some(SmpEvent::Complete))
}
