use super::crypto::*;
use super::*;
use crate::gap::{AddressType, BdAddr, RemoteAddress};
use crate::hci::constants::{OP_LE_ENABLE_ENCRYPTION, OP_LE_ENCRYPT, OP_LE_RAND};
use crate::host::{ConnFlags, DeviceSession, OracleMailbox, OracleOp, Sequencer, SessionId};
use crate::keystore::{KeyStore, MasterIdent};
use crate::storage::MemoryStorage;
use crate::testutil::{commands, connected_session, payloads_on, peer_addr, sent, sequencer, RecordingTransport};
use std::sync::Arc;

const SMP: u16 = 0x0006;

/// Value written most significant octet first, in wire order
fn le<const N: usize>(msb: &str) -> [u8; N] {
    let mut out = [0u8; N];
    hex::decode_to_slice(msb, &mut out).unwrap();
    out.reverse();
    out
}

fn local() -> RemoteAddress {
    RemoteAddress::le(BdAddr::new(le("A1A2A3A4A5A6")), AddressType::Public)
}

struct Fixture {
    transport: Arc<RecordingTransport>,
    tx: Sequencer,
    mailbox: OracleMailbox,
    keys: KeyStore,
    session: DeviceSession,
}

impl Fixture {
    fn new() -> Self {
        let (transport, tx) = sequencer();
        let mut session = connected_session(0, 0x0040);
        session.flags.insert(ConnFlags::IS_BLE);
        session.remote = RemoteAddress::le(peer_addr(), AddressType::Public);
        Self {
            transport,
            tx,
            mailbox: OracleMailbox::new(),
            keys: KeyStore::load(Arc::new(MemoryStorage::new())),
            session,
        }
    }

    fn ctx(&mut self) -> (&mut DeviceSession, SmpContext<'_>) {
        (
            &mut self.session,
            SmpContext {
                tx: &self.tx,
                mailbox: &self.mailbox,
                keys: &mut self.keys,
                local: local(),
            },
        )
    }

    fn recv(&mut self, pdu: &[u8]) -> SmpResult<Option<SmpEvent>> {
        let (session, mut ctx) = self.ctx();
        handle_pdu(session, &mut ctx, pdu)
    }

    fn oracle(&mut self, op: OracleOp, data: &[u8]) -> Option<SmpEvent> {
        assert_eq!(self.mailbox.pop(), Some((Some(SessionId(0)), op)));
        let (session, mut ctx) = self.ctx();
        on_oracle_result(session, &mut ctx, op, data).unwrap()
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        sent(&self.transport, &self.tx)
    }
}

#[test]
fn test_pairing_request_bytes() {
    let request = SmpPdu::PairingRequest(PairingFeatures::default()).serialize();
    assert_eq!(request, vec![0x01, 0x03, 0x00, 0x01, 0x10, 0x03, 0x03]);
}

#[test]
fn test_pdu_parsing() {
    let pdu = SmpPdu::parse(&[0x02, 0x03, 0x00, 0x01, 0x10, 0x01, 0x03]).unwrap();
    match pdu {
        SmpPdu::PairingResponse(features) => {
            assert_eq!(features.auth_req, AuthReq::BONDING);
            assert_eq!(features.initiator_keys, KeyDistribution::ENC_KEY);
            assert_eq!(
                features.responder_keys,
                KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY
            );
        }
        other => panic!("unexpected {:?}", other),
    }

    let pdu = SmpPdu::parse(&[0x07, 0x34, 0x12, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    assert_eq!(
        pdu,
        SmpPdu::MasterIdentification {
            ediv: 0x1234,
            rand: [1, 2, 3, 4, 5, 6, 7, 8]
        }
    );

    assert!(matches!(
        SmpPdu::parse(&[0x03, 0x00]),
        Err(SmpError::InvalidPdu(_))
    ));
    assert!(matches!(
        SmpPdu::parse(&[0x0C]),
        Err(SmpError::UnknownCommand(0x0C))
    ));
}

#[test]
fn test_c1_blocks_match_reference() {
    let preq: [u8; 7] = le("07071000000101");
    let pres: [u8; 7] = le("05000800000302");
    assert_eq!(
        c1_p1(&preq, &pres, 0x01, 0x00),
        le::<16>("05000800000302070710000001010001")
    );

    let ia = BdAddr::new(le("A1A2A3A4A5A6"));
    let ra = BdAddr::new(le("B1B2B3B4B5B6"));
    assert_eq!(
        c1_p2(&ia, &ra),
        le::<16>("00000000A1A2A3A4A5A6B1B2B3B4B5B6")
    );
}

#[test]
fn test_s1_r_prime_matches_reference() {
    let r1: [u8; 16] = le("000F0E0D0C0B0A091122334455667788");
    let r2: [u8; 16] = le("010203040506070899AABBCCDDEEFF00");
    // We initiate, so our random is r2
    assert_eq!(
        s1_r_prime(&r2, &r1),
        le::<16>("112233445566778899AABBCCDDEEFF00")
    );
}

#[test]
fn test_xor128() {
    let a = [0xF0u8; 16];
    let mut b = [0x0Fu8; 16];
    b[15] = 0xF0;
    let x = xor128(&a, &b);
    assert_eq!(&x[..15], &[0xFF; 15]);
    assert_eq!(x[15], 0x00);
}

#[test]
fn test_just_works_pairing_flow() {
    let mut f = Fixture::new();
    let preq = [0x01, 0x03, 0x00, 0x01, 0x10, 0x03, 0x03];
    let pres = [0x02, 0x03, 0x00, 0x01, 0x10, 0x03, 0x03];

    {
        let (session, mut ctx) = f.ctx();
        start_pairing(session, &mut ctx).unwrap();
    }
    assert_eq!(payloads_on(&f.sent(), SMP), vec![preq.to_vec()]);

    // Response: two randoms requested, in order
    assert_eq!(f.recv(&pres).unwrap(), None);
    let cmds = commands(&f.sent());
    assert_eq!(cmds, vec![(OP_LE_RAND, vec![]), (OP_LE_RAND, vec![])]);
    assert_eq!(f.mailbox.len(), 2);

    let local_random: [u8; 16] = std::array::from_fn(|i| i as u8 + 1);
    assert_eq!(f.oracle(OracleOp::RandLow, &local_random[..8]), None);
    assert_eq!(f.oracle(OracleOp::RandHigh, &local_random[8..]), None);

    // First AES pass: r ^ p1 under the zero key
    let cmds = commands(&f.sent());
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0].0, OP_LE_ENCRYPT);
    assert_eq!(&cmds[0].1[..16], &[0u8; 16]);
    let p1 = c1_p1(&preq, &pres, 0, 0);
    assert_eq!(&cmds[0].1[16..], &xor128(&local_random, &p1));

    let stage1 = [0x55u8; 16];
    assert_eq!(f.oracle(OracleOp::ConfirmStage1, &stage1), None);
    let cmds = commands(&f.sent());
    let p2 = c1_p2(&local().addr, &peer_addr());
    assert_eq!(&cmds[0].1[16..], &xor128(&stage1, &p2));

    let confirm = [0xC3u8; 16];
    assert_eq!(f.oracle(OracleOp::ConfirmStage2, &confirm), None);
    let mut expected = vec![0x03];
    expected.extend_from_slice(&confirm);
    assert_eq!(payloads_on(&f.sent(), SMP), vec![expected]);

    // Peer confirm is answered with our random
    let mut peer_confirm = vec![0x03];
    peer_confirm.extend_from_slice(&[0xEE; 16]);
    assert_eq!(f.recv(&peer_confirm).unwrap(), None);
    let mut expected = vec![0x04];
    expected.extend_from_slice(&local_random);
    assert_eq!(payloads_on(&f.sent(), SMP), vec![expected]);

    // Peer random: STK derivation
    let peer_random: [u8; 16] = std::array::from_fn(|i| 0x80 + i as u8);
    let mut pdu = vec![0x04];
    pdu.extend_from_slice(&peer_random);
    assert_eq!(f.recv(&pdu).unwrap(), None);
    let cmds = commands(&f.sent());
    assert_eq!(cmds[0].0, OP_LE_ENCRYPT);
    assert_eq!(&cmds[0].1[16..], &s1_r_prime(&local_random, &peer_random));

    let stk = [0x5Au8; 16];
    assert_eq!(f.oracle(OracleOp::ShortTermKey, &stk), None);
    let cmds = commands(&f.sent());
    let mut expected = vec![0x40, 0x00];
    expected.extend_from_slice(&[0; 8]);
    expected.extend_from_slice(&[0, 0]);
    expected.extend_from_slice(&stk);
    assert_eq!(cmds, vec![(OP_LE_ENABLE_ENCRYPTION, expected)]);

    {
        let (session, mut ctx) = f.ctx();
        assert_eq!(on_encryption_changed(session, &mut ctx, 0, true).unwrap(), None);
    }
    assert!(f.session.flags.contains(ConnFlags::ENCRYPTED));
    assert_eq!(
        f.session.pairing.as_ref().map(|p| p.state),
        Some(PairingState::AwaitingKeyDistribution)
    );

    // Peer distributes encryption and identity keys
    let ltk = [0x11u8; 16];
    let mut pdu = vec![0x06];
    pdu.extend_from_slice(&ltk);
    assert_eq!(f.recv(&pdu).unwrap(), None);
    assert_eq!(
        f.recv(&[0x07, 0x34, 0x12, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap(),
        None
    );
    let mut pdu = vec![0x08];
    pdu.extend_from_slice(&[0x22; 16]);
    assert_eq!(f.recv(&pdu).unwrap(), None);
    let mut pdu = vec![0x09, 0x00];
    pdu.extend_from_slice(&peer_addr().bytes);
    assert_eq!(f.recv(&pdu).unwrap(), Some(SmpEvent::Complete));

    // Our keys follow, then the scratch is gone
    let ours = payloads_on(&f.sent(), SMP);
    let codes: Vec<u8> = ours.iter().map(|p| p[0]).collect();
    assert_eq!(codes, vec![0x06, 0x07, 0x08, 0x09]);
    assert_eq!(&ours[3][1..], &[&[0x00][..], &local().addr.bytes[..]].concat()[..]);
    assert!(f.session.pairing.is_none());

    let stored = f.keys.load_le(&f.session.remote);
    assert_eq!(
        stored,
        Some((
            ltk,
            MasterIdent {
                ediv: 0x1234,
                rand: [1, 2, 3, 4, 5, 6, 7, 8]
            }
        ))
    );
}

#[test]
fn test_stored_key_skips_pairing() {
    let mut f = Fixture::new();
    let remote = f.session.remote;
    f.keys.store_le_ltk(&remote, &[0x77; 16]);
    f.keys.store_le_ident(
        &remote,
        &MasterIdent {
            ediv: 0xBEEF,
            rand: [9; 8],
        },
    );

    {
        let (session, mut ctx) = f.ctx();
        start_security(session, &mut ctx).unwrap();
    }
    let frames = f.sent();
    assert!(payloads_on(&frames, SMP).is_empty());
    let cmds = commands(&frames);
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0].0, OP_LE_ENABLE_ENCRYPTION);
    assert_eq!(&cmds[0].1[2..10], &[9; 8]);
    assert_eq!(&cmds[0].1[10..12], &[0xEF, 0xBE]);

    let (session, mut ctx) = f.ctx();
    assert_eq!(
        on_encryption_changed(session, &mut ctx, 0, true).unwrap(),
        Some(SmpEvent::Encrypted)
    );
}

#[test]
fn test_rejected_stored_key_is_forgotten() {
    let mut f = Fixture::new();
    let remote = f.session.remote;
    f.keys.store_le_ltk(&remote, &[0x77; 16]);
    {
        let (session, mut ctx) = f.ctx();
        start_security(session, &mut ctx).unwrap();
        // PIN or key missing
        assert_eq!(on_encryption_changed(session, &mut ctx, 0x06, false).unwrap(), None);
    }
    assert!(f.keys.load_le(&remote).is_none());
    assert!(f.session.pairing.is_some());
    let smp = payloads_on(&f.sent(), SMP);
    assert_eq!(smp.last().map(|p| p[0]), Some(0x01));
}

#[test]
fn test_peer_failure_clears_scratch() {
    let mut f = Fixture::new();
    {
        let (session, mut ctx) = f.ctx();
        start_pairing(session, &mut ctx).unwrap();
    }
    assert_eq!(f.recv(&[0x05, 0x03]).unwrap(), Some(SmpEvent::Failed(0x03)));
    assert!(f.session.pairing.is_none());
}

#[test]
fn test_late_oracle_result_is_dropped() {
    let mut f = Fixture::new();
    {
        let (session, mut ctx) = f.ctx();
        start_pairing(session, &mut ctx).unwrap();
    }
    f.recv(&[0x02, 0x03, 0x00, 0x01, 0x10, 0x03, 0x03]).unwrap();
    f.sent();
    f.session.pairing = None;

    assert_eq!(f.oracle(OracleOp::RandLow, &[0; 8]), None);
    assert!(f.sent().is_empty());
}

#[test]
fn test_small_key_size_aborts() {
    let mut f = Fixture::new();
    {
        let (session, mut ctx) = f.ctx();
        start_pairing(session, &mut ctx).unwrap();
    }
    f.sent();
    assert_eq!(
        f.recv(&[0x02, 0x03, 0x00, 0x01, 0x06, 0x03, 0x03]).unwrap(),
        Some(SmpEvent::Failed(0x06))
    );
    assert_eq!(payloads_on(&f.sent(), SMP), vec![vec![0x05, 0x06]]);
    assert!(f.mailbox.is_empty());
}

#[test]
fn test_unknown_command_is_refused() {
    let mut f = Fixture::new();
    assert_eq!(f.recv(&[0x0D, 0x00]).unwrap(), None);
    assert_eq!(payloads_on(&f.sent(), SMP), vec![vec![0x05, 0x07]]);
}

fn paired_to_random_stage() -> Fixture {
    let mut f = Fixture::new();
    {
        let (session, mut ctx) = f.ctx();
        start_pairing(session, &mut ctx).unwrap();
    }
    f.recv(&[0x02, 0x03, 0x00, 0x01, 0x10, 0x03, 0x03]).unwrap();
    f.sent();
    f
}

#[test]
fn test_oracle_result_out_of_state_is_dropped() {
    let mut f = paired_to_random_stage();
    {
        let (session, mut ctx) = f.ctx();
        let stk = on_oracle_result(session, &mut ctx, OracleOp::ShortTermKey, &[0; 16]);
        assert_eq!(stk.unwrap(), None);
        let stage1 = on_oracle_result(session, &mut ctx, OracleOp::ConfirmStage1, &[0; 16]);
        assert_eq!(stage1.unwrap(), None);
    }
    assert!(commands(&f.sent()).is_empty());
    assert_eq!(
        f.session.pairing.as_ref().map(|p| p.state),
        Some(PairingState::GeneratingRandom)
    );
}

#[test]
fn test_peer_failure_disowns_pending_randoms() {
    let mut f = paired_to_random_stage();
    assert_eq!(f.recv(&[0x05, 0x08]).unwrap(), Some(SmpEvent::Failed(0x08)));
    assert!(f.session.pairing.is_none());
    assert_eq!(f.mailbox.pop(), Some((None, OracleOp::RandLow)));
    assert_eq!(f.mailbox.pop(), Some((None, OracleOp::RandHigh)));
}
