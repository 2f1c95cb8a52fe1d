//! Plaintext blocks of the legacy pairing functions
//!
//! The AES-128 passes of c1 and s1 run on the controller through LE Encrypt;
//! this module only builds the blocks fed to it. Every block is in the
//! little-endian order LE Encrypt takes, so the least significant octet of
//! each value comes first.
//!
//! ```text
//! c1(k, r) = e(k, e(k, r ^ p1) ^ p2)
//! s1(k, r_peer, r_local) = e(k, r')
//! ```

use crate::gap::BdAddr;

/// `p1 = pres || preq || rat || iat`, most significant first
pub fn c1_p1(preq: &[u8; 7], pres: &[u8; 7], iat: u8, rat: u8) -> [u8; 16] {
    let mut p1 = [0u8; 16];
    p1[0] = iat;
    p1[1] = rat;
    p1[2..9].copy_from_slice(preq);
    p1[9..16].copy_from_slice(pres);
    p1
}

/// `p2 = padding || ia || ra`, most significant first
pub fn c1_p2(ia: &BdAddr, ra: &BdAddr) -> [u8; 16] {
    let mut p2 = [0u8; 16];
    p2[0..6].copy_from_slice(&ra.bytes);
    p2[6..12].copy_from_slice(&ia.bytes);
    p2
}

pub fn xor128(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// `r' = r_peer[0..8] || r_local[0..8]`, most significant first.
///
/// The initiator's random supplies the low half; we always initiate.
pub fn s1_r_prime(r_local: &[u8; 16], r_peer: &[u8; 16]) -> [u8; 16] {
    let mut r = [0u8; 16];
    r[0..8].copy_from_slice(&r_local[0..8]);
    r[8..16].copy_from_slice(&r_peer[0..8]);
    r
}
