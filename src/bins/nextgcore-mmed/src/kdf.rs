//! EPS Key Derivation
//!
//! TS 33.220 B.2.0 generic KDF and the TS 33.401 A.3 KeNB derivation.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::context::OGS_SHA256_DIGEST_SIZE;

const FC_FOR_KENB_DERIVATION: u8 = 0x11;

type HmacSha256 = Hmac<Sha256>;

/// S = FC || P0 || L0 || P1 || L1 || ...
fn kdf_common(key: &[u8], fc: u8, params: &[&[u8]]) -> [u8; OGS_SHA256_DIGEST_SIZE] {
    let total_len = 1 + params.iter().map(|p| p.len() + 2).sum::<usize>();
    let mut s = Vec::with_capacity(total_len);
    s.push(fc);
    for param in params.iter().filter(|p| !p.is_empty()) {
        s.extend_from_slice(param);
        s.extend_from_slice(&(param.len() as u16).to_be_bytes());
    }

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(&s);

    let mut output = [0u8; OGS_SHA256_DIGEST_SIZE];
    output.copy_from_slice(&mac.finalize().into_bytes());
    output
}

/// TS33.401 Annex A.3: KeNB derivation function
///
/// Derives KeNB from KASME and the uplink NAS COUNT.
pub fn mme_kdf_enb(
    kasme: &[u8; OGS_SHA256_DIGEST_SIZE],
    ul_count: u32,
) -> [u8; OGS_SHA256_DIGEST_SIZE] {
    kdf_common(kasme, FC_FOR_KENB_DERIVATION, &[&ul_count.to_be_bytes()])
}
