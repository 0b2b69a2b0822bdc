//! Proof-of-work challenge issuance and verification.
//!
//! Challenges are stateless on the server: the salt, difficulty and
//! timestamp are signed with an HMAC so any tampering is detectable without
//! a lookup. Only the replay ledger (which nonces have already been spent)
//! is server-side state.

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::utils::get_timestamp;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_FRESHNESS_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct PowChallenge {
    pub salt: String,
    pub difficulty: u32,
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PowRejection {
    InvalidSignature,
    Expired,
    Replayed,
    DifficultyNotMet,
}

impl fmt::Display for PowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PowRejection::InvalidSignature => "Invalid PoW signature",
            PowRejection::Expired => "PoW challenge expired",
            PowRejection::Replayed => "PoW nonce already used",
            PowRejection::DifficultyNotMet => "PoW nonce does not satisfy difficulty target",
        };
        write!(f, "{msg}")
    }
}

fn signing_payload(salt: &str, difficulty: u32, timestamp: u64) -> String {
    format!("{salt}.{difficulty}.{timestamp}")
}

fn sign(secret: &[u8], salt: &str, difficulty: u32, timestamp: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(signing_payload(salt, difficulty, timestamp).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Issues a new challenge signed with `secret`.
pub fn issue(secret: &[u8], difficulty: u32) -> PowChallenge {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let timestamp = get_timestamp();
    let signature = sign(secret, &salt, difficulty, timestamp);

    PowChallenge {
        salt,
        difficulty,
        timestamp,
        signature,
    }
}

/// Computes `SHA256(salt || "." || nonce)` and counts leading zero bits,
/// MSB-first. This is the canonical routine both the server verifier and
/// any client-side solver must match byte-for-byte.
pub fn pow_hash_leading_zero_bits(salt: &str, nonce: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b".");
    hasher.update(nonce.as_bytes());
    let digest = hasher.finalize();

    let mut zero_bits = 0u32;
    for byte in digest.iter() {
        if *byte == 0 {
            zero_bits += 8;
            continue;
        }
        zero_bits += byte.leading_zeros();
        break;
    }
    zero_bits
}

/// Tracks spent `(salt, nonce)` pairs until their challenge would have
/// expired anyway.
pub struct NonceLedger {
    spent: DashMap<String, u64>,
}

impl NonceLedger {
    pub fn new() -> Self {
        NonceLedger {
            spent: DashMap::new(),
        }
    }

    fn purge_expired(&self, now: u64) {
        self.spent.retain(|_, expiry| *expiry > now);
    }

    fn is_spent(&self, key: &str) -> bool {
        self.spent.contains_key(key)
    }

    fn burn(&self, key: String, expiry: u64) {
        self.spent.insert(key, expiry);
    }
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::new()
    }
}

pub struct VerifyPowRequest<'a> {
    pub salt: &'a str,
    pub difficulty: u32,
    pub timestamp: u64,
    pub signature: &'a str,
    pub nonce: &'a str,
}

/// Full verification pipeline: signature, freshness, replay, then hash.
/// Burns the nonce only on success.
pub fn verify(
    req: &VerifyPowRequest,
    secret: &[u8],
    ledger: &NonceLedger,
    freshness: Duration,
) -> Result<(), PowRejection> {
    let expected = sign(secret, req.salt, req.difficulty, req.timestamp);
    let signature_ok: bool = expected
        .as_bytes()
        .ct_eq(req.signature.as_bytes())
        .into();
    if !signature_ok {
        return Err(PowRejection::InvalidSignature);
    }

    let now = get_timestamp();
    let age = now as i64 - req.timestamp as i64;
    if age < 0 || age as u64 > freshness.as_secs() {
        return Err(PowRejection::Expired);
    }

    ledger.purge_expired(now);
    let key = format!("{}:{}", req.salt, req.nonce);
    if ledger.is_spent(&key) {
        return Err(PowRejection::Replayed);
    }

    let zero_bits = pow_hash_leading_zero_bits(req.salt, req.nonce);
    if zero_bits < req.difficulty {
        return Err(PowRejection::DifficultyNotMet);
    }

    ledger.burn(key, now + freshness.as_secs());
    Ok(())
}

/// Brute-force solver used by the test suite and benches in place of the
/// browser/WASM solver, which is out of scope for this crate.
#[cfg(any(test, feature = "test-utils"))]
pub fn solve(salt: &str, difficulty: u32) -> u64 {
    let mut nonce: u64 = 0;
    loop {
        let nonce_hex = format!("{nonce:x}");
        if pow_hash_leading_zero_bits(salt, &nonce_hex) >= difficulty {
            return nonce;
        }
        nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key";

    #[test]
    fn issue_then_verify_with_solved_nonce_succeeds() {
        let challenge = issue(SECRET, 8);
        let nonce = solve(&challenge.salt, challenge.difficulty);
        let ledger = NonceLedger::new();
        let req = VerifyPowRequest {
            salt: &challenge.salt,
            difficulty: challenge.difficulty,
            timestamp: challenge.timestamp,
            signature: &challenge.signature,
            nonce: &format!("{nonce:x}"),
        };
        assert!(verify(&req, SECRET, &ledger, Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn tampered_difficulty_rejects_signature() {
        let challenge = issue(SECRET, 8);
        let nonce = solve(&challenge.salt, challenge.difficulty);
        let ledger = NonceLedger::new();
        let req = VerifyPowRequest {
            salt: &challenge.salt,
            difficulty: challenge.difficulty + 1,
            timestamp: challenge.timestamp,
            signature: &challenge.signature,
            nonce: &format!("{nonce:x}"),
        };
        assert_eq!(
            verify(&req, SECRET, &ledger, Duration::from_secs(300)),
            Err(PowRejection::InvalidSignature)
        );
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let challenge = issue(SECRET, 8);
        let nonce_hex = format!("{:x}", solve(&challenge.salt, challenge.difficulty));
        let ledger = NonceLedger::new();
        let req = VerifyPowRequest {
            salt: &challenge.salt,
            difficulty: challenge.difficulty,
            timestamp: challenge.timestamp,
            signature: &challenge.signature,
            nonce: &nonce_hex,
        };
        assert!(verify(&req, SECRET, &ledger, Duration::from_secs(300)).is_ok());
        assert_eq!(
            verify(&req, SECRET, &ledger, Duration::from_secs(300)),
            Err(PowRejection::Replayed)
        );
    }

    #[test]
    fn stale_challenge_is_rejected() {
        let challenge = PowChallenge {
            timestamp: get_timestamp().saturating_sub(400),
            ..issue(SECRET, 8)
        };
        // Re-sign with the backdated timestamp since `issue` already signed
        // the original timestamp.
        let signature = sign(SECRET, &challenge.salt, challenge.difficulty, challenge.timestamp);
        let nonce_hex = format!("{:x}", solve(&challenge.salt, challenge.difficulty));
        let ledger = NonceLedger::new();
        let req = VerifyPowRequest {
            salt: &challenge.salt,
            difficulty: challenge.difficulty,
            timestamp: challenge.timestamp,
            signature: &signature,
            nonce: &nonce_hex,
        };
        assert_eq!(
            verify(&req, SECRET, &ledger, Duration::from_secs(300)),
            Err(PowRejection::Expired)
        );
    }

    #[test]
    fn insufficient_difficulty_is_rejected() {
        let challenge = issue(SECRET, 20);
        let ledger = NonceLedger::new();
        let req = VerifyPowRequest {
            salt: &challenge.salt,
            difficulty: challenge.difficulty,
            timestamp: challenge.timestamp,
            signature: &challenge.signature,
            nonce: "0",
        };
        assert_eq!(
            verify(&req, SECRET, &ledger, Duration::from_secs(300)),
            Err(PowRejection::DifficultyNotMet)
        );
    }

    #[test]
    fn leading_zero_bits_counts_msb_first() {
        // all-zero digest => 256 zero bits regardless of input, sanity check
        // the counting logic on a synthetic case via the public hash path.
        let bits_low_difficulty = pow_hash_leading_zero_bits("abc", "0");
        assert!(bits_low_difficulty <= 256);
    }
}
