// ============================================================================
// Confidential Value Primitives - OracleBook Settlement Ledger
// ============================================================================
//
// Opaque ciphertext handles, bet commitments, and the threshold-signature
// scheme that authenticates decryption callbacks from the confidential
// compute committee.
//
// Handle Convention:
//   - A handle is a 32-byte identifier for an encrypted value held by the
//     coprocessor. The engine never inspects plaintext behind a handle.
//   - Derived handles (sums, gated selections) are computed symbolically:
//     keccak256 over an operation tag and the operand handles, so any
//     coprocessor can reproduce the same derivation independently.
//
// ============================================================================

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashSet;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Fixed-point scale for payout ratios (1.0 == 1_000_000)
pub const RATIO_SCALE: u64 = 1_000_000;

/// Byte length of a ciphertext handle
pub const HANDLE_LEN: usize = 32;

// ============================================================================
// CIPHERTEXT HANDLE
// ============================================================================

/// Opaque reference to an encrypted value held by the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CiphertextHandle(pub [u8; HANDLE_LEN]);

impl CiphertextHandle {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| format!("Invalid handle hex: {}", e))?;
        if bytes.len() != HANDLE_LEN {
            return Err(format!("Handle must be {} bytes, got {}", HANDLE_LEN, bytes.len()));
        }
        let mut arr = [0u8; HANDLE_LEN];
        arr.copy_from_slice(&bytes);
        Ok(CiphertextHandle(arr))
    }

    /// Short display form for logs
    pub fn short(&self) -> String {
        format!("{}..", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for CiphertextHandle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CiphertextHandle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CiphertextHandle::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// COMMITMENT
// ============================================================================

/// Binding fingerprint of a bet's confidential payload plus bettor identity.
/// Used to reject exact replays of an encrypted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| format!("Invalid commitment hex: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!("Commitment must be 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Commitment(arr))
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Commitment {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Commitment::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute the replay-rejection fingerprint for an encrypted bet:
/// keccak256(encrypted_outcome || encrypted_stake || bettor)
pub fn compute_commitment(
    encrypted_outcome: &CiphertextHandle,
    encrypted_stake: &CiphertextHandle,
    bettor: &str,
) -> Commitment {
    let mut hasher = Keccak256::new();
    hasher.update(encrypted_outcome.0);
    hasher.update(encrypted_stake.0);
    hasher.update(bettor.as_bytes());
    Commitment(hasher.finalize().into())
}

/// Derive a symbolic handle for a homomorphic operation result
pub fn derive_handle(tag: &str, parts: &[&[u8]]) -> CiphertextHandle {
    let mut hasher = Keccak256::new();
    hasher.update(tag.as_bytes());
    for part in parts {
        hasher.update(part);
    }
    CiphertextHandle(hasher.finalize().into())
}

// ============================================================================
// INPUT PROOF
// ============================================================================

/// Opaque proof that encrypted inputs were built for a specific caller and
/// market. Verification is delegated to the coprocessor; the engine only
/// passes it through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputProof(pub String);

impl InputProof {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// DECRYPTION PROOF (COMMITTEE THRESHOLD SIGNATURES)
// ============================================================================

/// One committee member's signature over a decryption result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeSignature {
    /// Index of the signer in the committee roster
    pub signer: usize,
    /// Hex-encoded ed25519 signature (64 bytes)
    pub signature: String,
}

/// Threshold proof attached to every decryption callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionProof {
    pub signatures: Vec<CommitteeSignature>,
}

/// Errors raised while checking a decryption proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    UnknownSigner(usize),
    MalformedSignature(String),
    InvalidSignature(usize),
    BelowThreshold { valid: usize, required: usize },
}

impl std::fmt::Display for ProofError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProofError::UnknownSigner(idx) => write!(f, "Unknown committee signer index {}", idx),
            ProofError::MalformedSignature(msg) => write!(f, "Malformed signature: {}", msg),
            ProofError::InvalidSignature(idx) => write!(f, "Invalid signature from signer {}", idx),
            ProofError::BelowThreshold { valid, required } => {
                write!(f, "Only {} valid signatures, {} required", valid, required)
            }
        }
    }
}

impl std::error::Error for ProofError {}

/// Verifies decryption callbacks against the committee roster.
///
/// The signed message is `request_id (8-byte BE) || cleartexts`, so a proof
/// binds the revealed values to the exact request that asked for them.
#[derive(Debug, Clone)]
pub struct CommitteeVerifier {
    signers: Vec<VerifyingKey>,
    threshold: usize,
}

impl CommitteeVerifier {
    pub fn new(signers: Vec<VerifyingKey>, threshold: usize) -> Self {
        Self { signers, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn committee_size(&self) -> usize {
        self.signers.len()
    }

    /// Message bound by every committee signature for a given callback
    pub fn signing_message(request_id: u64, cleartexts: &[u8]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(8 + cleartexts.len());
        msg.extend_from_slice(&request_id.to_be_bytes());
        msg.extend_from_slice(cleartexts);
        msg
    }

    /// Check that at least `threshold` distinct committee members signed
    /// exactly this (request_id, cleartexts) pair.
    pub fn verify(
        &self,
        request_id: u64,
        cleartexts: &[u8],
        proof: &DecryptionProof,
    ) -> Result<(), ProofError> {
        let message = Self::signing_message(request_id, cleartexts);
        let mut seen: HashSet<usize> = HashSet::new();
        let mut valid = 0usize;

        for entry in &proof.signatures {
            let key = self
                .signers
                .get(entry.signer)
                .ok_or(ProofError::UnknownSigner(entry.signer))?;

            let raw = hex::decode(&entry.signature)
                .map_err(|e| ProofError::MalformedSignature(e.to_string()))?;
            let raw: [u8; 64] = raw
                .try_into()
                .map_err(|_| ProofError::MalformedSignature("signature must be 64 bytes".into()))?;
            let signature = Signature::from_bytes(&raw);

            key.verify(&message, &signature)
                .map_err(|_| ProofError::InvalidSignature(entry.signer))?;

            if seen.insert(entry.signer) {
                valid += 1;
            }
        }

        if valid < self.threshold {
            return Err(ProofError::BelowThreshold {
                valid,
                required: self.threshold,
            });
        }
        Ok(())
    }
}

// ============================================================================
// CONFIDENTIAL COMPUTE INTERFACE
// ============================================================================

/// Errors surfaced by the confidential-compute collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Input proof does not bind the handles to the caller and market
    InvalidInputProof(String),
    /// A handle was never registered with the coprocessor
    UnknownHandle(String),
    /// The coprocessor refused the request
    RequestRejected(String),
    /// No coprocessor connection configured
    NotConnected,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::InvalidInputProof(msg) => write!(f, "Invalid input proof: {}", msg),
            GatewayError::UnknownHandle(h) => write!(f, "Unknown ciphertext handle: {}", h),
            GatewayError::RequestRejected(msg) => write!(f, "Decryption request rejected: {}", msg),
            GatewayError::NotConnected => write!(f, "Confidential compute gateway not connected"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// The operations the settlement engine needs from the confidential-compute
/// collaborator: input validation, homomorphic aggregation, and asynchronous
/// decryption. Cleartext results arrive later through a verified callback,
/// never from these methods.
pub trait ConfidentialCompute: Send {
    /// Validate that `proof` binds `handles` to this bettor and market.
    fn verify_input_proof(
        &self,
        handles: &[CiphertextHandle],
        proof: &InputProof,
        bettor: &str,
        market_id: u64,
    ) -> Result<(), GatewayError>;

    /// Homomorphic sum over all encrypted stakes.
    fn total_stake(&mut self, stakes: &[CiphertextHandle]) -> Result<CiphertextHandle, GatewayError>;

    /// Homomorphic sum over stakes whose encrypted outcome equals `outcome`.
    /// Each element pairs (encrypted_outcome, encrypted_stake).
    fn winning_stake(
        &mut self,
        bets: &[(CiphertextHandle, CiphertextHandle)],
        outcome: u32,
    ) -> Result<CiphertextHandle, GatewayError>;

    /// Encrypted payout for one ticket: `escrowed_value * payout_ratio /
    /// RATIO_SCALE` if the encrypted outcome matches `winning_outcome`,
    /// otherwise an encrypted zero.
    fn gated_payout(
        &mut self,
        encrypted_outcome: &CiphertextHandle,
        winning_outcome: u32,
        escrowed_value: u64,
        payout_ratio: u64,
    ) -> Result<CiphertextHandle, GatewayError>;

    /// Forward handles for threshold decryption. Returns the request id the
    /// eventual callback will be keyed by.
    fn request_decryption(&mut self, handles: &[CiphertextHandle]) -> Result<u64, GatewayError>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;

    fn handle(byte: u8) -> CiphertextHandle {
        CiphertextHandle([byte; HANDLE_LEN])
    }

    #[test]
    fn test_handle_hex_roundtrip() {
        let h = handle(0xab);
        let parsed = CiphertextHandle::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_handle_rejects_bad_length() {
        assert!(CiphertextHandle::from_hex("deadbeef").is_err());
    }

    #[test]
    fn test_commitment_is_deterministic() {
        let a = compute_commitment(&handle(1), &handle(2), "OB_ALICE");
        let b = compute_commitment(&handle(1), &handle(2), "OB_ALICE");
        assert_eq!(a, b);
    }

    #[test]
    fn test_commitment_binds_bettor() {
        let a = compute_commitment(&handle(1), &handle(2), "OB_ALICE");
        let b = compute_commitment(&handle(1), &handle(2), "OB_BOB");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_handle_depends_on_tag_and_operands() {
        let a = derive_handle("sum", &[&handle(1).0, &handle(2).0]);
        let b = derive_handle("sum", &[&handle(1).0, &handle(2).0]);
        let c = derive_handle("sum", &[&handle(2).0, &handle(1).0]);
        let d = derive_handle("winsum", &[&handle(1).0, &handle(2).0]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    fn committee(n: usize) -> (Vec<SigningKey>, Vec<VerifyingKey>) {
        let keys: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let pubs = keys.iter().map(|k| k.verifying_key()).collect();
        (keys, pubs)
    }

    fn sign_all(keys: &[SigningKey], request_id: u64, cleartexts: &[u8]) -> DecryptionProof {
        let message = CommitteeVerifier::signing_message(request_id, cleartexts);
        DecryptionProof {
            signatures: keys
                .iter()
                .enumerate()
                .map(|(i, k)| CommitteeSignature {
                    signer: i,
                    signature: hex::encode(k.sign(&message).to_bytes()),
                })
                .collect(),
        }
    }

    #[test]
    fn test_threshold_proof_accepts_quorum() {
        let (keys, pubs) = committee(3);
        let verifier = CommitteeVerifier::new(pubs, 2);
        let proof = sign_all(&keys[..2], 7, b"payload");
        assert!(verifier.verify(7, b"payload", &proof).is_ok());
    }

    #[test]
    fn test_threshold_proof_rejects_below_quorum() {
        let (keys, pubs) = committee(3);
        let verifier = CommitteeVerifier::new(pubs, 2);
        let proof = sign_all(&keys[..1], 7, b"payload");
        assert_eq!(
            verifier.verify(7, b"payload", &proof),
            Err(ProofError::BelowThreshold { valid: 1, required: 2 })
        );
    }

    #[test]
    fn test_threshold_proof_rejects_duplicate_signer() {
        let (keys, pubs) = committee(3);
        let verifier = CommitteeVerifier::new(pubs, 2);
        let mut proof = sign_all(&keys[..1], 7, b"payload");
        let dup = proof.signatures[0].clone();
        proof.signatures.push(dup);
        assert_eq!(
            verifier.verify(7, b"payload", &proof),
            Err(ProofError::BelowThreshold { valid: 1, required: 2 })
        );
    }

    #[test]
    fn test_threshold_proof_binds_request_id() {
        let (keys, pubs) = committee(3);
        let verifier = CommitteeVerifier::new(pubs, 2);
        let proof = sign_all(&keys, 7, b"payload");
        assert!(matches!(
            verifier.verify(8, b"payload", &proof),
            Err(ProofError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_threshold_proof_binds_cleartexts() {
        let (keys, pubs) = committee(3);
        let verifier = CommitteeVerifier::new(pubs, 2);
        let proof = sign_all(&keys, 7, b"payload");
        assert!(verifier.verify(7, b"tampered", &proof).is_err());
    }
}
