// ============================================================================
// Decryption Request Coordinator - OracleBook Settlement Ledger
// ============================================================================
//
// Correlates asynchronous decryption requests with the semantic operation
// that spawned them, and guarantees each verified callback is applied
// exactly once.
//
// Coordination rules:
//   - Callbacks are keyed strictly by request id; delivery order across
//     subjects is not assumed.
//   - At most one unresolved request may exist per (kind, subject) pair.
//   - Replay of a resolved request id is a hard error, never a silent no-op,
//     so duplicate delivery is always observable by the caller.
//
// ============================================================================

use crate::confidential::CiphertextHandle;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// REQUEST KINDS
// ============================================================================

/// The semantic operation a decryption request resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecryptionKind {
    /// Reveals (winning stake, total stake) for a market
    SettlementRatio,
    /// Reveals a single ticket's payout amount
    PayoutAmount,
}

impl DecryptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecryptionKind::SettlementRatio => "settlement_ratio",
            DecryptionKind::PayoutAmount => "payout_amount",
        }
    }

    /// Number of 8-byte cleartext words a callback of this kind must carry
    pub fn expected_words(&self) -> usize {
        match self {
            DecryptionKind::SettlementRatio => 2,
            DecryptionKind::PayoutAmount => 1,
        }
    }
}

impl std::fmt::Display for DecryptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PENDING REQUEST
// ============================================================================

/// One outstanding (or audited, once resolved) decryption exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptionRequest {
    /// Identifier assigned when the decrypt was requested
    pub request_id: u64,
    /// Which finalizer the callback feeds
    pub kind: DecryptionKind,
    /// Market id (SettlementRatio) or ticket id (PayoutAmount)
    pub subject_id: u64,
    /// Handles forwarded for decryption
    pub handles: Vec<CiphertextHandle>,
    /// Whether the callback has been applied
    pub resolved: bool,
    /// Unix timestamp when the request was issued
    pub created_at: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    /// Callback for a request id that was never issued
    UnknownRequest(u64),
    /// Callback for a request already applied (duplicate delivery)
    AlreadyResolved(u64),
    /// A second in-flight request for the same subject and kind
    DuplicateInFlight { kind: DecryptionKind, subject_id: u64 },
    /// The gateway handed back a request id it already used
    RequestIdReused(u64),
    /// Cleartext blob does not decode to the expected word count
    MalformedCleartexts { expected: usize, got: usize },
}

impl std::fmt::Display for DecryptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptionError::UnknownRequest(id) => write!(f, "Unknown decryption request {}", id),
            DecryptionError::AlreadyResolved(id) => {
                write!(f, "Decryption request {} already resolved", id)
            }
            DecryptionError::DuplicateInFlight { kind, subject_id } => {
                write!(f, "A {} request is already in flight for subject {}", kind, subject_id)
            }
            DecryptionError::RequestIdReused(id) => {
                write!(f, "Gateway reused request id {}", id)
            }
            DecryptionError::MalformedCleartexts { expected, got } => {
                write!(f, "Cleartext blob holds {} words, expected {}", got, expected)
            }
        }
    }
}

impl std::error::Error for DecryptionError {}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Owns the set of decryption exchanges. Resolved requests are retained as
/// an audit trail; only the in-flight index shrinks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecryptionCoordinator {
    requests: HashMap<u64, DecryptionRequest>,
    in_flight: HashSet<(DecryptionKind, u64)>,
}

impl DecryptionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly issued request.
    pub fn register(
        &mut self,
        request_id: u64,
        kind: DecryptionKind,
        subject_id: u64,
        handles: Vec<CiphertextHandle>,
    ) -> Result<(), DecryptionError> {
        if self.in_flight.contains(&(kind, subject_id)) {
            return Err(DecryptionError::DuplicateInFlight { kind, subject_id });
        }
        if self.requests.contains_key(&request_id) {
            return Err(DecryptionError::RequestIdReused(request_id));
        }
        self.requests.insert(
            request_id,
            DecryptionRequest {
                request_id,
                kind,
                subject_id,
                handles,
                resolved: false,
                created_at: chrono::Utc::now().timestamp() as u64,
            },
        );
        self.in_flight.insert((kind, subject_id));
        Ok(())
    }

    /// Whether an unresolved request exists for this subject and kind.
    pub fn is_in_flight(&self, kind: DecryptionKind, subject_id: u64) -> bool {
        self.in_flight.contains(&(kind, subject_id))
    }

    pub fn get(&self, request_id: u64) -> Option<&DecryptionRequest> {
        self.requests.get(&request_id)
    }

    /// Look up a request a callback claims to resolve. Fails hard on unknown
    /// ids and on replays of resolved requests.
    pub fn expect_unresolved(&self, request_id: u64) -> Result<&DecryptionRequest, DecryptionError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(DecryptionError::UnknownRequest(request_id))?;
        if request.resolved {
            return Err(DecryptionError::AlreadyResolved(request_id));
        }
        Ok(request)
    }

    /// Flag a request resolved and release its in-flight slot. Must only be
    /// called after `expect_unresolved` succeeded for the same id.
    pub fn mark_resolved(&mut self, request_id: u64) {
        if let Some(request) = self.requests.get_mut(&request_id) {
            request.resolved = true;
            self.in_flight.remove(&(request.kind, request.subject_id));
        }
    }

    /// Outstanding requests, oldest first
    pub fn pending(&self) -> Vec<&DecryptionRequest> {
        let mut list: Vec<&DecryptionRequest> =
            self.requests.values().filter(|r| !r.resolved).collect();
        list.sort_by_key(|r| r.request_id);
        list
    }

    /// Decode a cleartext blob into the word shape `kind` requires.
    /// Words are consecutive 8-byte big-endian integers.
    pub fn decode_cleartexts(
        kind: DecryptionKind,
        blob: &[u8],
    ) -> Result<Vec<u64>, DecryptionError> {
        let expected = kind.expected_words();
        if blob.len() != expected * 8 {
            return Err(DecryptionError::MalformedCleartexts {
                expected,
                got: blob.len() / 8,
            });
        }
        Ok(blob
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_be_bytes(word)
            })
            .collect())
    }

    /// Encode cleartext words the way callbacks carry them
    pub fn encode_cleartexts(words: &[u64]) -> Vec<u8> {
        let mut blob = Vec::with_capacity(words.len() * 8);
        for word in words {
            blob.extend_from_slice(&word.to_be_bytes());
        }
        blob
    }
}

// ============================================================================
// TESTS
// ============================================================================
