use crate::auth::Role;
use crate::confidential::{Commitment, GatewayError, ProofError};
use crate::decryption::{DecryptionError, DecryptionKind};
use crate::escrow::EscrowError;
use serde::Serialize;

/// Coarse error class, used for HTTP status mapping and so operators can
/// alert on access violations and protocol breaches separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Caller-correctable input problems, surfaced verbatim
    Validation,
    /// Missing capability or wrong ticket owner
    Authorization,
    /// Forged/duplicate callbacks and internal invariant breaches
    Protocol,
    /// Rejected reentrant or overlapping calls; retry after resolution
    Concurrency,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Concurrency => "concurrency",
        }
    }
}

/// Every failure an engine entry point can surface. All are terminal for the
/// call that raised them; nothing is retried internally.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    // --- validation ---
    MarketNotFound(u64),
    MarketAlreadyExists(u64),
    InvalidOutcomeCount(u32),
    InvalidSchedule { start_time: u64, lock_time: u64 },
    WinningOutcomeOutOfBounds { outcome: u32, outcome_count: u32 },
    NoEscrow,
    CommitmentAlreadyUsed(Commitment),
    CommitmentMismatch,
    TicketNotFound(u64),
    MarketNotSettled(u64),
    MarketAlreadySettled(u64),
    AlreadyClaimed(u64),
    InvalidInputProof(String),
    InsufficientFunds { available: u64, requested: u64 },
    AccountNotFound(String),

    // --- authorization ---
    MissingRole { account: String, role: Role },
    NotTicketOwner { ticket_id: u64, account: String },

    // --- protocol / consistency ---
    UnknownRequest(u64),
    RequestAlreadyResolved(u64),
    RequestIdReused(u64),
    ProofVerificationFailed(String),
    MalformedCleartexts { expected: usize, got: usize },
    EscrowUnderflow { market_id: u64, balance: u64, requested: u64 },
    GatewayFailure(String),
    InconsistentState(String),

    // --- concurrency ---
    ReentrantCall,
    DecryptionInFlight { kind: DecryptionKind, subject_id: u64 },
    SettlementInProgress(u64),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MarketNotFound(_)
            | EngineError::MarketAlreadyExists(_)
            | EngineError::InvalidOutcomeCount(_)
            | EngineError::InvalidSchedule { .. }
            | EngineError::WinningOutcomeOutOfBounds { .. }
            | EngineError::NoEscrow
            | EngineError::CommitmentAlreadyUsed(_)
            | EngineError::CommitmentMismatch
            | EngineError::TicketNotFound(_)
            | EngineError::MarketNotSettled(_)
            | EngineError::MarketAlreadySettled(_)
            | EngineError::AlreadyClaimed(_)
            | EngineError::InvalidInputProof(_)
            | EngineError::InsufficientFunds { .. }
            | EngineError::AccountNotFound(_) => ErrorKind::Validation,

            EngineError::MissingRole { .. } | EngineError::NotTicketOwner { .. } => {
                ErrorKind::Authorization
            }

            EngineError::UnknownRequest(_)
            | EngineError::RequestAlreadyResolved(_)
            | EngineError::RequestIdReused(_)
            | EngineError::ProofVerificationFailed(_)
            | EngineError::MalformedCleartexts { .. }
            | EngineError::EscrowUnderflow { .. }
            | EngineError::GatewayFailure(_)
            | EngineError::InconsistentState(_) => ErrorKind::Protocol,

            EngineError::ReentrantCall
            | EngineError::DecryptionInFlight { .. }
            | EngineError::SettlementInProgress(_) => ErrorKind::Concurrency,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MarketNotFound(id) => write!(f, "Market {} not found", id),
            EngineError::MarketAlreadyExists(id) => write!(f, "Market {} already exists", id),
            EngineError::InvalidOutcomeCount(count) => {
                write!(f, "Market needs at least 2 outcomes, got {}", count)
            }
            EngineError::InvalidSchedule { start_time, lock_time } => {
                write!(f, "Lock time {} must be after start time {}", lock_time, start_time)
            }
            EngineError::WinningOutcomeOutOfBounds { outcome, outcome_count } => {
                write!(f, "Outcome {} out of bounds for {} outcomes", outcome, outcome_count)
            }
            EngineError::NoEscrow => write!(f, "Bet carries no escrowed value"),
            EngineError::CommitmentAlreadyUsed(commitment) => {
                write!(f, "Commitment {} already used", commitment)
            }
            EngineError::CommitmentMismatch => {
                write!(f, "Commitment does not match the submitted payload")
            }
            EngineError::TicketNotFound(id) => write!(f, "Ticket {} not found", id),
            EngineError::MarketNotSettled(id) => write!(f, "Market {} is not settled", id),
            EngineError::MarketAlreadySettled(id) => write!(f, "Market {} is already settled", id),
            EngineError::AlreadyClaimed(id) => write!(f, "Ticket {} already claimed", id),
            EngineError::InvalidInputProof(msg) => write!(f, "Invalid input proof: {}", msg),
            EngineError::InsufficientFunds { available, requested } => {
                write!(f, "Insufficient funds: have {}, need {}", available, requested)
            }
            EngineError::AccountNotFound(addr) => write!(f, "Account not found: {}", addr),

            EngineError::MissingRole { account, role } => {
                write!(f, "Account {} lacks the {} role", account, role)
            }
            EngineError::NotTicketOwner { ticket_id, account } => {
                write!(f, "Account {} does not own ticket {}", account, ticket_id)
            }

            EngineError::UnknownRequest(id) => write!(f, "Unknown decryption request {}", id),
            EngineError::RequestAlreadyResolved(id) => {
                write!(f, "Decryption request {} already resolved", id)
            }
            EngineError::RequestIdReused(id) => write!(f, "Gateway reused request id {}", id),
            EngineError::ProofVerificationFailed(msg) => {
                write!(f, "Callback proof verification failed: {}", msg)
            }
            EngineError::MalformedCleartexts { expected, got } => {
                write!(f, "Cleartext blob holds {} words, expected {}", got, expected)
            }
            EngineError::EscrowUnderflow { market_id, balance, requested } => {
                write!(
                    f,
                    "Escrow underflow on market {}: balance {}, payout {}",
                    market_id, balance, requested
                )
            }
            EngineError::GatewayFailure(msg) => write!(f, "Gateway failure: {}", msg),
            EngineError::InconsistentState(msg) => write!(f, "Inconsistent state: {}", msg),

            EngineError::ReentrantCall => write!(f, "Reentrant call rejected"),
            EngineError::DecryptionInFlight { kind, subject_id } => {
                write!(f, "A {} request is already in flight for subject {}", kind, subject_id)
            }
            EngineError::SettlementInProgress(id) => {
                write!(f, "Settlement already in progress for market {}", id)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<EscrowError> for EngineError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::AccountNotFound(addr) => EngineError::AccountNotFound(addr),
            EscrowError::InsufficientFunds { available, requested } => {
                EngineError::InsufficientFunds { available, requested }
            }
            EscrowError::PoolUnderflow { .. } => EngineError::InconsistentState(err.to_string()),
        }
    }
}

impl From<DecryptionError> for EngineError {
    fn from(err: DecryptionError) -> Self {
        match err {
            DecryptionError::UnknownRequest(id) => EngineError::UnknownRequest(id),
            DecryptionError::AlreadyResolved(id) => EngineError::RequestAlreadyResolved(id),
            DecryptionError::DuplicateInFlight { kind, subject_id } => {
                EngineError::DecryptionInFlight { kind, subject_id }
            }
            DecryptionError::RequestIdReused(id) => EngineError::RequestIdReused(id),
            DecryptionError::MalformedCleartexts { expected, got } => {
                EngineError::MalformedCleartexts { expected, got }
            }
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidInputProof(msg) => EngineError::InvalidInputProof(msg),
            other => EngineError::GatewayFailure(other.to_string()),
        }
    }
}

impl From<ProofError> for EngineError {
    fn from(err: ProofError) -> Self {
        EngineError::ProofVerificationFailed(err.to_string())
    }
}
