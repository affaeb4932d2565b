/// OracleBook Confidential Market - escrow and settlement core
/// Exports the protocol modules for use as a library crate

pub mod auth;
pub mod confidential;
pub mod decryption;
pub mod escrow;
pub mod events;
pub mod gateway;
pub mod settlement;

// Re-export the settlement core
pub use settlement::{
    EngineError, EngineSnapshot, ErrorKind, Market, MarketRegistry, MarketState, ReentrancyGuard,
    SettlementEngine, Ticket, TicketRegistry, TicketState,
};

// Re-export confidential primitives
pub use confidential::{
    compute_commitment, derive_handle, CiphertextHandle, Commitment, CommitteeSignature,
    CommitteeVerifier, ConfidentialCompute, DecryptionProof, GatewayError, InputProof, ProofError,
    RATIO_SCALE,
};

// Re-export the decryption coordination layer
pub use decryption::{DecryptionCoordinator, DecryptionError, DecryptionKind, DecryptionRequest};

// Re-export collaborators
pub use auth::{generate_wallet_address, AuthError, Role, RoleAuthority, RoleRegistry, SharedRoles};
pub use escrow::{EscrowError, EscrowLedger, InMemoryEscrow, SharedEscrow};
pub use events::{EventLog, EventRecord, ProtocolEvent};
pub use gateway::{
    DecryptionCallback, EncryptedInput, GatewayRpcClient, GatewayRpcError, LocalGateway,
    SharedGateway,
};
