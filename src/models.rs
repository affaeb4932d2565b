// Request/response models for the OracleBook HTTP API

use crate::auth::Role;
use crate::confidential::{CiphertextHandle, Commitment, DecryptionProof};
use serde::{Deserialize, Serialize};

// ===== ACCOUNTS =====

#[derive(Debug, Deserialize)]
pub struct ConnectAccountRequest {
    /// Existing wallet address; omitted for a brand new account
    #[serde(default)]
    pub address: Option<String>,
    /// Seed for address derivation when no address is supplied
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectAccountResponse {
    pub success: bool,
    pub address: String,
    pub balance: u64,
    pub is_new_account: bool,
}

// ===== MARKETS =====

#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub caller: String,
    pub market_id: u64,
    pub outcome_count: u32,
    pub start_time: u64,
    pub lock_time: u64,
}

// ===== BETS =====

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub bettor: String,
    pub market_id: u64,
    pub encrypted_outcome: CiphertextHandle,
    pub encrypted_stake: CiphertextHandle,
    pub input_proof: String,
    pub commitment: Commitment,
    pub escrow_value: u64,
}

#[derive(Debug, Serialize)]
pub struct PlaceBetResponse {
    pub success: bool,
    pub ticket_id: Option<u64>,
    pub market_id: Option<u64>,
    pub escrowed_value: Option<u64>,
    pub new_balance: Option<u64>,
    pub error: Option<String>,
}

impl PlaceBetResponse {
    pub fn failure(msg: &str) -> Self {
        Self {
            success: false,
            ticket_id: None,
            market_id: None,
            escrowed_value: None,
            new_balance: None,
            error: Some(msg.to_string()),
        }
    }
}

// ===== SETTLEMENT & CLAIMS =====

#[derive(Debug, Deserialize)]
pub struct SettleMarketRequest {
    pub caller: String,
    pub winning_outcome: u32,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub caller: String,
    pub input_proof: String,
}

/// Response shape shared by the two initiation endpoints. `auto_resolved`
/// reports whether mock mode applied the callback inline.
#[derive(Debug, Serialize)]
pub struct InitiationResponse {
    pub success: bool,
    pub request_id: Option<u64>,
    pub auto_resolved: bool,
    pub error: Option<String>,
}

impl InitiationResponse {
    pub fn failure(msg: &str) -> Self {
        Self { success: false, request_id: None, auto_resolved: false, error: Some(msg.to_string()) }
    }
}

// ===== DECRYPTION CALLBACK =====

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub request_id: u64,
    /// Hex-encoded cleartext blob (8-byte big-endian words)
    pub cleartexts: String,
    pub proof: DecryptionProof,
}

// ===== ROLES =====

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub caller: String,
    pub account: String,
    pub role: Role,
}

// ===== MOCK-MODE INPUT ENCRYPTION =====

#[derive(Debug, Deserialize)]
pub struct EncryptBetRequest {
    pub bettor: String,
    pub market_id: u64,
    pub outcome: u32,
    pub stake: u64,
}

#[derive(Debug, Serialize)]
pub struct EncryptBetResponse {
    pub success: bool,
    pub encrypted_outcome: Option<CiphertextHandle>,
    pub encrypted_stake: Option<CiphertextHandle>,
    pub input_proof: Option<String>,
    pub commitment: Option<Commitment>,
    pub error: Option<String>,
}

impl EncryptBetResponse {
    pub fn failure(msg: &str) -> Self {
        Self {
            success: false,
            encrypted_outcome: None,
            encrypted_stake: None,
            input_proof: None,
            commitment: None,
            error: Some(msg.to_string()),
        }
    }
}
