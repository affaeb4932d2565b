// ============================================================================
// Confidential Compute Gateway - OracleBook Settlement Ledger
// ============================================================================
//
// Two collaborator implementations live here:
//
//   - LocalGateway: in-process coprocessor simulator. Tracks the plaintext
//     behind every handle, evaluates homomorphic combinations, and produces
//     committee-signed callbacks. Backs mock mode and the test suite.
//   - GatewayRpcClient: HTTP client for a remote coprocessor. Supports mock
//     mode for local development without a live gateway connection.
//
// Handle derivation is symbolic (keccak over operation tag + operands), so a
// remote coprocessor reproduces exactly the handles the engine computed.
//
// ============================================================================

use crate::confidential::{
    derive_handle, CiphertextHandle, CommitteeSignature, CommitteeVerifier, ConfidentialCompute,
    DecryptionProof, GatewayError, InputProof, RATIO_SCALE,
};
use crate::decryption::DecryptionCoordinator;
use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default timeout for gateway RPC calls
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default committee size for the local simulator
pub const DEFAULT_COMMITTEE_SIZE: usize = 3;

/// Default signature threshold for the local simulator
pub const DEFAULT_THRESHOLD: usize = 2;

// ============================================================================
// ENCRYPTED INPUT
// ============================================================================

/// A freshly encrypted (outcome, stake) pair plus the proof binding it to a
/// bettor and market
#[derive(Debug, Clone)]
pub struct EncryptedInput {
    pub outcome_handle: CiphertextHandle,
    pub stake_handle: CiphertextHandle,
    pub proof: InputProof,
}

/// A decryption result ready for delivery to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionCallback {
    pub request_id: u64,
    pub cleartexts: Vec<u8>,
    pub proof: DecryptionProof,
}

fn input_proof_digest(handles: &[CiphertextHandle], bettor: &str, market_id: u64) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(b"input-proof");
    for handle in handles {
        hasher.update(handle.0);
    }
    hasher.update(bettor.as_bytes());
    hasher.update(market_id.to_be_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// LOCAL GATEWAY (COPROCESSOR SIMULATOR)
// ============================================================================

/// In-process confidential-compute service. Generates its own committee at
/// construction; the matching verifier is handed to the engine.
pub struct LocalGateway {
    committee: Vec<SigningKey>,
    threshold: usize,
    plaintexts: HashMap<CiphertextHandle, u64>,
    requests: HashMap<u64, Vec<CiphertextHandle>>,
    next_request_id: u64,
}

impl LocalGateway {
    pub fn new(committee_size: usize, threshold: usize) -> Self {
        let committee = (0..committee_size)
            .map(|_| SigningKey::generate(&mut OsRng))
            .collect();
        Self {
            committee,
            threshold,
            plaintexts: HashMap::new(),
            requests: HashMap::new(),
            next_request_id: 1,
        }
    }

    /// Verifier matching this gateway's committee roster
    pub fn verifier(&self) -> CommitteeVerifier {
        let keys = self.committee.iter().map(|k| k.verifying_key()).collect();
        CommitteeVerifier::new(keys, self.threshold)
    }

    /// Encrypt an (outcome, stake) pair for a bettor and market. This is the
    /// off-path input construction a wallet frontend would perform.
    pub fn create_encrypted_input(
        &mut self,
        bettor: &str,
        market_id: u64,
        outcome: u32,
        stake: u64,
    ) -> EncryptedInput {
        let outcome_handle = CiphertextHandle(rand::random::<[u8; 32]>());
        let stake_handle = CiphertextHandle(rand::random::<[u8; 32]>());
        self.plaintexts.insert(outcome_handle, outcome as u64);
        self.plaintexts.insert(stake_handle, stake);

        let proof = self.input_proof_for(&[outcome_handle, stake_handle], bettor, market_id);
        EncryptedInput { outcome_handle, stake_handle, proof }
    }

    /// Recompute the input proof for existing handles (claims re-present the
    /// proof for the handles stored on the ticket)
    pub fn input_proof_for(
        &self,
        handles: &[CiphertextHandle],
        bettor: &str,
        market_id: u64,
    ) -> InputProof {
        InputProof(input_proof_digest(handles, bettor, market_id))
    }

    fn plaintext(&self, handle: &CiphertextHandle) -> Result<u64, GatewayError> {
        self.plaintexts
            .get(handle)
            .copied()
            .ok_or_else(|| GatewayError::UnknownHandle(handle.short()))
    }

    /// Sign a cleartext blob for a request id with the full committee
    pub fn sign_cleartexts(&self, request_id: u64, cleartexts: &[u8]) -> DecryptionProof {
        let message = CommitteeVerifier::signing_message(request_id, cleartexts);
        DecryptionProof {
            signatures: self
                .committee
                .iter()
                .enumerate()
                .map(|(i, key)| CommitteeSignature {
                    signer: i,
                    signature: hex::encode(key.sign(&message).to_bytes()),
                })
                .collect(),
        }
    }

    /// Produce the committee-signed callback for an issued request
    pub fn build_callback(&self, request_id: u64) -> Result<DecryptionCallback, GatewayError> {
        let handles = self
            .requests
            .get(&request_id)
            .ok_or_else(|| GatewayError::RequestRejected(format!("unknown request {}", request_id)))?;

        let mut values = Vec::with_capacity(handles.len());
        for handle in handles {
            values.push(self.plaintext(handle)?);
        }
        let cleartexts = DecryptionCoordinator::encode_cleartexts(&values);
        let proof = self.sign_cleartexts(request_id, &cleartexts);
        Ok(DecryptionCallback { request_id, cleartexts, proof })
    }
}

impl ConfidentialCompute for LocalGateway {
    fn verify_input_proof(
        &self,
        handles: &[CiphertextHandle],
        proof: &InputProof,
        bettor: &str,
        market_id: u64,
    ) -> Result<(), GatewayError> {
        let expected = input_proof_digest(handles, bettor, market_id);
        if proof.as_str() != expected {
            return Err(GatewayError::InvalidInputProof(
                "proof does not bind these handles to the caller and market".to_string(),
            ));
        }
        Ok(())
    }

    fn total_stake(&mut self, stakes: &[CiphertextHandle]) -> Result<CiphertextHandle, GatewayError> {
        let mut total: u64 = 0;
        for handle in stakes {
            total = total.saturating_add(self.plaintext(handle)?);
        }
        let operands: Vec<&[u8]> = stakes.iter().map(|h| h.0.as_slice()).collect();
        let result = derive_handle("sum-stakes", &operands);
        self.plaintexts.insert(result, total);
        Ok(result)
    }

    fn winning_stake(
        &mut self,
        bets: &[(CiphertextHandle, CiphertextHandle)],
        outcome: u32,
    ) -> Result<CiphertextHandle, GatewayError> {
        let mut total: u64 = 0;
        for (outcome_handle, stake_handle) in bets {
            let bet_outcome = self.plaintext(outcome_handle)?;
            let stake = self.plaintext(stake_handle)?;
            if bet_outcome == outcome as u64 {
                total = total.saturating_add(stake);
            }
        }
        let outcome_bytes = outcome.to_be_bytes();
        let mut operands: Vec<&[u8]> = vec![&outcome_bytes];
        for (outcome_handle, stake_handle) in bets {
            operands.push(&outcome_handle.0);
            operands.push(&stake_handle.0);
        }
        let result = derive_handle("sum-winning-stakes", &operands);
        self.plaintexts.insert(result, total);
        Ok(result)
    }

    fn gated_payout(
        &mut self,
        encrypted_outcome: &CiphertextHandle,
        winning_outcome: u32,
        escrowed_value: u64,
        payout_ratio: u64,
    ) -> Result<CiphertextHandle, GatewayError> {
        let bet_outcome = self.plaintext(encrypted_outcome)?;
        let payout = if bet_outcome == winning_outcome as u64 {
            ((escrowed_value as u128 * payout_ratio as u128) / RATIO_SCALE as u128)
                .min(u64::MAX as u128) as u64
        } else {
            0
        };

        let result = derive_handle(
            "gated-payout",
            &[
                &encrypted_outcome.0,
                &winning_outcome.to_be_bytes(),
                &escrowed_value.to_be_bytes(),
                &payout_ratio.to_be_bytes(),
            ],
        );
        self.plaintexts.insert(result, payout);
        Ok(result)
    }

    fn request_decryption(&mut self, handles: &[CiphertextHandle]) -> Result<u64, GatewayError> {
        for handle in handles {
            self.plaintext(handle)?;
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.requests.insert(request_id, handles.to_vec());
        Ok(request_id)
    }
}

/// Shared handle so the service and tests can drive the simulator while the
/// engine keeps an injected collaborator view
pub type SharedGateway = Arc<Mutex<LocalGateway>>;

impl ConfidentialCompute for SharedGateway {
    fn verify_input_proof(
        &self,
        handles: &[CiphertextHandle],
        proof: &InputProof,
        bettor: &str,
        market_id: u64,
    ) -> Result<(), GatewayError> {
        self.lock().unwrap().verify_input_proof(handles, proof, bettor, market_id)
    }

    fn total_stake(&mut self, stakes: &[CiphertextHandle]) -> Result<CiphertextHandle, GatewayError> {
        self.lock().unwrap().total_stake(stakes)
    }

    fn winning_stake(
        &mut self,
        bets: &[(CiphertextHandle, CiphertextHandle)],
        outcome: u32,
    ) -> Result<CiphertextHandle, GatewayError> {
        self.lock().unwrap().winning_stake(bets, outcome)
    }

    fn gated_payout(
        &mut self,
        encrypted_outcome: &CiphertextHandle,
        winning_outcome: u32,
        escrowed_value: u64,
        payout_ratio: u64,
    ) -> Result<CiphertextHandle, GatewayError> {
        self.lock().unwrap().gated_payout(
            encrypted_outcome,
            winning_outcome,
            escrowed_value,
            payout_ratio,
        )
    }

    fn request_decryption(&mut self, handles: &[CiphertextHandle]) -> Result<u64, GatewayError> {
        self.lock().unwrap().request_decryption(handles)
    }
}

// ============================================================================
// GATEWAY RPC CLIENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayRpcError {
    /// Gateway is not connected (mock mode or connection failed)
    NotConnected,
    /// HTTP request failed
    RequestFailed(String),
    /// Invalid response from the gateway
    InvalidResponse(String),
}

impl std::fmt::Display for GatewayRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayRpcError::NotConnected => write!(f, "Gateway RPC not connected"),
            GatewayRpcError::RequestFailed(msg) => write!(f, "Gateway request failed: {}", msg),
            GatewayRpcError::InvalidResponse(msg) => write!(f, "Invalid gateway response: {}", msg),
        }
    }
}

impl std::error::Error for GatewayRpcError {}

/// Payload forwarded to a remote coprocessor for threshold decryption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionDispatch {
    pub request_id: u64,
    pub handles: Vec<CiphertextHandle>,
}

/// Client for a remote confidential-compute coprocessor
#[derive(Clone)]
pub struct GatewayRpcClient {
    /// Gateway endpoint URL; None means mock mode
    endpoint_url: Option<String>,

    /// HTTP client
    client: Client,
}

impl GatewayRpcClient {
    pub fn new(endpoint_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        GatewayRpcClient { endpoint_url, client }
    }

    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::new(std::env::var("GATEWAY_URL").ok())
    }

    pub fn is_mock(&self) -> bool {
        self.endpoint_url.is_none()
    }

    pub fn log_status(&self) {
        match &self.endpoint_url {
            Some(url) => tracing::info!(gateway = %url, "remote coprocessor configured"),
            None => tracing::info!("gateway in mock mode, decryptions resolve in-process"),
        }
    }

    /// Check the remote coprocessor is reachable
    pub async fn health_check(&self) -> Result<bool, GatewayRpcError> {
        let url = self.endpoint_url.as_ref().ok_or(GatewayRpcError::NotConnected)?;
        let response = self
            .client
            .get(format!("{}/health", url))
            .send()
            .await
            .map_err(|e| GatewayRpcError::RequestFailed(e.to_string()))?;
        Ok(response.status().is_success())
    }

    /// Forward an issued decryption request; the coprocessor answers later
    /// through the callback endpoint.
    pub async fn dispatch_decryption(
        &self,
        request_id: u64,
        handles: Vec<CiphertextHandle>,
    ) -> Result<(), GatewayRpcError> {
        let url = self.endpoint_url.as_ref().ok_or(GatewayRpcError::NotConnected)?;
        let body = DecryptionDispatch { request_id, handles };
        let response = self
            .client
            .post(format!("{}/decrypt", url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayRpcError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayRpcError::InvalidResponse(format!(
                "gateway answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
