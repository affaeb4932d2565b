// Application state management

use crate::auth::{RoleRegistry, SharedRoles};
use crate::escrow::{InMemoryEscrow, SharedEscrow};
use crate::gateway::{GatewayRpcClient, LocalGateway, SharedGateway};
use crate::settlement::{EngineError, EngineSnapshot, SettlementEngine};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub type SharedState = Arc<Mutex<AppState>>;

/// Balance granted to brand new accounts in mock mode
pub const STARTER_BALANCE: u64 = 1_000;

/// Where the protocol snapshot is persisted between runs
const STATE_FILE: &str = "data/state.json";

#[derive(Serialize, Deserialize)]
struct PersistedState {
    engine: EngineSnapshot,
    roles: RoleRegistry,
    escrow: InMemoryEscrow,
}

pub struct AppState {
    pub engine: SettlementEngine,
    pub gateway: SharedGateway,
    pub roles: SharedRoles,
    pub escrow: SharedEscrow,
    pub rpc: GatewayRpcClient,
    pub admin: String,
    /// Mock mode resolves decryption requests inline instead of waiting for
    /// a remote coprocessor to call back
    pub auto_decrypt: bool,
    pub activity: Vec<String>,
}

impl AppState {
    pub fn new() -> Self {
        dotenv::dotenv().ok();

        let committee_size = env_usize("GATEWAY_COMMITTEE_SIZE", crate::gateway::DEFAULT_COMMITTEE_SIZE);
        let threshold = env_usize("GATEWAY_THRESHOLD", crate::gateway::DEFAULT_THRESHOLD);
        let admin = std::env::var("ORACLEBOOK_ADMIN").unwrap_or_else(|_| "OB_ADMIN".to_string());

        let gateway: SharedGateway =
            Arc::new(Mutex::new(LocalGateway::new(committee_size, threshold)));
        let verifier = gateway.lock().unwrap().verifier();

        let escrow: SharedEscrow = Arc::new(Mutex::new(InMemoryEscrow::new()));
        let roles: SharedRoles = Arc::new(Mutex::new(RoleRegistry::new(&admin)));

        let engine = SettlementEngine::new(
            Box::new(gateway.clone()),
            verifier,
            Box::new(escrow.clone()),
            Box::new(roles.clone()),
        );

        let rpc = GatewayRpcClient::from_env();
        rpc.log_status();

        let auto_decrypt = std::env::var("AUTO_DECRYPT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or_else(|_| rpc.is_mock());

        let mut state = Self {
            engine,
            gateway,
            roles,
            escrow,
            rpc,
            admin,
            auto_decrypt,
            activity: Vec::new(),
        };

        if state.load_from_disk().is_ok() {
            tracing::info!("loaded persisted state from {}", STATE_FILE);
        } else {
            tracing::info!("no persisted state found, starting fresh");
            let seed = std::env::var("SEED_DEMO_MARKETS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
            if seed {
                state.seed_demo_markets();
            }
        }

        state
    }

    pub fn log_activity(&mut self, action: &str, details: &str) {
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        let entry = format!("[{}] {} | {}", timestamp, action, details);
        tracing::info!("{}", entry);
        self.activity.push(entry);
        if self.activity.len() > 1000 {
            self.activity.remove(0);
        }
    }

    /// Mock-mode shortcut: build the committee callback for a request the
    /// engine just issued and apply it immediately.
    pub fn resolve_inline(&mut self, request_id: u64) -> Result<(), EngineError> {
        let callback = self
            .gateway
            .lock()
            .unwrap()
            .build_callback(request_id)
            .map_err(EngineError::from)?;
        self.engine
            .apply_decryption_callback(callback.request_id, &callback.cleartexts, &callback.proof)
    }

    pub fn save_to_disk(&self) -> Result<(), String> {
        let state = PersistedState {
            engine: self.engine.snapshot(),
            roles: self.roles.lock().unwrap().clone(),
            escrow: self.escrow.lock().unwrap().clone(),
        };

        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| format!("Failed to serialize state: {}", e))?;

        std::fs::create_dir_all("data")
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
        std::fs::write(STATE_FILE, json)
            .map_err(|e| format!("Failed to write state file: {}", e))?;
        Ok(())
    }

    fn load_from_disk(&mut self) -> Result<(), String> {
        let json = std::fs::read_to_string(STATE_FILE).map_err(|_| "No state file found")?;
        let state: PersistedState =
            serde_json::from_str(&json).map_err(|e| format!("Failed to deserialize state: {}", e))?;

        self.engine.restore(state.engine);
        *self.roles.lock().unwrap() = state.roles;
        *self.escrow.lock().unwrap() = state.escrow;
        Ok(())
    }

    /// Create a couple of demo markets so a fresh local deployment has
    /// something to browse and bet on.
    fn seed_demo_markets(&mut self) {
        let now = chrono::Utc::now().timestamp() as u64;
        let admin = self.admin.clone();
        let seeds = [(101u64, 3u32), (102, 2)];

        for (market_id, outcome_count) in seeds {
            match self
                .engine
                .create_market(&admin, market_id, outcome_count, now + 60, now + 3600)
            {
                Ok(()) => self.log_activity(
                    "SEED",
                    &format!("demo market {} ({} outcomes)", market_id, outcome_count),
                ),
                Err(err) => tracing::warn!(market_id, %err, "failed to seed demo market"),
            }
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
