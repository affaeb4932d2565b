// Escrow ledger accessor - the engine's window onto account value.
//
// The real ledger lives outside this crate; the engine only needs atomic
// move-into-escrow and release-from-escrow primitives. The in-memory
// implementation below backs the local service and the test suite.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Errors raised by escrow transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    AccountNotFound(String),
    InsufficientFunds { available: u64, requested: u64 },
    PoolUnderflow { pooled: u64, requested: u64 },
}

impl std::fmt::Display for EscrowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscrowError::AccountNotFound(addr) => write!(f, "Account not found: {}", addr),
            EscrowError::InsufficientFunds { available, requested } => {
                write!(f, "Insufficient funds: have {}, need {}", available, requested)
            }
            EscrowError::PoolUnderflow { pooled, requested } => {
                write!(f, "Escrow pool underflow: holds {}, asked to release {}", pooled, requested)
            }
        }
    }
}

impl std::error::Error for EscrowError {}

/// Atomic value movement between bettor wallets and the pooled escrow.
///
/// `escrow_in` must debit the wallet and credit the pool in one step, and
/// `escrow_out` the reverse; a failure leaves both sides untouched.
pub trait EscrowLedger: Send {
    /// Register an account with a starting balance (idempotent overwrite).
    fn register(&mut self, address: &str, initial: u64);

    /// Spendable wallet balance; unknown accounts read as zero.
    fn balance(&self, address: &str) -> u64;

    /// Move `amount` from the wallet into the pooled escrow.
    fn escrow_in(&mut self, from: &str, amount: u64) -> Result<(), EscrowError>;

    /// Release `amount` from the pooled escrow to the wallet.
    fn escrow_out(&mut self, to: &str, amount: u64) -> Result<(), EscrowError>;

    /// Total value the protocol currently holds on behalf of all markets.
    fn pooled(&self) -> u64;
}

/// In-memory escrow ledger for local mode and tests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryEscrow {
    balances: HashMap<String, u64>,
    pooled: u64,
}

impl InMemoryEscrow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_account(&self, address: &str) -> bool {
        self.balances.contains_key(address)
    }

    pub fn accounts(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.balances.keys().cloned().collect();
        addrs.sort();
        addrs
    }
}

impl EscrowLedger for InMemoryEscrow {
    fn register(&mut self, address: &str, initial: u64) {
        self.balances.insert(address.to_string(), initial);
    }

    fn balance(&self, address: &str) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    fn escrow_in(&mut self, from: &str, amount: u64) -> Result<(), EscrowError> {
        let balance = self
            .balances
            .get_mut(from)
            .ok_or_else(|| EscrowError::AccountNotFound(from.to_string()))?;
        if *balance < amount {
            return Err(EscrowError::InsufficientFunds {
                available: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        self.pooled += amount;
        Ok(())
    }

    fn escrow_out(&mut self, to: &str, amount: u64) -> Result<(), EscrowError> {
        if self.pooled < amount {
            return Err(EscrowError::PoolUnderflow {
                pooled: self.pooled,
                requested: amount,
            });
        }
        self.pooled -= amount;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        Ok(())
    }

    fn pooled(&self) -> u64 {
        self.pooled
    }
}

/// Shared handle so the service can read balances while the engine keeps an
/// injected ledger view.
pub type SharedEscrow = Arc<Mutex<InMemoryEscrow>>;

impl EscrowLedger for SharedEscrow {
    fn register(&mut self, address: &str, initial: u64) {
        self.lock().unwrap().register(address, initial)
    }

    fn balance(&self, address: &str) -> u64 {
        self.lock().unwrap().balance(address)
    }

    fn escrow_in(&mut self, from: &str, amount: u64) -> Result<(), EscrowError> {
        self.lock().unwrap().escrow_in(from, amount)
    }

    fn escrow_out(&mut self, to: &str, amount: u64) -> Result<(), EscrowError> {
        self.lock().unwrap().escrow_out(to, amount)
    }

    fn pooled(&self) -> u64 {
        self.lock().unwrap().pooled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_in_moves_value_to_pool() {
        let mut ledger = InMemoryEscrow::new();
        ledger.register("OB_ALICE", 100);
        ledger.escrow_in("OB_ALICE", 40).unwrap();
        assert_eq!(ledger.balance("OB_ALICE"), 60);
        assert_eq!(ledger.pooled(), 40);
    }

    #[test]
    fn test_escrow_in_rejects_overdraft() {
        let mut ledger = InMemoryEscrow::new();
        ledger.register("OB_ALICE", 10);
        let err = ledger.escrow_in("OB_ALICE", 40).unwrap_err();
        assert_eq!(err, EscrowError::InsufficientFunds { available: 10, requested: 40 });
        assert_eq!(ledger.balance("OB_ALICE"), 10);
        assert_eq!(ledger.pooled(), 0);
    }

    #[test]
    fn test_escrow_in_unknown_account() {
        let mut ledger = InMemoryEscrow::new();
        assert_eq!(
            ledger.escrow_in("OB_GHOST", 1).unwrap_err(),
            EscrowError::AccountNotFound("OB_GHOST".to_string())
        );
    }

    #[test]
    fn test_escrow_out_roundtrip() {
        let mut ledger = InMemoryEscrow::new();
        ledger.register("OB_ALICE", 100);
        ledger.escrow_in("OB_ALICE", 40).unwrap();
        ledger.escrow_out("OB_ALICE", 40).unwrap();
        assert_eq!(ledger.balance("OB_ALICE"), 100);
        assert_eq!(ledger.pooled(), 0);
    }

    #[test]
    fn test_escrow_out_pool_underflow() {
        let mut ledger = InMemoryEscrow::new();
        ledger.register("OB_ALICE", 100);
        ledger.escrow_in("OB_ALICE", 10).unwrap();
        let err = ledger.escrow_out("OB_ALICE", 11).unwrap_err();
        assert_eq!(err, EscrowError::PoolUnderflow { pooled: 10, requested: 11 });
    }
}
