use super::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle phase of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    /// Accepting bets
    Open,
    /// Settlement initiated, waiting for the ratio decryption callback
    SettlementPending,
    /// Ratio fixed; tickets may claim
    Settled,
}

impl MarketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::Open => "open",
            MarketState::SettlementPending => "settlement_pending",
            MarketState::Settled => "settled",
        }
    }
}

/// A single bettable event with a fixed set of mutually exclusive outcomes.
/// Never destroyed; after settlement it remains as an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Externally chosen unique identifier
    pub id: u64,

    /// Number of mutually exclusive outcomes (valid indices are [0, count))
    pub outcome_count: u32,

    /// Advisory scheduling timestamps; settlement is not gated on them
    pub start_time: u64,
    pub lock_time: u64,

    /// Monotonic false -> true at settlement finalization
    pub settled: bool,

    /// Meaningful only once `settled` is true; defaults to 0
    pub winning_outcome: u32,

    /// Plaintext value currently escrowed for this market
    pub escrow_balance: u64,

    /// Scaled fixed-point payout multiplier, set at settlement finalization
    pub payout_ratio: u64,

    /// True between settlement initiation and the verified callback
    pub decryption_pending: bool,

    /// Unix timestamp of creation
    pub created_at: u64,
}

impl Market {
    pub fn state(&self) -> MarketState {
        if self.settled {
            MarketState::Settled
        } else if self.decryption_pending {
            MarketState::SettlementPending
        } else {
            MarketState::Open
        }
    }
}

/// Owned keyed store of all markets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketRegistry {
    markets: HashMap<u64, Market>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a market. Validation failures leave the registry untouched.
    pub fn create(
        &mut self,
        id: u64,
        outcome_count: u32,
        start_time: u64,
        lock_time: u64,
    ) -> Result<(), EngineError> {
        if self.markets.contains_key(&id) {
            return Err(EngineError::MarketAlreadyExists(id));
        }
        if outcome_count < 2 {
            return Err(EngineError::InvalidOutcomeCount(outcome_count));
        }
        if lock_time <= start_time {
            return Err(EngineError::InvalidSchedule { start_time, lock_time });
        }

        self.markets.insert(
            id,
            Market {
                id,
                outcome_count,
                start_time,
                lock_time,
                settled: false,
                winning_outcome: 0,
                escrow_balance: 0,
                payout_ratio: 0,
                decryption_pending: false,
                created_at: chrono::Utc::now().timestamp() as u64,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<&Market, EngineError> {
        self.markets.get(&id).ok_or(EngineError::MarketNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Result<&mut Market, EngineError> {
        self.markets.get_mut(&id).ok_or(EngineError::MarketNotFound(id))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.markets.contains_key(&id)
    }

    /// All known market ids, ascending (callers must not rely on any other order)
    pub fn list_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.markets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn all(&self) -> Vec<&Market> {
        let mut list: Vec<&Market> = self.markets.values().collect();
        list.sort_unstable_by_key(|m| m.id);
        list
    }

    /// Grow a market's escrow on bet admission
    pub(crate) fn credit_escrow(&mut self, id: u64, amount: u64) -> Result<(), EngineError> {
        let market = self.get_mut(id)?;
        market.escrow_balance = market.escrow_balance.saturating_add(amount);
        Ok(())
    }

    /// Shrink a market's escrow on payout finalization. Underflow is a
    /// consistency breach, not an expected path.
    pub(crate) fn debit_escrow(&mut self, id: u64, amount: u64) -> Result<(), EngineError> {
        let market = self.get_mut(id)?;
        if market.escrow_balance < amount {
            return Err(EngineError::EscrowUnderflow {
                market_id: id,
                balance: market.escrow_balance,
                requested: amount,
            });
        }
        market.escrow_balance -= amount;
        Ok(())
    }

    /// Sum of escrow across all markets (audit support)
    pub fn total_escrow(&self) -> u64 {
        self.markets.values().map(|m| m.escrow_balance).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_roundtrip() {
        let mut registry = MarketRegistry::new();
        registry.create(101, 3, 60, 3600).unwrap();

        let market = registry.get(101).unwrap();
        assert_eq!(market.outcome_count, 3);
        assert_eq!(market.start_time, 60);
        assert_eq!(market.lock_time, 3600);
        assert_eq!(market.winning_outcome, 0);
        assert_eq!(market.escrow_balance, 0);
        assert!(!market.settled);
        assert_eq!(market.state(), MarketState::Open);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = MarketRegistry::new();
        registry.create(101, 3, 60, 3600).unwrap();
        assert_eq!(
            registry.create(101, 2, 60, 3600),
            Err(EngineError::MarketAlreadyExists(101))
        );
    }

    #[test]
    fn test_outcome_count_bounds() {
        let mut registry = MarketRegistry::new();
        assert_eq!(registry.create(1, 0, 60, 3600), Err(EngineError::InvalidOutcomeCount(0)));
        assert_eq!(registry.create(1, 1, 60, 3600), Err(EngineError::InvalidOutcomeCount(1)));
        assert!(registry.create(1, 2, 60, 3600).is_ok());
    }

    #[test]
    fn test_schedule_validation() {
        let mut registry = MarketRegistry::new();
        assert_eq!(
            registry.create(1, 2, 3600, 60),
            Err(EngineError::InvalidSchedule { start_time: 3600, lock_time: 60 })
        );
        assert_eq!(
            registry.create(1, 2, 60, 60),
            Err(EngineError::InvalidSchedule { start_time: 60, lock_time: 60 })
        );
    }

    #[test]
    fn test_unknown_market() {
        let registry = MarketRegistry::new();
        assert_eq!(registry.get(999).unwrap_err(), EngineError::MarketNotFound(999));
    }

    #[test]
    fn test_escrow_accounting() {
        let mut registry = MarketRegistry::new();
        registry.create(1, 2, 60, 3600).unwrap();
        registry.credit_escrow(1, 30).unwrap();
        registry.credit_escrow(1, 12).unwrap();
        assert_eq!(registry.get(1).unwrap().escrow_balance, 42);

        registry.debit_escrow(1, 40).unwrap();
        assert_eq!(registry.get(1).unwrap().escrow_balance, 2);

        assert_eq!(
            registry.debit_escrow(1, 3),
            Err(EngineError::EscrowUnderflow { market_id: 1, balance: 2, requested: 3 })
        );
    }

    #[test]
    fn test_list_ids_sorted() {
        let mut registry = MarketRegistry::new();
        registry.create(5, 2, 1, 2).unwrap();
        registry.create(1, 2, 1, 2).unwrap();
        registry.create(3, 2, 1, 2).unwrap();
        assert_eq!(registry.list_ids(), vec![1, 3, 5]);
    }
}
