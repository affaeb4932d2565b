// Append-only protocol event log.
//
// Every state transition the engine commits is recorded here in the exact
// field order external indexers consume. Records are never rewritten.

use crate::confidential::Commitment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A state transition visible to external indexers. Field order matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    MarketCreated {
        market_id: u64,
        outcome_count: u32,
        start_time: u64,
        lock_time: u64,
    },
    BetPlaced {
        market_id: u64,
        ticket_id: u64,
        bettor: String,
        commitment: Commitment,
        escrowed_value: u64,
    },
    MarketSettled {
        market_id: u64,
        winning_outcome: u32,
        payout_ratio: u64,
    },
    PayoutClaimed {
        ticket_id: u64,
        bettor: String,
        payout: u64,
    },
}

impl ProtocolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::MarketCreated { .. } => "MarketCreated",
            ProtocolEvent::BetPlaced { .. } => "BetPlaced",
            ProtocolEvent::MarketSettled { .. } => "MarketSettled",
            ProtocolEvent::PayoutClaimed { .. } => "PayoutClaimed",
        }
    }

    /// One-line description for the activity feed
    pub fn describe(&self) -> String {
        match self {
            ProtocolEvent::MarketCreated { market_id, outcome_count, .. } => {
                format!("Market {} created with {} outcomes", market_id, outcome_count)
            }
            ProtocolEvent::BetPlaced { market_id, ticket_id, bettor, escrowed_value, .. } => {
                format!(
                    "Ticket {} on market {}: {} escrowed {}",
                    ticket_id, market_id, bettor, escrowed_value
                )
            }
            ProtocolEvent::MarketSettled { market_id, winning_outcome, payout_ratio } => {
                format!(
                    "Market {} settled: outcome {} wins, ratio {}",
                    market_id, winning_outcome, payout_ratio
                )
            }
            ProtocolEvent::PayoutClaimed { ticket_id, bettor, payout } => {
                format!("Ticket {} claimed: {} paid {}", ticket_id, bettor, payout)
            }
        }
    }
}

/// A logged event with its record id and timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: ProtocolEvent,
}

/// Append-only log of protocol events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: ProtocolEvent) {
        tracing::info!(event = event.name(), "{}", event.describe());
        self.records.push(EventRecord {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: chrono::Utc::now().timestamp() as u64,
            event,
        });
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events touching a given market, in emission order
    pub fn for_market(&self, market_id: u64) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| match &r.event {
                ProtocolEvent::MarketCreated { market_id: id, .. } => *id == market_id,
                ProtocolEvent::BetPlaced { market_id: id, .. } => *id == market_id,
                ProtocolEvent::MarketSettled { market_id: id, .. } => *id == market_id,
                ProtocolEvent::PayoutClaimed { .. } => false,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_in_order() {
        let mut log = EventLog::new();
        log.record(ProtocolEvent::MarketCreated {
            market_id: 101,
            outcome_count: 3,
            start_time: 60,
            lock_time: 3600,
        });
        log.record(ProtocolEvent::MarketSettled {
            market_id: 101,
            winning_outcome: 1,
            payout_ratio: 1_000_000,
        });

        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].event.name(), "MarketCreated");
        assert_eq!(log.records()[1].event.name(), "MarketSettled");
    }

    #[test]
    fn test_market_filter() {
        let mut log = EventLog::new();
        log.record(ProtocolEvent::MarketCreated {
            market_id: 1,
            outcome_count: 2,
            start_time: 1,
            lock_time: 2,
        });
        log.record(ProtocolEvent::MarketCreated {
            market_id: 2,
            outcome_count: 2,
            start_time: 1,
            lock_time: 2,
        });
        assert_eq!(log.for_market(1).len(), 1);
    }
}
