use super::errors::EngineError;
use crate::confidential::{CiphertextHandle, Commitment};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One accepted bet. The outcome/stake pair stays encrypted for the ticket's
/// whole life; only the coordinator's verified callbacks ever reveal anything
/// derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Monotonically assigned, unique
    pub ticket_id: u64,

    /// Owning market
    pub market_id: u64,

    /// Account that placed the bet
    pub bettor: String,

    /// Confidential handles, never decrypted except through the coordinator
    pub encrypted_outcome: CiphertextHandle,
    pub encrypted_stake: CiphertextHandle,

    /// Replay-rejection fingerprint of (encrypted_outcome, encrypted_stake, bettor)
    pub commitment: Commitment,

    /// Plaintext value actually transferred into escrow at bet time
    pub escrowed_value: u64,

    /// Set once the payout for this ticket has been finalized
    pub claimed: bool,

    /// Finalized payout amount (zero payouts are recorded too)
    pub payout: Option<u64>,

    /// Unix timestamp of admission
    pub placed_at: u64,
}

/// Owned keyed store of all tickets plus the commitment de-duplication index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRegistry {
    tickets: HashMap<u64, Ticket>,
    used_commitments: HashSet<Commitment>,
    next_ticket_id: u64,
}

impl Default for TicketRegistry {
    fn default() -> Self {
        Self {
            tickets: HashMap::new(),
            used_commitments: HashSet::new(),
            next_ticket_id: 1,
        }
    }
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commitment_used(&self, commitment: &Commitment) -> bool {
        self.used_commitments.contains(commitment)
    }

    /// Store an admitted bet. The caller has already validated the market,
    /// the escrow amount and the input proof; this enforces only the replay
    /// index and id allocation.
    pub fn admit(
        &mut self,
        market_id: u64,
        bettor: &str,
        encrypted_outcome: CiphertextHandle,
        encrypted_stake: CiphertextHandle,
        commitment: Commitment,
        escrowed_value: u64,
    ) -> Result<u64, EngineError> {
        if self.used_commitments.contains(&commitment) {
            return Err(EngineError::CommitmentAlreadyUsed(commitment));
        }

        let ticket_id = self.next_ticket_id;
        self.next_ticket_id += 1;

        self.tickets.insert(
            ticket_id,
            Ticket {
                ticket_id,
                market_id,
                bettor: bettor.to_string(),
                encrypted_outcome,
                encrypted_stake,
                commitment,
                escrowed_value,
                claimed: false,
                payout: None,
                placed_at: chrono::Utc::now().timestamp() as u64,
            },
        );
        self.used_commitments.insert(commitment);
        Ok(ticket_id)
    }

    pub fn get(&self, ticket_id: u64) -> Result<&Ticket, EngineError> {
        self.tickets.get(&ticket_id).ok_or(EngineError::TicketNotFound(ticket_id))
    }

    pub(crate) fn get_mut(&mut self, ticket_id: u64) -> Result<&mut Ticket, EngineError> {
        self.tickets.get_mut(&ticket_id).ok_or(EngineError::TicketNotFound(ticket_id))
    }

    /// Tickets for a market, in admission order
    pub fn for_market(&self, market_id: u64) -> Vec<&Ticket> {
        let mut list: Vec<&Ticket> = self
            .tickets
            .values()
            .filter(|t| t.market_id == market_id)
            .collect();
        list.sort_unstable_by_key(|t| t.ticket_id);
        list
    }

    /// A bettor's tickets across all markets, in admission order
    pub fn for_bettor(&self, bettor: &str) -> Vec<&Ticket> {
        let mut list: Vec<&Ticket> = self
            .tickets
            .values()
            .filter(|t| t.bettor == bettor)
            .collect();
        list.sort_unstable_by_key(|t| t.ticket_id);
        list
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Escrow conservation inputs for one market:
    /// (sum of escrowed values, sum of finalized payouts)
    pub fn escrow_totals(&self, market_id: u64) -> (u64, u64) {
        self.tickets
            .values()
            .filter(|t| t.market_id == market_id)
            .fold((0u64, 0u64), |(escrowed, paid), t| {
                (escrowed + t.escrowed_value, paid + t.payout.unwrap_or(0))
            })
    }
}
