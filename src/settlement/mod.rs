// ============================================================================
// Settlement Module - Confidential Escrow & Settlement Core
// ============================================================================
//
// This module contains the core protocol state machine:
//   - markets: market registry and per-market escrow accounting
//   - tickets: accepted bets with commitment-based replay rejection
//   - reentrancy: per-call guard for every state-mutating entry point
//   - engine: orchestration of bet admission, settlement and payout claims
//   - errors: the engine error taxonomy
//
// ============================================================================

pub mod engine;
pub mod errors;
pub mod markets;
pub mod reentrancy;
pub mod tickets;

pub use engine::*;
pub use errors::*;
pub use markets::*;
pub use reentrancy::*;
pub use tickets::*;
