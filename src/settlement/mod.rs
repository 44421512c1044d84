// Settlement path: pre-flight gate, on-chain submission, flush triggers
pub mod gate;
pub mod scheduler;
pub mod settler;

pub use gate::{GateDecision, ResetReason, SettlementGate};
pub use scheduler::{FlushScheduler, FlushTrigger, ScheduleConfig};
pub use settler::{OnChainSettler, SettlementAttempt, SettlementOutcome};
