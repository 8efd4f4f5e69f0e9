//! Per-call dialogue state: validated slots, corrections and save gating.

pub mod correction;
pub mod orchestrator;
pub mod record;
pub mod slots;

pub use correction::PhraseMatcher;
pub use orchestrator::{Correction, Orchestrator, SaveDecision, ValidationStart};
pub use record::{Address, ClientRecord};
pub use slots::{SessionState, Slot, SlotName, SlotStatus};
