//! Initiator protocol.
//!
//! `Building → LocallyValidated → AwaitingCounterSignatures → AwaitingFinality
//! → Committed | Rejected | Failed`, as an explicit state machine plus the
//! async driver that performs each state's I/O.

mod flow;
pub mod state_machine;

pub use flow::InitiatorFlow;
pub use state_machine::{
    InitiatorEvent, InitiatorMachine, InitiatorPhase, InitiatorState, TransitionError,
};
