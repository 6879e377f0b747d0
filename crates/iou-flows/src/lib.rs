//! iou-flows
//!
//! The two-party commitment protocol for IOU transitions.
//!
//! - `ProposalBuilder` turns an `Intent` into a proposal, refusing
//!   unauthorized initiators before any network round-trip
//! - `InitiatorMachine` is the explicit initiator state machine;
//!   `InitiatorFlow` drives it against the collaborators
//! - `AcceptorFlow` re-validates every request from its own ledger view
//!
//! Storage, transport, finality and signing are consumed through the traits
//! in `collaborators`. Business rejections (`Rejection`) and operational
//! failures (`FlowFailure`) never mix.

mod acceptor;
mod builder;
mod collaborators;
mod failure;
pub mod initiator;
mod session;
mod signing;

pub use acceptor::AcceptorFlow;
pub use builder::{Intent, ProposalBuilder};
pub use collaborators::{
    AcceptorReply, CollaboratorError, ConflictInfo, CounterpartyTransport, FinalityOutcome,
    FinalityService, LedgerView, SignatureRequest, SigningService,
};
pub use failure::{FlowFailure, FlowOutcome};
pub use initiator::{
    InitiatorEvent, InitiatorFlow, InitiatorMachine, InitiatorPhase, InitiatorState,
    TransitionError,
};
pub use session::{spawn_acceptor_endpoint, SessionRequest, SessionRouter};
pub use signing::Ed25519Signer;
