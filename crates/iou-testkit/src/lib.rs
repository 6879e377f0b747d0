//! iou-testkit
//!
//! In-memory collaborators for end-to-end runs: per-party ledger views, a
//! notary, and a mock network that wires nodes together over channel
//! sessions. Used by the scenario tests under `tests/`.

mod ledger;
mod network;
mod notary;

pub use ledger::InMemoryLedger;
pub use network::{MockNetwork, MockNode};
pub use notary::InMemoryNotary;

/// Install a test-friendly subscriber once. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}
