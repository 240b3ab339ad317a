//! CrossBridge relayer
//!
//! Watches `TokensBridged` deposits on the origin chain and releases wrapped
//! tokens on the destination chain, attesting new tokens on first sight.
//! `TokensBridgedBack` burns on the destination release the originals.

pub mod api;
pub mod attestation;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod hash;
pub mod initiator;
pub mod ledger;
pub mod metrics;
pub mod relay;
pub mod retry;
pub mod tokens;
pub mod types;

pub use attestation::{attestation_id, AttestationId, AttestationService};
pub use chain::{BridgeCall, BridgeChain};
pub use config::Config;
pub use error::RelayError;
pub use relay::{RelayEngine, RelayOutcome, RelayService};
