//! WolfGate - VPN Gateway Peer Provisioning
//!
//! Provisions and revokes VPN client access by keeping two stores in step:
//! a SQLite registry of client identities and keys, and the gateway's
//! WireGuard config file with one `[Peer]` block per client.
//!
//! # Architecture
//!
//! The [`SyncEngine`](sync::SyncEngine) serialises every create and delete.
//! A create generates a curve25519 key pair, records the client in the
//! registry and appends a peer block; a delete removes the peer block first
//! and the registry record last, so a block in the file can always be traced
//! back to its owner.
//!
//! # Features
//!
//! - Structural parsing of the gateway config (blocks are removed as units,
//!   never by line arithmetic)
//! - First-run gateway identity creation, recovered from the file afterwards
//! - Overlap checks on allowed-IP ranges
//! - Reconciliation of registry and config file
//! - HTTP API and command line frontends

pub mod config;
pub mod error;
pub mod keys;
pub mod registry;
pub mod gateway;
pub mod sync;
pub mod api;

pub use config::WolfGateConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfGateConfig;
    pub use crate::error::{Error, Result};
    pub use crate::gateway::{ConfigDocument, GatewayIdentity, PeerBlock};
    pub use crate::keys::KeyPair;
    pub use crate::registry::{ClientRecord, PeerRegistry};
    pub use crate::sync::{ClientConfig, CreateStatus, DeleteOutcome, SyncEngine};
}
