//! Gateway Module
//!
//! The gateway's identity, the structural model of its config file and
//! the lock serializing writers of that file.

mod document;
mod identity;
mod lock;

pub use document::{
    AppendOutcome, ConfigDocument, InterfaceSection, LoadOutcome, PeerBlock, RemoveOutcome,
};
pub use identity::GatewayIdentity;
pub use lock::GatewayLock;
