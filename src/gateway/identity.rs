//! Gateway Identity
//!
//! The gateway's own key pair, listen port and address space. Created on
//! first run together with the config file and recovered from that file on
//! every later start; never rotated.

use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::keys::KeyPair;

use super::document::{ConfigDocument, LoadOutcome};
use super::lock::GatewayLock;

/// Long-term identity of the VPN gateway
#[derive(Debug, Clone)]
pub struct GatewayIdentity {
    key_pair: KeyPair,
    listen_port: u16,
    address: String,
}

impl GatewayIdentity {
    pub fn new(key_pair: KeyPair, listen_port: u16, address: impl Into<String>) -> Self {
        Self {
            key_pair,
            listen_port,
            address: address.into(),
        }
    }

    /// Load the identity from an existing config file, or create both.
    ///
    /// An existing file is never rewritten here. If its interface disagrees
    /// with the requested address or port, the file wins.
    pub fn initialize(config_path: &Path, address: &str, listen_port: u16) -> Result<Self> {
        if let LoadOutcome::Loaded(doc) = ConfigDocument::load(config_path)? {
            return Self::recover(config_path, &doc, address, listen_port);
        }

        // Another process may be creating it right now
        let _lock = GatewayLock::acquire(config_path)?;
        match ConfigDocument::load(config_path)? {
            LoadOutcome::Loaded(doc) => Self::recover(config_path, &doc, address, listen_port),
            LoadOutcome::CreateDefault => {
                let identity = Self::new(KeyPair::generate()?, listen_port, address);
                ConfigDocument::for_gateway(&identity).save(config_path)?;
                info!("Created gateway config {:?} for {}", config_path, address);
                Ok(identity)
            }
        }
    }

    fn recover(config_path: &Path, doc: &ConfigDocument, address: &str, listen_port: u16) -> Result<Self> {
        let identity = Self::from_document(doc)?;
        if identity.address != address || identity.listen_port != listen_port {
            warn!(
                "Gateway config {:?} has Address {} / ListenPort {}, ignoring configured {} / {}",
                config_path, identity.address, identity.listen_port, address, listen_port
            );
        }
        info!(
            "Loaded gateway identity from {:?} ({} peers)",
            config_path,
            doc.peers().len()
        );
        Ok(identity)
    }

    /// Recover the identity from a parsed interface section
    pub fn from_document(doc: &ConfigDocument) -> Result<Self> {
        let interface = doc.interface();
        let key_pair = KeyPair::from_private_base64(interface.private_key())?;
        Ok(Self::new(key_pair, interface.listen_port(), interface.address()))
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> String {
        self.key_pair.public_key_base64()
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::tempdir;

    #[test]
    fn test_first_run_creates_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        let identity = GatewayIdentity::initialize(&path, "10.8.0.1/24", 51820).unwrap();

        let doc = match ConfigDocument::load(&path).unwrap() {
            LoadOutcome::Loaded(doc) => doc,
            LoadOutcome::CreateDefault => panic!("config not written"),
        };
        assert_eq!(doc.interface().address(), "10.8.0.1/24");
        assert_eq!(doc.interface().listen_port(), 51820);
        assert!(doc.peers().is_empty());
        assert_eq!(
            doc.interface().private_key(),
            identity.key_pair().private_key_base64()
        );
    }

    #[test]
    fn test_existing_config_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        let first = GatewayIdentity::initialize(&path, "10.8.0.1/24", 51820).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        let second = GatewayIdentity::initialize(&path, "10.9.0.1/24", 51999).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert_eq!(second.public_key(), first.public_key());
        assert_eq!(second.address(), "10.8.0.1/24");
        assert_eq!(second.listen_port(), 51820);
    }

    #[test]
    fn test_bad_private_key_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wg0.conf");
        std::fs::write(
            &path,
            "[Interface]\nAddress = 10.8.0.1/24\nPrivateKey = nope\nListenPort = 51820\n",
        )
        .unwrap();

        let err = GatewayIdentity::initialize(&path, "10.8.0.1/24", 51820).unwrap_err();
        assert!(matches!(err, Error::MalformedConfig { line: 3, .. }));
        // Left for the operator to fix
        assert!(std::fs::read_to_string(&path).unwrap().contains("nope"));
    }

    #[test]
    fn test_concurrent_first_runs_agree_on_one_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    GatewayIdentity::initialize(&path, "10.8.0.1/24", 51820)
                        .unwrap()
                        .public_key()
                })
            })
            .collect();
        let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.iter().all(|k| *k == keys[0]));
        let doc = match ConfigDocument::load(&path).unwrap() {
            LoadOutcome::Loaded(doc) => doc,
            LoadOutcome::CreateDefault => panic!("config not written"),
        };
        assert_eq!(GatewayIdentity::from_document(&doc).unwrap().public_key(), keys[0]);
    }
}
