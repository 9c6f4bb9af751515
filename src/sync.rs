//! Sync Engine
//!
//! Keeps the client registry and the gateway config file describing the
//! same set of peers.
//!
//! Create: generate keys, write the registry, append the peer block, save.
//! Delete: flag the record as revoking, remove the peer block, save, then
//! drop the record. The registry therefore always knows the public key of
//! any block still present in the file, and a block missing for a flagged
//! record is never put back. Neither direction is transactional; an
//! interrupted operation is finished by running it again, or by
//! [`SyncEngine::reconcile`].
//!
//! Every mutation holds the [`GatewayLock`] for the config file, so engines
//! in other processes (CLI next to a running server) take turns with this
//! one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipnetwork::IpNetwork;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::WolfGateConfig;
use crate::error::{Error, Result};
use crate::gateway::{
    AppendOutcome, ConfigDocument, GatewayIdentity, GatewayLock, LoadOutcome, RemoveOutcome,
};
use crate::keys::KeyPair;
use crate::registry::{ClientRecord, PeerRegistry};

const MAX_USERNAME_LEN: usize = 64;

/// Configuration handed to a newly provisioned client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    pub username: String,
    pub private_key: String,
    pub public_key: String,
    /// Tunnel address assigned to the client
    pub address: String,
    pub gateway_public_key: String,
    pub endpoint: String,
    /// Ranges the client routes through the tunnel
    pub allowed_ips: String,
}

impl ClientConfig {
    /// Render a wg-quick config file for the client
    pub fn render(&self) -> String {
        format!(
            "[Interface]\nPrivateKey = {}\nAddress = {}\n\n[Peer]\nPublicKey = {}\nEndpoint = {}\nAllowedIPs = {}\n",
            self.private_key, self.address, self.gateway_public_key, self.endpoint, self.allowed_ips
        )
    }
}

/// How a create request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStatus {
    /// Registry record and peer block were both written
    Committed,
    /// The peer block was already in the config file
    AlreadyPresent,
}

/// Result of a successful create
#[derive(Debug, Clone, Serialize)]
pub struct CreatedUser {
    pub client: ClientConfig,
    pub status: CreateStatus,
}

impl CreatedUser {
    pub fn already_present(&self) -> bool {
        self.status == CreateStatus::AlreadyPresent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Differences found between registry and config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Users whose missing peer block was written back
    pub restored: Vec<String>,
    /// Users with no peer block, left as they are (audit only)
    pub missing: Vec<String>,
    /// Interrupted deletes that were finished
    pub revoked: Vec<String>,
    /// Peer blocks (by name, or public key if unnamed) with no registry record
    pub orphaned: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.restored.is_empty()
            && self.missing.is_empty()
            && self.revoked.is_empty()
            && self.orphaned.is_empty()
    }
}

/// Serialises create/delete against one gateway
pub struct SyncEngine {
    registry: Arc<PeerRegistry>,
    gateway: GatewayIdentity,
    config_path: PathBuf,
    endpoint: String,
    client_allowed_ips: String,
    /// Taken before the gateway lock, so tasks of this engine queue here
    /// instead of each parking a blocking thread on the file lock
    lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<PeerRegistry>,
        gateway: GatewayIdentity,
        config_path: PathBuf,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            gateway,
            config_path,
            endpoint: endpoint.into(),
            client_allowed_ips: "0.0.0.0/0".to_string(),
            lock: Mutex::new(()),
        }
    }

    /// Open the registry and initialize the gateway described by `config`
    pub fn open(config: &WolfGateConfig) -> Result<Self> {
        let registry = Arc::new(PeerRegistry::open(&config.registry.db_path)?);
        let gateway = GatewayIdentity::initialize(
            &config.gateway.config_path,
            &config.gateway.address,
            config.gateway.listen_port,
        )?;
        Ok(Self::new(
            registry,
            gateway,
            config.gateway.config_path.clone(),
            config.gateway.endpoint.clone(),
        )
        .with_client_allowed_ips(config.gateway.client_allowed_ips.clone()))
    }

    /// Ranges written into client configs (default `0.0.0.0/0`)
    pub fn with_client_allowed_ips(mut self, allowed_ips: impl Into<String>) -> Self {
        self.client_allowed_ips = allowed_ips.into();
        self
    }

    pub fn gateway(&self) -> &GatewayIdentity {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Provision a new client
    pub async fn create_user(&self, username: &str, allowed_ips: &str) -> Result<CreatedUser> {
        validate_username(username)?;
        let _guard = self.exclusive().await?;

        if self.registry.lookup(username).await?.is_some() {
            return Err(Error::DuplicateUsername(username.to_string()));
        }
        let doc = self.load_document()?;
        let records = self.registry.list_all().await?;
        let allowed_ips = self.check_allowed_ips(allowed_ips, &records, &doc)?;

        let keys = KeyPair::generate()?;
        let record = ClientRecord::new(
            username,
            keys.private_key_base64(),
            keys.public_key_base64(),
            allowed_ips,
        );
        self.registry.insert(&record).await?;

        let status = self.append_and_save(doc, &record).map_err(|e| {
            warn!(
                "User {} registered but gateway config {:?} was not updated: {}",
                username, self.config_path, e
            );
            Error::PartialFailure {
                username: username.to_string(),
                source: Box::new(e),
            }
        })?;

        info!("Created user {} ({})", record.username, record.allowed_ips);
        Ok(CreatedUser {
            client: self.client_config_for(&record),
            status,
        })
    }

    /// Write the peer block for an already registered user.
    ///
    /// Finishes a create that ended in [`Error::PartialFailure`].
    pub async fn retry_config(&self, username: &str) -> Result<CreatedUser> {
        let _guard = self.exclusive().await?;

        let record = self
            .registry
            .lookup(username)
            .await?
            .filter(|r| !r.revoking)
            .ok_or_else(|| Error::NotFound(username.to_string()))?;
        let doc = self.load_document()?;
        let status = self.append_and_save(doc, &record)?;

        match status {
            CreateStatus::Committed => info!("Restored peer block for {}", username),
            CreateStatus::AlreadyPresent => debug!("Peer block for {} already present", username),
        }
        Ok(CreatedUser {
            client: self.client_config_for(&record),
            status,
        })
    }

    /// All registered clients
    pub async fn list_users(&self) -> Result<Vec<ClientRecord>> {
        self.registry.list_all().await
    }

    /// Client config for an existing user
    pub async fn client_config(&self, username: &str) -> Result<Option<ClientConfig>> {
        Ok(self
            .registry
            .lookup(username)
            .await?
            .filter(|r| !r.revoking)
            .map(|record| self.client_config_for(&record)))
    }

    /// Revoke a client
    pub async fn delete_user(&self, username: &str) -> Result<DeleteOutcome> {
        let _guard = self.exclusive().await?;

        let record = match self.registry.lookup(username).await? {
            Some(record) => record,
            None => {
                debug!("Delete of unknown user {}", username);
                return Ok(DeleteOutcome::NotFound);
            }
        };

        if !record.revoking {
            self.registry.mark_revoking(username).await?;
        }
        self.finish_revoke(&record).await?;
        info!("Deleted user {}", username);
        Ok(DeleteOutcome::Deleted)
    }

    /// Bring the config file back in line with the registry.
    ///
    /// Interrupted deletes are finished, missing peer blocks of live users
    /// are written back. Blocks without a registry record are only
    /// reported.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_with(true).await
    }

    /// Like [`reconcile`](Self::reconcile), but missing peer blocks are only
    /// reported. Finishing interrupted deletes only ever takes access away,
    /// so that part still runs.
    pub async fn audit(&self) -> Result<ReconcileReport> {
        self.reconcile_with(false).await
    }

    async fn reconcile_with(&self, restore: bool) -> Result<ReconcileReport> {
        let _guard = self.exclusive().await?;

        let records = self.registry.list_all().await?;
        let (revoking, live): (Vec<ClientRecord>, Vec<ClientRecord>) =
            records.into_iter().partition(|r| r.revoking);
        let mut report = ReconcileReport::default();

        for record in &revoking {
            warn!("Finishing interrupted delete of {}", record.username);
            self.finish_revoke(record).await?;
            report.revoked.push(record.username.clone());
        }

        let mut doc = self.load_document()?;
        for record in &live {
            if doc.find_peer(&record.public_key).is_some() {
                continue;
            }
            if restore {
                doc.append_peer(&record.username, &record.public_key, &record.allowed_ips);
                report.restored.push(record.username.clone());
            } else {
                warn!("User {} has no peer block", record.username);
                report.missing.push(record.username.clone());
            }
        }

        for peer in doc.peers() {
            if self.registry.lookup_by_public_key(peer.public_key()).await?.is_none() {
                let label = peer.name().unwrap_or(peer.public_key()).to_string();
                warn!("Peer block {} has no registry record", label);
                report.orphaned.push(label);
            }
        }

        if !report.restored.is_empty() {
            doc.save(&self.config_path)?;
            info!("Reconcile restored {} peer block(s)", report.restored.len());
        }
        Ok(report)
    }

    /// Remove the peer block of a record flagged as revoking, then the record
    async fn finish_revoke(&self, record: &ClientRecord) -> Result<()> {
        match ConfigDocument::load(&self.config_path)? {
            LoadOutcome::Loaded(mut doc) => match doc.remove_peer(&record.public_key) {
                RemoveOutcome::Removed => doc.save(&self.config_path)?,
                RemoveOutcome::NotFound => {
                    debug!("Peer block for {} already absent", record.username)
                }
            },
            LoadOutcome::CreateDefault => {
                warn!("Gateway config {:?} missing during delete", self.config_path)
            }
        }
        self.registry.delete(&record.username).await?;
        Ok(())
    }

    /// Serialize against this engine's tasks first, then against every other
    /// writer of the config file
    async fn exclusive(&self) -> Result<(MutexGuard<'_, ()>, GatewayLock)> {
        let guard = self.lock.lock().await;
        let gateway = GatewayLock::acquire_async(&self.config_path).await?;
        Ok((guard, gateway))
    }

    fn load_document(&self) -> Result<ConfigDocument> {
        match ConfigDocument::load(&self.config_path)? {
            LoadOutcome::Loaded(doc) => Ok(doc),
            LoadOutcome::CreateDefault => {
                warn!(
                    "Gateway config {:?} missing, rebuilding from gateway identity",
                    self.config_path
                );
                Ok(ConfigDocument::for_gateway(&self.gateway))
            }
        }
    }

    fn append_and_save(&self, mut doc: ConfigDocument, record: &ClientRecord) -> Result<CreateStatus> {
        match doc.append_peer(&record.username, &record.public_key, &record.allowed_ips) {
            AppendOutcome::Added => {
                doc.save(&self.config_path)?;
                Ok(CreateStatus::Committed)
            }
            AppendOutcome::AlreadyPresent => Ok(CreateStatus::AlreadyPresent),
        }
    }

    fn client_config_for(&self, record: &ClientRecord) -> ClientConfig {
        ClientConfig {
            username: record.username.clone(),
            private_key: record.private_key.clone(),
            public_key: record.public_key.clone(),
            address: record.allowed_ips.clone(),
            gateway_public_key: self.gateway.public_key(),
            endpoint: self.endpoint.clone(),
            allowed_ips: self.client_allowed_ips.clone(),
        }
    }

    /// Parse the requested range and reject overlaps with the gateway or
    /// any existing peer
    fn check_allowed_ips(
        &self,
        requested: &str,
        records: &[ClientRecord],
        doc: &ConfigDocument,
    ) -> Result<String> {
        let net: IpNetwork = requested
            .trim()
            .parse()
            .map_err(|e| Error::InvalidAllowedIps {
                value: requested.to_string(),
                reason: format!("{}", e),
            })?;
        let canonical = net.to_string();

        if let Ok(gateway_net) = self.gateway.address().parse::<IpNetwork>() {
            if net.contains(gateway_net.ip()) {
                return Err(Error::AddressConflict {
                    requested: canonical,
                    existing: gateway_net.ip().to_string(),
                    owner: "gateway".to_string(),
                });
            }
        }

        let registered = records
            .iter()
            .map(|r| (r.allowed_ips.as_str(), r.username.as_str()));
        let unregistered = doc
            .peers()
            .iter()
            .filter(|p| !records.iter().any(|r| r.public_key == p.public_key()))
            .map(|p| (p.allowed_ips(), p.name().unwrap_or("unregistered peer")));

        for (ranges, owner) in registered.chain(unregistered) {
            for existing in ranges.split(',').filter_map(|r| r.trim().parse::<IpNetwork>().ok()) {
                if overlaps(&net, &existing) {
                    return Err(Error::AddressConflict {
                        requested: canonical,
                        existing: existing.to_string(),
                        owner: owner.to_string(),
                    });
                }
            }
        }

        Ok(canonical)
    }
}

/// Two CIDR blocks overlap exactly when one holds the other's base address
fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidUsername(username.to_string()))
    }
}
