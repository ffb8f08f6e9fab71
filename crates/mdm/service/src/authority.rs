//! Device Authority issuance and rotation.
//!
//! Storage layout inside the configured bucket:
//!
//! - `history/<sequence>`: every authority ever issued, written create-only
//! - `truststore.pem`: all authority certificates, consumed by the gateway's mutual TLS
//! - `active.json`: the authority currently used to sign device certificates
//!
//! An issuance writes them in exactly that order and only then re-points the gateway.

use std::time::Instant;

use chrono::{DateTime, Utc};
use mdm_crypto::{AuthorityKeys, CertError, TrustPool, VerifyError};
use mdm_storage::{
    CACHE_IMMUTABLE, CACHE_NO_STORE, CACHE_PRIVATE_DAY, ObjectStore, PutObject, StoreError,
    StoredObject,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{AuthorityConfig, DomainBinding, GatewayBinding, HttpDomainBinding, TrustStoreUpdate};

pub const ACTIVE_KEY: &str = "active.json";
pub const TRUSTSTORE_KEY: &str = "truststore.pem";
pub const HISTORY_PREFIX: &str = "history/";

const POOL_PUBLISH_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("no object storage bucket is configured for the device authority")]
    MissingBucket,
    #[error("object storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("storage returned no version identifier for {0}")]
    MissingVersion(&'static str),
    #[error("authority material is invalid: {0}")]
    Crypto(#[from] CertError),
    #[error("stored record {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode authority record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("trust-store pool is invalid: {0}")]
    TrustStore(#[from] VerifyError),
    #[error("key generation task failed: {0}")]
    Generation(#[from] tokio::task::JoinError),
}

/// An issued authority together with its bookkeeping.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    /// SHA-1 fingerprint of the authority certificate.
    pub id: String,
    pub sequence: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Version of `truststore.pem` this authority was published with. Absent in history entries,
    /// which are written before the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truststore_version: Option<String>,
    /// Certificate PEM followed by private key PEM.
    pub bundle: String,
}

impl std::fmt::Debug for AuthorityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityRecord")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("truststore_version", &self.truststore_version)
            .finish_non_exhaustive()
    }
}

impl AuthorityRecord {
    pub fn keys(&self) -> Result<AuthorityKeys, CertError> {
        AuthorityKeys::from_bundle(&self.bundle)
    }

    pub fn summary(&self) -> AuthoritySummary {
        AuthoritySummary {
            id: self.id.clone(),
            sequence: self.sequence,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            truststore_version: self.truststore_version.clone(),
        }
    }
}

/// An [`AuthorityRecord`] without key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthoritySummary {
    pub id: String,
    pub sequence: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub truststore_version: Option<String>,
}

/// Result of [`AuthorityManager::issue_authority`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// This call issued and published a new authority.
    Issued(AuthorityRecord),
    /// Another instance claimed the same sequence first; this is its record.
    Concurrent(AuthorityRecord),
}

impl IssueOutcome {
    pub fn record(&self) -> &AuthorityRecord {
        match self {
            Self::Issued(r) | Self::Concurrent(r) => r,
        }
    }

    pub fn into_record(self) -> AuthorityRecord {
        match self {
            Self::Issued(r) | Self::Concurrent(r) => r,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued(_) => "issued",
            Self::Concurrent(_) => "concurrent",
        }
    }
}

fn history_key(sequence: u64) -> String {
    format!("{HISTORY_PREFIX}{sequence:010}")
}

fn parse_sequence(key: &str) -> Option<u64> {
    key.strip_prefix(HISTORY_PREFIX)?.parse().ok()
}

/// Issues, stores and caches the Device Authority.
pub struct AuthorityManager<S, G = HttpDomainBinding> {
    store: S,
    config: AuthorityConfig,
    gateway: Option<(GatewayBinding, G)>,
    cache: RwLock<Option<(Instant, AuthorityRecord)>>,
}

impl<S: ObjectStore> AuthorityManager<S> {
    pub fn new(store: S, config: AuthorityConfig) -> Self {
        Self {
            store,
            config,
            gateway: None,
            cache: RwLock::new(None),
        }
    }
}

impl<S: ObjectStore, G: DomainBinding> AuthorityManager<S, G> {
    /// Re-point `binding`'s trust store after every issuance.
    pub fn with_gateway<B: DomainBinding>(self, config: GatewayBinding, binding: B) -> AuthorityManager<S, B> {
        AuthorityManager {
            store: self.store,
            config: self.config,
            gateway: Some((config, binding)),
            cache: self.cache,
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    fn bucket(&self) -> Result<&str, AuthorityError> {
        self.config
            .bucket
            .as_deref()
            .ok_or(AuthorityError::MissingBucket)
    }

    /// `s3://` URI of the trust-store pool, as handed to the gateway.
    pub fn truststore_uri(&self) -> Result<String, AuthorityError> {
        Ok(format!("s3://{}/{TRUSTSTORE_KEY}", self.bucket()?))
    }

    /// Generate a new authority and publish it.
    ///
    /// Writes the history entry (create-only), then the trust-store pool, then the active
    /// record, then updates the gateway binding. A failure after the history write leaves that
    /// entry in place; a failing gateway update is logged and does not undo the pool.
    pub async fn issue_authority(&self) -> Result<IssueOutcome, AuthorityError> {
        let bucket = self.bucket()?;
        let sequence = self.next_sequence(bucket)?;

        let organization = self.config.organization.clone();
        let key_bits = self.config.key_bits;
        let generated = tokio::task::spawn_blocking(move || {
            mdm_crypto::generate_authority(&organization, key_bits, Utc::now())
        })
        .await??;

        let cert_der = generated.keys.cert_der()?;
        let mut record = AuthorityRecord {
            id: mdm_crypto::sha1_fingerprint(&cert_der),
            sequence,
            issued_at: generated.not_before,
            expires_at: generated.not_after,
            truststore_version: None,
            bundle: generated.keys.to_bundle(),
        };

        let key = history_key(sequence);
        let body = serialize(&record)?;
        let history = PutObject::new(bucket, &key, &body)
            .cache_control(CACHE_IMMUTABLE)
            .create_only();

        match self.store.put(history) {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                tracing::warn!(sequence, key = %key, "authority sequence already claimed by another instance");
                let winner = self
                    .read_record(bucket, &key)?
                    .ok_or(AuthorityError::Storage(e))?;
                return Ok(IssueOutcome::Concurrent(winner));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(sequence, id = %record.id, key = %key, "recorded authority in history");

        let version = self.publish_pool(bucket)?;

        tracing::info!(sequence, version = %version, "published trust-store pool");

        record.truststore_version = Some(version.clone());
        let active = serialize(&record)?;
        self.store
            .put(PutObject::new(bucket, ACTIVE_KEY, &active).cache_control(CACHE_PRIVATE_DAY))?;

        *self.cache.write().await = Some((Instant::now(), record.clone()));

        tracing::info!(sequence, id = %record.id, expires_at = %record.expires_at, "activated authority");

        if let Some((binding, gateway)) = &self.gateway {
            self.update_gateway(binding, gateway, version).await?;
        }

        Ok(IssueOutcome::Issued(record))
    }

    /// Rebuild `truststore.pem` from every history entry.
    ///
    /// The write is conditional on the version that was read, so an issuance publishing in
    /// between makes this one re-read history and try again instead of dropping its root.
    fn publish_pool(&self, bucket: &str) -> Result<String, AuthorityError> {
        let mut attempt = 1;
        loop {
            let prior = self.store.get(bucket, TRUSTSTORE_KEY)?;
            let pool = self
                .history()?
                .iter()
                .map(|r| r.keys().map(|k| format!("{}\n", k.cert_pem.trim_end())))
                .collect::<Result<String, _>>()?;

            let put = PutObject::new(bucket, TRUSTSTORE_KEY, pool.as_bytes()).cache_control(CACHE_NO_STORE);
            let put = match prior {
                None => put.create_only(),
                Some(StoredObject {
                    version: Some(version),
                    ..
                }) => put.if_match(version),
                // unversioned bucket, rejected below once the put returns no version
                Some(_) => put,
            };

            match self.store.put(put) {
                Ok(version) => return version.ok_or(AuthorityError::MissingVersion(TRUSTSTORE_KEY)),
                Err(e) if e.is_conflict() && attempt < POOL_PUBLISH_ATTEMPTS => {
                    tracing::warn!(attempt, "trust-store pool changed while publishing, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn update_gateway(
        &self,
        binding: &GatewayBinding,
        gateway: &G,
        version: String,
    ) -> Result<(), AuthorityError> {
        let update = TrustStoreUpdate::new(binding, self.truststore_uri()?, version);

        match tokio::time::timeout(binding.timeout, gateway.update_trust_store(&update)).await {
            Ok(Ok(())) => {
                tracing::info!(domain = %binding.domain, version = %update.truststore_version, "gateway trust store updated");
            }
            Ok(Err(e)) => {
                tracing::warn!(domain = %binding.domain, error = %e, "gateway trust store update failed");
            }
            Err(_) => {
                tracing::warn!(domain = %binding.domain, timeout = ?binding.timeout, "gateway trust store update timed out");
            }
        }
        Ok(())
    }

    /// The active authority, served from cache while younger than the configured TTL.
    pub async fn active(&self) -> Result<Option<AuthorityRecord>, AuthorityError> {
        if let Some((at, record)) = self.cache.read().await.as_ref() {
            if at.elapsed() < self.config.cache_ttl {
                return Ok(Some(record.clone()));
            }
        }

        let bucket = self.bucket()?;
        let record = self.read_record(bucket, ACTIVE_KEY)?;

        let mut cache = self.cache.write().await;
        *cache = record.clone().map(|r| (Instant::now(), r));
        Ok(record)
    }

    /// The active authority, issuing the first one if none exists yet.
    pub async fn active_or_issue(&self) -> Result<AuthorityRecord, AuthorityError> {
        if let Some(record) = self.active().await? {
            return Ok(record);
        }

        tracing::info!("no active authority, issuing the first one");
        Ok(self.issue_authority().await?.into_record())
    }

    /// Current trust-store pool. Never cached.
    pub fn trust_pool(&self) -> Result<TrustPool, AuthorityError> {
        let bucket = self.bucket()?;
        match self.store.get(bucket, TRUSTSTORE_KEY)? {
            Some(obj) => Ok(TrustPool::from_pem(&String::from_utf8_lossy(&obj.body))?),
            None => Ok(TrustPool::default()),
        }
    }

    /// All issued authorities, oldest first.
    pub fn history(&self) -> Result<Vec<AuthorityRecord>, AuthorityError> {
        let bucket = self.bucket()?;
        let mut records = Vec::new();
        for key in self.store.list(bucket, HISTORY_PREFIX)? {
            if let Some(record) = self.read_record(bucket, &key)? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    fn next_sequence(&self, bucket: &str) -> Result<u64, AuthorityError> {
        let highest = self
            .store
            .list(bucket, HISTORY_PREFIX)?
            .iter()
            .filter_map(|k| parse_sequence(k))
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    fn read_record(&self, bucket: &str, key: &str) -> Result<Option<AuthorityRecord>, AuthorityError> {
        let Some(obj) = self.store.get(bucket, key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&obj.body)
            .map(Some)
            .map_err(|source| AuthorityError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    /// Drop the cached active record.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

fn serialize(record: &AuthorityRecord) -> Result<Vec<u8>, AuthorityError> {
    serde_json::to_vec(record).map_err(AuthorityError::Encode)
}
