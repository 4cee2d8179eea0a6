//! Store session management.
//!
//! A [`Session`] owns the open store handles and the change-listener
//! registry. Handles are opened lazily on first use and reused until an
//! explicit re-initialization tears them down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use shelf_core::config::ShelfConfig;
use shelf_core::error::ShelfError;
use shelf_core::events::{ChangeBatch, CollectionKind};

use crate::db::Database;
use crate::migrations::StoreSchema;

/// Local store file name under the library directory.
pub const LOCAL_STORE_FILE: &str = "shelf.db";
/// Synced store file name, used when cloud sync is active.
pub const SYNCED_STORE_FILE: &str = "synced.db";
/// Full-text and thumbnail cache file name.
pub const CACHE_STORE_FILE: &str = "cache.db";

const LISTENER_CAPACITY: usize = 64;

/// Looks up stored secrets by key.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_secret(&self, key: &str) -> Option<String>;
}

/// An authenticated cloud session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSession {
    pub user_id: String,
}

/// Authenticates against the sync service.
#[async_trait]
pub trait CloudSessionProvider: Send + Sync {
    async fn login(&self, email: &str, secret: &str) -> Result<CloudSession, ShelfError>;
}

/// Credentials held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn with_secret(mut self, key: &str, secret: &str) -> Self {
        self.secrets.insert(key.to_string(), secret.to_string());
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_secret(&self, key: &str) -> Option<String> {
        self.secrets.get(key).cloned()
    }
}

/// Cloud provider that accepts one secret and answers with a fixed user.
#[derive(Debug, Clone)]
pub struct MockCloudProvider {
    pub accepted_secret: String,
    pub user_id: String,
}

#[async_trait]
impl CloudSessionProvider for MockCloudProvider {
    async fn login(&self, email: &str, secret: &str) -> Result<CloudSession, ShelfError> {
        if secret == self.accepted_secret {
            Ok(CloudSession {
                user_id: self.user_id.clone(),
            })
        } else {
            Err(ShelfError::Auth(format!("login rejected for {}", email)))
        }
    }
}

/// Cloud provider for builds without a sync service.
#[derive(Debug, Default, Clone)]
pub struct NoCloud;

#[async_trait]
impl CloudSessionProvider for NoCloud {
    async fn login(&self, _email: &str, _secret: &str) -> Result<CloudSession, ShelfError> {
        Err(ShelfError::Auth("no sync service configured".into()))
    }
}

/// Where the library store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfiguration {
    Local { path: PathBuf },
    Cloud { path: PathBuf, partition: String },
}

impl StoreConfiguration {
    pub fn path(&self) -> &Path {
        match self {
            StoreConfiguration::Local { path } | StoreConfiguration::Cloud { path, .. } => path,
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, StoreConfiguration::Cloud { .. })
    }
}

/// Open stores of one session.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    pub library: Arc<Database>,
    pub cache: Arc<Database>,
    pub configuration: StoreConfiguration,
}

pub struct Session {
    library_dir: PathBuf,
    config: ShelfConfig,
    credentials: Arc<dyn CredentialProvider>,
    cloud: Arc<dyn CloudSessionProvider>,
    handle: Mutex<Option<StoreHandle>>,
    listeners: parking_lot::Mutex<HashMap<CollectionKind, broadcast::Sender<ChangeBatch>>>,
    sync_enabled: AtomicBool,
}

impl Session {
    pub fn new(
        config: ShelfConfig,
        credentials: Arc<dyn CredentialProvider>,
        cloud: Arc<dyn CloudSessionProvider>,
    ) -> Self {
        Self {
            library_dir: config.general.resolve_library_dir(),
            sync_enabled: AtomicBool::new(config.sync.enabled),
            config,
            credentials,
            cloud,
            handle: Mutex::new(None),
            listeners: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    pub fn config(&self) -> &ShelfConfig {
        &self.config
    }

    /// Whether sync is still enabled. A failed login turns it off for the
    /// rest of the session.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::SeqCst)
    }

    /// Return the open handle, opening the stores on first use.
    ///
    /// With `force_reinit` the current handle is dropped and every listener
    /// is detached before the stores are opened again.
    pub async fn open(&self, force_reinit: bool) -> Result<StoreHandle, ShelfError> {
        let mut slot = self.handle.lock().await;

        if force_reinit {
            if let Some(old) = slot.take() {
                info!(path = %old.configuration.path().display(), "Re-initializing store session");
                close_handle(old);
            }
            self.listeners.lock().clear();
        } else if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        tokio::fs::create_dir_all(&self.library_dir)
            .await
            .map_err(|e| {
                ShelfError::Config(format!(
                    "Library directory {} is unusable: {}",
                    self.library_dir.display(),
                    e
                ))
            })?;

        let configuration = self.configure().await;
        let partition = match &configuration {
            StoreConfiguration::Cloud { partition, .. } => Some(partition.clone()),
            StoreConfiguration::Local { .. } => None,
        };
        // Opening runs migrations and may recreate files; keep it off the
        // async workers.
        let library_path = configuration.path().to_path_buf();
        let cache_path = self.library_dir.join(CACHE_STORE_FILE);
        let (library, cache) = tokio::task::spawn_blocking(move || {
            let library = open_with_recovery(&library_path, StoreSchema::Library, partition)?;
            let cache = open_with_recovery(&cache_path, StoreSchema::Cache, None)?;
            Ok::<_, ShelfError>((library, cache))
        })
        .await
        .map_err(|e| ShelfError::Open(format!("Store open task panicked: {}", e)))??;

        let handle = StoreHandle {
            library: Arc::new(library),
            cache: Arc::new(cache),
            configuration,
        };
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Drop the open handle, if any. Listeners stay attached.
    pub async fn close(&self) {
        if let Some(old) = self.handle.lock().await.take() {
            close_handle(old);
        }
    }

    /// Run `f` in a write scope on the library store.
    pub async fn safe_write<F, T>(&self, f: F) -> Result<T, ShelfError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, ShelfError>,
    {
        let handle = self.open(false).await?;
        handle.library.safe_write(f)
    }

    /// Receive change batches for one collection.
    ///
    /// The first call per kind registers the channel; later calls share it.
    pub fn subscribe(&self, kind: CollectionKind) -> broadcast::Receiver<ChangeBatch> {
        let mut listeners = self.listeners.lock();
        listeners
            .entry(kind)
            .or_insert_with(|| {
                debug!(kind = kind.name(), "Registered change listener");
                broadcast::channel(LISTENER_CAPACITY).0
            })
            .subscribe()
    }

    /// Number of collections with a registered listener.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Publish a batch to its collection's listeners. Empty batches are
    /// dropped.
    pub fn notify(&self, batch: ChangeBatch) {
        if batch.is_empty() {
            return;
        }
        let listeners = self.listeners.lock();
        if let Some(sender) = listeners.get(&batch.kind) {
            if sender.send(batch).is_err() {
                debug!("Change batch had no live receivers");
            }
        }
    }

    async fn configure(&self) -> StoreConfiguration {
        let local = StoreConfiguration::Local {
            path: self.library_dir.join(LOCAL_STORE_FILE),
        };
        if !self.is_sync_enabled() {
            return local;
        }

        let Some(secret) = self.credentials.get_secret(&self.config.sync.credential_key).await
        else {
            debug!("Sync enabled but no stored credential, using local store");
            return local;
        };

        match self.cloud.login(&self.config.sync.email, &secret).await {
            Ok(session) => {
                info!(user = %session.user_id, "Cloud session established");
                StoreConfiguration::Cloud {
                    path: self.library_dir.join(SYNCED_STORE_FILE),
                    partition: session.user_id,
                }
            }
            Err(e) => {
                warn!(error = %e, "Cloud login failed, disabling sync and using local store");
                self.sync_enabled.store(false, Ordering::SeqCst);
                local
            }
        }
    }
}

/// Open a store; a file written by a newer schema is deleted and recreated
/// once.
fn open_with_recovery(
    path: &Path,
    schema: StoreSchema,
    partition: Option<String>,
) -> Result<Database, ShelfError> {
    match Database::open(path, schema, partition.clone()) {
        Ok(db) => Ok(db),
        Err(ShelfError::IncompatibleSchema { found, supported }) => {
            warn!(
                path = %path.display(),
                found,
                supported,
                "Store has an incompatible schema, recreating it"
            );
            remove_store_files(path)?;
            Database::open(path, schema, partition)
                .map_err(|e| ShelfError::Open(format!("{}: {}", path.display(), e)))
        }
        Err(e) => Err(ShelfError::Open(format!("{}: {}", path.display(), e))),
    }
}

fn remove_store_files(path: &Path) -> Result<(), ShelfError> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ShelfError::Open(format!(
                    "Failed to remove {}: {}",
                    PathBuf::from(file).display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

fn close_handle(handle: StoreHandle) {
    for db in [handle.library, handle.cache] {
        // Components may still hold the store; it closes with the last owner.
        if let Ok(db) = Arc::try_unwrap(db) {
            if let Err(e) = db.close() {
                warn!(error = %e, "Failed to close store");
            }
        }
    }
}
