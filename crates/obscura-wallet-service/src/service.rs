//! Top-level wallet service
//!
//! [`WalletService`] wires the engine together for one chain: the vault,
//! the ledger, the gateway, the lifecycle manager (installed as the sync
//! cycle hook) and the autosync supervisor. It owns the `watch` channel
//! that feeds wallet snapshots to the supervisor; every vault state change
//! goes through the service so the snapshot stays current.

use crate::bridge::Bridge;
use crate::lifecycle::{LifecycleConfig, LifecycleManager, TransferRequest};
use crate::prover::ProverCache;
use crate::Result;
use obscura_storage_sqlite::{Balance, Ledger, Record, Transaction};
use obscura_sync::{
    Autosync, AutosyncConfig, CancelToken, ChainGateway, CycleHook, CycleOutcome, HttpGateway,
    WalletSnapshot,
};
use obscura_vault::{AccountInfo, Vault, VaultStatus};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

/// Everything the engine needs to know about one chain
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Chain id, stored on every row the engine writes
    pub id: String,
    /// Gateway base URL
    pub gateway_url: String,
    /// Params endpoint serving prover artifacts
    pub prover_url: String,
    /// Supervisor tuning
    pub autosync: AutosyncConfig,
    /// Lifecycle tuning
    pub lifecycle: LifecycleConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            id: "obscura-testnet".to_string(),
            gateway_url: "http://localhost:3030".to_string(),
            prover_url: "http://localhost:8080/params".to_string(),
            autosync: AutosyncConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// The assembled wallet engine for one chain
pub struct WalletService {
    config: ChainConfig,
    vault: Arc<Vault>,
    ledger: Arc<Ledger>,
    lifecycle: Arc<LifecycleManager>,
    bridge: Bridge,
    autosync: Arc<Autosync>,
    snapshots: watch::Sender<WalletSnapshot>,
    cancel: CancelToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WalletService {
    /// Open (or create) a service rooted at `data_dir`, with the vault
    /// file, ledger database and prover cache inside it.
    pub fn open(config: ChainConfig, data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let vault = Arc::new(Vault::open(dir.join("vault.json"))?);
        let ledger = Arc::new(Ledger::open(dir.join("ledger.sqlite"))?);
        let gateway: Arc<dyn ChainGateway> =
            Arc::new(HttpGateway::new(config.gateway_url.as_str())?);
        let prover = Arc::new(ProverCache::new(
            dir.join("prover"),
            config.prover_url.as_str(),
        )?);
        Ok(Self::with_parts(config, vault, ledger, gateway, prover))
    }

    /// Assemble a service from pre-built parts, used by embedders that
    /// supply their own gateway and by tests.
    pub fn with_parts(
        config: ChainConfig,
        vault: Arc<Vault>,
        ledger: Arc<Ledger>,
        gateway: Arc<dyn ChainGateway>,
        prover: Arc<ProverCache>,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&ledger),
            Arc::clone(&vault),
            Arc::clone(&gateway),
            prover,
            config.lifecycle.clone(),
        ));
        let autosync = Arc::new(
            Autosync::new(
                Arc::clone(&ledger),
                gateway,
                Arc::clone(&vault),
                config.id.clone(),
                config.autosync.clone(),
            )
            .with_hook(Arc::clone(&lifecycle) as Arc<dyn CycleHook>),
        );
        let bridge = Bridge::new(
            Arc::clone(&vault),
            Arc::clone(&ledger),
            Arc::clone(&lifecycle),
        );
        let (snapshots, _) = watch::channel(WalletSnapshot::locked());

        Self {
            config,
            vault,
            ledger,
            lifecycle,
            bridge,
            autosync,
            snapshots,
            cancel: CancelToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Start the autosync supervisor. Idempotent.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let autosync = Arc::clone(&self.autosync);
        let snapshots = self.snapshots.subscribe();
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            autosync.run(snapshots, cancel).await;
        }));
    }

    /// Stop the supervisor and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Run one sync cycle right now, without waiting for the supervisor
    /// interval. The wallet must be unlocked.
    pub async fn sync_now(&self) -> Result<CycleOutcome> {
        let snapshot = self.current_snapshot()?;
        if !snapshot.unlocked || snapshot.scan_keys.is_empty() {
            return Ok(CycleOutcome::default());
        }
        Ok(self.autosync.run_cycle(&snapshot, &self.cancel).await?)
    }

    /// Initialize the vault, returning the mnemonic phrase.
    pub fn initialize(
        &self,
        password: &str,
        mnemonic: Option<&str>,
    ) -> Result<Zeroizing<String>> {
        let phrase = self.vault.initialize(password, mnemonic)?;
        self.publish_snapshot()?;
        Ok(phrase)
    }

    /// Unlock the vault and wake the supervisor.
    pub fn unlock(&self, password: &str) -> Result<()> {
        self.vault.unlock(password)?;
        self.publish_snapshot()
    }

    /// Lock the vault; the supervisor parks until the next unlock.
    pub fn lock(&self) {
        self.vault.lock();
        self.snapshots.send_replace(WalletSnapshot::locked());
    }

    /// Vault lifecycle state
    pub fn status(&self) -> VaultStatus {
        self.vault.status()
    }

    /// Create a derived account and refresh the scan key set.
    pub fn create_account(&self, name: &str) -> Result<AccountInfo> {
        let info = self.vault.create_account(name)?;
        self.publish_snapshot()?;
        Ok(info)
    }

    /// Import a private key as an account and refresh the scan key set.
    pub fn import_account(&self, name: &str, encoded_key: &str) -> Result<AccountInfo> {
        let info = self.vault.import_account(name, encoded_key)?;
        self.publish_snapshot()?;
        Ok(info)
    }

    /// Accounts in the vault
    pub fn list_accounts(&self) -> Result<Vec<AccountInfo>> {
        Ok(self.vault.list_accounts()?)
    }

    /// Spendable / pending / total balance for an address
    pub fn balance(&self, address: &str) -> Result<Balance> {
        Ok(self.ledger.balance(&self.config.id, address)?)
    }

    /// An address's records
    pub fn records(&self, address: &str) -> Result<Vec<Record>> {
        Ok(self.ledger.list_records(&self.config.id, address)?)
    }

    /// Most recent transactions for an address
    pub fn transactions(&self, address: &str, limit: u32) -> Result<Vec<Transaction>> {
        Ok(self
            .ledger
            .list_transactions(&self.config.id, address, limit)?)
    }

    /// Height the last completed sync cycle reached for an address
    pub fn sync_height(&self, address: &str) -> Result<Option<u32>> {
        Ok(self.ledger.public_sync_height(&self.config.id, address)?)
    }

    /// Queue a transfer
    pub fn transfer(&self, request: &TransferRequest) -> Result<Transaction> {
        self.lifecycle.create_transfer(request)
    }

    /// The messaging bridge dispatcher
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// The transaction lifecycle manager
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// The chain configuration this service was built with
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn current_snapshot(&self) -> Result<WalletSnapshot> {
        if !self.vault.is_unlocked() {
            return Ok(WalletSnapshot::locked());
        }
        Ok(WalletSnapshot {
            unlocked: true,
            scan_keys: self.vault.scan_keys()?,
            from_genesis: self.vault.seed_was_generated()?,
        })
    }

    fn publish_snapshot(&self) -> Result<()> {
        let snapshot = self.current_snapshot()?;
        self.snapshots.send_replace(snapshot);
        Ok(())
    }
}
