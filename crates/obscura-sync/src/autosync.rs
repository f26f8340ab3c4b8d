//! Autosync supervision
//!
//! The [`Autosync`] task drives one chain's full sync pipeline in a loop:
//! creation-height bootstrap, planning, scanning, record completion,
//! history derivation, spend tracking, and finally a caller-supplied
//! [`CycleHook`] for transaction-lifecycle cleanup. It never reaches into
//! the vault directly; each cycle works from an injected [`WalletSnapshot`]
//! delivered over a `watch` channel, refreshed by whoever owns the vault
//! whenever lock state or accounts change. While the wallet is locked the
//! loop parks on the channel and touches nothing.

use crate::cancel::CancelToken;
use crate::completion::{complete_records, derive_history, ProgramCache};
use crate::gateway::ChainGateway;
use crate::planner::plan_steps;
use crate::scanner::scan_step;
use crate::spent::track_spent;
use crate::{Error, Result};
use async_trait::async_trait;
use obscura_core::ScanKey;
use obscura_storage_sqlite::Ledger;
use obscura_vault::Vault;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Supervisor tuning for one chain
#[derive(Debug, Clone)]
pub struct AutosyncConfig {
    /// Maximum blocks per scan chunk
    pub batch_size: u32,
    /// Planned steps scheduled per cycle; the rest stay pending
    pub sync_batch: usize,
    /// Owned records hydrated per completion batch
    pub completion_batch: u32,
    /// Records examined per history-derivation batch
    pub history_batch: u32,
    /// Serial numbers checked per spend-tracker page
    pub serial_page_size: u32,
    /// Idle time between cycles
    pub cycle_interval: Duration,
}

impl Default for AutosyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            sync_batch: 10,
            completion_batch: 50,
            history_batch: 50,
            serial_page_size: 100,
            cycle_interval: Duration::from_secs(30),
        }
    }
}

/// What the supervisor knows about the wallet at cycle start.
///
/// Snapshots are immutable; the vault owner publishes a fresh one on every
/// unlock, lock or account change rather than sharing live vault state.
#[derive(Clone)]
pub struct WalletSnapshot {
    /// Whether the vault is unlocked; nothing runs while it is not
    pub unlocked: bool,
    /// Scan keys for every account
    pub scan_keys: Vec<ScanKey>,
    /// Whether the seed was generated by this wallet. A generated seed
    /// cannot own records older than itself, so addresses scan from
    /// genesis; supplied seed material scans from the height it appeared.
    pub from_genesis: bool,
}

impl WalletSnapshot {
    /// The snapshot of a locked or uninitialized wallet
    pub fn locked() -> Self {
        Self {
            unlocked: false,
            scan_keys: Vec::new(),
            from_genesis: true,
        }
    }
}

/// Work the supervisor delegates back to its embedder at the end of each
/// cycle, after sync state is fresh. The transaction lifecycle manager
/// hangs its queue processing and cancellation sweep here.
#[async_trait]
pub trait CycleHook: Send + Sync {
    /// Called once per completed sync cycle
    async fn after_sync(&self, chain: &str) -> Result<()>;
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Chain height the cycle synced against
    pub height: u32,
    /// Scan steps executed
    pub steps_run: usize,
    /// Ownership assertions recorded
    pub records_found: usize,
    /// Owned records hydrated into full records
    pub hydrated: usize,
    /// History transactions derived from received records
    pub history_derived: usize,
    /// Records newly marked spent
    pub newly_spent: usize,
}

/// Per-chain sync supervisor
pub struct Autosync {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn ChainGateway>,
    vault: Arc<Vault>,
    chain: String,
    config: AutosyncConfig,
    programs: ProgramCache,
    hook: Option<Arc<dyn CycleHook>>,
}

impl Autosync {
    /// A supervisor for one chain.
    ///
    /// The vault handle is used only for record decryption and serial
    /// numbers during completion; lock state is read from the snapshot,
    /// never from the vault itself.
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn ChainGateway>,
        vault: Arc<Vault>,
        chain: impl Into<String>,
        config: AutosyncConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            vault,
            chain: chain.into(),
            config,
            programs: ProgramCache::new(),
            hook: None,
        }
    }

    /// Attach the end-of-cycle hook
    pub fn with_hook(mut self, hook: Arc<dyn CycleHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Drive cycles until cancelled.
    ///
    /// A locked snapshot parks the loop on the channel; cycle failures are
    /// logged and retried on the next interval rather than ending the task.
    pub async fn run(&self, mut snapshots: watch::Receiver<WalletSnapshot>, cancel: CancelToken) {
        tracing::info!(chain = %self.chain, event = "autosync_started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let snapshot = snapshots.borrow_and_update().clone();
            if !snapshot.unlocked || snapshot.scan_keys.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            match self.run_cycle(&snapshot, &cancel).await {
                Ok(outcome) => {
                    tracing::debug!(
                        chain = %self.chain,
                        event = "cycle_complete",
                        height = outcome.height,
                        steps = outcome.steps_run,
                        found = outcome.records_found,
                        hydrated = outcome.hydrated,
                        newly_spent = outcome.newly_spent,
                    );
                }
                Err(Error::Cancelled) => break,
                Err(err) => {
                    tracing::warn!(
                        chain = %self.chain,
                        event = "cycle_failed",
                        "autosync cycle failed: {err}"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
        }

        tracing::info!(chain = %self.chain, event = "autosync_stopped");
    }

    /// Run one full cycle against the current chain height.
    ///
    /// Stage order is fixed: creation heights are bootstrapped before any
    /// scanning so the planner's lower bounds exist, and the hook runs last
    /// against fully refreshed sync state.
    pub async fn run_cycle(
        &self,
        snapshot: &WalletSnapshot,
        cancel: &CancelToken,
    ) -> Result<CycleOutcome> {
        let chain = self.chain.as_str();
        let mut addresses = Vec::with_capacity(snapshot.scan_keys.len());
        for key in &snapshot.scan_keys {
            addresses.push(key.address().encode()?);
        }

        let height = self.gateway.get_height(chain).await?;
        for address in &addresses {
            let floor = if snapshot.from_genesis { 0 } else { height };
            self.ledger.init_creation_height(chain, address, floor)?;
        }

        let mut outcome = CycleOutcome {
            height,
            ..CycleOutcome::default()
        };

        let steps = plan_steps(
            &self.ledger,
            chain,
            &addresses,
            height,
            self.config.batch_size,
        )?;
        let scheduled = &steps[..steps.len().min(self.config.sync_batch)];
        outcome.steps_run = scheduled.len();

        let scans = scheduled.iter().map(|step| {
            scan_step(
                &self.ledger,
                self.gateway.as_ref(),
                chain,
                step,
                &snapshot.scan_keys,
                cancel,
            )
        });
        for (step, result) in scheduled.iter().zip(futures::future::join_all(scans).await) {
            match result {
                Ok(scan) => outcome.records_found += scan.records_found,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::warn!(
                        chain,
                        start = step.start_block,
                        end = step.end_block,
                        "scan step failed: {err}"
                    );
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let completed = complete_records(
                &self.ledger,
                self.gateway.as_ref(),
                &self.vault,
                &self.programs,
                chain,
                self.config.completion_batch,
            )
            .await?;
            outcome.hydrated += completed.hydrated;
            if completed.hydrated == 0 {
                break;
            }
        }

        outcome.history_derived =
            derive_history(&self.ledger, self.gateway.as_ref(), chain, self.config.history_batch)
                .await?;

        let spent = track_spent(
            &self.ledger,
            self.gateway.as_ref(),
            chain,
            self.config.serial_page_size,
            cancel,
        )
        .await?;
        outcome.newly_spent = spent.newly_spent;

        if let Some(hook) = &self.hook {
            hook.after_sync(chain).await?;
        }

        for address in &addresses {
            self.ledger.upsert_public_sync(chain, address, height)?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RecordInfo;
    use crate::mock::MockGateway;
    use obscura_core::{PrivateKey, RecordCiphertext, RecordPlaintext, Seed};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHAIN: &str = "obscura-testnet";
    const PASSWORD: &str = "correct-horse-battery-staple-9";
    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    const CREDITS_SOURCE: &str = "\
program credits.obs;

record credits:
    owner as address.private;
    microcredits as u64.private;

function transfer_private:
    input r0 as credits.record;
";

    fn temp_vault() -> (tempfile::TempDir, Arc<Vault>) {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path().join("vault.json")).unwrap();
        vault.initialize(PASSWORD, Some(TEST_MNEMONIC)).unwrap();
        (dir, Arc::new(vault))
    }

    fn wallet_key() -> PrivateKey {
        let seed = Seed::from_mnemonic(TEST_MNEMONIC, "").unwrap();
        PrivateKey::derive(&seed, 0)
    }

    fn snapshot(key: &PrivateKey, from_genesis: bool) -> WalletSnapshot {
        WalletSnapshot {
            unlocked: true,
            scan_keys: vec![ScanKey::new(key.address(), key.view_key())],
            from_genesis,
        }
    }

    fn supervisor(
        ledger: Arc<Ledger>,
        gateway: Arc<MockGateway>,
        vault: Arc<Vault>,
        config: AutosyncConfig,
    ) -> Autosync {
        Autosync::new(ledger, gateway, vault, CHAIN, config)
    }

    /// Seal one record for the wallet's first account and stage both the
    /// scanner candidate and the completion payload for it.
    fn stage_owned_record(gateway: &MockGateway, key: &PrivateKey, start: u32, end: u32) {
        let plaintext = RecordPlaintext::new(&key.address(), 1_500_000).unwrap();
        let (ciphertext, tag) = RecordCiphertext::seal(&key.address(), &plaintext).unwrap();
        gateway.stage_candidate_pages(
            start,
            end,
            vec![vec![tag.into_candidate("otn1found", 0)]],
        );
        gateway.add_program("credits.obs", CREDITS_SOURCE);
        gateway.add_record(RecordInfo {
            transition_id: "otn1found".to_string(),
            output_index: 0,
            transaction_id: "at1found".to_string(),
            ciphertext: ciphertext.encode().unwrap(),
            program_id: "credits.obs".to_string(),
            function_name: "transfer_private".to_string(),
            block_height: start,
            block_timestamp: 1_700_000_000,
        });
    }

    #[tokio::test]
    async fn test_cycle_discovers_hydrates_and_bookkeeps() {
        let (_dir, vault) = temp_vault();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let gateway = Arc::new(MockGateway::new());
        let key = wallet_key();
        let address = key.address().encode().unwrap();

        gateway.set_height(99);
        stage_owned_record(&gateway, &key, 0, 100);

        let sync = supervisor(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            vault,
            AutosyncConfig::default(),
        );
        let outcome = sync
            .run_cycle(&snapshot(&key, true), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.height, 99);
        assert_eq!(outcome.steps_run, 1);
        assert_eq!(outcome.records_found, 1);
        assert_eq!(outcome.hydrated, 1);
        assert_eq!(outcome.history_derived, 1);
        assert_eq!(outcome.newly_spent, 0);

        let records = ledger.list_records(CHAIN, &address).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].microcredits, Some(1_500_000));
        assert!(records[0].serial_number.is_some());

        // Bootstrap, cycle bookkeeping and the spend-tracker reset all ran.
        assert_eq!(ledger.creation_height(CHAIN, &address).unwrap(), Some(0));
        assert_eq!(ledger.public_sync_height(CHAIN, &address).unwrap(), Some(99));
        assert_eq!(ledger.serial_sync_page(CHAIN).unwrap(), -1);
    }

    #[tokio::test]
    async fn test_supplied_seed_scans_from_current_height() {
        let (_dir, vault) = temp_vault();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let gateway = Arc::new(MockGateway::new());
        let key = wallet_key();
        let address = key.address().encode().unwrap();

        gateway.set_height(500);
        let sync = supervisor(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            vault,
            AutosyncConfig::default(),
        );
        sync.run_cycle(&snapshot(&key, false), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(ledger.creation_height(CHAIN, &address).unwrap(), Some(500));
        // Only the tip block needed scanning.
        assert_eq!(gateway.candidate_calls(), vec![(500, 501, 0)]);
    }

    #[tokio::test]
    async fn test_sync_batch_bounds_steps_per_cycle() {
        let (_dir, vault) = temp_vault();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let gateway = Arc::new(MockGateway::new());
        let key = wallet_key();

        gateway.set_height(4_999);
        let config = AutosyncConfig {
            sync_batch: 2,
            ..AutosyncConfig::default()
        };
        let sync = supervisor(Arc::clone(&ledger), Arc::clone(&gateway), vault, config);
        let outcome = sync
            .run_cycle(&snapshot(&key, true), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.steps_run, 2);
        let ranges: BTreeSet<(u32, u32)> = gateway
            .candidate_calls()
            .into_iter()
            .map(|(start, end, _)| (start, end))
            .collect();
        // The two most recent chunks of [0, 5000) ran; the rest stay pending.
        assert_eq!(
            ranges,
            BTreeSet::from([(4_000, 5_000), (3_000, 4_000)])
        );
    }

    struct CountingHook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CycleHook for CountingHook {
        async fn after_sync(&self, chain: &str) -> Result<()> {
            assert_eq!(chain, CHAIN);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hook_runs_once_per_cycle() {
        let (_dir, vault) = temp_vault();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let gateway = Arc::new(MockGateway::new());
        let key = wallet_key();
        gateway.set_height(9);

        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
        });
        let sync = supervisor(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            vault,
            AutosyncConfig::default(),
        )
        .with_hook(Arc::clone(&hook) as Arc<dyn CycleHook>);

        let snap = snapshot(&key, true);
        let cancel = CancelToken::new();
        sync.run_cycle(&snap, &cancel).await.unwrap();
        sync.run_cycle(&snap, &cancel).await.unwrap();

        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_locked_snapshot_touches_nothing() {
        let (_dir, vault) = temp_vault();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let gateway = Arc::new(MockGateway::new());
        gateway.set_height(99);

        let sync = Arc::new(supervisor(
            ledger,
            Arc::clone(&gateway),
            vault,
            AutosyncConfig::default(),
        ));
        let (_tx, rx) = watch::channel(WalletSnapshot::locked());
        let cancel = CancelToken::new();

        let task = {
            let sync = Arc::clone(&sync);
            let cancel = cancel.clone();
            tokio::spawn(async move { sync.run(rx, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(gateway.candidate_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unlock_snapshot_wakes_the_loop() {
        let (_dir, vault) = temp_vault();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let gateway = Arc::new(MockGateway::new());
        let key = wallet_key();
        gateway.set_height(99);

        let sync = Arc::new(supervisor(
            ledger,
            Arc::clone(&gateway),
            vault,
            AutosyncConfig {
                cycle_interval: Duration::from_secs(3600),
                ..AutosyncConfig::default()
            },
        ));
        let (tx, rx) = watch::channel(WalletSnapshot::locked());
        let cancel = CancelToken::new();

        let task = {
            let sync = Arc::clone(&sync);
            let cancel = cancel.clone();
            tokio::spawn(async move { sync.run(rx, cancel).await })
        };

        tx.send(snapshot(&key, true)).unwrap();
        let mut woke = false;
        for _ in 0..100 {
            if !gateway.candidate_calls().is_empty() {
                woke = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();
        assert!(woke, "unlock snapshot did not start a cycle");
    }
}

