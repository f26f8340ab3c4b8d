//! Transaction lifecycle management
//!
//! [`LifecycleManager`] owns everything between user intent and finality:
//! input selection, authorization, the queued → generating → broadcasting →
//! completed → finalized progression, delegated-prover reconciliation, and
//! the cancellation sweep that recovers stuck transactions. Input records
//! are locked in the same database transaction that persists the new
//! transaction, and every terminal status releases them again; the manager
//! never holds record state in memory.
//!
//! Maintenance entry points are re-run every sync cycle via [`CycleHook`],
//! so a transaction abandoned by a crash is picked up on the next cycle
//! from whatever status the ledger last recorded.

use crate::prover::ProverCache;
use crate::{Error, Result};
use async_trait::async_trait;
use obscura_core::{
    classify, Authorization, InputSelector, SelectableRecord, TransactionKind, TransactionStatus,
    TransitionStatus, CREDITS_PROGRAM,
};
use obscura_storage_sqlite::{Ledger, Transaction, Transition};
use obscura_sync::{ChainGateway, CycleHook, DelegatedState, DelegationRequest, ExecutionRequest};
use obscura_vault::Vault;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Function executing a private transfer on the credits program
const TRANSFER_FUNCTION: &str = "transfer_private";
/// Function paying the fee transition
const FEE_FUNCTION: &str = "fee_private";

/// Lifecycle tuning
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Gateway attempts per lifecycle operation
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_backoff: Duration,
    /// How long a transaction may sit in a processing status (or in
    /// `Completed`) before the sweep cancels it
    pub stuck_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            stuck_timeout: Duration::from_secs(900),
        }
    }
}

/// A user's private-transfer intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Chain id
    pub chain: String,
    /// Sending address, must be a vault account
    pub address: String,
    /// Recipient address
    pub recipient: String,
    /// Amount in microcredits
    pub amount: u64,
    /// Fee in microcredits
    pub fee: u64,
    /// Delegate proof generation to the remote prover
    #[serde(default)]
    pub delegated: bool,
    /// Generate without broadcasting
    #[serde(default)]
    pub only_execute: bool,
}

/// Drives transactions from creation to a terminal status
pub struct LifecycleManager {
    ledger: Arc<Ledger>,
    vault: Arc<Vault>,
    gateway: Arc<dyn ChainGateway>,
    prover: Arc<ProverCache>,
    config: LifecycleConfig,
    // Two concurrent sweeps could both see a record as orphaned and race
    // the unlock against a fresh lock.
    sweep_lock: Mutex<()>,
}

impl LifecycleManager {
    /// A manager over shared engine handles
    pub fn new(
        ledger: Arc<Ledger>,
        vault: Arc<Vault>,
        gateway: Arc<dyn ChainGateway>,
        prover: Arc<ProverCache>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            ledger,
            vault,
            gateway,
            prover,
            config,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Build, authorize and persist a private transfer.
    ///
    /// Transfer inputs are covered largest-first; the fee comes from the
    /// smallest remaining record that covers it. All selected inputs are
    /// locked atomically with the queued transaction row. On any failure
    /// nothing is persisted and nothing stays locked.
    pub fn create_transfer(&self, request: &TransferRequest) -> Result<Transaction> {
        if request.amount == 0 {
            return Err(Error::InvalidRequest("amount must be positive".to_string()));
        }

        let spendable = self
            .ledger
            .spendable_records(&request.chain, &request.address)?;
        let ciphertexts: HashMap<&str, &str> = spendable
            .iter()
            .map(|r| (r.id.as_str(), r.ciphertext.as_str()))
            .collect();
        let pool: Vec<SelectableRecord> = spendable
            .iter()
            .filter_map(|r| {
                r.microcredits
                    .map(|m| SelectableRecord::new(r.id.clone(), m, r.block_height))
            })
            .collect();

        let selection = InputSelector::select_covering(pool.clone(), request.amount)?;
        let fee_pool: Vec<SelectableRecord> = pool
            .into_iter()
            .filter(|r| !selection.records.iter().any(|s| s.id == r.id))
            .collect();
        let fee_record = InputSelector::select_fee(fee_pool, request.fee)?;

        let mut inputs: Vec<serde_json::Value> = selection
            .records
            .iter()
            .map(|r| serde_json::json!(ciphertexts[r.id.as_str()]))
            .collect();
        inputs.push(serde_json::json!(request.recipient));
        inputs.push(serde_json::json!(request.amount));
        let fee_inputs = vec![
            serde_json::json!(ciphertexts[fee_record.id.as_str()]),
            serde_json::json!(request.fee),
        ];

        let pair = self.vault.authorize(
            &request.address,
            CREDITS_PROGRAM,
            TRANSFER_FUNCTION,
            inputs.clone(),
            fee_inputs.clone(),
        )?;

        let mut main = Transition::new(
            CREDITS_PROGRAM,
            TRANSFER_FUNCTION,
            serde_json::to_string(&inputs).map_err(obscura_core::Error::from)?,
            false,
        );
        main.input_record_ids = selection.records.iter().map(|r| r.id.clone()).collect();
        let mut fee = Transition::new(
            CREDITS_PROGRAM,
            FEE_FUNCTION,
            serde_json::to_string(&fee_inputs).map_err(obscura_core::Error::from)?,
            true,
        );
        fee.input_record_ids = vec![fee_record.id.clone()];

        let mut transaction = Transaction::new(
            &request.chain,
            &request.address,
            TransactionKind::Execute,
            classify(CREDITS_PROGRAM, TRANSFER_FUNCTION, true),
            request.fee,
        );
        transaction.authorization = Some(pair.authorization.to_json()?);
        transaction.fee_authorization = Some(pair.fee_authorization.to_json()?);
        transaction.delegated = request.delegated;
        transaction.only_execute = request.only_execute;
        transaction.transition_ids = vec![main.id.clone(), fee.id.clone()];

        self.ledger
            .insert_transaction_with_locks(&transaction, &[main, fee])?;
        tracing::info!(
            transaction_id = %transaction.id,
            amount = request.amount,
            fee = request.fee,
            inputs = selection.records.len() + 1,
            change = selection.change,
            delegated = request.delegated,
            "transfer queued"
        );
        Ok(self.ledger.get_transaction(&transaction.id)?)
    }

    /// Process every queued transaction, one at a time.
    ///
    /// Per-transaction failures are logged; one bad transaction never
    /// blocks the rest of the queue.
    pub async fn process_queued(&self, chain: &str) -> Result<usize> {
        let queued = self.ledger.queued_transactions(chain)?;
        let mut processed = 0;
        for transaction in queued {
            match self.process_one(&transaction).await {
                Ok(()) => processed += 1,
                Err(err) => {
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        "transaction processing failed: {err}"
                    );
                }
            }
        }
        Ok(processed)
    }

    async fn process_one(&self, transaction: &Transaction) -> Result<()> {
        let authorization = Authorization::from_json(
            transaction.authorization.as_deref().ok_or_else(|| {
                Error::InvalidState(format!("transaction {} has no authorization", transaction.id))
            })?,
        )?;
        let fee_authorization = transaction
            .fee_authorization
            .as_deref()
            .map(Authorization::from_json)
            .transpose()?;

        let transitions: Vec<Transition> = transaction
            .transition_ids
            .iter()
            .map(|id| self.ledger.get_transition(id))
            .collect::<obscura_storage_sqlite::Result<_>>()?;

        if transaction.delegated {
            return self
                .process_delegated(transaction, &transitions, authorization, fee_authorization)
                .await;
        }

        self.ledger
            .update_transaction_status(&transaction.id, TransactionStatus::DownloadingProverFiles)?;
        let functions: Vec<&str> = transitions
            .iter()
            .map(|t| t.function_name.as_str())
            .collect();
        if let Err(err) = self.prover.ensure_artifacts(&functions).await {
            self.fail(transaction, &transitions, TransactionStatus::Failed)?;
            return Err(err);
        }

        self.ledger
            .update_transaction_status(&transaction.id, transaction.kind.generating_status())?;
        for transition in &transitions {
            self.ledger
                .update_transition_status(&transition.id, TransitionStatus::Generating)?;
        }

        let chain = transaction.chain.as_str();
        let program_id = authorization.program_id.clone();
        let program = match self
            .with_retry(|| self.gateway.get_program(chain, &program_id))
            .await
        {
            Ok(source) => source,
            Err(err) => {
                self.fail(transaction, &transitions, TransactionStatus::Failed)?;
                return Err(err.into());
            }
        };
        let request = ExecutionRequest {
            function_name: authorization.function_name.clone(),
            authorization,
            fee_authorization,
            program,
            imports: BTreeMap::new(),
        };
        let response = match self
            .with_retry(|| self.gateway.execute_authorization(chain, &request))
            .await
        {
            Ok(response) => response,
            Err(obscura_sync::Error::Rejected(reason)) => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    reason,
                    "execution rejected by gateway"
                );
                self.fail(transaction, &transitions, TransactionStatus::Rejected)?;
                return Ok(());
            }
            Err(err) => {
                self.fail(transaction, &transitions, TransactionStatus::Failed)?;
                return Err(err.into());
            }
        };

        for (local, chain_id) in transaction
            .transition_ids
            .iter()
            .zip(&response.transition_ids)
        {
            self.ledger.set_chain_transition_id(local, chain_id)?;
        }
        for transition in &transitions {
            self.ledger
                .update_transition_status(&transition.id, TransitionStatus::Completed)?;
        }

        if transaction.only_execute {
            self.ledger
                .update_transaction_status(&transaction.id, TransactionStatus::Finalized)?;
            tracing::info!(transaction_id = %transaction.id, "generated without broadcast");
            return Ok(());
        }

        self.ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Broadcasting)?;
        let chain_transaction_id = match self
            .with_retry(|| self.gateway.broadcast_transaction(chain, &response.transaction))
            .await
        {
            Ok(id) => id,
            Err(obscura_sync::Error::Rejected(reason)) => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    reason,
                    "broadcast rejected by chain"
                );
                self.ledger
                    .update_transaction_status(&transaction.id, TransactionStatus::Rejected)?;
                return Ok(());
            }
            Err(err) => {
                self.ledger
                    .update_transaction_status(&transaction.id, TransactionStatus::Failed)?;
                return Err(err.into());
            }
        };

        self.ledger
            .set_chain_transaction_id(&transaction.id, &chain_transaction_id)?;
        self.ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Completed)?;
        tracing::info!(
            transaction_id = %transaction.id,
            chain_transaction_id = %chain_transaction_id,
            "transaction broadcast"
        );
        Ok(())
    }

    /// Hand the authorization pair to the remote prover. The transaction
    /// completes as soon as the request id is stored; reconciliation fills
    /// the chain transaction id later.
    async fn process_delegated(
        &self,
        transaction: &Transaction,
        transitions: &[Transition],
        authorization: Authorization,
        fee_authorization: Option<Authorization>,
    ) -> Result<()> {
        self.ledger
            .update_transaction_status(&transaction.id, transaction.kind.generating_status())?;

        let request = DelegationRequest {
            authorization,
            fee_authorization,
            broadcast: !transaction.only_execute,
        };
        let chain = transaction.chain.as_str();
        let request_id = match self
            .with_retry(|| self.gateway.delegate_transaction(chain, &request))
            .await
        {
            Ok(id) => id,
            Err(obscura_sync::Error::Rejected(reason)) => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    reason,
                    "delegation rejected by prover"
                );
                self.fail(transaction, transitions, TransactionStatus::Rejected)?;
                return Ok(());
            }
            Err(err) => {
                self.fail(transaction, transitions, TransactionStatus::Failed)?;
                return Err(err.into());
            }
        };

        self.ledger
            .set_delegation_request_id(&transaction.id, &request_id)?;
        self.ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Completed)?;
        for transition in transitions {
            self.ledger
                .update_transition_status(&transition.id, TransitionStatus::Completed)?;
        }
        tracing::info!(
            transaction_id = %transaction.id,
            request_id = %request_id,
            "delegated to remote prover"
        );
        Ok(())
    }

    /// Poll delegated transactions that have no chain transaction id yet.
    ///
    /// Returns how many gained one. Remote failures cancel the transaction;
    /// pending and proving requests are left for the next cycle.
    pub async fn reconcile_delegated(&self, chain: &str) -> Result<usize> {
        let pending = self.ledger.unreconciled_delegated_transactions(chain)?;
        let mut reconciled = 0;
        for transaction in pending {
            let Some(request_id) = transaction.delegation_request_id.as_deref() else {
                continue;
            };
            let status = match self.gateway.get_delegated_transaction(chain, request_id).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        "delegation poll failed: {err}"
                    );
                    continue;
                }
            };
            match status.state {
                DelegatedState::Completed => {
                    if let Some(chain_id) = status.transaction_id.as_deref() {
                        self.ledger
                            .set_chain_transaction_id(&transaction.id, chain_id)?;
                        reconciled += 1;
                    }
                }
                DelegatedState::Failed => {
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        error = status.error.as_deref().unwrap_or("unknown"),
                        "delegated proving failed remotely"
                    );
                    self.ledger.cancel_transaction(&transaction.id)?;
                }
                DelegatedState::Pending | DelegatedState::Proving => {}
            }
        }
        Ok(reconciled)
    }

    /// Finalize completed transactions whose inputs are all spent on chain.
    ///
    /// The spend evidence comes from the spent tracker, so this runs after
    /// it in the cycle. Transactions with no tracked inputs never finalize
    /// this way; the sweep times them out instead.
    pub fn finalize_completed(&self, chain: &str) -> Result<usize> {
        let mut finalized = 0;
        for transaction in self.ledger.inflight_transactions(chain)? {
            if transaction.status != TransactionStatus::Completed {
                continue;
            }
            if self.ledger.transaction_inputs_all_spent(&transaction.id)? {
                self.ledger
                    .update_transaction_status(&transaction.id, TransactionStatus::Finalized)?;
                tracing::info!(transaction_id = %transaction.id, "transaction finalized");
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    /// Cancel transactions stuck past the timeout and release orphaned
    /// record locks. Returns how many transactions were cancelled.
    pub async fn sweep(&self, chain: &str) -> Result<usize> {
        let _guard = self.sweep_lock.lock().await;

        let cutoff = chrono::Utc::now().timestamp() - self.config.stuck_timeout.as_secs() as i64;
        let stuck = self.ledger.stuck_transactions(chain, cutoff)?;
        let cancelled = stuck.len();
        for transaction in stuck {
            tracing::warn!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "cancelling stuck transaction"
            );
            self.ledger.cancel_transaction(&transaction.id)?;
        }

        let unlocked = self.ledger.unlock_orphaned_records(chain)?;
        if unlocked > 0 {
            tracing::warn!(unlocked, "released orphaned record locks");
        }
        Ok(cancelled)
    }

    /// Run the full maintenance pass: queue processing, delegation
    /// reconciliation, finalization, then the sweep.
    pub async fn run_maintenance(&self, chain: &str) -> Result<()> {
        self.process_queued(chain).await?;
        self.reconcile_delegated(chain).await?;
        self.finalize_completed(chain)?;
        self.sweep(chain).await?;
        Ok(())
    }

    fn fail(
        &self,
        transaction: &Transaction,
        transitions: &[Transition],
        status: TransactionStatus,
    ) -> Result<()> {
        self.ledger
            .update_transaction_status(&transaction.id, status)?;
        for transition in transitions {
            self.ledger
                .update_transition_status(&transition.id, TransitionStatus::Failed)?;
        }
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> obscura_sync::Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = obscura_sync::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    tracing::debug!(attempt, "retrying transient gateway failure: {err}");
                    tokio::time::sleep(self.config.retry_backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl CycleHook for LifecycleManager {
    async fn after_sync(&self, chain: &str) -> obscura_sync::Result<()> {
        self.run_maintenance(chain)
            .await
            .map_err(|err| obscura_sync::Error::Sync(err.to_string()))
    }
}
