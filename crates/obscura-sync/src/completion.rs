//! Record completion
//!
//! The scanner only asserts ownership; completion turns those assertions
//! into usable records. For each unsynced owned record it fetches the
//! chain payload, decrypts the ciphertext through the vault, matches the
//! plaintext against the program's record types, derives the serial number
//! and persists the hydrated row. Failures are per record: one bad payload
//! is logged and skipped, the rest of the batch proceeds.
//!
//! A second pass derives wallet-local history for records that arrived
//! from chain scanning rather than from transactions this wallet built,
//! so received transfers show up in listings.

use crate::gateway::{ChainGateway, RecordInfo};
use crate::{Error, Result};
use obscura_core::{
    classify, record_id, Program, RecordCiphertext, TransactionKind, TransactionStatus,
    TransitionStatus,
};
use obscura_storage_sqlite::{Ledger, OwnedRecord, Record, Transaction, Transition};
use obscura_vault::Vault;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Program sources fetched once per id and parsed for their record types
#[derive(Default)]
pub struct ProgramCache {
    programs: Mutex<HashMap<String, Arc<Program>>>,
}

impl ProgramCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached program, fetching and parsing on first use
    pub async fn get(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        program_id: &str,
    ) -> Result<Arc<Program>> {
        if let Some(program) = self.programs.lock().get(program_id) {
            return Ok(Arc::clone(program));
        }
        let source = gateway.get_program(chain, program_id).await?;
        let program = Arc::new(Program::parse(&source)?);
        let mut programs = self.programs.lock();
        Ok(Arc::clone(
            programs
                .entry(program_id.to_string())
                .or_insert(program),
        ))
    }

    /// Number of cached programs
    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }
}

/// What one completion pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// Owned records hydrated into full records
    pub hydrated: usize,
    /// Owned records skipped after an individual failure
    pub skipped: usize,
}

/// Hydrate a batch of unsynced owned records.
pub async fn complete_records(
    ledger: &Ledger,
    gateway: &dyn ChainGateway,
    vault: &Vault,
    cache: &ProgramCache,
    chain: &str,
    limit: u32,
) -> Result<CompletionOutcome> {
    let owned = ledger.unsynced_owned_records(chain, limit)?;
    if owned.is_empty() {
        return Ok(CompletionOutcome::default());
    }

    let keys: Vec<(String, u32)> = owned
        .iter()
        .map(|o| (o.transition_id.clone(), o.output_index))
        .collect();
    let infos = index_by_key(gateway.get_records_by_transition(chain, &keys).await?);

    let mut outcome = CompletionOutcome::default();
    for owned_record in owned {
        match hydrate_one(ledger, gateway, vault, cache, chain, &owned_record, &infos).await {
            Ok(()) => outcome.hydrated += 1,
            Err(err) => {
                outcome.skipped += 1;
                tracing::warn!(
                    transition_id = %owned_record.transition_id,
                    output_index = owned_record.output_index,
                    "record completion skipped: {err}"
                );
            }
        }
    }
    Ok(outcome)
}

async fn hydrate_one(
    ledger: &Ledger,
    gateway: &dyn ChainGateway,
    vault: &Vault,
    cache: &ProgramCache,
    chain: &str,
    owned: &OwnedRecord,
    infos: &HashMap<(String, u32), RecordInfo>,
) -> Result<()> {
    let key = (owned.transition_id.clone(), owned.output_index);
    let info = infos.get(&key).ok_or_else(|| {
        Error::Sync(format!(
            "no chain payload for {}#{}",
            owned.transition_id, owned.output_index
        ))
    })?;

    let program = cache.get(gateway, chain, &info.program_id).await?;
    let ciphertext = RecordCiphertext::from_encoded(&info.ciphertext)?;
    let plaintext = vault.decrypt_record(&owned.address, &ciphertext)?;
    let record_type = program.matching_record_type(&plaintext).ok_or_else(|| {
        Error::Sync(format!(
            "no record type in {} matches the plaintext",
            program.id
        ))
    })?;
    let serial_number = vault.record_serial_number(
        &owned.address,
        &info.program_id,
        &record_type.name,
        &plaintext,
    )?;

    let record = Record {
        id: record_id(chain, &info.transition_id, info.output_index, &ciphertext),
        chain: chain.to_string(),
        address: owned.address.clone(),
        program_id: info.program_id.clone(),
        ciphertext: info.ciphertext.clone(),
        microcredits: plaintext.microcredits().ok(),
        block_height: info.block_height,
        transaction_id: info.transaction_id.clone(),
        transition_id: info.transition_id.clone(),
        output_index: info.output_index,
        timestamp: info.block_timestamp,
        spent_block_height: None,
        spent_transaction_id: None,
        spent_transition_id: None,
        spent_timestamp: None,
        serial_number: Some(serial_number),
        spent: false,
        locked: false,
        locally_synced_transactions: false,
    };
    ledger.insert_record(&record)?;

    let owned_id = owned
        .id
        .ok_or_else(|| Error::Sync("owned record has no row id".to_string()))?;
    ledger.mark_owned_record_synced(owned_id)?;
    Ok(())
}

/// Derive local history rows for hydrated records whose creating transaction
/// is unknown to the ledger. Records created by this wallet's own
/// transactions are only flagged; the lifecycle already recorded those.
pub async fn derive_history(
    ledger: &Ledger,
    gateway: &dyn ChainGateway,
    chain: &str,
    limit: u32,
) -> Result<usize> {
    let pending = ledger.records_pending_history(chain, limit)?;
    if pending.is_empty() {
        return Ok(0);
    }

    let keys: Vec<(String, u32)> = pending
        .iter()
        .map(|r| (r.transition_id.clone(), r.output_index))
        .collect();
    let infos = index_by_key(gateway.get_records_by_transition(chain, &keys).await?);

    let mut derived = 0;
    for record in pending {
        if ledger
            .find_transaction_by_chain_id(&record.transaction_id)?
            .is_some()
        {
            ledger.mark_locally_synced(&record.id)?;
            continue;
        }

        let key = (record.transition_id.clone(), record.output_index);
        let Some(info) = infos.get(&key) else {
            tracing::debug!(record_id = %record.id, "no chain payload for history, deferring");
            continue;
        };

        let mut transition =
            Transition::new(&info.program_id, &info.function_name, "[]", false);
        transition.chain_transition_id = Some(info.transition_id.clone());
        transition.status = TransitionStatus::Completed;
        transition.output_record_ids = vec![record.id.clone()];

        let mut transaction = Transaction::new(
            chain,
            &record.address,
            TransactionKind::Execute,
            classify(&info.program_id, &info.function_name, true),
            0,
        );
        transaction.chain_transaction_id = Some(info.transaction_id.clone());
        transaction.status = TransactionStatus::Finalized;
        transaction.created_at = info.block_timestamp;
        transaction.finalized_at = Some(info.block_timestamp);
        transaction.transition_ids = vec![transition.id.clone()];

        ledger.insert_transaction(&transaction, &[transition])?;
        ledger.mark_locally_synced(&record.id)?;
        derived += 1;
    }
    Ok(derived)
}

fn index_by_key(infos: Vec<RecordInfo>) -> HashMap<(String, u32), RecordInfo> {
    infos
        .into_iter()
        .map(|info| ((info.transition_id.clone(), info.output_index), info))
        .collect()
}
