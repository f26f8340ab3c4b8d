//! Transaction and transition storage
//!
//! Record locks are taken in the same database transaction that persists a
//! new wallet transaction, and released in the same database transaction
//! that moves it to a terminal status. There is no separate lock manager:
//! a record is locked exactly while some non-terminal transaction references
//! it as an input.

use crate::models::{Transaction, Transition};
use crate::{Error, Ledger, Result};
use obscura_core::{TransactionStatus, TransitionStatus};
use rusqlite::{params, OptionalExtension};

const TRANSACTION_COLUMNS: &str =
    "id, chain_transaction_id, chain, address, kind, fee, authorization_json, \
     fee_authorization_json, delegated, delegation_request_id, only_execute, \
     display_kind, status, created_at, processing_started_at, finalized_at";

const TRANSITION_COLUMNS: &str =
    "id, chain_transition_id, program_id, function_name, inputs_json, status, is_fee";

fn parse_col<T>(idx: usize, parsed: obscura_core::Result<T>) -> rusqlite::Result<T> {
    parsed.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn transaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(4)?;
    let display_kind: String = row.get(11)?;
    let status: String = row.get(12)?;
    Ok(Transaction {
        id: row.get(0)?,
        chain_transaction_id: row.get(1)?,
        chain: row.get(2)?,
        address: row.get(3)?,
        kind: parse_col(4, obscura_core::TransactionKind::parse(&kind))?,
        fee: row.get::<_, i64>(5)? as u64,
        authorization: row.get(6)?,
        fee_authorization: row.get(7)?,
        delegated: row.get(8)?,
        delegation_request_id: row.get(9)?,
        only_execute: row.get(10)?,
        display_kind: parse_col(11, obscura_core::DisplayKind::parse(&display_kind))?,
        status: parse_col(12, TransactionStatus::parse(&status))?,
        created_at: row.get(13)?,
        processing_started_at: row.get(14)?,
        finalized_at: row.get(15)?,
        transition_ids: Vec::new(),
    })
}

fn transition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transition> {
    let status: String = row.get(5)?;
    Ok(Transition {
        id: row.get(0)?,
        chain_transition_id: row.get(1)?,
        program_id: row.get(2)?,
        function_name: row.get(3)?,
        inputs_json: row.get(4)?,
        status: parse_col(5, TransitionStatus::parse(&status))?,
        is_fee: row.get(6)?,
        input_record_ids: Vec::new(),
        output_record_ids: Vec::new(),
    })
}

fn transition_ids_for(
    conn: &rusqlite::Connection,
    transaction_id: &str,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT transition_id FROM transaction_transitions \
         WHERE transaction_id = ?1 ORDER BY position",
    )?;
    let ids = stmt
        .query_map(params![transaction_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn record_ids_for(
    conn: &rusqlite::Connection,
    join_table: &str,
    transition_id: &str,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT record_id FROM {join_table} WHERE transition_id = ?1 ORDER BY position"
    ))?;
    let ids = stmt
        .query_map(params![transition_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn hydrate_transitions(
    conn: &rusqlite::Connection,
    transactions: &mut [Transaction],
) -> Result<()> {
    for transaction in transactions.iter_mut() {
        transaction.transition_ids = transition_ids_for(conn, &transaction.id)?;
    }
    Ok(())
}

fn lock_input_record(tx: &rusqlite::Transaction<'_>, record_id: &str) -> Result<()> {
    let changed = tx.execute(
        "UPDATE records SET locked = 1 WHERE id = ?1 AND spent = 0 AND locked = 0",
        params![record_id],
    )?;
    if changed != 1 {
        return Err(Error::DataIntegrity(format!(
            "input record {record_id} is spent, locked or missing"
        )));
    }
    Ok(())
}

fn insert_transaction_row(
    tx: &rusqlite::Transaction<'_>,
    transaction: &Transaction,
) -> Result<()> {
    tx.execute(
        "INSERT INTO transactions (id, chain_transaction_id, chain, address, kind, fee, \
         authorization_json, fee_authorization_json, delegated, delegation_request_id, \
         only_execute, display_kind, status, created_at, processing_started_at, finalized_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            transaction.id,
            transaction.chain_transaction_id,
            transaction.chain,
            transaction.address,
            transaction.kind.as_str(),
            transaction.fee as i64,
            transaction.authorization,
            transaction.fee_authorization,
            transaction.delegated,
            transaction.delegation_request_id,
            transaction.only_execute,
            transaction.display_kind.as_str(),
            transaction.status.as_str(),
            transaction.created_at,
            transaction.processing_started_at,
            transaction.finalized_at,
        ],
    )?;
    Ok(())
}

fn insert_transition_rows(
    tx: &rusqlite::Transaction<'_>,
    transition: &Transition,
) -> Result<()> {
    tx.execute(
        "INSERT INTO transitions (id, chain_transition_id, program_id, function_name, \
         inputs_json, status, is_fee) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            transition.id,
            transition.chain_transition_id,
            transition.program_id,
            transition.function_name,
            transition.inputs_json,
            transition.status.as_str(),
            transition.is_fee,
        ],
    )?;
    for (position, record_id) in transition.input_record_ids.iter().enumerate() {
        tx.execute(
            "INSERT INTO transition_input_records (transition_id, record_id, position) \
             VALUES (?1, ?2, ?3)",
            params![transition.id, record_id, position as i64],
        )?;
    }
    for (position, record_id) in transition.output_record_ids.iter().enumerate() {
        tx.execute(
            "INSERT INTO transition_output_records (transition_id, record_id, position) \
             VALUES (?1, ?2, ?3)",
            params![transition.id, record_id, position as i64],
        )?;
    }
    Ok(())
}

fn link_transitions(
    tx: &rusqlite::Transaction<'_>,
    transaction_id: &str,
    transitions: &[Transition],
) -> Result<()> {
    for (position, transition) in transitions.iter().enumerate() {
        tx.execute(
            "INSERT INTO transaction_transitions (transaction_id, transition_id, position) \
             VALUES (?1, ?2, ?3)",
            params![transaction_id, transition.id, position as i64],
        )?;
    }
    Ok(())
}

fn unlock_transaction_inputs(
    tx: &rusqlite::Transaction<'_>,
    transaction_id: &str,
) -> Result<usize> {
    let unlocked = tx.execute(
        "UPDATE records SET locked = 0 WHERE id IN ( \
             SELECT tir.record_id FROM transition_input_records tir \
             JOIN transaction_transitions tt ON tt.transition_id = tir.transition_id \
             WHERE tt.transaction_id = ?1)",
        params![transaction_id],
    )?;
    Ok(unlocked)
}

fn stored_status(conn: &rusqlite::Connection, transaction_id: &str) -> Result<TransactionStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM transactions WHERE id = ?1",
            params![transaction_id],
            |row| row.get(0),
        )
        .optional()?;
    match status {
        Some(s) => Ok(TransactionStatus::parse(&s)?),
        None => Err(Error::NotFound(format!("transaction {transaction_id}"))),
    }
}

impl Ledger {
    /// Persist a new transaction with its transitions and lock every input
    /// record, all in one database transaction.
    ///
    /// If any input is already spent, already locked or unknown, nothing is
    /// persisted and no lock is taken.
    pub fn insert_transaction_with_locks(
        &self,
        transaction: &Transaction,
        transitions: &[Transition],
    ) -> Result<()> {
        let mut db = self.lock();
        let tx = db.transaction()?;

        for transition in transitions {
            for record_id in &transition.input_record_ids {
                lock_input_record(&tx, record_id)?;
            }
        }
        insert_transaction_row(&tx, transaction)?;
        for transition in transitions {
            insert_transition_rows(&tx, transition)?;
        }
        link_transitions(&tx, &transaction.id, transitions)?;

        tx.commit()?;
        tracing::debug!(
            transaction_id = %transaction.id,
            transitions = transitions.len(),
            "persisted transaction"
        );
        Ok(())
    }

    /// Persist a transaction without touching record locks.
    ///
    /// Used for history rows derived from chain data, where the inputs were
    /// already spent on chain.
    pub fn insert_transaction(
        &self,
        transaction: &Transaction,
        transitions: &[Transition],
    ) -> Result<()> {
        let mut db = self.lock();
        let tx = db.transaction()?;

        insert_transaction_row(&tx, transaction)?;
        for transition in transitions {
            insert_transition_rows(&tx, transition)?;
        }
        link_transitions(&tx, &transaction.id, transitions)?;

        tx.commit()?;
        Ok(())
    }

    /// Move a transaction to `next`.
    ///
    /// Stamps `processing_started_at` on the first processing status and
    /// `finalized_at` on finality. Entering any terminal status releases the
    /// transaction's input locks. Moving out of a terminal status is refused.
    pub fn update_transaction_status(&self, id: &str, next: TransactionStatus) -> Result<()> {
        let mut db = self.lock();
        let tx = db.transaction()?;

        let current = stored_status(&tx, id)?;
        if current.is_terminal() {
            return Err(Error::DataIntegrity(format!(
                "transaction {id} is already {current}, cannot move to {next}"
            )));
        }
        if !current.can_transition_to(next) {
            tracing::warn!(
                transaction_id = id,
                from = current.as_str(),
                to = next.as_str(),
                "irregular status transition"
            );
        }

        let now = chrono::Utc::now().timestamp();
        tx.execute(
            "UPDATE transactions SET status = ?2 WHERE id = ?1",
            params![id, next.as_str()],
        )?;
        if next.is_processing() {
            // Keep the first stamp; retries must not reset the stuck timer.
            tx.execute(
                "UPDATE transactions SET processing_started_at = ?2 \
                 WHERE id = ?1 AND processing_started_at IS NULL",
                params![id, now],
            )?;
        }
        if next == TransactionStatus::Finalized {
            tx.execute(
                "UPDATE transactions SET finalized_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }
        if next.is_terminal() {
            unlock_transaction_inputs(&tx, id)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fail a transaction, fail all its transitions and release its input
    /// locks. Refused if the transaction is already terminal.
    pub fn cancel_transaction(&self, id: &str) -> Result<()> {
        let mut db = self.lock();
        let tx = db.transaction()?;

        let current = stored_status(&tx, id)?;
        if current.is_terminal() {
            return Err(Error::DataIntegrity(format!(
                "transaction {id} is already {current}, cannot cancel"
            )));
        }

        tx.execute(
            "UPDATE transactions SET status = 'failed' WHERE id = ?1",
            params![id],
        )?;
        tx.execute(
            "UPDATE transitions SET status = 'failed' WHERE id IN ( \
                 SELECT transition_id FROM transaction_transitions WHERE transaction_id = ?1)",
            params![id],
        )?;
        let unlocked = unlock_transaction_inputs(&tx, id)?;

        tx.commit()?;
        tracing::info!(
            transaction_id = id,
            from = current.as_str(),
            unlocked,
            "cancelled transaction"
        );
        Ok(())
    }

    /// Fetch a transaction with its ordered transition ids
    pub fn get_transaction(&self, id: &str) -> Result<Transaction> {
        let db = self.lock();
        let mut transaction = db
            .conn()
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
                params![id],
                transaction_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;
        transaction.transition_ids = transition_ids_for(db.conn(), &transaction.id)?;
        Ok(transaction)
    }

    /// Local id of the transaction with this chain-assigned id, if any.
    ///
    /// History derivation uses this to recognise the wallet's own transfers
    /// and avoid duplicating them from chain data.
    pub fn find_transaction_by_chain_id(
        &self,
        chain_transaction_id: &str,
    ) -> Result<Option<String>> {
        let id = self
            .lock()
            .conn()
            .query_row(
                "SELECT id FROM transactions WHERE chain_transaction_id = ?1",
                params![chain_transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Most recent transactions for one (chain, address)
    pub fn list_transactions(
        &self,
        chain: &str,
        address: &str,
        limit: u32,
    ) -> Result<Vec<Transaction>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE chain = ?1 AND address = ?2 \
             ORDER BY created_at DESC, id DESC LIMIT ?3"
        ))?;
        let mut transactions = stmt
            .query_map(params![chain, address, limit], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        hydrate_transitions(db.conn(), &mut transactions)?;
        Ok(transactions)
    }

    /// Queued transactions in submission order
    pub fn queued_transactions(&self, chain: &str) -> Result<Vec<Transaction>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE chain = ?1 AND status = 'queued' \
             ORDER BY created_at ASC, id ASC"
        ))?;
        let mut transactions = stmt
            .query_map(params![chain], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        hydrate_transitions(db.conn(), &mut transactions)?;
        Ok(transactions)
    }

    /// Every transaction that has not reached a terminal status
    pub fn inflight_transactions(&self, chain: &str) -> Result<Vec<Transaction>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE chain = ?1 AND status NOT IN ('finalized', 'rejected', 'failed') \
             ORDER BY created_at ASC, id ASC"
        ))?;
        let mut transactions = stmt
            .query_map(params![chain], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        hydrate_transitions(db.conn(), &mut transactions)?;
        Ok(transactions)
    }

    /// Transactions that entered processing before `cutoff` and never left
    /// it, including delegated ones parked at `completed`
    pub fn stuck_transactions(&self, chain: &str, cutoff: i64) -> Result<Vec<Transaction>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE chain = ?1 \
               AND processing_started_at IS NOT NULL AND processing_started_at < ?2 \
               AND status IN ('downloading_prover_files', 'generating_transaction', \
                              'generating_deployment', 'broadcasting', 'completed') \
             ORDER BY processing_started_at ASC"
        ))?;
        let mut transactions = stmt
            .query_map(params![chain, cutoff], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        hydrate_transitions(db.conn(), &mut transactions)?;
        Ok(transactions)
    }

    /// Delegated transactions whose chain transaction id is still unknown
    pub fn unreconciled_delegated_transactions(&self, chain: &str) -> Result<Vec<Transaction>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE chain = ?1 AND delegated = 1 AND status = 'completed' \
               AND chain_transaction_id IS NULL \
             ORDER BY created_at ASC, id ASC"
        ))?;
        let mut transactions = stmt
            .query_map(params![chain], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        hydrate_transitions(db.conn(), &mut transactions)?;
        Ok(transactions)
    }

    /// Attach the chain-assigned transaction id once it is known
    pub fn set_chain_transaction_id(&self, id: &str, chain_transaction_id: &str) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE transactions SET chain_transaction_id = ?2 WHERE id = ?1",
            params![id, chain_transaction_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("transaction {id}")));
        }
        Ok(())
    }

    /// Attach the prover's request id for a delegated transaction
    pub fn set_delegation_request_id(&self, id: &str, request_id: &str) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE transactions SET delegation_request_id = ?2 WHERE id = ?1",
            params![id, request_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("transaction {id}")));
        }
        Ok(())
    }

    /// Fetch a transition with its ordered input and output record ids
    pub fn get_transition(&self, id: &str) -> Result<Transition> {
        let db = self.lock();
        let mut transition = db
            .conn()
            .query_row(
                &format!("SELECT {TRANSITION_COLUMNS} FROM transitions WHERE id = ?1"),
                params![id],
                transition_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("transition {id}")))?;
        transition.input_record_ids =
            record_ids_for(db.conn(), "transition_input_records", id)?;
        transition.output_record_ids =
            record_ids_for(db.conn(), "transition_output_records", id)?;
        Ok(transition)
    }

    /// Update one transition's status
    pub fn update_transition_status(&self, id: &str, status: TransitionStatus) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE transitions SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("transition {id}")));
        }
        Ok(())
    }

    /// Attach the chain-assigned transition id once it is known
    pub fn set_chain_transition_id(&self, id: &str, chain_transition_id: &str) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE transitions SET chain_transition_id = ?2 WHERE id = ?1",
            params![id, chain_transition_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("transition {id}")));
        }
        Ok(())
    }

    /// Input record ids of a transaction across all its transitions, in
    /// transition then input order
    pub fn input_record_ids(&self, transaction_id: &str) -> Result<Vec<String>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(
            "SELECT tir.record_id FROM transition_input_records tir \
             JOIN transaction_transitions tt ON tt.transition_id = tir.transition_id \
             WHERE tt.transaction_id = ?1 \
             ORDER BY tt.position, tir.position",
        )?;
        let ids = stmt
            .query_map(params![transaction_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Whether every input record of a transaction is marked spent.
    ///
    /// This is the finality signal for broadcast transactions: once the spent
    /// tracker sees all inputs consumed on chain, the transaction is final.
    /// Returns false for transactions with no record inputs.
    pub fn transaction_inputs_all_spent(&self, transaction_id: &str) -> Result<bool> {
        let (total, unspent): (i64, i64) = self.lock().conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN r.spent = 0 THEN 1 ELSE 0 END), 0) \
             FROM transition_input_records tir \
             JOIN transaction_transitions tt ON tt.transition_id = tir.transition_id \
             JOIN records r ON r.id = tir.record_id \
             WHERE tt.transaction_id = ?1",
            params![transaction_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(total > 0 && unspent == 0)
    }

    /// Release locks held by no non-terminal transaction.
    ///
    /// A crash between taking locks and persisting a status change can leave
    /// records locked forever; the cancellation sweep calls this to recover.
    pub fn unlock_orphaned_records(&self, chain: &str) -> Result<usize> {
        let unlocked = self.lock().conn().execute(
            "UPDATE records SET locked = 0 WHERE chain = ?1 AND locked = 1 AND id NOT IN ( \
                 SELECT tir.record_id FROM transition_input_records tir \
                 JOIN transaction_transitions tt ON tt.transition_id = tir.transition_id \
                 JOIN transactions t ON t.id = tt.transaction_id \
                 WHERE t.status NOT IN ('finalized', 'rejected', 'failed'))",
            params![chain],
        )?;
        if unlocked > 0 {
            tracing::warn!(chain, unlocked, "released orphaned record locks");
        }
        Ok(unlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use obscura_core::{DisplayKind, TransactionKind};
    use rusqlite::params;

    const CHAIN: &str = "obscura-testnet";
    const ADDRESS: &str = "obsc1alice";

    fn test_ledger() -> Ledger {
        Ledger::open_in_memory().unwrap()
    }

    fn sample_record(id: &str, microcredits: u64) -> Record {
        Record {
            id: id.to_string(),
            chain: CHAIN.to_string(),
            address: ADDRESS.to_string(),
            program_id: "credits.obs".to_string(),
            ciphertext: format!("obscrec1{id}"),
            microcredits: Some(microcredits),
            block_height: 100,
            transaction_id: "at1tx".to_string(),
            transition_id: "otn1a".to_string(),
            output_index: 0,
            timestamp: 1_700_000_000,
            spent_block_height: None,
            spent_transaction_id: None,
            spent_transition_id: None,
            spent_timestamp: None,
            serial_number: None,
            spent: false,
            locked: false,
            locally_synced_transactions: false,
        }
    }

    fn transfer_with_inputs(input_ids: &[&str]) -> (Transaction, Vec<Transition>) {
        let mut transition = Transition::new(
            "credits.obs",
            "transfer_private",
            r#"["100u64"]"#,
            false,
        );
        transition.input_record_ids = input_ids.iter().map(|s| s.to_string()).collect();
        let mut transaction = Transaction::new(
            CHAIN,
            ADDRESS,
            TransactionKind::Execute,
            DisplayKind::PrivateTransfer,
            1000,
        );
        transaction.transition_ids = vec![transition.id.clone()];
        (transaction, vec![transition])
    }

    fn ledger_with_records(ids: &[(&str, u64)]) -> Ledger {
        let ledger = test_ledger();
        for (id, amount) in ids {
            ledger.insert_record(&sample_record(id, *amount)).unwrap();
        }
        ledger
    }

    #[test]
    fn test_insert_locks_inputs() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1", "r2"]);

        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();

        assert!(ledger.get_record("r1").unwrap().unwrap().locked);
        assert!(ledger.get_record("r2").unwrap().unwrap().locked);
        assert!(ledger.spendable_records(CHAIN, ADDRESS).unwrap().is_empty());

        let fetched = ledger.get_transaction(&transaction.id).unwrap();
        assert_eq!(fetched.status, TransactionStatus::Queued);
        assert_eq!(fetched.transition_ids, transaction.transition_ids);
    }

    #[test]
    fn test_lock_conflict_rolls_back_everything() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30)]);
        let (first, first_transitions) = transfer_with_inputs(&["r2"]);
        ledger
            .insert_transaction_with_locks(&first, &first_transitions)
            .unwrap();

        // r2 is locked by the first transaction, so the second must fail and
        // must not leave r1 locked behind.
        let (second, second_transitions) = transfer_with_inputs(&["r1", "r2"]);
        let err = ledger
            .insert_transaction_with_locks(&second, &second_transitions)
            .unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));

        assert!(!ledger.get_record("r1").unwrap().unwrap().locked);
        assert!(matches!(
            ledger.get_transaction(&second.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_spent_input_rejected() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        ledger
            .mark_record_spent("r1", Some(200), Some("at1other"), None, Some(1_700_000_500))
            .unwrap();

        let (transaction, transitions) = transfer_with_inputs(&["r1"]);
        let err = ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn test_status_progression_stamps_timestamps() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1"]);
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();
        let id = transaction.id.as_str();

        ledger
            .update_transaction_status(id, TransactionStatus::DownloadingProverFiles)
            .unwrap();
        let started = ledger
            .get_transaction(id)
            .unwrap()
            .processing_started_at
            .unwrap();

        // Pin the stamp to a sentinel so the retained-on-retry check cannot
        // pass by accident within the same second.
        ledger
            .lock()
            .conn()
            .execute(
                "UPDATE transactions SET processing_started_at = 12345 WHERE id = ?1",
                params![id],
            )
            .unwrap();
        ledger
            .update_transaction_status(id, TransactionStatus::GeneratingTransaction)
            .unwrap();
        assert_eq!(
            ledger.get_transaction(id).unwrap().processing_started_at,
            Some(12345)
        );
        assert!(started > 0);

        ledger
            .update_transaction_status(id, TransactionStatus::Broadcasting)
            .unwrap();
        ledger
            .update_transaction_status(id, TransactionStatus::Completed)
            .unwrap();
        assert!(ledger.get_transaction(id).unwrap().finalized_at.is_none());

        ledger
            .update_transaction_status(id, TransactionStatus::Finalized)
            .unwrap();
        let done = ledger.get_transaction(id).unwrap();
        assert_eq!(done.status, TransactionStatus::Finalized);
        assert!(done.finalized_at.is_some());
        // Terminal status released the input lock.
        assert!(!ledger.get_record("r1").unwrap().unwrap().locked);
    }

    #[test]
    fn test_terminal_status_guard() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1"]);
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();

        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Failed)
            .unwrap();
        let err = ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Queued)
            .unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn test_rejection_unlocks_inputs() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1"]);
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();

        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::GeneratingTransaction)
            .unwrap();
        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Rejected)
            .unwrap();

        let record = ledger.get_record("r1").unwrap().unwrap();
        assert!(!record.locked);
        assert!(!record.spent);
        assert_eq!(ledger.spendable_records(CHAIN, ADDRESS).unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_cascades() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1", "r2"]);
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();
        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Broadcasting)
            .unwrap();

        ledger.cancel_transaction(&transaction.id).unwrap();

        let cancelled = ledger.get_transaction(&transaction.id).unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Failed);
        let transition = ledger.get_transition(&transitions[0].id).unwrap();
        assert_eq!(transition.status, TransitionStatus::Failed);
        assert!(!ledger.get_record("r1").unwrap().unwrap().locked);
        assert!(!ledger.get_record("r2").unwrap().unwrap().locked);
    }

    #[test]
    fn test_cancel_refused_after_terminal() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1"]);
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();
        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Finalized)
            .unwrap();

        let err = ledger.cancel_transaction(&transaction.id).unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn test_stuck_query_filters_by_stamp_and_status() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30), ("r3", 10)]);

        let (stuck, stuck_transitions) = transfer_with_inputs(&["r1"]);
        ledger
            .insert_transaction_with_locks(&stuck, &stuck_transitions)
            .unwrap();
        ledger
            .update_transaction_status(&stuck.id, TransactionStatus::Broadcasting)
            .unwrap();
        ledger
            .lock()
            .conn()
            .execute(
                "UPDATE transactions SET processing_started_at = 100 WHERE id = ?1",
                params![stuck.id],
            )
            .unwrap();

        // Queued, never started processing: not stuck.
        let (queued, queued_transitions) = transfer_with_inputs(&["r2"]);
        ledger
            .insert_transaction_with_locks(&queued, &queued_transitions)
            .unwrap();

        // Started recently: not stuck yet.
        let (fresh, fresh_transitions) = transfer_with_inputs(&["r3"]);
        ledger
            .insert_transaction_with_locks(&fresh, &fresh_transitions)
            .unwrap();
        ledger
            .update_transaction_status(&fresh.id, TransactionStatus::GeneratingTransaction)
            .unwrap();

        let found = ledger.stuck_transactions(CHAIN, 1000).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stuck.id);
    }

    #[test]
    fn test_unreconciled_delegated_query() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        let (mut transaction, transitions) = transfer_with_inputs(&["r1"]);
        transaction.delegated = true;
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();
        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::GeneratingTransaction)
            .unwrap();
        ledger
            .update_transaction_status(&transaction.id, TransactionStatus::Completed)
            .unwrap();

        let pending = ledger.unreconciled_delegated_transactions(CHAIN).unwrap();
        assert_eq!(pending.len(), 1);

        ledger
            .set_chain_transaction_id(&transaction.id, "at1chain")
            .unwrap();
        assert!(ledger
            .unreconciled_delegated_transactions(CHAIN)
            .unwrap()
            .is_empty());
        assert_eq!(
            ledger.find_transaction_by_chain_id("at1chain").unwrap(),
            Some(transaction.id.clone())
        );
    }

    #[test]
    fn test_inputs_all_spent() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30)]);
        let (transaction, transitions) = transfer_with_inputs(&["r1", "r2"]);
        ledger
            .insert_transaction_with_locks(&transaction, &transitions)
            .unwrap();

        assert!(!ledger
            .transaction_inputs_all_spent(&transaction.id)
            .unwrap());

        ledger
            .mark_record_spent("r1", Some(200), None, None, None)
            .unwrap();
        assert!(!ledger
            .transaction_inputs_all_spent(&transaction.id)
            .unwrap());

        ledger
            .mark_record_spent("r2", Some(200), None, None, None)
            .unwrap();
        assert!(ledger
            .transaction_inputs_all_spent(&transaction.id)
            .unwrap());

        // No record inputs at all never counts as final.
        let (bare, bare_transitions) = transfer_with_inputs(&[]);
        ledger
            .insert_transaction_with_locks(&bare, &bare_transitions)
            .unwrap();
        assert!(!ledger.transaction_inputs_all_spent(&bare.id).unwrap());
    }

    #[test]
    fn test_unlock_orphaned_records() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30)]);
        let (live, live_transitions) = transfer_with_inputs(&["r1"]);
        ledger
            .insert_transaction_with_locks(&live, &live_transitions)
            .unwrap();

        // r2's lock has no owning transaction, as after a crash mid-insert.
        ledger
            .lock()
            .conn()
            .execute("UPDATE records SET locked = 1 WHERE id = 'r2'", [])
            .unwrap();

        let unlocked = ledger.unlock_orphaned_records(CHAIN).unwrap();
        assert_eq!(unlocked, 1);
        assert!(!ledger.get_record("r2").unwrap().unwrap().locked);
        // The queued transaction's input stays locked.
        assert!(ledger.get_record("r1").unwrap().unwrap().locked);
    }

    #[test]
    fn test_history_insert_takes_no_locks() {
        let ledger = ledger_with_records(&[("r1", 50)]);
        let (mut transaction, mut transitions) = transfer_with_inputs(&["r1"]);
        transaction.status = TransactionStatus::Finalized;
        transaction.chain_transaction_id = Some("at1history".to_string());
        transitions[0].status = TransitionStatus::Completed;

        ledger.insert_transaction(&transaction, &transitions).unwrap();

        assert!(!ledger.get_record("r1").unwrap().unwrap().locked);
        let fetched = ledger.get_transaction(&transaction.id).unwrap();
        assert_eq!(fetched.status, TransactionStatus::Finalized);
    }

    #[test]
    fn test_transition_roundtrip_with_join_order() {
        let ledger = ledger_with_records(&[("r1", 50), ("r2", 30)]);
        let mut transition = Transition::new("credits.obs", "join", "[]", false);
        transition.input_record_ids = vec!["r2".to_string(), "r1".to_string()];
        transition.output_record_ids = vec!["r_out".to_string()];
        let mut transaction = Transaction::new(
            CHAIN,
            ADDRESS,
            TransactionKind::Execute,
            DisplayKind::Join,
            1000,
        );
        transaction.transition_ids = vec![transition.id.clone()];
        ledger
            .insert_transaction_with_locks(&transaction, std::slice::from_ref(&transition))
            .unwrap();

        let fetched = ledger.get_transition(&transition.id).unwrap();
        assert_eq!(fetched.input_record_ids, vec!["r2", "r1"]);
        assert_eq!(fetched.output_record_ids, vec!["r_out"]);
        assert_eq!(
            ledger.input_record_ids(&transaction.id).unwrap(),
            vec!["r2", "r1"]
        );
    }

    #[test]
    fn test_list_orders_newest_first() {
        let ledger = test_ledger();
        let mut older = Transaction::new(
            CHAIN,
            ADDRESS,
            TransactionKind::Execute,
            DisplayKind::PrivateTransfer,
            0,
        );
        older.created_at = 1_000;
        let mut newer = older.clone();
        newer.id = "z-newer".to_string();
        newer.created_at = 2_000;
        ledger.insert_transaction(&older, &[]).unwrap();
        ledger.insert_transaction(&newer, &[]).unwrap();

        let listed = ledger.list_transactions(CHAIN, ADDRESS, 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "z-newer");

        let limited = ledger.list_transactions(CHAIN, ADDRESS, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_get_transaction_not_found() {
        let ledger = test_ledger();
        assert!(matches!(
            ledger.get_transaction("missing"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.get_transition("missing"),
            Err(Error::NotFound(_))
        ));
    }
}
