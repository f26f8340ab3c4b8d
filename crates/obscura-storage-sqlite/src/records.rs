//! Record and owned-record operations

use crate::models::{Balance, OwnedRecord, Record};
use crate::{Error, Ledger, Result};
use rusqlite::{params, OptionalExtension};

const RECORD_COLUMNS: &str = "id, chain, address, program_id, ciphertext, microcredits, \
     block_height, transaction_id, transition_id, output_index, timestamp, \
     spent_block_height, spent_transaction_id, spent_transition_id, spent_timestamp, \
     serial_number, spent, locked, locally_synced_transactions";

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        chain: row.get(1)?,
        address: row.get(2)?,
        program_id: row.get(3)?,
        ciphertext: row.get(4)?,
        microcredits: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        block_height: row.get(6)?,
        transaction_id: row.get(7)?,
        transition_id: row.get(8)?,
        output_index: row.get(9)?,
        timestamp: row.get(10)?,
        spent_block_height: row.get(11)?,
        spent_transaction_id: row.get(12)?,
        spent_transition_id: row.get(13)?,
        spent_timestamp: row.get(14)?,
        serial_number: row.get(15)?,
        spent: row.get(16)?,
        locked: row.get(17)?,
        locally_synced_transactions: row.get(18)?,
    })
}

impl Ledger {
    /// Insert a hydrated record.
    ///
    /// Returns `false` when a record with the same content-derived id already
    /// exists; the existing row (including its spend and lock state) is left
    /// untouched.
    pub fn insert_record(&self, record: &Record) -> Result<bool> {
        let changed = self.lock().conn().execute(
            &format!(
                "INSERT INTO records ({RECORD_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19) \
                 ON CONFLICT (id) DO NOTHING"
            ),
            params![
                record.id,
                record.chain,
                record.address,
                record.program_id,
                record.ciphertext,
                record.microcredits.map(|v| v as i64),
                record.block_height,
                record.transaction_id,
                record.transition_id,
                record.output_index,
                record.timestamp,
                record.spent_block_height,
                record.spent_transaction_id,
                record.spent_transition_id,
                record.spent_timestamp,
                record.serial_number,
                record.spent,
                record.locked,
                record.locally_synced_transactions,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Fetch a record by id
    pub fn get_record(&self, id: &str) -> Result<Option<Record>> {
        let record = self
            .lock()
            .conn()
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All records for one (chain, address), newest creation block first
    pub fn list_records(&self, chain: &str, address: &str) -> Result<Vec<Record>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE chain = ?1 AND address = ?2 \
             ORDER BY block_height DESC, output_index ASC"
        ))?;
        let records = stmt
            .query_map(params![chain, address], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Unspent, unlocked records with a known amount, for input selection
    pub fn spendable_records(&self, chain: &str, address: &str) -> Result<Vec<Record>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE chain = ?1 AND address = ?2 \
               AND spent = 0 AND locked = 0 AND microcredits IS NOT NULL \
             ORDER BY microcredits DESC"
        ))?;
        let records = stmt
            .query_map(params![chain, address], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Spendable / pending / total balance for one (chain, address)
    pub fn balance(&self, chain: &str, address: &str) -> Result<Balance> {
        let (spendable, pending) = self.lock().conn().query_row(
            "SELECT \
                 COALESCE(SUM(CASE WHEN locked = 0 THEN microcredits END), 0), \
                 COALESCE(SUM(CASE WHEN locked = 1 THEN microcredits END), 0) \
             FROM records \
             WHERE chain = ?1 AND address = ?2 AND spent = 0 AND microcredits IS NOT NULL",
            params![chain, address],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let spendable = spendable as u64;
        let pending = pending as u64;
        Ok(Balance {
            spendable,
            pending,
            total: spendable + pending,
        })
    }

    /// Record a spend observed on-chain.
    ///
    /// The `locked` flag is not touched here: if one of our own in-flight
    /// transactions consumed the record, the lifecycle manager clears the
    /// lock when that transaction reaches a terminal state.
    pub fn mark_record_spent(
        &self,
        id: &str,
        block_height: Option<u32>,
        transaction_id: Option<&str>,
        transition_id: Option<&str>,
        timestamp: Option<i64>,
    ) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE records SET \
                 spent = 1, \
                 spent_block_height = ?2, \
                 spent_transaction_id = ?3, \
                 spent_transition_id = ?4, \
                 spent_timestamp = ?5 \
             WHERE id = ?1",
            params![id, block_height, transaction_id, transition_id, timestamp],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    /// Store a computed serial number
    pub fn set_serial_number(&self, id: &str, serial_number: &str) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE records SET serial_number = ?2 WHERE id = ?1",
            params![id, serial_number],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    /// One page of `(record id, serial number)` pairs for unspent records,
    /// in stable id order, for the spent tracker.
    pub fn unspent_serial_numbers(
        &self,
        chain: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<(String, String)>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(
            "SELECT id, serial_number FROM records \
             WHERE chain = ?1 AND spent = 0 AND serial_number IS NOT NULL \
             ORDER BY id \
             LIMIT ?2 OFFSET ?3",
        )?;
        let pairs = stmt
            .query_map(
                params![chain, page_size, page as i64 * page_size as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Flag a record as having had its local history derived
    pub fn mark_locally_synced(&self, id: &str) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE records SET locally_synced_transactions = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    /// Records whose local transaction history has not been derived yet
    pub fn records_pending_history(&self, chain: &str, limit: u32) -> Result<Vec<Record>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE chain = ?1 AND locally_synced_transactions = 0 \
             ORDER BY block_height ASC \
             LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(params![chain, limit], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Insert scanner assertions, ignoring ones already known.
    ///
    /// Returns the number of new rows. Re-discovering an already synced
    /// assertion on a rescan leaves its `synced` flag intact.
    pub fn insert_owned_records(&self, owned: &[OwnedRecord]) -> Result<usize> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let mut inserted = 0;
        for record in owned {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO owned_records (chain, address, transition_id, output_index, synced) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.chain,
                    record.address,
                    record.transition_id,
                    record.output_index,
                    record.synced,
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// One batch of assertions still waiting for hydration
    pub fn unsynced_owned_records(&self, chain: &str, limit: u32) -> Result<Vec<OwnedRecord>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(
            "SELECT id, chain, address, transition_id, output_index, synced \
             FROM owned_records \
             WHERE chain = ?1 AND synced = 0 \
             ORDER BY id \
             LIMIT ?2",
        )?;
        let owned = stmt
            .query_map(params![chain, limit], |row| {
                Ok(OwnedRecord {
                    id: row.get(0)?,
                    chain: row.get(1)?,
                    address: row.get(2)?,
                    transition_id: row.get(3)?,
                    output_index: row.get(4)?,
                    synced: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(owned)
    }

    /// Flag an assertion as hydrated
    pub fn mark_owned_record_synced(&self, id: i64) -> Result<()> {
        let changed = self.lock().conn().execute(
            "UPDATE owned_records SET synced = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("owned record {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger() -> Ledger {
        Ledger::open_in_memory().unwrap()
    }

    fn sample_record(id: &str, microcredits: u64) -> Record {
        Record {
            id: id.to_string(),
            chain: "obscura-testnet".to_string(),
            address: "obsc1alice".to_string(),
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

    #[test]
    fn test_insert_and_get_roundtrip() {
        let ledger = test_ledger();
        let record = sample_record("r1", 1_500_000);

        assert!(ledger.insert_record(&record).unwrap());
        let loaded = ledger.get_record("r1").unwrap().unwrap();
        assert_eq!(loaded, record);

        assert!(ledger.get_record("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let ledger = test_ledger();
        let record = sample_record("r1", 100);
        assert!(ledger.insert_record(&record).unwrap());

        ledger.set_serial_number("r1", "sn1").unwrap();

        // Re-hydrating the same content must not clobber later updates.
        assert!(!ledger.insert_record(&record).unwrap());
        let loaded = ledger.get_record("r1").unwrap().unwrap();
        assert_eq!(loaded.serial_number.as_deref(), Some("sn1"));
    }

    #[test]
    fn test_spendable_excludes_spent_and_locked() {
        let ledger = test_ledger();
        ledger.insert_record(&sample_record("r1", 50)).unwrap();
        ledger.insert_record(&sample_record("r2", 30)).unwrap();
        let mut locked = sample_record("r3", 10);
        locked.locked = true;
        ledger.insert_record(&locked).unwrap();
        let mut spent = sample_record("r4", 5);
        spent.spent = true;
        ledger.insert_record(&spent).unwrap();

        let spendable = ledger
            .spendable_records("obscura-testnet", "obsc1alice")
            .unwrap();
        let ids: Vec<&str> = spendable.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn test_balance_split() {
        let ledger = test_ledger();
        ledger.insert_record(&sample_record("r1", 50)).unwrap();
        let mut locked = sample_record("r2", 30);
        locked.locked = true;
        ledger.insert_record(&locked).unwrap();
        let mut spent = sample_record("r3", 9_999);
        spent.spent = true;
        ledger.insert_record(&spent).unwrap();

        let balance = ledger.balance("obscura-testnet", "obsc1alice").unwrap();
        assert_eq!(balance.spendable, 50);
        assert_eq!(balance.pending, 30);
        assert_eq!(balance.total, 80);
    }

    #[test]
    fn test_balance_empty_address() {
        let ledger = test_ledger();
        let balance = ledger.balance("obscura-testnet", "obsc1nobody").unwrap();
        assert_eq!(balance.spendable, 0);
        assert_eq!(balance.total, 0);
    }

    #[test]
    fn test_mark_spent_sets_metadata() {
        let ledger = test_ledger();
        ledger.insert_record(&sample_record("r1", 50)).unwrap();

        ledger
            .mark_record_spent("r1", Some(200), Some("at1spend"), Some("otn1spend"), Some(1_700_000_500))
            .unwrap();

        let loaded = ledger.get_record("r1").unwrap().unwrap();
        assert!(loaded.spent);
        assert_eq!(loaded.spent_block_height, Some(200));
        assert_eq!(loaded.spent_transaction_id.as_deref(), Some("at1spend"));
        assert_eq!(loaded.spent_transition_id.as_deref(), Some("otn1spend"));
        assert_eq!(loaded.spent_timestamp, Some(1_700_000_500));

        assert!(matches!(
            ledger.mark_record_spent("missing", None, None, None, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_serial_number_paging() {
        let ledger = test_ledger();
        for i in 0..5 {
            let id = format!("r{i}");
            ledger.insert_record(&sample_record(&id, 10)).unwrap();
            ledger
                .set_serial_number(&id, &format!("sn{i}"))
                .unwrap();
        }
        // A spent record drops out of the serial scan.
        ledger
            .mark_record_spent("r2", None, None, None, None)
            .unwrap();

        let page0 = ledger
            .unspent_serial_numbers("obscura-testnet", 0, 2)
            .unwrap();
        let page1 = ledger
            .unspent_serial_numbers("obscura-testnet", 1, 2)
            .unwrap();
        let page2 = ledger
            .unspent_serial_numbers("obscura-testnet", 2, 2)
            .unwrap();

        assert_eq!(page0.len(), 2);
        assert_eq!(page1.len(), 2);
        assert!(page2.is_empty());

        let all: Vec<String> = page0.into_iter().chain(page1).map(|(id, _)| id).collect();
        assert_eq!(all, vec!["r0", "r1", "r3", "r4"]);
    }

    #[test]
    fn test_pending_history_flag() {
        let ledger = test_ledger();
        ledger.insert_record(&sample_record("r1", 50)).unwrap();
        ledger.insert_record(&sample_record("r2", 30)).unwrap();

        let pending = ledger
            .records_pending_history("obscura-testnet", 10)
            .unwrap();
        assert_eq!(pending.len(), 2);

        ledger.mark_locally_synced("r1").unwrap();
        let pending = ledger
            .records_pending_history("obscura-testnet", 10)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "r2");
    }

    #[test]
    fn test_owned_records_dedupe_and_sync() {
        let ledger = test_ledger();
        let batch = vec![
            OwnedRecord::new("obscura-testnet", "obsc1alice", "otn1a", 0),
            OwnedRecord::new("obscura-testnet", "obsc1alice", "otn1a", 1),
        ];
        assert_eq!(ledger.insert_owned_records(&batch).unwrap(), 2);
        // A rescan re-discovers the same candidates.
        assert_eq!(ledger.insert_owned_records(&batch).unwrap(), 0);

        let unsynced = ledger
            .unsynced_owned_records("obscura-testnet", 10)
            .unwrap();
        assert_eq!(unsynced.len(), 2);

        let first = unsynced[0].id.unwrap();
        ledger.mark_owned_record_synced(first).unwrap();

        let unsynced = ledger
            .unsynced_owned_records("obscura-testnet", 10)
            .unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].output_index, 1);

        // Re-inserting after sync must not reset the flag.
        assert_eq!(ledger.insert_owned_records(&batch).unwrap(), 0);
        let unsynced = ledger
            .unsynced_owned_records("obscura-testnet", 10)
            .unwrap();
        assert_eq!(unsynced.len(), 1);
    }

    #[test]
    fn test_unsynced_batch_limit() {
        let ledger = test_ledger();
        let batch: Vec<OwnedRecord> = (0..7)
            .map(|i| OwnedRecord::new("obscura-testnet", "obsc1alice", "otn1a", i))
            .collect();
        ledger.insert_owned_records(&batch).unwrap();

        let page = ledger.unsynced_owned_records("obscura-testnet", 3).unwrap();
        assert_eq!(page.len(), 3);
    }
}
