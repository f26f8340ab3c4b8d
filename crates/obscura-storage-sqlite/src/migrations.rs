//! Database schema migrations

use crate::{Error, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    // Only set schema version if it changed (to avoid UNIQUE constraint errors)
    let final_version = get_schema_version(conn)?;
    if final_version != SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// V1: the full ledger schema.
///
/// Booleans are stored as 0/1 integers. Amounts are microcredits in signed
/// 64-bit columns; chain timestamps are unix seconds; checkpoint bookkeeping
/// timestamps are RFC 3339 text.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            program_id TEXT NOT NULL,
            ciphertext TEXT NOT NULL,
            microcredits INTEGER,
            block_height INTEGER NOT NULL,
            transaction_id TEXT NOT NULL,
            transition_id TEXT NOT NULL,
            output_index INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            spent_block_height INTEGER,
            spent_transaction_id TEXT,
            spent_transition_id TEXT,
            spent_timestamp INTEGER,
            serial_number TEXT,
            spent INTEGER NOT NULL DEFAULT 0,
            locked INTEGER NOT NULL DEFAULT 0,
            locally_synced_transactions INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS owned_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            transition_id TEXT NOT NULL,
            output_index INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            UNIQUE (chain, address, transition_id, output_index)
        );

        CREATE TABLE IF NOT EXISTS transitions (
            id TEXT PRIMARY KEY,
            chain_transition_id TEXT,
            program_id TEXT NOT NULL,
            function_name TEXT NOT NULL,
            inputs_json TEXT NOT NULL,
            status TEXT NOT NULL,
            is_fee INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS transition_input_records (
            transition_id TEXT NOT NULL,
            record_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (transition_id, position)
        );

        CREATE TABLE IF NOT EXISTS transition_output_records (
            transition_id TEXT NOT NULL,
            record_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (transition_id, position)
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            chain_transaction_id TEXT,
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            kind TEXT NOT NULL,
            fee INTEGER NOT NULL DEFAULT 0,
            authorization_json TEXT,
            fee_authorization_json TEXT,
            delegated INTEGER NOT NULL DEFAULT 0,
            delegation_request_id TEXT,
            only_execute INTEGER NOT NULL DEFAULT 0,
            display_kind TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            processing_started_at INTEGER,
            finalized_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS transaction_transitions (
            transaction_id TEXT NOT NULL,
            transition_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (transaction_id, position)
        );

        CREATE TABLE IF NOT EXISTS record_syncs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            start_block INTEGER NOT NULL,
            end_block INTEGER NOT NULL,
            page INTEGER NOT NULL DEFAULT 0,
            range_complete INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            UNIQUE (chain, address, start_block, end_block)
        );

        CREATE TABLE IF NOT EXISTS public_syncs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            last_synced_block INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            UNIQUE (chain, address)
        );

        CREATE TABLE IF NOT EXISTS serial_number_sync_times (
            chain TEXT PRIMARY KEY,
            page INTEGER NOT NULL DEFAULT -1,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS account_creation_block_heights (
            chain TEXT NOT NULL,
            address TEXT NOT NULL,
            block_height INTEGER NOT NULL,
            PRIMARY KEY (chain, address)
        );
        "#,
    )
    .map_err(|e| Error::Migration(format!("v1: {e}")))?;

    Ok(())
}

/// V2: lookup indexes for the sync and lifecycle hot paths.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_records_owner
            ON records (chain, address);
        CREATE INDEX IF NOT EXISTS idx_records_spendable
            ON records (chain, address, spent, locked);
        CREATE INDEX IF NOT EXISTS idx_records_serial
            ON records (serial_number) WHERE serial_number IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_owned_records_unsynced
            ON owned_records (chain, synced);
        CREATE INDEX IF NOT EXISTS idx_record_syncs_range
            ON record_syncs (chain, address, start_block);
        CREATE INDEX IF NOT EXISTS idx_transactions_status
            ON transactions (status);
        CREATE INDEX IF NOT EXISTS idx_transaction_transitions_transition
            ON transaction_transitions (transition_id);
        CREATE INDEX IF NOT EXISTS idx_transition_input_records_record
            ON transition_input_records (record_id);
        "#,
    )
    .map_err(|e| Error::Migration(format!("v2: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "records",
            "owned_records",
            "transitions",
            "transition_input_records",
            "transition_output_records",
            "transactions",
            "transaction_transitions",
            "record_syncs",
            "public_syncs",
            "serial_number_sync_times",
            "account_creation_block_heights",
            "schema_version",
        ] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table {expected}, have {tables:?}"
            );
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_version_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_owned_record_uniqueness() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO owned_records (chain, address, transition_id, output_index) VALUES ('t', 'a', 'otn1x', 0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO owned_records (chain, address, transition_id, output_index) VALUES ('t', 'a', 'otn1x', 0)",
            [],
        );
        assert!(dup.is_err());
    }
}
