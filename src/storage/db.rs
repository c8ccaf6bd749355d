use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::core::error::AppResult;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and creates the
/// schema if it does not exist yet.
///
/// # Arguments
///
/// * `database_path` - Path to SQLite database file
pub fn create_pool(database_path: &str) -> std::result::Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;
    if let Ok(conn) = pool.get() {
        if let Err(e) = init_schema(&conn) {
            log::error!("Failed to initialize database schema: {}", e);
        }
    }
    Ok(pool)
}

/// Gets a connection from the pool.
pub fn get_connection(pool: &DbPool) -> std::result::Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Runs a database operation on the blocking thread pool, so pool waits
/// and disk I/O never stall the async workers.
pub async fn with_connection<T, F>(pool: &DbPool, f: F) -> AppResult<T>
where
    F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = get_connection(&pool)?;
        f(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!("database task join failed: {}", e))?
}

/// Creates the tables the generation core touches.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS balances (
            user_id        INTEGER PRIMARY KEY,
            image_units    INTEGER NOT NULL DEFAULT 0,
            training_slots INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS user_models (
            user_id        INTEGER PRIMARY KEY,
            model_id       TEXT NOT NULL,
            version        INTEGER NOT NULL DEFAULT 1,
            trigger_phrase TEXT NOT NULL DEFAULT '',
            status         TEXT NOT NULL DEFAULT 'pending'
        );
        CREATE TABLE IF NOT EXISTS generation_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    INTEGER NOT NULL,
            kind       TEXT NOT NULL,
            model_id   TEXT,
            units      INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_generation_log_user ON generation_log(user_id);",
    )
}

/// Reads a user's balance. Missing rows read as zero balances.
pub fn get_balance(conn: &Connection, user_id: i64) -> Result<(u32, u32)> {
    let row = conn
        .query_row(
            "SELECT image_units, training_slots FROM balances WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let (units, slots) = row.unwrap_or((0, 0));
    Ok((units.max(0) as u32, slots.max(0) as u32))
}

/// Inserts or replaces a user's balance row. Used by the payment flow and
/// by admin grants; the generation core itself only debits and credits.
pub fn set_balance(conn: &Connection, user_id: i64, image_units: u32, training_slots: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO balances (user_id, image_units, training_slots) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET image_units = ?2, training_slots = ?3",
        params![user_id, image_units, training_slots],
    )?;
    Ok(())
}

/// Atomically debits `amount` from the given column, failing when the
/// balance cannot cover it. The conditional UPDATE is the cross-process
/// consistency boundary; per-process same-user races are already excluded
/// by the per-user serializer.
///
/// Returns `true` when the debit was applied.
pub fn debit_balance(conn: &Connection, user_id: i64, column: &str, amount: u32) -> Result<bool> {
    let sql = format!(
        "UPDATE balances SET {col} = {col} - ?2 WHERE user_id = ?1 AND {col} >= ?2",
        col = column
    );
    let affected = conn.execute(&sql, params![user_id, amount])?;
    Ok(affected == 1)
}

/// Atomically credits `amount` back to the given column.
///
/// Returns `true` when a row was updated; `false` means the user row
/// vanished, which the caller logs loudly since it would lose a refund.
pub fn credit_balance(conn: &Connection, user_id: i64, column: &str, amount: u32) -> Result<bool> {
    let sql = format!("UPDATE balances SET {col} = {col} + ?2 WHERE user_id = ?1", col = column);
    let affected = conn.execute(&sql, params![user_id, amount])?;
    Ok(affected == 1)
}

/// Loads a user's active model row, if any.
pub fn load_active_model(conn: &Connection, user_id: i64) -> Result<Option<(String, i64, String, String)>> {
    conn.query_row(
        "SELECT model_id, version, trigger_phrase, status FROM user_models WHERE user_id = ?1",
        params![user_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )
    .optional()
}

/// Writes a user's active model row. Called by the training-completion
/// workflow; the caller must invalidate the model cache afterwards.
pub fn save_active_model(
    conn: &Connection,
    user_id: i64,
    model_id: &str,
    version: i64,
    trigger_phrase: &str,
    status: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_models (user_id, model_id, version, trigger_phrase, status)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET model_id = ?2, version = ?3, trigger_phrase = ?4, status = ?5",
        params![user_id, model_id, version, trigger_phrase, status],
    )?;
    Ok(())
}

/// Appends one row to the generation audit log.
pub fn insert_generation_log(
    conn: &Connection,
    user_id: i64,
    kind: &str,
    model_id: Option<&str>,
    units: u32,
) -> Result<()> {
    conn.execute(
        "INSERT INTO generation_log (user_id, kind, model_id, units, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, kind, model_id, units, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Number of audit rows for a user, for the admin stats screen.
pub fn count_generations(conn: &Connection, user_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM generation_log WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_missing_balance_reads_as_zero() {
        let conn = test_conn();
        assert_eq!(get_balance(&conn, 1).unwrap(), (0, 0));
    }

    #[test]
    fn test_debit_requires_sufficient_balance() {
        let conn = test_conn();
        set_balance(&conn, 1, 5, 1).unwrap();

        assert!(debit_balance(&conn, 1, "image_units", 2).unwrap());
        assert_eq!(get_balance(&conn, 1).unwrap(), (3, 1));

        // Cannot overdraw
        assert!(!debit_balance(&conn, 1, "image_units", 4).unwrap());
        assert_eq!(get_balance(&conn, 1).unwrap(), (3, 1));

        // Unknown user debits nothing
        assert!(!debit_balance(&conn, 99, "image_units", 1).unwrap());
    }

    #[test]
    fn test_credit_restores_debited_amount() {
        let conn = test_conn();
        set_balance(&conn, 1, 5, 0).unwrap();
        assert!(debit_balance(&conn, 1, "image_units", 2).unwrap());
        assert!(credit_balance(&conn, 1, "image_units", 2).unwrap());
        assert_eq!(get_balance(&conn, 1).unwrap(), (5, 0));
    }

    #[test]
    fn test_model_roundtrip_and_audit() {
        let conn = test_conn();
        assert!(load_active_model(&conn, 1).unwrap().is_none());

        save_active_model(&conn, 1, "mdl_1", 2, "TOK person", "ready").unwrap();
        let (model_id, version, trigger, status) = load_active_model(&conn, 1).unwrap().unwrap();
        assert_eq!(model_id, "mdl_1");
        assert_eq!(version, 2);
        assert_eq!(trigger, "TOK person");
        assert_eq!(status, "ready");

        insert_generation_log(&conn, 1, "avatar_image", Some("mdl_1"), 2).unwrap();
        assert_eq!(count_generations(&conn, 1).unwrap(), 1);
    }
}
