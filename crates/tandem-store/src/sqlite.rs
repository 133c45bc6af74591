use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use tandem_core::error::{Result, TandemError};
use tandem_core::order::Order;
use tandem_core::traits::OrderStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS orders (
        order_id TEXT PRIMARY KEY,
        version INTEGER NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sequences (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    INSERT OR IGNORE INTO sequences (name, value) VALUES ('order', 1000);";

fn db_err(e: impl std::fmt::Display) -> TandemError {
    TandemError::Database(e.to_string())
}

/// SQLite-backed order store with optimistic versioning.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TandemError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite order store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn decode(body: &str) -> Result<Order> {
    serde_json::from_str(body).map_err(|e| TandemError::Database(format!("corrupt order row: {}", e)))
}

impl OrderStore for SqliteOrderStore {
    fn get_order(&self, order_id: &str) -> BoxFuture<'_, Result<Option<Order>>> {
        let order_id = order_id.to_string();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT version, body FROM orders WHERE order_id = ?1",
                    params![order_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(db_err)?;

            match row {
                Some((version, body)) => {
                    let mut order = decode(&body)?;
                    order.version = version as u64;
                    Ok(Some(order))
                }
                None => Ok(None),
            }
        })
    }

    fn put_order(&self, order: Order) -> BoxFuture<'_, Result<Order>> {
        Box::pin(async move {
            let mut conn = self.conn.lock().map_err(db_err)?;
            let tx = conn.transaction().map_err(db_err)?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT version FROM orders WHERE order_id = ?1",
                    params![order.order_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            let found = current.unwrap_or(0) as u64;
            if found != order.version {
                return Err(TandemError::VersionConflict {
                    order_id: order.order_id.clone(),
                    expected: order.version,
                    found,
                });
            }

            let mut stored = order;
            stored.version += 1;
            let body = serde_json::to_string(&stored)?;
            tx.execute(
                "INSERT INTO orders (order_id, version, body, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(order_id) DO UPDATE SET
                    version = excluded.version,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![stored.order_id, stored.version as i64, body, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            debug!(order_id = %stored.order_id, version = stored.version, "Order stored");
            Ok(stored)
        })
    }

    fn next_order_id(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let value: i64 = conn
                .query_row(
                    "UPDATE sequences SET value = value + 1 WHERE name = 'order' RETURNING value",
                    [],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(format!("ORDER_{}", value))
        })
    }

    fn list_orders(&self) -> BoxFuture<'_, Result<Vec<Order>>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn
                .prepare("SELECT version, body FROM orders ORDER BY order_id ASC")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let version: i64 = row.get(0)?;
                    let body: String = row.get(1)?;
                    Ok((version, body))
                })
                .map_err(db_err)?;

            let mut orders = Vec::new();
            for row in rows {
                let (version, body) = row.map_err(db_err)?;
                let mut order = decode(&body)?;
                order.version = version as u64;
                orders.push(order);
            }
            Ok(orders)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::error::ErrorKind;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let id = store.next_order_id().await.unwrap();
        assert_eq!(id, "ORDER_1001");

        let mut order = Order::new(&id);
        order.add_item("P001").unwrap();
        let stored = store.put_order(order).await.unwrap();
        assert_eq!(stored.version, 1);

        let loaded = store.get_order(&id).await.unwrap().unwrap();
        assert_eq!(loaded.cart, vec!["P001".to_string()]);
        assert_eq!(loaded.version, 1);
        assert!(store.get_order("ORDER_9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_write_rejected() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let first = store.put_order(Order::new("ORDER_1")).await.unwrap();

        let mut a = first.clone();
        a.add_item("P001").unwrap();
        let mut b = first;
        b.add_item("P002").unwrap();

        store.put_order(a).await.unwrap();
        let err = store.put_order(b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let loaded = store.get_order("ORDER_1").await.unwrap().unwrap();
        assert_eq!(loaded.cart, vec!["P001".to_string()]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("orders.db");
        {
            let store = SqliteOrderStore::open(&path).unwrap();
            assert_eq!(store.next_order_id().await.unwrap(), "ORDER_1001");
            store.put_order(Order::new("ORDER_1001")).await.unwrap();
        }
        let store = SqliteOrderStore::open(&path).unwrap();
        assert_eq!(store.next_order_id().await.unwrap(), "ORDER_1002");
        assert_eq!(store.list_orders().await.unwrap().len(), 1);
    }
}
