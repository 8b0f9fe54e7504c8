//! A concrete [`super::SqlEngine`] backed by `rusqlite`. Stands in for the
//! real embedded engine (parser, planner, storage, MVCC, WAL — all out of
//! scope per spec.md §1) well enough to exercise the adapter contract:
//! each "database" is a separate SQLite file under `<data_dir>/dbs/`.

use super::{ExecuteResult, ProcParam, ProcedureInfo, QueryResult, SqlEngine};
use crate::error::{ApiError, ApiResult};
use camino::Utf8PathBuf;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DEFAULT_DB: &str = "default";

/// Handle stored in the transaction registry. Holds its own dedicated
/// SQLite connection (opened fresh on `begin`) so the transaction's
/// lifetime isn't coupled to the shared per-database connection.
pub struct SqliteTxHandle {
    id: u64,
    conn: Mutex<Connection>,
}

impl SqliteTxHandle {
    fn id(&self) -> u64 {
        self.id
    }
}

pub struct SqliteEngine {
    data_dir: Utf8PathBuf,
    /// One shared connection per database, used for ad-hoc (non-transaction)
    /// statements — consistent with the single-writer design this core
    /// assumes of its embedded engine.
    conns: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
    tx_counter: AtomicU64,
}

impl SqliteEngine {
    pub fn open(data_dir: &camino::Utf8Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir.join("dbs"))?;
        let engine = SqliteEngine {
            data_dir: data_dir.to_path_buf(),
            conns: Mutex::new(HashMap::new()),
            tx_counter: AtomicU64::new(0),
        };
        engine.ensure_db(DEFAULT_DB)?;
        Ok(engine)
    }

    fn db_path(&self, name: &str) -> Utf8PathBuf {
        self.data_dir.join("dbs").join(format!("{name}.sqlite3"))
    }

    fn ensure_db(&self, name: &str) -> ApiResult<Arc<Mutex<Connection>>> {
        let mut conns = self.conns.lock();
        if let Some(c) = conns.get(name) {
            return Ok(c.clone());
        }
        let conn = self.open_connection(name)?;
        let conn = Arc::new(Mutex::new(conn));
        conns.insert(name.to_string(), conn.clone());
        Ok(conn)
    }

    fn open_connection(&self, name: &str) -> ApiResult<Connection> {
        let path = self.db_path(name);
        let conn = Connection::open(path.as_std_path())
            .map_err(|e| ApiError::Internal(format!("opening database {name}: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;
             CREATE TABLE IF NOT EXISTS __mindb_procedures (
                name TEXT PRIMARY KEY,
                wasm BLOB NOT NULL,
                params TEXT NOT NULL,
                return_type TEXT
             );",
        )
        .map_err(|e| ApiError::Internal(format!("initializing database {name}: {e}")))?;
        Ok(conn)
    }

    /// Recognizes `CREATE DATABASE <name>` and `USE <name>` outside the
    /// parser, per spec.md §4.2.
    fn handle_pseudo_ddl(&self, sql: &str) -> ApiResult<Option<ExecuteResult>> {
        let trimmed = sql.trim();
        let upper = trimmed.to_uppercase();
        if let Some(rest) = upper.strip_prefix("CREATE DATABASE") {
            let name = rest.trim().trim_end_matches(';').trim();
            if name.is_empty() {
                return Err(ApiError::BadRequest("CREATE DATABASE requires a name".to_string()));
            }
            let name = sanitize_db_name(name)?;
            self.ensure_db(&name)?;
            return Ok(Some(ExecuteResult { affected_rows: 0, returning: None }));
        }
        if let Some(rest) = upper.strip_prefix("USE") {
            let name = rest.trim().trim_end_matches(';').trim();
            if name.is_empty() {
                return Err(ApiError::BadRequest("USE requires a database name".to_string()));
            }
            let name = sanitize_db_name(name)?;
            self.ensure_db(&name)?;
            return Ok(Some(ExecuteResult { affected_rows: 0, returning: None }));
        }
        Ok(None)
    }
}

fn sanitize_db_name(name: &str) -> ApiResult<String> {
    let name = name.trim_matches(|c| c == '`' || c == '"');
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::BadRequest(format!("invalid database name: {name}")));
    }
    Ok(name.to_string())
}

fn resolve_db(requested: &str) -> &str {
    if requested.trim().is_empty() {
        DEFAULT_DB
    } else {
        requested
    }
}

fn bind_args(args: &[Json]) -> Vec<SqlValue> {
    args.iter().map(json_to_sql).collect()
}

fn json_to_sql(v: &Json) -> SqlValue {
    match v {
        Json::Null => SqlValue::Null,
        Json::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Every cell is rendered through its display form, matching the
/// universal string rendering spec.md's end-to-end examples show
/// (`rows=[["1","Alice"]]`) regardless of the column's declared type.
fn sql_value_to_json(v: ValueRef<'_>) -> Json {
    match v {
        ValueRef::Null => Json::Null,
        ValueRef::Integer(i) => Json::String(i.to_string()),
        ValueRef::Real(f) => Json::String(f.to_string()),
        ValueRef::Text(t) => Json::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Json::String(hex::encode(b)),
    }
}

fn run_query(conn: &Connection, sql: &str, args: &[Json], limit: usize) -> ApiResult<QueryResult> {
    let bound = bind_args(args);
    let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows_iter = stmt.query(params.as_slice())?;
    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        if limit > 0 && rows.len() >= limit {
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(sql_value_to_json(row.get_ref(idx)?));
        }
        rows.push(values);
    }
    Ok(QueryResult { columns, rows })
}

fn run_execute(conn: &Connection, sql: &str, args: &[Json]) -> ApiResult<ExecuteResult> {
    let bound = bind_args(args);
    let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    let affected = conn.execute(sql, params.as_slice())? as u64;
    Ok(ExecuteResult { affected_rows: affected, returning: None })
}

impl SqlEngine for SqliteEngine {
    fn query(&self, db: &str, sql: &str, args: &[Json], limit: usize) -> ApiResult<QueryResult> {
        let db = resolve_db(db);
        let conn = self.ensure_db(db)?;
        let conn = conn.lock();
        run_query(&conn, sql, args, limit)
    }

    fn execute(&self, db: &str, sql: &str, args: &[Json]) -> ApiResult<ExecuteResult> {
        let db = resolve_db(db);
        if let Some(result) = self.handle_pseudo_ddl(sql)? {
            return Ok(result);
        }
        let conn = self.ensure_db(db)?;
        let conn = conn.lock();
        run_execute(&conn, sql, args)
    }

    fn begin(&self, db: &str) -> ApiResult<SqliteTxHandle> {
        let db = resolve_db(db);
        self.ensure_db(db)?;
        let mut conn = self.open_connection(db)?;
        conn.execute_batch("BEGIN DEFERRED")
            .map_err(|e| ApiError::Internal(format!("starting transaction: {e}")))?;
        let id = self.tx_counter.fetch_add(1, Ordering::Relaxed);
        Ok(SqliteTxHandle { id, conn: Mutex::new(conn) })
    }

    fn commit(&self, tx: &SqliteTxHandle) -> ApiResult<()> {
        let conn = tx.conn.lock();
        conn.execute_batch("COMMIT")
            .map_err(|e| ApiError::InvalidSql(format!("commit failed: {e}")))
    }

    fn rollback(&self, tx: &SqliteTxHandle) -> ApiResult<()> {
        let conn = tx.conn.lock();
        conn.execute_batch("ROLLBACK")
            .map_err(|e| ApiError::Internal(format!("rollback failed: {e}")))
    }

    fn execute_in_tx(&self, tx: &SqliteTxHandle, sql: &str, args: &[Json]) -> ApiResult<ExecuteResult> {
        let conn = tx.conn.lock();
        tracing::trace!(tx_id = tx.id(), "executing statement within transaction");
        if let Some(result) = self.handle_pseudo_ddl(sql)? {
            return Ok(result);
        }
        run_execute(&conn, sql, args)
    }

    fn create_procedure(
        &self,
        name: &str,
        wasm_bytes: &[u8],
        params: Vec<ProcParam>,
        return_type: Option<String>,
    ) -> ApiResult<()> {
        let conn = self.ensure_db(DEFAULT_DB)?;
        let conn = conn.lock();
        let params_json = serde_json::to_string(&params)
            .map_err(|e| ApiError::Internal(format!("serializing params: {e}")))?;
        conn.execute(
            "INSERT INTO __mindb_procedures (name, wasm, params, return_type) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET wasm=excluded.wasm, params=excluded.params, return_type=excluded.return_type",
            rusqlite::params![name, wasm_bytes, params_json, return_type],
        )?;
        Ok(())
    }

    fn drop_procedure(&self, name: &str) -> ApiResult<()> {
        let conn = self.ensure_db(DEFAULT_DB)?;
        let conn = conn.lock();
        let affected = conn.execute("DELETE FROM __mindb_procedures WHERE name = ?1", [name])?;
        if affected == 0 {
            return Err(ApiError::NotFound(format!("procedure {name} not found")));
        }
        Ok(())
    }

    fn list_procedures(&self) -> ApiResult<Vec<ProcedureInfo>> {
        let conn = self.ensure_db(DEFAULT_DB)?;
        let conn = conn.lock();
        let mut stmt = conn.prepare("SELECT name, params, return_type FROM __mindb_procedures ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let params_json: String = row.get(1)?;
            let return_type: Option<String> = row.get(2)?;
            Ok((name, params_json, return_type))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, params_json, return_type) = row?;
            let params: Vec<ProcParam> = serde_json::from_str(&params_json).unwrap_or_default();
            out.push(ProcedureInfo { name, params, return_type });
        }
        Ok(out)
    }

    fn call_procedure(&self, name: &str, args: &[Json]) -> ApiResult<Json> {
        let conn = self.ensure_db(DEFAULT_DB)?;
        let (wasm, params): (Vec<u8>, Vec<ProcParam>) = {
            let conn = conn.lock();
            conn.query_row(
                "SELECT wasm, params FROM __mindb_procedures WHERE name = ?1",
                [name],
                |row| {
                    let wasm: Vec<u8> = row.get(0)?;
                    let params_json: String = row.get(1)?;
                    Ok((wasm, params_json))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ApiError::NotFound(format!("procedure {name} not found")),
                other => ApiError::Internal(other.to_string()),
            })
            .map(|(wasm, params_json)| {
                (wasm, serde_json::from_str::<Vec<ProcParam>>(&params_json).unwrap_or_default())
            })?
        };
        super::procedures::invoke(&wasm, &params, args)
    }

    /// Checkpoints every open database's WAL back into the main file, so a
    /// clean shutdown leaves nothing for the next startup to replay.
    fn flush(&self) -> ApiResult<()> {
        let conns = self.conns.lock();
        for (name, conn) in conns.iter() {
            let conn = conn.lock();
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                tracing::warn!(database = %name, error = %e, "wal checkpoint failed during flush");
            }
        }
        Ok(())
    }
}
