//! C3: engine adapter. Wraps the embedded SQL engine — parser, planner,
//! storage, MVCC, WAL, WASM sandbox — behind the narrow synchronous
//! interface spec.md §4.2 describes. Everything below the [`SqlEngine`]
//! trait is the "external collaborator"; this module defines only the
//! contract the core consumes from it, plus a concrete SQLite-backed
//! implementation (see `sqlite.rs`) good enough to exercise that contract
//! in tests.

pub mod procedures;
pub mod sqlite;

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

/// Result of a `Query`: column names plus a row-of-values matrix. Cell
/// values are rendered as the engine's display form (see sqlite.rs) —
/// callers never need to know the underlying storage type.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
}

/// Result of an `Execute`.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub affected_rows: u64,
    pub returning: Option<QueryResult>,
}

/// An opaque handle to an in-progress transaction on the underlying
/// engine. The transaction registry (C5) stores one of these per live
/// transaction; this core never inspects its contents.
pub type EngineTxHandle = sqlite::SqliteTxHandle;

/// Declared parameter of a registered stored procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcParam {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureInfo {
    pub name: String,
    pub params: Vec<ProcParam>,
    pub return_type: Option<String>,
}

/// The contract the core requires of an embedded SQL engine. Parsing,
/// planning, storage, MVCC, WAL, and WASM execution semantics are
/// entirely up to the implementation; the core only calls through this
/// trait and reacts to its typed errors.
pub trait SqlEngine: Send + Sync {
    /// Switch to (creating if absent) the named database, then parse and
    /// execute `sql` with `args` bound positionally, returning up to
    /// `limit` rows (0 = unlimited).
    fn query(&self, db: &str, sql: &str, args: &[Json], limit: usize) -> ApiResult<QueryResult>;

    /// Switch-and-parse like `query`, but for statements that mutate data
    /// or schema. Recognizes `USE <name>` and `CREATE DATABASE <name>`
    /// outside the parser (spec.md §4.2).
    fn execute(&self, db: &str, sql: &str, args: &[Json]) -> ApiResult<ExecuteResult>;

    fn begin(&self, db: &str) -> ApiResult<EngineTxHandle>;
    fn commit(&self, tx: &EngineTxHandle) -> ApiResult<()>;
    fn rollback(&self, tx: &EngineTxHandle) -> ApiResult<()>;
    fn execute_in_tx(&self, tx: &EngineTxHandle, sql: &str, args: &[Json]) -> ApiResult<ExecuteResult>;

    fn create_procedure(
        &self,
        name: &str,
        wasm_bytes: &[u8],
        params: Vec<ProcParam>,
        return_type: Option<String>,
    ) -> ApiResult<()>;
    fn drop_procedure(&self, name: &str) -> ApiResult<()>;
    fn list_procedures(&self) -> ApiResult<Vec<ProcedureInfo>>;
    fn call_procedure(&self, name: &str, args: &[Json]) -> ApiResult<Json>;

    /// Flush durable state ahead of shutdown (spec.md §4.8 "flush WAL").
    /// Default no-op for implementations with nothing to flush.
    fn flush(&self) -> ApiResult<()> {
        Ok(())
    }
}

/// C3 facade. Every entry point first checks `cancel` and bails out
/// immediately if tripped — the engine is synchronous and cannot poll
/// for cancellation itself (spec.md §4.2, §5 "Cancellation").
pub struct EngineAdapter {
    engine: Box<dyn SqlEngine>,
}

impl EngineAdapter {
    pub fn new(engine: Box<dyn SqlEngine>) -> Self {
        Self { engine }
    }

    fn check_cancelled(cancel: &CancellationToken) -> ApiResult<()> {
        if cancel.is_cancelled() {
            return Err(ApiError::Timeout);
        }
        Ok(())
    }

    pub fn query(
        &self,
        cancel: &CancellationToken,
        db: &str,
        sql: &str,
        args: &[Json],
        limit: usize,
    ) -> ApiResult<QueryResult> {
        Self::check_cancelled(cancel)?;
        if sql.trim().is_empty() {
            return Err(ApiError::BadRequest("sql must not be empty".to_string()));
        }
        self.engine.query(db, sql, args, limit)
    }

    pub fn execute(
        &self,
        cancel: &CancellationToken,
        db: &str,
        sql: &str,
        args: &[Json],
    ) -> ApiResult<ExecuteResult> {
        Self::check_cancelled(cancel)?;
        if sql.trim().is_empty() {
            return Err(ApiError::BadRequest("sql must not be empty".to_string()));
        }
        self.engine.execute(db, sql, args)
    }

    pub fn begin(&self, cancel: &CancellationToken, db: &str) -> ApiResult<EngineTxHandle> {
        Self::check_cancelled(cancel)?;
        self.engine.begin(db)
    }

    pub fn execute_in_tx(
        &self,
        cancel: &CancellationToken,
        tx: &EngineTxHandle,
        sql: &str,
        args: &[Json],
    ) -> ApiResult<ExecuteResult> {
        Self::check_cancelled(cancel)?;
        if sql.trim().is_empty() {
            return Err(ApiError::BadRequest("sql must not be empty".to_string()));
        }
        self.engine.execute_in_tx(tx, sql, args)
    }

    /// REDESIGN FLAG (a): commit the engine transaction before the caller
    /// removes it from the registry. A failed commit must not be treated
    /// as success by the caller.
    pub fn commit(&self, cancel: &CancellationToken, tx: &EngineTxHandle) -> ApiResult<()> {
        Self::check_cancelled(cancel)?;
        self.engine.commit(tx)
    }

    pub fn rollback(&self, cancel: &CancellationToken, tx: &EngineTxHandle) -> ApiResult<()> {
        Self::check_cancelled(cancel)?;
        self.engine.rollback(tx)
    }

    pub fn create_procedure(
        &self,
        cancel: &CancellationToken,
        name: &str,
        wasm_base64: &str,
        declared_params: Option<Vec<ProcParam>>,
        declared_return: Option<String>,
    ) -> ApiResult<()> {
        use base64::Engine as _;
        Self::check_cancelled(cancel)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(wasm_base64)
            .map_err(|e| ApiError::BadRequest(format!("invalid wasm_base64: {e}")))?;
        let (params, ret) = match declared_params {
            Some(p) => (p, declared_return),
            None => procedures::infer_signature(&bytes)?,
        };
        let ret = declared_return.or(ret);
        self.engine.create_procedure(name, &bytes, params, ret)
    }

    pub fn drop_procedure(&self, cancel: &CancellationToken, name: &str) -> ApiResult<()> {
        Self::check_cancelled(cancel)?;
        self.engine.drop_procedure(name)
    }

    pub fn list_procedures(&self, cancel: &CancellationToken) -> ApiResult<Vec<ProcedureInfo>> {
        Self::check_cancelled(cancel)?;
        self.engine.list_procedures()
    }

    pub fn call_procedure(
        &self,
        cancel: &CancellationToken,
        name: &str,
        args: &[Json],
    ) -> ApiResult<Json> {
        Self::check_cancelled(cancel)?;
        self.engine.call_procedure(name, args)
    }

    /// Flush durable state. Called once by the lifecycle sequencer during
    /// shutdown, after the transaction registry has been closed.
    pub fn flush(&self) -> ApiResult<()> {
        self.engine.flush()
    }
}
