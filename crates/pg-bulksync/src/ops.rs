//! Bulk operator: orchestration of insert, merge, and sync.
//!
//! Each call runs one ephemeral transfer session through strictly sequential
//! phases: connect, stage (when a staging table is needed), write, finalize,
//! cleanup. Cleanup always runs, even after a failure, and never masks the
//! original error. Sessions are never shared across calls; staging table
//! names carry a per-session random suffix so independent callers can
//! merge/sync against the same destination concurrently.

use std::time::Instant;

use deadpool_postgres::Pool;
use tokio::task::JoinHandle;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BulkConfig, ConnectOptions};
use crate::connect;
use crate::copy::BinaryCopyWriter;
use crate::error::{BulkError, Result};
use crate::metadata::{TableDescriptor, TableMapped};
use crate::sqlgen;

/// Pool size for operator-owned pools.
const DEFAULT_POOL_SIZE: usize = 4;

/// Options for [`BulkOperator::insert`].
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Skip rows whose key already exists instead of failing the call.
    pub on_conflict_ignore: bool,

    /// Per-call command timeout in seconds, replacing the operator's
    /// configured value. 0 means no timeout.
    pub command_timeout_secs: Option<u64>,

    /// Cooperative cancellation signal, observed between rows and before
    /// each SQL statement.
    pub cancellation: CancellationToken,
}

/// Options for [`BulkOperator::merge`].
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Identity key to merge on, replacing the descriptor's key columns.
    /// Must be non-empty and reference mapped columns when supplied.
    pub key_override: Option<Vec<String>>,

    /// Per-call command timeout in seconds. 0 means no timeout.
    pub command_timeout_secs: Option<u64>,

    /// Cooperative cancellation signal.
    pub cancellation: CancellationToken,
}

/// Options for [`BulkOperator::sync`].
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// SQL predicate fragment limiting which destination rows the sync
    /// delete may touch. Rows outside its scope are never deleted.
    pub delete_predicate: Option<String>,

    /// Per-call command timeout in seconds. 0 means no timeout.
    pub command_timeout_secs: Option<u64>,

    /// Cooperative cancellation signal.
    pub cancellation: CancellationToken,
}

/// Bulk transfer operator for one PostgreSQL destination.
///
/// Holds a connection source and the command configuration; every verb call
/// creates and tears down its own session.
pub struct BulkOperator {
    pool: Option<Pool>,
    options: Option<ConnectOptions>,
    config: BulkConfig,
}

impl BulkOperator {
    /// Build an operator over a caller-supplied pool (the connection-reuse
    /// path).
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool: Some(pool),
            options: None,
            config: BulkConfig::default(),
        }
    }

    /// Build an operator that owns its connections, opened from `options`.
    pub fn connect(options: ConnectOptions) -> Result<Self> {
        let pool = connect::build_pool(&options, DEFAULT_POOL_SIZE)?;
        Ok(Self {
            pool: Some(pool),
            options: Some(options),
            config: BulkConfig::default(),
        })
    }

    /// Override the command configuration for this operator instance.
    pub fn with_config(mut self, config: BulkConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply connect options so a pool-built operator can open dedicated
    /// connections when `reuse_external_connection` is off.
    pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Bulk-insert entities mapped via [`TableMapped`].
    pub async fn insert<T: TableMapped>(&self, rows: &[T], options: InsertOptions) -> Result<u64> {
        self.insert_with(&T::table_descriptor(), rows, options).await
    }

    /// Bulk-insert entities through an explicit descriptor.
    ///
    /// Streams rows straight into the destination table; with
    /// `on_conflict_ignore` the rows are staged and finalized with conflict
    /// skipping so a duplicate key is ignored rather than fatal.
    pub async fn insert_with<T>(
        &self,
        descriptor: &TableDescriptor<T>,
        rows: &[T],
        options: InsertOptions,
    ) -> Result<u64> {
        descriptor.validate()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let cancel = options.cancellation.clone();
        let mut session = self
            .begin(descriptor.table(), options.command_timeout_secs, &cancel)
            .await?;

        let result = if options.on_conflict_ignore {
            self.run_staged(&mut session, descriptor, rows, &cancel, Finalize::InsertIgnore)
                .await
        } else {
            self.run_direct(&mut session, descriptor, rows, &cancel).await
        };

        session.cleanup().await;
        log_outcome("insert", descriptor.table(), &result, started);
        result
    }

    /// Upsert entities mapped via [`TableMapped`].
    pub async fn merge<T: TableMapped>(&self, rows: &[T], options: MergeOptions) -> Result<u64> {
        self.merge_with(&T::table_descriptor(), rows, options).await
    }

    /// Upsert entities through an explicit descriptor.
    ///
    /// Rows are staged and folded into the destination with a single upsert
    /// keyed on the descriptor's key columns or the supplied override; every
    /// non-key column takes the staging row's value on conflict.
    pub async fn merge_with<T>(
        &self,
        descriptor: &TableDescriptor<T>,
        rows: &[T],
        options: MergeOptions,
    ) -> Result<u64> {
        descriptor.validate()?;
        let keys = descriptor.resolve_keys(options.key_override.as_deref())?;
        if rows.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let cancel = options.cancellation.clone();
        let mut session = self
            .begin(descriptor.table(), options.command_timeout_secs, &cancel)
            .await?;

        let result = self
            .run_staged(&mut session, descriptor, rows, &cancel, Finalize::Merge { keys: &keys })
            .await;

        session.cleanup().await;
        log_outcome("merge", descriptor.table(), &result, started);
        result
    }

    /// Reconcile the destination to exactly match `rows`, mapped via
    /// [`TableMapped`].
    pub async fn sync<T: TableMapped>(&self, rows: &[T], options: SyncOptions) -> Result<u64> {
        self.sync_with(&T::table_descriptor(), rows, options).await
    }

    /// Reconcile through an explicit descriptor.
    ///
    /// Deletes destination rows whose key is absent from `rows` (restricted
    /// to `delete_predicate` when supplied), then upserts the staged rows;
    /// both statements run in one transaction. An empty collection is
    /// honored: it empties the in-scope destination rows.
    pub async fn sync_with<T>(
        &self,
        descriptor: &TableDescriptor<T>,
        rows: &[T],
        options: SyncOptions,
    ) -> Result<u64> {
        descriptor.validate()?;
        let keys = descriptor.resolve_keys(None)?;

        let started = Instant::now();
        let cancel = options.cancellation.clone();
        let mut session = self
            .begin(descriptor.table(), options.command_timeout_secs, &cancel)
            .await?;

        let finalize = Finalize::Sync {
            keys: &keys,
            predicate: options.delete_predicate.as_deref(),
        };
        let result = self
            .run_staged(&mut session, descriptor, rows, &cancel, finalize)
            .await;

        session.cleanup().await;
        log_outcome("sync", descriptor.table(), &result, started);
        result
    }

    /// Connect phase: acquire a connection and apply the command timeout,
    /// taking the per-call override over the operator's configured value.
    async fn begin(
        &self,
        destination: &str,
        timeout_override: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<TransferSession> {
        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled);
        }

        let conn = self.acquire().await?;
        let session = TransferSession {
            conn,
            staging: None,
            timeout_secs: timeout_override.unwrap_or(self.config.command_timeout_secs),
            destination: destination.to_string(),
        };

        if session.timeout_secs > 0 {
            let millis = session.timeout_secs.saturating_mul(1000);
            session
                .conn
                .client()
                .batch_execute(&format!("SET statement_timeout = {}", millis))
                .await
                .map_err(BulkError::from_statement)?;
            debug!(destination = %session.destination, timeout_secs = session.timeout_secs,
                "applied command timeout");
        }

        Ok(session)
    }

    async fn acquire(&self) -> Result<SessionConn> {
        if self.config.reuse_external_connection {
            let pool = self.pool.as_ref().ok_or_else(|| {
                BulkError::Validation("operator has no connection pool".to_string())
            })?;
            let object = pool
                .get()
                .await
                .map_err(|e| BulkError::connection(e.to_string(), "acquiring pooled connection"))?;
            Ok(SessionConn::Pooled(object))
        } else {
            let options = self.options.as_ref().ok_or_else(|| {
                BulkError::Validation(
                    "dedicated connections require connect options; build the operator \
                     with connect() or with_connect_options()"
                        .to_string(),
                )
            })?;
            let (client, driver) = connect::connect_dedicated(options).await?;
            Ok(SessionConn::Dedicated { client, driver })
        }
    }

    /// Direct path: COPY straight into the destination table.
    async fn run_direct<T>(
        &self,
        session: &mut TransferSession,
        descriptor: &TableDescriptor<T>,
        rows: &[T],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled);
        }
        let writer =
            BinaryCopyWriter::open(session.conn.client(), descriptor.table(), descriptor.columns())
                .await?;
        writer.write_rows(rows.iter(), cancel).await?;
        writer.complete().await
    }

    /// Staged path: COPY into a per-session staging table, then run the
    /// finalize DML for the verb.
    async fn run_staged<T>(
        &self,
        session: &mut TransferSession,
        descriptor: &TableDescriptor<T>,
        rows: &[T],
        cancel: &CancellationToken,
        finalize: Finalize<'_>,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled);
        }
        let staging = session.create_staging(descriptor.table()).await?;

        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled);
        }
        let copied = {
            let writer =
                BinaryCopyWriter::open(session.conn.client(), &staging, descriptor.columns())
                    .await?;
            writer.write_rows(rows.iter(), cancel).await?;
            writer.complete().await?
        };

        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled);
        }

        let destination = descriptor.table();
        let columns = descriptor.column_names();
        match finalize {
            Finalize::InsertIgnore => {
                let upsert = sqlgen::insert_ignore_from_staging(destination, &staging, &columns)?;
                session.execute(&upsert).await?;
            }
            Finalize::Merge { keys } => {
                let upsert = sqlgen::merge_upsert(destination, &staging, &columns, keys)?;
                session.execute(&upsert).await?;
            }
            Finalize::Sync { keys, predicate } => {
                // Delete-then-upsert must be atomic: a failure between the
                // two would otherwise leave the destination truncated.
                let delete = sqlgen::sync_delete(destination, &staging, keys, predicate)?;
                let upsert = sqlgen::merge_upsert(destination, &staging, &columns, keys)?;

                let tx = session
                    .conn
                    .client_mut()
                    .transaction()
                    .await
                    .map_err(BulkError::from_statement)?;
                tx.execute(delete.as_str(), &[])
                    .await
                    .map_err(BulkError::from_statement)?;
                tx.execute(upsert.as_str(), &[])
                    .await
                    .map_err(BulkError::from_statement)?;
                tx.commit().await.map_err(BulkError::from_statement)?;
            }
        }

        Ok(copied)
    }
}

/// Finalize DML selection for the staged path.
enum Finalize<'a> {
    InsertIgnore,
    Merge { keys: &'a [String] },
    Sync { keys: &'a [String], predicate: Option<&'a str> },
}

/// Connection held for the duration of one session.
enum SessionConn {
    Pooled(deadpool_postgres::Object),
    Dedicated {
        client: Client,
        driver: JoinHandle<()>,
    },
}

impl SessionConn {
    fn client(&self) -> &Client {
        match self {
            SessionConn::Pooled(object) => object,
            SessionConn::Dedicated { client, .. } => client,
        }
    }

    fn client_mut(&mut self) -> &mut Client {
        match self {
            SessionConn::Pooled(object) => object,
            SessionConn::Dedicated { client, .. } => client,
        }
    }
}

impl Drop for SessionConn {
    fn drop(&mut self) {
        if let SessionConn::Dedicated { driver, .. } = self {
            driver.abort();
        }
    }
}

/// Per-call session state: one connection, at most one staging table.
struct TransferSession {
    conn: SessionConn,
    staging: Option<String>,
    timeout_secs: u64,
    destination: String,
}

impl TransferSession {
    async fn execute(&self, sql: &str) -> Result<u64> {
        self.conn
            .client()
            .execute(sql, &[])
            .await
            .map_err(BulkError::from_statement)
    }

    async fn create_staging(&mut self, destination: &str) -> Result<String> {
        let name = staging_table_name(destination);
        let ddl = sqlgen::staging_table_ddl(&name, destination)?;
        self.execute(&ddl).await?;
        debug!(staging = %name, destination = %destination, "created staging table");
        self.staging = Some(name.clone());
        Ok(name)
    }

    /// Best-effort teardown; failures are logged, never propagated, so they
    /// cannot mask the error that ended the session.
    async fn cleanup(&mut self) {
        if let Some(staging) = self.staging.take() {
            match sqlgen::drop_staging(&staging) {
                Ok(sql) => {
                    if let Err(e) = self.conn.client().execute(sql.as_str(), &[]).await {
                        warn!(staging = %staging, "failed to drop staging table: {}", e);
                    }
                }
                Err(e) => warn!(staging = %staging, "failed to build staging drop: {}", e),
            }
        }

        if self.timeout_secs > 0 {
            if let Err(e) = self
                .conn
                .client()
                .batch_execute("RESET statement_timeout")
                .await
            {
                warn!(destination = %self.destination, "failed to reset statement_timeout: {}", e);
            }
        }
    }
}

/// A staging table name unique to one session.
///
/// The destination part is truncated so the whole name stays within
/// PostgreSQL's 63-byte identifier limit.
fn staging_table_name(destination: &str) -> String {
    const PREFIX: &str = "_staging_";
    const SUFFIX_LEN: usize = 8;
    let max_dest = 63 - PREFIX.len() - 1 - SUFFIX_LEN;

    let dest: String = destination.chars().take(max_dest).collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}_{}", PREFIX, dest, &suffix[..SUFFIX_LEN])
}

fn log_outcome(verb: &str, table: &str, result: &Result<u64>, started: Instant) {
    match result {
        Ok(rows) => info!(
            verb = verb,
            table = table,
            rows = rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk operation completed"
        ),
        Err(e) => debug!(verb = verb, table = table, "bulk operation failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlValue;

    struct User {
        id: i64,
        name: String,
    }

    fn user_descriptor() -> TableDescriptor<User> {
        TableDescriptor::builder("users")
            .key_column("id", |u: &User| u.id.into())
            .column("name", |u: &User| u.name.clone().into())
            .build()
            .unwrap()
    }

    fn keyless_descriptor() -> TableDescriptor<User> {
        TableDescriptor::builder("users")
            .column("name", |u: &User| u.name.clone().into())
            .build()
            .unwrap()
    }

    fn lazy_operator() -> BulkOperator {
        // Pool construction is lazy; nothing here touches the network as
        // long as no connection is checked out.
        let options = ConnectOptions {
            host: "nowhere.invalid".to_string(),
            port: 5432,
            dbname: "app".to_string(),
            user: "app".to_string(),
            password: String::new(),
            ssl_mode: "disable".to_string(),
        };
        BulkOperator::connect(options).unwrap()
    }

    fn sample_user() -> User {
        User {
            id: 1,
            name: "ada".to_string(),
        }
    }

    #[test]
    fn test_staging_table_name_shape() {
        let name = staging_table_name("users");
        assert!(name.starts_with("_staging_users_"));
        assert!(name.len() <= 63);
        crate::identifier::validate_identifier(&name).unwrap();
    }

    #[test]
    fn test_staging_table_name_unique_per_session() {
        assert_ne!(staging_table_name("users"), staging_table_name("users"));
    }

    #[test]
    fn test_staging_table_name_truncates_long_destination() {
        let long = "a".repeat(80);
        let name = staging_table_name(&long);
        assert!(name.len() <= 63);
        crate::identifier::validate_identifier(&name).unwrap();
    }

    #[tokio::test]
    async fn test_empty_insert_is_a_noop() {
        let op = lazy_operator();
        let rows: Vec<User> = Vec::new();
        assert_eq!(
            op.insert_with(&user_descriptor(), &rows, InsertOptions::default())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_empty_merge_is_a_noop() {
        let op = lazy_operator();
        let rows: Vec<User> = Vec::new();
        assert_eq!(
            op.merge_with(&user_descriptor(), &rows, MergeOptions::default())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_merge_without_keys_fails_before_io() {
        let op = lazy_operator();
        let rows = vec![sample_user()];
        let err = op
            .merge_with(&keyless_descriptor(), &rows, MergeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn test_merge_with_unknown_key_override_fails_before_io() {
        let op = lazy_operator();
        let rows = vec![sample_user()];
        let options = MergeOptions {
            key_override: Some(vec!["missing".to_string()]),
            ..Default::default()
        };
        let err = op
            .merge_with(&user_descriptor(), &rows, options)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn test_merge_with_empty_key_override_fails_before_io() {
        let op = lazy_operator();
        let rows = vec![sample_user()];
        let options = MergeOptions {
            key_override: Some(Vec::new()),
            ..Default::default()
        };
        let err = op
            .merge_with(&user_descriptor(), &rows, options)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn test_precancelled_insert_reports_cancellation() {
        let op = lazy_operator();
        let rows = vec![sample_user()];
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let options = InsertOptions {
            cancellation,
            ..Default::default()
        };
        let err = op
            .insert_with(&user_descriptor(), &rows, options)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Cancelled), "{err}");
    }

    #[tokio::test]
    async fn test_dedicated_mode_requires_connect_options() {
        let options = ConnectOptions {
            host: "nowhere.invalid".to_string(),
            port: 5432,
            dbname: "app".to_string(),
            user: "app".to_string(),
            password: String::new(),
            ssl_mode: "disable".to_string(),
        };
        let pool = connect::build_pool(&options, 1).unwrap();
        let op = BulkOperator::from_pool(pool).with_config(BulkConfig {
            reuse_external_connection: false,
            ..Default::default()
        });

        let rows = vec![sample_user()];
        let err = op
            .insert_with(&user_descriptor(), &rows, InsertOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)), "{err}");
    }

    #[test]
    fn test_options_defaults() {
        let insert = InsertOptions::default();
        assert!(!insert.on_conflict_ignore);
        assert!(!insert.cancellation.is_cancelled());

        let merge = MergeOptions::default();
        assert!(merge.key_override.is_none());

        let sync = SyncOptions::default();
        assert!(sync.delete_predicate.is_none());
    }

    #[test]
    fn test_accessor_roundtrip_through_descriptor() {
        let descriptor = user_descriptor();
        let user = sample_user();
        assert_eq!(descriptor.columns()[0].value_of(&user), SqlValue::I64(1));
        assert_eq!(
            descriptor.columns()[1].value_of(&user),
            SqlValue::Text("ada".to_string())
        );
    }
}
