//! # pg-bulksync
//!
//! Bulk transfer and reconciliation for PostgreSQL tables over the binary
//! COPY protocol. Three verbs reconcile a destination table against an
//! in-memory collection:
//!
//! - **Insert**: stream rows straight into the destination, optionally
//!   skipping duplicate keys instead of failing
//! - **Merge**: stage rows and upsert them, keyed on the table's key columns
//!   or a per-call override
//! - **Sync**: make the destination's row set (by key) exactly equal to the
//!   collection, optionally scoped by a delete predicate
//!
//! Merge and sync stage rows through a session-scoped temporary table and
//! finalize with generated SQL; the staging DDL, the wire encoding, and the
//! finalize DML all share one column order taken from the table descriptor.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_bulksync::{BulkOperator, ConnectOptions, MergeOptions, TableDescriptor};
//!
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let descriptor = TableDescriptor::builder("users")
//!         .key_column("id", |u: &User| u.id.into())
//!         .column("name", |u: &User| u.name.clone().into())
//!         .build()?;
//!
//!     let operator = BulkOperator::connect(ConnectOptions {
//!         host: "localhost".into(),
//!         port: 5432,
//!         dbname: "app".into(),
//!         user: "app".into(),
//!         password: "secret".into(),
//!         ssl_mode: "disable".into(),
//!     })?;
//!
//!     let users = vec![User { id: 1, name: "ada".into() }];
//!     let rows = operator
//!         .merge_with(&descriptor, &users, MergeOptions::default())
//!         .await?;
//!     println!("merged {} rows", rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connect;
pub mod copy;
pub mod error;
pub mod identifier;
pub mod metadata;
pub mod ops;
pub mod sqlgen;
pub mod value;

// Re-exports for convenient access
pub use config::{BulkConfig, ConnectOptions};
pub use connect::SslMode;
pub use copy::BinaryCopyWriter;
pub use error::{BulkError, Result};
pub use metadata::{ColumnDescriptor, TableDescriptor, TableDescriptorBuilder, TableMapped};
pub use ops::{BulkOperator, InsertOptions, MergeOptions, SyncOptions};
pub use value::SqlValue;
