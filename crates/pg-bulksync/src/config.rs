//! Configuration types for bulk operations.

use serde::{Deserialize, Serialize};

/// Connection options for self-opened PostgreSQL connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub dbname: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

/// Behavior configuration for a bulk operator.
///
/// The process-wide defaults are no timeout and connection reuse; both can be
/// overridden per operator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Command timeout in seconds, enforced by the server per statement.
    /// 0 means no timeout (default).
    #[serde(default)]
    pub command_timeout_secs: u64,

    /// Reuse the caller-supplied connection pool instead of opening a
    /// dedicated connection per call (default: true).
    #[serde(default = "default_true")]
    pub reuse_external_connection: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 0,
            reuse_external_connection: true,
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_true() -> bool {
    true
}
