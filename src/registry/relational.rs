//! Relational registry backend (PostgreSQL / SQLite via `sqlx::Any`)
//!
//! Every operation fetches a fresh access token, opens one connection (the
//! token is the PostgreSQL password), runs its statement and closes the
//! connection. The table is created on first use.
//!
//! Timestamps live in `TIMESTAMP` columns holding UTC. `sqlx::Any` cannot
//! decode timestamp types, so writes bind UTC text and reads select epoch
//! milliseconds through a per-dialect expression.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Connection, Row};
use tracing::{debug, info};
use url::Url;

use super::{ClientRegistry, RegistryEntry, validate_table_name};
use crate::clock::Clock;
use crate::identity::AccessTokenProvider;
use crate::{Error, Result};

/// SQL flavour, picked from the database URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL (`postgres://`, `postgresql://`)
    Postgres,
    /// SQLite (`sqlite:`)
    Sqlite,
}

impl Dialect {
    /// Detect the dialect of `url`.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split_once(':').map(|(s, _)| s.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("postgres" | "postgresql") => Ok(Self::Postgres),
            Some("sqlite") => Ok(Self::Sqlite),
            _ => Err(Error::Config(
                "registry.database_url must be a postgres:// or sqlite: URL".to_string(),
            )),
        }
    }

    fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite => format!("?{n}"),
        }
    }

    fn blob_type(self) -> &'static str {
        match self {
            Self::Postgres => "BYTEA",
            Self::Sqlite => "BLOB",
        }
    }

    /// Placeholder for a timestamp bound as UTC text.
    ///
    /// SQLite keeps the text as is; a cast there would apply numeric affinity.
    fn timestamp_placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("CAST(${n} AS TIMESTAMP)"),
            Self::Sqlite => format!("?{n}"),
        }
    }

    /// Expression reading `column` as UTC epoch milliseconds.
    fn epoch_millis(self, column: &str) -> String {
        match self {
            Self::Postgres => format!("CAST(EXTRACT(EPOCH FROM {column}) * 1000 AS BIGINT)"),
            Self::Sqlite => {
                format!("CAST(ROUND((julianday({column}) - 2440587.5) * 86400000.0) AS INTEGER)")
            }
        }
    }
}

/// UTC text accepted by both dialects as a `TIMESTAMP` value
fn timestamp_text(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Registry stored in a single SQL table
pub struct SqlRegistry {
    database_url: String,
    dialect: Dialect,
    table: String,
    identity: Arc<dyn AccessTokenProvider>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    schema_ready: AtomicBool,
}

impl SqlRegistry {
    /// Create a registry for `database_url` (without a password).
    pub fn new(
        database_url: &str,
        table: &str,
        identity: Arc<dyn AccessTokenProvider>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Result<Self> {
        validate_table_name(table)?;
        let dialect = Dialect::from_url(database_url)?;
        sqlx::any::install_default_drivers();

        Ok(Self {
            database_url: database_url.to_string(),
            dialect,
            table: table.to_string(),
            identity,
            clock,
            timeout,
            schema_ready: AtomicBool::new(false),
        })
    }

    /// SQL dialect in use
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the table if it does not exist. Safe to call repeatedly.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.bounded("ensure_schema", async {
            let mut conn = self.connect().await?;
            self.create_table(&mut conn).await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             client_id TEXT PRIMARY KEY, \
             value {} NOT NULL, \
             created_at TIMESTAMP NOT NULL, \
             updated_at TIMESTAMP NOT NULL)",
            self.table,
            self.dialect.blob_type()
        )
    }

    async fn create_table(&self, conn: &mut AnyConnection) -> Result<()> {
        sqlx::query(&self.create_table_sql()).execute(&mut *conn).await?;
        self.schema_ready.store(true, Ordering::Release);
        info!(table = %self.table, "Registry schema ready");
        Ok(())
    }

    fn connection_url(&self, token: &str) -> Result<String> {
        match self.dialect {
            Dialect::Sqlite => Ok(self.database_url.clone()),
            Dialect::Postgres => {
                let mut url = Url::parse(&self.database_url)
                    .map_err(|e| Error::Config(format!("Invalid registry.database_url: {e}")))?;
                url.set_password(Some(token)).map_err(|()| {
                    Error::Config("registry.database_url cannot carry a password".to_string())
                })?;
                Ok(url.into())
            }
        }
    }

    /// Open a connection with a freshly fetched credential.
    async fn connect(&self) -> Result<AnyConnection> {
        let token = self.identity.access_token().await?;
        let url = self.connection_url(token.token.expose_secret())?;
        let conn = AnyConnection::connect(&url)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("Registry connection failed: {e}")))?;
        debug!(provider = self.identity.name(), "Opened registry connection");
        Ok(conn)
    }

    /// Connect and bootstrap the schema on first use.
    async fn session(&self) -> Result<AnyConnection> {
        let mut conn = self.connect().await?;
        if !self.schema_ready.load(Ordering::Acquire) {
            self.create_table(&mut conn).await?;
        }
        Ok(conn)
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            Error::BackendTimeout(format!(
                "registry {op} did not finish within {:?}",
                self.timeout
            ))
        })?
    }

    fn row_to_entry(row: &AnyRow) -> Result<RegistryEntry> {
        Ok(RegistryEntry {
            client_id: row.try_get("client_id")?,
            value: row.try_get("value")?,
            created_at: from_millis(row.try_get("created_ms")?)?,
            updated_at: from_millis(row.try_get("updated_ms")?)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Storage(format!("Timestamp out of range: {ms}")))
}

#[async_trait::async_trait]
impl ClientRegistry for SqlRegistry {
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let now = timestamp_text(self.clock.now());
        let sql = format!(
            "INSERT INTO {table} (client_id, value, created_at, updated_at) \
             VALUES ({p1}, {p2}, {p3}, {p4}) \
             ON CONFLICT (client_id) DO UPDATE SET \
             value = excluded.value, updated_at = excluded.updated_at",
            table = self.table,
            p1 = self.dialect.placeholder(1),
            p2 = self.dialect.placeholder(2),
            p3 = self.dialect.timestamp_placeholder(3),
            p4 = self.dialect.timestamp_placeholder(4),
        );

        self.bounded("set", async {
            let mut conn = self.session().await?;
            sqlx::query(&sql)
                .bind(key.to_string())
                .bind(value.to_vec())
                .bind(now.clone())
                .bind(now)
                .execute(&mut conn)
                .await?;
            conn.close().await?;
            debug!(client_id = %key, "Stored registry row");
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE client_id = {}",
            self.table,
            self.dialect.placeholder(1)
        );

        self.bounded("delete", async {
            let mut conn = self.session().await?;
            let result = sqlx::query(&sql)
                .bind(key.to_string())
                .execute(&mut conn)
                .await?;
            conn.close().await?;
            if result.rows_affected() > 0 {
                info!(client_id = %key, "Deleted registry row");
            }
            Ok(())
        })
        .await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let updated_ms = self.dialect.epoch_millis("updated_at");
        let sql = if prefix.is_empty() {
            format!(
                "SELECT client_id, {updated_ms} AS updated_ms FROM {} \
                 ORDER BY updated_ms DESC, client_id",
                self.table
            )
        } else {
            let p = self.dialect.placeholder(1);
            format!(
                "SELECT client_id, {updated_ms} AS updated_ms FROM {} \
                 WHERE substr(client_id, 1, length({p})) = {p} \
                 ORDER BY updated_ms DESC, client_id",
                self.table
            )
        };

        self.bounded("list_keys", async {
            let mut conn = self.session().await?;
            let mut query = sqlx::query(&sql);
            if !prefix.is_empty() {
                query = query.bind(prefix.to_string());
            }
            let rows = query.fetch_all(&mut conn).await?;
            conn.close().await?;

            rows.iter()
                .map(|row| row.try_get::<String, _>("client_id").map_err(Error::from))
                .collect()
        })
        .await
    }

    async fn entry(&self, key: &str) -> Result<Option<RegistryEntry>> {
        let sql = format!(
            "SELECT client_id, value, {} AS created_ms, {} AS updated_ms FROM {} \
             WHERE client_id = {}",
            self.dialect.epoch_millis("created_at"),
            self.dialect.epoch_millis("updated_at"),
            self.table,
            self.dialect.placeholder(1)
        );

        self.bounded("get", async {
            let mut conn = self.session().await?;
            let row = sqlx::query(&sql)
                .bind(key.to_string())
                .fetch_optional(&mut conn)
                .await?;
            conn.close().await?;
            row.as_ref().map(Self::row_to_entry).transpose()
        })
        .await
    }

    async fn initialize(&self) -> Result<()> {
        self.ensure_schema().await
    }

    fn backend_name(&self) -> &'static str {
        "relational"
    }
}
