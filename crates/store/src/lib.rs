use std::time::Duration;

use async_trait::async_trait;
use marlo_access::GroupScope;
use marlo_contracts::{Observation, Role, User};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::Row;

/// Most observation rows a single scoped read returns. The role-gated query
/// reads one page of this size; the whole-store aggregation read is
/// unbounded.
pub const FIND_PAGE_LIMIT: i64 = 100;

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "record store operation timed out"),
            StoreError::Sqlx(err) => write!(f, "record store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

/// Read-only storage interface the query path depends on. Injected so tests
/// can stand in an in-memory double.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// One page of observations visible under `scope`, in insertion order,
    /// bounded by [`FIND_PAGE_LIMIT`].
    async fn find_observations(&self, scope: GroupScope) -> Result<Vec<Observation>, StoreError>;

    /// Every observation in the store, in insertion order.
    async fn find_all_observations(&self) -> Result<Vec<Observation>, StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
    call_timeout: Duration,
}

const OBSERVATION_COLUMNS: &str = "group_name, series_id, obs_date, value, fetched_at";

impl PgStore {
    pub async fn connect(db_url: &str, call_timeout: Duration) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new().max_connections(8).connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, call_timeout })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        call_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, call_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(self.call_timeout, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Inserts a user record; returns false when the username is taken.
    pub async fn create_user(&self, username: &str, role: &str) -> Result<bool, StoreError> {
        let result = tokio::time::timeout(
            self.call_timeout,
            sqlx::query(
                "INSERT INTO marlo_users (username, role) VALUES ($1, $2) ON CONFLICT (username) DO NOTHING",
            )
            .bind(username)
            .bind(role)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes a user record; returns false when no such user exists.
    pub async fn delete_user(&self, username: &str) -> Result<bool, StoreError> {
        let result = tokio::time::timeout(
            self.call_timeout,
            sqlx::query("DELETE FROM marlo_users WHERE username = $1")
                .bind(username)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.rows_affected() == 1)
    }

    /// Append-only write used by the ingestion job. Duplicate
    /// `(group, id, date)` rows are accepted by design.
    pub async fn append_observations(
        &self,
        observations: &[Observation],
    ) -> Result<(), StoreError> {
        tokio::time::timeout(self.call_timeout, async {
            let mut tx = self.pool.begin().await?;

            for obs in observations {
                sqlx::query(
                    "INSERT INTO marlo_observations (group_name, series_id, obs_date, value, fetched_at) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&obs.group)
                .bind(&obs.id)
                .bind(obs.date)
                .bind(obs.value)
                .bind(obs.fetched_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Datastore for PgStore {
    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = tokio::time::timeout(
            self.call_timeout,
            sqlx::query("SELECT username, role FROM marlo_users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let Some(row) = row else {
            return Ok(None);
        };

        let username: String = row.try_get("username")?;
        let role_raw: String = row.try_get("role")?;

        Ok(Some(User {
            username,
            role: Role::parse(&role_raw),
        }))
    }

    async fn find_observations(&self, scope: GroupScope) -> Result<Vec<Observation>, StoreError> {
        let select_all = format!(
            "SELECT {} FROM marlo_observations ORDER BY seq LIMIT $1",
            OBSERVATION_COLUMNS
        );
        let select_group = format!(
            "SELECT {} FROM marlo_observations WHERE group_name = $1 ORDER BY seq LIMIT $2",
            OBSERVATION_COLUMNS
        );

        let query = match scope {
            GroupScope::All => sqlx::query(&select_all).bind(FIND_PAGE_LIMIT),
            GroupScope::Group(name) => {
                sqlx::query(&select_group).bind(name).bind(FIND_PAGE_LIMIT)
            }
        };

        let rows = tokio::time::timeout(self.call_timeout, query.fetch_all(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;

        rows.iter()
            .map(|row| observation_from_row(row).map_err(StoreError::Sqlx))
            .collect()
    }

    async fn find_all_observations(&self) -> Result<Vec<Observation>, StoreError> {
        let select = format!(
            "SELECT {} FROM marlo_observations ORDER BY seq",
            OBSERVATION_COLUMNS
        );

        let rows = tokio::time::timeout(
            self.call_timeout,
            sqlx::query(&select).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        rows.iter()
            .map(|row| observation_from_row(row).map_err(StoreError::Sqlx))
            .collect()
    }
}

fn observation_from_row(row: &PgRow) -> Result<Observation, sqlx::Error> {
    Ok(Observation {
        group: row.try_get("group_name")?,
        id: row.try_get("series_id")?,
        date: row.try_get("obs_date")?,
        value: row.try_get("value")?,
        fetched_at: row.try_get("fetched_at")?,
    })
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
