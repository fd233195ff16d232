use marlo_aggregate::aggregate;
use marlo_contracts::AggregatedSeries;
use marlo_store::{Datastore, StoreError};

#[derive(Debug)]
pub enum QueryError {
    UserNotFound(String),
    ForbiddenRole(String),
    Store(StoreError),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::UserNotFound(username) => {
                write!(f, "no user record for {}", username)
            }
            QueryError::ForbiddenRole(username) => {
                write!(f, "role of {} is not authorized for data access", username)
            }
            QueryError::Store(err) => write!(f, "record store unavailable: {}", err),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<StoreError> for QueryError {
    fn from(value: StoreError) -> Self {
        QueryError::Store(value)
    }
}

/// Orchestrates one read request: role resolution, group scoping, store
/// read, aggregation. Holds no state beyond the injected store handle.
#[derive(Clone)]
pub struct QueryService<S> {
    store: S,
}

impl<S: Datastore> QueryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Role-gated view: resolves the caller's stored role, maps it to a
    /// group scope, reads one bounded page of visible observations and
    /// aggregates them.
    pub async fn user_data(&self, username: &str) -> Result<Vec<AggregatedSeries>, QueryError> {
        let user = self
            .store
            .find_user(username)
            .await?
            .ok_or_else(|| QueryError::UserNotFound(username.to_string()))?;

        let scope = marlo_access::visible_groups(user.role)
            .map_err(|_| QueryError::ForbiddenRole(username.to_string()))?;

        let observations = self.store.find_observations(scope).await?;
        Ok(aggregate(&observations))
    }

    /// Whole-store view: aggregates every stored observation. Not gated by
    /// caller identity; kept that way on purpose.
    pub async fn aggregated_data(&self) -> Result<Vec<AggregatedSeries>, QueryError> {
        let observations = self.store.find_all_observations().await?;
        Ok(aggregate(&observations))
    }
}
