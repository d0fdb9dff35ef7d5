//! Connection pool for work that runs outside of a request, such as the
//! reminder engine and its timer loop.

use crate::configuration::DatabaseSettings;
use anyhow::Context;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use std::time::Duration;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub fn get_connection_pool(configuration: &DatabaseSettings) -> PgPool {
    let manager = ConnectionManager::<PgConnection>::new(configuration.connection_string());
    Pool::builder()
        .connection_timeout(Duration::from_secs(2))
        .build_unchecked(manager)
}

/// Runs a blocking diesel closure on the blocking thread pool.
pub async fn with_connection<F, T>(pool: &PgPool, f: F) -> Result<T, anyhow::Error>
where
    F: FnOnce(&PgConnection) -> Result<T, anyhow::Error> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .context("Failed to acquire a Postgres connection from the pool.")?;
        f(&*conn)
    })
    .await
    .context("The blocking database task did not complete.")?
}
