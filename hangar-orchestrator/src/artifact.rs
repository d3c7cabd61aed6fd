//! Write-once storage for the opaque state blob of each build.

use crate::clock::{to_millis, Clock};
use crate::error::{OrchestratorError, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ArtifactStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn put(&self, build_id: &str, state: &[u8]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.put_with(&mut conn, build_id, state).await
    }

    /// Store `state` for `build_id`. Writing the same bytes again is a no-op;
    /// writing different bytes fails with `StateAlreadyWritten`.
    #[instrument(skip(self, conn, state), fields(build_id = %build_id, bytes = state.len()))]
    pub async fn put_with(
        &self,
        conn: &mut SqliteConnection,
        build_id: &str,
        state: &[u8],
    ) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO state_artifacts (build_id, state, created_at) VALUES (?, ?, ?)
             ON CONFLICT (build_id) DO NOTHING",
        )
        .bind(build_id)
        .bind(state)
        .bind(to_millis(self.clock.now()))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match Self::fetch(conn, build_id).await? {
            Some(existing) if existing == state => {
                debug!("identical state already stored");
                Ok(())
            }
            _ => Err(OrchestratorError::StateAlreadyWritten(build_id.to_string())),
        }
    }

    /// `None` means the build has no artifact; `Some(vec![])` is a stored empty state.
    pub async fn get(&self, build_id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, build_id).await
    }

    pub(crate) async fn fetch(conn: &mut SqliteConnection, build_id: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT state FROM state_artifacts WHERE build_id = ?")
                .bind(build_id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(row.map(|(state,)| state))
    }
}
