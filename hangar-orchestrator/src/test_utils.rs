use crate::clock::{Clock, ManualClock};
use crate::config::OrchestratorConfig;
use crate::orchestrator::BuildOrchestrator;
use crate::permission::{Actor, Role, RoleGate};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Helper to create an in-memory test database with migrations applied.
///
/// Every connection to `sqlite::memory:` is its own database, so the pool is
/// pinned to a single connection that is never closed.
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Insert a bare workspace with one job-less build and return the build ID.
pub async fn fixture_build_row(pool: &SqlitePool) -> String {
    let workspace_id = Uuid::new_v4().to_string();
    let build_id = Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO workspaces (id, organization_id, owner, name, template_version_id, created_at, updated_at)
         VALUES (?, 'default', 'fixture', ?, 'tv-1', 0, 0)",
    )
    .bind(&workspace_id)
    .bind(format!("ws-{}", &workspace_id[..8]))
    .execute(pool)
    .await
    .expect("Failed to insert fixture workspace");

    sqlx::query(
        "INSERT INTO workspace_builds (id, workspace_id, build_number, transition, initiator, created_at)
         VALUES (?, ?, 1, 'start', 'fixture', 0)",
    )
    .bind(&build_id)
    .bind(&workspace_id)
    .execute(pool)
    .await
    .expect("Failed to insert fixture build");

    build_id
}

/// Orchestrator over a fresh in-memory database with the role-based gate,
/// a manual clock and fast polling.
pub async fn test_orchestrator() -> (BuildOrchestrator, ManualClock) {
    test_orchestrator_with(test_config()).await
}

pub async fn test_orchestrator_with(config: OrchestratorConfig) -> (BuildOrchestrator, ManualClock) {
    let clock = ManualClock::default();
    let orchestrator = BuildOrchestrator::with_config(
        create_test_db().await,
        Arc::new(RoleGate),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        config,
    );
    (orchestrator, clock)
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default().with_poll_interval(Duration::from_millis(25))
}

/// A plain user with no roles beyond membership.
pub fn user(id: &str) -> Actor {
    Actor::new(id, [Role::Member])
}

pub fn admin() -> Actor {
    Actor::new("admin", [Role::Owner])
}
