//! Rollout monitoring: per-project poll and teardown tasks.
//!
//! Every project in `provisioning` has (at most) one poll task watching the
//! rollout system until the namespace converges, fails, or the deadline
//! passes. Every project in `deleting` has (at most) one teardown task.
//! The in-process registry keeps the sweeper and the request path from
//! attaching duplicate tasks; the rows themselves are the durable record,
//! so a crashed process just re-attaches on the next start.
//!
//! All status transitions are compare-and-set on the current status. A
//! task whose CAS matches zero rows learned that someone else moved the
//! project first; its signal is stale and is discarded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::allocation::engine;
use crate::db::projects::{self, ProjectRow, ProjectStatus};
use crate::errors::CoreError;
use crate::provisioner::{Provisioner, RolloutStatus};

/// Timing knobs for the rollout monitor.
#[derive(Debug, Clone)]
pub struct RolloutMonitorConfig {
    /// How often a poll task asks the rollout system for status.
    pub poll_interval: Duration,
    /// Wall-clock budget for a rollout, measured from project creation.
    pub poll_timeout: Duration,
    /// How long a teardown attempt may take before the row is removed anyway.
    pub teardown_timeout: Duration,
}

impl Default for RolloutMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(300),
            teardown_timeout: Duration::from_secs(60),
        }
    }
}

pub struct RolloutMonitor {
    pool: PgPool,
    provisioner: Arc<dyn Provisioner>,
    config: RolloutMonitorConfig,
    active: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
}

/// Registry entry that unregisters itself when the task ends, however the
/// task ends.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    project_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.project_id);
        }
    }
}

impl RolloutMonitor {
    pub fn new(
        pool: PgPool,
        provisioner: Arc<dyn Provisioner>,
        config: RolloutMonitorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            provisioner,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    fn try_register(&self, project_id: &str) -> Option<ActiveGuard> {
        let Ok(mut active) = self.active.lock() else {
            error!(project_id, "rollout task registry lock poisoned");
            return None;
        };
        if !active.insert(project_id.to_string()) {
            return None;
        }
        Some(ActiveGuard {
            active: Arc::clone(&self.active),
            project_id: project_id.to_string(),
        })
    }

    /// Attach a poll task to a provisioning project. A project that
    /// already has one keeps the one it has.
    pub fn spawn_poll(&self, project: ProjectRow) {
        let Some(guard) = self.try_register(&project.id) else {
            debug!(project_id = %project.id, "poll task already attached");
            return;
        };

        let pool = self.pool.clone();
        let provisioner = Arc::clone(&self.provisioner);
        let config = self.config.clone();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) =
                poll_project(&pool, provisioner.as_ref(), &config, &project, &mut shutdown).await
            {
                error!(error = %e, project_id = %project.id, "rollout poll task failed");
            }
        });
    }

    /// Attach a teardown task to a deleting project.
    pub fn spawn_teardown(&self, project: ProjectRow) {
        let Some(guard) = self.try_register(&project.id) else {
            debug!(project_id = %project.id, "teardown task already attached");
            return;
        };

        let pool = self.pool.clone();
        let provisioner = Arc::clone(&self.provisioner);
        let config = self.config.clone();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = teardown_project(&pool, provisioner.as_ref(), &config, &project).await
            {
                error!(error = %e, project_id = %project.id, "namespace teardown task failed");
            }
        });
    }

    /// Attach tasks to every project that should have one and does not.
    /// Called once at startup and periodically by the sweeper.
    pub async fn resume(&self) -> Result<(), CoreError> {
        let provisioning =
            projects::list_with_status(&self.pool, ProjectStatus::Provisioning).await?;
        for project in provisioning {
            self.spawn_poll(project);
        }

        let deleting = projects::list_with_status(&self.pool, ProjectStatus::Deleting).await?;
        for project in deleting {
            self.spawn_teardown(project);
        }

        Ok(())
    }
}

async fn poll_project(
    pool: &PgPool,
    provisioner: &dyn Provisioner,
    config: &RolloutMonitorConfig,
    project: &ProjectRow,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), CoreError> {
    // The deadline is anchored to the row's creation time, not to this
    // task's start, so a restart does not extend the budget.
    let budget = chrono::Duration::from_std(config.poll_timeout)
        .unwrap_or(chrono::Duration::MAX);
    let deadline = project.created_at + budget;

    info!(
        project_id = %project.id,
        namespace = %project.namespace_name,
        deadline = %deadline,
        "watching rollout"
    );

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(project_id = %project.id, "shutdown requested; poll resumes after restart");
                    return Ok(());
                }
                continue;
            }
        }

        if Utc::now() >= deadline {
            warn!(project_id = %project.id, "rollout did not converge before the deadline");
            fail_and_release(pool, &project.id, "rollout timed out").await?;
            return Ok(());
        }

        // Someone else may have moved the project (operator action, a
        // competing task after an ownership blip). Stop quietly if so.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM projects WHERE id = $1")
                .bind(&project.id)
                .fetch_optional(pool)
                .await?;
        match status.as_deref() {
            Some("provisioning") => {}
            other => {
                debug!(project_id = %project.id, status = ?other, "project left provisioning; poll task stopping");
                return Ok(());
            }
        }

        match provisioner.status(&project.namespace_name).await {
            Ok(RolloutStatus::Healthy) => {
                mark_active(pool, &project.id).await?;
                return Ok(());
            }
            Ok(RolloutStatus::Failed) => {
                fail_and_release(pool, &project.id, "rollout reported failure").await?;
                return Ok(());
            }
            Ok(RolloutStatus::Syncing) => {}
            Err(e) => {
                // Transient poll errors do not consume the project; only
                // the deadline does.
                warn!(error = %e, project_id = %project.id, "rollout status poll failed; will retry");
            }
        }
    }
}

async fn mark_active(pool: &PgPool, project_id: &str) -> Result<(), CoreError> {
    let mut conn = pool.acquire().await?;
    match projects::transition(
        &mut conn,
        project_id,
        ProjectStatus::Provisioning,
        ProjectStatus::Active,
    )
    .await?
    {
        Some(_) => info!(project_id, "project is active"),
        None => info!(
            project_id,
            "late healthy signal discarded; project already left provisioning"
        ),
    }
    Ok(())
}

/// Move a provisioning project to `failed` and hand its reservation back,
/// atomically. Returns false when the project had already left
/// `provisioning`, in which case nothing is changed.
pub(crate) async fn fail_and_release(
    pool: &PgPool,
    project_id: &str,
    reason: &str,
) -> Result<bool, CoreError> {
    let mut tx = pool.begin().await?;

    let Some(project) = projects::transition(
        &mut tx,
        project_id,
        ProjectStatus::Provisioning,
        ProjectStatus::Failed,
    )
    .await?
    else {
        tx.rollback().await?;
        debug!(project_id, "project already left provisioning; no compensation to run");
        return Ok(false);
    };

    engine::release(
        &mut tx,
        &project.team_id,
        &project.site,
        project.reserved_cpu,
        project.reserved_ram_gb,
    )
    .await?;
    tx.commit().await?;

    warn!(
        project_id,
        reason,
        cpu = project.reserved_cpu,
        ram_gb = project.reserved_ram_gb,
        "project failed; reservation released"
    );
    Ok(true)
}

async fn teardown_project(
    pool: &PgPool,
    provisioner: &dyn Provisioner,
    config: &RolloutMonitorConfig,
    project: &ProjectRow,
) -> Result<(), CoreError> {
    match tokio::time::timeout(
        config.teardown_timeout,
        provisioner.teardown(&project.namespace_name),
    )
    .await
    {
        Ok(Ok(())) => info!(
            project_id = %project.id,
            namespace = %project.namespace_name,
            "namespace teardown confirmed"
        ),
        Ok(Err(e)) => warn!(
            error = %e,
            project_id = %project.id,
            "namespace teardown failed; removing project row anyway"
        ),
        Err(_) => warn!(
            project_id = %project.id,
            timeout_secs = config.teardown_timeout.as_secs(),
            "namespace teardown not confirmed in time; removing project row anyway"
        ),
    }

    projects::delete_row(pool, &project.id).await?;
    info!(project_id = %project.id, "project row removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_rollout_cadence() {
        let config = RolloutMonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.poll_timeout, Duration::from_secs(300));
        assert_eq!(config.teardown_timeout, Duration::from_secs(60));
    }

    #[test]
    fn registry_rejects_duplicates_and_guard_releases() {
        let active = Arc::new(Mutex::new(HashSet::new()));
        let (_, shutdown) = watch::channel(false);
        let monitor = RolloutMonitor {
            pool: PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool"),
            provisioner: Arc::new(crate::provisioner::StubProvisioner),
            config: RolloutMonitorConfig::default(),
            active: Arc::clone(&active),
            shutdown,
        };

        let guard = monitor.try_register("prj_a").expect("first registration");
        assert!(monitor.try_register("prj_a").is_none());
        drop(guard);
        assert!(monitor.try_register("prj_a").is_some());
    }
}
