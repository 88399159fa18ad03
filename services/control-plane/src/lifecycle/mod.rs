//! Project lifecycle.
//!
//! A project is born by reserving quota and inserting its row in one
//! transaction, then asking the rollout system for a namespace. From that
//! point the status column owns the story: `provisioning` until the
//! rollout converges or the deadline passes, then `active` or `failed`;
//! `deleting` while the namespace is being torn down, after which the row
//! disappears. Quota flows back exactly once: on failure or on deletion
//! of an active project, never for a project that already failed.

pub mod monitor;
pub mod namespace;
pub mod sla;
pub mod worker;

pub use monitor::{RolloutMonitor, RolloutMonitorConfig};
pub use worker::RolloutSweeper;

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{error, info};

use caphub_id::{ProjectId, TeamId};

use crate::allocation::engine;
use crate::db::org;
use crate::db::projects::{self, NewProject, ProjectRow, ProjectStatus};
use crate::errors::CoreError;
use crate::principal::{Principal, Role};
use crate::provisioner::{NamespaceSpec, Provisioner};

use self::sla::{PerformanceTier, SlaType};

#[derive(Debug)]
pub struct CreateProjectParams {
    pub team_id: TeamId,
    pub name: String,
    pub site: String,
    pub sla_type: SlaType,
    pub performance_tier: PerformanceTier,
}

pub struct ProjectLifecycle {
    pool: PgPool,
    provisioner: Arc<dyn Provisioner>,
    monitor: Arc<RolloutMonitor>,
}

impl ProjectLifecycle {
    pub fn new(
        pool: PgPool,
        provisioner: Arc<dyn Provisioner>,
        monitor: Arc<RolloutMonitor>,
    ) -> Self {
        Self {
            pool,
            provisioner,
            monitor,
        }
    }

    /// Admit a new project: reserve team quota and insert the row in one
    /// transaction, then request the namespace and start watching it.
    pub async fn create_project(
        &self,
        principal: &Principal,
        params: CreateProjectParams,
    ) -> Result<ProjectRow, CoreError> {
        if principal.role != Role::TeamLead {
            return Err(CoreError::forbidden("only team_lead can create projects"));
        }
        let team_key = params.team_id.to_string();
        if !principal.is_scoped_to(&team_key) {
            return Err(CoreError::forbidden(
                "project team does not match the caller's team scope",
            ));
        }
        if params.name.trim().is_empty() {
            return Err(CoreError::validation("project name must not be empty"));
        }
        if params.site.trim().is_empty() {
            return Err(CoreError::validation("site must not be empty"));
        }

        let Some(team) = org::fetch_team(&self.pool, &team_key).await? else {
            return Err(CoreError::not_found(format!("team '{team_key}' not found")));
        };

        let (required_cpu, required_ram_gb) =
            sla::quota_for(params.sla_type, params.performance_tier);
        let namespace = namespace::namespace_name(&team.name, &params.name)?;
        let project_id = ProjectId::new().to_string();

        let mut tx = self.pool.begin().await?;
        engine::reserve(&mut tx, &team_key, &params.site, required_cpu, required_ram_gb).await?;
        let project = projects::insert(
            &mut tx,
            &NewProject {
                id: &project_id,
                team_id: &team_key,
                name: &params.name,
                site: &params.site,
                sla_type: params.sla_type.as_str(),
                performance_tier: params.performance_tier.as_str(),
                namespace_name: &namespace,
                reserved_cpu: required_cpu,
                reserved_ram_gb: required_ram_gb,
            },
        )
        .await
        .map_err(|e| {
            CoreError::conflict_on_unique(e, format!("namespace '{namespace}' already exists"))
        })?;
        tx.commit().await?;

        info!(
            project_id = %project.id,
            team_id = %team_key,
            site = %params.site,
            namespace = %namespace,
            cpu = required_cpu,
            ram_gb = required_ram_gb,
            "project admitted; reservation held"
        );

        // The reservation is committed; every failure path from here must
        // run the compensating release exactly once.
        let spec = NamespaceSpec {
            namespace_name: namespace.clone(),
            team_id: team_key.clone(),
            cpu: required_cpu,
            ram_gb: required_ram_gb,
        };
        if let Err(e) = self.provisioner.request(&spec).await {
            error!(error = %e, project_id = %project.id, "provisioning request failed; compensating");
            if let Err(comp) =
                monitor::fail_and_release(&self.pool, &project.id, "provisioning request failed")
                    .await
            {
                // The sweeper re-attaches a poll task, which retires the
                // project at the deadline, so a failed compensation only
                // delays the release.
                error!(
                    error = %comp,
                    project_id = %project.id,
                    "compensation failed; the sweeper will retire this project"
                );
            }
            return Err(CoreError::Provisioning(e));
        }

        self.monitor.spawn_poll(project.clone());

        Ok(project)
    }

    /// Fetch one project. Out-of-scope team leads get the same answer as
    /// for a missing project.
    pub async fn get_project(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
    ) -> Result<ProjectRow, CoreError> {
        let id_str = project_id.to_string();
        let Some(project) = projects::fetch(&self.pool, &id_str).await? else {
            return Err(CoreError::not_found(format!("project '{id_str}' not found")));
        };
        if principal.role == Role::TeamLead && !principal.is_scoped_to(&project.team_id) {
            return Err(CoreError::not_found(format!("project '{id_str}' not found")));
        }
        Ok(project)
    }

    /// Keyset-paginated listing. Team leads only ever see their own team.
    pub async fn list_projects(
        &self,
        principal: &Principal,
        team_filter: Option<TeamId>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ProjectRow>, CoreError> {
        let effective_team = match principal.role {
            Role::TeamLead => {
                let Some(scope) = principal.scope_id.clone() else {
                    return Err(CoreError::forbidden(
                        "team_lead principals must carry a team scope",
                    ));
                };
                if let Some(requested) = team_filter {
                    if requested.to_string() != scope {
                        return Err(CoreError::forbidden(
                            "team_lead can only list their own team's projects",
                        ));
                    }
                }
                Some(scope)
            }
            _ => team_filter.map(|t| t.to_string()),
        };

        let rows = projects::list(&self.pool, effective_team.as_deref(), cursor, limit).await?;
        Ok(rows)
    }

    /// Delete a project.
    ///
    /// Active projects release their reservation here, in the same
    /// transaction that moves them to `deleting`. Failed projects released
    /// theirs when they failed and must not release again. Projects still
    /// provisioning, or already deleting, are conflicts.
    pub async fn delete_project(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
    ) -> Result<ProjectRow, CoreError> {
        if principal.role != Role::TeamLead {
            return Err(CoreError::forbidden("only team_lead can delete projects"));
        }

        let id_str = project_id.to_string();
        let mut tx = self.pool.begin().await?;

        let Some(project) = projects::fetch_for_update(&mut tx, &id_str).await? else {
            return Err(CoreError::not_found(format!("project '{id_str}' not found")));
        };
        if !principal.is_scoped_to(&project.team_id) {
            return Err(CoreError::forbidden("project belongs to a different team"));
        }

        let updated = match project.status.as_str() {
            "active" => {
                let Some(updated) = projects::transition(
                    &mut tx,
                    &id_str,
                    ProjectStatus::Active,
                    ProjectStatus::Deleting,
                )
                .await?
                else {
                    return Err(CoreError::conflict(format!(
                        "project '{id_str}' changed status during deletion"
                    )));
                };
                engine::release(
                    &mut tx,
                    &updated.team_id,
                    &updated.site,
                    updated.reserved_cpu,
                    updated.reserved_ram_gb,
                )
                .await?;
                updated
            }
            "failed" => {
                // The reservation was already released when the project
                // failed; only the namespace and the row remain.
                projects::transition(
                    &mut tx,
                    &id_str,
                    ProjectStatus::Failed,
                    ProjectStatus::Deleting,
                )
                .await?
                .ok_or_else(|| {
                    CoreError::conflict(format!(
                        "project '{id_str}' changed status during deletion"
                    ))
                })?
            }
            "provisioning" => {
                return Err(CoreError::conflict(
                    "project is still provisioning; wait for it to finish before deleting",
                ));
            }
            "deleting" => {
                return Err(CoreError::conflict("project deletion is already in progress"));
            }
            other => {
                return Err(CoreError::conflict(format!(
                    "project '{id_str}' has unexpected status '{other}'"
                )));
            }
        };

        tx.commit().await?;

        info!(
            project_id = %updated.id,
            team_id = %updated.team_id,
            "project deletion started"
        );

        self.monitor.spawn_teardown(updated.clone());

        Ok(updated)
    }
}
