//! Quota administration and server assignment.
//!
//! These are the write paths for the two structural edges: a department
//! quota must fit inside its field's assigned server capacity, and team
//! quotas are carved out of their department's quota row through the
//! engine. Capacity checks for a field are serialized by locking the
//! field row itself, always before any quota row, so concurrent carving
//! cannot oversubscribe and lock order stays acyclic.

use sqlx::PgPool;
use tracing::{info, warn};

use caphub_id::{AllocationId, DepartmentId, FieldId, QuotaRowId, ServerId, TeamId};

use crate::allocation::engine;
use crate::db::quota_rows::{self, NewQuotaRow, QuotaRow, ScopeType};
use crate::db::org::{self, NewServerAllocation, ServerAllocationRow};
use crate::errors::{CoreError, ResourceKind};
use crate::principal::{Principal, Role};

#[derive(Debug)]
pub struct CreateDepartmentQuota {
    pub field_id: FieldId,
    pub department_id: DepartmentId,
    pub site: String,
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
}

#[derive(Debug)]
pub struct CreateTeamQuota {
    pub department_id: DepartmentId,
    pub team_id: TeamId,
    pub site: String,
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
}

/// Carve a department quota out of a field's server capacity.
pub async fn create_department_quota(
    pool: &PgPool,
    principal: &Principal,
    params: CreateDepartmentQuota,
) -> Result<QuotaRow, CoreError> {
    let field_key = params.field_id.to_string();
    let dept_key = params.department_id.to_string();

    require_role(principal, Role::FieldAdmin, "manage department quotas")?;
    require_scope(principal, &field_key, "field")?;
    validate_limits(params.cpu_limit, params.ram_gb_limit)?;
    validate_site(&params.site)?;

    let Some(department) = org::fetch_department(pool, &dept_key).await? else {
        return Err(CoreError::not_found(format!(
            "department '{dept_key}' not found"
        )));
    };
    if department.field_id != field_key {
        return Err(CoreError::validation(format!(
            "department '{dept_key}' does not belong to field '{field_key}'"
        )));
    }

    let mut tx = pool.begin().await?;

    if org::lock_field(&mut tx, &field_key).await?.is_none() {
        return Err(CoreError::not_found(format!("field '{field_key}' not found")));
    }

    if quota_rows::fetch_for_update(&mut tx, &dept_key, &params.site)
        .await?
        .is_some()
    {
        return Err(CoreError::conflict(format!(
            "department quota for '{dept_key}' at site '{}' already exists",
            params.site
        )));
    }

    let (capacity_cpu, capacity_ram) =
        org::field_capacity(&mut tx, &field_key, &params.site).await?;
    let (carved_cpu, carved_ram) =
        quota_rows::sum_child_limits(&mut tx, &field_key, &params.site).await?;

    if carved_cpu + params.cpu_limit > capacity_cpu {
        return Err(CoreError::QuotaExceeded {
            resource: ResourceKind::Cpu,
            requested: params.cpu_limit,
            available: capacity_cpu - carved_cpu,
            detail: format!(
                "field '{field_key}' has insufficient cpu capacity at site '{}'",
                params.site
            ),
        });
    }
    if carved_ram + params.ram_gb_limit > capacity_ram {
        return Err(CoreError::QuotaExceeded {
            resource: ResourceKind::RamGb,
            requested: params.ram_gb_limit,
            available: capacity_ram - carved_ram,
            detail: format!(
                "field '{field_key}' has insufficient ram capacity at site '{}'",
                params.site
            ),
        });
    }

    let quota_id = QuotaRowId::new().to_string();
    let row = quota_rows::insert(
        &mut tx,
        &NewQuotaRow {
            id: &quota_id,
            scope_type: ScopeType::Department,
            scope_entity_id: &dept_key,
            parent_scope_id: &field_key,
            site: &params.site,
            cpu_limit: params.cpu_limit,
            ram_gb_limit: params.ram_gb_limit,
        },
    )
    .await
    .map_err(|e| {
        CoreError::conflict_on_unique(
            e,
            format!(
                "department quota for '{dept_key}' at site '{}' already exists",
                params.site
            ),
        )
    })?;

    tx.commit().await?;

    info!(
        quota_id = %row.id,
        department_id = %dept_key,
        field_id = %field_key,
        site = %params.site,
        cpu_limit = params.cpu_limit,
        ram_gb_limit = params.ram_gb_limit,
        "department quota created"
    );

    Ok(row)
}

/// Change the limits of an existing department quota.
///
/// Shrinking below current usage and growing past the field's remaining
/// capacity are both conflicts with the structure already built on top of
/// this row.
pub async fn resize_department_quota(
    pool: &PgPool,
    principal: &Principal,
    quota_id: &QuotaRowId,
    cpu_limit: i64,
    ram_gb_limit: i64,
) -> Result<QuotaRow, CoreError> {
    require_role(principal, Role::FieldAdmin, "manage department quotas")?;
    validate_limits(cpu_limit, ram_gb_limit)?;

    let quota_key = quota_id.to_string();
    let mut tx = pool.begin().await?;

    // Probe without locking so the field lock can be taken first,
    // matching the order used by create_department_quota.
    let Some(probe) = quota_rows::fetch_by_id(&mut tx, &quota_key).await? else {
        return Err(CoreError::not_found(format!(
            "department quota '{quota_key}' not found"
        )));
    };
    if probe.scope_type != ScopeType::Department.as_str() {
        return Err(CoreError::not_found(format!(
            "department quota '{quota_key}' not found"
        )));
    }
    require_scope(principal, &probe.parent_scope_id, "field")?;

    if org::lock_field(&mut tx, &probe.parent_scope_id).await?.is_none() {
        return Err(CoreError::not_found(format!(
            "field '{}' not found",
            probe.parent_scope_id
        )));
    }

    let Some(row) = quota_rows::fetch_by_id_for_update(&mut tx, &quota_key).await? else {
        return Err(CoreError::not_found(format!(
            "department quota '{quota_key}' not found"
        )));
    };

    if cpu_limit < row.cpu_used {
        return Err(CoreError::conflict(format!(
            "cannot reduce cpu_limit to {cpu_limit}: {} cpu already in use",
            row.cpu_used
        )));
    }
    if ram_gb_limit < row.ram_gb_used {
        return Err(CoreError::conflict(format!(
            "cannot reduce ram_gb_limit to {ram_gb_limit}: {} GB ram already in use",
            row.ram_gb_used
        )));
    }

    let (capacity_cpu, capacity_ram) =
        org::field_capacity(&mut tx, &row.parent_scope_id, &row.site).await?;
    let (carved_cpu, carved_ram) =
        quota_rows::sum_child_limits(&mut tx, &row.parent_scope_id, &row.site).await?;

    if carved_cpu - row.cpu_limit + cpu_limit > capacity_cpu {
        return Err(CoreError::conflict(format!(
            "cannot raise cpu_limit to {cpu_limit}: field '{}' has only {} cpu unallocated at site '{}'",
            row.parent_scope_id,
            capacity_cpu - (carved_cpu - row.cpu_limit),
            row.site
        )));
    }
    if carved_ram - row.ram_gb_limit + ram_gb_limit > capacity_ram {
        return Err(CoreError::conflict(format!(
            "cannot raise ram_gb_limit to {ram_gb_limit}: field '{}' has only {} GB ram unallocated at site '{}'",
            row.parent_scope_id,
            capacity_ram - (carved_ram - row.ram_gb_limit),
            row.site
        )));
    }

    let updated = quota_rows::update_limits(&mut tx, &quota_key, cpu_limit, ram_gb_limit).await?;
    tx.commit().await?;

    info!(
        quota_id = %updated.id,
        department_id = %updated.scope_entity_id,
        cpu_limit,
        ram_gb_limit,
        "department quota resized"
    );

    Ok(updated)
}

/// Carve a team quota out of a department quota.
///
/// The team's limits are reserved against the department row, so a
/// department's usage is by construction the sum of its children's limits.
pub async fn create_team_quota(
    pool: &PgPool,
    principal: &Principal,
    params: CreateTeamQuota,
) -> Result<QuotaRow, CoreError> {
    let dept_key = params.department_id.to_string();
    let team_key = params.team_id.to_string();

    require_role(principal, Role::DeptAdmin, "manage team quotas")?;
    require_scope(principal, &dept_key, "department")?;
    validate_limits(params.cpu_limit, params.ram_gb_limit)?;
    validate_site(&params.site)?;

    let Some(team) = org::fetch_team(pool, &team_key).await? else {
        return Err(CoreError::not_found(format!("team '{team_key}' not found")));
    };
    if team.department_id != dept_key {
        return Err(CoreError::validation(format!(
            "team '{team_key}' does not belong to department '{dept_key}'"
        )));
    }

    let mut tx = pool.begin().await?;

    if quota_rows::fetch_for_update(&mut tx, &team_key, &params.site)
        .await?
        .is_some()
    {
        return Err(CoreError::conflict(format!(
            "team quota for '{team_key}' at site '{}' already exists",
            params.site
        )));
    }

    engine::reserve(
        &mut tx,
        &dept_key,
        &params.site,
        params.cpu_limit,
        params.ram_gb_limit,
    )
    .await?;

    let quota_id = QuotaRowId::new().to_string();
    let row = quota_rows::insert(
        &mut tx,
        &NewQuotaRow {
            id: &quota_id,
            scope_type: ScopeType::Team,
            scope_entity_id: &team_key,
            parent_scope_id: &dept_key,
            site: &params.site,
            cpu_limit: params.cpu_limit,
            ram_gb_limit: params.ram_gb_limit,
        },
    )
    .await
    .map_err(|e| {
        CoreError::conflict_on_unique(
            e,
            format!(
                "team quota for '{team_key}' at site '{}' already exists",
                params.site
            ),
        )
    })?;

    tx.commit().await?;

    info!(
        quota_id = %row.id,
        team_id = %team_key,
        department_id = %dept_key,
        site = %params.site,
        cpu_limit = params.cpu_limit,
        ram_gb_limit = params.ram_gb_limit,
        "team quota created"
    );

    Ok(row)
}

/// Change the limits of an existing team quota.
///
/// Growth is reserved against the department row; shrink is released back
/// to it. A department that cannot cover the growth is a conflict, not a
/// plain quota failure: the caller is changing structure, not admitting
/// workload.
pub async fn resize_team_quota(
    pool: &PgPool,
    principal: &Principal,
    quota_id: &QuotaRowId,
    cpu_limit: i64,
    ram_gb_limit: i64,
) -> Result<QuotaRow, CoreError> {
    require_role(principal, Role::DeptAdmin, "manage team quotas")?;
    validate_limits(cpu_limit, ram_gb_limit)?;

    let quota_key = quota_id.to_string();
    let mut tx = pool.begin().await?;

    let Some(row) = quota_rows::fetch_by_id_for_update(&mut tx, &quota_key).await? else {
        return Err(CoreError::not_found(format!(
            "team quota '{quota_key}' not found"
        )));
    };
    if row.scope_type != ScopeType::Team.as_str() {
        return Err(CoreError::not_found(format!(
            "team quota '{quota_key}' not found"
        )));
    }
    require_scope(principal, &row.parent_scope_id, "department")?;

    if cpu_limit < row.cpu_used {
        return Err(CoreError::conflict(format!(
            "cannot reduce cpu_limit to {cpu_limit}: {} cpu already in use",
            row.cpu_used
        )));
    }
    if ram_gb_limit < row.ram_gb_used {
        return Err(CoreError::conflict(format!(
            "cannot reduce ram_gb_limit to {ram_gb_limit}: {} GB ram already in use",
            row.ram_gb_used
        )));
    }

    let delta_cpu = cpu_limit - row.cpu_limit;
    let delta_ram = ram_gb_limit - row.ram_gb_limit;

    if delta_cpu > 0 || delta_ram > 0 {
        engine::reserve(
            &mut tx,
            &row.parent_scope_id,
            &row.site,
            delta_cpu.max(0),
            delta_ram.max(0),
        )
        .await
        .map_err(|e| match &e {
            CoreError::QuotaExceeded { .. } => {
                CoreError::conflict(format!("department quota cannot cover the resize: {e}"))
            }
            _ => e,
        })?;
    }
    if delta_cpu < 0 || delta_ram < 0 {
        engine::release(
            &mut tx,
            &row.parent_scope_id,
            &row.site,
            (-delta_cpu).max(0),
            (-delta_ram).max(0),
        )
        .await?;
    }

    let updated = quota_rows::update_limits(&mut tx, &quota_key, cpu_limit, ram_gb_limit).await?;
    tx.commit().await?;

    info!(
        quota_id = %updated.id,
        team_id = %updated.scope_entity_id,
        cpu_limit,
        ram_gb_limit,
        "team quota resized"
    );

    Ok(updated)
}

/// Assign an inventory server to a field.
pub async fn assign_server(
    pool: &PgPool,
    principal: &Principal,
    server_id: &ServerId,
    field_id: &FieldId,
) -> Result<ServerAllocationRow, CoreError> {
    require_role(principal, Role::CenterAdmin, "manage server assignments")?;

    let server_key = server_id.to_string();
    let field_key = field_id.to_string();

    let Some(field) = org::fetch_field(pool, &field_key).await? else {
        return Err(CoreError::not_found(format!("field '{field_key}' not found")));
    };

    let mut conn = pool.acquire().await?;
    let Some(server) = org::fetch_server(&mut conn, &server_key).await? else {
        return Err(CoreError::not_found(format!(
            "server '{server_key}' not found"
        )));
    };

    if server.site != field.site {
        warn!(
            server_id = %server_key,
            server_site = %server.site,
            field_site = %field.site,
            "server site differs from field site; it will not count toward field capacity"
        );
    }

    let alloc_id = AllocationId::new().to_string();
    let alloc = org::insert_server_allocation(
        &mut conn,
        &NewServerAllocation {
            id: &alloc_id,
            server_id: &server_key,
            field_id: &field_key,
            allocated_by: Some(&principal.subject),
        },
    )
    .await
    .map_err(|e| {
        CoreError::conflict_on_unique(
            e,
            format!("server '{server_key}' is already assigned to a field"),
        )
    })?;

    info!(
        allocation_id = %alloc.id,
        server_id = %server_key,
        field_id = %field_key,
        "server assigned to field"
    );

    Ok(alloc)
}

/// Remove a server-to-field assignment.
///
/// Refused while the department quotas carved from the field would no
/// longer fit in the capacity that remains.
pub async fn remove_server_assignment(
    pool: &PgPool,
    principal: &Principal,
    allocation_id: &AllocationId,
) -> Result<(), CoreError> {
    require_role(principal, Role::CenterAdmin, "manage server assignments")?;

    let alloc_key = allocation_id.to_string();
    let mut tx = pool.begin().await?;

    let Some(alloc) = org::fetch_server_allocation(&mut tx, &alloc_key).await? else {
        return Err(CoreError::not_found(format!(
            "server allocation '{alloc_key}' not found"
        )));
    };

    let Some(field) = org::lock_field(&mut tx, &alloc.field_id).await? else {
        return Err(CoreError::not_found(format!(
            "field '{}' not found",
            alloc.field_id
        )));
    };
    let Some(server) = org::fetch_server(&mut tx, &alloc.server_id).await? else {
        return Err(CoreError::not_found(format!(
            "server '{}' not found",
            alloc.server_id
        )));
    };

    let (capacity_cpu, capacity_ram) =
        org::field_capacity(&mut tx, &alloc.field_id, &field.site).await?;
    let (carved_cpu, carved_ram) =
        quota_rows::sum_child_limits(&mut tx, &alloc.field_id, &field.site).await?;

    let contributes = server.status == "active" && server.site == field.site;
    let (remaining_cpu, remaining_ram) = if contributes {
        (
            capacity_cpu - server.cpu_capacity,
            capacity_ram - server.ram_capacity_gb,
        )
    } else {
        (capacity_cpu, capacity_ram)
    };

    if carved_cpu > remaining_cpu || carved_ram > remaining_ram {
        return Err(CoreError::conflict(format!(
            "cannot remove server '{}': department quotas hold {carved_cpu} cpu / {carved_ram} GB ram but only {remaining_cpu} cpu / {remaining_ram} GB ram would remain at site '{}'",
            server.name, field.site
        )));
    }

    org::delete_server_allocation(&mut tx, &alloc_key).await?;
    tx.commit().await?;

    info!(
        allocation_id = %alloc_key,
        server_id = %alloc.server_id,
        field_id = %alloc.field_id,
        "server assignment removed"
    );

    Ok(())
}

fn require_role(principal: &Principal, role: Role, action: &str) -> Result<(), CoreError> {
    if principal.role != role {
        return Err(CoreError::forbidden(format!(
            "only {} can {action}",
            role.as_str()
        )));
    }
    Ok(())
}

fn require_scope(principal: &Principal, entity_id: &str, what: &str) -> Result<(), CoreError> {
    if !principal.is_scoped_to(entity_id) {
        return Err(CoreError::forbidden(format!(
            "{what} '{entity_id}' does not match the caller's scope"
        )));
    }
    Ok(())
}

fn validate_limits(cpu_limit: i64, ram_gb_limit: i64) -> Result<(), CoreError> {
    if cpu_limit < 0 || ram_gb_limit < 0 {
        return Err(CoreError::validation("quota limits must be non-negative"));
    }
    Ok(())
}

fn validate_site(site: &str) -> Result<(), CoreError> {
    if site.trim().is_empty() {
        return Err(CoreError::validation("site must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role, scope_id: Option<&str>) -> Principal {
        Principal {
            subject: "tester".to_string(),
            role,
            scope_id: scope_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn role_gate_names_the_required_role() {
        let p = principal(Role::TeamLead, Some("team_a"));
        let err = require_role(&p, Role::FieldAdmin, "manage department quotas")
            .expect_err("team_lead must be rejected");
        assert!(err.to_string().contains("field_admin"));
    }

    #[test]
    fn scope_gate_rejects_other_entities() {
        let p = principal(Role::DeptAdmin, Some("dept_a"));
        assert!(require_scope(&p, "dept_a", "department").is_ok());
        assert!(require_scope(&p, "dept_b", "department").is_err());
    }

    #[test]
    fn limits_must_be_non_negative() {
        assert!(validate_limits(0, 0).is_ok());
        assert!(validate_limits(-1, 4).is_err());
        assert!(validate_limits(4, -1).is_err());
    }
}
