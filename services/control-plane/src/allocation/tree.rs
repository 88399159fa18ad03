//! Role-scoped allocation tree.
//!
//! A read-only snapshot of the whole hierarchy: centers, fields with their
//! server capacity, and the quota rows carved at each level. All rows are
//! read in one REPEATABLE READ transaction so the numbers are mutually
//! consistent, then filtered down to what the caller's role may see.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;

use crate::db::org::{self, CenterRow, DepartmentRow, FieldRow, TeamRow};
use crate::db::quota_rows::{self, QuotaRow, ScopeType};
use crate::errors::CoreError;
use crate::principal::{Principal, Role};

#[derive(Debug, Serialize)]
pub struct AllocationTree {
    pub centers: Vec<CenterNode>,
}

#[derive(Debug, Serialize)]
pub struct CenterNode {
    pub center_id: String,
    pub center_name: String,
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Serialize)]
pub struct FieldNode {
    pub field_id: String,
    pub field_name: String,
    pub site: String,
    /// Total capacity of active servers assigned to this field.
    pub cpu_capacity: i64,
    pub ram_gb_capacity: i64,
    /// Sum of department quota limits carved from this field.
    pub cpu_allocated: i64,
    pub ram_gb_allocated: i64,
    pub departments: Vec<DepartmentNode>,
}

#[derive(Debug, Serialize)]
pub struct DepartmentNode {
    pub department_id: String,
    pub department_name: String,
    pub site: String,
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
    /// Equals the sum of this department's team quota limits.
    pub cpu_used: i64,
    pub ram_gb_used: i64,
    pub teams: Vec<TeamNode>,
}

#[derive(Debug, Serialize)]
pub struct TeamNode {
    pub team_id: String,
    pub team_name: String,
    pub site: String,
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
    pub cpu_used: i64,
    pub ram_gb_used: i64,
}

struct TreeSource {
    centers: Vec<CenterRow>,
    fields: Vec<FieldRow>,
    departments: Vec<DepartmentRow>,
    teams: Vec<TeamRow>,
    capacities: Vec<(String, i64, i64)>,
    department_quotas: Vec<QuotaRow>,
    team_quotas: Vec<QuotaRow>,
}

/// Read a consistent snapshot and assemble the tree the caller may see.
pub async fn snapshot(pool: &PgPool, principal: &Principal) -> Result<AllocationTree, CoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let source = TreeSource {
        centers: org::list_centers(&mut tx).await?,
        fields: org::list_fields(&mut tx).await?,
        departments: org::list_departments(&mut tx).await?,
        teams: org::list_teams(&mut tx).await?,
        capacities: org::field_capacities(&mut tx).await?,
        department_quotas: quota_rows::list_by_scope_type(&mut tx, ScopeType::Department).await?,
        team_quotas: quota_rows::list_by_scope_type(&mut tx, ScopeType::Team).await?,
    };
    tx.commit().await?;

    Ok(assemble(source, principal))
}

/// Pure assembly over a prefetched snapshot.
///
/// Visibility: field_admin sees only their field, dept_admin only their
/// department's quotas, team_lead only their team's quota. The skeleton
/// above the caller's scope stays visible for context. Centers with no
/// visible fields are dropped for everyone but center_admin.
fn assemble(source: TreeSource, principal: &Principal) -> AllocationTree {
    let team_names: HashMap<&str, &TeamRow> = source
        .teams
        .iter()
        .map(|t| (t.id.as_str(), t))
        .collect();
    let dept_names: HashMap<&str, &DepartmentRow> = source
        .departments
        .iter()
        .map(|d| (d.id.as_str(), d))
        .collect();
    let capacity_by_field: HashMap<&str, (i64, i64)> = source
        .capacities
        .iter()
        .map(|(id, cpu, ram)| (id.as_str(), (*cpu, *ram)))
        .collect();

    // Structural totals are computed before visibility filtering so a
    // scoped caller still sees true field-level numbers.
    let mut allocated_by_field: HashMap<&str, (i64, i64)> = HashMap::new();
    for dq in &source.department_quotas {
        let entry = allocated_by_field
            .entry(dq.parent_scope_id.as_str())
            .or_insert((0, 0));
        entry.0 += dq.cpu_limit;
        entry.1 += dq.ram_gb_limit;
    }

    let mut teams_by_dept: HashMap<(&str, &str), Vec<TeamNode>> = HashMap::new();
    for tq in &source.team_quotas {
        if principal.role == Role::TeamLead && !principal.is_scoped_to(&tq.scope_entity_id) {
            continue;
        }
        let team_name = team_names
            .get(tq.scope_entity_id.as_str())
            .map(|t| t.name.clone())
            .unwrap_or_else(|| tq.scope_entity_id.clone());
        teams_by_dept
            .entry((tq.parent_scope_id.as_str(), tq.site.as_str()))
            .or_default()
            .push(TeamNode {
                team_id: tq.scope_entity_id.clone(),
                team_name,
                site: tq.site.clone(),
                cpu_limit: tq.cpu_limit,
                ram_gb_limit: tq.ram_gb_limit,
                cpu_used: tq.cpu_used,
                ram_gb_used: tq.ram_gb_used,
            });
    }

    let mut depts_by_field: HashMap<&str, Vec<DepartmentNode>> = HashMap::new();
    for dq in &source.department_quotas {
        if principal.role == Role::DeptAdmin && !principal.is_scoped_to(&dq.scope_entity_id) {
            continue;
        }
        let department_name = dept_names
            .get(dq.scope_entity_id.as_str())
            .map(|d| d.name.clone())
            .unwrap_or_else(|| dq.scope_entity_id.clone());
        let teams = teams_by_dept
            .remove(&(dq.scope_entity_id.as_str(), dq.site.as_str()))
            .unwrap_or_default();
        depts_by_field
            .entry(dq.parent_scope_id.as_str())
            .or_default()
            .push(DepartmentNode {
                department_id: dq.scope_entity_id.clone(),
                department_name,
                site: dq.site.clone(),
                cpu_limit: dq.cpu_limit,
                ram_gb_limit: dq.ram_gb_limit,
                cpu_used: dq.cpu_used,
                ram_gb_used: dq.ram_gb_used,
                teams,
            });
    }

    let mut fields_by_center: HashMap<&str, Vec<FieldNode>> = HashMap::new();
    for field in &source.fields {
        if principal.role == Role::FieldAdmin && !principal.is_scoped_to(&field.id) {
            continue;
        }
        let (cpu_capacity, ram_gb_capacity) = capacity_by_field
            .get(field.id.as_str())
            .copied()
            .unwrap_or((0, 0));
        let (cpu_allocated, ram_gb_allocated) = allocated_by_field
            .get(field.id.as_str())
            .copied()
            .unwrap_or((0, 0));
        let departments = depts_by_field.remove(field.id.as_str()).unwrap_or_default();
        fields_by_center
            .entry(field.center_id.as_str())
            .or_default()
            .push(FieldNode {
                field_id: field.id.clone(),
                field_name: field.name.clone(),
                site: field.site.clone(),
                cpu_capacity,
                ram_gb_capacity,
                cpu_allocated,
                ram_gb_allocated,
                departments,
            });
    }

    let mut centers = Vec::new();
    for center in &source.centers {
        let fields = fields_by_center
            .remove(center.id.as_str())
            .unwrap_or_default();
        if fields.is_empty() && principal.role != Role::CenterAdmin {
            continue;
        }
        centers.push(CenterNode {
            center_id: center.id.clone(),
            center_name: center.name.clone(),
            fields,
        });
    }

    AllocationTree { centers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn quota(
        scope_type: ScopeType,
        scope: &str,
        parent: &str,
        site: &str,
        limit: i64,
        used: i64,
    ) -> QuotaRow {
        QuotaRow {
            id: format!("qta-{scope}-{site}"),
            scope_type: scope_type.as_str().to_string(),
            scope_entity_id: scope.to_string(),
            parent_scope_id: parent.to_string(),
            site: site.to_string(),
            cpu_limit: limit,
            ram_gb_limit: limit * 4,
            cpu_used: used,
            ram_gb_used: used * 4,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn source() -> TreeSource {
        TreeSource {
            centers: vec![
                CenterRow {
                    id: "ctr_a".to_string(),
                    name: "East Center".to_string(),
                },
                CenterRow {
                    id: "ctr_b".to_string(),
                    name: "West Center".to_string(),
                },
            ],
            fields: vec![
                FieldRow {
                    id: "fld_a".to_string(),
                    center_id: "ctr_a".to_string(),
                    name: "east-field".to_string(),
                    site: "east-1".to_string(),
                },
                FieldRow {
                    id: "fld_b".to_string(),
                    center_id: "ctr_b".to_string(),
                    name: "west-field".to_string(),
                    site: "west-1".to_string(),
                },
            ],
            departments: vec![DepartmentRow {
                id: "dept_a".to_string(),
                field_id: "fld_a".to_string(),
                name: "analytics".to_string(),
            }],
            teams: vec![
                TeamRow {
                    id: "team_a".to_string(),
                    department_id: "dept_a".to_string(),
                    name: "ingest".to_string(),
                },
                TeamRow {
                    id: "team_b".to_string(),
                    department_id: "dept_a".to_string(),
                    name: "query".to_string(),
                },
            ],
            capacities: vec![("fld_a".to_string(), 64, 256)],
            department_quotas: vec![quota(
                ScopeType::Department,
                "dept_a",
                "fld_a",
                "east-1",
                32,
                12,
            )],
            team_quotas: vec![
                quota(ScopeType::Team, "team_a", "dept_a", "east-1", 8, 2),
                quota(ScopeType::Team, "team_b", "dept_a", "east-1", 4, 0),
            ],
        }
    }

    fn principal(role: Role, scope_id: Option<&str>) -> Principal {
        Principal {
            subject: "tester".to_string(),
            role,
            scope_id: scope_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn center_admin_sees_everything() {
        let tree = assemble(source(), &principal(Role::CenterAdmin, None));
        assert_eq!(tree.centers.len(), 2);

        let east = &tree.centers[0];
        assert_eq!(east.center_id, "ctr_a");
        assert_eq!(east.fields.len(), 1);
        let field = &east.fields[0];
        assert_eq!(field.cpu_capacity, 64);
        assert_eq!(field.cpu_allocated, 32);
        assert_eq!(field.departments.len(), 1);
        assert_eq!(field.departments[0].teams.len(), 2);

        // Empty centers stay visible for center_admin.
        assert!(tree.centers[1].fields.is_empty());
    }

    #[test]
    fn team_lead_sees_only_their_team() {
        let tree = assemble(source(), &principal(Role::TeamLead, Some("team_b")));
        let dept = &tree.centers[0].fields[0].departments[0];
        assert_eq!(dept.teams.len(), 1);
        assert_eq!(dept.teams[0].team_id, "team_b");
        assert_eq!(dept.teams[0].team_name, "query");
    }

    #[test]
    fn dept_admin_sees_only_their_department() {
        let mut src = source();
        src.departments.push(DepartmentRow {
            id: "dept_b".to_string(),
            field_id: "fld_a".to_string(),
            name: "ops".to_string(),
        });
        src.department_quotas.push(quota(
            ScopeType::Department,
            "dept_b",
            "fld_a",
            "east-1",
            16,
            0,
        ));

        let tree = assemble(src, &principal(Role::DeptAdmin, Some("dept_a")));
        let field = &tree.centers[0].fields[0];
        assert_eq!(field.departments.len(), 1);
        assert_eq!(field.departments[0].department_id, "dept_a");
        // Field totals still count the hidden department.
        assert_eq!(field.cpu_allocated, 48);
    }

    #[test]
    fn field_admin_sees_only_their_field() {
        let tree = assemble(source(), &principal(Role::FieldAdmin, Some("fld_b")));
        assert_eq!(tree.centers.len(), 1);
        assert_eq!(tree.centers[0].center_id, "ctr_b");
        assert_eq!(tree.centers[0].fields[0].field_id, "fld_b");
    }

    #[test]
    fn department_usage_matches_children() {
        let tree = assemble(source(), &principal(Role::CenterAdmin, None));
        let dept = &tree.centers[0].fields[0].departments[0];
        let child_limit_sum: i64 = dept.teams.iter().map(|t| t.cpu_limit).sum();
        assert_eq!(dept.cpu_used, child_limit_sum);
    }
}
