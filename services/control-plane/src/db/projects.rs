//! Project rows.
//!
//! The `status` column is the lifecycle state machine. Terminal-ward
//! transitions go through [`transition`], a compare-and-set on the current
//! status: a zero-row update means someone else moved the project first and
//! the caller's signal is stale.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

/// Lifecycle states for a project.
///
/// provisioning -> active | failed, active -> deleting, failed -> deleting.
/// Deleting rows are removed once namespace teardown has been attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Provisioning,
    Active,
    Failed,
    Deleting,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Provisioning => "provisioning",
            ProjectStatus::Active => "active",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Deleting => "deleting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provisioning" => Some(ProjectStatus::Provisioning),
            "active" => Some(ProjectStatus::Active),
            "failed" => Some(ProjectStatus::Failed),
            "deleting" => Some(ProjectStatus::Deleting),
            _ => None,
        }
    }
}

/// One project row.
#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub site: String,
    pub sla_type: String,
    pub performance_tier: String,
    pub namespace_name: String,
    pub status: String,
    pub reserved_cpu: i64,
    pub reserved_ram_gb: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProjectRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            team_id: row.try_get("team_id")?,
            name: row.try_get("name")?,
            site: row.try_get("site")?,
            sla_type: row.try_get("sla_type")?,
            performance_tier: row.try_get("performance_tier")?,
            namespace_name: row.try_get("namespace_name")?,
            status: row.try_get("status")?,
            reserved_cpu: row.try_get("reserved_cpu")?,
            reserved_ram_gb: row.try_get("reserved_ram_gb")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields for inserting a new project. Status starts at `provisioning`.
#[derive(Debug)]
pub struct NewProject<'a> {
    pub id: &'a str,
    pub team_id: &'a str,
    pub name: &'a str,
    pub site: &'a str,
    pub sla_type: &'a str,
    pub performance_tier: &'a str,
    pub namespace_name: &'a str,
    pub reserved_cpu: i64,
    pub reserved_ram_gb: i64,
}

pub async fn insert(
    conn: &mut PgConnection,
    project: &NewProject<'_>,
) -> Result<ProjectRow, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"
        INSERT INTO projects (id, team_id, name, site, sla_type, performance_tier,
                              namespace_name, reserved_cpu, reserved_ram_gb)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, team_id, name, site, sla_type, performance_tier,
                  namespace_name, status, reserved_cpu, reserved_ram_gb,
                  created_at, updated_at
        "#,
    )
    .bind(project.id)
    .bind(project.team_id)
    .bind(project.name)
    .bind(project.site)
    .bind(project.sla_type)
    .bind(project.performance_tier)
    .bind(project.namespace_name)
    .bind(project.reserved_cpu)
    .bind(project.reserved_ram_gb)
    .fetch_one(conn)
    .await
}

pub async fn fetch(pool: &PgPool, id: &str) -> Result<Option<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, team_id, name, site, sla_type, performance_tier,
               namespace_name, status, reserved_cpu, reserved_ram_gb,
               created_at, updated_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Fetch a project row and lock it until the enclosing transaction ends.
pub async fn fetch_for_update(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, team_id, name, site, sla_type, performance_tier,
               namespace_name, status, reserved_cpu, reserved_ram_gb,
               created_at, updated_at
        FROM projects
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Compare-and-set status transition.
///
/// Returns the updated row, or `None` if the project was no longer in
/// `from` (including when it no longer exists).
pub async fn transition(
    conn: &mut PgConnection,
    id: &str,
    from: ProjectStatus,
    to: ProjectStatus,
) -> Result<Option<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"
        UPDATE projects
        SET status = $3, updated_at = now()
        WHERE id = $1 AND status = $2
        RETURNING id, team_id, name, site, sla_type, performance_tier,
                  namespace_name, status, reserved_cpu, reserved_ram_gb,
                  created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .fetch_optional(conn)
    .await
}

/// Keyset-paginated listing, optionally scoped to one team.
pub async fn list(
    pool: &PgPool,
    team_id: Option<&str>,
    cursor: Option<&str>,
    limit: i64,
) -> Result<Vec<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, team_id, name, site, sla_type, performance_tier,
               namespace_name, status, reserved_cpu, reserved_ram_gb,
               created_at, updated_at
        FROM projects
        WHERE ($1::TEXT IS NULL OR team_id = $1)
          AND ($2::TEXT IS NULL OR id > $2)
        ORDER BY id ASC
        LIMIT $3
        "#,
    )
    .bind(team_id)
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// List every project currently in `status`. Used by the rollout sweeper
/// to re-attach poll and teardown tasks.
pub async fn list_with_status(
    pool: &PgPool,
    status: ProjectStatus,
) -> Result<Vec<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, team_id, name, site, sla_type, performance_tier,
               namespace_name, status, reserved_cpu, reserved_ram_gb,
               created_at, updated_at
        FROM projects
        WHERE status = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await
}

/// Remove a project row. The quota compensation, if any, must already
/// have happened.
pub async fn delete_row(pool: &PgPool, id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            ProjectStatus::Provisioning,
            ProjectStatus::Active,
            ProjectStatus::Failed,
            ProjectStatus::Deleting,
        ] {
            assert_eq!(ProjectStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProjectStatus::parse("terminated"), None);
    }
}
