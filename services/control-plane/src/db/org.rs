//! Read access to the organization hierarchy and server inventory, plus
//! the server-to-field assignment table.
//!
//! Entity rows (centers through teams, servers) are written by the
//! upstream directory and inventory syncs; the control plane treats them
//! as read-only except for `field_server_allocations`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

#[derive(Debug, Clone)]
pub struct CenterRow {
    pub id: String,
    pub name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for CenterRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FieldRow {
    pub id: String,
    pub center_id: String,
    pub name: String,
    pub site: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for FieldRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            center_id: row.try_get("center_id")?,
            name: row.try_get("name")?,
            site: row.try_get("site")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DepartmentRow {
    pub id: String,
    pub field_id: String,
    pub name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for DepartmentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            field_id: row.try_get("field_id")?,
            name: row.try_get("name")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TeamRow {
    pub id: String,
    pub department_id: String,
    pub name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TeamRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            department_id: row.try_get("department_id")?,
            name: row.try_get("name")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerRow {
    pub id: String,
    pub name: String,
    pub site: String,
    pub cpu_capacity: i64,
    pub ram_capacity_gb: i64,
    pub tier: String,
    pub status: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ServerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            site: row.try_get("site")?,
            cpu_capacity: row.try_get("cpu_capacity")?,
            ram_capacity_gb: row.try_get("ram_capacity_gb")?,
            tier: row.try_get("tier")?,
            status: row.try_get("status")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerAllocationRow {
    pub id: String,
    pub server_id: String,
    pub field_id: String,
    pub allocated_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ServerAllocationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            field_id: row.try_get("field_id")?,
            allocated_by: row.try_get("allocated_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub async fn fetch_team(pool: &PgPool, id: &str) -> Result<Option<TeamRow>, sqlx::Error> {
    sqlx::query_as::<_, TeamRow>("SELECT id, department_id, name FROM teams WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_department(
    pool: &PgPool,
    id: &str,
) -> Result<Option<DepartmentRow>, sqlx::Error> {
    sqlx::query_as::<_, DepartmentRow>(
        "SELECT id, field_id, name FROM departments WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_field(pool: &PgPool, id: &str) -> Result<Option<FieldRow>, sqlx::Error> {
    sqlx::query_as::<_, FieldRow>("SELECT id, center_id, name, site FROM fields WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Fetch a field row and lock it until the enclosing transaction ends.
///
/// There is no field-level quota row, so the field row itself is the lock
/// that serializes capacity checks against concurrent department carving.
pub async fn lock_field(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<FieldRow>, sqlx::Error> {
    sqlx::query_as::<_, FieldRow>(
        "SELECT id, center_id, name, site FROM fields WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_server(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>(
        r#"
        SELECT id, name, site, cpu_capacity, ram_capacity_gb, tier, status
        FROM servers
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Total capacity of active servers assigned to `field_id` at `site`.
pub async fn field_capacity(
    conn: &mut PgConnection,
    field_id: &str,
    site: &str,
) -> Result<(i64, i64), sqlx::Error> {
    sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COALESCE(SUM(s.cpu_capacity), 0)::BIGINT,
               COALESCE(SUM(s.ram_capacity_gb), 0)::BIGINT
        FROM field_server_allocations fsa
        JOIN servers s ON s.id = fsa.server_id
        WHERE fsa.field_id = $1 AND s.site = $2 AND s.status = 'active'
        "#,
    )
    .bind(field_id)
    .bind(site)
    .fetch_one(conn)
    .await
}

#[derive(Debug)]
pub struct NewServerAllocation<'a> {
    pub id: &'a str,
    pub server_id: &'a str,
    pub field_id: &'a str,
    pub allocated_by: Option<&'a str>,
}

pub async fn insert_server_allocation(
    conn: &mut PgConnection,
    alloc: &NewServerAllocation<'_>,
) -> Result<ServerAllocationRow, sqlx::Error> {
    sqlx::query_as::<_, ServerAllocationRow>(
        r#"
        INSERT INTO field_server_allocations (id, server_id, field_id, allocated_by)
        VALUES ($1, $2, $3, $4)
        RETURNING id, server_id, field_id, allocated_by, created_at
        "#,
    )
    .bind(alloc.id)
    .bind(alloc.server_id)
    .bind(alloc.field_id)
    .bind(alloc.allocated_by)
    .fetch_one(conn)
    .await
}

pub async fn fetch_server_allocation(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<ServerAllocationRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerAllocationRow>(
        r#"
        SELECT id, server_id, field_id, allocated_by, created_at
        FROM field_server_allocations
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn delete_server_allocation(
    conn: &mut PgConnection,
    id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM field_server_allocations WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Bulk reads for the allocation tree
// ============================================================================

pub async fn list_centers(conn: &mut PgConnection) -> Result<Vec<CenterRow>, sqlx::Error> {
    sqlx::query_as::<_, CenterRow>("SELECT id, name FROM centers ORDER BY name")
        .fetch_all(conn)
        .await
}

pub async fn list_fields(conn: &mut PgConnection) -> Result<Vec<FieldRow>, sqlx::Error> {
    sqlx::query_as::<_, FieldRow>("SELECT id, center_id, name, site FROM fields ORDER BY name")
        .fetch_all(conn)
        .await
}

pub async fn list_departments(
    conn: &mut PgConnection,
) -> Result<Vec<DepartmentRow>, sqlx::Error> {
    sqlx::query_as::<_, DepartmentRow>(
        "SELECT id, field_id, name FROM departments ORDER BY name",
    )
    .fetch_all(conn)
    .await
}

pub async fn list_teams(conn: &mut PgConnection) -> Result<Vec<TeamRow>, sqlx::Error> {
    sqlx::query_as::<_, TeamRow>("SELECT id, department_id, name FROM teams ORDER BY name")
        .fetch_all(conn)
        .await
}

/// Active server capacity per field, counting only servers whose site
/// matches the field's own site.
pub async fn field_capacities(
    conn: &mut PgConnection,
) -> Result<Vec<(String, i64, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64, i64)>(
        r#"
        SELECT fsa.field_id,
               COALESCE(SUM(s.cpu_capacity), 0)::BIGINT,
               COALESCE(SUM(s.ram_capacity_gb), 0)::BIGINT
        FROM field_server_allocations fsa
        JOIN servers s ON s.id = fsa.server_id
        JOIN fields f ON f.id = fsa.field_id
        WHERE s.status = 'active' AND s.site = f.site
        GROUP BY fsa.field_id
        "#,
    )
    .fetch_all(conn)
    .await
}
