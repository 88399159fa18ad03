//! Quota ledger rows.
//!
//! One row per (scope entity, site). Department rows are carved from a
//! field's server capacity; team rows are carved from a department row.
//! The allocation engine is the only writer of the usage counters, and
//! every write helper here takes a borrowed connection so the caller
//! decides where the transaction begins and ends.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

/// Scope level a quota row is carved at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeType {
    Department,
    Team,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Department => "department",
            ScopeType::Team => "team",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "department" => Some(ScopeType::Department),
            "team" => Some(ScopeType::Team),
            _ => None,
        }
    }
}

/// One quota ledger row.
#[derive(Debug, Clone)]
pub struct QuotaRow {
    pub id: String,
    pub scope_type: String,
    pub scope_entity_id: String,
    pub parent_scope_id: String,
    pub site: String,
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
    pub cpu_used: i64,
    pub ram_gb_used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaRow {
    pub fn cpu_available(&self) -> i64 {
        self.cpu_limit - self.cpu_used
    }

    pub fn ram_gb_available(&self) -> i64 {
        self.ram_gb_limit - self.ram_gb_used
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for QuotaRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            scope_type: row.try_get("scope_type")?,
            scope_entity_id: row.try_get("scope_entity_id")?,
            parent_scope_id: row.try_get("parent_scope_id")?,
            site: row.try_get("site")?,
            cpu_limit: row.try_get("cpu_limit")?,
            ram_gb_limit: row.try_get("ram_gb_limit")?,
            cpu_used: row.try_get("cpu_used")?,
            ram_gb_used: row.try_get("ram_gb_used")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields for inserting a fresh quota row. Usage counters start at zero.
#[derive(Debug)]
pub struct NewQuotaRow<'a> {
    pub id: &'a str,
    pub scope_type: ScopeType,
    pub scope_entity_id: &'a str,
    pub parent_scope_id: &'a str,
    pub site: &'a str,
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
}

/// Fetch the quota row for (scope entity, site) and lock it until the
/// enclosing transaction ends.
pub async fn fetch_for_update(
    conn: &mut PgConnection,
    scope_entity_id: &str,
    site: &str,
) -> Result<Option<QuotaRow>, sqlx::Error> {
    sqlx::query_as::<_, QuotaRow>(
        r#"
        SELECT id, scope_type, scope_entity_id, parent_scope_id, site,
               cpu_limit, ram_gb_limit, cpu_used, ram_gb_used,
               created_at, updated_at
        FROM quota_rows
        WHERE scope_entity_id = $1 AND site = $2
        FOR UPDATE
        "#,
    )
    .bind(scope_entity_id)
    .bind(site)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_by_id(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<QuotaRow>, sqlx::Error> {
    sqlx::query_as::<_, QuotaRow>(
        r#"
        SELECT id, scope_type, scope_entity_id, parent_scope_id, site,
               cpu_limit, ram_gb_limit, cpu_used, ram_gb_used,
               created_at, updated_at
        FROM quota_rows
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Fetch a quota row by id and lock it until the enclosing transaction ends.
pub async fn fetch_by_id_for_update(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<QuotaRow>, sqlx::Error> {
    sqlx::query_as::<_, QuotaRow>(
        r#"
        SELECT id, scope_type, scope_entity_id, parent_scope_id, site,
               cpu_limit, ram_gb_limit, cpu_used, ram_gb_used,
               created_at, updated_at
        FROM quota_rows
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Overwrite the usage counters. Callers must hold the row lock.
pub async fn set_usage(
    conn: &mut PgConnection,
    id: &str,
    cpu_used: i64,
    ram_gb_used: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE quota_rows
        SET cpu_used = $2, ram_gb_used = $3, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(cpu_used)
    .bind(ram_gb_used)
    .execute(conn)
    .await?;
    Ok(())
}

/// Overwrite the limits. Callers must hold the row lock and have already
/// checked the new limits against current usage and the parent scope.
pub async fn update_limits(
    conn: &mut PgConnection,
    id: &str,
    cpu_limit: i64,
    ram_gb_limit: i64,
) -> Result<QuotaRow, sqlx::Error> {
    sqlx::query_as::<_, QuotaRow>(
        r#"
        UPDATE quota_rows
        SET cpu_limit = $2, ram_gb_limit = $3, updated_at = now()
        WHERE id = $1
        RETURNING id, scope_type, scope_entity_id, parent_scope_id, site,
                  cpu_limit, ram_gb_limit, cpu_used, ram_gb_used,
                  created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(cpu_limit)
    .bind(ram_gb_limit)
    .fetch_one(conn)
    .await
}

pub async fn insert(
    conn: &mut PgConnection,
    row: &NewQuotaRow<'_>,
) -> Result<QuotaRow, sqlx::Error> {
    sqlx::query_as::<_, QuotaRow>(
        r#"
        INSERT INTO quota_rows (id, scope_type, scope_entity_id, parent_scope_id, site,
                                cpu_limit, ram_gb_limit)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, scope_type, scope_entity_id, parent_scope_id, site,
                  cpu_limit, ram_gb_limit, cpu_used, ram_gb_used,
                  created_at, updated_at
        "#,
    )
    .bind(row.id)
    .bind(row.scope_type.as_str())
    .bind(row.scope_entity_id)
    .bind(row.parent_scope_id)
    .bind(row.site)
    .bind(row.cpu_limit)
    .bind(row.ram_gb_limit)
    .fetch_one(conn)
    .await
}

/// Sum the limits of all quota rows carved from `parent_scope_id` at `site`.
pub async fn sum_child_limits(
    conn: &mut PgConnection,
    parent_scope_id: &str,
    site: &str,
) -> Result<(i64, i64), sqlx::Error> {
    sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COALESCE(SUM(cpu_limit), 0)::BIGINT,
               COALESCE(SUM(ram_gb_limit), 0)::BIGINT
        FROM quota_rows
        WHERE parent_scope_id = $1 AND site = $2
        "#,
    )
    .bind(parent_scope_id)
    .bind(site)
    .fetch_one(conn)
    .await
}

/// List every quota row at one scope level, ordered for stable output.
pub async fn list_by_scope_type(
    conn: &mut PgConnection,
    scope_type: ScopeType,
) -> Result<Vec<QuotaRow>, sqlx::Error> {
    sqlx::query_as::<_, QuotaRow>(
        r#"
        SELECT id, scope_type, scope_entity_id, parent_scope_id, site,
               cpu_limit, ram_gb_limit, cpu_used, ram_gb_used,
               created_at, updated_at
        FROM quota_rows
        WHERE scope_type = $1
        ORDER BY scope_entity_id, site
        "#,
    )
    .bind(scope_type.as_str())
    .fetch_all(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_type_roundtrip() {
        assert_eq!(ScopeType::parse("department"), Some(ScopeType::Department));
        assert_eq!(ScopeType::parse("team"), Some(ScopeType::Team));
        assert_eq!(ScopeType::parse("field"), None);
        assert_eq!(ScopeType::Department.as_str(), "department");
        assert_eq!(ScopeType::Team.as_str(), "team");
    }

    #[test]
    fn available_is_limit_minus_used() {
        let row = QuotaRow {
            id: "qta_x".to_string(),
            scope_type: "team".to_string(),
            scope_entity_id: "team_a".to_string(),
            parent_scope_id: "dept_a".to_string(),
            site: "east-1".to_string(),
            cpu_limit: 8,
            ram_gb_limit: 32,
            cpu_used: 5,
            ram_gb_used: 12,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.cpu_available(), 3);
        assert_eq!(row.ram_gb_available(), 20);
    }
}
