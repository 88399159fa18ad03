//! Row-locked reserve and release over the quota ledger.
//!
//! Both operations borrow a connection rather than a pool: the caller owns
//! the transaction, and the lock taken by `SELECT ... FOR UPDATE` lasts
//! until that transaction commits or rolls back. That is what makes the
//! check-then-write below safe under concurrency, and what lets callers
//! compose a reservation with their own writes (insert a project row,
//! insert a child quota row) into one atomic unit.

use sqlx::PgConnection;
use tracing::warn;

use crate::db::quota_rows;
use crate::errors::{CoreError, ResourceKind};

/// Amounts actually reserved by a successful [`reserve`] call.
///
/// The engine does not deduplicate. Callers persist the amounts (on the
/// project row, on the child quota row) and must release at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    pub scope_entity_id: String,
    pub site: String,
    pub cpu: i64,
    pub ram_gb: i64,
}

/// Reserve `required_cpu` and `required_ram_gb` against the quota row for
/// (`scope_entity_id`, `site`).
///
/// Checks cpu first, then ram; the first dimension that does not fit is
/// the one reported. Exact fits succeed. A scope with no quota row has
/// nothing to give, so that case reports zero availability rather than a
/// missing resource.
pub async fn reserve(
    conn: &mut PgConnection,
    scope_entity_id: &str,
    site: &str,
    required_cpu: i64,
    required_ram_gb: i64,
) -> Result<ReservationToken, CoreError> {
    if required_cpu < 0 || required_ram_gb < 0 {
        return Err(CoreError::validation(
            "reservation amounts must be non-negative",
        ));
    }

    let Some(row) = quota_rows::fetch_for_update(conn, scope_entity_id, site).await? else {
        return Err(CoreError::QuotaExceeded {
            resource: ResourceKind::Cpu,
            requested: required_cpu,
            available: 0,
            detail: format!("no quota allocated for '{scope_entity_id}' at site '{site}'"),
        });
    };

    if row.cpu_used + required_cpu > row.cpu_limit {
        return Err(CoreError::QuotaExceeded {
            resource: ResourceKind::Cpu,
            requested: required_cpu,
            available: row.cpu_available(),
            detail: format!("quota exceeded for '{scope_entity_id}' at site '{site}'"),
        });
    }
    if row.ram_gb_used + required_ram_gb > row.ram_gb_limit {
        return Err(CoreError::QuotaExceeded {
            resource: ResourceKind::RamGb,
            requested: required_ram_gb,
            available: row.ram_gb_available(),
            detail: format!("quota exceeded for '{scope_entity_id}' at site '{site}'"),
        });
    }

    quota_rows::set_usage(
        conn,
        &row.id,
        row.cpu_used + required_cpu,
        row.ram_gb_used + required_ram_gb,
    )
    .await?;

    Ok(ReservationToken {
        scope_entity_id: scope_entity_id.to_string(),
        site: site.to_string(),
        cpu: required_cpu,
        ram_gb: required_ram_gb,
    })
}

/// Return previously reserved amounts to the quota row for
/// (`scope_entity_id`, `site`).
///
/// Release never rejects on quota grounds: usage is clamped at zero, and
/// a drive below zero is logged as a suspected double release. Shrunken
/// limits are also fine; usage only ever moves down here. Only a broken
/// database connection can fail this call.
pub async fn release(
    conn: &mut PgConnection,
    scope_entity_id: &str,
    site: &str,
    amount_cpu: i64,
    amount_ram_gb: i64,
) -> Result<(), CoreError> {
    let Some(row) = quota_rows::fetch_for_update(conn, scope_entity_id, site).await? else {
        warn!(
            scope_entity_id,
            site, "release against a missing quota row; nothing to return"
        );
        return Ok(());
    };

    let next_cpu = row.cpu_used - amount_cpu;
    let next_ram = row.ram_gb_used - amount_ram_gb;
    if next_cpu < 0 || next_ram < 0 {
        warn!(
            scope_entity_id,
            site,
            cpu_used = row.cpu_used,
            amount_cpu,
            ram_gb_used = row.ram_gb_used,
            amount_ram_gb,
            "release would drive usage negative; clamping to zero (suspected double release)"
        );
    }

    quota_rows::set_usage(conn, &row.id, next_cpu.max(0), next_ram.max(0)).await?;
    Ok(())
}
