//! Caller identity.
//!
//! Authentication happens in the fronting identity proxy, which injects the
//! verified subject, role, and scope as request headers. The control plane
//! trusts those headers but still re-checks role and scope against the
//! resource each operation touches.

use serde::Serialize;

/// Organizational role carried by a request.
///
/// Each role is tied to one level of the hierarchy. `center_admin` is the
/// only unscoped role; every other role names the entity it administers in
/// its scope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CenterAdmin,
    FieldAdmin,
    DeptAdmin,
    TeamLead,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::CenterAdmin => "center_admin",
            Role::FieldAdmin => "field_admin",
            Role::DeptAdmin => "dept_admin",
            Role::TeamLead => "team_lead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "center_admin" => Some(Role::CenterAdmin),
            "field_admin" => Some(Role::FieldAdmin),
            "dept_admin" => Some(Role::DeptAdmin),
            "team_lead" => Some(Role::TeamLead),
            _ => None,
        }
    }

    /// Whether principals with this role must carry a scope id.
    pub fn requires_scope(&self) -> bool {
        !matches!(self, Role::CenterAdmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
    /// Entity the role is bound to: a field for `field_admin`, a department
    /// for `dept_admin`, a team for `team_lead`. Absent for `center_admin`.
    pub scope_id: Option<String>,
}

impl Principal {
    /// True when the principal's scope is exactly `entity_id`.
    pub fn is_scoped_to(&self, entity_id: &str) -> bool {
        self.scope_id.as_deref() == Some(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_roundtrip() {
        for role in [
            Role::CenterAdmin,
            Role::FieldAdmin,
            Role::DeptAdmin,
            Role::TeamLead,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn role_parse_rejects_unknown() {
        assert_eq!(Role::parse("platform_admin"), None);
        assert_eq!(Role::parse(""), None);
        assert_eq!(Role::parse("Team_Lead"), None);
    }

    #[test]
    fn only_center_admin_is_unscoped() {
        assert!(!Role::CenterAdmin.requires_scope());
        assert!(Role::FieldAdmin.requires_scope());
        assert!(Role::DeptAdmin.requires_scope());
        assert!(Role::TeamLead.requires_scope());
    }

    #[test]
    fn scope_check_matches_exactly() {
        let principal = Principal {
            subject: "alice".to_string(),
            role: Role::TeamLead,
            scope_id: Some("team_a".to_string()),
        };
        assert!(principal.is_scoped_to("team_a"));
        assert!(!principal.is_scoped_to("team_b"));

        let unscoped = Principal {
            subject: "root".to_string(),
            role: Role::CenterAdmin,
            scope_id: None,
        };
        assert!(!unscoped.is_scoped_to("team_a"));
    }
}
