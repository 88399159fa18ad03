//! Typed ID definitions for all control-plane resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Organization Hierarchy
// =============================================================================

define_id!(CenterId, "ctr");
define_id!(FieldId, "fld");
define_id!(DepartmentId, "dept");
define_id!(TeamId, "team");

// =============================================================================
// Inventory
// =============================================================================

define_id!(ServerId, "srv");
define_id!(AllocationId, "alloc");

// =============================================================================
// Quota Ledger and Projects
// =============================================================================

define_id!(QuotaRowId, "qta");
define_id!(ProjectId, "prj");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_team_id_roundtrip() {
        let id = TeamId::new();
        let s = id.to_string();
        let parsed: TeamId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_team_id_prefix() {
        let id = TeamId::new();
        let s = id.to_string();
        assert!(s.starts_with("team_"));
    }

    #[test]
    fn test_team_id_invalid_prefix() {
        let result: Result<TeamId, _> = "prj_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_team_id_missing_separator() {
        let result: Result<TeamId, _> = "team01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_team_id_empty() {
        let result: Result<TeamId, _> = "".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_team_id_invalid_ulid() {
        let result: Result<TeamId, _> = "team_invalid".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_project_id_json_roundtrip() {
        let id = ProjectId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_project_id_sortable() {
        let id1 = ProjectId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = ProjectId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = vec![
            CenterId::PREFIX,
            FieldId::PREFIX,
            DepartmentId::PREFIX,
            TeamId::PREFIX,
            ServerId::PREFIX,
            AllocationId::PREFIX,
            QuotaRowId::PREFIX,
            ProjectId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_quota_row_id_roundtrip(raw in any::<u128>()) {
            let id = QuotaRowId::from_ulid(crate::Ulid(raw));
            let parsed = QuotaRowId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
