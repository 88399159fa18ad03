//! Hierarchical quota allocation.
//!
//! Capacity flows down the hierarchy: servers give fields their capacity,
//! department quotas carve that capacity up, team quotas carve department
//! quotas up, and projects consume team quotas. Each edge is enforced at
//! write time; nothing is reconciled after the fact.
//!
//! - [`engine`] holds the row-locked reserve/release primitive.
//! - [`admin`] applies quota and server-assignment changes.
//! - [`tree`] renders the role-scoped usage snapshot.

pub mod admin;
pub mod engine;
pub mod tree;
