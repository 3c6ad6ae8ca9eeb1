//! Ownership audit trail.
//!
//! Every cross-owner access attempt is recorded here with the requester, the
//! resource and its true owner. Clients only ever receive a generic denial, so
//! this log is the sole place the owner identity appears.

use agrotrack_core::UserId;

/// Tracing target for audit events (filter with `RUST_LOG=agrotrack::audit=warn`).
pub const AUDIT_TARGET: &str = "agrotrack::audit";

/// Record a denied object-level access attempt.
pub fn ownership_denied(resource_kind: &str, resource_id: &str, owner: UserId, requester: UserId) {
    tracing::warn!(
        target: AUDIT_TARGET,
        requester = %requester,
        resource_kind,
        resource_id,
        owner = %owner,
        "ownership mismatch: access denied"
    );
}
