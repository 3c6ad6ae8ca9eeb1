//! Object-level authorization: the single ownership predicate.
//!
//! - No IO
//! - No panics
//! - No HTTP concepts (callers map [`OwnershipError`] to responses)

use thiserror::Error;

use agrotrack_core::{OwnedByUser, UserId};

/// Ownership denial.
///
/// The `Display` form is deliberately generic. The true owner is carried as
/// data for the server-side audit trail and must never be rendered to a client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("not authorized to access this resource")]
    Mismatch {
        resource_kind: &'static str,
        resource_id: String,
        owner: UserId,
        requester: UserId,
    },
}

impl OwnershipError {
    pub fn owner(&self) -> UserId {
        match self {
            OwnershipError::Mismatch { owner, .. } => *owner,
        }
    }
}

/// Authorize `requester` against a resource's (direct or derived) owner.
pub fn authorize_owner<R: OwnedByUser>(resource: &R, requester: UserId) -> Result<(), OwnershipError> {
    let owner = resource.owner_id();
    if owner == requester {
        return Ok(());
    }
    Err(OwnershipError::Mismatch {
        resource_kind: R::RESOURCE_KIND,
        resource_id: resource.id().to_string(),
        owner,
        requester,
    })
}
