//! Membership-derived permission gate.
//!
//! The gate is resolved once per board view and is read-only afterwards;
//! a membership change takes effect on the next view load.

use taskboard_proto::task::{ActorId, ProjectId};

use crate::coordinator::MutationError;
use crate::remote::MembershipSource;

/// Cached answer to "may this actor mutate this board?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGate {
    project_id: ProjectId,
    actor_id: ActorId,
    allowed: bool,
}

impl PermissionGate {
    /// Queries membership once and caches the result.
    ///
    /// A failed query resolves to read-only.
    pub async fn load(
        source: &impl MembershipSource,
        project_id: &ProjectId,
        actor_id: &ActorId,
    ) -> Self {
        let allowed = match source.is_member(project_id, actor_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(
                    project_id = %project_id,
                    actor_id = %actor_id,
                    error = %e,
                    "membership query failed, board is read-only"
                );
                false
            }
        };
        tracing::debug!(project_id = %project_id, actor_id = %actor_id, allowed, "permission gate loaded");
        Self::fixed(project_id.clone(), actor_id.clone(), allowed)
    }

    /// A gate with a known answer.
    #[must_use]
    pub const fn fixed(project_id: ProjectId, actor_id: ActorId, allowed: bool) -> Self {
        Self {
            project_id,
            actor_id,
            allowed,
        }
    }

    /// The board this gate was resolved for.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// The actor this gate was resolved for.
    #[must_use]
    pub const fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    /// Whether `actor_id` may mutate `project_id`.
    ///
    /// Only the pair the gate was loaded for can ever pass.
    #[must_use]
    pub fn can_mutate(&self, project_id: &ProjectId, actor_id: &ActorId) -> bool {
        self.allowed && self.project_id == *project_id && self.actor_id == *actor_id
    }

    /// Whether the gate's own actor may mutate its own board.
    #[must_use]
    pub const fn allows_mutation(&self) -> bool {
        self.allowed
    }

    /// Fails with [`MutationError::PermissionDenied`] unless the gate passes.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::PermissionDenied`] for a read-only actor.
    pub fn ensure(&self) -> Result<(), MutationError> {
        if self.allowed {
            Ok(())
        } else {
            tracing::debug!(project_id = %self.project_id, actor_id = %self.actor_id, "mutation blocked by permission gate");
            Err(MutationError::PermissionDenied)
        }
    }
}
