//! Merging duplicate entries into a principal/child group and undoing it.
//!
//! Children are never deleted by grouping: they keep their own row, point at
//! their principal through `group_id`, and drop out of the top-level listing.
//! Every membership change rewrites the principal's aggregates from the
//! children actually stored.

use conta_core::{EntryId, GroupSummary};
use conta_storage::{get_entry, list_children, set_group_id, write_group_summary, DbPool};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::ReconcileError;

/// Why a group or ungroup request was refused. Shown to the user as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupRejection {
    #[error("Entry {0} not found")]
    NotFound(EntryId),
    #[error("An entry cannot be grouped with itself")]
    SelfGroup,
    #[error("Entry {principal} is already grouped under {child}; grouping it the other way would create a cycle")]
    Cycle { principal: EntryId, child: EntryId },
    #[error("Entry {child} already belongs to the group of entry {principal}")]
    ChildElsewhere { child: EntryId, principal: EntryId },
    #[error("Entry {principal} belongs to the group of entry {parent} and cannot lead a group")]
    PrincipalIsChild { principal: EntryId, parent: EntryId },
    #[error("Entry {0} leads a group of its own; ungroup its children first")]
    ChildIsPrincipal(EntryId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    Grouped {
        principal: EntryId,
        child: EntryId,
        item_count: u32,
    },
    /// The child was already in this group.
    Unchanged,
    Rejected(GroupRejection),
}

impl GroupOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, GroupOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UngroupOutcome {
    Ungrouped {
        former_principal: EntryId,
        remaining: u32,
        /// The principal was left with one child or none and stopped being a group.
        dissolved: bool,
    },
    /// The entry was not in a group.
    Unchanged,
    Rejected(GroupRejection),
}

impl UngroupOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, UngroupOutcome::Rejected(_))
    }
}

/// Makes `child_id` a child of `principal_id`.
pub async fn group(
    pool: &DbPool,
    principal_id: EntryId,
    child_id: EntryId,
) -> Result<GroupOutcome, ReconcileError> {
    if principal_id == child_id {
        return Ok(GroupOutcome::Rejected(GroupRejection::SelfGroup));
    }

    let Some(principal) = get_entry(pool, principal_id).await? else {
        return Ok(GroupOutcome::Rejected(GroupRejection::NotFound(principal_id)));
    };
    let Some(child) = get_entry(pool, child_id).await? else {
        return Ok(GroupOutcome::Rejected(GroupRejection::NotFound(child_id)));
    };

    if child.group_id == Some(principal_id) {
        // A retry after a partial failure may find the link written but the
        // aggregates stale.
        refresh_group(pool, principal_id).await?;
        return Ok(GroupOutcome::Unchanged);
    }
    if principal.group_id == Some(child_id) {
        return Ok(GroupOutcome::Rejected(GroupRejection::Cycle {
            principal: principal_id,
            child: child_id,
        }));
    }
    if let Some(other) = child.group_id {
        return Ok(GroupOutcome::Rejected(GroupRejection::ChildElsewhere {
            child: child_id,
            principal: other,
        }));
    }
    if let Some(parent) = principal.group_id {
        return Ok(GroupOutcome::Rejected(GroupRejection::PrincipalIsChild {
            principal: principal_id,
            parent,
        }));
    }
    if child.is_group_principal {
        if !list_children(pool, child_id).await?.is_empty() {
            return Ok(GroupOutcome::Rejected(GroupRejection::ChildIsPrincipal(child_id)));
        }
        // Stale flag on an emptied group.
        write_group_summary(pool, child_id, false, 0, false).await?;
    }

    set_group_id(pool, child_id, Some(principal_id)).await?;
    let summary = refresh_group(pool, principal_id).await?;

    info!(
        principal = %principal_id,
        child = %child_id,
        items = summary.item_count,
        "Entries grouped"
    );

    Ok(GroupOutcome::Grouped {
        principal: principal_id,
        child: child_id,
        item_count: summary.item_count,
    })
}

/// Detaches `child_id` from its group. Re-running it on a standalone entry is
/// a no-op.
pub async fn ungroup(pool: &DbPool, child_id: EntryId) -> Result<UngroupOutcome, ReconcileError> {
    let Some(child) = get_entry(pool, child_id).await? else {
        return Ok(UngroupOutcome::Rejected(GroupRejection::NotFound(child_id)));
    };
    let Some(principal_id) = child.group_id else {
        return Ok(UngroupOutcome::Unchanged);
    };

    set_group_id(pool, child_id, None).await?;
    let (remaining, dissolved) = settle_after_removal(pool, principal_id).await?;

    info!(
        principal = %principal_id,
        child = %child_id,
        remaining,
        dissolved,
        "Entry ungrouped"
    );

    Ok(UngroupOutcome::Ungrouped {
        former_principal: principal_id,
        remaining,
        dissolved,
    })
}

/// Releases every child of `principal_id` and clears its principal flag.
/// Returns how many children were released.
pub async fn dissolve_group(pool: &DbPool, principal_id: EntryId) -> Result<u32, ReconcileError> {
    let children = list_children(pool, principal_id).await?;
    for child in &children {
        set_group_id(pool, child.id, None).await?;
    }
    write_group_summary(pool, principal_id, false, 0, false).await?;
    debug!(principal = %principal_id, released = children.len(), "Group dissolved");
    Ok(children.len() as u32)
}

/// Rewrites the principal flag and aggregates of `principal_id` from its
/// stored children.
pub async fn refresh_group(
    pool: &DbPool,
    principal_id: EntryId,
) -> Result<GroupSummary, ReconcileError> {
    let summary = GroupSummary::from_children(list_children(pool, principal_id).await?);
    write_group_summary(
        pool,
        principal_id,
        summary.item_count > 0,
        summary.item_count,
        summary.has_invoice,
    )
    .await?;
    Ok(summary)
}

/// Called after a child left `principal_id` (ungroup or deletion). A group
/// with one child or none is not a group: it is dissolved, releasing the
/// last child as well so no child points at a non-principal.
pub(crate) async fn settle_after_removal(
    pool: &DbPool,
    principal_id: EntryId,
) -> Result<(u32, bool), ReconcileError> {
    let remaining = list_children(pool, principal_id).await?;
    if remaining.len() <= 1 {
        dissolve_group(pool, principal_id).await?;
        return Ok((0, true));
    }
    let summary = refresh_group(pool, principal_id).await?;
    Ok((summary.item_count, false))
}
