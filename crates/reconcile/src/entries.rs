use conta_core::{CategoryId, EntryId, NewEntry};
use conta_import::{Candidate, DuplicateMatcher, MatchableEntry, SessionIgnores};
use conta_storage::{get_entry, insert_entry, DbPool};
use tracing::info;

use crate::config::ReconcileConfig;
use crate::duplicates::suggest_duplicates;
use crate::error::ReconcileError;
use crate::grouping::{group, GroupOutcome};

/// A manual entry after it was saved, with the existing entries it may
/// duplicate.
#[derive(Debug, Clone)]
pub struct CreatedEntry {
    pub id: EntryId,
    pub suggestions: Vec<Candidate>,
}

/// Suggestions for a draft that has not been saved yet. Searches every bank
/// account: a hand-typed entry often has none.
pub async fn suggest_for_draft(
    pool: &DbPool,
    config: &ReconcileConfig,
    draft: &NewEntry,
    ignores: &SessionIgnores,
) -> Result<Vec<Candidate>, ReconcileError> {
    let matcher = DuplicateMatcher::new(config.matching.clone());
    suggest_duplicates(pool, &matcher, &MatchableEntry::from(draft), None, ignores).await
}

/// Saves a manual entry and returns the duplicates it may represent.
pub async fn create_manual_entry(
    pool: &DbPool,
    config: &ReconcileConfig,
    entry: &NewEntry,
    ignores: &SessionIgnores,
) -> Result<CreatedEntry, ReconcileError> {
    let id = insert_entry(pool, entry).await?;
    let mut subject = MatchableEntry::from(entry);
    subject.id = Some(id);

    let matcher = DuplicateMatcher::new(config.matching.clone());
    let suggestions = suggest_duplicates(pool, &matcher, &subject, None, ignores).await?;
    info!(entry = %id, suggestions = suggestions.len(), "Manual entry created");
    Ok(CreatedEntry { id, suggestions })
}

/// Groups a new entry with an accepted suggestion. The invoice-backed side
/// becomes principal; when neither or both are, the existing entry is kept.
/// An existing entry that already leads a group stays principal either way,
/// and an invoice on the new entry then backs that group.
pub async fn merge_suggestion(
    pool: &DbPool,
    new_id: EntryId,
    suggested_id: EntryId,
) -> Result<GroupOutcome, ReconcileError> {
    let new_entry = get_entry(pool, new_id)
        .await?
        .ok_or(ReconcileError::NotFound(new_id))?;
    let suggested = get_entry(pool, suggested_id)
        .await?
        .ok_or(ReconcileError::NotFound(suggested_id))?;

    let suggested_leads = suggested.group.as_ref().is_some_and(|g| !g.children.is_empty());
    if new_entry.invoice_backed() && !suggested.invoice_backed() && !suggested_leads {
        group(pool, new_id, suggested_id).await
    } else {
        group(pool, suggested_id, new_id).await
    }
}

pub async fn set_reconciled(
    pool: &DbPool,
    id: EntryId,
    reconciled: bool,
) -> Result<(), ReconcileError> {
    if !conta_storage::set_reconciled(pool, id, reconciled).await? {
        return Err(ReconcileError::NotFound(id));
    }
    Ok(())
}

pub async fn set_category(
    pool: &DbPool,
    id: EntryId,
    category: Option<CategoryId>,
) -> Result<(), ReconcileError> {
    if !conta_storage::set_category(pool, id, category).await? {
        return Err(ReconcileError::NotFound(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{date, outflow, test_db};
    use conta_core::EntryRole;

    #[tokio::test]
    async fn manual_entry_suggests_invoice_backed_match() {
        let (_dir, pool) = test_db().await;
        let config = ReconcileConfig::default();
        let invoiced = outflow("NF 1234 Fornecedor X", 15000, date(2024, 3, 8))
            .with_invoice(Some("1234".to_string()));
        let existing = insert_entry(&pool, &invoiced).await.unwrap();

        let draft = outflow("Pagamento Fornecedor X", 15000, date(2024, 3, 10));
        let before = suggest_for_draft(&pool, &config, &draft, &SessionIgnores::new())
            .await
            .unwrap();
        assert_eq!(before.len(), 1);

        let mut ignores = SessionIgnores::new();
        ignores.ignore_entry(existing);
        assert!(suggest_for_draft(&pool, &config, &draft, &ignores)
            .await
            .unwrap()
            .is_empty());

        let created = create_manual_entry(&pool, &config, &draft, &SessionIgnores::new())
            .await
            .unwrap();
        assert_eq!(created.suggestions.len(), 1);
        assert_eq!(created.suggestions[0].entry_id, existing);
        assert_eq!(created.suggestions[0].day_delta, 2);

        // The saved copy is itself a match for the same draft now.
        let after = suggest_for_draft(&pool, &config, &draft, &ignores).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].entry_id, created.id);
        ignores.ignore_entry(created.id);
        assert!(suggest_for_draft(&pool, &config, &draft, &ignores)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn merge_keeps_invoice_backed_entry_as_principal() {
        let (_dir, pool) = test_db().await;
        let config = ReconcileConfig::default();
        let invoiced = outflow("NF 1234 Fornecedor X", 15000, date(2024, 3, 8))
            .with_invoice(Some("1234".to_string()));
        let existing = insert_entry(&pool, &invoiced).await.unwrap();

        let created = create_manual_entry(
            &pool,
            &config,
            &outflow("Pagamento Fornecedor X", 15000, date(2024, 3, 10)),
            &SessionIgnores::new(),
        )
        .await
        .unwrap();

        let outcome = merge_suggestion(&pool, created.id, existing).await.unwrap();
        assert!(outcome.is_success());
        let child = get_entry(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(child.role(), EntryRole::Child(existing));
    }

    #[tokio::test]
    async fn invoiced_entry_joins_an_existing_group_as_child() {
        let (_dir, pool) = test_db().await;
        let config = ReconcileConfig::default();
        let principal = insert_entry(&pool, &outflow("Aluguel sala", 200000, date(2024, 3, 5)))
            .await
            .unwrap();
        let child = insert_entry(&pool, &outflow("Aluguel sala", 200000, date(2024, 3, 5)))
            .await
            .unwrap();
        group(&pool, principal, child).await.unwrap();

        let invoiced = outflow("NF 88 Aluguel sala", 200000, date(2024, 3, 6))
            .with_invoice(Some("88".to_string()));
        let created = create_manual_entry(&pool, &config, &invoiced, &SessionIgnores::new())
            .await
            .unwrap();

        let outcome = merge_suggestion(&pool, created.id, principal).await.unwrap();
        assert_eq!(
            outcome,
            GroupOutcome::Grouped {
                principal,
                child: created.id,
                item_count: 2
            }
        );
        let lead = get_entry(&pool, principal).await.unwrap().unwrap();
        assert!(lead.invoice_backed());
        assert_eq!(
            get_entry(&pool, created.id).await.unwrap().unwrap().role(),
            EntryRole::Child(principal)
        );
    }

    #[tokio::test]
    async fn flags_and_category_updates() {
        let (_dir, pool) = test_db().await;
        let id = insert_entry(&pool, &outflow("Internet", 9990, date(2024, 3, 5)))
            .await
            .unwrap();

        set_reconciled(&pool, id, true).await.unwrap();
        set_category(&pool, id, Some(CategoryId(8))).await.unwrap();
        let stored = get_entry(&pool, id).await.unwrap().unwrap();
        assert!(stored.reconciled);
        assert_eq!(stored.links.category_id, Some(CategoryId(8)));

        assert!(matches!(
            set_reconciled(&pool, EntryId(404), true).await,
            Err(ReconcileError::NotFound(_))
        ));
    }
}
