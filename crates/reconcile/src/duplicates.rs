use conta_core::{BankAccountId, DateRange, EntryId, LedgerEntry};
use conta_import::{Candidate, DuplicateMatcher, MatchMethod, MatchableEntry, SessionIgnores};
use conta_storage::{find_by_fit_id, list_same_amount, DbPool};
use serde::Serialize;

use crate::error::ReconcileError;

/// An existing entry that already represents the event being checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub entry_id: EntryId,
    pub method: MatchMethod,
    pub score: f32,
    pub day_delta: i64,
}

/// Authoritative FITID lookup within one bank account.
pub async fn check_exact(
    pool: &DbPool,
    account: BankAccountId,
    fit_id: &str,
) -> Result<Option<DuplicateMatch>, ReconcileError> {
    let fit_id = fit_id.trim();
    if fit_id.is_empty() {
        return Ok(None);
    }
    Ok(find_by_fit_id(pool, account, fit_id)
        .await?
        .map(|existing| DuplicateMatch {
            entry_id: existing.id,
            method: MatchMethod::Exact,
            score: 1.0,
            day_delta: 0,
        }))
}

/// Loads the entries that could possibly match `subject`: same direction and
/// amount, inside the date window, top level only.
pub async fn load_candidates(
    pool: &DbPool,
    matcher: &DuplicateMatcher,
    subject: &MatchableEntry,
    account: Option<BankAccountId>,
) -> Result<Vec<LedgerEntry>, ReconcileError> {
    let range = DateRange::around(subject.date, matcher.config.date_window_days);
    Ok(list_same_amount(pool, subject.direction, subject.amount_cents, range, account).await?)
}

/// Ranked fuzzy suggestions for `subject`, for user review.
pub async fn suggest_duplicates(
    pool: &DbPool,
    matcher: &DuplicateMatcher,
    subject: &MatchableEntry,
    account: Option<BankAccountId>,
    ignores: &SessionIgnores,
) -> Result<Vec<Candidate>, ReconcileError> {
    let existing: Vec<MatchableEntry> = load_candidates(pool, matcher, subject, account)
        .await?
        .iter()
        .map(MatchableEntry::from)
        .collect();
    Ok(matcher.find_candidates(
        subject,
        &existing,
        account,
        ignores,
        matcher.config.suggest_threshold,
    ))
}

/// Exact match first; otherwise the best fingerprint match at or above
/// `threshold` among the account's entries that carry no FITID (typed by hand
/// or backed by an invoice). An entry imported under a different FITID is a
/// different bank transaction, however alike it looks.
pub async fn detect_import_duplicate(
    pool: &DbPool,
    matcher: &DuplicateMatcher,
    line: &MatchableEntry,
    account: BankAccountId,
    fit_id: &str,
    threshold: f32,
) -> Result<Option<DuplicateMatch>, ReconcileError> {
    if let Some(exact) = check_exact(pool, account, fit_id).await? {
        return Ok(Some(exact));
    }

    let unimported: Vec<MatchableEntry> = load_candidates(pool, matcher, line, Some(account))
        .await?
        .iter()
        .filter(|e| e.provenance.is_none())
        .map(MatchableEntry::from)
        .collect();

    Ok(matcher
        .find_candidates(line, &unimported, Some(account), &SessionIgnores::new(), threshold)
        .into_iter()
        .next()
        .map(|c| DuplicateMatch {
            entry_id: c.entry_id,
            method: MatchMethod::Fingerprint,
            score: c.score,
            day_delta: c.day_delta,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{date, outflow, test_db};
    use chrono::Utc;
    use conta_storage::insert_entry;

    #[tokio::test]
    async fn exact_match_ignores_later_edits() {
        let (_dir, pool) = test_db().await;
        let first = outflow("PIX fornecedor", 15000, date(2024, 3, 8))
            .imported("ABC123", Utc::now())
            .unwrap();
        let id = insert_entry(&pool, &first).await.unwrap();

        let hit = check_exact(&pool, BankAccountId(1), " ABC123 ").await.unwrap().unwrap();
        assert_eq!(hit.entry_id, id);
        assert_eq!(hit.method, MatchMethod::Exact);
        assert!(check_exact(&pool, BankAccountId(2), "ABC123").await.unwrap().is_none());
        assert!(check_exact(&pool, BankAccountId(1), "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exact_wins_over_fingerprint() {
        let (_dir, pool) = test_db().await;
        let matcher = DuplicateMatcher::default();
        let manual = insert_entry(&pool, &outflow("PAGTO FORNECEDOR X", 15000, date(2024, 3, 8)))
            .await
            .unwrap();
        let exact_id = insert_entry(
            &pool,
            &outflow("Something else entirely", 15000, date(2024, 3, 1))
                .imported("ABC123", Utc::now())
                .unwrap(),
        )
        .await
        .unwrap();

        let line = MatchableEntry::from(&outflow("PAGTO FORNECEDOR X", 15000, date(2024, 3, 8)));
        let hit = detect_import_duplicate(&pool, &matcher, &line, BankAccountId(1), "ABC123", 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.method, MatchMethod::Exact);
        assert_eq!(hit.entry_id, exact_id);

        let hit = detect_import_duplicate(&pool, &matcher, &line, BankAccountId(1), "NEW", 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.method, MatchMethod::Fingerprint);
        assert_eq!(hit.entry_id, manual);
    }

    #[tokio::test]
    async fn import_fingerprint_never_matches_other_statement_lines() {
        let (_dir, pool) = test_db().await;
        let matcher = DuplicateMatcher::default();
        insert_entry(
            &pool,
            &outflow("CAFE PADARIA", 1200, date(2024, 3, 9))
                .imported("TXN003", Utc::now())
                .unwrap(),
        )
        .await
        .unwrap();

        let line = MatchableEntry::from(&outflow("CAFE PADARIA", 1200, date(2024, 3, 9)));
        let hit = detect_import_duplicate(&pool, &matcher, &line, BankAccountId(1), "TXN004", 0.85)
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn import_fingerprint_matches_manual_entries_in_the_account() {
        let (_dir, pool) = test_db().await;
        let matcher = DuplicateMatcher::default();
        let manual = insert_entry(&pool, &outflow("PAGTO FORNECEDOR X", 15000, date(2024, 3, 8)))
            .await
            .unwrap();

        let line = MatchableEntry::from(&outflow("PAGTO FORNECEDOR X", 15000, date(2024, 3, 8)));
        let hit = detect_import_duplicate(&pool, &matcher, &line, BankAccountId(1), "NEW", 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.method, MatchMethod::Fingerprint);
        assert_eq!(hit.entry_id, manual);

        let elsewhere = detect_import_duplicate(&pool, &matcher, &line, BankAccountId(2), "NEW", 0.85)
            .await
            .unwrap();
        assert!(elsewhere.is_none());
    }

    #[tokio::test]
    async fn suggestions_span_accounts_when_unrestricted() {
        let (_dir, pool) = test_db().await;
        let matcher = DuplicateMatcher::default();
        let mut invoiced = outflow("NF 1234 Fornecedor X", 15000, date(2024, 3, 8))
            .with_invoice(Some("1234".to_string()));
        invoiced.links.bank_account_id = None;
        let id = insert_entry(&pool, &invoiced).await.unwrap();

        let subject = MatchableEntry::from(&outflow("Pagamento Fornecedor X", 15000, date(2024, 3, 10)));
        let found = suggest_duplicates(&pool, &matcher, &subject, None, &SessionIgnores::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry_id, id);
        assert_eq!(found[0].day_delta, 2);

        let restricted =
            suggest_duplicates(&pool, &matcher, &subject, Some(BankAccountId(1)), &SessionIgnores::new())
                .await
                .unwrap();
        assert!(restricted.is_empty());
    }
}
