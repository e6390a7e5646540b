use std::ops::ControlFlow;

use chrono::{NaiveDate, Utc};
use conta_core::{BankAccountId, Direction, EntryLinks, EntryRole, Money, NewEntry};
use conta_import::{MatchMethod, SessionIgnores};
use conta_reconcile::{
    can_delete, check_exact, create_manual_entry, delete_batch, group, import, ungroup,
    ReconcileConfig,
};
use conta_storage::{create_db, get_entry, insert_entry, list_top_level, DbPool};
use tempfile::TempDir;

async fn setup() -> (TempDir, DbPool) {
    conta_reconcile::logging::init();
    let dir = tempfile::tempdir().unwrap();
    let pool = create_db(&dir.path().join("ledger.db")).await.unwrap();
    (dir, pool)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn entry(direction: Direction, cents: i64, on: NaiveDate, description: &str) -> NewEntry {
    NewEntry::new(direction, Money::from_cents(cents), on, description)
        .unwrap()
        .with_links(EntryLinks {
            bank_account_id: Some(BankAccountId(1)),
            ..EntryLinks::default()
        })
}

#[test]
fn repeated_fit_id_in_one_file_yields_one_transaction() {
    let ofx = r#"OFXHEADER:100
<OFX><BANKTRANLIST>
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20240301
<TRNAMT>-10.00
<FITID>ABC123
<MEMO>TARIFA
</STMTTRN>
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20240301
<TRNAMT>-10.00
<FITID>ABC123>
<MEMO>TARIFA
</STMTTRN>
</BANKTRANLIST></OFX>"#;

    let statement = conta_import::import::import_ofx(ofx.as_bytes()).unwrap();
    assert_eq!(statement.transactions.len(), 1);
    assert_eq!(statement.transactions[0].fit_id, "ABC123");
}

#[tokio::test]
async fn persisted_fit_id_is_an_exact_duplicate_before_insert() {
    let (_dir, pool) = setup().await;
    let account = BankAccountId(1);
    let first = entry(Direction::Outflow, 1000, date(2024, 3, 1), "TARIFA")
        .imported("ABC123", Utc::now())
        .unwrap();
    let id = insert_entry(&pool, &first).await.unwrap();

    let found = check_exact(&pool, account, "ABC123").await.unwrap().unwrap();
    assert_eq!(found.entry_id, id);
    assert_eq!(found.method, MatchMethod::Exact);

    // The store refuses the second copy even if the check were skipped.
    let again = entry(Direction::Outflow, 1000, date(2024, 3, 2), "Tarifa editada")
        .imported("ABC123", Utc::now())
        .unwrap();
    assert!(insert_entry(&pool, &again).await.is_err());
}

#[tokio::test]
async fn group_and_ungroup_move_the_child_in_and_out_of_the_listing() {
    let (_dir, pool) = setup().await;
    let p = insert_entry(&pool, &entry(Direction::Outflow, 5000, date(2024, 3, 1), "Aluguel"))
        .await
        .unwrap();
    let c = insert_entry(&pool, &entry(Direction::Outflow, 5000, date(2024, 3, 1), "Aluguel"))
        .await
        .unwrap();

    assert!(group(&pool, p, c).await.unwrap().is_success());
    let child = get_entry(&pool, c).await.unwrap().unwrap();
    assert_eq!(child.group_id, Some(p));
    assert!(!list_top_level(&pool).await.unwrap().iter().any(|e| e.id == c));

    assert!(ungroup(&pool, c).await.unwrap().is_success());
    let child = get_entry(&pool, c).await.unwrap().unwrap();
    assert_eq!(child.group_id, None);
    assert!(list_top_level(&pool).await.unwrap().iter().any(|e| e.id == c));
}

#[tokio::test]
async fn principal_left_with_one_child_is_no_longer_a_principal() {
    let (_dir, pool) = setup().await;
    let mut ids = Vec::new();
    for day in 1..=3 {
        let sale = entry(Direction::Inflow, 700, date(2024, 3, day), "Venda balcao");
        ids.push(insert_entry(&pool, &sale).await.unwrap());
    }
    group(&pool, ids[0], ids[1]).await.unwrap();
    group(&pool, ids[0], ids[2]).await.unwrap();

    ungroup(&pool, ids[1]).await.unwrap();
    let principal = get_entry(&pool, ids[0]).await.unwrap().unwrap();
    assert!(!principal.is_group_principal);
    assert_eq!(principal.role(), EntryRole::Standalone);
}

#[tokio::test]
async fn principal_is_deletable_only_after_its_children_leave() {
    let (_dir, pool) = setup().await;
    let p = insert_entry(&pool, &entry(Direction::Outflow, 100, date(2024, 3, 1), "Frete"))
        .await
        .unwrap();
    let c = insert_entry(&pool, &entry(Direction::Outflow, 100, date(2024, 3, 1), "Frete"))
        .await
        .unwrap();
    group(&pool, p, c).await.unwrap();

    let verdict = can_delete(&pool, p).await.unwrap();
    assert!(!verdict.is_allowed());
    assert!(verdict.reason().is_some());

    ungroup(&pool, c).await.unwrap();
    assert!(can_delete(&pool, p).await.unwrap().is_allowed());
}

#[tokio::test]
async fn manual_entry_finds_invoice_backed_entry_two_days_earlier() {
    let (_dir, pool) = setup().await;
    let config = ReconcileConfig::default();
    let invoiced = entry(Direction::Outflow, 15000, date(2024, 3, 8), "NF 1234 Fornecedor X")
        .with_invoice(Some("1234".to_string()));
    let existing = insert_entry(&pool, &invoiced).await.unwrap();

    let manual = entry(Direction::Outflow, 15000, date(2024, 3, 10), "Pagamento Fornecedor X");
    let created = create_manual_entry(&pool, &config, &manual, &SessionIgnores::new())
        .await
        .unwrap();

    assert_eq!(created.suggestions.len(), 1);
    let suggestion = &created.suggestions[0];
    assert_eq!(suggestion.entry_id, existing);
    assert_eq!(suggestion.day_delta, 2);
    assert!(suggestion.score >= config.matching.suggest_threshold);
}

#[tokio::test]
async fn batch_delete_skips_the_principal_and_says_why() {
    let (_dir, pool) = setup().await;
    let first = insert_entry(&pool, &entry(Direction::Outflow, 100, date(2024, 3, 1), "Um"))
        .await
        .unwrap();
    let principal = insert_entry(&pool, &entry(Direction::Outflow, 200, date(2024, 3, 1), "Dois"))
        .await
        .unwrap();
    let third = insert_entry(&pool, &entry(Direction::Outflow, 300, date(2024, 3, 1), "Tres"))
        .await
        .unwrap();
    let child = insert_entry(&pool, &entry(Direction::Outflow, 200, date(2024, 3, 1), "Dois"))
        .await
        .unwrap();
    group(&pool, principal, child).await.unwrap();

    let mut progress = Vec::new();
    let report = delete_batch(&pool, &[first, principal, third], |p| progress.push(p.done)).await;

    assert_eq!(report.deleted_count(), 2);
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.skipped[0].0, principal);
    assert!(!report.skipped[0].1.is_empty());
    assert_eq!(progress, vec![1, 2, 3]);
    assert!(get_entry(&pool, principal).await.unwrap().is_some());
    assert!(get_entry(&pool, first).await.unwrap().is_none());
}

#[tokio::test]
async fn statement_import_end_to_end() {
    let (_dir, pool) = setup().await;
    let config = ReconcileConfig::default();
    let account = BankAccountId(1);
    let ofx = r#"<OFX>
<STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20240308<TRNAMT>-150,00<FITID>TXN001<MEMO>PAGTO FORNECEDOR X</STMTTRN>
<STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20240308<TRNAMT>-150,00<FITID>TXN001<MEMO>PAGTO FORNECEDOR X</STMTTRN>
<STMTTRN><TRNTYPE>CREDIT<DTPOSTED>20240309<TRNAMT>80.00<FITID>TXN002<MEMO>PIX RECEBIDO</STMTTRN>
<STMTTRN><TRNTYPE>DEBIT<TRNAMT>-5.00<FITID>TXN003</STMTTRN>
</OFX>"#;

    let preview = import::preview(&pool, &config, ofx.as_bytes(), account)
        .await
        .unwrap();
    assert_eq!(preview.rows.len(), 2);
    assert_eq!(preview.repeated_fit_ids, 1);
    assert_eq!(preview.skipped.len(), 1);

    let report = import::commit(&pool, &config, account, &preview.new_rows(), Utc::now(), |_| {
        ControlFlow::Continue(())
    })
    .await;
    assert_eq!(report.imported, 2);
    assert_eq!(report.errors, 0);

    let again = import::preview(&pool, &config, ofx.as_bytes(), account)
        .await
        .unwrap();
    assert!(again.new_rows().is_empty());
}
