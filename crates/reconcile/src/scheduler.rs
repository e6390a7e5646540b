//! Unattended merging of invoice-backed entries with their plain duplicates,
//! run once per session before the ledger is first shown.

use std::collections::HashSet;

use chrono::NaiveDate;
use conta_core::{DateRange, EntryId, LedgerEntry};
use conta_import::{CandidatePair, DuplicateMatcher, MatchableEntry, SessionIgnores};
use conta_storage::{list_unreconciled, DbPool};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::grouping::{group, GroupOutcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoReconcileReport {
    /// Pairs at or above the auto-merge threshold, before greedy assignment.
    pub considered_pairs: usize,
    pub merged: usize,
    pub merges: Vec<CandidatePair>,
    pub failures: Vec<(CandidatePair, String)>,
}

/// Merges every high-confidence (invoice-backed, plain) pair among the
/// unreconciled entries of the last `auto.recency_days` days. The
/// invoice-backed entry is always the principal. Pairs are taken best first
/// and each entry takes part in at most one merge per run.
pub async fn run_auto_reconciliation(
    pool: &DbPool,
    config: &ReconcileConfig,
    today: NaiveDate,
    ignores: &SessionIgnores,
) -> Result<AutoReconcileReport, ReconcileError> {
    let range = DateRange::trailing_days(today, config.auto.recency_days);
    let entries = list_unreconciled(pool, range).await?;

    let (invoiced, plain): (Vec<&LedgerEntry>, Vec<&LedgerEntry>) = entries
        .iter()
        .filter(|e| !ignores.is_entry_ignored(e.id))
        .partition(|e| e.invoice_backed());
    let invoiced: Vec<MatchableEntry> = invoiced.into_iter().map(MatchableEntry::from).collect();
    // A plain entry that already leads a group is never turned into a child.
    let plain: Vec<MatchableEntry> = plain
        .into_iter()
        .filter(|e| e.group.as_ref().map_or(true, |g| g.children.is_empty()))
        .map(MatchableEntry::from)
        .collect();

    let matcher = DuplicateMatcher::new(config.matching.clone());
    let pairs = matcher.find_cross_pairs(&invoiced, &plain, ignores, config.auto.threshold);
    debug!(
        window = %range,
        invoiced = invoiced.len(),
        plain = plain.len(),
        pairs = pairs.len(),
        "Auto-reconciliation candidates"
    );

    let mut report = AutoReconcileReport {
        considered_pairs: pairs.len(),
        ..AutoReconcileReport::default()
    };
    let mut used: HashSet<EntryId> = HashSet::new();

    for pair in pairs {
        if used.contains(&pair.invoiced) || used.contains(&pair.plain) {
            continue;
        }
        match group(pool, pair.invoiced, pair.plain).await {
            Ok(GroupOutcome::Grouped { .. }) | Ok(GroupOutcome::Unchanged) => {
                used.insert(pair.invoiced);
                used.insert(pair.plain);
                report.merged += 1;
                report.merges.push(pair);
            }
            Ok(GroupOutcome::Rejected(reason)) => {
                debug!(
                    invoiced = %pair.invoiced,
                    plain = %pair.plain,
                    %reason,
                    "Auto-merge rejected"
                );
                report.failures.push((pair, reason.to_string()));
            }
            Err(e) => {
                warn!(
                    invoiced = %pair.invoiced,
                    plain = %pair.plain,
                    error = %e,
                    "Auto-merge failed"
                );
                report.failures.push((pair, e.to_string()));
            }
        }
    }

    info!(
        merged = report.merged,
        considered = report.considered_pairs,
        failures = report.failures.len(),
        "Auto-reconciliation finished"
    );
    Ok(report)
}

/// Per-session state: suggestions the user dismissed and whether the
/// automatic pass already ran.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationSession {
    ignores: SessionIgnores,
    auto_ran: bool,
}

impl ReconciliationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignores(&self) -> &SessionIgnores {
        &self.ignores
    }

    pub fn ignore_entry(&mut self, id: EntryId) {
        self.ignores.ignore_entry(id);
    }

    pub fn ignore_pair(&mut self, a: EntryId, b: EntryId) {
        self.ignores.ignore_pair(a, b);
    }

    pub fn auto_ran(&self) -> bool {
        self.auto_ran
    }

    /// Runs the automatic pass the first time it is called; later calls
    /// return `None`.
    pub async fn run_auto_once(
        &mut self,
        pool: &DbPool,
        config: &ReconcileConfig,
        today: NaiveDate,
    ) -> Result<Option<AutoReconcileReport>, ReconcileError> {
        if self.auto_ran {
            return Ok(None);
        }
        self.auto_ran = true;
        run_auto_reconciliation(pool, config, today, &self.ignores)
            .await
            .map(Some)
    }

    /// Starts the automatic pass in the background so loading the ledger
    /// does not wait for it. The task resolves to the number of merges, or
    /// `None` if the pass failed. Returns `None` if the pass already ran.
    pub fn spawn_auto_once(
        &mut self,
        pool: DbPool,
        config: ReconcileConfig,
        today: NaiveDate,
    ) -> Option<JoinHandle<Option<usize>>> {
        if self.auto_ran {
            return None;
        }
        self.auto_ran = true;
        let ignores = self.ignores.clone();
        Some(tokio::spawn(async move {
            match run_auto_reconciliation(&pool, &config, today, &ignores).await {
                Ok(report) => Some(report.merged),
                Err(e) => {
                    warn!(error = %e, "Background auto-reconciliation failed");
                    None
                }
            }
        }))
    }
}
