use chrono::NaiveDate;
use conta_core::{BankAccountId, Direction, EntryId, LedgerEntry, NewEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::ofx::OfxTransaction;
use crate::util::{levenshtein_similarity, meaningful_chars, normalize, tokens};

/// How a duplicate was recognised. `Exact` always wins over `Fingerprint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Fingerprint,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Fingerprint => "fingerprint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub date_window_days: u32,
    pub min_description_chars: usize,
    pub suggest_threshold: f32,
    pub weight_amount: f32,
    pub weight_date: f32,
    pub weight_description: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            date_window_days: 3,
            min_description_chars: 3,
            suggest_threshold: 0.60,
            weight_amount: 0.10,
            weight_date: 0.25,
            weight_description: 0.65,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchConfigError {
    #[error("Match weights must sum to 1.0, got {0}")]
    WeightSum(f32),
    #[error("Match weight '{0}' must not be negative")]
    NegativeWeight(&'static str),
    #[error("Threshold '{0}' must be in (0, 1], got {1}")]
    Threshold(&'static str, f32),
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), MatchConfigError> {
        for (name, w) in [
            ("weight_amount", self.weight_amount),
            ("weight_date", self.weight_date),
            ("weight_description", self.weight_description),
        ] {
            if w < 0.0 {
                return Err(MatchConfigError::NegativeWeight(name));
            }
        }
        let sum = self.weight_amount + self.weight_date + self.weight_description;
        if (sum - 1.0).abs() > 1e-4 {
            return Err(MatchConfigError::WeightSum(sum));
        }
        check_threshold("suggest_threshold", self.suggest_threshold)
    }
}

pub fn check_threshold(name: &'static str, value: f32) -> Result<(), MatchConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(MatchConfigError::Threshold(name, value))
    }
}

/// The fields the detector looks at, taken from a persisted entry, a draft,
/// or a statement line.
#[derive(Debug, Clone)]
pub struct MatchableEntry {
    pub id: Option<EntryId>,
    pub direction: Direction,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub description: String,
    pub bank_account_id: Option<BankAccountId>,
    pub has_invoice: bool,
}

impl From<&LedgerEntry> for MatchableEntry {
    fn from(e: &LedgerEntry) -> Self {
        MatchableEntry {
            id: Some(e.id),
            direction: e.direction,
            amount_cents: e.amount.to_cents(),
            date: e.date,
            description: e.description.clone(),
            bank_account_id: e.links.bank_account_id,
            has_invoice: e.invoice_backed(),
        }
    }
}

impl From<&NewEntry> for MatchableEntry {
    fn from(e: &NewEntry) -> Self {
        MatchableEntry {
            id: None,
            direction: e.direction,
            amount_cents: e.amount.to_cents(),
            date: e.date,
            description: e.description.clone(),
            bank_account_id: e.links.bank_account_id,
            has_invoice: e.has_invoice,
        }
    }
}

impl MatchableEntry {
    pub fn from_statement(tx: &OfxTransaction, bank_account_id: BankAccountId) -> Self {
        MatchableEntry {
            id: None,
            direction: tx.direction,
            amount_cents: tx.amount.to_cents(),
            date: tx.date,
            description: tx.description.clone(),
            bank_account_id: Some(bank_account_id),
            has_invoice: false,
        }
    }
}

/// Suggestions the user dismissed during the current session. Passed in
/// explicitly; nothing here is persisted.
#[derive(Debug, Clone, Default)]
pub struct SessionIgnores {
    entries: HashSet<EntryId>,
    pairs: HashSet<(EntryId, EntryId)>,
}

impl SessionIgnores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_entry(&mut self, id: EntryId) {
        self.entries.insert(id);
    }

    pub fn ignore_pair(&mut self, a: EntryId, b: EntryId) {
        self.pairs.insert(ordered(a, b));
    }

    pub fn is_entry_ignored(&self, id: EntryId) -> bool {
        self.entries.contains(&id)
    }

    pub fn is_pair_ignored(&self, a: EntryId, b: EntryId) -> bool {
        self.entries.contains(&a) || self.entries.contains(&b) || self.pairs.contains(&ordered(a, b))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.pairs.is_empty()
    }
}

fn ordered(a: EntryId, b: EntryId) -> (EntryId, EntryId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairScore {
    pub score: f32,
    pub day_delta: i64,
    pub description_similarity: f32,
}

/// An existing entry proposed as a duplicate of a subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub entry_id: EntryId,
    pub score: f32,
    pub day_delta: i64,
    pub method: MatchMethod,
}

/// An invoice-backed entry and a plain entry that look like the same event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePair {
    pub invoiced: EntryId,
    pub plain: EntryId,
    pub score: f32,
    pub day_delta: i64,
}

pub struct DuplicateMatcher {
    pub config: MatchConfig,
}

impl Default for DuplicateMatcher {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}

impl DuplicateMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// Scores a pair, or `None` if a mandatory condition fails: different
    /// amount or direction, dates outside the window, or a description too
    /// short to compare.
    pub fn score_pair(&self, a: &MatchableEntry, b: &MatchableEntry) -> Option<PairScore> {
        if a.amount_cents != b.amount_cents || a.direction != b.direction {
            return None;
        }

        let day_delta = (a.date - b.date).num_days().abs();
        let window = i64::from(self.config.date_window_days);
        if day_delta > window {
            return None;
        }

        let na = normalize(&a.description);
        let nb = normalize(&b.description);
        let min = self.config.min_description_chars;
        if meaningful_chars(&na) < min || meaningful_chars(&nb) < min {
            return None;
        }

        let description_similarity = description_similarity(&na, &nb);
        let date_score = 1.0 - (day_delta as f32 / (window + 1) as f32);
        let score = self.config.weight_amount
            + self.config.weight_date * date_score
            + self.config.weight_description * description_similarity;

        Some(PairScore {
            score,
            day_delta,
            description_similarity,
        })
    }

    /// Existing entries that may represent the same event as `subject`, best
    /// first. `account` restricts the search to one bank account. A score
    /// equal to `threshold` counts.
    pub fn find_candidates(
        &self,
        subject: &MatchableEntry,
        existing: &[MatchableEntry],
        account: Option<BankAccountId>,
        ignores: &SessionIgnores,
        threshold: f32,
    ) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = existing
            .iter()
            .filter_map(|exp| {
                let id = exp.id?;
                if subject.id == Some(id) || ignores.is_entry_ignored(id) {
                    return None;
                }
                if let Some(subject_id) = subject.id {
                    if ignores.is_pair_ignored(subject_id, id) {
                        return None;
                    }
                }
                if account.is_some() && exp.bank_account_id != account {
                    return None;
                }
                let s = self.score_pair(subject, exp)?;
                (s.score >= threshold).then_some(Candidate {
                    entry_id: id,
                    score: s.score,
                    day_delta: s.day_delta,
                    method: MatchMethod::Fingerprint,
                })
            })
            .collect();

        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.day_delta.cmp(&b.day_delta))
                .then(a.entry_id.cmp(&b.entry_id))
        });
        out
    }

    /// Every qualifying (invoice-backed, plain) pair, best first.
    pub fn find_cross_pairs(
        &self,
        invoiced: &[MatchableEntry],
        plain: &[MatchableEntry],
        ignores: &SessionIgnores,
        threshold: f32,
    ) -> Vec<CandidatePair> {
        let mut pairs = Vec::new();

        for inv in invoiced {
            let Some(inv_id) = inv.id else { continue };
            for pl in plain {
                let Some(pl_id) = pl.id else { continue };
                if inv_id == pl_id || ignores.is_pair_ignored(inv_id, pl_id) {
                    continue;
                }
                if let Some(s) = self.score_pair(inv, pl) {
                    if s.score >= threshold {
                        pairs.push(CandidatePair {
                            invoiced: inv_id,
                            plain: pl_id,
                            score: s.score,
                            day_delta: s.day_delta,
                        });
                    }
                }
            }
        }

        pairs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.day_delta.cmp(&b.day_delta))
                .then(a.invoiced.cmp(&b.invoiced))
                .then(a.plain.cmp(&b.plain))
        });
        pairs
    }
}

/// Similarity of two normalised descriptions in [0.0, 1.0]: the better of
/// token overlap and whole-string edit similarity.
pub fn description_similarity(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    token_overlap(a, b).max(levenshtein_similarity(a, b))
}

/// Share of the smaller token set found in the larger one. Tokens of four
/// or more chars also match on prefix ("fornec" ~ "fornecedor").
fn token_overlap(a: &str, b: &str) -> f32 {
    let mut ta: Vec<&str> = tokens(a);
    let mut tb: Vec<&str> = tokens(b);
    ta.sort_unstable();
    ta.dedup();
    tb.sort_unstable();
    tb.dedup();

    let (small, large) = if ta.len() <= tb.len() { (ta, tb) } else { (tb, ta) };
    if small.is_empty() {
        return 0.0;
    }

    let hits = small
        .iter()
        .filter(|s| large.iter().any(|l| tokens_match(s, l)))
        .count();
    hits as f32 / small.len() as f32
}

fn tokens_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() >= 4 && long.starts_with(short)
}
