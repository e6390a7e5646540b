use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BankAccountId(pub i64);

impl fmt::Display for BankAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub i64);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inflow,
    Outflow,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inflow => "inflow",
            Direction::Outflow => "outflow",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the canonical names plus the legacy Portuguese synonyms still
/// found in older rows and form payloads.
impl FromStr for Direction {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inflow" | "receita" | "entrada" | "credit" => Ok(Direction::Inflow),
            "outflow" | "despesa" | "saida" | "saída" | "debit" => Ok(Direction::Outflow),
            other => Err(EntryError::UnknownDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EntryError {
    #[error("Unknown entry direction: '{0}'")]
    UnknownDirection(String),
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(Money),
    #[error("Description must not be empty")]
    EmptyDescription,
    #[error("FITID must not be empty")]
    EmptyFitId,
}

/// Weak references to records owned by other parts of the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLinks {
    pub category_id: Option<CategoryId>,
    pub bank_account_id: Option<BankAccountId>,
    pub sale_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub supplier_id: Option<i64>,
    pub incoming_invoice_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProvenance {
    pub fit_id: String,
    pub imported_at: DateTime<Utc>,
}

/// Aggregates carried by a group principal. Always derived from the current
/// child set; never edited directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub item_count: u32,
    pub has_invoice: bool,
    pub children: Vec<LedgerEntry>,
}

impl GroupSummary {
    pub fn from_children(children: Vec<LedgerEntry>) -> Self {
        GroupSummary {
            item_count: children.len() as u32,
            has_invoice: children.iter().any(|c| c.has_invoice),
            children,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    Standalone,
    Principal,
    Child(EntryId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub direction: Direction,
    pub amount: Money,
    pub date: NaiveDate,
    pub description: String,
    pub document_number: Option<String>,
    pub links: EntryLinks,
    pub provenance: Option<ImportProvenance>,
    pub reconciled: bool,
    pub has_invoice: bool,
    pub group_id: Option<EntryId>,
    pub is_group_principal: bool,
    /// Present only on principals, and only when loaded with children.
    pub group: Option<GroupSummary>,
}

impl LedgerEntry {
    pub fn role(&self) -> EntryRole {
        match (self.group_id, self.is_group_principal) {
            (Some(principal), _) => EntryRole::Child(principal),
            (None, true) => EntryRole::Principal,
            (None, false) => EntryRole::Standalone,
        }
    }

    pub fn fit_id(&self) -> Option<&str> {
        self.provenance.as_ref().map(|p| p.fit_id.as_str())
    }

    pub fn bank_account_id(&self) -> Option<BankAccountId> {
        self.links.bank_account_id
    }

    /// True if this entry or, for a principal, any of its children carries an
    /// official tax document.
    pub fn invoice_backed(&self) -> bool {
        self.has_invoice || self.group.as_ref().is_some_and(|g| g.has_invoice)
    }
}

/// An entry that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub direction: Direction,
    pub amount: Money,
    pub date: NaiveDate,
    pub description: String,
    pub document_number: Option<String>,
    pub links: EntryLinks,
    pub provenance: Option<ImportProvenance>,
    pub has_invoice: bool,
}

impl NewEntry {
    pub fn new(
        direction: Direction,
        amount: Money,
        date: NaiveDate,
        description: &str,
    ) -> Result<Self, EntryError> {
        if amount.is_negative() {
            return Err(EntryError::NegativeAmount(amount));
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(EntryError::EmptyDescription);
        }
        Ok(NewEntry {
            direction,
            amount,
            date,
            description: description.to_string(),
            document_number: None,
            links: EntryLinks::default(),
            provenance: None,
            has_invoice: false,
        })
    }

    pub fn with_links(mut self, links: EntryLinks) -> Self {
        self.links = links;
        self
    }

    pub fn with_invoice(mut self, document_number: Option<String>) -> Self {
        self.has_invoice = true;
        self.document_number = document_number;
        self
    }

    pub fn imported(mut self, fit_id: &str, imported_at: DateTime<Utc>) -> Result<Self, EntryError> {
        let fit_id = fit_id.trim();
        if fit_id.is_empty() {
            return Err(EntryError::EmptyFitId);
        }
        self.provenance = Some(ImportProvenance {
            fit_id: fit_id.to_string(),
            imported_at,
        });
        Ok(self)
    }
}
