use chrono::NaiveDate;
use conta_core::{Direction, Money};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use thiserror::Error;

/// A statement transaction normalised to an unsigned amount plus direction.
#[derive(Debug, Clone, PartialEq)]
pub struct OfxTransaction {
    pub fit_id: String,
    pub date: NaiveDate,
    pub direction: Direction,
    pub amount: Money,
    pub description: String,
    pub trn_type: Option<String>,
    pub memo: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfxAccount {
    pub account_id: Option<String>,
    pub bank_id: Option<String>,
    pub currency: Option<String>,
}

/// A `<STMTTRN>` block that could not be turned into a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedBlock {
    /// Zero-based position of the block in the file.
    pub index: usize,
    pub fit_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct OfxStatement {
    pub account: OfxAccount,
    pub transactions: Vec<OfxTransaction>,
    pub skipped: Vec<SkippedBlock>,
    /// Blocks dropped because their FITID already appeared earlier in the file.
    pub repeated_fit_ids: usize,
}

#[derive(Error, Debug)]
pub enum OfxError {
    #[error("File does not look like an OFX statement")]
    NotOfx,
    #[error("Failed to parse OFX: {0}")]
    ParseError(String),
    #[error("Invalid OFX pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub struct OfxParser {
    block_re: Regex,
    tag_re: Regex,
    // A FITID value may itself open with stray `<` characters.
    fit_id_re: Regex,
}

impl OfxParser {
    pub fn new() -> Result<Self, OfxError> {
        Ok(Self {
            block_re: Regex::new(r"(?is)<STMTTRN>(.*?)</STMTTRN>")?,
            tag_re: Regex::new(r"<([A-Za-z0-9.]+)>([^<\r\n]*)")?,
            fit_id_re: Regex::new(r"(?i)<FITID>(<+[^</\r\n][^<\r\n]*|[^<\r\n]*)")?,
        })
    }

    pub fn parse(&self, data: &str) -> Result<OfxStatement, OfxError> {
        let upper = data.to_ascii_uppercase();
        let opened = upper.matches("<STMTTRN>").count();
        if !upper.contains("<OFX>") && opened == 0 {
            return Err(OfxError::NotOfx);
        }

        let header = self.fields(data);
        let account = OfxAccount {
            account_id: header.get("ACCTID").cloned(),
            bank_id: header.get("BANKID").cloned(),
            currency: header.get("CURDEF").cloned(),
        };

        let mut statement = OfxStatement {
            account,
            ..OfxStatement::default()
        };
        let mut seen = HashSet::new();
        let mut closed = 0;

        for (index, caps) in self.block_re.captures_iter(data).enumerate() {
            closed += 1;
            let body = caps.get(1).map_or("", |m| m.as_str());
            match self.parse_block(body) {
                Ok(trx) => {
                    if seen.insert(trx.fit_id.clone()) {
                        statement.transactions.push(trx);
                    } else {
                        statement.repeated_fit_ids += 1;
                    }
                }
                Err((fit_id, reason)) => statement.skipped.push(SkippedBlock {
                    index,
                    fit_id,
                    reason,
                }),
            }
        }

        if opened > closed {
            if closed == 0 {
                return Err(OfxError::ParseError(format!(
                    "{opened} <STMTTRN> block(s) opened but none closed"
                )));
            }
            statement.skipped.push(SkippedBlock {
                index: closed,
                fit_id: None,
                reason: format!("{} unterminated <STMTTRN> block(s)", opened - closed),
            });
        }

        Ok(statement)
    }

    /// First value of every tag in `text`, keyed by upper-cased tag name.
    fn fields(&self, text: &str) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for caps in self.tag_re.captures_iter(text) {
            let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let value = value.as_str().trim();
            if value.is_empty() {
                continue;
            }
            out.entry(name.as_str().to_ascii_uppercase())
                .or_insert_with(|| value.to_string());
        }
        out
    }

    fn parse_block(&self, body: &str) -> Result<OfxTransaction, (Option<String>, String)> {
        let fields = self.fields(body);

        let fit_id = self
            .fit_id_re
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| clean_fit_id(m.as_str()))
            .find(|v| !v.is_empty());
        let Some(fit_id) = fit_id else {
            return Err((None, "missing FITID".to_string()));
        };

        let date = match fields.get("DTPOSTED") {
            Some(raw) => match parse_ofx_date(raw) {
                Some(d) => d,
                None => return Err((Some(fit_id), format!("invalid DTPOSTED '{raw}'"))),
            },
            None => return Err((Some(fit_id), "missing DTPOSTED".to_string())),
        };

        let signed = match fields.get("TRNAMT") {
            Some(raw) => match parse_ofx_amount(raw) {
                Some(a) => a,
                None => return Err((Some(fit_id), format!("invalid TRNAMT '{raw}'"))),
            },
            None => return Err((Some(fit_id), "missing TRNAMT".to_string())),
        };

        let direction = if signed.is_sign_negative() && !signed.is_zero() {
            Direction::Outflow
        } else {
            Direction::Inflow
        };

        let trn_type = fields.get("TRNTYPE").cloned();
        let memo = fields.get("MEMO").cloned();
        let name = fields.get("NAME").cloned();
        let description = memo
            .clone()
            .or_else(|| name.clone())
            .or_else(|| trn_type.clone())
            .unwrap_or_default();

        Ok(OfxTransaction {
            fit_id,
            date,
            direction,
            amount: Money::from_decimal(signed.abs()),
            description,
            trn_type,
            memo,
            name,
        })
    }
}

/// Banks occasionally leak markup into the FITID (`ABC123>` or `<ABC123`).
fn clean_fit_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_ofx_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let y: i32 = s.get(0..4)?.parse().ok()?;
    let m: u32 = s.get(4..6)?.parse().ok()?;
    let d: u32 = s.get(6..8)?.parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Accepts `.` or `,` as decimal separator; when both appear the last one
/// is the decimal separator and the other is a thousands separator.
fn parse_ofx_amount(s: &str) -> Option<Decimal> {
    let s = s.trim().replace(' ', "");
    let normalized = match (s.rfind('.'), s.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (None, Some(_)) => s.replace(',', "."),
        _ => s,
    };
    Decimal::from_str(&normalized).ok()
}

pub fn parse(data: &[u8]) -> Result<OfxStatement, OfxError> {
    let content = String::from_utf8_lossy(data);
    OfxParser::new()?.parse(&content)
}
