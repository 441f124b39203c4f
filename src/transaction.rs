// Transaction model
// The record the store owns and the aggregator reads, plus the create/patch
// payloads and their validation rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FieldError;

// ============================================================================
// KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "INCOME",
            TransactionKind::Expense => "EXPENSE",
        }
    }

    /// Exact wire spelling only, as used by query filters.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "INCOME" => Some(TransactionKind::Income),
            "EXPENSE" => Some(TransactionKind::Expense),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transaction type '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for TransactionKind {
    type Err = UnknownKind;

    /// Accepts `INCOME` / `EXPENSE` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INCOME" => Ok(TransactionKind::Income),
            "EXPENSE" => Ok(TransactionKind::Expense),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A stored income or expense entry.
///
/// Invariant: `amount > 0`. The store refuses anything else, so readers
/// (the stats reducer in particular) never re-check it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: f64,
    pub category: String,
    pub description: String,
    #[serde(rename = "date")]
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_income(&self) -> bool {
        self.kind == TransactionKind::Income
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Payload for creating a transaction. `date` defaults to "now" when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "date", default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewTransaction {
    pub fn new(
        kind: TransactionKind,
        amount: f64,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            amount,
            category: category.into(),
            description: description.into(),
            occurred_at: None,
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Collects every rule violation instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        check_amount(self.amount, &mut errors);
        check_label("category", &self.category, &mut errors);
        check_label("description", &self.description, &mut errors);
        finish(errors)
    }
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPatch {
    #[serde(rename = "type", default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "date", default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl TransactionPatch {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(amount) = self.amount {
            check_amount(amount, &mut errors);
        }
        if let Some(category) = &self.category {
            check_label("category", category, &mut errors);
        }
        if let Some(description) = &self.description {
            check_label("description", description, &mut errors);
        }
        finish(errors)
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.amount.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.occurred_at.is_none()
    }

    /// Writes the provided fields onto `tx`. Does not touch `updated_at`.
    pub fn apply_to(&self, tx: &mut Transaction) {
        if let Some(kind) = self.kind {
            tx.kind = kind;
        }
        if let Some(amount) = self.amount {
            tx.amount = amount;
        }
        if let Some(category) = &self.category {
            tx.category = category.clone();
        }
        if let Some(description) = &self.description {
            tx.description = description.clone();
        }
        if let Some(occurred_at) = self.occurred_at {
            tx.occurred_at = occurred_at;
        }
    }
}

/// Optional narrowing for transaction listings. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub category: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

fn check_amount(amount: f64, errors: &mut Vec<FieldError>) {
    if !amount.is_finite() || amount <= 0.0 {
        errors.push(FieldError::new("amount", "must be a positive number"));
    }
}

fn check_label(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
