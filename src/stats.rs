// Period statistics
// Resolves the window for a period, asks a transaction source for the
// user's transactions inside it and folds them into income/expense totals
// with a per-category split.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use crate::period::{PeriodKind, PeriodWindow, WeekStart, WindowResolver};
use crate::transaction::{Transaction, TransactionKind};

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Income and expense accumulated for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryTotals {
    pub income: f64,
    pub expense: f64,
}

impl CategoryTotals {
    fn add(&mut self, kind: TransactionKind, amount: f64) {
        match kind {
            TransactionKind::Income => self.income += amount,
            TransactionKind::Expense => self.expense += amount,
        }
    }
}

/// Window totals. Only [`Totals::from_sums`] builds one, so `balance` is
/// always `income - expense`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub income: f64,
    pub expense: f64,
    pub balance: f64,
}

impl Totals {
    pub fn from_sums(income: f64, expense: f64) -> Self {
        Self {
            income,
            expense,
            balance: income - expense,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResult {
    pub period: PeriodKind,
    pub window: PeriodWindow,
    pub totals: Totals,
    pub category_breakdown: BTreeMap<String, CategoryTotals>,
    pub transaction_count: usize,
}

// ============================================================================
// REDUCER
// ============================================================================

/// Single pass over `transactions`. Categories appear in the breakdown only
/// if at least one transaction carries them. No rounding is applied.
pub fn reduce(period: PeriodKind, window: PeriodWindow, transactions: &[Transaction]) -> StatsResult {
    let mut overall = CategoryTotals::default();
    let mut category_breakdown: BTreeMap<String, CategoryTotals> = BTreeMap::new();

    for tx in transactions {
        overall.add(tx.kind, tx.amount);
        category_breakdown
            .entry(tx.category.clone())
            .or_default()
            .add(tx.kind, tx.amount);
    }

    StatsResult {
        period,
        window,
        totals: Totals::from_sums(overall.income, overall.expense),
        category_breakdown,
        transaction_count: transactions.len(),
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Where the aggregator gets its transactions from.
///
/// Implementations must return only transactions owned by `user_id` whose
/// `occurred_at` lies inside `window` (both bounds inclusive). The
/// aggregator trusts this and does not filter again.
pub trait TransactionSource {
    type Error;

    fn fetch_transactions(
        &self,
        user_id: &str,
        window: &PeriodWindow,
    ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send;
}

/// Computes [`StatsResult`]s against a [`TransactionSource`].
///
/// Holds no per-request state: every [`compute`](Self::compute) call is
/// independent, and errors from the source come back unchanged.
#[derive(Debug, Clone)]
pub struct StatsAggregator<S> {
    source: S,
    resolver: WindowResolver,
}

impl<S: TransactionSource> StatsAggregator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            resolver: WindowResolver::default(),
        }
    }

    pub fn with_week_start(mut self, week_start: WeekStart) -> Self {
        self.resolver = WindowResolver::new(week_start);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn resolver(&self) -> &WindowResolver {
        &self.resolver
    }

    pub async fn compute<Tz: TimeZone>(
        &self,
        user_id: &str,
        period: PeriodKind,
        now: DateTime<Tz>,
    ) -> Result<StatsResult, S::Error> {
        let window = self.resolver.resolve(period, &now);
        let transactions = self.source.fetch_transactions(user_id, &window).await?;

        let result = reduce(period, window, &transactions);
        tracing::debug!(
            user_id,
            period = %period,
            count = result.transaction_count,
            "computed period stats"
        );
        Ok(result)
    }
}
