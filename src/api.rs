// Stats boundary
// Plain request/response values for the stats operation. Transport layers
// (CLI, HTTP) translate to and from these; nothing here knows about status
// codes or headers.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::period::PeriodKind;
use crate::stats::{CategoryTotals, StatsAggregator, StatsResult, Totals, TransactionSource};

/// `period` is optional; missing or unrecognized means daily.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRequest {
    pub user_id: String,
    #[serde(default)]
    pub period: Option<String>,
}

impl StatsRequest {
    pub fn new(user_id: impl Into<String>, period: Option<&str>) -> Self {
        Self {
            user_id: user_id.into(),
            period: period.map(str::to_string),
        }
    }

    pub fn period_kind(&self) -> PeriodKind {
        PeriodKind::from_param(self.period.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub period: PeriodKind,
    pub summary: Totals,
    pub category_breakdown: BTreeMap<String, CategoryTotals>,
    pub transaction_count: usize,
}

impl From<StatsResult> for StatsResponse {
    fn from(result: StatsResult) -> Self {
        Self {
            period: result.period,
            summary: result.totals,
            category_breakdown: result.category_breakdown,
            transaction_count: result.transaction_count,
        }
    }
}

/// Serves one stats request. Source errors are returned as-is.
pub async fn handle_stats<S, Tz>(
    aggregator: &StatsAggregator<S>,
    request: &StatsRequest,
    now: DateTime<Tz>,
) -> Result<StatsResponse, S::Error>
where
    S: TransactionSource,
    Tz: TimeZone,
{
    let result = aggregator
        .compute(&request.user_id, request.period_kind(), now)
        .await?;
    Ok(result.into())
}
