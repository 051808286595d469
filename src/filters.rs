//! Search filters shared by the keyword and semantic paths.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use crate::error::{RecallError, Result};

/// SQL predicate over `documents d`; bind values with [`bind_filters`].
pub(crate) const FILTER_CLAUSE: &str = "(? IS NULL OR d.timestamp >= ?) \
     AND (? IS NULL OR d.timestamp <= ?) \
     AND (? IS NULL OR d.classification = ?)";

/// Date-range and classification constraints for a query.
///
/// Dates are inclusive and interpreted as UTC calendar days.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
}

impl SearchFilters {
    /// Parse raw `YYYY-MM-DD` strings as given on the command line.
    pub fn parse(
        from: Option<&str>,
        to: Option<&str>,
        classification: Option<&str>,
    ) -> Result<Self> {
        let filters = Self {
            from: from.map(|s| parse_date("from", s)).transpose()?,
            to: to.map(|s| parse_date("to", s)).transpose()?,
            classification: classification
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };
        filters.check()?;
        Ok(filters)
    }

    /// Reject contradictory ranges.
    pub fn check(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(RecallError::QueryFilter(format!(
                    "date range is empty: from {from} is after to {to}"
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none() && self.classification.is_none()
    }

    /// Inclusive lower bound as a unix timestamp.
    pub fn from_ts(&self) -> Option<i64> {
        self.from.map(|d| day_start(d).timestamp())
    }

    /// Inclusive upper bound as a unix timestamp (end of the `to` day).
    pub fn to_ts(&self) -> Option<i64> {
        self.to
            .and_then(|d| d.succ_opt())
            .map(|next| day_start(next).timestamp() - 1)
    }
}

/// Bind the six parameters of [`FILTER_CLAUSE`] in order.
pub(crate) fn bind_filters<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    filters: &SearchFilters,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let from = filters.from_ts();
    let to = filters.to_ts();
    let classification = filters.classification.clone();
    query
        .bind(from)
        .bind(from)
        .bind(to)
        .bind(to)
        .bind(classification.clone())
        .bind(classification)
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        RecallError::QueryFilter(format!(
            "invalid {field} date '{raw}', expected YYYY-MM-DD"
        ))
    })
}

pub(crate) fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
