use crate::error::{Result, RowragError};
use chrono::NaiveDate;
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Metadata filters applied inside both retrieval paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub practice_area: Option<String>,
    #[serde(default)]
    pub exclude_overruled: bool,
    /// Inclusive lower bound, `YYYY-MM-DD`
    #[serde(default)]
    pub date_from: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`
    #[serde(default)]
    pub date_to: Option<String>,
}

/// WHERE fragment over `legal_documents d`, bound with [`SearchFilters::named_params`].
///
/// Every filter is always present and disabled by a NULL/0 parameter, so the
/// statement text never depends on user input.
macro_rules! legal_filter_sql {
    () => {
        " AND (:jurisdiction IS NULL OR d.jurisdiction = :jurisdiction) \
          AND (:doc_type IS NULL OR d.doc_type = :doc_type) \
          AND (:practice_area IS NULL OR d.practice_area = :practice_area) \
          AND (:exclude_overruled = 0 OR d.status != 'overruled') \
          AND (:date_from IS NULL OR d.date_decided >= :date_from) \
          AND (:date_to IS NULL OR d.date_decided <= :date_to) "
    };
}
pub(crate) use legal_filter_sql;

fn validate_date(name: &str, value: &Option<String>) -> Result<()> {
    if let Some(v) = value {
        NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| {
            RowragError::InvalidInput(format!("{} must be YYYY-MM-DD, got '{}'", name, v))
        })?;
    }
    Ok(())
}

impl SearchFilters {
    /// Reject malformed dates and an inverted range
    pub fn validate(&self) -> Result<()> {
        validate_date("date_from", &self.date_from)?;
        validate_date("date_to", &self.date_to)?;
        if let (Some(from), Some(to)) = (&self.date_from, &self.date_to) {
            if from > to {
                return Err(RowragError::InvalidInput(format!(
                    "date_from {} is after date_to {}",
                    from, to
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Named parameters for the filter fragment
    pub(crate) fn named_params(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":jurisdiction", &self.jurisdiction as &dyn ToSql),
            (":doc_type", &self.doc_type as &dyn ToSql),
            (":practice_area", &self.practice_area as &dyn ToSql),
            (":exclude_overruled", &self.exclude_overruled as &dyn ToSql),
            (":date_from", &self.date_from as &dyn ToSql),
            (":date_to", &self.date_to as &dyn ToSql),
        ]
    }
}
