//! Listing what the terminal has: expirations per symbol, quote dates per
//! expiration. `enqueue --discover` turns these into tasks.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::RetrievalError;
use crate::catalog::parse_date;

/// Lists the contracts and quote dates a provider can serve.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Returns every expiration listed for `symbol`, ascending.
    async fn list_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, RetrievalError>;

    /// Returns every quote date listed for (`symbol`, `expiration`), ascending.
    async fn list_dates(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RetrievalError>;
}

/// Extracts one date column from a listing CSV.
///
/// The column is found by name in the header row. Without a header, every
/// line is data and `fallback_index` picks the column. An empty body is an
/// empty listing. Results are sorted and deduplicated.
pub(crate) fn parse_date_listing(
    url: &str,
    body: &[u8],
    column: &str,
    fallback_index: usize,
) -> Result<Vec<NaiveDate>, RetrievalError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| RetrievalError::malformed(url, "body is not valid UTF-8"))?;
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .peekable();

    let mut index = fallback_index;
    if let Some((_, first)) = lines.peek()
        && first.starts_with(|c: char| c.is_ascii_alphabetic() || c == '"')
    {
        let header: Vec<&str> = first.split(',').map(unquote).collect();
        index = header
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .unwrap_or(fallback_index);
        lines.next();
    }

    let mut dates = BTreeSet::new();
    for (line_no, line) in lines {
        let Some(cell) = line.split(',').nth(index).map(unquote) else {
            return Err(RetrievalError::malformed(
                url,
                format!("line {line_no}: no column {index}"),
            ));
        };
        let date = parse_date(cell).map_err(|_| {
            RetrievalError::malformed(url, format!("line {line_no}: '{cell}' is not a date"))
        })?;
        dates.insert(date);
    }
    Ok(dates.into_iter().collect())
}

fn unquote(cell: &str) -> &str {
    cell.trim().trim_matches('"')
}
