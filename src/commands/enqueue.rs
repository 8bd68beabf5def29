//! `enqueue`: add tasks to the catalog, from task lines or by asking the
//! terminal what it has.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use harvester_core::retrieval::DEFAULT_INTERVAL;
use harvester_core::{Catalog, Discovery, TaskKey, ThetaClient};
use tracing::{debug, info};

use super::open_database;
use crate::app::settings::{CommonSettings, DiscoverySettings};
use crate::cli::EnqueueArgs;

/// Most parse errors listed before the rest are summarized.
const MAX_REPORTED_ERRORS: usize = 5;

pub(crate) async fn run_enqueue_command(
    settings: &CommonSettings,
    discovery: &DiscoverySettings,
    args: &EnqueueArgs,
) -> Result<()> {
    let keys = if args.discover.is_empty() {
        read_task_lines(args)?
    } else {
        let window = DateWindow::new(args.from, args.to)?;
        let client = ThetaClient::new(
            &discovery.api_base_url,
            DEFAULT_INTERVAL,
            discovery.request_timeout,
        )?;
        let mut keys = Vec::new();
        for symbol in &args.discover {
            keys.extend(discover_tasks(&client, symbol, window).await?);
        }
        println!("Discovered {} task(s)", keys.len());
        keys
    };

    if keys.is_empty() {
        println!("No tasks found in input");
        return Ok(());
    }

    let db = open_database(settings).await?;
    let created = Catalog::new(db.clone()).create_many(&keys).await?;
    db.close().await;

    let skipped = keys.len() as u64 - created;
    info!(created, skipped, "enqueue finished");
    println!("Enqueued {created} task(s), {skipped} already present");
    Ok(())
}

fn read_task_lines(args: &EnqueueArgs) -> Result<Vec<TaskKey>> {
    let input = if !args.tasks.is_empty() {
        args.tasks.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        bail!(
            "No tasks given.\n  Suggestion: pass `symbol,expiration,date` arguments or pipe lines on stdin, e.g. echo 'SPXW,2024-06-21,2024-06-20' | harvester enqueue"
        );
    };

    parse_task_lines(&input)
}

/// Inclusive bounds on the quote dates discovery keeps.
#[derive(Debug, Clone, Copy, Default)]
struct DateWindow {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl DateWindow {
    fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to)
            && from > to
        {
            bail!("--from {from} is after --to {to}");
        }
        Ok(Self { from, to })
    }

    fn contains(self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Lists every (expiration, quote date) the terminal has for `symbol`.
///
/// Quote dates never fall after their expiration, so expirations before the
/// window start are not queried.
async fn discover_tasks(
    source: &dyn Discovery,
    symbol: &str,
    window: DateWindow,
) -> Result<Vec<TaskKey>> {
    let symbol = TaskKey::normalize_symbol(symbol)?;
    let expirations = source
        .list_expirations(&symbol)
        .await
        .with_context(|| format!("Failed to list expirations for {symbol}"))?;

    let mut keys = Vec::new();
    for expiration in &expirations {
        if window.from.is_some_and(|from| *expiration < from) {
            continue;
        }
        let dates = source
            .list_dates(&symbol, *expiration)
            .await
            .with_context(|| format!("Failed to list quote dates for {symbol} {expiration}"))?;
        debug!(%symbol, %expiration, dates = dates.len(), "quote dates listed");
        keys.extend(
            dates
                .into_iter()
                .filter(|date| window.contains(*date))
                .map(|target_date| TaskKey {
                    symbol: symbol.clone(),
                    expiration: *expiration,
                    target_date,
                }),
        );
    }

    info!(
        %symbol,
        expirations = expirations.len(),
        tasks = keys.len(),
        "discovery finished"
    );
    Ok(keys)
}

/// Parses one task per line. Blank lines and `#` comments are ignored.
///
/// Fails on the first batch of invalid lines without enqueuing anything.
fn parse_task_lines(input: &str) -> Result<Vec<TaskKey>> {
    let mut keys = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<TaskKey>() {
            Ok(key) => keys.push(key),
            Err(err) => errors.push(format!("line {}: {err}", index + 1)),
        }
    }

    if !errors.is_empty() {
        let shown = errors
            .iter()
            .take(MAX_REPORTED_ERRORS)
            .map(|e| format!("  {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        let more = errors.len().saturating_sub(MAX_REPORTED_ERRORS);
        let suffix = if more > 0 {
            format!("\n  ... and {more} more")
        } else {
            String::new()
        };
        bail!(
            "{} invalid task line(s); nothing was enqueued:\n{shown}{suffix}",
            errors.len()
        );
    }
    Ok(keys)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use harvester_core::RetrievalError;

    use super::*;

    fn date(raw: &str) -> NaiveDate {
        raw.parse().unwrap()
    }

    /// Serves a fixed expiration to quote-date table.
    #[derive(Default)]
    struct FixedListing {
        table: BTreeMap<NaiveDate, Vec<NaiveDate>>,
        dates_requested: Mutex<Vec<NaiveDate>>,
    }

    impl FixedListing {
        fn with(entries: &[(&str, &[&str])]) -> Self {
            let table = entries
                .iter()
                .map(|(exp, dates)| (date(exp), dates.iter().map(|d| date(d)).collect()))
                .collect();
            Self {
                table,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Discovery for FixedListing {
        async fn list_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, RetrievalError> {
            assert_eq!(symbol, "SPXW");
            Ok(self.table.keys().copied().collect())
        }

        async fn list_dates(
            &self,
            _symbol: &str,
            expiration: NaiveDate,
        ) -> Result<Vec<NaiveDate>, RetrievalError> {
            self.dates_requested.lock().unwrap().push(expiration);
            Ok(self.table[&expiration].clone())
        }
    }

    #[tokio::test]
    async fn test_discover_tasks_lists_every_pair() {
        let source = FixedListing::with(&[
            ("2024-06-21", &["2024-06-18", "2024-06-20"]),
            ("2024-06-28", &["2024-06-27"]),
        ]);
        let keys = discover_tasks(&source, " spxw ", DateWindow::default())
            .await
            .unwrap();

        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "SPXW 2024-06-21 2024-06-18",
                "SPXW 2024-06-21 2024-06-20",
                "SPXW 2024-06-28 2024-06-27",
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_tasks_applies_window_and_skips_expired_contracts() {
        let source = FixedListing::with(&[
            ("2024-05-31", &["2024-05-30"]),
            ("2024-06-21", &["2024-06-10", "2024-06-18", "2024-06-20"]),
            ("2024-06-28", &["2024-06-18", "2024-06-27"]),
        ]);
        let window =
            DateWindow::new(Some(date("2024-06-15")), Some(date("2024-06-19"))).unwrap();
        let keys = discover_tasks(&source, "SPXW", window).await.unwrap();

        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.target_date == date("2024-06-18")));
        assert_eq!(
            *source.dates_requested.lock().unwrap(),
            vec![date("2024-06-21"), date("2024-06-28")]
        );
    }

    #[tokio::test]
    async fn test_discover_tasks_rejects_bad_symbol_before_asking() {
        let source = FixedListing::default();
        let err = discover_tasks(&source, "SP-X", DateWindow::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("alphanumeric"));
        assert!(source.dates_requested.lock().unwrap().is_empty());
    }

    #[test]
    fn test_date_window_rejects_inverted_bounds() {
        let err = DateWindow::new(Some(date("2024-06-30")), Some(date("2024-06-01"))).unwrap_err();
        assert!(err.to_string().contains("is after"));
    }

    #[test]
    fn test_parse_task_lines_skips_blanks_and_comments() {
        let keys = parse_task_lines(
            "# symbol,expiration,date\nSPX,2024-06-21,2024-06-20\n\nspxw 20240621 20240620 # lower\n",
        )
        .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].symbol, "SPXW");
    }

    #[test]
    fn test_parse_task_lines_reports_line_numbers() {
        let err = parse_task_lines("SPX,2024-06-21,2024-06-20\nSPX,2024-13-01,2024-06-20\nSPX\n")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 invalid task line(s)"));
        assert!(msg.contains("line 2"));
        assert!(msg.contains("line 3"));
    }

    #[test]
    fn test_parse_task_lines_caps_reported_errors() {
        let input = "bad\n".repeat(8);
        let msg = parse_task_lines(&input).unwrap_err().to_string();
        assert!(msg.contains("... and 3 more"));
    }
}
