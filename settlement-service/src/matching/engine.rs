use super::search::DiscrepancySearch;
use super::window::ReconciliationWindow;
use crate::models::FacTransaction;
use chrono::{NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Outcome of comparing target (VisaNet) figures against a candidate window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub is_match: bool,
    /// `target - candidate`; positive means the window is missing rows.
    pub count_delta: i64,
    /// `target - candidate` at two decimals.
    pub amount_delta: Decimal,
    pub discrepancies: Vec<String>,
}

/// What the engine wants to do next for a non-matching window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentPolicy {
    None,
    Widen,
    Remove,
    Shift,
}

impl MatchResult {
    pub fn policy(&self) -> AdjustmentPolicy {
        if self.is_match {
            AdjustmentPolicy::None
        } else if self.count_delta > 0 {
            AdjustmentPolicy::Widen
        } else if self.count_delta < 0 {
            AdjustmentPolicy::Remove
        } else {
            AdjustmentPolicy::Shift
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match {
            write!(f, "match")
        } else {
            write!(f, "{}", self.discrepancies.join("; "))
        }
    }
}

/// Exact comparison; amounts are rounded to cents first and never tolerated.
pub fn compare(
    target_count: i64,
    target_amount: Decimal,
    candidate_count: i64,
    candidate_amount: Decimal,
) -> MatchResult {
    let target_amount = target_amount.round_dp(2);
    let candidate_amount = candidate_amount.round_dp(2);
    let count_delta = target_count - candidate_count;
    let amount_delta = (target_amount - candidate_amount).round_dp(2);

    let mut discrepancies = Vec::new();
    if count_delta != 0 {
        discrepancies.push(format!(
            "count: VisaNet {} vs FAC {} (delta {})",
            target_count, candidate_count, count_delta
        ));
    }
    if !amount_delta.is_zero() {
        discrepancies.push(format!(
            "amount: VisaNet {:.2} vs FAC {:.2} (delta {:.2})",
            target_amount, candidate_amount, amount_delta
        ));
    }

    MatchResult {
        is_match: discrepancies.is_empty(),
        count_delta,
        amount_delta,
        discrepancies,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Rows from adjacent days were added to the window.
    Included,
    /// Rows inside the window were set aside.
    Excluded,
}

/// A window plus an explicit transaction adjustment that reconciles it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub kind: ResolutionKind,
    /// Window whose report the adjusted figures were taken from.
    pub window: ReconciliationWindow,
    pub transactions: Vec<FacTransaction>,
    pub transaction_count: i64,
    pub total: Decimal,
}

impl Resolution {
    pub fn note(&self) -> String {
        let ids: Vec<&str> = self
            .transactions
            .iter()
            .map(|t| t.identifier.as_str())
            .collect();
        match self.kind {
            ResolutionKind::Included => format!(
                "included {} transaction(s) from adjacent days: {}",
                ids.len(),
                ids.join(", ")
            ),
            ResolutionKind::Excluded => format!(
                "excluded {} transaction(s) near window boundary: {}",
                ids.len(),
                ids.join(", ")
            ),
        }
    }
}

/// Window policy and discrepancy resolution around a pluggable search.
#[derive(Clone)]
pub struct MatchEngine {
    anchor: Weekday,
    max_iterations: u32,
    search: Arc<dyn DiscrepancySearch>,
}

impl MatchEngine {
    pub fn new(anchor: Weekday, max_iterations: u32, search: Arc<dyn DiscrepancySearch>) -> Self {
        Self {
            anchor,
            max_iterations: max_iterations.max(1),
            search,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn initial_window(&self, report_date: NaiveDate) -> ReconciliationWindow {
        ReconciliationWindow::default_for(report_date, self.anchor)
    }

    /// Compare target figures against a window's rows.
    pub fn evaluate(
        &self,
        target_count: i64,
        target_amount: Decimal,
        rows: &[FacTransaction],
    ) -> MatchResult {
        let (count, total) = totals(rows);
        compare(target_count, target_amount, count, total)
    }

    /// Look for `-count_delta` rows in `rows` whose removal closes the gap.
    pub fn resolve_removals(
        &self,
        window: &ReconciliationWindow,
        rows: &[FacTransaction],
        result: &MatchResult,
    ) -> Option<Resolution> {
        if result.count_delta >= 0 {
            return None;
        }
        let count = usize::try_from(-result.count_delta).ok()?;
        let amount = -result.amount_delta;

        let excluded = self.search.find_removals(rows, window, count, amount)?;
        let (candidate_count, candidate_total) = totals(rows);
        let (removed_count, removed_total) = totals(&excluded);

        Some(Resolution {
            kind: ResolutionKind::Excluded,
            window: *window,
            transactions: excluded,
            transaction_count: candidate_count - removed_count,
            total: (candidate_total - removed_total).round_dp(2),
        })
    }

    /// Look for `count_delta` rows of `wider_rows` absent from `rows` whose
    /// inclusion closes the gap.
    pub fn resolve_inclusions(
        &self,
        window: &ReconciliationWindow,
        rows: &[FacTransaction],
        wider: &ReconciliationWindow,
        wider_rows: &[FacTransaction],
        result: &MatchResult,
    ) -> Option<Resolution> {
        if result.count_delta <= 0 {
            return None;
        }
        let count = usize::try_from(result.count_delta).ok()?;

        let present: HashSet<&FacTransaction> = rows.iter().collect();
        let pool: Vec<FacTransaction> = wider_rows
            .iter()
            .filter(|row| !present.contains(row))
            .cloned()
            .collect();

        let included = self
            .search
            .find_inclusions(&pool, window, count, result.amount_delta)?;
        let (candidate_count, candidate_total) = totals(rows);
        let (added_count, added_total) = totals(&included);

        Some(Resolution {
            kind: ResolutionKind::Included,
            window: *wider,
            transactions: included,
            transaction_count: candidate_count + added_count,
            total: (candidate_total + added_total).round_dp(2),
        })
    }

    /// Next window to try, or `None` once every preferred move was visited.
    ///
    /// Missing rows widen first, surplus rows trim first, and an amount-only
    /// mismatch slides the window a day either way before widening.
    pub fn next_window(
        &self,
        current: &ReconciliationWindow,
        result: &MatchResult,
        visited: &HashSet<ReconciliationWindow>,
    ) -> Option<ReconciliationWindow> {
        let preferences: Vec<Option<ReconciliationWindow>> = match result.policy() {
            AdjustmentPolicy::None => return None,
            AdjustmentPolicy::Widen => vec![
                Some(current.widened()),
                Some(current.extend_start()),
                Some(current.extend_end()),
                Some(current.shifted(-1)),
                Some(current.shifted(1)),
            ],
            AdjustmentPolicy::Remove => vec![
                current.trim_start(),
                current.trim_end(),
                Some(current.shifted(-1)),
                Some(current.shifted(1)),
            ],
            AdjustmentPolicy::Shift => vec![
                Some(current.shifted(-1)),
                Some(current.shifted(1)),
                Some(current.widened()),
            ],
        };

        preferences
            .into_iter()
            .flatten()
            .find(|window| !visited.contains(window))
    }
}

impl fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchEngine")
            .field("anchor", &self.anchor)
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

/// Row count and amount total, rounded to cents.
pub fn totals(rows: &[FacTransaction]) -> (i64, Decimal) {
    let total: Decimal = rows.iter().map(|row| row.amount).sum();
    (i64::try_from(rows.len()).unwrap_or(i64::MAX), total.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::BoundaryProximitySearch;

    fn dec(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
    }

    fn row(id: &str, day: u32, hour: u32, cents: i64) -> FacTransaction {
        FacTransaction {
            timestamp: date(day).and_hms_opt(hour, 0, 0).unwrap(),
            identifier: id.to_string(),
            amount: dec(cents),
            currency: "780".to_string(),
        }
    }

    fn engine() -> MatchEngine {
        MatchEngine::new(Weekday::Tue, 6, Arc::new(BoundaryProximitySearch::default()))
    }

    #[test]
    fn equal_figures_match() {
        let result = compare(100, dec(500000), 100, dec(500000));
        assert!(result.is_match);
        assert_eq!(result.count_delta, 0);
        assert!(result.discrepancies.is_empty());
        assert_eq!(result.policy(), AdjustmentPolicy::None);
    }

    #[test]
    fn missing_rows_request_widening() {
        let result = compare(102, dec(510000), 100, dec(500000));
        assert!(!result.is_match);
        assert_eq!(result.count_delta, 2);
        assert_eq!(result.amount_delta, dec(10000));
        assert_eq!(result.policy(), AdjustmentPolicy::Widen);
        assert_eq!(result.discrepancies.len(), 2);
    }

    #[test]
    fn surplus_rows_request_removal() {
        let result = compare(98, dec(490000), 100, dec(500000));
        assert!(!result.is_match);
        assert_eq!(result.count_delta, -2);
        assert_eq!(result.amount_delta, dec(-10000));
        assert_eq!(result.policy(), AdjustmentPolicy::Remove);
    }

    #[test]
    fn amounts_compare_at_cents_without_tolerance() {
        assert!(compare(1, Decimal::new(10001, 3), 1, dec(1000)).is_match);
        let off_by_a_cent = compare(1, dec(1001), 1, dec(1000));
        assert!(!off_by_a_cent.is_match);
        assert_eq!(off_by_a_cent.policy(), AdjustmentPolicy::Shift);
        assert_eq!(
            off_by_a_cent.to_string(),
            "amount: VisaNet 10.01 vs FAC 10.00 (delta 0.01)"
        );
    }

    #[test]
    fn removal_resolution_reports_adjusted_figures() {
        let window = ReconciliationWindow::new(date(5), date(6)).unwrap();
        let rows = vec![
            row("keep-1", 5, 12, 1000),
            row("keep-2", 5, 15, 2000),
            row("edge", 6, 5, 700),
        ];
        let result = engine().evaluate(2, dec(3000), &rows);
        assert_eq!(result.count_delta, -1);

        let resolution = engine()
            .resolve_removals(&window, &rows, &result)
            .unwrap();
        assert_eq!(resolution.kind, ResolutionKind::Excluded);
        assert_eq!(resolution.transaction_count, 2);
        assert_eq!(resolution.total, dec(3000));
        assert_eq!(
            resolution.note(),
            "excluded 1 transaction(s) near window boundary: edge"
        );
    }

    #[test]
    fn inclusion_resolution_draws_only_from_new_rows() {
        let window = ReconciliationWindow::new(date(5), date(6)).unwrap();
        let wider = window.widened();
        let inside = row("in", 5, 12, 1000);
        let rows = vec![inside.clone()];
        let wider_rows = vec![
            row("early", 4, 22, 500),
            inside,
            row("late", 6, 9, 250),
        ];
        let result = engine().evaluate(2, dec(1250), &rows);

        let resolution = engine()
            .resolve_inclusions(&window, &rows, &wider, &wider_rows, &result)
            .unwrap();
        assert_eq!(resolution.window, wider);
        assert_eq!(resolution.transaction_count, 2);
        assert_eq!(resolution.total, dec(1250));
        assert_eq!(resolution.transactions[0].identifier, "late");

        assert!(engine()
            .resolve_removals(&window, &rows, &result)
            .is_none());
    }

    #[test]
    fn next_window_follows_preferences_and_skips_visited() {
        let engine = engine();
        let current = ReconciliationWindow::new(date(5), date(6)).unwrap();
        let mut visited = HashSet::from([current]);

        let widen = compare(3, dec(300), 2, dec(200));
        let first = engine.next_window(&current, &widen, &visited).unwrap();
        assert_eq!(first, current.widened());

        visited.insert(first);
        let second = engine.next_window(&current, &widen, &visited).unwrap();
        assert_eq!(second, current.extend_start());

        // a single-day window cannot be trimmed, so removal slides it
        let remove = compare(1, dec(100), 2, dec(200));
        let slid = engine.next_window(&current, &remove, &visited).unwrap();
        assert_eq!(slid, current.shifted(-1));
    }

    #[test]
    fn next_window_is_exhausted_after_all_moves() {
        let engine = engine();
        let current = ReconciliationWindow::new(date(5), date(6)).unwrap();
        let shift = compare(1, dec(101), 1, dec(100));
        let visited = HashSet::from([
            current,
            current.shifted(-1),
            current.shifted(1),
            current.widened(),
        ]);

        assert!(engine.next_window(&current, &shift, &visited).is_none());
        assert!(engine
            .next_window(&current, &compare(1, dec(1), 1, dec(1)), &visited)
            .is_none());
    }

    #[test]
    fn initial_window_uses_anchor() {
        let window = engine().initial_window(date(6));
        assert_eq!(window.start_date, date(2));
        assert_eq!(window.end_date, date(5));
    }
}
