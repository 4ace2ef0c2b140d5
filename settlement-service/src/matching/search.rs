//! Subset search used to close a count/amount gap with individual transactions.

use crate::matching::window::ReconciliationWindow;
use crate::models::FacTransaction;
use rust_decimal::Decimal;

/// Strategy for picking the transactions that explain a discrepancy.
///
/// Both methods return `None` when no subset of exactly `count` rows sums to
/// `amount`, or when the strategy gives up within its own bounds.
pub trait DiscrepancySearch: Send + Sync {
    /// Rows from outside `window` whose inclusion closes the gap.
    fn find_inclusions(
        &self,
        pool: &[FacTransaction],
        window: &ReconciliationWindow,
        count: usize,
        amount: Decimal,
    ) -> Option<Vec<FacTransaction>>;

    /// Rows inside `window` whose removal closes the gap.
    fn find_removals(
        &self,
        rows: &[FacTransaction],
        window: &ReconciliationWindow,
        count: usize,
        amount: Decimal,
    ) -> Option<Vec<FacTransaction>>;
}

/// Bounded depth-first enumeration over candidates ordered by how close
/// they sit to a window boundary.
///
/// Ties are broken by timestamp and then identifier, so the same input
/// always yields the same subset: the first qualifying one in that order.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryProximitySearch {
    /// Only the `max_pool` nearest candidates are considered.
    pub max_pool: usize,
    /// Upper bound on visited search nodes.
    pub max_nodes: usize,
}

impl Default for BoundaryProximitySearch {
    fn default() -> Self {
        Self {
            max_pool: 40,
            max_nodes: 200_000,
        }
    }
}

impl BoundaryProximitySearch {
    pub fn new(max_pool: usize, max_nodes: usize) -> Self {
        Self {
            max_pool,
            max_nodes,
        }
    }

    fn ordered<'a>(
        &self,
        rows: &'a [FacTransaction],
        window: &ReconciliationWindow,
    ) -> Vec<&'a FacTransaction> {
        let mut ordered: Vec<&FacTransaction> = rows.iter().collect();
        ordered.sort_by(|a, b| {
            window
                .boundary_distance(a.timestamp)
                .cmp(&window.boundary_distance(b.timestamp))
                .then_with(|| a.timestamp.cmp(&b.timestamp))
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        ordered.truncate(self.max_pool);
        ordered
    }

    fn select(
        &self,
        rows: &[FacTransaction],
        window: &ReconciliationWindow,
        count: usize,
        amount: Decimal,
    ) -> Option<Vec<FacTransaction>> {
        let amount = amount.round_dp(2);
        if count == 0 {
            return (amount.is_zero()).then(Vec::new);
        }

        let candidates = self.ordered(rows, window);
        if candidates.len() < count {
            return None;
        }

        let mut state = SearchState {
            candidates: &candidates,
            target: amount,
            prune_overshoot: candidates.iter().all(|row| !row.amount.is_sign_negative()),
            nodes: 0,
            max_nodes: self.max_nodes,
            picked: Vec::with_capacity(count),
        };

        if state.descend(0, count, Decimal::ZERO) {
            Some(
                state
                    .picked
                    .iter()
                    .map(|&idx| candidates[idx].clone())
                    .collect(),
            )
        } else {
            tracing::debug!(
                count,
                %amount,
                nodes = state.nodes,
                "No qualifying subset found"
            );
            None
        }
    }
}

impl DiscrepancySearch for BoundaryProximitySearch {
    fn find_inclusions(
        &self,
        pool: &[FacTransaction],
        window: &ReconciliationWindow,
        count: usize,
        amount: Decimal,
    ) -> Option<Vec<FacTransaction>> {
        self.select(pool, window, count, amount)
    }

    fn find_removals(
        &self,
        rows: &[FacTransaction],
        window: &ReconciliationWindow,
        count: usize,
        amount: Decimal,
    ) -> Option<Vec<FacTransaction>> {
        self.select(rows, window, count, amount)
    }
}

struct SearchState<'a> {
    candidates: &'a [&'a FacTransaction],
    target: Decimal,
    prune_overshoot: bool,
    nodes: usize,
    max_nodes: usize,
    picked: Vec<usize>,
}

impl SearchState<'_> {
    fn descend(&mut self, from: usize, remaining: usize, sum: Decimal) -> bool {
        if remaining == 0 {
            return sum == self.target;
        }

        for idx in from..self.candidates.len() {
            if self.candidates.len() - idx < remaining {
                return false;
            }
            self.nodes += 1;
            if self.nodes > self.max_nodes {
                return false;
            }

            let next = sum + self.candidates[idx].amount;
            if self.prune_overshoot && next > self.target {
                continue;
            }

            self.picked.push(idx);
            if self.descend(idx + 1, remaining - 1, next) {
                return true;
            }
            self.picked.pop();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> ReconciliationWindow {
        ReconciliationWindow::new(
            NaiveDate::from_ymd_opt(2025, 5, 5).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 6).unwrap(),
        )
        .unwrap()
    }

    fn row(id: &str, day: u32, hour: u32, cents: i64) -> FacTransaction {
        FacTransaction {
            timestamp: NaiveDate::from_ymd_opt(2025, 5, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            identifier: id.to_string(),
            amount: Decimal::new(cents, 2),
            currency: "780".to_string(),
        }
    }

    #[test]
    fn removal_prefers_rows_nearest_a_boundary() {
        let rows = vec![
            row("mid-a", 5, 14, 5000),
            row("edge-start", 5, 6, 5000),
            row("mid-b", 5, 18, 5000),
            row("edge-end", 6, 5, 5000),
        ];

        let picked = BoundaryProximitySearch::default()
            .find_removals(&rows, &window(), 2, Decimal::new(10000, 2))
            .unwrap();

        let ids: Vec<&str> = picked.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["edge-start", "edge-end"]);
    }

    #[test]
    fn subset_must_hit_count_and_amount_together() {
        let rows = vec![
            row("a", 5, 7, 1000),
            row("b", 5, 8, 2500),
            row("c", 5, 9, 1500),
        ];
        let search = BoundaryProximitySearch::default();

        let picked = search
            .find_removals(&rows, &window(), 2, Decimal::new(4000, 2))
            .unwrap();
        let ids: Vec<&str> = picked.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        assert!(search
            .find_removals(&rows, &window(), 2, Decimal::new(9999, 2))
            .is_none());
        assert!(search
            .find_removals(&rows, &window(), 4, Decimal::new(5000, 2))
            .is_none());
    }

    #[test]
    fn inclusion_pool_outside_window() {
        let pool = vec![row("before", 5, 5, 2000), row("after", 6, 8, 3000)];

        let picked = BoundaryProximitySearch::default()
            .find_inclusions(&pool, &window(), 1, Decimal::new(3000, 2))
            .unwrap();
        assert_eq!(picked[0].identifier, "after");
    }

    #[test]
    fn zero_count_only_matches_zero_amount() {
        let search = BoundaryProximitySearch::default();
        assert_eq!(
            search.find_removals(&[], &window(), 0, Decimal::ZERO),
            Some(vec![])
        );
        assert!(search
            .find_removals(&[], &window(), 0, Decimal::ONE)
            .is_none());
    }

    #[test]
    fn node_budget_stops_the_search() {
        let rows: Vec<FacTransaction> = (0..30)
            .map(|i| row(&format!("r{i:02}"), 5, 7 + (i % 12) as u32, 100))
            .collect();

        // 30 choose 15 rows of 1.00 can never reach 99.00
        let search = BoundaryProximitySearch::new(40, 1_000);
        assert!(search
            .find_removals(&rows, &window(), 15, Decimal::new(9900, 2))
            .is_none());
    }

    #[test]
    fn negative_amounts_disable_overshoot_pruning() {
        let rows = vec![row("refund", 5, 7, -500), row("sale", 5, 8, 1500)];

        let picked = BoundaryProximitySearch::default()
            .find_removals(&rows, &window(), 2, Decimal::new(1000, 2))
            .unwrap();
        assert_eq!(picked.len(), 2);
    }
}
