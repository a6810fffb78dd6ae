//! Scripted [`Analyst`] for tests

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::analyst::{
    Analyst, ChartAnalysis, ChartRequest, RetrospectiveRequest, WeeklyAnalysis, WeeklyRequest,
};
use crate::error::{InsightError, Result};
use crate::models::Direction;

/// Returns queued replies in FIFO order. An empty queue yields a
/// `Collaborator` error, like a service that answered with nothing usable.
#[derive(Default)]
pub struct MockAnalyst {
    charts: Mutex<VecDeque<Result<ChartAnalysis>>>,
    prices: Mutex<VecDeque<Result<f64>>>,
    weekly: Mutex<VecDeque<Result<WeeklyAnalysis>>>,
    retrospectives: Mutex<VecDeque<Result<String>>>,
    /// Call log: (operation, ticker)
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockAnalyst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_chart(&self, prediction: Direction, reasoning: &str, initial_price: Option<f64>) {
        lock(&self.charts).push_back(Ok(ChartAnalysis {
            prediction,
            reasoning: reasoning.to_string(),
            confidence: 0.7,
            initial_price,
            alignment_score: Some(60.0),
            alignment_reason: Some("mock alignment".to_string()),
        }));
    }

    pub fn enqueue_price(&self, price: f64) {
        lock(&self.prices).push_back(Ok(price));
    }

    pub fn enqueue_weekly(&self, analysis: &str, alignment_score: Option<f64>) {
        lock(&self.weekly).push_back(Ok(WeeklyAnalysis {
            analysis: analysis.to_string(),
            alignment_score,
            alignment_reason: None,
        }));
    }

    pub fn enqueue_retrospective(&self, text: &str) {
        lock(&self.retrospectives).push_back(Ok(text.to_string()));
    }

    pub fn fail_next_chart(&self, message: &str) {
        lock(&self.charts).push_back(Err(InsightError::Collaborator(message.to_string())));
    }

    pub fn fail_next_price(&self, message: &str) {
        lock(&self.prices).push_back(Err(InsightError::Collaborator(message.to_string())));
    }

    pub fn fail_next_weekly(&self, message: &str) {
        lock(&self.weekly).push_back(Err(InsightError::Collaborator(message.to_string())));
    }

    pub fn fail_next_retrospective(&self, message: &str) {
        lock(&self.retrospectives).push_back(Err(InsightError::Collaborator(message.to_string())));
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of calls to one operation, e.g. "latest_price"
    pub fn calls_to(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(op, _)| op == operation)
            .count()
    }

    fn record(&self, operation: &str, ticker: &str) {
        lock(&self.calls).push((operation.to_string(), ticker.to_string()));
    }
}

/// A panicking test must not poison the queues for the next assertion
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next<T>(queue: &Mutex<VecDeque<Result<T>>>, operation: &str) -> Result<T> {
    lock(queue).pop_front().unwrap_or_else(|| {
        Err(InsightError::Collaborator(format!(
            "mock: no {} response configured",
            operation
        )))
    })
}

impl Analyst for MockAnalyst {
    fn analyze_chart(&self, request: &ChartRequest<'_>) -> Result<ChartAnalysis> {
        self.record("analyze_chart", request.ticker);
        next(&self.charts, "analyze_chart")
    }

    fn latest_price(&self, ticker: &str) -> Result<f64> {
        self.record("latest_price", ticker);
        next(&self.prices, "latest_price")
    }

    fn weekly_analysis(&self, request: &WeeklyRequest<'_>) -> Result<WeeklyAnalysis> {
        self.record("weekly_analysis", request.ticker);
        next(&self.weekly, "weekly_analysis")
    }

    fn final_retrospective(&self, request: &RetrospectiveRequest<'_>) -> Result<String> {
        self.record("final_retrospective", request.ticker);
        next(&self.retrospectives, "final_retrospective")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_in_order_then_errors() {
        let mock = MockAnalyst::new();
        mock.enqueue_price(101.0);
        mock.enqueue_price(102.5);

        assert_eq!(mock.latest_price("MSFT").unwrap(), 101.0);
        assert_eq!(mock.latest_price("MSFT").unwrap(), 102.5);
        assert!(matches!(
            mock.latest_price("MSFT"),
            Err(InsightError::Collaborator(_))
        ));
        assert_eq!(mock.calls_to("latest_price"), 3);
    }

    #[test]
    fn test_scripted_failure() {
        let mock = MockAnalyst::new();
        mock.fail_next_retrospective("quota exceeded");
        let request = RetrospectiveRequest {
            ticker: "TSLA",
            user_reasoning: "earnings beat",
            weekly_history: &[],
        };

        let err = mock.final_retrospective(&request).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_survives_poisoned_queue() {
        let mock = MockAnalyst::new();
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = mock.prices.lock().unwrap();
                    panic!("assertion failed while holding the queue");
                })
                .join();
        });

        mock.enqueue_price(99.5);
        assert_eq!(mock.latest_price("IBM").unwrap(), 99.5);
    }
}
