//! AI analysis collaborator contract
//!
//! The tracker only talks to the AI service through [`Analyst`]. The Gemini
//! client implements it for real use; [`crate::mock::MockAnalyst`] scripts it
//! for tests.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Direction, WeeklyUpdate};

/// Input for the first look at a chart
#[derive(Debug, Clone)]
pub struct ChartRequest<'a> {
    /// `data:<mime>;base64,<payload>` URL
    pub image: &'a str,
    pub ticker: &'a str,
    pub user_direction: Option<Direction>,
    pub user_reasoning: Option<&'a str>,
}

/// The AI's independent read of a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartAnalysis {
    pub prediction: Direction,
    pub reasoning: String,
    pub confidence: f64,
    /// Price visible on the chart, if the model could read one
    pub initial_price: Option<f64>,
    pub alignment_score: Option<f64>,
    pub alignment_reason: Option<String>,
}

/// Input for one weekly check-in
#[derive(Debug, Clone)]
pub struct WeeklyRequest<'a> {
    pub ticker: &'a str,
    pub initial_price: f64,
    pub current_price: f64,
    pub user_direction: Direction,
    pub user_reasoning: &'a str,
    pub ai_direction: Direction,
    pub ai_reasoning: &'a str,
    pub week: u32,
    pub target_price: Option<f64>,
}

/// Commentary for one weekly check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyAnalysis {
    pub analysis: String,
    pub alignment_score: Option<f64>,
    pub alignment_reason: Option<String>,
}

/// Input for the closing retrospective
#[derive(Debug, Clone)]
pub struct RetrospectiveRequest<'a> {
    pub ticker: &'a str,
    pub user_reasoning: &'a str,
    pub weekly_history: &'a [WeeklyUpdate],
}

/// External generative-AI service boundary.
///
/// Implementations report every failure, including unparseable replies,
/// as [`crate::InsightError::Collaborator`].
pub trait Analyst {
    fn analyze_chart(&self, request: &ChartRequest<'_>) -> Result<ChartAnalysis>;

    fn latest_price(&self, ticker: &str) -> Result<f64>;

    fn weekly_analysis(&self, request: &WeeklyRequest<'_>) -> Result<WeeklyAnalysis>;

    fn final_retrospective(&self, request: &RetrospectiveRequest<'_>) -> Result<String>;
}

impl<A: Analyst + ?Sized> Analyst for Box<A> {
    fn analyze_chart(&self, request: &ChartRequest<'_>) -> Result<ChartAnalysis> {
        (**self).analyze_chart(request)
    }

    fn latest_price(&self, ticker: &str) -> Result<f64> {
        (**self).latest_price(ticker)
    }

    fn weekly_analysis(&self, request: &WeeklyRequest<'_>) -> Result<WeeklyAnalysis> {
        (**self).weekly_analysis(request)
    }

    fn final_retrospective(&self, request: &RetrospectiveRequest<'_>) -> Result<String> {
        (**self).final_retrospective(request)
    }
}
