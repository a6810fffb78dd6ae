//! Prediction lifecycle
//!
//! `active --(4th weekly update)--> completed`. Completed is terminal. These
//! transitions are pure: they mutate an in-memory [`Prediction`] and the
//! caller commits the result through the store in a single write.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::analyst::{ChartAnalysis, WeeklyAnalysis};
use crate::error::{InsightError, Result};
use crate::models::{
    Direction, NewPrediction, Prediction, PredictionStatus, WeeklyUpdate, TRACKING_WEEKS,
};

/// Clamp an alignment score into 0..=100, dropping non-finite values
pub fn clamp_score(score: Option<f64>) -> Option<f64> {
    score.filter(|s| s.is_finite()).map(|s| s.clamp(0.0, 100.0))
}

fn is_positive_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

impl NewPrediction {
    /// Check user input before any AI call is spent on it.
    /// Returns the parsed direction.
    pub fn validate(&self) -> Result<Direction> {
        if self.ticker.trim().is_empty() {
            return Err(InsightError::Validation("ticker is required".to_string()));
        }
        if self.chart_image.trim().is_empty() {
            return Err(InsightError::Validation("chart image is required".to_string()));
        }
        if self.reasoning.trim().is_empty() {
            return Err(InsightError::Validation("reasoning is required".to_string()));
        }
        let direction = Direction::parse(&self.direction).ok_or_else(|| {
            InsightError::Validation(format!(
                "direction must be 'up' or 'down', got '{}'",
                self.direction
            ))
        })?;
        if let Some(target) = self.target_price {
            if !is_positive_price(target) {
                return Err(InsightError::Validation(format!(
                    "target price must be positive, got {}",
                    target
                )));
            }
        }
        Ok(direction)
    }

    pub fn normalized_ticker(&self) -> String {
        self.ticker.trim().to_uppercase()
    }
}

impl Prediction {
    /// Build a fresh active prediction from user input and the AI's first read
    pub fn create(
        input: &NewPrediction,
        analysis: ChartAnalysis,
        initial_price: f64,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let direction = input.validate()?;
        if !is_positive_price(initial_price) {
            return Err(InsightError::Validation(format!(
                "initial price must be positive, got {}",
                initial_price
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            ticker: input.normalized_ticker(),
            chart_image: input.chart_image.clone(),
            user_prediction: direction,
            user_reasoning: input.reasoning.trim().to_string(),
            target_price: input.target_price,
            gemini_prediction: analysis.prediction,
            gemini_reasoning: analysis.reasoning,
            gemini_alignment_score: clamp_score(analysis.alignment_score),
            gemini_alignment_reason: analysis.alignment_reason,
            initial_price,
            created_at,
            status: PredictionStatus::Active,
            weekly_data: Vec::new(),
            final_retrospective: None,
        })
    }

    pub fn is_completed(&self) -> bool {
        self.status == PredictionStatus::Completed
    }

    /// Week number the next check-in would get, or None once tracking is over
    pub fn next_week(&self) -> Option<u32> {
        if self.is_completed() || self.weekly_data.len() >= TRACKING_WEEKS {
            None
        } else {
            Some(self.weekly_data.len() as u32 + 1)
        }
    }

    pub fn latest_update(&self) -> Option<&WeeklyUpdate> {
        self.weekly_data.last()
    }

    /// Append the next weekly checkpoint. The fourth one completes the
    /// prediction in the same mutation.
    pub fn append_weekly_update(
        &mut self,
        price: f64,
        analysis: WeeklyAnalysis,
        observed_at: DateTime<Utc>,
    ) -> Result<&WeeklyUpdate> {
        let week = self.next_week().ok_or_else(|| {
            InsightError::InvalidState(format!(
                "prediction {} is {} with {} weekly updates",
                self.id,
                self.status.as_str(),
                self.weekly_data.len()
            ))
        })?;
        if !is_positive_price(price) {
            return Err(InsightError::Validation(format!(
                "weekly price must be positive, got {}",
                price
            )));
        }

        self.weekly_data.push(WeeklyUpdate {
            week,
            price,
            date: observed_at,
            analysis: analysis.analysis,
            alignment_score: clamp_score(analysis.alignment_score),
            alignment_reason: analysis.alignment_reason,
        });
        if self.weekly_data.len() == TRACKING_WEEKS {
            self.status = PredictionStatus::Completed;
        }

        Ok(&self.weekly_data[self.weekly_data.len() - 1])
    }

    /// Set the final retrospective once. Returns false when the identical
    /// text was already stored.
    pub fn set_retrospective(&mut self, text: &str) -> Result<bool> {
        if !self.is_completed() {
            return Err(InsightError::InvalidState(format!(
                "prediction {} is still active ({}/{} weeks)",
                self.id,
                self.weekly_data.len(),
                TRACKING_WEEKS
            )));
        }
        if text.trim().is_empty() {
            return Err(InsightError::Validation("retrospective text is empty".to_string()));
        }

        match &self.final_retrospective {
            Some(existing) if existing == text => Ok(false),
            Some(_) => Err(InsightError::InvalidState(format!(
                "prediction {} already has a retrospective",
                self.id
            ))),
            None => {
                self.final_retrospective = Some(text.to_string());
                Ok(true)
            }
        }
    }

    /// Check the structural invariants of a record that did not come through
    /// the transitions above (restored snapshots, raw patches).
    pub fn check_invariants(&self) -> Result<()> {
        if !is_positive_price(self.initial_price) {
            return Err(InsightError::Validation(format!(
                "prediction {} has initial price {}",
                self.id, self.initial_price
            )));
        }
        if let Some(target) = self.target_price {
            if !is_positive_price(target) {
                return Err(InsightError::Validation(format!(
                    "prediction {} has target price {}",
                    self.id, target
                )));
            }
        }
        check_score(self.gemini_alignment_score)?;
        check_weekly_data(&self.weekly_data)?;
        let full = self.weekly_data.len() == TRACKING_WEEKS;
        if full != self.is_completed() {
            return Err(InsightError::InvalidState(format!(
                "prediction {} is {} with {} weekly updates",
                self.id,
                self.status.as_str(),
                self.weekly_data.len()
            )));
        }
        if self.final_retrospective.is_some() && !self.is_completed() {
            return Err(InsightError::InvalidState(format!(
                "prediction {} has a retrospective but is not completed",
                self.id
            )));
        }
        Ok(())
    }
}

fn check_score(score: Option<f64>) -> Result<()> {
    match score {
        Some(s) if !(s.is_finite() && (0.0..=100.0).contains(&s)) => Err(
            InsightError::Validation(format!("alignment score {} is outside 0..=100", s)),
        ),
        _ => Ok(()),
    }
}

/// Weekly updates must number 1..=n in order, n <= 4, each with a positive
/// price and an in-range score
pub fn check_weekly_data(weekly: &[WeeklyUpdate]) -> Result<()> {
    if weekly.len() > TRACKING_WEEKS {
        return Err(InsightError::InvalidState(format!(
            "{} weekly updates exceeds the {}-week horizon",
            weekly.len(),
            TRACKING_WEEKS
        )));
    }
    for (i, update) in weekly.iter().enumerate() {
        if update.week != i as u32 + 1 {
            return Err(InsightError::InvalidState(format!(
                "weekly update at position {} is numbered week {}",
                i + 1,
                update.week
            )));
        }
        if !is_positive_price(update.price) {
            return Err(InsightError::Validation(format!(
                "week {} has price {}",
                update.week, update.price
            )));
        }
        check_score(update.alignment_score)?;
    }
    Ok(())
}
