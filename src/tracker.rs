//! Prediction tracker
//!
//! Request surface over the store and the AI collaborator. Every AI call is
//! metered against today's usage counter first, and every AI call finishes
//! before the single write that records its result, so a failed call never
//! leaves a half-updated prediction behind.

use chrono::{NaiveDate, Utc};

use crate::analyst::{Analyst, ChartRequest, RetrospectiveRequest, WeeklyRequest};
use crate::backup::{RestoreSummary, Snapshot};
use crate::db::Database;
use crate::error::{InsightError, Result};
use crate::models::{timestamp, NewPrediction, Prediction, PredictionPatch, UsageCounter};

pub struct Tracker<A: Analyst> {
    db: Database,
    analyst: A,
}

impl<A: Analyst> Tracker<A> {
    pub fn new(db: Database, analyst: A) -> Self {
        Self { db, analyst }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn analyst(&self) -> &A {
        &self.analyst
    }

    pub fn list_predictions(&self) -> Result<Vec<Prediction>> {
        self.db.get_predictions()
    }

    pub fn get_prediction(&self, id: &str) -> Result<Prediction> {
        self.db
            .get_prediction(id)?
            .ok_or_else(|| InsightError::NotFound(id.to_string()))
    }

    /// Count one AI call. Failures are logged and never block the call.
    fn meter(&self, operation: &str) {
        if let Err(e) = self.db.increment_usage(today()) {
            log::warn!("Failed to record usage for {}: {}", operation, e);
        }
    }

    /// Validate input, get the AI's read and a starting price, then store
    /// a new active prediction. Nothing is stored if any step fails.
    pub fn create_prediction(&self, input: NewPrediction) -> Result<Prediction> {
        let direction = input.validate()?;
        let ticker = input.normalized_ticker();

        self.meter("analyze_chart");
        let analysis = self.analyst.analyze_chart(&ChartRequest {
            image: &input.chart_image,
            ticker: &ticker,
            user_direction: Some(direction),
            user_reasoning: Some(input.reasoning.trim()),
        })?;

        let initial_price = match analysis.initial_price.filter(|p| p.is_finite() && *p > 0.0) {
            Some(price) => price,
            None => {
                log::debug!("No price read from the {} chart, looking it up", ticker);
                self.meter("latest_price");
                self.analyst.latest_price(&ticker)?
            }
        };

        let prediction = Prediction::create(&input, analysis, initial_price, timestamp::now())?;
        self.db.insert_prediction(&prediction)?;
        log::info!(
            "Created prediction {} for {} ({} vs AI {})",
            prediction.id,
            prediction.ticker,
            prediction.user_prediction.as_str(),
            prediction.gemini_prediction.as_str()
        );
        Ok(prediction)
    }

    /// Fetch the current price, get this week's analysis, and append it.
    /// The fourth update completes the prediction.
    pub fn run_weekly_update(&self, id: &str) -> Result<Prediction> {
        let current = self.get_prediction(id)?;
        let week = current.next_week().ok_or_else(|| {
            InsightError::InvalidState(format!(
                "prediction {} already has all weekly updates",
                id
            ))
        })?;

        self.meter("latest_price");
        let price = self.analyst.latest_price(&current.ticker)?;

        self.meter("weekly_analysis");
        let analysis = self.analyst.weekly_analysis(&WeeklyRequest {
            ticker: &current.ticker,
            initial_price: current.initial_price,
            current_price: price,
            user_direction: current.user_prediction,
            user_reasoning: &current.user_reasoning,
            ai_direction: current.gemini_prediction,
            ai_reasoning: &current.gemini_reasoning,
            week,
            target_price: current.target_price,
        })?;

        let updated = self.db.mutate_prediction(id, |prediction| {
            // Another update landed while the AI was working
            if prediction.next_week() != Some(week) {
                return Err(InsightError::InvalidState(format!(
                    "week {} of prediction {} was already recorded",
                    week, id
                )));
            }
            prediction.append_weekly_update(price, analysis, timestamp::now())?;
            Ok(())
        })?;

        log::info!(
            "Recorded week {} for {} at {:.2} ({})",
            week,
            updated.ticker,
            price,
            updated.status.as_str()
        );
        Ok(updated)
    }

    /// Return the final retrospective, generating it on first request.
    /// Only completed predictions have one.
    pub fn ensure_retrospective(&self, id: &str) -> Result<String> {
        let current = self.get_prediction(id)?;
        if let Some(existing) = current.final_retrospective {
            return Ok(existing);
        }
        if !current.is_completed() {
            return Err(InsightError::InvalidState(format!(
                "prediction {} is not completed yet",
                id
            )));
        }

        self.meter("final_retrospective");
        let text = self.analyst.final_retrospective(&RetrospectiveRequest {
            ticker: &current.ticker,
            user_reasoning: &current.user_reasoning,
            weekly_history: &current.weekly_data,
        })?;

        let mut written = false;
        let saved = self.db.mutate_prediction(id, |prediction| {
            // Generated concurrently; keep the first one
            if prediction.final_retrospective.is_some() {
                return Ok(());
            }
            written = prediction.set_retrospective(&text)?;
            Ok(())
        })?;

        if written {
            log::info!("Stored retrospective for {}", saved.ticker);
        }
        saved
            .final_retrospective
            .ok_or_else(|| InsightError::InvalidState(format!("prediction {} has no retrospective", id)))
    }

    pub fn update_prediction(&self, id: &str, patch: &PredictionPatch) -> Result<Prediction> {
        self.db.update_prediction_fields(id, patch)
    }

    /// Rows removed, 0 when the id was already gone
    pub fn delete_prediction(&self, id: &str) -> Result<usize> {
        self.db.delete_prediction(id)
    }

    pub fn usage_today(&self) -> Result<u32> {
        self.db.get_usage(today())
    }

    pub fn usage_on(&self, date: NaiveDate) -> Result<u32> {
        self.db.get_usage(date)
    }

    pub fn increment_usage_today(&self) -> Result<u32> {
        self.db.increment_usage(today())
    }

    pub fn usage_history(&self) -> Result<Vec<UsageCounter>> {
        self.db.get_usage_history()
    }

    pub fn export_snapshot(&self) -> Result<Snapshot> {
        self.db.export_snapshot()
    }

    pub fn import_snapshot(&self, snapshot: &Snapshot) -> Result<RestoreSummary> {
        self.db.import_snapshot(snapshot)
    }
}

/// Usage is bucketed by UTC calendar date
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
