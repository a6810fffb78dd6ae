//! Stock Insight - Rust Edition
//!
//! Tracks chart-based stock predictions against an AI second opinion:
//! - Record a user's up/down call with the chart and reasoning
//! - Get Gemini's independent read and an alignment score
//! - Check in weekly for 4 weeks, then write a one-time retrospective
//! - Store everything in SQLite, with whole-dataset backup and restore
//!
//! # Example
//!
//! ```no_run
//! use stock_insight::{Database, GeminiClient, NewPrediction, Tracker};
//!
//! let db = Database::open("data/stock_insight.db").unwrap();
//! db.init_schema().unwrap();
//!
//! let gemini = GeminiClient::with_api_key("AIza...").unwrap();
//! let tracker = Tracker::new(db, gemini);
//!
//! let prediction = tracker
//!     .create_prediction(NewPrediction {
//!         ticker: "AAPL".to_string(),
//!         chart_image: "data:image/png;base64,iVBORw0KGgo=".to_string(),
//!         direction: "up".to_string(),
//!         reasoning: "breakout above resistance".to_string(),
//!         target_price: Some(170.0),
//!     })
//!     .unwrap();
//!
//! // One week later
//! tracker.run_weekly_update(&prediction.id).unwrap();
//! ```

pub mod analyst;
pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod gemini;
pub mod lifecycle;
#[doc(hidden)]
pub mod mock;
pub mod models;
pub mod tracker;

// Re-exports for convenience
pub use analyst::{
    Analyst, ChartAnalysis, ChartRequest, RetrospectiveRequest, WeeklyAnalysis, WeeklyRequest,
};
pub use backup::{default_backup_path, RestoreSummary, Snapshot};
pub use config::{Env, RealEnv, Settings};
pub use db::Database;
pub use error::{InsightError, Result};
pub use gemini::GeminiClient;
#[doc(hidden)]
pub use mock::MockAnalyst;
pub use models::{
    Direction, NewPrediction, Prediction, PredictionPatch, PredictionStatus, UsageCounter,
    WeeklyUpdate, TRACKING_WEEKS,
};
pub use tracker::Tracker;
