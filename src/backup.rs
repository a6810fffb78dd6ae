//! Whole-dataset backup and all-or-nothing restore

use chrono::NaiveDate;
use rusqlite::{Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::{insert_prediction_row, insert_usage_row, Database};
use crate::error::{InsightError, Result};
use crate::models::{Prediction, UsageCounter};

/// Self-contained copy of every prediction and usage row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub usage: Vec<UsageCounter>,
}

/// Row counts written by a successful restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub predictions: usize,
    pub usage_days: usize,
}

impl Snapshot {
    /// Read a snapshot previously written by [`Snapshot::write_to_file`]
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| {
            InsightError::Restore(format!(
                "{} is not a valid backup: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Write the snapshot as pretty-printed JSON
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// `stock-insight-backup-YYYY-MM-DD.json` inside `dir`
pub fn default_backup_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("stock-insight-backup-{}.json", date.format("%Y-%m-%d")))
}

impl Database {
    /// Export every prediction (weekly data expanded) and usage row
    pub fn export_snapshot(&self) -> Result<Snapshot> {
        let snapshot = Snapshot {
            predictions: self.get_predictions()?,
            usage: self.get_usage_history()?,
        };
        log::info!(
            "Exported {} predictions and {} usage days",
            snapshot.predictions.len(),
            snapshot.usage.len()
        );
        Ok(snapshot)
    }

    /// Replace all predictions and usage rows with the snapshot contents.
    ///
    /// Runs as one transaction: if any row is rejected the previous data is
    /// left exactly as it was and `Restore` is returned.
    pub fn import_snapshot(&self, snapshot: &Snapshot) -> Result<RestoreSummary> {
        let result = self.replace_all(snapshot);
        match &result {
            Ok(summary) => log::info!(
                "Restored {} predictions and {} usage days",
                summary.predictions,
                summary.usage_days
            ),
            Err(e) => log::error!("Restore failed, previous data kept: {}", e),
        }
        result
    }

    fn replace_all(&self, snapshot: &Snapshot) -> Result<RestoreSummary> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)
            .map_err(|e| InsightError::Restore(e.to_string()))?;

        tx.execute("DELETE FROM predictions", [])
            .and_then(|_| tx.execute("DELETE FROM api_usage", []))
            .map_err(|e| InsightError::Restore(format!("could not clear tables: {}", e)))?;

        for (i, prediction) in snapshot.predictions.iter().enumerate() {
            prediction
                .check_invariants()
                .and_then(|_| insert_prediction_row(&tx, prediction))
                .map_err(|e| {
                    InsightError::Restore(format!(
                        "prediction #{} ({}): {}",
                        i + 1,
                        prediction.id,
                        e
                    ))
                })?;
        }

        for usage in &snapshot.usage {
            insert_usage_row(&tx, usage)
                .map_err(|e| InsightError::Restore(format!("usage {}: {}", usage.date, e)))?;
        }

        tx.commit()
            .map_err(|e| InsightError::Restore(format!("commit failed: {}", e)))?;

        Ok(RestoreSummary {
            predictions: snapshot.predictions.len(),
            usage_days: snapshot.usage.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, PredictionStatus, WeeklyUpdate};
    use chrono::{Duration, TimeZone, Utc};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    fn prediction(id: &str, weeks: u32) -> Prediction {
        let created = Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let weekly_data: Vec<WeeklyUpdate> = (1..=weeks)
            .map(|n| WeeklyUpdate {
                week: n,
                price: 100.0 + n as f64,
                date: created + Duration::weeks(n as i64),
                analysis: format!("week {}", n),
                alignment_score: Some(50.0 + n as f64),
                alignment_reason: None,
            })
            .collect();

        Prediction {
            id: id.to_string(),
            ticker: "NVDA".to_string(),
            chart_image: "data:image/png;base64,AAAA".to_string(),
            user_prediction: Direction::Up,
            user_reasoning: "cup and handle".to_string(),
            target_price: None,
            gemini_prediction: Direction::Up,
            gemini_reasoning: "trend intact".to_string(),
            gemini_alignment_score: Some(80.0),
            gemini_alignment_reason: None,
            initial_price: 100.0,
            created_at: created + Duration::hours(weeks as i64),
            status: if weeks == 4 {
                PredictionStatus::Completed
            } else {
                PredictionStatus::Active
            },
            weekly_data,
            final_retrospective: if weeks == 4 {
                Some("Mostly right".to_string())
            } else {
                None
            },
        }
    }

    fn seeded_db() -> Database {
        let db = test_db();
        db.insert_prediction(&prediction("a", 0)).unwrap();
        db.insert_prediction(&prediction("b", 2)).unwrap();
        db.insert_prediction(&prediction("c", 4)).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        db.increment_usage(day).unwrap();
        db.increment_usage(day).unwrap();
        db
    }

    #[test]
    fn test_export_import_round_trip() {
        let source = seeded_db();
        let snapshot = source.export_snapshot().unwrap();
        assert_eq!(snapshot.predictions.len(), 3);
        assert_eq!(snapshot.predictions[0].weekly_data.len(), 4);

        let target = test_db();
        let summary = target.import_snapshot(&snapshot).unwrap();
        assert_eq!(summary, RestoreSummary { predictions: 3, usage_days: 1 });
        assert_eq!(target.export_snapshot().unwrap(), snapshot);
    }

    #[test]
    fn test_import_replaces_existing_data() {
        let db = seeded_db();
        let replacement = Snapshot {
            predictions: vec![prediction("z", 1)],
            usage: vec![],
        };

        db.import_snapshot(&replacement).unwrap();

        let ids: Vec<String> = db.get_predictions().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["z"]);
        assert!(db.get_usage_history().unwrap().is_empty());
    }

    #[test]
    fn test_failed_import_keeps_previous_data() {
        let db = seeded_db();
        let before = db.export_snapshot().unwrap();

        // Third row repeats an id and is rejected by the primary key
        let broken = Snapshot {
            predictions: vec![prediction("x", 0), prediction("y", 1), prediction("x", 2)],
            usage: vec![],
        };
        let result = db.import_snapshot(&broken);

        assert!(matches!(result, Err(InsightError::Restore(msg)) if msg.contains("#3")));
        assert_eq!(db.export_snapshot().unwrap(), before);
    }

    #[test]
    fn test_import_rejects_records_breaking_lifecycle_invariants() {
        let db = seeded_db();
        let before = db.export_snapshot().unwrap();

        let mut bad = prediction("bad", 4);
        bad.status = PredictionStatus::Active;
        let result = db.import_snapshot(&Snapshot {
            predictions: vec![bad],
            usage: vec![],
        });

        assert!(matches!(result, Err(InsightError::Restore(_))));
        assert_eq!(db.export_snapshot().unwrap(), before);
    }

    #[test]
    fn test_import_rejects_out_of_range_values() {
        let db = seeded_db();
        let before = db.export_snapshot().unwrap();

        let mut negative_start = prediction("neg", 0);
        negative_start.initial_price = -3.0;
        let mut wild_score = prediction("score", 0);
        wild_score.gemini_alignment_score = Some(900.0);
        let mut free_week = prediction("free", 1);
        free_week.weekly_data[0].price = 0.0;

        for bad in [negative_start, wild_score, free_week] {
            let result = db.import_snapshot(&Snapshot {
                predictions: vec![prediction("ok", 2), bad],
                usage: vec![],
            });
            assert!(matches!(result, Err(InsightError::Restore(msg)) if msg.contains("#2")));
            assert_eq!(db.export_snapshot().unwrap(), before);
        }
    }

    #[test]
    fn test_import_rejects_duplicate_usage_dates() {
        let db = seeded_db();
        let before = db.export_snapshot().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 5, 5).unwrap();

        let result = db.import_snapshot(&Snapshot {
            predictions: vec![],
            usage: vec![
                UsageCounter { date: day, count: 1 },
                UsageCounter { date: day, count: 4 },
            ],
        });

        assert!(matches!(result, Err(InsightError::Restore(_))));
        assert_eq!(db.export_snapshot().unwrap(), before);
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let path = default_backup_path(dir.path(), day);
        assert!(path.ends_with("stock-insight-backup-2025-06-30.json"));

        let snapshot = seeded_db().export_snapshot().unwrap();
        snapshot.write_to_file(&path).unwrap();
        assert_eq!(Snapshot::read_from_file(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, "{\"hello\": 1}").unwrap();

        assert!(matches!(
            Snapshot::read_from_file(&path),
            Err(InsightError::Restore(_))
        ));
    }

    #[test]
    fn test_reads_backup_from_older_app() {
        let json = r#"{
          "predictions": [{
            "id": "0b6f", "ticker": "AMD", "chart_image": "data:image/png;base64,AA==",
            "user_prediction": "down", "user_reasoning": "double top",
            "target_price": 120, "gemini_prediction": "down", "gemini_reasoning": "weak volume",
            "gemini_alignment_score": 85, "gemini_alignment_reason": "same pattern",
            "initial_price": 131.2, "created_at": "2025-02-10 03:04:05",
            "status": "active",
            "weekly_data": [{"week": 1, "price": 128.4, "date": "2025-02-17T03:00:00.000Z",
                             "analysis": "on track", "alignment_score": 90}],
            "final_retrospective": null
          }],
          "usage": [{"date": "2025-02-10", "count": 3}]
        }"#;

        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        let db = test_db();
        db.import_snapshot(&snapshot).unwrap();

        let restored = db.get_prediction("0b6f").unwrap().unwrap();
        assert_eq!(restored.weekly_data[0].alignment_score, Some(90.0));
        let day = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        assert_eq!(db.get_usage(day).unwrap(), 3);
    }

    #[test]
    fn test_restores_null_text_columns_as_empty() {
        let json = r#"{
          "predictions": [{
            "id": "legacy", "ticker": "INTC", "chart_image": null,
            "user_prediction": "up", "user_reasoning": null,
            "gemini_prediction": "up", "gemini_reasoning": null,
            "initial_price": 31.5, "created_at": "2024-11-04 09:00:00",
            "status": "active", "weekly_data": []
          }]
        }"#;

        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        let db = test_db();
        db.import_snapshot(&snapshot).unwrap();

        let restored = db.get_prediction("legacy").unwrap().unwrap();
        assert_eq!(restored.chart_image, "");
        assert_eq!(restored.user_reasoning, "");
        assert_eq!(restored.gemini_reasoning, "");
    }
}
