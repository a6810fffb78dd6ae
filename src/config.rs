//! Runtime settings: data location, model, and Gemini API key

use std::path::PathBuf;

use crate::db::Database;
use crate::error::{InsightError, Result};
use crate::gemini;

pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_DATA_DIR: &str = "STOCK_INSIGHT_DATA_DIR";
pub const ENV_MODEL: &str = "STOCK_INSIGHT_MODEL";

/// Key of the saved API key in the settings table
pub const API_KEY_SETTING: &str = "gemini_api_key";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DB_FILE_NAME: &str = "stock_insight.db";

/// Environment variable access, swappable in tests
pub trait Env: Send + Sync {
    fn var(&self, key: &str) -> std::result::Result<String, std::env::VarError>;
}

/// Reads the process environment
pub struct RealEnv;

impl Env for RealEnv {
    fn var(&self, key: &str) -> std::result::Result<String, std::env::VarError> {
        std::env::var(key)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub model: String,
}

impl Settings {
    /// Explicit database path wins, then `$STOCK_INSIGHT_DATA_DIR`, then `data/`
    pub fn resolve(env: &dyn Env, db_path: Option<PathBuf>, model: Option<String>) -> Self {
        let db_path = db_path.unwrap_or_else(|| {
            let dir = non_empty(env.var(ENV_DATA_DIR).ok())
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
            PathBuf::from(dir).join(DB_FILE_NAME)
        });
        let model = non_empty(model)
            .or_else(|| non_empty(env.var(ENV_MODEL).ok()))
            .unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string());

        Self { db_path, model }
    }

    /// Directory backups default to: next to the database
    pub fn data_dir(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default()
    }
}

/// API key lookup order: explicit value, saved setting, `$GEMINI_API_KEY`
pub fn resolve_api_key(explicit: Option<&str>, saved: Option<String>, env: &dyn Env) -> Option<String> {
    non_empty(explicit.map(str::to_string))
        .or_else(|| non_empty(saved))
        .or_else(|| non_empty(env.var(ENV_API_KEY).ok()))
}

/// Resolve the key against a store, failing with a hint when none is found
pub fn require_api_key(db: &Database, explicit: Option<&str>, env: &dyn Env) -> Result<String> {
    let saved = db.get_setting(API_KEY_SETTING)?;
    resolve_api_key(explicit, saved, env).ok_or_else(|| {
        InsightError::Config(format!(
            "no Gemini API key: pass --api-key, save one with `config set-key`, or set {}",
            ENV_API_KEY
        ))
    })
}

pub fn save_api_key(db: &Database, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(InsightError::Config("API key cannot be empty".to_string()));
    }
    db.set_setting(API_KEY_SETTING, key)?;
    log::info!("Saved Gemini API key");
    Ok(())
}

pub fn clear_api_key(db: &Database) -> Result<bool> {
    db.delete_setting(API_KEY_SETTING)
}

/// Show only the tail of a key
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;

    struct FakeEnv(HashMap<&'static str, &'static str>);

    impl FakeEnv {
        fn new(vars: &[(&'static str, &'static str)]) -> Self {
            Self(vars.iter().copied().collect())
        }
    }

    impl Env for FakeEnv {
        fn var(&self, key: &str) -> std::result::Result<String, VarError> {
            self.0
                .get(key)
                .map(|v| v.to_string())
                .ok_or(VarError::NotPresent)
        }
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    #[test]
    fn test_api_key_fallback_order() {
        let env = FakeEnv::new(&[(ENV_API_KEY, "from-env")]);
        let saved = || Some("from-settings".to_string());

        assert_eq!(
            resolve_api_key(Some("from-flag"), saved(), &env).as_deref(),
            Some("from-flag")
        );
        assert_eq!(resolve_api_key(None, saved(), &env).as_deref(), Some("from-settings"));
        assert_eq!(resolve_api_key(Some("  "), None, &env).as_deref(), Some("from-env"));
        assert_eq!(resolve_api_key(None, None, &FakeEnv::new(&[])), None);
    }

    #[test]
    fn test_require_api_key_reads_saved_setting() {
        let db = test_db();
        let env = FakeEnv::new(&[]);
        assert!(matches!(
            require_api_key(&db, None, &env),
            Err(InsightError::Config(_))
        ));

        save_api_key(&db, " AIza-test ").unwrap();
        assert_eq!(require_api_key(&db, None, &env).unwrap(), "AIza-test");

        assert!(clear_api_key(&db).unwrap());
        assert!(require_api_key(&db, None, &env).is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::resolve(&FakeEnv::new(&[]), None, None);
        assert_eq!(settings.db_path, PathBuf::from("data").join("stock_insight.db"));
        assert_eq!(settings.model, gemini::DEFAULT_MODEL);
        assert_eq!(settings.data_dir(), PathBuf::from("data"));
    }

    #[test]
    fn test_settings_from_env_and_explicit() {
        let env = FakeEnv::new(&[(ENV_DATA_DIR, "/var/lib/insight"), (ENV_MODEL, "gemini-2.5-pro")]);

        let settings = Settings::resolve(&env, None, None);
        assert_eq!(settings.db_path, PathBuf::from("/var/lib/insight/stock_insight.db"));
        assert_eq!(settings.model, "gemini-2.5-pro");

        let settings = Settings::resolve(
            &env,
            Some(PathBuf::from("/tmp/other.db")),
            Some("gemini-2.5-flash".to_string()),
        );
        assert_eq!(settings.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(settings.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("AIzaSyABCD1234"), "**********1234");
        assert_eq!(mask_key("abc"), "***");
    }
}
