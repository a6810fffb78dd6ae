use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};

use stock_insight::config::{self, Env, RealEnv, Settings};
use stock_insight::{
    default_backup_path, Database, GeminiClient, NewPrediction, Prediction, Snapshot, Tracker,
    TRACKING_WEEKS,
};

#[derive(Parser)]
#[command(
    name = "stock-insight",
    version,
    about = "Track chart predictions against an AI second opinion"
)]
struct Cli {
    /// SQLite database file (default: $STOCK_INSIGHT_DATA_DIR/stock_insight.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Gemini API key (overrides the saved key and $GEMINI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Gemini model name
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List predictions, newest first
    List,
    /// Show one prediction with its weekly history
    Show {
        id: String,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a new prediction from a chart image
    Create {
        #[arg(long)]
        ticker: String,
        /// Chart image file (png, jpg, webp, gif)
        #[arg(long)]
        image: PathBuf,
        /// up or down
        #[arg(long)]
        direction: String,
        #[arg(long)]
        reasoning: String,
        /// Target price
        #[arg(long)]
        target: Option<f64>,
    },
    /// Run the next weekly check-in
    Update { id: String },
    /// Show the final retrospective, generating it if needed
    Retro { id: String },
    /// Delete a prediction
    Delete { id: String },
    /// AI calls made today
    Usage {
        /// Show every recorded day
        #[arg(long)]
        history: bool,
    },
    /// Export all data to a JSON file
    Backup {
        /// Output file (default: stock-insight-backup-YYYY-MM-DD.json next to the database)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace all data with a backup file
    Restore { file: PathBuf },
    /// Manage the saved Gemini API key
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Save an API key in the database
    SetKey { key: String },
    /// Remove the saved API key
    ClearKey,
    /// Show resolved settings
    Show,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stock_insight=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = RealEnv;
    let settings = Settings::resolve(&env, cli.db.clone(), cli.model.clone());

    tracing::debug!("Using database {}", settings.db_path.display());
    let db = Database::open(&settings.db_path)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    db.init_schema().context("failed to initialize schema")?;

    match cli.command {
        Commands::List => cmd_list(&db),
        Commands::Show { id, json } => cmd_show(&db, &id, json),
        Commands::Create {
            ticker,
            image,
            direction,
            reasoning,
            target,
        } => {
            let chart_image = image_data_url(&image)?;
            let tracker = gemini_tracker(db, &settings, cli.api_key.as_deref(), &env)?;
            let prediction = tracker.create_prediction(NewPrediction {
                ticker,
                chart_image,
                direction,
                reasoning,
                target_price: target,
            })?;
            println!("[OK] Created prediction {}", prediction.id);
            print_prediction(&prediction);
            Ok(())
        }
        Commands::Update { id } => {
            let tracker = gemini_tracker(db, &settings, cli.api_key.as_deref(), &env)?;
            let prediction = tracker
                .run_weekly_update(&id)
                .with_context(|| format!("weekly update for {} failed", id))?;
            if let Some(latest) = prediction.latest_update() {
                println!(
                    "[OK] Week {}/{}: {:.2}  {}",
                    latest.week, TRACKING_WEEKS, latest.price, latest.analysis
                );
            }
            if prediction.is_completed() {
                println!("Tracking complete. Run `stock-insight retro {}` for the retrospective.", id);
            }
            Ok(())
        }
        Commands::Retro { id } => {
            // Stored retrospectives need no API key
            let existing = db
                .get_prediction(&id)?
                .with_context(|| format!("prediction {} not found", id))?
                .final_retrospective;
            let text = match existing {
                Some(text) => text,
                None => gemini_tracker(db, &settings, cli.api_key.as_deref(), &env)?
                    .ensure_retrospective(&id)?,
            };
            println!("{}", text);
            Ok(())
        }
        Commands::Delete { id } => {
            let removed = db.delete_prediction(&id)?;
            println!("[OK] Removed {} prediction(s)", removed);
            Ok(())
        }
        Commands::Usage { history } => cmd_usage(&db, history),
        Commands::Backup { out } => {
            let path = out.unwrap_or_else(|| {
                default_backup_path(&settings.data_dir(), chrono::Utc::now().date_naive())
            });
            let snapshot = db.export_snapshot()?;
            snapshot
                .write_to_file(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "[OK] Backed up {} predictions and {} usage days to {}",
                snapshot.predictions.len(),
                snapshot.usage.len(),
                path.display()
            );
            Ok(())
        }
        Commands::Restore { file } => {
            let snapshot = Snapshot::read_from_file(&file)?;
            let summary = db.import_snapshot(&snapshot)?;
            println!(
                "[OK] Restored {} predictions and {} usage days",
                summary.predictions, summary.usage_days
            );
            Ok(())
        }
        Commands::Config { action } => cmd_config(&db, action, &settings, cli.api_key.as_deref(), &env),
    }
}

fn gemini_tracker(
    db: Database,
    settings: &Settings,
    explicit_key: Option<&str>,
    env: &dyn Env,
) -> Result<Tracker<GeminiClient>> {
    let key = config::require_api_key(&db, explicit_key, env)?;
    let client = GeminiClient::with_api_key(&key)?.with_model(&settings.model);
    Ok(Tracker::new(db, client))
}

fn cmd_list(db: &Database) -> Result<()> {
    let predictions = db.get_predictions()?;
    if predictions.is_empty() {
        println!("No predictions yet.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:<5}  {:<5}  {:<9}  {:<5}  {}",
        "ID", "TICKER", "YOU", "AI", "STATUS", "WEEKS", "CREATED"
    );
    for p in &predictions {
        println!(
            "{:<36}  {:<8}  {:<5}  {:<5}  {:<9}  {}/{}    {}",
            p.id,
            p.ticker,
            p.user_prediction.as_str(),
            p.gemini_prediction.as_str(),
            p.status.as_str(),
            p.weekly_data.len(),
            TRACKING_WEEKS,
            p.created_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

fn cmd_show(db: &Database, id: &str, json: bool) -> Result<()> {
    let prediction = db
        .get_prediction(id)?
        .with_context(|| format!("prediction {} not found", id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        print_prediction(&prediction);
    }
    Ok(())
}

fn cmd_usage(db: &Database, history: bool) -> Result<()> {
    if history {
        for day in db.get_usage_history()? {
            println!("{}  {}", day.date, day.count);
        }
    } else {
        let today = stock_insight::tracker::today();
        println!("{}  {}", today, db.get_usage(today)?);
    }
    Ok(())
}

fn cmd_config(
    db: &Database,
    action: ConfigAction,
    settings: &Settings,
    explicit_key: Option<&str>,
    env: &dyn Env,
) -> Result<()> {
    match action {
        ConfigAction::SetKey { key } => {
            config::save_api_key(db, &key)?;
            println!("[OK] API key saved");
        }
        ConfigAction::ClearKey => {
            if config::clear_api_key(db)? {
                println!("[OK] API key removed");
            } else {
                println!("No saved API key");
            }
        }
        ConfigAction::Show => {
            let saved = db.get_setting(config::API_KEY_SETTING)?;
            let key = config::resolve_api_key(explicit_key, saved, env);
            println!("database: {}", settings.db_path.display());
            println!("model:    {}", settings.model);
            println!(
                "api key:  {}",
                key.as_deref().map(config::mask_key).unwrap_or_else(|| "(not set)".to_string())
            );
        }
    }
    Ok(())
}

fn print_prediction(p: &Prediction) {
    println!("{} ({})", p.ticker, p.id);
    println!("  created:  {}", p.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("  status:   {} ({}/{} weeks)", p.status.as_str(), p.weekly_data.len(), TRACKING_WEEKS);
    println!("  initial:  {:.2}", p.initial_price);
    if let Some(target) = p.target_price {
        println!("  target:   {:.2}", target);
    }
    println!("  you:      {} - {}", p.user_prediction.as_str(), p.user_reasoning);
    println!("  AI:       {} - {}", p.gemini_prediction.as_str(), p.gemini_reasoning);
    if let Some(score) = p.gemini_alignment_score {
        let reason = p.gemini_alignment_reason.as_deref().unwrap_or("");
        println!("  aligned:  {:.0}% {}", score, reason);
    }
    for week in &p.weekly_data {
        let score = week
            .alignment_score
            .map(|s| format!(" [{:.0}%]", s))
            .unwrap_or_default();
        println!(
            "  week {}:   {:.2} on {}{}  {}",
            week.week,
            week.price,
            week.date.format("%Y-%m-%d"),
            score,
            week.analysis
        );
    }
    if let Some(retro) = &p.final_retrospective {
        println!("\n{}", retro);
    }
}

fn image_mime(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => bail!("unsupported chart image type: {}", path.display()),
    })
}

/// Read a chart file as a `data:<mime>;base64,...` URL
fn image_data_url(path: &Path) -> Result<String> {
    let mime = image_mime(path)?;
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime, payload))
}
