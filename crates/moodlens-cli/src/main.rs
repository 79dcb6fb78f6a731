use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodlens_core::{ModelState, RawImage};
use moodlens_store::{HistoryStore, SqliteHistoryStore};
use moodlensd::dto::DetectResponse;
use moodlensd::{Config, HistoryDispatcher};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "moodlens", about = "moodlens emotion detection CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the dominant face's emotion in an image file
    Detect {
        /// Image file (any format the decoder recognizes)
        path: PathBuf,
        /// Record the result in this identity's history
        #[arg(short, long)]
        identity: Option<String>,
        /// Include the full probability vector
        #[arg(short, long)]
        probabilities: bool,
    },
    /// Manage identities
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },
    /// Show an identity's emotion history
    History {
        /// Identity ID
        id: String,
        /// Number of most recent entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show model and store status
    Status,
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Create a new identity
    Create {
        #[arg(short, long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Detect { path, identity, probabilities } => {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let config = Config { report_probabilities: probabilities, ..config };
            let pipeline = config.build_pipeline()?;
            let result = pipeline.run(&RawImage::new(bytes))?;
            tracing::info!(
                path = %path.display(),
                emotion = result.outcome.as_str(),
                confidence = result.confidence,
                "detection finished"
            );

            let history_updated = match identity {
                Some(id) => {
                    let store = open_store(&config).await?;
                    let dispatcher = HistoryDispatcher::new(Arc::new(store));
                    let updated = dispatcher.dispatch(&id, &result).await;
                    tracing::debug!(identity = %id, updated, "history dispatch");
                    Some(updated)
                }
                None => None,
            };
            print_json(&DetectResponse { result, history_updated })?;
        }
        Commands::Identity { command: IdentityCommands::Create { name } } => {
            let store = open_store(&config).await?;
            let identity = store.create_identity(name.trim()).await?;
            tracing::info!(id = %identity.id, name = %identity.name, "identity created");
            print_json(&identity)?;
        }
        Commands::History { id, limit } => {
            let store = open_store(&config).await?;
            let identity = store
                .get_identity(&id)
                .await?
                .with_context(|| format!("identity not found: {id}"))?;
            let history = store.history(&id, limit).await?;
            print_json(&serde_json::json!({ "identity": identity, "history": history }))?;
        }
        Commands::Status => {
            let paths = config.model_paths();
            let models = ModelState::load(&paths, 1);
            let reason = match &models {
                ModelState::Ready { .. } => None,
                ModelState::Unavailable { reason } => Some(reason.clone()),
            };
            print_json(&serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "model_dir": config.model_dir,
                "detector_present": paths.detector.exists(),
                "classifier_present": paths.classifier.exists(),
                "models_loaded": models.is_ready(),
                "models_unavailable_reason": reason,
                "db_path": config.db_path,
                "db_present": config.db_path.exists(),
                "tiers_file": config.tiers_file,
            }))?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<SqliteHistoryStore> {
    let store = SqliteHistoryStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening history store {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "history store opened");
    Ok(store)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["moodlens", "detect", "face.png", "-i", "abc", "-p"]);
        assert!(matches!(
            cli.command,
            Commands::Detect { identity: Some(ref id), probabilities: true, .. } if id == "abc"
        ));
    }

    #[tokio::test]
    async fn test_open_store_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { db_path: dir.path().join("history.db"), ..Config::from_env() };

        let store = open_store(&config).await.unwrap();
        let identity = store.create_identity("subject").await.unwrap();
        assert!(config.db_path.exists());
        assert!(store.get_identity(&identity.id).await.unwrap().is_some());
    }
}
