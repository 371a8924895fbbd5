use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use lingest_core::{
    load_config, Analyzer, ContentDatabase, ContentUploader, ExerciseGenerator, GeminiClient,
    IngestDriver, LingestConfig, MediaToolkit, PipelineMode, ShutdownToken, TextGenerator,
    TopicCatalog, Translator, TranslatorConfig, VideoIntake, VideoPipeline, WhisperSubprocess,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] lingest_core::ConfigError),
    #[error("database error: {0}")]
    Database(#[from] lingest_core::DatabaseError),
    #[error("driver error: {0}")]
    Driver(#[from] lingest_core::DriverError),
    #[error("llm error: {0}")]
    Llm(#[from] lingest_core::LlmError),
    #[error("storage error: {0}")]
    Storage(#[from] lingest_core::IngestError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("one or more health checks failed")]
    Unhealthy,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Learner-video ingestion pipeline", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "configs/lingest.toml")]
    pub config: PathBuf,
    /// Keep polling the pending prefix instead of running a single pass
    #[arg(long)]
    pub watch: bool,
    /// Which stages to run per video
    #[arg(long, value_enum, default_value_t = ModeArg::Full)]
    pub mode: ModeArg,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Full,
    NoExercises,
    TranscriptionOnly,
}

impl From<ModeArg> for PipelineMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => PipelineMode::Full,
            ModeArg::NoExercises => PipelineMode::NoExercises,
            ModeArg::TranscriptionOnly => PipelineMode::TranscriptionOnly,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the database schema and exit
    Migrate,
    /// Verify configuration, bucket, and database connectivity
    Health,
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    match cli.command {
        Some(Commands::Migrate) => migrate(&config).await,
        Some(Commands::Health) => health(&config).await,
        None => run_pipeline(&config, cli.watch, cli.mode.into()).await,
    }
}

async fn migrate(config: &LingestConfig) -> Result<()> {
    let database = ContentDatabase::connect(&config.database).await?;
    database.migrate().await?;
    database.close().await;
    println!("schema applied");
    Ok(())
}

async fn health(config: &LingestConfig) -> Result<()> {
    let mut failed = false;
    let mut check = |name: &str, result: std::result::Result<(), String>| match result {
        Ok(()) => println!("[OK] {name}"),
        Err(detail) => {
            failed = true;
            println!("[ERROR] {name}: {detail}");
        }
    };

    let intake = VideoIntake::new(&config.s3_input);
    check(
        "intake bucket",
        intake.health_check().await.map_err(|e| e.to_string()),
    );

    let uploader = ContentUploader::new(&config.storage);
    check(
        "output bucket",
        uploader.health_check().await.map_err(|e| e.to_string()),
    );

    match ContentDatabase::connect(&config.database).await {
        Ok(database) => {
            check("database", Ok(()));
            database.close().await;
        }
        Err(err) => check("database", Err(err.to_string())),
    }

    check(
        "llm api key",
        config
            .google
            .resolve_api_key()
            .map(|_| ())
            .ok_or_else(|| "set google.api_key or GEMINI_API_KEY".to_string()),
    );

    if failed {
        Err(AppError::Unhealthy)
    } else {
        Ok(())
    }
}

async fn run_pipeline(config: &LingestConfig, watch: bool, mode: PipelineMode) -> Result<()> {
    if !config.s3_input.enabled {
        return Err(AppError::InvalidConfig(
            "s3_input.enabled is false; nothing to ingest".into(),
        ));
    }
    let api_key = config.google.resolve_api_key().ok_or_else(|| {
        AppError::InvalidConfig("no LLM API key: set google.api_key or GEMINI_API_KEY".into())
    })?;

    let generator: Arc<dyn TextGenerator> =
        Arc::new(GeminiClient::new(&config.google.gemini_model, api_key)?);
    let catalog = TopicCatalog::new(&config.video_topics);

    let translator = Translator::new(
        generator.clone(),
        TranslatorConfig {
            source_language: config.transcription.language.clone(),
            target_language: config.google.target_language.clone(),
            batch_size: config.google.translation_chunk_size,
            max_attempts: config.google.translation_attempts,
            ..TranslatorConfig::default()
        },
    );
    let analyzer = Analyzer::new(generator.clone(), catalog.clone());
    let exercises = ExerciseGenerator::new(generator);
    let transcriber = Arc::new(WhisperSubprocess::from_config(&config.transcription));
    let uploader = Arc::new(ContentUploader::new(&config.storage));
    let intake = VideoIntake::new(&config.s3_input);

    let mut pipeline = VideoPipeline::new(
        Arc::new(MediaToolkit::new()),
        transcriber,
        translator,
        analyzer,
        exercises,
        uploader,
        catalog,
        config,
    )
    .with_mode(mode);

    let database = if mode.persistence_enabled() {
        let database = Arc::new(ContentDatabase::connect(&config.database).await?);
        database.migrate().await?;
        pipeline = pipeline.with_database(database.clone());
        Some(database)
    } else {
        None
    };

    let driver = IngestDriver::new(
        intake,
        pipeline,
        PathBuf::from(&config.paths.work_dir),
        Duration::from_secs(config.s3_input.polling_interval_seconds),
    );
    let shutdown = ShutdownToken::new();

    if watch || config.s3_input.enable_polling {
        driver.run_polling(shutdown).await?;
    } else {
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_token.request_stop();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_token.cancel();
            }
        });
        let report = driver.run_batch(&shutdown).await?;
        println!("{}", report.render());
    }

    drop(driver);
    if let Some(database) = database {
        if let Ok(database) = Arc::try_unwrap(database) {
            database.close().await;
        }
    }
    Ok(())
}
