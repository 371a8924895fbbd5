//! Relational persistence for processed videos. One connection per run,
//! revalidated with a ping (and one reconnect) before each use; the schema
//! is self-applied on startup with duplicate-tolerant DDL.

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{ConnectOptions, Connection, Executor, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseSection;
use crate::model::ProcessedVideo;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

// ER_TABLE_EXISTS_ERROR, ER_DUP_FIELDNAME, ER_DUP_KEYNAME
const IDEMPOTENT_DDL_ERRORS: [u16; 3] = [1050, 1060, 1061];

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("failed to serialize {field}: {source}")]
    Serialize {
        field: &'static str,
        source: serde_json::Error,
    },
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub struct ContentDatabase {
    connection: Mutex<MySqlConnection>,
    options: MySqlConnectOptions,
}

fn is_idempotent_ddl_error(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(mysql) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
            return IDEMPOTENT_DDL_ERRORS.contains(&mysql.number());
        }
    }
    false
}

impl ContentDatabase {
    pub async fn connect(section: &DatabaseSection) -> DatabaseResult<Self> {
        let options = MySqlConnectOptions::new()
            .host(&section.host)
            .port(section.port)
            .username(&section.user)
            .password(&section.password)
            .database(&section.database)
            .charset("utf8mb4");
        let connection = options.connect().await?;
        info!(host = %section.host, database = %section.database, "connected to database");
        Ok(Self {
            connection: Mutex::new(connection),
            options,
        })
    }

    /// Applies the embedded DDL statement by statement. Duplicate-column,
    /// duplicate-key, and table-exists errors count as success so the
    /// migration can run on every startup.
    pub async fn migrate(&self) -> DatabaseResult<()> {
        let mut connection = self.connection.lock().await;
        self.ensure_alive(&mut connection).await?;
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            match connection.execute(statement).await {
                Ok(_) => {}
                Err(err) if is_idempotent_ddl_error(&err) => {
                    debug!(error = %err, "ddl statement already applied");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!("schema migration complete");
        Ok(())
    }

    async fn ensure_alive(&self, connection: &mut MySqlConnection) -> DatabaseResult<()> {
        if let Err(err) = connection.ping().await {
            warn!(error = %err, "database connection lost; reconnecting");
            *connection = self.options.connect().await?;
        }
        Ok(())
    }

    /// Inserts the composite record: one main row plus one `video_topics`
    /// row per topic. Returns the autogenerated id.
    pub async fn insert_video(&self, video: &ProcessedVideo) -> DatabaseResult<u64> {
        fn encode<T: serde::Serialize>(
            value: &T,
            field: &'static str,
        ) -> DatabaseResult<String> {
            serde_json::to_string(value).map_err(|source| DatabaseError::Serialize { field, source })
        }

        let topics = encode(&video.analysis.topics, "topics")?;
        let phrases = encode(&video.transcription.phrases.chunks, "transcription_phrases")?;
        let words = encode(&video.transcription.words.chunks, "transcription_words")?;
        let translation_chunks = encode(&video.translation.chunks, "translation_chunks")?;
        let exercises = encode(&video.exercises, "exercises")?;

        let mut connection = self.connection.lock().await;
        self.ensure_alive(&mut connection).await?;

        let result = sqlx::query(
            "INSERT INTO video_learning_content (
                video_name, video_url, cefr_level, speech_speed,
                grammar_complexity, vocabulary_complexity, topics,
                transcription_phrases, transcription_words, transcript_text,
                translation_chunks, translation_text, exercises,
                duration_seconds, status, is_adult_content
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?)",
        )
        .bind(&video.video_name)
        .bind(&video.video_url)
        .bind(video.analysis.cefr_level.as_str())
        .bind(video.analysis.speech_speed.as_str())
        .bind(video.analysis.grammar_complexity.as_str())
        .bind(video.analysis.vocabulary_complexity.as_str())
        .bind(&topics)
        .bind(&phrases)
        .bind(&words)
        .bind(&video.transcription.full_text)
        .bind(&translation_chunks)
        .bind(&video.translation.full_text)
        .bind(&exercises)
        .bind(video.duration_seconds)
        .bind(video.is_adult_content)
        .execute(&mut *connection)
        .await?;
        let id = result.last_insert_id();

        for topic in &video.analysis.topics {
            sqlx::query("INSERT INTO video_topics (video_id, topic) VALUES (?, ?)")
                .bind(id)
                .bind(topic)
                .execute(&mut *connection)
                .await?;
        }

        info!(id, video = %video.video_name, "persisted processed video");
        Ok(id)
    }

    /// Reads one record back by id, for verification tooling.
    pub async fn fetch_video_name(&self, id: u64) -> DatabaseResult<Option<String>> {
        let mut connection = self.connection.lock().await;
        self.ensure_alive(&mut connection).await?;
        let row = sqlx::query("SELECT video_name FROM video_learning_content WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *connection)
            .await?;
        Ok(row.map(|row| row.get::<String, _>(0)))
    }

    pub async fn close(self) {
        let connection = self.connection.into_inner();
        if let Err(err) = connection.close().await {
            warn!(error = %err, "database connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statements_split_cleanly() {
        let statements: Vec<&str> = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert!(statements.len() >= 5);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS video_learning_content"));
        assert!(statements
            .iter()
            .any(|s| s.starts_with("CREATE TABLE IF NOT EXISTS video_topics")));
        assert!(statements
            .iter()
            .any(|s| s.starts_with("ALTER TABLE video_learning_content")));
    }
}
