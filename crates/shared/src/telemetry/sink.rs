use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use super::archive::{ArchiveStore, FsArchiveStore};
use super::entry::{LogCategory, LogContext, LogEntry, LogLevel, duration_to_millis};
use super::redis_store::RedisLogStore;
use super::store::{CATEGORY_INDEX_CAP, LogStore, USER_INDEX_CAP, category_index, user_index};
use crate::clock::{Clock, SystemClock};
use crate::config::TelemetryConfig;

pub const PROMPT_PREVIEW_CHARS: usize = 500;

/// Structured log sink shared by the gateway, the pipeline and the interactive generator.
///
/// Every accepted entry is written to the console through `tracing`. When a keyed store is
/// attached the entry is also persisted with a level-dependent TTL and indexed by
/// category/level and by user. Error entries are additionally appended to the archive.
/// Storage failures are reported and swallowed; logging never fails the caller.
pub struct TelemetrySink {
    session_id: String,
    request_id: Mutex<Option<String>>,
    min_level: LogLevel,
    store: Option<Arc<dyn LogStore>>,
    archive: Option<Arc<dyn ArchiveStore>>,
    clock: Arc<dyn Clock>,
}

pub struct TelemetrySinkBuilder {
    session_id: Option<String>,
    min_level: LogLevel,
    store: Option<Arc<dyn LogStore>>,
    archive: Option<Arc<dyn ArchiveStore>>,
    clock: Arc<dyn Clock>,
}

impl TelemetrySinkBuilder {
    pub fn with_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn build(self) -> TelemetrySink {
        TelemetrySink {
            session_id: self
                .session_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            request_id: Mutex::new(None),
            min_level: self.min_level,
            store: self.store,
            archive: self.archive,
            clock: self.clock,
        }
    }
}

pub struct LlmInteraction<'a> {
    pub template_type: &'a str,
    pub template_version: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub response: Option<&'a str>,
    pub latency: Duration,
    pub valid: bool,
    pub error: Option<&'a str>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub user_id: Option<&'a str>,
    pub tags: &'a [String],
}

pub struct ApiInteraction<'a> {
    pub endpoint: &'a str,
    pub method: &'a str,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub status: Option<u16>,
    pub duration: Duration,
    pub error: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

impl TelemetrySink {
    pub fn builder(min_level: LogLevel) -> TelemetrySinkBuilder {
        TelemetrySinkBuilder {
            session_id: None,
            min_level,
            store: None,
            archive: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Console-only sink.
    pub fn console(min_level: LogLevel) -> Self {
        Self::builder(min_level).build()
    }

    /// Connects the optional Redis store and filesystem archive named by the config.
    /// An unreachable Redis degrades to console-only logging.
    pub async fn from_config(config: &TelemetryConfig) -> Self {
        let mut builder = Self::builder(config.min_level);

        if let Some(redis_url) = config.redis_url.as_deref() {
            match RedisLogStore::new(redis_url).await {
                Ok(store) => builder = builder.with_store(Arc::new(store)),
                Err(err) => warn!("log store unavailable, continuing with console logging: {err}"),
            }
        }

        if let Some(archive_dir) = config.archive_dir.as_ref() {
            builder = builder.with_archive(Arc::new(FsArchiveStore::new(archive_dir)));
        }

        builder.build()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn request_id(&self) -> Option<String> {
        self.lock_request_id().clone()
    }

    pub fn set_request_id(&self, request_id: Option<String>) {
        *self.lock_request_id() = request_id;
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Returns the entry when it passed the level filter.
    pub async fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        context: LogContext,
    ) -> Option<LogEntry> {
        if level < self.min_level {
            return None;
        }

        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            level,
            category,
            tags: context.tags,
            message: message.into(),
            data: context.data,
            user_id: context.user_id,
            session_id: self.session_id.clone(),
            request_id: self.request_id(),
            duration_ms: context.duration.map(duration_to_millis),
        };

        emit_console(&entry);
        self.persist(&entry).await;
        Some(entry)
    }

    pub async fn debug(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        context: LogContext,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Debug, category, message, context).await
    }

    pub async fn info(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        context: LogContext,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Info, category, message, context).await
    }

    pub async fn warn(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        context: LogContext,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Warn, category, message, context).await
    }

    pub async fn error(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        context: LogContext,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Error, category, message, context).await
    }

    pub async fn start_timer(
        &self,
        category: LogCategory,
        operation: impl Into<String>,
        context: LogContext,
    ) -> OperationTimer<'_> {
        let operation = operation.into();
        self.debug(category, format!("starting {operation}"), context.clone())
            .await;

        OperationTimer {
            sink: self,
            category,
            operation,
            context,
            started: Instant::now(),
        }
    }

    pub async fn log_llm_interaction(&self, interaction: LlmInteraction<'_>) -> Option<LogEntry> {
        let succeeded = interaction.valid && interaction.error.is_none();
        let level = if succeeded {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        let total_tokens = match (interaction.prompt_tokens, interaction.completion_tokens) {
            (Some(prompt), Some(completion)) => Some(prompt.saturating_add(completion)),
            _ => None,
        };

        let data = json!({
            "template_type": interaction.template_type,
            "template_version": interaction.template_version,
            "provider": interaction.provider,
            "model": interaction.model,
            "system_prompt_preview": preview(interaction.system_prompt),
            "user_prompt_preview": preview(interaction.user_prompt),
            "response": interaction.response,
            "latency_ms": duration_to_millis(interaction.latency),
            "valid": interaction.valid,
            "error": interaction.error,
            "prompt_tokens": interaction.prompt_tokens,
            "completion_tokens": interaction.completion_tokens,
            "total_tokens": total_tokens,
        });

        let context = LogContext::default()
            .with_data(data)
            .with_tags(["llm", interaction.template_type, interaction.provider])
            .with_tags(interaction.tags.iter().cloned())
            .with_user_id(interaction.user_id.map(str::to_string))
            .with_duration(interaction.latency);

        let outcome = if succeeded { "succeeded" } else { "failed" };
        self.log(
            level,
            LogCategory::Llm,
            format!(
                "{} via {} {outcome}",
                interaction.template_type, interaction.provider
            ),
            context,
        )
        .await
    }

    pub async fn log_api_interaction(&self, interaction: ApiInteraction<'_>) -> Option<LogEntry> {
        let failed = interaction.error.is_some()
            || interaction.status.is_some_and(|status| status >= 400);
        let level = if failed {
            LogLevel::Error
        } else {
            LogLevel::Info
        };

        let data = json!({
            "endpoint": interaction.endpoint,
            "method": interaction.method,
            "request": interaction.request,
            "response": interaction.response,
            "status": interaction.status,
            "error": interaction.error,
        });

        let context = LogContext::default()
            .with_data(data)
            .with_tags(["api", interaction.method])
            .with_user_id(interaction.user_id.map(str::to_string))
            .with_duration(interaction.duration);

        self.log(
            level,
            LogCategory::Api,
            format!("{} {}", interaction.method, interaction.endpoint),
            context,
        )
        .await
    }

    pub async fn fetch(&self, id: &str) -> Option<LogEntry> {
        let store = self.store.as_ref()?;
        match store.get_entry(id).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(log_id = id, "failed to read log entry: {err}");
                None
            }
        }
    }

    /// Most recent live entries for a category and level.
    pub async fn recent(
        &self,
        category: LogCategory,
        level: LogLevel,
        limit: usize,
    ) -> Vec<LogEntry> {
        self.resolve_index(&category_index(category, level), limit)
            .await
    }

    pub async fn for_user(&self, user_id: &str, limit: usize) -> Vec<LogEntry> {
        self.resolve_index(&user_index(user_id), limit).await
    }

    pub async fn archived(&self, category: LogCategory, date: NaiveDate) -> Vec<LogEntry> {
        let Some(archive) = self.archive.as_ref() else {
            return Vec::new();
        };
        match archive.read_partition(category, date).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    category = category.as_str(),
                    "failed to read log archive: {err}"
                );
                Vec::new()
            }
        }
    }

    async fn resolve_index(&self, index: &str, limit: usize) -> Vec<LogEntry> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        let ids = match store.read_index(index, limit).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(index, "failed to read log index: {err}");
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            // Index ids can outlive their entries; expired ones are skipped.
            if let Some(entry) = self.fetch(&id).await {
                entries.push(entry);
            }
        }
        entries
    }

    async fn persist(&self, entry: &LogEntry) {
        if let Some(store) = self.store.as_ref() {
            match store.put_entry(entry, entry.level.retention()).await {
                Ok(()) => {
                    let index = category_index(entry.category, entry.level);
                    if let Err(err) = store
                        .push_index(&index, &entry.id, CATEGORY_INDEX_CAP)
                        .await
                    {
                        warn!(log_id = %entry.id, index, "failed to index log entry: {err}");
                    }
                    if let Some(user_id) = entry.user_id.as_deref() {
                        let index = user_index(user_id);
                        if let Err(err) = store.push_index(&index, &entry.id, USER_INDEX_CAP).await
                        {
                            warn!(log_id = %entry.id, index, "failed to index log entry: {err}");
                        }
                    }
                }
                Err(err) => warn!(log_id = %entry.id, "failed to persist log entry: {err}"),
            }
        }

        if entry.level == LogLevel::Error
            && let Some(archive) = self.archive.as_ref()
            && let Err(err) = archive.append(entry).await
        {
            warn!(log_id = %entry.id, "failed to archive log entry: {err}");
        }
    }

    fn lock_request_id(&self) -> MutexGuard<'_, Option<String>> {
        match self.request_id.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Times one operation. `finish` records the elapsed time at info level.
pub struct OperationTimer<'a> {
    sink: &'a TelemetrySink,
    category: LogCategory,
    operation: String,
    context: LogContext,
    started: Instant,
}

impl OperationTimer<'_> {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn finish(self) -> Option<LogEntry> {
        let elapsed = self.started.elapsed();
        let context = self.context.with_duration(elapsed);
        self.sink
            .info(
                self.category,
                format!("{} completed", self.operation),
                context,
            )
            .await
    }

    pub async fn finish_with(self, data: Value) -> Option<LogEntry> {
        let elapsed = self.started.elapsed();
        let context = self.context.with_data(data).with_duration(elapsed);
        self.sink
            .info(
                self.category,
                format!("{} completed", self.operation),
                context,
            )
            .await
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PROMPT_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut truncated = text.chars().take(PROMPT_PREVIEW_CHARS).collect::<String>();
    truncated.push_str("...");
    truncated
}

macro_rules! console_event {
    ($macro:ident, $entry:expr, $data:expr) => {
        tracing::$macro!(
            log_id = %$entry.id,
            category = $entry.category.as_str(),
            session_id = %$entry.session_id,
            request_id = ?$entry.request_id,
            user_id = ?$entry.user_id,
            duration_ms = ?$entry.duration_ms,
            tags = ?$entry.tags,
            data = ?$data,
            "{}",
            $entry.message
        )
    };
}

fn emit_console(entry: &LogEntry) {
    let data = entry.data.as_ref().map(Value::to_string);
    match entry.level {
        LogLevel::Debug => console_event!(debug, entry, data),
        LogLevel::Info => console_event!(info, entry, data),
        LogLevel::Warn => console_event!(warn, entry, data),
        LogLevel::Error => console_event!(error, entry, data),
    }
}
