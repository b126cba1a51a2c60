mod archive;
mod entry;
mod redis_store;
mod sink;
mod store;

pub use archive::{ArchiveStore, FsArchiveStore, MemoryArchiveStore, partition_path};
pub use entry::{LogCategory, LogContext, LogEntry, LogLevel};
pub use redis_store::RedisLogStore;
pub use sink::{
    ApiInteraction, LlmInteraction, OperationTimer, PROMPT_PREVIEW_CHARS, TelemetrySink,
    TelemetrySinkBuilder,
};
pub use store::{
    CATEGORY_INDEX_CAP, LogStore, MemoryLogStore, TelemetryStoreError, TelemetryStoreFuture,
    USER_INDEX_CAP,
};

#[cfg(test)]
mod tests;
