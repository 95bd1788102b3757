/// Configuration for artifact installation and backfill.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Number of base-table primary keys covered by one backfill chunk.
    pub chunk_size: u64,
    /// Bound on concurrently executing backfill chunks.
    pub thread_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            thread_count: 4,
        }
    }
}

impl EngineConfig {
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            ..Default::default()
        }
    }

    pub fn with_thread_count(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Default::default()
        }
    }

    pub(crate) fn normalized(&self) -> Self {
        Self {
            chunk_size: self.chunk_size.max(1),
            thread_count: self.thread_count.max(1),
        }
    }
}
