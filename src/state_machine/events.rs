use serde::{Deserialize, Serialize};

/// Events that drive the chunk runner between phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChunkEvent {
    /// An item was buffered and the buffer is still below the chunk size
    ItemBuffered,
    /// The buffer reached the chunk size
    BufferFull,
    /// The reader reported end of stream
    SourceExhausted { buffered: usize },
    /// The writer committed the chunk
    WriteSucceeded,
    /// Start accumulating the next chunk
    NextChunk,
    /// A reader, writer or timeout fault
    Fault(String),
}

impl ChunkEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ItemBuffered => "item_buffered",
            Self::BufferFull => "buffer_full",
            Self::SourceExhausted { .. } => "source_exhausted",
            Self::WriteSucceeded => "write_succeeded",
            Self::NextChunk => "next_chunk",
            Self::Fault(_) => "fault",
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}
