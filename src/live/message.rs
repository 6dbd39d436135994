//! Server payload shapes consumed by the engine.

use serde::{Deserialize, Serialize};

/// One payload from the remote session's message stream.
///
/// Every field is optional on the wire; a single message may carry audio,
/// transcription fragments and grounding metadata together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerMessage {
    /// Inline synthesized audio as base64 16-bit LE PCM.
    pub audio: Option<String>,
    /// The model's turn was interrupted by new user speech.
    pub interrupted: bool,
    /// Incremental transcription of the user's audio.
    pub input_transcription: Option<String>,
    /// Incremental transcription of the model's audio.
    pub output_transcription: Option<String>,
    /// Citation metadata attached to model output.
    pub grounding_chunks: Vec<GroundingChunk>,
}

/// One grounding entry as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

/// A web reference inside a grounding chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebSource {
    pub title: Option<String>,
    pub uri: String,
}

/// A resolved citation attached to a transcript item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

impl ServerMessage {
    /// Resolves grounding chunks to displayable source references,
    /// skipping entries without a web reference.
    pub fn sources(&self) -> Vec<SourceRef> {
        self.grounding_chunks
            .iter()
            .filter_map(|chunk| {
                chunk.web.as_ref().map(|web| SourceRef {
                    title: web
                        .title
                        .clone()
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "Source".to_string()),
                    url: web.uri.clone(),
                })
            })
            .collect()
    }

    pub fn with_audio(mut self, data: &str) -> Self {
        self.audio = Some(data.to_string());
        self
    }

    pub fn with_interrupted(mut self) -> Self {
        self.interrupted = true;
        self
    }

    pub fn with_input_transcription(mut self, text: &str) -> Self {
        self.input_transcription = Some(text.to_string());
        self
    }

    pub fn with_output_transcription(mut self, text: &str) -> Self {
        self.output_transcription = Some(text.to_string());
        self
    }

    pub fn with_web_source(mut self, title: Option<&str>, uri: &str) -> Self {
        self.grounding_chunks.push(GroundingChunk {
            web: Some(WebSource {
                title: title.map(str::to_string),
                uri: uri.to_string(),
            }),
        });
        self
    }
}

/// Lifecycle events delivered by the remote session, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The session finished opening and is ready for realtime input.
    Opened,
    /// A server payload arrived.
    Message(ServerMessage),
    /// The server closed the session normally.
    Closed,
    /// The session failed; carries a human-readable message.
    Error(String),
}
