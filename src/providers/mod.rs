//! Collaborators the relay core depends on but does not own: where the upstream
//! credential lives, which input modalities a model accepts, who hears about
//! unavailable models, and where the model list comes from.

pub mod capabilities;
pub mod catalog;
pub mod credentials;
pub mod notifications;
pub mod openrouter;

use crate::errors::ClassifiedError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub use capabilities::CapabilityTable;
pub use catalog::{ListMode, ModelDescriptor, UpstreamModelCatalog};
pub use credentials::{EnvCredentialStore, StaticCredentialStore};
pub use notifications::ThrottledNotifier;
pub use openrouter::UpstreamClient;

/// Input modality of a message content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
    File,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Video => "video",
            Modality::File => "file",
        }
    }

    /// Maps a content part `type` to its modality. Unknown types yield `None`.
    pub fn from_part_type(kind: &str) -> Option<Self> {
        match kind {
            "text" | "input_text" => Some(Modality::Text),
            "image_url" | "image" | "input_image" => Some(Modality::Image),
            "input_audio" | "audio" | "audio_url" => Some(Modality::Audio),
            "video_url" | "video" | "input_video" => Some(Modality::Video),
            "file" | "input_file" => Some(Modality::File),
            _ => None,
        }
    }

    /// Parses the modality names used by the upstream catalog (`"text"`, `"image"`, ...).
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "text" => Some(Modality::Text),
            "image" => Some(Modality::Image),
            "audio" => Some(Modality::Audio),
            "video" => Some(Modality::Video),
            "file" | "pdf" => Some(Modality::File),
            _ => None,
        }
    }
}

impl Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait CredentialStore: Send + Sync {
    /// The key used upstream. May be blank when nothing is configured.
    fn configured_credential(&self) -> String;
}

pub trait ModelCapabilityRegistry: Send + Sync {
    fn supports(&self, model: &str, modality: Modality) -> bool;
}

pub trait NotificationSink: Send + Sync {
    /// Called every time a model is classified as unavailable; implementations
    /// throttle repeats themselves.
    fn notify_model_unavailable(&self, model: &str, raw_detail: &str);
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list(
        &self,
        mode: ListMode,
        search: Option<&str>,
        provider: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ModelDescriptor>, ClassifiedError>;
}
