use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::openai::{ImageResult, ImageSource};
use crate::prompt::{Material, ProductSpec, StyleOptions, TemplateId};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComposeRequest {
    pub product: ProductSpec,
    #[serde(default)]
    pub style: StyleOptions,
    #[serde(default)]
    pub template: TemplateId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FreeformRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    /// Sent verbatim when non-empty; otherwise composed from `product`.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub product: Option<ProductSpec>,
    #[serde(default)]
    pub style: StyleOptions,
    #[serde(default)]
    pub template: TemplateId,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EditRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub instruction: String,
    /// Overrides the session's generated image as the edit source.
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ImageResponse {
    pub session_id: Uuid,
    pub prompt: String,
    pub source: ImageSource,
    pub origin_url: Option<String>,
    pub mime_type: &'static str,
    pub image_base64: String,
    pub filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OptionsResponse {
    pub materials: Vec<Material>,
    pub lighting: &'static [&'static str],
    pub background: &'static [&'static str],
    pub composition: &'static [&'static str],
    pub mood: &'static [&'static str],
    pub templates: Vec<TemplateId>,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub prompt: String,
    pub result: ImageResult,
    pub filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredImage {
    pub fn to_response(&self, session_id: Uuid) -> ImageResponse {
        ImageResponse {
            session_id,
            prompt: self.prompt.clone(),
            source: self.result.source,
            origin_url: self.result.origin_url.clone(),
            mime_type: self.result.mime_type,
            image_base64: base64::engine::general_purpose::STANDARD.encode(&self.result.bytes),
            filename: self.filename.clone(),
            created_at: self.created_at,
        }
    }
}

/// Per-client state: the latest generated image and the latest edit of it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub generated: Option<StoredImage>,
    pub edited: Option<StoredImage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self { id, generated: None, edited: None, created_at: now, updated_at: now }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            prompt: self.generated.as_ref().map(|g| g.prompt.clone()),
            image_filename: self.generated.as_ref().and_then(|g| g.filename.clone()),
            edit_instruction: self.edited.as_ref().map(|e| e.prompt.clone()),
            edited_filename: self.edited.as_ref().and_then(|e| e.filename.clone()),
            has_image: self.generated.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub prompt: Option<String>,
    pub image_filename: Option<String>,
    pub edit_instruction: Option<String>,
    pub edited_filename: Option<String>,
    pub has_image: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
