use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::{
        ComposeRequest, EditRequest, FreeformRequest, GenerateRequest, ImageResponse,
        OptionsResponse, SessionSummary, StoredImage,
    },
    openai::{ImageError, ImageService},
    prompt::{
        compose, enrich, ComposedPrompt, Material, PromptError, TemplateId, BACKGROUND_CHOICES,
        COMPOSITION_CHOICES, LIGHTING_CHOICES, MOOD_CHOICES,
    },
    sessions::SessionStore,
    storage::{ImageStore, EDITED_PREFIX, GENERATED_PREFIX},
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub images: Arc<dyn ImageService>,
    pub store: ImageStore,
    pub model: String,
    pub size: String,
}

/// `Json` whose rejections come back in the same `{error, kind}` shape as
/// every other failure.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("validation error: {0}")]
    Validation(&'static str),
    #[error("validation error: {}", .0.body_text())]
    Body(#[from] JsonRejection),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Prompt(_) | ApiError::Validation(_) | ApiError::Body(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Image(e) => match e {
                ImageError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
                ImageError::ModerationBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ImageError::InvalidSourceImage(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Prompt(_) | ApiError::Validation(_) | ApiError::Body(_) => "validation",
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::Image(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ {}", self);
        } else {
            tracing::warn!("⚠️ {}", self);
        }
        let body = json!({ "error": self.to_string(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/options", get(get_options))
        .route("/api/prompt", post(compose_prompt))
        .route("/api/prompt/freeform", post(compose_freeform))
        .route("/api/image/generate", post(generate_image))
        .route("/api/image/edit", post(edit_image))
        .route("/api/session/:id", get(get_session))
        .with_state(state)
}

pub async fn get_options() -> Json<OptionsResponse> {
    Json(OptionsResponse {
        materials: Material::ALL.to_vec(),
        lighting: &LIGHTING_CHOICES,
        background: &BACKGROUND_CHOICES,
        composition: &COMPOSITION_CHOICES,
        mood: &MOOD_CHOICES,
        templates: TemplateId::ALL.to_vec(),
    })
}

pub async fn compose_prompt(
    ApiJson(body): ApiJson<ComposeRequest>,
) -> Result<Json<ComposedPrompt>, ApiError> {
    let composed = compose(&body.product, &body.style, body.template)?;
    tracing::info!(
        "📝 Composed {:?} prompt for '{}'",
        composed.template,
        body.product.product_type
    );
    Ok(Json(composed))
}

pub async fn compose_freeform(
    ApiJson(body): ApiJson<FreeformRequest>,
) -> Result<Json<ComposedPrompt>, ApiError> {
    Ok(Json(enrich(&body.text)?))
}

pub async fn generate_image(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<GenerateRequest>,
) -> Result<Json<ImageResponse>, ApiError> {
    let prompt = match body.prompt.filter(|p| !p.is_empty()) {
        Some(prompt) => prompt,
        None => {
            let product = body
                .product
                .as_ref()
                .ok_or(ApiError::Validation("Please enter at least the product type."))?;
            compose(product, &body.style, body.template)?.prompt
        }
    };
    let model = body.model.unwrap_or_else(|| state.model.clone());
    let session_id = body.session_id.unwrap_or_else(Uuid::new_v4);

    tracing::info!("🚀 Generating image for session {} with model {}", session_id, model);
    let result = state.images.generate(&prompt, &model, &state.size).await?;
    let filename = state.store.save(GENERATED_PREFIX, &result.bytes).await;

    let stored = StoredImage { prompt, result, filename, created_at: Utc::now() };
    let response = stored.to_response(session_id);
    state.sessions.update(session_id, |session| {
        session.generated = Some(stored);
        session.edited = None;
    });

    tracing::info!(
        "✅ Image generated for session {} ({} bytes, {} live sessions)",
        session_id,
        response.image_base64.len(),
        state.sessions.len()
    );
    Ok(Json(response))
}

/// Edits always start from the session's generated image, never from a
/// previous edit, unless the caller supplies its own source.
pub async fn edit_image(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<EditRequest>,
) -> Result<Json<ImageResponse>, ApiError> {
    if body.instruction.is_empty() {
        return Err(ApiError::Validation("Please enter an edit prompt."));
    }

    let source: Bytes = match body.image_base64.as_deref().filter(|b| !b.is_empty()) {
        Some(b64) => base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map(Bytes::from)
            .map_err(|_| ApiError::Validation("image_base64 is not valid base64"))?,
        None => {
            let id = body
                .session_id
                .ok_or(ApiError::Validation("No image available for editing."))?;
            match state.sessions.generated_image(id) {
                Some(Some(bytes)) => bytes,
                Some(None) => return Err(ApiError::Validation("No image available for editing.")),
                None => return Err(ApiError::SessionNotFound(id)),
            }
        }
    };
    let model = body.model.unwrap_or_else(|| state.model.clone());
    let session_id = body.session_id.unwrap_or_else(Uuid::new_v4);

    tracing::info!("✏️ Editing image for session {}: {}", session_id, body.instruction);
    let result = state.images.edit(&body.instruction, &source, &model).await?;
    let filename = state.store.save(EDITED_PREFIX, &result.bytes).await;

    let stored =
        StoredImage { prompt: body.instruction, result, filename, created_at: Utc::now() };
    let response = stored.to_response(session_id);
    state.sessions.update(session_id, |session| session.edited = Some(stored));

    tracing::info!("✅ Image edited for session {}", session_id);
    Ok(Json(response))
}

pub async fn get_session(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<SessionSummary>, ApiError> {
    state.sessions.summary(id).map(Json).ok_or(ApiError::SessionNotFound(id))
}
