use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use image::ImageFormat;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};

/// Substrings that mark an upstream refusal as a content-safety rejection.
const MODERATION_MARKERS: [&str; 4] = [
    "moderation_blocked",
    "content_policy_violation",
    "safety system",
    "safety_violations",
];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("request blocked by content moderation: {0}")]
    ModerationBlocked(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("response data is empty")]
    EmptyResponse,
    #[error("no image URL or base64 data found in the response")]
    NoPayload,
    #[error("failed to download image from {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("invalid base64 image payload: {0}")]
    Decode(String),
    #[error("source image could not be read: {0}")]
    InvalidSourceImage(String),
}

impl ImageError {
    /// Stable snake_case name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageError::Configuration(_) => "configuration",
            ImageError::ModerationBlocked(_) => "moderation_blocked",
            ImageError::Upstream(_) => "upstream",
            ImageError::EmptyResponse => "empty_response",
            ImageError::NoPayload => "no_payload",
            ImageError::Download { .. } => "download",
            ImageError::Decode(_) => "decode",
            ImageError::InvalidSourceImage(_) => "invalid_source_image",
        }
    }

    fn upstream(message: String) -> Self {
        let lower = message.to_ascii_lowercase();
        if MODERATION_MARKERS.iter().any(|m| lower.contains(m)) {
            ImageError::ModerationBlocked(message)
        } else {
            ImageError::Upstream(message)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Url,
    Inline,
}

#[derive(Debug, Clone)]
pub struct ImageResult {
    pub bytes: Bytes,
    pub source: ImageSource,
    pub origin_url: Option<String>,
    pub mime_type: &'static str,
}

impl ImageResult {
    fn new(bytes: Bytes, source: ImageSource, origin_url: Option<String>) -> Self {
        let mime_type = sniff_mime(&bytes);
        Self { bytes, source, origin_url, mime_type }
    }
}

#[async_trait]
pub trait ImageService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        size: &str,
    ) -> Result<ImageResult, ImageError>;

    async fn edit(
        &self,
        prompt: &str,
        source_image: &[u8],
        model: &str,
    ) -> Result<ImageResult, ImageError>;
}

/// Client for the OpenAI Images API (or anything speaking the same shape).
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), api_key, base_url: base_url.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_key.clone(), config.api_base.clone())
    }

    fn api_key(&self) -> Result<&str, ImageError> {
        self.api_key.as_deref().ok_or(ImageError::Configuration(ConfigError::MissingApiKey))
    }

    async fn read_response(&self, response: Response) -> Result<ImagesResponse, ImageError> {
        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text =
            response.text().await.map_err(|e| ImageError::upstream(e.to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            let message = match serde_json::from_str::<ErrorEnvelope>(&response_text) {
                Ok(env) => {
                    let code = env.error.code.or(env.error.kind).unwrap_or_default();
                    format!("HTTP {} {}: {}", status.as_u16(), code, env.error.message)
                }
                Err(_) => format!("HTTP {}: {}", status.as_u16(), response_text),
            };
            return Err(ImageError::upstream(message));
        }

        info!("📥 Raw Images API response: {}", truncated_for_log(&response_text));

        serde_json::from_str(&response_text).map_err(|e| {
            ImageError::Upstream(format!(
                "parse error: {}: {}",
                e,
                truncated_for_log(&response_text)
            ))
        })
    }

    /// Turn the first result entry into bytes, fetching it when only a URL came back.
    async fn resolve(&self, parsed: ImagesResponse) -> Result<ImageResult, ImageError> {
        let Some(entry) = parsed.data.into_iter().next() else {
            warn!("⚠️ Response data is empty");
            return Err(ImageError::EmptyResponse);
        };

        if let Some(url) = entry.url.filter(|u| !u.is_empty()) {
            let bytes = self.download(&url).await?;
            info!("🖼️ Downloaded {} bytes from {}", bytes.len(), url);
            return Ok(ImageResult::new(bytes, ImageSource::Url, Some(url)));
        }

        if let Some(b64) = entry.b64_json.filter(|b| !b.is_empty()) {
            info!("🖼️ Inline image payload: {}", preview(&b64));
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64.as_bytes())
                .map_err(|e| ImageError::Decode(e.to_string()))?;
            return Ok(ImageResult::new(Bytes::from(bytes), ImageSource::Inline, None));
        }

        warn!("⚠️ No image URL or base64 data found in the response");
        Err(ImageError::NoPayload)
    }

    async fn download(&self, url: &str) -> Result<Bytes, ImageError> {
        let fail = |reason: String| ImageError::Download { url: url.to_string(), reason };
        let response = self.client.get(url).send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            error!("❌ Failed to download image: HTTP {}", status);
            return Err(fail(format!("HTTP {}", status.as_u16())));
        }
        response.bytes().await.map_err(|e| fail(e.to_string()))
    }
}

#[async_trait]
impl ImageService for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        size: &str,
    ) -> Result<ImageResult, ImageError> {
        let api_key = self.api_key()?;
        let url = format!("{}/images/generations", self.base_url);
        info!("🔗 Making request to: {}", url);

        let request_body = json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "size": size,
        });
        info!("📤 Request body: {}", request_body);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ImageError::upstream(e.to_string()))?;

        let parsed = self.read_response(response).await?;
        self.resolve(parsed).await
    }

    async fn edit(
        &self,
        prompt: &str,
        source_image: &[u8],
        model: &str,
    ) -> Result<ImageResult, ImageError> {
        let api_key = self.api_key()?;
        let png = ensure_png(source_image)?;
        let url = format!("{}/images/edits", self.base_url);
        info!(
            "🔗 Making edit request to: {} ({} byte source, prompt: {})",
            url,
            png.len(),
            prompt
        );

        let image_part = multipart::Part::bytes(png)
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| ImageError::Upstream(e.to_string()))?;
        let form = multipart::Form::new()
            .text("model", model.to_string())
            .text("prompt", prompt.to_string())
            .part("image", image_part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImageError::upstream(e.to_string()))?;

        let parsed = self.read_response(response).await?;
        self.resolve(parsed).await
    }
}

/// The edits endpoint only takes PNG; anything else decodable is re-encoded.
pub fn ensure_png(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Png)) {
        return Ok(bytes.to_vec());
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ImageError::InvalidSourceImage(e.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ImageError::InvalidSourceImage(e.to_string()))?;
    info!("🔄 Re-encoded {} byte source image as PNG", bytes.len());
    Ok(out.into_inner())
}

pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

fn preview(data: &str) -> String {
    if data.len() > 50 {
        format!("{}...[{} chars total]", data.get(..50).unwrap_or_default(), data.len())
    } else {
        data.to_string()
    }
}

// Shorten inline base64 payloads so responses stay readable in the log.
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "b64_json" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 && s.is_ascii() {
                            let short =
                                format!("{}...[truncated {} chars]", &s[..50], s.len() - 50);
                            *val = serde_json::Value::String(short);
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn truncated_for_log(text: &str) -> String {
    if text.len() <= 1000 {
        return text.to_string();
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(mut value) => {
            truncate_base64_in_json(&mut value);
            value.to_string()
        }
        Err(_) => format!("{}...", text.chars().take(1000).collect::<String>()),
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Multipart,
        http::{header, HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::Arc;

    /// Bind a local stub of the Images API; `build` receives its base URL.
    async fn stub(build: impl FnOnce(String) -> Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = build(base.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn answering(body: Value) -> impl FnOnce(String) -> Router {
        move |_| {
            Router::new().route("/images/generations", post(move || async move { Json(body) }))
        }
    }

    fn client(base: String) -> OpenAiClient {
        OpenAiClient::new(Some("sk-test".into()), base)
    }

    fn answer_with_url(url: String) -> axum::routing::MethodRouter {
        post(move || async move { Json(json!({ "data": [{ "url": url }] })) })
    }

    fn tiny_image(format: ImageFormat) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn inline_payload_is_decoded() {
        let png = tiny_image(ImageFormat::Png);
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
        let base = stub(answering(json!({ "data": [{ "b64_json": b64 }] }))).await;

        let result = client(base).generate("a bowl", "gpt-image-1", "1024x1024").await.unwrap();
        assert_eq!(result.source, ImageSource::Inline);
        assert_eq!(result.origin_url, None);
        assert_eq!(result.bytes.as_ref(), png.as_slice());
        assert_eq!(result.mime_type, "image/png");
    }

    #[tokio::test]
    async fn url_payload_is_fetched() {
        let base = stub(|base| {
            let url = format!("{base}/files/out.png");
            Router::new()
                .route("/images/generations", answer_with_url(url))
                .route("/files/out.png", get(|| async { b"fake-image-bytes".to_vec() }))
        })
        .await;

        let result =
            client(base.clone()).generate("a vase", "dall-e-3", "1024x1024").await.unwrap();
        assert_eq!(result.source, ImageSource::Url);
        assert_eq!(result.origin_url, Some(format!("{base}/files/out.png")));
        assert_eq!(result.bytes.as_ref(), b"fake-image-bytes");
        assert_eq!(result.mime_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn failed_download_is_reported() {
        let base = stub(|base| {
            let url = format!("{base}/files/gone.png");
            Router::new()
                .route("/images/generations", answer_with_url(url))
                .route("/files/gone.png", get(|| async { StatusCode::NOT_FOUND }))
        })
        .await;

        let err = client(base).generate("a cup", "dall-e-3", "1024x1024").await.unwrap_err();
        match err {
            ImageError::Download { url, reason } => {
                assert!(url.ends_with("/files/gone.png"));
                assert_eq!(reason, "HTTP 404");
            }
            other => panic!("expected download error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_data_is_an_empty_response() {
        let base = stub(answering(json!({ "data": [] }))).await;
        let err =
            client(base).generate("a plate", "gpt-image-1", "1024x1024").await.unwrap_err();
        assert!(matches!(err, ImageError::EmptyResponse), "{err:?}");
        assert_eq!(err.kind(), "empty_response");
    }

    #[tokio::test]
    async fn entry_without_url_or_payload_is_no_payload() {
        let entry = json!({ "revised_prompt": "x", "url": null });
        let base = stub(answering(json!({ "data": [entry] }))).await;
        let err =
            client(base).generate("a plate", "gpt-image-1", "1024x1024").await.unwrap_err();
        assert!(matches!(err, ImageError::NoPayload), "{err:?}");
    }

    #[tokio::test]
    async fn bad_base64_is_a_decode_error() {
        let base = stub(answering(json!({ "data": [{ "b64_json": "@@not base64@@" }] }))).await;
        let err =
            client(base).generate("a plate", "gpt-image-1", "1024x1024").await.unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn moderation_rejection_is_classified() {
        let base = stub(|_| {
            Router::new().route(
                "/images/generations",
                post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": {
                            "message": "Your request was rejected by the safety system.",
                            "type": "image_generation_user_error",
                            "code": "moderation_blocked"
                        }})),
                    )
                }),
            )
        })
        .await;

        let err =
            client(base).generate("something", "gpt-image-1", "1024x1024").await.unwrap_err();
        assert!(matches!(err, ImageError::ModerationBlocked(_)), "{err:?}");
        assert_eq!(err.kind(), "moderation_blocked");
    }

    #[tokio::test]
    async fn other_upstream_failures_stay_generic() {
        let base = stub(|_| {
            Router::new().route(
                "/images/generations",
                post(|| async {
                    let error = json!({
                        "message": "Incorrect API key provided",
                        "code": "invalid_api_key"
                    });
                    (StatusCode::UNAUTHORIZED, Json(json!({ "error": error })))
                }),
            )
        })
        .await;

        let err = client(base).generate("a bowl", "gpt-image-1", "1024x1024").await.unwrap_err();
        match err {
            ImageError::Upstream(message) => {
                assert_eq!(message, "HTTP 401 invalid_api_key: Incorrect API key provided");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        // nothing listens on port 9; a network attempt would surface as Upstream
        let client = OpenAiClient::new(None, "http://127.0.0.1:9");
        let err = client.generate("a bowl", "gpt-image-1", "1024x1024").await.unwrap_err();
        assert!(matches!(err, ImageError::Configuration(ConfigError::MissingApiKey)), "{err:?}");
        let err =
            client.edit("make it taller", b"not an image", "gpt-image-1").await.unwrap_err();
        assert!(matches!(err, ImageError::Configuration(_)), "{err:?}");
    }

    #[derive(Debug, Clone)]
    struct FormField {
        name: String,
        file_name: Option<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    }

    #[tokio::test]
    async fn edit_sends_multipart_png() {
        let edited = tiny_image(ImageFormat::Png);
        let b64 = base64::engine::general_purpose::STANDARD.encode(&edited);
        let seen: Arc<Mutex<Vec<FormField>>> = Arc::default();
        let auth: Arc<Mutex<Option<String>>> = Arc::default();
        let (seen_in, auth_in) = (seen.clone(), auth.clone());
        let base = stub(move |_| {
            Router::new().route(
                "/images/edits",
                post(move |headers: HeaderMap, mut form: Multipart| async move {
                    *auth_in.lock() = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let mut fields = Vec::new();
                    while let Some(field) = form.next_field().await.unwrap() {
                        let name = field.name().unwrap_or_default().to_string();
                        let file_name = field.file_name().map(str::to_string);
                        let content_type = field.content_type().map(str::to_string);
                        let data = field.bytes().await.unwrap().to_vec();
                        fields.push(FormField { name, file_name, content_type, data });
                    }
                    *seen_in.lock() = fields;
                    Json(json!({ "data": [{ "b64_json": b64 }] }))
                }),
            )
        })
        .await;

        let source = tiny_image(ImageFormat::Jpeg);
        let result = client(base)
            .edit("change the color to black", &source, "gpt-image-1")
            .await
            .unwrap();
        assert_eq!(result.source, ImageSource::Inline);
        assert_eq!(result.bytes.as_ref(), edited.as_slice());
        assert_eq!(auth.lock().as_deref(), Some("Bearer sk-test"));

        let fields = seen.lock().clone();
        let field = |name: &str| {
            fields
                .iter()
                .find(|f| f.name == name)
                .cloned()
                .unwrap_or_else(|| panic!("missing form field {name}: {fields:?}"))
        };
        assert_eq!(field("model").data, b"gpt-image-1");
        assert_eq!(field("prompt").data, b"change the color to black");
        let upload = field("image");
        assert_eq!(upload.file_name.as_deref(), Some("image.png"));
        assert_eq!(upload.content_type.as_deref(), Some("image/png"));
        assert!(matches!(image::guess_format(&upload.data), Ok(ImageFormat::Png)));
    }

    #[tokio::test]
    async fn edit_rejects_unreadable_source() {
        let client = OpenAiClient::new(Some("sk-test".into()), "http://127.0.0.1:9");
        let err = client.edit("add texture", b"plain text", "gpt-image-1").await.unwrap_err();
        assert!(matches!(err, ImageError::InvalidSourceImage(_)), "{err:?}");
    }

    #[test]
    fn jpeg_sources_are_converted_to_png() {
        let jpeg = tiny_image(ImageFormat::Jpeg);
        assert_eq!(sniff_mime(&jpeg), "image/jpeg");
        let png = ensure_png(&jpeg).unwrap();
        assert_eq!(sniff_mime(&png), "image/png");
    }

    #[test]
    fn large_payloads_are_truncated_in_logs() {
        let body = json!({ "data": [{ "b64_json": "A".repeat(2000) }] }).to_string();
        let logged = truncated_for_log(&body);
        assert!(logged.contains("[truncated 1950 chars]"));
        assert!(logged.len() < 200);
    }
}
