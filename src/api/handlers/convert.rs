use crate::api::error::AppError;
use crate::config::ARCHIVE_EXTENSION;
use crate::models::{Archive, UploadRequest};
use crate::utils::validation::{ValidationError, validate_file_size};
use axum::{
    body::Body,
    extract::{Multipart, State, multipart::MultipartError, multipart::MultipartRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::BytesMut;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use utoipa::ToSchema;

/// Multipart field carrying the key file
pub const KEY_FIELD: &str = "key";

const FALLBACK_STEM_CHARS: usize = 60;

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[utoipa::path(
    post,
    path = "/convert",
    request_body(content = Multipart, description = "PuTTY private key in the `key` field", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Zip archive holding the OpenSSH private and public key", content_type = "application/octet-stream", body = Vec<u8>),
        (status = 400, description = "Missing file or wrong extension", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "Conversion failed", body = ErrorResponse)
    ),
    tag = "convert"
)]
pub async fn convert_key(
    State(state): State<crate::AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let max_size = state.config.max_file_size_bytes();
    let mut upload: Option<UploadRequest> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        if field.name() != Some(KEY_FIELD) {
            continue;
        }
        if upload.is_some() {
            return Err(AppError::BadRequest(
                "Only one key file can be converted per request".to_string(),
            ));
        }

        let file_name = field.file_name().map(|s| s.to_string());
        let mut data = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_size))?
        {
            // Stop buffering as soon as the limit is crossed
            validate_file_size(data.len() + chunk.len(), max_size)?;
            data.extend_from_slice(&chunk);
        }

        upload = Some(UploadRequest {
            file_name,
            declared_size: data.len(),
            data: data.freeze(),
        });
    }

    let upload = upload.unwrap_or(UploadRequest {
        file_name: None,
        data: bytes::Bytes::new(),
        declared_size: 0,
    });

    // Detached so a client disconnect cannot abort the pipeline before cleanup
    let service = state.conversion_service.clone();
    let archive = tokio::spawn(async move { service.process(upload).await })
        .await
        .map_err(|e| AppError::Internal(format!("Conversion task failed: {}", e)))??;

    tracing::info!(
        file_name = %archive.file_name,
        size = archive.bytes.len(),
        "Archive sent"
    );
    Ok(archive_response(archive))
}

fn multipart_error(e: MultipartError, max_size: usize) -> AppError {
    let err_msg = e.to_string();
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE || err_msg.contains("length limit exceeded") {
        AppError::Validation(ValidationError::SizeExceeded {
            max_mb: max_size / 1024 / 1024,
        })
    } else {
        AppError::BadRequest(err_msg)
    }
}

/// Binary attachment response for a finished archive
pub fn archive_response(archive: Archive) -> Response {
    let fallback_filename = ascii_fallback(&archive.file_name);
    let encoded_filename = utf8_percent_encode(&archive.file_name, NON_ALPHANUMERIC).to_string();
    let content_disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    );

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                mime::APPLICATION_OCTET_STREAM.as_ref().to_string(),
            ),
            (header::CONTENT_DISPOSITION, content_disposition),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from(archive.bytes),
    )
        .into_response()
}

/// Plain `filename=` value for clients that ignore `filename*`
fn ascii_fallback(file_name: &str) -> String {
    let suffix = format!(".{}", ARCHIVE_EXTENSION);
    let stem = file_name.strip_suffix(&suffix).unwrap_or(file_name);
    let stem: String = stem
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && *c != '"' && *c != '\\')
        .take(FALLBACK_STEM_CHARS)
        .collect();
    let stem = stem.trim();

    if stem.is_empty() {
        format!("keys{}", suffix)
    } else {
        format!("{}{}", stem, suffix)
    }
}
