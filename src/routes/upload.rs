use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::upload::UploadResponse;
use crate::services::ingest::IngressError;

const FILE_FIELD: &str = "file";

/// POST /upload — accept an image as multipart `file` field or raw body.
pub async fn upload(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<UploadResponse>, Response> {
    tracing::info!("Upload request received");
    metrics::counter!("resize_uploads_total").increment(1);

    let (data, filename) = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(IntoResponse::into_response)?;
        read_file_field(multipart)
            .await
            .map_err(IntoResponse::into_response)?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(IntoResponse::into_response)?;
        (body.to_vec(), None)
    };

    let response = state
        .ingress
        .submit(data, filename.as_deref())
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(Json(response))
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

/// Bytes and filename of the `file` field; empty if the field is absent.
async fn read_file_field(
    mut multipart: Multipart,
) -> Result<(Vec<u8>, Option<String>), IngressError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            let filename = field.file_name().map(str::to_string);
            let data = field.bytes().await?;
            return Ok((data.to_vec(), filename));
        }
    }

    Ok((Vec::new(), None))
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match self {
            IngressError::EmptyPayload => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            IngressError::Multipart(err) => {
                tracing::warn!(error = %err, "Rejected malformed multipart upload");
                (err.status(), err.body_text()).into_response()
            }
            err => {
                tracing::error!(error = %err, "Upload failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {err}")).into_response()
            }
        }
    }
}
