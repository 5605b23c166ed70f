// API handlers for the web server

use super::{
    SharedState,
    artifact_body::artifact_body,
    error::ApiError,
    extract_request_data::extract_request_image,
    image_codec::{decode_input_image, normalize_color_mode},
};
use crate::worker;
use axum::{
    extract::{Request, State},
    response::IntoResponse,
};
use axum_extra::response::Attachment;
use tracing::{debug, error, info};
use uuid::Uuid;

// --- POST /remove-background ---
// Removes the background of the uploaded image and streams back a PNG
pub async fn remove_background(
    State(state): State<SharedState>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = Uuid::new_v4();

    // Validation happens before any gate capacity or temp file is used
    let upload = extract_request_image(request).await?;
    info!(
        "Remove-background request: request_id={}, filename={:?}, content_type={}, bytes={}",
        request_id,
        upload.filename,
        upload.media_type,
        upload.data.len()
    );

    let filename = upload.processed_filename();
    let data = upload.data;
    let media_type = upload.media_type;
    let image = tokio::task::spawn_blocking(move || {
        decode_input_image(&data, Some(&media_type)).map(normalize_color_mode)
    })
    .await??;

    debug!(
        "Input image ready: {}x{} {:?}",
        image.width(),
        image.height(),
        image.color()
    );

    let token = state.gate.acquire().await?;
    debug!(
        "Admitted request {} ({} of {} slots in use)",
        request_id,
        state.gate.in_flight(),
        state.gate.capacity()
    );

    // The token moves into the blocking task so it is released when the
    // removal actually ends, even if this handler stops waiting for it.
    let remover = state.remover.clone();
    let temp_files = state.temp_files.clone();
    let task = tokio::task::spawn_blocking(move || {
        let _token = token;
        worker::process_image(remover.as_ref(), &temp_files, &image)
    });

    let artifact = match tokio::time::timeout(state.removal_timeout, task).await {
        Ok(joined) => joined?.inspect_err(|err| {
            error!("Processing failed for request {}: {}", request_id, err);
        })?,
        Err(_) => {
            error!(
                "Processing timed out for request {} after {:?}",
                request_id, state.removal_timeout
            );
            return Err(ApiError::ProcessingFailure(format!(
                "background removal timed out after {} s",
                state.removal_timeout.as_secs()
            )));
        }
    };

    info!(
        "Request {} processed, streaming {} as {}",
        request_id,
        artifact.path().display(),
        filename
    );

    let body = artifact_body(artifact).await.map_err(|e| {
        ApiError::ProcessingFailure(format!("failed to open processed image: {}", e))
    })?;

    Ok(Attachment::new(body)
        .filename(filename)
        .content_type(mime::IMAGE_PNG.essence_str()))
}
