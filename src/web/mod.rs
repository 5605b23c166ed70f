// Web server module
// Handles the HTTP API for background removal

mod app;
mod artifact_body;
mod error;
mod extract_request_data;
mod handlers;
mod image_codec;
mod listeners;
mod models;

pub use app::create_app;
pub use listeners::create_listener;

use crate::{gate::AdmissionGate, removal::BackgroundRemover, temp_files::TempFileManager};
use std::{sync::Arc, time::Duration};

// Maximum allowed size for image upload requests
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024; // 100MB

pub const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// State shared by all request handlers.
pub struct AppState {
    pub gate: AdmissionGate,
    pub temp_files: TempFileManager,
    pub remover: Arc<dyn BackgroundRemover>,
    pub removal_timeout: Duration,
    pub max_upload_bytes: usize,
}

pub type SharedState = Arc<AppState>;
