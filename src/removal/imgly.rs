// Segmentation-model remover backed by the imgly-bgremove inference stack.

use super::{BackgroundRemover, RemovalError};
use image::DynamicImage;
use imgly_bgremove::{
    BackendFactory, BackendType, BackgroundRemovalProcessor, BgRemovalError, ExecutionProvider,
    InferenceBackend, ModelManager, ModelSource, ModelSpec, OnnxBackend, ProcessorConfig,
    ProcessorConfigBuilder,
};
use tracing::debug;

/// Hands the processor the ONNX Runtime engine, the only one compiled in.
struct ServerBackendFactory;

impl BackendFactory for ServerBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> imgly_bgremove::Result<Box<dyn InferenceBackend>> {
        match backend_type {
            BackendType::Onnx => Ok(Box::new(OnnxBackend::with_model_manager(model_manager))),
            BackendType::Tract => Err(BgRemovalError::invalid_config(
                "Tract backend is not compiled into this server",
            )),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx]
    }
}

/// Runs a segmentation model over each image.
///
/// Inference backends are not `Send`, so every call builds its own processor
/// on the calling blocking thread. ONNX sessions are reused through the
/// library's session cache.
#[derive(Debug, Clone)]
pub struct ImglyRemover {
    config: ProcessorConfig,
}

impl ImglyRemover {
    pub fn new(model: ModelSource) -> Result<Self, RemovalError> {
        let config = ProcessorConfigBuilder::new()
            .model_spec(ModelSpec {
                source: model,
                variant: None,
            })
            .backend_type(BackendType::Onnx)
            .execution_provider(ExecutionProvider::Auto)
            .build()
            .map_err(|e| RemovalError::with_source("invalid model configuration", e))?;

        Ok(Self { config })
    }

    pub fn model_name(&self) -> String {
        self.config.model_spec.source.display_name()
    }
}

impl BackgroundRemover for ImglyRemover {
    fn remove(&self, image: &DynamicImage) -> Result<DynamicImage, RemovalError> {
        let mut processor = BackgroundRemovalProcessor::with_factory(
            self.config.clone(),
            Box::new(ServerBackendFactory),
        )
        .map_err(|e| RemovalError::with_source("failed to create processor", e))?;

        processor
            .initialize()
            .map_err(|e| RemovalError::with_source("failed to load model", e))?;

        let result = processor
            .process_image(image)
            .map_err(|e| RemovalError::with_source("segmentation failed", e))?;

        debug!(
            "Segmented {}x{} image with {}",
            image.width(),
            image.height(),
            self.model_name()
        );
        Ok(result.image)
    }
}
