//! Pipeline handlers and their outward-facing vocabulary.
//!
//! A pipeline handler mediates between capture requests, a kernel media
//! graph and (for ISP pipelines) an image processing algorithm. Two handlers
//! live here: [`rkisp1::RkIsp1Pipeline`], the three-node ISP pipeline with
//! per-frame IPA exchange, and [`simple::SimplePipeline`], a single-stage
//! capture path with no ISP and no IPA.

pub mod rkisp1;
pub mod simple;

use crate::error::Result;
use crate::format::{PixelFormat, Size, SubdeviceFormat};
use crate::request::{Request, StreamId};

/// The role a stream plays for the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    /// Full-resolution still capture.
    StillCapture,
    /// Continuous video capture.
    VideoRecording,
    /// Preview.
    Viewfinder,
}

/// Result of validating a camera configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigStatus {
    /// The configuration can be applied as-is.
    Valid,
    /// The configuration was rewritten to something the pipeline supports.
    Adjusted,
    /// The configuration cannot be applied.
    Invalid,
}

/// Where a stream's buffer memory comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryKind {
    /// The kernel allocates and exports the buffers.
    #[default]
    Internal,
    /// The application supplies dma-buf fds.
    External,
}

/// Configuration of a single stream.
#[derive(Clone, Debug, Default)]
pub struct StreamConfiguration {
    /// Output pixel format.
    pub pixel_format: PixelFormat,
    /// Output frame size.
    pub size: Size,
    /// Number of image buffers to allocate.
    pub buffer_count: u32,
    /// Buffer memory ownership.
    pub memory: MemoryKind,
    stream: Option<StreamId>,
}

impl StreamConfiguration {
    /// The stream this configuration was bound to by `configure`.
    pub fn stream(&self) -> Option<StreamId> {
        self.stream
    }

    pub(crate) fn set_stream(&mut self, stream: StreamId) {
        self.stream = Some(stream);
    }
}

/// A camera configuration: the stream set plus the sensor format selected
/// during validation.
#[derive(Clone, Debug, Default)]
pub struct CameraConfiguration {
    configs: Vec<StreamConfiguration>,
    sensor_format: SubdeviceFormat,
}

impl CameraConfiguration {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stream configuration.
    pub fn add(&mut self, config: StreamConfiguration) {
        self.configs.push(config);
    }

    /// Number of stream entries.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Check whether the configuration holds no streams.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// The stream entries.
    pub fn configs(&self) -> &[StreamConfiguration] {
        &self.configs
    }

    /// Mutable access to the stream entries.
    pub fn configs_mut(&mut self) -> &mut [StreamConfiguration] {
        &mut self.configs
    }

    /// The sensor format selected by the last validation.
    pub fn sensor_format(&self) -> SubdeviceFormat {
        self.sensor_format
    }

    pub(crate) fn set_sensor_format(&mut self, format: SubdeviceFormat) {
        self.sensor_format = format;
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.configs.truncate(len);
    }
}

/// Completion surface back to the application.
///
/// One callback object is registered at wiring time; the pipeline invokes
/// it from the scheduler thread. A request is handed to
/// [`request_completed`](Self::request_completed) exactly once in its
/// lifetime.
pub trait CameraCallbacks {
    /// An output buffer of an in-flight request has been filled.
    fn buffer_completed(&mut self, request: &Request, buffer: u32);

    /// The request is done; ownership returns to the application.
    fn request_completed(&mut self, request: Request);
}

/// The outward surface of a pipeline handler.
pub trait PipelineHandler {
    /// Produce a default configuration for the given roles. An empty role
    /// list yields an empty, unvalidated configuration.
    fn generate_configuration(&mut self, roles: &[StreamRole]) -> CameraConfiguration;

    /// Validate a configuration in place, adjusting what the pipeline
    /// cannot satisfy.
    fn validate(&mut self, config: &mut CameraConfiguration) -> ConfigStatus;

    /// Apply a configuration: route links, program formats, bind streams.
    fn configure(&mut self, config: &mut CameraConfiguration) -> Result<()>;

    /// Allocate kernel buffers for the configured streams.
    fn allocate_buffers(&mut self) -> Result<()>;

    /// Release all kernel buffers. Never aborts; failures are logged.
    fn free_buffers(&mut self) -> Result<()>;

    /// Start streaming.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming, abandoning any in-flight frames.
    fn stop(&mut self);

    /// Admit a request into the pipeline.
    fn queue_request(&mut self, request: Request) -> Result<()>;
}
