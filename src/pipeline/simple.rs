//! Single-stage capture pipeline for ISP-less platforms.
//!
//! Some CSI receivers deliver sensor data straight to memory with no ISP in
//! between and no per-frame algorithm to feed. This handler is what the
//! scheduler degrades to in that case: a request's buffer goes directly
//! into the capture node, and the first completion finishes both the buffer
//! and the request.

use tracing::{debug, error, warn};

use crate::buffer::BufferPool;
use crate::error::{Error, Result};
use crate::format::{mbus, PixelFormat, Size, V4l2DeviceFormat};
use crate::media::{DeviceEnumerator, DeviceMatch, MediaDevice};
use crate::pipeline::{
    CameraCallbacks, CameraConfiguration, ConfigStatus, MemoryKind, PipelineHandler,
    StreamConfiguration, StreamRole,
};
use crate::request::{Request, StreamId};
use crate::sensor::CameraSensor;
use crate::video::{DequeuedBuffer, Subdevice, VideoDevice};

const BUFFER_COUNT: u32 = 3;

const MIN_SIZE: Size = Size::new(32, 16);
const MAX_SIZE: Size = Size::new(4416, 3312);

/// Static description of one supported single-stage platform.
#[derive(Debug)]
struct PlatformInfo {
    driver: &'static str,
    phys: &'static [&'static str],
    subdevs: &'static [&'static str],
    videos: &'static [&'static str],
    pixel_format: PixelFormat,
    mbus_code: u32,
    max_size: Size,
}

const PLATFORMS: &[PlatformInfo] = &[
    PlatformInfo {
        driver: "sun6i-csi",
        phys: &["sun6i-csi"],
        subdevs: &[],
        videos: &["sun6i-csi"],
        pixel_format: PixelFormat::UYVY,
        mbus_code: mbus::UYVY8_2X8,
        max_size: Size::new(1280, 720),
    },
    PlatformInfo {
        driver: "qcom-camss",
        phys: &["msm_csiphy0"],
        subdevs: &["msm_csid0", "msm_ispif0"],
        videos: &["msm_vfe0_video0"],
        pixel_format: PixelFormat::SRGGB10P,
        mbus_code: mbus::SRGGB10_1X10,
        max_size: Size::new(1920, 1080),
    },
];

/// Pipeline handler for single-stage capture platforms.
pub struct SimplePipeline {
    media: Box<dyn MediaDevice>,
    // Held open for the lifetime of the pipeline; the capture path fails if
    // the receiver or intermediate subdevices are released.
    _phys: Vec<Box<dyn Subdevice>>,
    _subdevs: Vec<Box<dyn Subdevice>>,
    videos: Vec<Box<dyn VideoDevice>>,

    sensor: Box<dyn CameraSensor>,
    callbacks: Box<dyn CameraCallbacks>,

    info: &'static PlatformInfo,
    stream: StreamId,
    stream_config: Option<StreamConfiguration>,
    video_pool: BufferPool,

    // Buffer index → request, the degenerate frame ledger.
    in_flight: Vec<(u32, Request)>,
    active_camera: Option<String>,
}

impl SimplePipeline {
    /// Match any supported platform, open its devices and bind the first
    /// sensor on the receiver.
    pub fn match_device(
        enumerator: &mut dyn DeviceEnumerator,
        callbacks: Box<dyn CameraCallbacks>,
    ) -> Result<Self> {
        for info in PLATFORMS {
            let mut dm = DeviceMatch::new(info.driver);
            for entity in info
                .phys
                .iter()
                .chain(info.subdevs.iter())
                .chain(info.videos.iter())
            {
                dm.add(*entity);
            }

            let Some(mut media) = enumerator.acquire(&dm) else {
                continue;
            };

            let mut phys = Vec::new();
            for entity in info.phys {
                phys.push(media.open_subdevice(entity)?);
            }

            let mut subdevs = Vec::new();
            for entity in info.subdevs {
                subdevs.push(media.open_subdevice(entity)?);
            }

            let mut videos = Vec::new();
            for entity in info.videos {
                videos.push(media.open_video(entity)?);
            }

            let sensors = media.sensor_entities(info.phys[0], 0);
            let sensor_entity = sensors.first().ok_or_else(|| {
                Error::Device(crate::video::DeviceError::NotFound(
                    "no sensor on receiver".into(),
                ))
            })?;
            let sensor = media.open_sensor(sensor_entity)?;

            return Ok(Self {
                media,
                _phys: phys,
                _subdevs: subdevs,
                videos,
                sensor,
                callbacks,
                info,
                stream: StreamId(0),
                stream_config: None,
                video_pool: BufferPool::new(),
                in_flight: Vec::new(),
                active_camera: None,
            });
        }

        Err(Error::InvalidConfiguration(
            "no supported single-stage platform".into(),
        ))
    }

    /// Image buffer completion from the capture node. Completes the buffer
    /// and its request immediately.
    pub fn image_buffer_ready(&mut self, buffer: DequeuedBuffer) {
        if self.active_camera.is_none() {
            debug!(index = buffer.index, "image completion while stopped");
            return;
        }

        let Some(pos) = self.in_flight.iter().position(|(i, _)| *i == buffer.index) else {
            debug!(index = buffer.index, "completion for untracked buffer");
            return;
        };

        let (index, mut request) = self.in_flight.remove(pos);
        request.complete_buffer(index);
        self.callbacks.buffer_completed(&request, index);
        self.callbacks.request_completed(request);
    }

    /// Number of requests waiting on the kernel.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl PipelineHandler for SimplePipeline {
    fn generate_configuration(&mut self, roles: &[StreamRole]) -> CameraConfiguration {
        let mut config = CameraConfiguration::new();
        if roles.is_empty() {
            return config;
        }

        config.add(StreamConfiguration {
            pixel_format: self.info.pixel_format,
            size: self.sensor.resolution(),
            buffer_count: BUFFER_COUNT,
            memory: MemoryKind::Internal,
            ..Default::default()
        });

        self.validate(&mut config);
        config
    }

    fn validate(&mut self, config: &mut CameraConfiguration) -> ConfigStatus {
        if config.is_empty() {
            return ConfigStatus::Invalid;
        }

        let mut status = ConfigStatus::Valid;

        if config.len() > 1 {
            config.truncate(1);
            status = ConfigStatus::Adjusted;
        }

        let sensor_format = {
            let cfg = &mut config.configs_mut()[0];

            // The platform produces exactly one format.
            if cfg.pixel_format != self.info.pixel_format {
                debug!(format = %cfg.pixel_format, "adjusting pixel format");
                cfg.pixel_format = self.info.pixel_format;
                status = ConfigStatus::Adjusted;
            }

            let mut sensor_format = self.sensor.pick_format(&[self.info.mbus_code], cfg.size);
            if sensor_format.size.is_empty() {
                sensor_format.size = self.sensor.resolution();
            }

            let requested = cfg.size;

            let max_width = sensor_format.size.width.min(self.info.max_size.width);
            let max_height = sensor_format.size.height.min(self.info.max_size.height);

            if cfg.size.is_empty() {
                cfg.size.width = max_width;
                cfg.size.height =
                    max_width * sensor_format.size.height / sensor_format.size.width;
            }

            cfg.size.width = cfg.size.width.min(max_width);
            cfg.size.height = cfg.size.height.min(max_height);

            cfg.size.width = cfg.size.width.clamp(MIN_SIZE.width, MAX_SIZE.width);
            cfg.size.height = cfg.size.height.clamp(MIN_SIZE.height, MAX_SIZE.height);

            if cfg.size != requested {
                debug!(from = %requested, to = %cfg.size, "adjusting stream size");
                status = ConfigStatus::Adjusted;
            }

            cfg.buffer_count = BUFFER_COUNT;

            sensor_format
        };

        config.set_sensor_format(sensor_format);

        status
    }

    fn configure(&mut self, config: &mut CameraConfiguration) -> Result<()> {
        if self.validate(config) == ConfigStatus::Invalid {
            return Err(Error::InvalidConfiguration("no usable stream".into()));
        }

        // Route this camera's sensor to the receiver, disable the others.
        let sensor_entity = self.sensor.entity().to_string();
        let receiver = self.info.phys[0];
        for entity in self.media.sensor_entities(receiver, 0) {
            let enable = entity == sensor_entity;
            if self.media.link_enabled(&entity, 0, receiver, 0) == enable {
                continue;
            }

            debug!(sensor = %entity, enable, "routing sensor link to receiver");
            self.media.set_link(&entity, 0, receiver, 0, enable)?;
        }

        let mut format = config.sensor_format();
        debug!(%format, "configuring sensor");
        self.sensor.set_format(&mut format)?;

        let cfg = &mut config.configs_mut()[0];

        let mut output = V4l2DeviceFormat {
            fourcc: cfg.pixel_format,
            size: cfg.size,
            planes_count: 2,
        };
        self.videos[0].set_format(&mut output)?;

        if output.size != cfg.size || output.fourcc != cfg.pixel_format {
            error!(format = %cfg.pixel_format, size = %cfg.size, "capture format rejected");
            return Err(Error::InvalidConfiguration(format!(
                "unable to configure capture in {} {}",
                cfg.pixel_format, cfg.size
            )));
        }

        cfg.set_stream(self.stream);
        self.stream_config = Some(cfg.clone());

        Ok(())
    }

    fn allocate_buffers(&mut self) -> Result<()> {
        let cfg = self
            .stream_config
            .clone()
            .ok_or_else(|| Error::InvalidConfiguration("pipeline is not configured".into()))?;

        self.video_pool.create(cfg.buffer_count);
        let result = match cfg.memory {
            MemoryKind::Internal => self.videos[0].export_buffers(&mut self.video_pool),
            MemoryKind::External => self.videos[0].import_buffers(&mut self.video_pool),
        };

        if let Err(e) = result {
            self.video_pool.destroy();
            return Err(e.into());
        }

        Ok(())
    }

    fn free_buffers(&mut self) -> Result<()> {
        if let Err(e) = self.videos[0].release_buffers() {
            error!(error = %e, "failed to release image buffers");
        }
        self.video_pool.destroy();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if let Err(e) = self.videos[0].stream_on() {
            error!(error = %e, "failed to start capture stream");
            return Err(e.into());
        }

        self.active_camera = Some(self.sensor.entity().to_string());
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.videos[0].stream_off() {
            warn!(error = %e, "failed to stop capture stream");
        }

        if !self.in_flight.is_empty() {
            debug!(
                requests = self.in_flight.len(),
                "abandoning in-flight requests on stop"
            );
            self.in_flight.clear();
        }

        self.active_camera = None;
    }

    fn queue_request(&mut self, request: Request) -> Result<()> {
        let Some(index) = request.find_buffer(self.stream) else {
            return Err(Error::InvalidRequest(format!(
                "no buffer for stream {:?} in request {}",
                self.stream,
                request.cookie()
            )));
        };

        self.videos[0].queue_buffer(index)?;
        self.in_flight.push((index, request));

        Ok(())
    }
}
