//! Pipeline handler for the Rockchip ISP1.
//!
//! The ISP exposes three video nodes: a parameters node the IPA's tuning
//! data is uploaded through, a statistics node the ISP's 3A measurements
//! come back on, and the capture node producing the image stream. Each
//! capture request borrows one parameter and one statistics buffer for the
//! lifetime of its frame, the IPA is told about the request, and a timeline
//! action enqueues all three buffers at the pipeline-delay-correct instant
//! before the frame's start of exposure.
//!
//! Everything here runs serialized on one thread: the host event dispatcher
//! delivers kernel completions, IPA replies and timer ticks as plain method
//! calls, and no entry point blocks.

use std::os::fd::AsRawFd;

use tracing::{debug, error, warn};

use crate::buffer::BufferPool;
use crate::clock::Clock;
use crate::controls::{ControlInfo, ControlInfoMap, ControlValue, AE_ENABLE};
use crate::error::{Error, Result};
use crate::format::{mbus, PixelFormat, Size, V4l2DeviceFormat};
use crate::frame::{FrameTable, PipelineBuffer};
use crate::ipa::{IpaAction, IpaBufferId, IpaBufferMapping, IpaEvent, IpaProxy, IpaStreamConfig};
use crate::media::{DeviceEnumerator, DeviceMatch, MediaDevice};
use crate::pipeline::{
    CameraCallbacks, CameraConfiguration, ConfigStatus, MemoryKind, PipelineHandler,
    StreamConfiguration, StreamRole,
};
use crate::request::{Request, StreamId};
use crate::sensor::CameraSensor;
use crate::timeline::{ActionPayload, FrameAction, Timeline};
use crate::video::{DequeuedBuffer, Subdevice, VideoDevice};

const MEDIA_DRIVER: &str = "rkisp1";
const ISP_ENTITY: &str = "rkisp1-isp-subdev";
const MAINPATH_ENTITY: &str = "rkisp1_mainpath";
const SELFPATH_ENTITY: &str = "rkisp1_selfpath";
const STAT_ENTITY: &str = "rkisp1-statistics";
const PARAM_ENTITY: &str = "rkisp1-input-params";
const DPHY_ENTITY: &str = "rockchip-sy-mipi-dphy";

const BUFFER_COUNT: u32 = 4;

const MIN_SIZE: Size = Size::new(32, 16);
const MAX_SIZE: Size = Size::new(4416, 3312);

/// Output formats the main path can produce.
const OUTPUT_FORMATS: [PixelFormat; 8] = [
    PixelFormat::YUYV,
    PixelFormat::YVYU,
    PixelFormat::VYUY,
    PixelFormat::NV16,
    PixelFormat::NV61,
    PixelFormat::NV21,
    PixelFormat::NV12,
    PixelFormat::GREY,
];

/// Sensor media-bus formats, deepest Bayer first.
const SENSOR_MBUS_CODES: [u32; 12] = [
    mbus::SBGGR12_1X12,
    mbus::SGBRG12_1X12,
    mbus::SGRBG12_1X12,
    mbus::SRGGB12_1X12,
    mbus::SBGGR10_1X10,
    mbus::SGBRG10_1X10,
    mbus::SGRBG10_1X10,
    mbus::SRGGB10_1X10,
    mbus::SBGGR8_1X8,
    mbus::SGBRG8_1X8,
    mbus::SGRBG8_1X8,
    mbus::SRGGB8_1X8,
];

/// The devices behind the matched `rkisp1` media graph.
pub struct RkIsp1Devices {
    /// The media controller graph.
    pub media: Box<dyn MediaDevice>,
    /// The MIPI D-PHY (CSI-2 receiver) subdevice.
    pub dphy: Box<dyn Subdevice>,
    /// The ISP subdevice.
    pub isp: Box<dyn Subdevice>,
    /// The main path capture node.
    pub video: Box<dyn VideoDevice>,
    /// The parameters upload node.
    pub param: Box<dyn VideoDevice>,
    /// The statistics download node.
    pub stat: Box<dyn VideoDevice>,
}

/// The Rockchip ISP1 pipeline handler and per-frame scheduler.
pub struct RkIsp1Pipeline {
    media: Box<dyn MediaDevice>,
    dphy: Box<dyn Subdevice>,
    isp: Box<dyn Subdevice>,
    video: Box<dyn VideoDevice>,
    param: Box<dyn VideoDevice>,
    stat: Box<dyn VideoDevice>,

    sensor: Box<dyn CameraSensor>,
    ipa: Box<dyn IpaProxy>,
    callbacks: Box<dyn CameraCallbacks>,
    clock: Box<dyn Clock>,

    stream: StreamId,
    stream_config: Option<StreamConfiguration>,

    video_pool: BufferPool,
    param_pool: BufferPool,
    stat_pool: BufferPool,
    ipa_buffers: Vec<IpaBufferId>,

    frames: FrameTable,
    timeline: Timeline,
    next_frame: u32,
    active_camera: Option<String>,
}

impl std::fmt::Debug for RkIsp1Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RkIsp1Pipeline")
            .field("stream", &self.stream)
            .field("stream_config", &self.stream_config)
            .field("next_frame", &self.next_frame)
            .field("active_camera", &self.active_camera)
            .finish_non_exhaustive()
    }
}

impl RkIsp1Pipeline {
    /// Wire a pipeline from already-opened devices.
    pub fn new(
        devices: RkIsp1Devices,
        sensor: Box<dyn CameraSensor>,
        ipa: Box<dyn IpaProxy>,
        callbacks: Box<dyn CameraCallbacks>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            media: devices.media,
            dphy: devices.dphy,
            isp: devices.isp,
            video: devices.video,
            param: devices.param,
            stat: devices.stat,
            sensor,
            ipa,
            callbacks,
            clock,
            stream: StreamId(0),
            stream_config: None,
            video_pool: BufferPool::new(),
            param_pool: BufferPool::new(),
            stat_pool: BufferPool::new(),
            ipa_buffers: Vec::new(),
            frames: FrameTable::new(),
            timeline: Timeline::new(),
            next_frame: 0,
            active_camera: None,
        }
    }

    /// Match an `rkisp1` media graph, open its devices, route the default
    /// links and bind the first sensor on the CSI-2 receiver.
    ///
    /// `load_ipa` locates the algorithm implementation; returning `None`
    /// fails the match with [`Error::IpaLoad`].
    pub fn match_device(
        enumerator: &mut dyn DeviceEnumerator,
        load_ipa: impl FnOnce() -> Option<Box<dyn IpaProxy>>,
        callbacks: Box<dyn CameraCallbacks>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let mut dm = DeviceMatch::new(MEDIA_DRIVER);
        dm.add(ISP_ENTITY);
        dm.add(SELFPATH_ENTITY);
        dm.add(MAINPATH_ENTITY);
        dm.add(STAT_ENTITY);
        dm.add(PARAM_ENTITY);
        dm.add(DPHY_ENTITY);

        let mut media = enumerator
            .acquire(&dm)
            .ok_or_else(|| Error::InvalidConfiguration("no rkisp1 media device".into()))?;

        let dphy = media.open_subdevice(DPHY_ENTITY)?;
        let isp = media.open_subdevice(ISP_ENTITY)?;
        let video = media.open_video(MAINPATH_ENTITY)?;
        let stat = media.open_video(STAT_ENTITY)?;
        let param = media.open_video(PARAM_ENTITY)?;

        // Default routing: D-PHY into the ISP, ISP out to the main path.
        media.disable_links()?;
        media.set_link(DPHY_ENTITY, 1, ISP_ENTITY, 0, true)?;
        media.set_link(ISP_ENTITY, 2, MAINPATH_ENTITY, 0, true)?;

        let sensors = media.sensor_entities(DPHY_ENTITY, 0);
        let sensor_entity = sensors.first().ok_or_else(|| {
            Error::Device(crate::video::DeviceError::NotFound(
                "no sensor on CSI-2 receiver".into(),
            ))
        })?;
        let sensor = media.open_sensor(sensor_entity)?;

        let ipa = load_ipa().ok_or(Error::IpaLoad)?;

        Ok(Self::new(
            RkIsp1Devices {
                media,
                dphy,
                isp,
                video,
                param,
                stat,
            },
            sensor,
            ipa,
            callbacks,
            clock,
        ))
    }

    /// The controls this camera exposes to applications.
    pub fn camera_controls(&self) -> ControlInfoMap {
        let mut controls = ControlInfoMap::new();
        controls.insert(
            AE_ENABLE,
            ControlInfo::new(ControlValue::Bool(false), ControlValue::Bool(true)),
        );
        controls
    }

    /// Number of frames currently in flight.
    pub fn in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Free parameter slots currently available.
    pub fn free_parameters(&self) -> usize {
        self.frames.free_parameters()
    }

    /// Free statistics slots currently available.
    pub fn free_statistics(&self) -> usize {
        self.frames.free_statistics()
    }

    /// The next frame number the scheduler will assign.
    pub fn next_frame(&self) -> u32 {
        self.next_frame
    }

    /// Earliest pending timeline deadline, for arming the host timer.
    pub fn next_deadline(&self) -> Option<crate::clock::ClockTime> {
        self.timeline.next_deadline()
    }

    /// Run every timeline action that is due. Called by the host event
    /// loop when the timer armed from [`next_deadline`](Self::next_deadline)
    /// fires; actions already due run on the next tick.
    pub fn advance(&mut self) {
        if self.active_camera.is_none() {
            return;
        }
        self.run_due_actions();
    }

    /// Image buffer completion from the capture node.
    pub fn image_buffer_ready(&mut self, buffer: DequeuedBuffer) {
        if self.active_camera.is_none() {
            debug!(index = buffer.index, "image completion while stopped");
            return;
        }

        // Re-anchor the exposure estimate before anything else so released
        // actions see the freshest timing.
        self.timeline
            .record_image_buffer(buffer.sequence, buffer.timestamp);

        // Recover from dropped frames.
        if self.next_frame <= buffer.sequence {
            self.next_frame = buffer.sequence + 1;
        }

        let cookie = {
            let Some(info) = self.frames.find_buffer(PipelineBuffer::Image(buffer.index)) else {
                return;
            };

            info.request.complete_buffer(buffer.index);
            self.callbacks.buffer_completed(&info.request, buffer.index);
            info.request.cookie()
        };

        self.run_due_actions();
        self.try_complete_request(cookie);
    }

    /// Parameter buffer completion from the parameters node.
    pub fn param_buffer_ready(&mut self, buffer: DequeuedBuffer) {
        if self.active_camera.is_none() {
            debug!(index = buffer.index, "parameters completion while stopped");
            return;
        }

        let cookie = {
            let Some(info) = self
                .frames
                .find_buffer(PipelineBuffer::Parameters(buffer.index))
            else {
                return;
            };

            info.param_dequeued = true;
            info.request.cookie()
        };

        self.try_complete_request(cookie);
    }

    /// Statistics buffer completion from the statistics node.
    ///
    /// Forwards the buffer to the IPA; completion waits for the metadata
    /// reply computed from these statistics.
    pub fn stat_buffer_ready(&mut self, buffer: DequeuedBuffer) {
        if self.active_camera.is_none() {
            debug!(index = buffer.index, "statistics completion while stopped");
            return;
        }

        let (frame, stat_buffer) = {
            let Some(info) = self
                .frames
                .find_buffer(PipelineBuffer::Statistics(buffer.index))
            else {
                return;
            };

            (info.frame, IpaBufferId::statistics(info.stat_slot))
        };

        self.ipa
            .process_event(IpaEvent::SignalStatBuffer { frame, stat_buffer });
    }

    /// An action from the IPA, keyed by the frame it concerns.
    pub fn queue_frame_action(&mut self, frame: u32, action: IpaAction) {
        if self.active_camera.is_none() {
            debug!(frame, "IPA action while stopped");
            return;
        }

        match action {
            IpaAction::SetSensorControls { controls } => {
                self.timeline.schedule(FrameAction {
                    frame,
                    payload: ActionPayload::SetSensor(controls),
                });
            }
            IpaAction::ParamsFilled => {
                if let Some(info) = self.frames.get(frame) {
                    info.param_filled = true;
                }
            }
            IpaAction::Metadata { metadata } => self.metadata_ready(frame, metadata),
        }
    }

    fn metadata_ready(&mut self, frame: u32, metadata: crate::controls::ControlList) {
        let cookie = {
            let Some(info) = self.frames.get(frame) else {
                return;
            };

            info.request.set_metadata(metadata);
            info.metadata_processed = true;
            info.request.cookie()
        };

        self.try_complete_request(cookie);
    }

    /// Complete the request iff every bound buffer is filled, the metadata
    /// is in and the kernel has returned the parameter buffer. Safe to call
    /// repeatedly; once the frame is retired further calls find nothing.
    fn try_complete_request(&mut self, cookie: u64) {
        let frame = {
            let Some(info) = self.frames.find_request(cookie) else {
                return;
            };

            if info.request.has_pending_buffers()
                || !info.metadata_processed
                || !info.param_dequeued
            {
                return;
            }

            info.frame
        };

        let Some(info) = self.frames.destroy(frame) else {
            return;
        };

        self.callbacks.request_completed(info.request);
    }

    fn run_due_actions(&mut self) {
        loop {
            let now = self.clock.now();
            let due = self.timeline.take_due(now);
            if due.is_empty() {
                break;
            }

            for action in due {
                self.execute_action(action);
            }
        }
    }

    fn execute_action(&mut self, action: FrameAction) {
        match action.payload {
            ActionPayload::SetSensor(controls) => {
                if let Err(e) = self.sensor.set_controls(&controls) {
                    warn!(frame = action.frame, error = %e, "failed to write sensor controls");
                }
            }
            ActionPayload::QueueBuffers => self.queue_buffers(action.frame),
        }
    }

    /// Hand the frame's buffers to the kernel: parameters (if the IPA
    /// filled them in time), then statistics, then the image buffer.
    fn queue_buffers(&mut self, frame: u32) {
        let (param_slot, stat_slot, image_index, param_filled) = {
            let Some(info) = self.frames.get(frame) else {
                error!(frame, "buffer enqueue for unknown frame");
                return;
            };

            (
                info.param_slot,
                info.stat_slot,
                info.image_index,
                info.param_filled,
            )
        };

        if param_filled {
            if let Err(e) = self.param.queue_buffer(param_slot) {
                error!(frame, error = %e, "failed to enqueue parameters buffer");
            }
        } else {
            warn!(
                frame,
                "parameters not ready on time, frame proceeds without ISP update"
            );
        }

        if let Err(e) = self.stat.queue_buffer(stat_slot) {
            error!(frame, error = %e, "failed to enqueue statistics buffer");
        }

        if let Err(e) = self.video.queue_buffer(image_index) {
            error!(frame, error = %e, "failed to enqueue image buffer");
        }
    }
}

impl PipelineHandler for RkIsp1Pipeline {
    fn generate_configuration(&mut self, roles: &[StreamRole]) -> CameraConfiguration {
        let mut config = CameraConfiguration::new();
        if roles.is_empty() {
            return config;
        }

        config.add(StreamConfiguration {
            pixel_format: PixelFormat::NV12,
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

        // The ISP produces exactly one stream.
        if config.len() > 1 {
            config.truncate(1);
            status = ConfigStatus::Adjusted;
        }

        let sensor_format = {
            let cfg = &mut config.configs_mut()[0];

            if !OUTPUT_FORMATS.contains(&cfg.pixel_format) {
                debug!(format = %cfg.pixel_format, "adjusting pixel format to NV12");
                cfg.pixel_format = PixelFormat::NV12;
                status = ConfigStatus::Adjusted;
            }

            let mut sensor_format = self.sensor.pick_format(&SENSOR_MBUS_CODES, cfg.size);
            if sensor_format.size.is_empty() {
                sensor_format.size = self.sensor.resolution();
            }

            // Default to a size matching the sensor aspect ratio, then
            // clamp to the hardware bounds.
            let requested = cfg.size;

            if cfg.size.is_empty() {
                cfg.size.width = 1280;
                cfg.size.height =
                    1280 * sensor_format.size.height / sensor_format.size.width;
            }

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

        // Enable the link from this camera's sensor to the CSI-2 receiver
        // and disable every other sensor link.
        let sensor_entity = self.sensor.entity().to_string();
        for entity in self.media.sensor_entities(DPHY_ENTITY, 0) {
            let enable = entity == sensor_entity;
            if self.media.link_enabled(&entity, 0, DPHY_ENTITY, 0) == enable {
                continue;
            }

            debug!(sensor = %entity, enable, "routing sensor link to CSI-2 receiver");
            self.media.set_link(&entity, 0, DPHY_ENTITY, 0, enable)?;
        }

        // Propagate the sensor format through the pipeline.
        let mut format = config.sensor_format();
        debug!(%format, "configuring sensor");
        self.sensor.set_format(&mut format)?;
        self.dphy.set_format(0, &mut format)?;

        let mut format = self.dphy.get_format(1)?;
        self.isp.set_format(0, &mut format)?;

        // YUYV8_2X8 is required on the ISP source pad for YUV output.
        format.mbus_code = mbus::YUYV8_2X8;
        self.isp.set_format(2, &mut format)?;

        {
            let cfg = &mut config.configs_mut()[0];

            let mut output = V4l2DeviceFormat {
                fourcc: cfg.pixel_format,
                size: cfg.size,
                planes_count: 2,
            };
            self.video.set_format(&mut output)?;

            if output.size != cfg.size || output.fourcc != cfg.pixel_format {
                error!(format = %cfg.pixel_format, size = %cfg.size, "capture format rejected");
                return Err(Error::InvalidConfiguration(format!(
                    "unable to configure capture in {} {}",
                    cfg.pixel_format, cfg.size
                )));
            }

            let mut param_format = V4l2DeviceFormat {
                fourcc: PixelFormat::RK_ISP1_PARAMS,
                ..Default::default()
            };
            self.param.set_format(&mut param_format)?;

            let mut stat_format = V4l2DeviceFormat {
                fourcc: PixelFormat::RK_ISP1_STAT_3A,
                ..Default::default()
            };
            self.stat.set_format(&mut stat_format)?;

            cfg.set_stream(self.stream);
            self.stream_config = Some(cfg.clone());
        }

        Ok(())
    }

    fn allocate_buffers(&mut self) -> Result<()> {
        let cfg = self
            .stream_config
            .clone()
            .ok_or_else(|| Error::InvalidConfiguration("pipeline is not configured".into()))?;
        let count = cfg.buffer_count;

        self.video_pool.create(count);
        let imported = match cfg.memory {
            MemoryKind::Internal => self.video.export_buffers(&mut self.video_pool),
            MemoryKind::External => self.video.import_buffers(&mut self.video_pool),
        };
        if let Err(e) = imported {
            self.video_pool.destroy();
            return Err(e.into());
        }

        // One spare beyond the image buffer count so the IPA can always
        // find a free parameters slot while one is in flight.
        self.param_pool.create(count + 1);
        if let Err(e) = self.param.export_buffers(&mut self.param_pool) {
            if let Err(e) = self.video.release_buffers() {
                error!(error = %e, "failed to release image buffers");
            }
            self.param_pool.destroy();
            self.video_pool.destroy();
            return Err(e.into());
        }

        self.stat_pool.create(count + 1);
        if let Err(e) = self.stat.export_buffers(&mut self.stat_pool) {
            if let Err(e) = self.param.release_buffers() {
                error!(error = %e, "failed to release parameters buffers");
            }
            if let Err(e) = self.video.release_buffers() {
                error!(error = %e, "failed to release image buffers");
            }
            self.stat_pool.destroy();
            self.param_pool.destroy();
            self.video_pool.destroy();
            return Err(e.into());
        }

        let mut mappings = Vec::new();
        for buffer in self.param_pool.buffers() {
            mappings.push(IpaBufferMapping {
                id: IpaBufferId::parameters(buffer.index()),
                planes: buffer
                    .planes()
                    .iter()
                    .map(|p| (p.fd().as_raw_fd(), p.len()))
                    .collect(),
            });
        }
        for buffer in self.stat_pool.buffers() {
            mappings.push(IpaBufferMapping {
                id: IpaBufferId::statistics(buffer.index()),
                planes: buffer
                    .planes()
                    .iter()
                    .map(|p| (p.fd().as_raw_fd(), p.len()))
                    .collect(),
            });
        }

        self.ipa_buffers = mappings.iter().map(|m| m.id).collect();
        self.ipa.map_buffers(&mappings);

        self.frames.seed(count + 1, count + 1);

        Ok(())
    }

    fn free_buffers(&mut self) -> Result<()> {
        let ids = std::mem::take(&mut self.ipa_buffers);
        self.ipa.unmap_buffers(&ids);

        self.frames.clear();

        if let Err(e) = self.stat.release_buffers() {
            error!(error = %e, "failed to release statistics buffers");
        }
        if let Err(e) = self.param.release_buffers() {
            error!(error = %e, "failed to release parameters buffers");
        }
        if let Err(e) = self.video.release_buffers() {
            error!(error = %e, "failed to release image buffers");
        }

        self.stat_pool.destroy();
        self.param_pool.destroy();
        self.video_pool.destroy();

        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let cfg = self
            .stream_config
            .clone()
            .ok_or_else(|| Error::InvalidConfiguration("pipeline is not configured".into()))?;

        self.next_frame = 0;

        if let Err(e) = self.param.stream_on() {
            error!(error = %e, "failed to start parameters stream");
            return Err(e.into());
        }

        if let Err(e) = self.stat.stream_on() {
            error!(error = %e, "failed to start statistics stream");
            if let Err(e) = self.param.stream_off() {
                warn!(error = %e, "failed to stop parameters stream");
            }
            return Err(e.into());
        }

        if let Err(e) = self.video.stream_on() {
            error!(error = %e, "failed to start capture stream");
            if let Err(e) = self.stat.stream_off() {
                warn!(error = %e, "failed to stop statistics stream");
            }
            if let Err(e) = self.param.stream_off() {
                warn!(error = %e, "failed to stop parameters stream");
            }
            return Err(e.into());
        }

        self.active_camera = Some(self.sensor.entity().to_string());

        // Inform the IPA of the stream configuration and the sensor's
        // writable controls.
        let streams = [IpaStreamConfig {
            pixel_format: cfg.pixel_format,
            size: cfg.size,
        }];

        if let Err(e) = self.ipa.configure(&streams, &self.sensor.controls()) {
            error!(error = %e, "IPA rejected configuration");
            if let Err(e) = self.video.stream_off() {
                warn!(error = %e, "failed to stop capture stream");
            }
            if let Err(e) = self.stat.stream_off() {
                warn!(error = %e, "failed to stop statistics stream");
            }
            if let Err(e) = self.param.stream_off() {
                warn!(error = %e, "failed to stop parameters stream");
            }
            self.active_camera = None;
            return Err(e.into());
        }

        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.video.stream_off() {
            warn!(error = %e, "failed to stop capture stream");
        }
        if let Err(e) = self.stat.stream_off() {
            warn!(error = %e, "failed to stop statistics stream");
        }
        if let Err(e) = self.param.stream_off() {
            warn!(error = %e, "failed to stop parameters stream");
        }

        self.timeline.reset();

        if !self.frames.is_empty() {
            debug!(
                frames = self.frames.len(),
                "abandoning in-flight frames on stop"
            );
        }

        self.active_camera = None;
    }

    fn queue_request(&mut self, request: Request) -> Result<()> {
        let frame = self.next_frame;
        let (param_slot, controls) = {
            let info = self.frames.create(frame, request, self.stream)?;
            (info.param_slot, info.request.controls().clone())
        };

        self.ipa.process_event(IpaEvent::QueueRequest {
            frame,
            param_buffer: IpaBufferId::parameters(param_slot),
            controls,
        });

        self.timeline.schedule(FrameAction {
            frame,
            payload: ActionPayload::QueueBuffers,
        });

        self.next_frame += 1;

        Ok(())
    }
}
