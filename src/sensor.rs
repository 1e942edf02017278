//! Camera sensor capability surface.

use crate::controls::{ControlInfoMap, ControlList};
use crate::format::{Size, SubdeviceFormat};
use crate::video::DeviceError;

/// A camera sensor attached to the CSI-2 receiver.
///
/// The pipeline consumes the sensor through this capability object: format
/// selection when validating a configuration, format programming during
/// `configure`, and control writes scheduled by the timeline at
/// pipeline-delay-correct frames.
pub trait CameraSensor {
    /// The sensor's media entity name.
    fn entity(&self) -> &str;

    /// Full pixel-array resolution.
    fn resolution(&self) -> Size;

    /// Pick the best media-bus format for a target size.
    ///
    /// `mbus_codes` is ordered by preference; the first code the sensor
    /// supports wins. An implementation that cannot satisfy the size returns
    /// a format with an empty size, and the caller falls back to
    /// [`resolution`](Self::resolution).
    fn pick_format(&self, mbus_codes: &[u32], size: Size) -> SubdeviceFormat;

    /// Apply a format on the sensor output pad.
    ///
    /// The driver may adjust the format in place.
    fn set_format(&mut self, format: &mut SubdeviceFormat) -> Result<(), DeviceError>;

    /// Write a list of controls to the sensor.
    fn set_controls(&mut self, controls: &ControlList) -> Result<(), DeviceError>;

    /// The sensor's writable controls and their ranges.
    fn controls(&self) -> ControlInfoMap;
}
