//! Video device and subdevice capability surfaces.
//!
//! Kernel I/O is an external collaborator: the engine drives the nodes
//! through these traits and receives completions as plain [`DequeuedBuffer`]
//! values from the host event dispatcher, serialized onto the scheduler
//! thread.

use thiserror::Error;

use crate::buffer::BufferPool;
use crate::clock::ClockTime;
use crate::format::{SubdeviceFormat, V4l2DeviceFormat};

/// Errors reported by kernel media devices.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device or entity not found.
    #[error("device not found: {0}")]
    NotFound(String),

    /// Device is busy (in use by another stream).
    #[error("device busy: {0}")]
    Busy(String),

    /// Requested format is not supported by the device.
    #[error("format not supported: {0}")]
    FormatNotSupported(String),

    /// An ioctl failed.
    #[error("{op} failed: {errno}")]
    Ioctl {
        /// The operation that failed.
        op: &'static str,
        /// The kernel errno.
        errno: rustix::io::Errno,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A buffer handed back by the kernel, with its hardware timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Slot index of the buffer in its pool.
    pub index: u32,
    /// Hardware frame sequence number.
    pub sequence: u32,
    /// End-of-DMA timestamp on the monotonic clock.
    pub timestamp: ClockTime,
}

/// A V4L2 video device node (capture, parameters upload or statistics
/// download).
pub trait VideoDevice {
    /// Apply a format. The driver may adjust it in place.
    fn set_format(&mut self, format: &mut V4l2DeviceFormat) -> Result<(), DeviceError>;

    /// Have the kernel allocate buffers for the pool and export their
    /// planes as dma-buf fds.
    fn export_buffers(&mut self, pool: &mut BufferPool) -> Result<(), DeviceError>;

    /// Register application-supplied dma-buf planes with the kernel.
    fn import_buffers(&mut self, pool: &mut BufferPool) -> Result<(), DeviceError>;

    /// Release all kernel buffer allocations.
    fn release_buffers(&mut self) -> Result<(), DeviceError>;

    /// Enqueue the buffer at `index` for kernel DMA.
    fn queue_buffer(&mut self, index: u32) -> Result<(), DeviceError>;

    /// Start streaming.
    fn stream_on(&mut self) -> Result<(), DeviceError>;

    /// Stop streaming and flush queued buffers.
    fn stream_off(&mut self) -> Result<(), DeviceError>;
}

/// A V4L2 subdevice exposing per-pad formats.
pub trait Subdevice {
    /// Read the active format on a pad.
    fn get_format(&mut self, pad: u32) -> Result<SubdeviceFormat, DeviceError>;

    /// Apply a format on a pad. The driver may adjust it in place.
    fn set_format(&mut self, pad: u32, format: &mut SubdeviceFormat) -> Result<(), DeviceError>;
}
