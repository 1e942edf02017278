//! # rkisp1
//!
//! Per-frame scheduling and buffer-lifecycle engine for the Rockchip ISP1
//! camera pipeline.
//!
//! The engine mediates between capture requests, a kernel media graph
//! (sensor → CSI-2 receiver → ISP → capture/statistics/parameters nodes)
//! and an out-of-process image processing algorithm (IPA) that computes
//! exposure, gain and white-balance tuning each frame.
//!
//! ## What lives here
//!
//! - **Frame ledger**: one [`frame::FrameInfo`] per in-flight frame, binding
//!   a request to its parameter/statistics/image buffer triple and the
//!   completion flags that gate delivery
//! - **Timeline**: frame actions released at pipeline-delay-correct instants
//!   anchored on start-of-exposure
//! - **IPA channel**: buffer-id encoding, the event/action catalogue and a
//!   threaded transport
//! - **Pipeline handlers**: the ISP pipeline
//!   ([`pipeline::rkisp1::RkIsp1Pipeline`]) and a single-stage capture path
//!   ([`pipeline::simple::SimplePipeline`])
//!
//! Kernel I/O, media-graph enumeration and sensor drivers are external
//! collaborators behind capability traits; the host event dispatcher
//! serializes their completions onto the scheduler thread.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use rkisp1::prelude::*;
//!
//! let mut pipeline = RkIsp1Pipeline::match_device(
//!     &mut enumerator,
//!     || ipa_loader.load(),
//!     Box::new(callbacks),
//!     Box::new(MonotonicClock::new()),
//! )?;
//!
//! let mut config = pipeline.generate_configuration(&[StreamRole::Viewfinder]);
//! pipeline.configure(&mut config)?;
//! pipeline.allocate_buffers()?;
//! pipeline.start()?;
//!
//! let mut request = Request::new(0);
//! request.add_buffer(config.configs()[0].stream().unwrap(), 0);
//! pipeline.queue_request(request)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod clock;
pub mod controls;
pub mod error;
pub mod format;
pub mod frame;
pub mod ipa;
pub mod media;
pub mod pipeline;
pub mod request;
pub mod sensor;
pub mod timeline;
pub mod video;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::clock::{Clock, ClockTime, MonotonicClock};
    pub use crate::controls::{ControlList, ControlValue};
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::rkisp1::RkIsp1Pipeline;
    pub use crate::pipeline::simple::SimplePipeline;
    pub use crate::pipeline::{CameraCallbacks, PipelineHandler, StreamRole};
    pub use crate::request::Request;
}

pub use error::{Error, Result};
