//! Capture requests and their per-stream buffer bindings.

use crate::controls::ControlList;

/// Identity of a stream within a camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StreamId(pub u32);

/// A capture request: the controls to apply and the output buffers to fill.
///
/// A request is created by the application, queued to a pipeline, and handed
/// back through [`CameraCallbacks::request_completed`] once every bound
/// buffer has been filled and the per-frame result metadata is in. While a
/// request is in flight the pipeline owns it.
///
/// [`CameraCallbacks::request_completed`]: crate::pipeline::CameraCallbacks::request_completed
#[derive(Debug, Default)]
pub struct Request {
    cookie: u64,
    controls: ControlList,
    buffers: Vec<(StreamId, u32)>,
    pending: Vec<u32>,
    metadata: ControlList,
}

impl Request {
    /// Create an empty request with an application-chosen cookie.
    pub fn new(cookie: u64) -> Self {
        Self {
            cookie,
            ..Default::default()
        }
    }

    /// The application cookie identifying this request.
    #[inline]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// The controls to apply for this request's frame.
    pub fn controls(&self) -> &ControlList {
        &self.controls
    }

    /// Mutable access to the request controls.
    pub fn controls_mut(&mut self) -> &mut ControlList {
        &mut self.controls
    }

    /// Bind an output buffer (by video-device slot index) to a stream.
    ///
    /// The buffer becomes pending until the pipeline completes it.
    pub fn add_buffer(&mut self, stream: StreamId, index: u32) {
        self.buffers.push((stream, index));
        self.pending.push(index);
    }

    /// Look up the buffer bound to a stream.
    pub fn find_buffer(&self, stream: StreamId) -> Option<u32> {
        self.buffers
            .iter()
            .find(|(s, _)| *s == stream)
            .map(|&(_, index)| index)
    }

    /// Check whether any bound buffer has not been completed yet.
    pub fn has_pending_buffers(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Mark a bound buffer as filled.
    ///
    /// Returns false if the buffer was not pending (already completed or
    /// never bound).
    pub fn complete_buffer(&mut self, index: u32) -> bool {
        match self.pending.iter().position(|&i| i == index) {
            Some(pos) => {
                self.pending.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Per-frame result metadata, filled by the pipeline before completion.
    pub fn metadata(&self) -> &ControlList {
        &self.metadata
    }

    /// Replace the result metadata.
    pub fn set_metadata(&mut self, metadata: ControlList) {
        self.metadata = metadata;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ControlValue, AE_ENABLE};

    #[test]
    fn test_buffer_binding_and_completion() {
        let mut request = Request::new(7);
        let stream = StreamId(0);

        assert!(request.find_buffer(stream).is_none());
        assert!(!request.has_pending_buffers());

        request.add_buffer(stream, 3);
        assert_eq!(request.find_buffer(stream), Some(3));
        assert!(request.has_pending_buffers());

        assert!(request.complete_buffer(3));
        assert!(!request.has_pending_buffers());

        // Completing twice is not an error, just a no-op.
        assert!(!request.complete_buffer(3));
    }

    #[test]
    fn test_controls_and_metadata() {
        let mut request = Request::new(1);
        request
            .controls_mut()
            .set(AE_ENABLE, ControlValue::Bool(true));
        assert!(request.controls().contains(AE_ENABLE));

        let mut metadata = ControlList::new();
        metadata.set(AE_ENABLE, ControlValue::Bool(false));
        request.set_metadata(metadata);
        assert_eq!(
            request.metadata().get(AE_ENABLE),
            Some(&ControlValue::Bool(false))
        );
    }
}
