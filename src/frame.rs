//! The per-frame ledger binding requests to their in-flight buffers.
//!
//! Each admitted request gets a [`FrameInfo`]: the frame number, the
//! parameter and statistics slots borrowed from the internal pools, the
//! request's image buffer, and the three completion flags that gate request
//! delivery. The [`FrameTable`] owns both free queues, so the conservation
//! invariant (free slots plus slots held by live frames equals the pool)
//! is maintained in one place.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::error::{Error, Result};
use crate::request::{Request, StreamId};

/// Identity of a buffer as seen from a kernel completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineBuffer {
    /// Parameter buffer by pool slot.
    Parameters(u32),
    /// Statistics buffer by pool slot.
    Statistics(u32),
    /// Image buffer by capture-device slot.
    Image(u32),
}

/// The ledger entry for one in-flight frame.
#[derive(Debug)]
pub struct FrameInfo {
    /// Frame number assigned at admission.
    pub frame: u32,
    /// The request this frame serves. Owned until completion or teardown.
    pub request: Request,
    /// Parameter-pool slot borrowed for this frame.
    pub param_slot: u32,
    /// Statistics-pool slot borrowed for this frame.
    pub stat_slot: u32,
    /// The request's image buffer in the capture device.
    pub image_index: u32,
    /// The IPA reported the parameter buffer filled in time.
    pub param_filled: bool,
    /// The kernel returned the parameter buffer.
    pub param_dequeued: bool,
    /// The IPA delivered this frame's result metadata.
    pub metadata_processed: bool,
}

impl FrameInfo {
    fn holds(&self, buffer: PipelineBuffer) -> bool {
        match buffer {
            PipelineBuffer::Parameters(slot) => self.param_slot == slot,
            PipelineBuffer::Statistics(slot) => self.stat_slot == slot,
            PipelineBuffer::Image(index) => self.image_index == index,
        }
    }
}

/// Frame number → [`FrameInfo`] map plus the two internal free queues.
///
/// Secondary lookups (by buffer, by request) are linear; the table never
/// holds more than a handful of frames.
#[derive(Debug, Default)]
pub struct FrameTable {
    frames: BTreeMap<u32, FrameInfo>,
    param_free: VecDeque<u32>,
    stat_free: VecDeque<u32>,
}

impl FrameTable {
    /// Create an empty table with empty free queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the free queues with slots `0..param_count` and
    /// `0..stat_count`. Called when the pools are allocated.
    pub fn seed(&mut self, param_count: u32, stat_count: u32) {
        self.param_free = (0..param_count).collect();
        self.stat_free = (0..stat_count).collect();
    }

    /// Drop all frames and free-queue contents. Called when the pools are
    /// released.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.param_free.clear();
        self.stat_free.clear();
    }

    /// Admit a request: borrow one parameter slot, one statistics slot and
    /// the request's image buffer, and record the new frame.
    ///
    /// Fails without touching any state if a free queue is empty
    /// ([`Error::BufferUnderrun`]) or the request has no buffer for the
    /// stream ([`Error::InvalidRequest`]).
    pub fn create(
        &mut self,
        frame: u32,
        request: Request,
        stream: StreamId,
    ) -> Result<&mut FrameInfo> {
        if self.param_free.is_empty() {
            return Err(Error::BufferUnderrun("parameter"));
        }

        if self.stat_free.is_empty() {
            return Err(Error::BufferUnderrun("statistics"));
        }

        let Some(image_index) = request.find_buffer(stream) else {
            return Err(Error::InvalidRequest(format!(
                "no buffer for stream {:?} in request {}",
                stream,
                request.cookie()
            )));
        };

        let param_slot = self.param_free.pop_front().unwrap();
        let stat_slot = self.stat_free.pop_front().unwrap();

        let info = FrameInfo {
            frame,
            request,
            param_slot,
            stat_slot,
            image_index,
            param_filled: false,
            param_dequeued: false,
            metadata_processed: false,
        };

        Ok(self.frames.entry(frame).or_insert(info))
    }

    /// Retire a frame: return its slots to the free queues and yield the
    /// entry (with the request still inside).
    pub fn destroy(&mut self, frame: u32) -> Option<FrameInfo> {
        let Some(info) = self.frames.remove(&frame) else {
            debug!(frame, "destroy of untracked frame");
            return None;
        };

        self.param_free.push_back(info.param_slot);
        self.stat_free.push_back(info.stat_slot);

        Some(info)
    }

    /// Look up a frame by number. A miss means the frame already completed
    /// or never existed; callers drop the event.
    pub fn get(&mut self, frame: u32) -> Option<&mut FrameInfo> {
        let info = self.frames.get_mut(&frame);
        if info.is_none() {
            debug!(frame, "no frame info for frame number");
        }
        info
    }

    /// Look up the frame holding a buffer.
    pub fn find_buffer(&mut self, buffer: PipelineBuffer) -> Option<&mut FrameInfo> {
        let info = self.frames.values_mut().find(|info| info.holds(buffer));
        if info.is_none() {
            debug!(?buffer, "no frame info for buffer");
        }
        info
    }

    /// Look up the frame serving a request.
    pub fn find_request(&mut self, cookie: u64) -> Option<&mut FrameInfo> {
        let info = self
            .frames
            .values_mut()
            .find(|info| info.request.cookie() == cookie);
        if info.is_none() {
            debug!(cookie, "no frame info for request");
        }
        info
    }

    /// Number of in-flight frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check whether any frame is in flight.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Free parameter slots currently available.
    pub fn free_parameters(&self) -> usize {
        self.param_free.len()
    }

    /// Free statistics slots currently available.
    pub fn free_statistics(&self) -> usize {
        self.stat_free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_buffer(cookie: u64) -> Request {
        let mut request = Request::new(cookie);
        request.add_buffer(StreamId(0), cookie as u32);
        request
    }

    #[test]
    fn test_create_borrows_slots_in_order() {
        let mut table = FrameTable::new();
        table.seed(3, 3);

        let info = table
            .create(0, request_with_buffer(10), StreamId(0))
            .unwrap();
        assert_eq!(info.param_slot, 0);
        assert_eq!(info.stat_slot, 0);
        assert_eq!(info.image_index, 10);
        assert!(!info.param_filled && !info.param_dequeued && !info.metadata_processed);

        assert_eq!(table.free_parameters(), 2);
        assert_eq!(table.free_statistics(), 2);
    }

    #[test]
    fn test_underrun_mutates_nothing() {
        let mut table = FrameTable::new();
        table.seed(1, 1);

        table.create(0, request_with_buffer(1), StreamId(0)).unwrap();

        let err = table
            .create(1, request_with_buffer(2), StreamId(0))
            .unwrap_err();
        assert!(matches!(err, Error::BufferUnderrun("parameter")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.free_parameters(), 0);
        assert_eq!(table.free_statistics(), 0);
    }

    #[test]
    fn test_invalid_request_mutates_nothing() {
        let mut table = FrameTable::new();
        table.seed(2, 2);

        // Request bound to a different stream than the one queued on.
        let mut request = Request::new(5);
        request.add_buffer(StreamId(1), 0);

        let err = table.create(0, request, StreamId(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(table.free_parameters(), 2);
        assert_eq!(table.free_statistics(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_destroy_returns_slots() {
        let mut table = FrameTable::new();
        table.seed(2, 2);

        table.create(0, request_with_buffer(1), StreamId(0)).unwrap();
        table.create(1, request_with_buffer(2), StreamId(0)).unwrap();
        assert_eq!(table.free_parameters(), 0);

        let info = table.destroy(0).unwrap();
        assert_eq!(info.request.cookie(), 1);
        assert_eq!(table.free_parameters(), 1);
        assert_eq!(table.free_statistics(), 1);

        // Conservation: free + held = pool size.
        assert_eq!(table.free_parameters() + table.len(), 2);

        assert!(table.destroy(0).is_none());
    }

    #[test]
    fn test_lookups() {
        let mut table = FrameTable::new();
        table.seed(2, 2);
        table.create(4, request_with_buffer(9), StreamId(0)).unwrap();

        assert_eq!(table.get(4).unwrap().frame, 4);
        assert!(table.get(5).is_none());

        assert!(table.find_buffer(PipelineBuffer::Parameters(0)).is_some());
        assert!(table.find_buffer(PipelineBuffer::Statistics(0)).is_some());
        assert!(table.find_buffer(PipelineBuffer::Image(9)).is_some());
        assert!(table.find_buffer(PipelineBuffer::Image(42)).is_none());

        assert!(table.find_request(9).is_some());
        assert!(table.find_request(1).is_none());
    }
}
