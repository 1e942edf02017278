//! Messaging with the image processing algorithm (IPA).
//!
//! The IPA runs outside the pipeline process and sees kernel buffers only by
//! a 32-bit id that encodes role and pool slot. The engine emits
//! fire-and-forget [`IpaEvent`]s and receives [`IpaAction`]s back through the
//! host event dispatcher; [`IpaThread`] hosts an in-process algorithm behind
//! the same interface for deployments without a separate process.

use std::os::fd::RawFd;
use std::thread;

use kanal::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error};

use crate::controls::{ControlInfoMap, ControlList};
use crate::format::{PixelFormat, Size};

/// Id base for parameter buffers.
pub const PARAM_ID_BASE: u32 = 0x100;
/// Id base for statistics buffers.
pub const STAT_ID_BASE: u32 = 0x200;

const SLOT_MASK: u32 = 0xff;

/// The role of an internal buffer shared with the IPA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRole {
    /// ISP parameters uploaded ahead of a frame.
    Parameters,
    /// 3A statistics produced by a frame.
    Statistics,
}

/// The wire identity of a buffer shared with the IPA: role in the upper
/// byte, pool slot in the lower bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct IpaBufferId(u32);

impl IpaBufferId {
    /// Id of the parameter buffer in the given pool slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` does not fit in the role's slot space (> 0xFF).
    pub fn parameters(slot: u32) -> Self {
        assert!(slot <= SLOT_MASK, "parameter slot out of range");
        Self(PARAM_ID_BASE | slot)
    }

    /// Id of the statistics buffer in the given pool slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` does not fit in the role's slot space (> 0xFF).
    pub fn statistics(slot: u32) -> Self {
        assert!(slot <= SLOT_MASK, "statistics slot out of range");
        Self(STAT_ID_BASE | slot)
    }

    /// Decode a raw id. Returns `None` for an unknown role byte.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw & !SLOT_MASK {
            PARAM_ID_BASE | STAT_ID_BASE => Some(Self(raw)),
            _ => None,
        }
    }

    /// The raw 32-bit id.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// The buffer's role.
    pub fn role(self) -> BufferRole {
        if self.0 & PARAM_ID_BASE != 0 {
            BufferRole::Parameters
        } else {
            BufferRole::Statistics
        }
    }

    /// The buffer's pool slot.
    #[inline]
    pub fn slot(self) -> u32 {
        self.0 & SLOT_MASK
    }
}

/// The memory behind a shared buffer, registered with the IPA under its id.
#[derive(Clone, Debug)]
pub struct IpaBufferMapping {
    /// Wire id of the buffer.
    pub id: IpaBufferId,
    /// The buffer's planes as `(dma-buf fd, length)` pairs.
    pub planes: Vec<(RawFd, usize)>,
}

/// One stream's format, as reported to the IPA at configure time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpaStreamConfig {
    /// Pixel format of the stream.
    pub pixel_format: PixelFormat,
    /// Frame size of the stream.
    pub size: Size,
}

/// Outbound events from the pipeline to the IPA.
#[derive(Clone, Debug)]
pub enum IpaEvent {
    /// A request was admitted; the IPA should fill the named parameter
    /// buffer for this frame.
    QueueRequest {
        /// Frame number assigned by the scheduler.
        frame: u32,
        /// The parameter buffer reserved for this frame.
        param_buffer: IpaBufferId,
        /// The request's controls.
        controls: ControlList,
    },

    /// The kernel filled a statistics buffer for this frame.
    SignalStatBuffer {
        /// Frame number.
        frame: u32,
        /// The statistics buffer holding this frame's 3A data.
        stat_buffer: IpaBufferId,
    },
}

/// Inbound actions from the IPA, keyed by frame number at the transport
/// boundary.
#[derive(Clone, Debug)]
pub enum IpaAction {
    /// Apply sensor controls, timed by the frame-action timeline.
    SetSensorControls {
        /// The controls to write to the sensor.
        controls: ControlList,
    },

    /// The parameter buffer for this frame has been filled.
    ParamsFilled,

    /// Per-frame result metadata is ready.
    Metadata {
        /// The result metadata.
        metadata: ControlList,
    },
}

/// Raw operation codes shared with the IPA.
pub mod op {
    /// Inbound: apply sensor controls.
    pub const V4L2_SET: u32 = 1;
    /// Inbound: the parameter buffer was filled.
    pub const PARAM_FILLED: u32 = 2;
    /// Inbound: result metadata is ready.
    pub const METADATA: u32 = 3;
    /// Outbound: a statistics buffer is ready for processing.
    pub const SIGNAL_STAT_BUFFER: u32 = 4;
    /// Outbound: a request was queued.
    pub const QUEUE_REQUEST: u32 = 5;
}

/// An operation as it crosses the transport: op code, scalar payload and
/// control lists.
#[derive(Clone, Debug, Default)]
pub struct IpaOperationData {
    /// Operation code (see [`op`]).
    pub operation: u32,
    /// Scalar payload words.
    pub data: Vec<u32>,
    /// Control-list payloads.
    pub controls: Vec<ControlList>,
}

impl IpaEvent {
    /// Encode for the transport.
    pub fn encode(&self) -> IpaOperationData {
        match self {
            IpaEvent::QueueRequest {
                frame,
                param_buffer,
                controls,
            } => IpaOperationData {
                operation: op::QUEUE_REQUEST,
                data: vec![*frame, param_buffer.raw()],
                controls: vec![controls.clone()],
            },
            IpaEvent::SignalStatBuffer { frame, stat_buffer } => IpaOperationData {
                operation: op::SIGNAL_STAT_BUFFER,
                data: vec![*frame, stat_buffer.raw()],
                controls: Vec::new(),
            },
        }
    }
}

impl IpaAction {
    /// Decode an inbound operation.
    ///
    /// Unknown operation codes and malformed payloads are logged and
    /// discarded.
    pub fn decode(raw: &IpaOperationData) -> Option<IpaAction> {
        match raw.operation {
            op::V4L2_SET => match raw.controls.first() {
                Some(controls) => Some(IpaAction::SetSensorControls {
                    controls: controls.clone(),
                }),
                None => {
                    error!("V4L2_SET action without controls");
                    None
                }
            },
            op::PARAM_FILLED => Some(IpaAction::ParamsFilled),
            op::METADATA => match raw.controls.first() {
                Some(metadata) => Some(IpaAction::Metadata {
                    metadata: metadata.clone(),
                }),
                None => {
                    error!("METADATA action without controls");
                    None
                }
            },
            unknown => {
                error!(op = unknown, "unknown IPA action");
                None
            }
        }
    }
}

/// Errors reported by an IPA transport.
#[derive(Debug, Error)]
pub enum IpaError {
    /// The transport to the algorithm is gone.
    #[error("IPA transport disconnected")]
    Disconnected,

    /// The algorithm rejected the configuration.
    #[error("IPA configure failed: {0}")]
    Configure(String),
}

/// The pipeline's handle on the algorithm.
///
/// Events are fire-and-forget; replies come back through the host event
/// dispatcher as `(frame, IpaAction)` pairs.
pub trait IpaProxy {
    /// Report the stream configuration and the sensor's writable controls.
    /// Called once per streaming session, after stream-on.
    fn configure(
        &mut self,
        streams: &[IpaStreamConfig],
        sensor_controls: &ControlInfoMap,
    ) -> Result<(), IpaError>;

    /// Register shared buffers under their wire ids.
    fn map_buffers(&mut self, buffers: &[IpaBufferMapping]);

    /// Unregister previously mapped buffers.
    fn unmap_buffers(&mut self, ids: &[IpaBufferId]);

    /// Send an event to the algorithm.
    fn process_event(&mut self, event: IpaEvent);
}

/// The algorithm side of the threaded transport.
///
/// Implementations run on the transport's worker thread and emit replies
/// through the `actions` sink passed to
/// [`process_event`](Self::process_event).
pub trait IpaWorker: Send {
    /// Stream configuration and sensor control ranges.
    fn configure(&mut self, streams: &[IpaStreamConfig], sensor_controls: &ControlInfoMap);

    /// Shared buffers became available.
    fn map_buffers(&mut self, buffers: &[IpaBufferMapping]);

    /// Shared buffers are going away.
    fn unmap_buffers(&mut self, ids: &[IpaBufferId]);

    /// Handle one pipeline event, emitting any `(frame, action)` replies.
    fn process_event(&mut self, event: IpaEvent, actions: &mut dyn FnMut(u32, IpaAction));
}

enum WorkerMessage {
    Configure(Vec<IpaStreamConfig>, ControlInfoMap),
    MapBuffers(Vec<IpaBufferMapping>),
    UnmapBuffers(Vec<IpaBufferId>),
    Event(IpaEvent),
    Shutdown,
}

/// Hosts an [`IpaWorker`] on its own thread behind the [`IpaProxy`]
/// interface.
///
/// Messages flow over bounded channels; replies accumulate in an inbound
/// queue the host event loop drains with
/// [`poll_actions`](Self::poll_actions) and feeds to the scheduler. The
/// worker is shut down and joined on drop.
pub struct IpaThread {
    tx: Sender<WorkerMessage>,
    actions: Receiver<(u32, IpaAction)>,
    thread: Option<thread::JoinHandle<()>>,
}

impl IpaThread {
    /// Spawn the worker thread.
    pub fn spawn(mut worker: Box<dyn IpaWorker>) -> Self {
        let (tx, rx) = bounded::<WorkerMessage>(16);
        let (action_tx, action_rx) = unbounded::<(u32, IpaAction)>();

        let thread = thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                match message {
                    WorkerMessage::Configure(streams, controls) => {
                        worker.configure(&streams, &controls);
                    }
                    WorkerMessage::MapBuffers(buffers) => worker.map_buffers(&buffers),
                    WorkerMessage::UnmapBuffers(ids) => worker.unmap_buffers(&ids),
                    WorkerMessage::Event(event) => {
                        worker.process_event(event, &mut |frame, action| {
                            let _ = action_tx.send((frame, action));
                        });
                    }
                    WorkerMessage::Shutdown => break,
                }
            }
        });

        Self {
            tx,
            actions: action_rx,
            thread: Some(thread),
        }
    }

    /// Drain the actions the worker has emitted so far.
    ///
    /// Called from the host event loop; the returned pairs are fed to the
    /// scheduler in emission order.
    pub fn poll_actions(&self) -> Vec<(u32, IpaAction)> {
        let mut drained = Vec::new();
        while let Ok(Some(pair)) = self.actions.try_recv() {
            drained.push(pair);
        }
        drained
    }
}

impl IpaProxy for IpaThread {
    fn configure(
        &mut self,
        streams: &[IpaStreamConfig],
        sensor_controls: &ControlInfoMap,
    ) -> Result<(), IpaError> {
        self.tx
            .send(WorkerMessage::Configure(
                streams.to_vec(),
                sensor_controls.clone(),
            ))
            .map_err(|_| IpaError::Disconnected)
    }

    fn map_buffers(&mut self, buffers: &[IpaBufferMapping]) {
        if self.tx.send(WorkerMessage::MapBuffers(buffers.to_vec())).is_err() {
            error!("IPA worker gone, dropping buffer mappings");
        }
    }

    fn unmap_buffers(&mut self, ids: &[IpaBufferId]) {
        if self.tx.send(WorkerMessage::UnmapBuffers(ids.to_vec())).is_err() {
            error!("IPA worker gone, dropping buffer unmap");
        }
    }

    fn process_event(&mut self, event: IpaEvent) {
        if self.tx.send(WorkerMessage::Event(event)).is_err() {
            debug!("IPA worker gone, dropping event");
        }
    }
}

impl Drop for IpaThread {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_id_encoding() {
        let param = IpaBufferId::parameters(3);
        assert_eq!(param.raw(), 0x103);
        assert_eq!(param.role(), BufferRole::Parameters);
        assert_eq!(param.slot(), 3);

        let stat = IpaBufferId::statistics(0xff);
        assert_eq!(stat.raw(), 0x2ff);
        assert_eq!(stat.role(), BufferRole::Statistics);
        assert_eq!(stat.slot(), 0xff);

        assert_eq!(IpaBufferId::from_raw(0x103), Some(param));
        assert_eq!(IpaBufferId::from_raw(0x42_0001), None);
    }

    #[test]
    #[should_panic(expected = "parameter slot out of range")]
    fn test_buffer_id_slot_overflow() {
        let _ = IpaBufferId::parameters(0x100);
    }

    #[test]
    fn test_event_encode() {
        let event = IpaEvent::QueueRequest {
            frame: 9,
            param_buffer: IpaBufferId::parameters(2),
            controls: ControlList::new(),
        };

        let raw = event.encode();
        assert_eq!(raw.operation, op::QUEUE_REQUEST);
        assert_eq!(raw.data, vec![9, 0x102]);
        assert_eq!(raw.controls.len(), 1);
    }

    #[test]
    fn test_action_decode_roundtrip() {
        let raw = IpaOperationData {
            operation: op::PARAM_FILLED,
            data: vec![4],
            controls: Vec::new(),
        };
        assert!(matches!(
            IpaAction::decode(&raw),
            Some(IpaAction::ParamsFilled)
        ));

        let raw = IpaOperationData {
            operation: op::METADATA,
            data: vec![4],
            controls: vec![ControlList::new()],
        };
        assert!(matches!(
            IpaAction::decode(&raw),
            Some(IpaAction::Metadata { .. })
        ));
    }

    #[test]
    fn test_action_decode_discards_unknown() {
        let raw = IpaOperationData {
            operation: 0xdead,
            data: Vec::new(),
            controls: Vec::new(),
        };
        assert!(IpaAction::decode(&raw).is_none());

        // Known op with a missing payload is discarded too.
        let raw = IpaOperationData {
            operation: op::V4L2_SET,
            data: Vec::new(),
            controls: Vec::new(),
        };
        assert!(IpaAction::decode(&raw).is_none());
    }

    /// An algorithm stub that acknowledges every queued request.
    struct EchoWorker;

    impl IpaWorker for EchoWorker {
        fn configure(&mut self, _: &[IpaStreamConfig], _: &ControlInfoMap) {}
        fn map_buffers(&mut self, _: &[IpaBufferMapping]) {}
        fn unmap_buffers(&mut self, _: &[IpaBufferId]) {}

        fn process_event(&mut self, event: IpaEvent, actions: &mut dyn FnMut(u32, IpaAction)) {
            if let IpaEvent::QueueRequest { frame, .. } = event {
                actions(frame, IpaAction::ParamsFilled);
            }
        }
    }

    #[test]
    fn test_threaded_transport_roundtrip() {
        let mut ipa = IpaThread::spawn(Box::new(EchoWorker));

        ipa.process_event(IpaEvent::QueueRequest {
            frame: 5,
            param_buffer: IpaBufferId::parameters(0),
            controls: ControlList::new(),
        });

        // The worker thread acknowledges asynchronously.
        let mut actions = Vec::new();
        for _ in 0..100 {
            actions = ipa.poll_actions();
            if !actions.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].0, 5);
        assert!(matches!(actions[0].1, IpaAction::ParamsFilled));
    }

    #[test]
    fn test_map_unmap_identity() {
        // Mapping then unmapping the same ids leaves the worker's view empty.
        struct TrackingWorker {
            mapped: std::sync::Arc<std::sync::Mutex<Vec<u32>>>,
        }

        impl IpaWorker for TrackingWorker {
            fn configure(&mut self, _: &[IpaStreamConfig], _: &ControlInfoMap) {}

            fn map_buffers(&mut self, buffers: &[IpaBufferMapping]) {
                let mut mapped = self.mapped.lock().unwrap();
                mapped.extend(buffers.iter().map(|b| b.id.raw()));
            }

            fn unmap_buffers(&mut self, ids: &[IpaBufferId]) {
                let mut mapped = self.mapped.lock().unwrap();
                mapped.retain(|raw| !ids.iter().any(|id| id.raw() == *raw));
            }

            fn process_event(&mut self, _: IpaEvent, _: &mut dyn FnMut(u32, IpaAction)) {}
        }

        let mapped = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let worker = TrackingWorker {
            mapped: mapped.clone(),
        };

        {
            let mut ipa = IpaThread::spawn(Box::new(worker));
            let ids = [IpaBufferId::parameters(0), IpaBufferId::statistics(0)];
            let mappings: Vec<_> = ids
                .iter()
                .map(|&id| IpaBufferMapping {
                    id,
                    planes: Vec::new(),
                })
                .collect();

            ipa.map_buffers(&mappings);
            ipa.unmap_buffers(&ids);
            // Drop joins the worker, so all messages are processed.
        }

        assert!(mapped.lock().unwrap().is_empty());
    }
}
