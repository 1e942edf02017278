//! Frame-action timeline anchored on start-of-exposure.
//!
//! Sensor controls and buffer enqueues must land a fixed number of frames
//! (plus a settling delay) before the frame they affect begins exposing.
//! The timeline holds scheduled [`FrameAction`]s, predicts each action's due
//! instant from the most recent start-of-exposure sample, and releases due
//! actions for the scheduler to execute on its own thread.
//!
//! Actions are plain data rather than callbacks: the scheduler drains
//! released actions and interprets them, which keeps everything on one
//! thread and makes ordering explicit.

use tracing::trace;

use crate::clock::ClockTime;
use crate::controls::ControlList;

/// The hardware pipeline stage an action belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameActionKind {
    /// Write sensor controls.
    SetSensor,
    /// Start of exposure; the reference point, never scheduled.
    Soe,
    /// Enqueue the frame's buffers into the kernel.
    QueueBuffers,
}

/// What a released action does; the kind follows from the payload.
#[derive(Debug)]
pub enum ActionPayload {
    /// Apply these controls to the sensor.
    SetSensor(ControlList),
    /// Enqueue the frame's parameter, statistics and image buffers.
    QueueBuffers,
}

impl ActionPayload {
    /// The pipeline stage this payload belongs to.
    pub fn kind(&self) -> FrameActionKind {
        match self {
            ActionPayload::SetSensor(_) => FrameActionKind::SetSensor,
            ActionPayload::QueueBuffers => FrameActionKind::QueueBuffers,
        }
    }
}

/// A job tied to a frame number, immutable once scheduled.
#[derive(Debug)]
pub struct FrameAction {
    /// The frame this action serves.
    pub frame: u32,
    /// What to do when the action is released.
    pub payload: ActionPayload,
}

/// Frames before the anchor SOE at which a stage must run. Controls written
/// to the sensor take effect one frame later, as do buffer enqueues.
const fn frame_offset(kind: FrameActionKind) -> i32 {
    match kind {
        FrameActionKind::SetSensor => -1,
        FrameActionKind::Soe => 0,
        FrameActionKind::QueueBuffers => -1,
    }
}

/// Settling delay from the anchor SOE for each stage.
const fn stage_delay(kind: FrameActionKind) -> ClockTime {
    match kind {
        FrameActionKind::SetSensor => ClockTime::from_millis(5),
        FrameActionKind::Soe => ClockTime::ZERO,
        FrameActionKind::QueueBuffers => ClockTime::from_millis(10),
    }
}

/// Frame interval assumed until two SOE samples have been observed (30 fps).
const DEFAULT_FRAME_INTERVAL: ClockTime = ClockTime::from_millis(33);

#[derive(Clone, Copy, Debug)]
struct SoeSample {
    sequence: u32,
    when: ClockTime,
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    action: FrameAction,
}

/// Per-camera sequencer for [`FrameAction`]s.
#[derive(Debug, Default)]
pub struct Timeline {
    pending: Vec<Pending>,
    next_seq: u64,
    last_soe: Option<SoeSample>,
    interval: Option<ClockTime>,
    soe_offset_ns: i64,
}

impl Timeline {
    /// Create an empty timeline with no exposure history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signed offset from end-of-DMA to start-of-exposure.
    ///
    /// This is the IPA's best estimate and may be negative. Only the
    /// [`Soe`](FrameActionKind::Soe) stage carries an offset; setting any
    /// other kind is ignored.
    pub fn set_time_offset(&mut self, kind: FrameActionKind, offset_ns: i64) {
        if kind == FrameActionKind::Soe {
            self.soe_offset_ns = offset_ns;
        }
    }

    /// Place an action on the work list. Actions are never merged or
    /// dropped; one whose due time has already passed is released by the
    /// next [`take_due`](Self::take_due) call.
    pub fn schedule(&mut self, action: FrameAction) {
        trace!(frame = action.frame, kind = ?action.payload.kind(), "scheduling action");
        self.pending.push(Pending {
            seq: self.next_seq,
            action,
        });
        self.next_seq += 1;
    }

    /// Feed an image-buffer completion: the end-of-DMA timestamp plus the
    /// IPA's offset is the best estimate of the frame's start of exposure.
    pub fn record_image_buffer(&mut self, sequence: u32, timestamp: ClockTime) {
        let soe = timestamp.offset_by(self.soe_offset_ns);
        self.notify_start_of_exposure(sequence, soe);
    }

    /// Record the actual start of exposure for a frame and refine the
    /// frame-interval estimate.
    pub fn notify_start_of_exposure(&mut self, sequence: u32, soe: ClockTime) {
        if let Some(prev) = self.last_soe {
            if sequence > prev.sequence {
                if let Some(delta) = soe.checked_sub(prev.when) {
                    let frames = (sequence - prev.sequence) as u64;
                    let per_frame = ClockTime::from_nanos(delta.nanos() / frames);
                    if per_frame > ClockTime::ZERO {
                        self.interval = Some(per_frame);
                    }
                }
            } else {
                // Stale or duplicate sample; keep the newer anchor.
                return;
            }
        }

        self.last_soe = Some(SoeSample { sequence, when: soe });
    }

    /// Predicted start of exposure for a frame, or `None` before the first
    /// sample.
    fn predict_soe(&self, frame: u32) -> Option<ClockTime> {
        let anchor = self.last_soe?;
        let interval = self.interval.unwrap_or(DEFAULT_FRAME_INTERVAL);

        Some(if frame >= anchor.sequence {
            anchor
                .when
                .saturating_add(interval.saturating_mul((frame - anchor.sequence) as u64))
        } else {
            anchor
                .when
                .saturating_sub(interval.saturating_mul((anchor.sequence - frame) as u64))
        })
    }

    /// When an action is due. `None` means the reference frame's SOE cannot
    /// be predicted yet (no history, or the offset reaches before frame 0);
    /// such actions are due immediately.
    fn due_time(&self, action: &FrameAction) -> Option<ClockTime> {
        let kind = action.payload.kind();
        let offset = frame_offset(kind);

        let reference = if offset >= 0 {
            action.frame.checked_add(offset as u32)?
        } else {
            action.frame.checked_sub(offset.unsigned_abs())?
        };

        Some(self.predict_soe(reference)?.saturating_add(stage_delay(kind)))
    }

    /// Release every action due at `now`, in strict frame-major order and
    /// scheduling order within a frame.
    pub fn take_due(&mut self, now: ClockTime) -> Vec<FrameAction> {
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending.len());

        for pending in std::mem::take(&mut self.pending) {
            match self.due_time(&pending.action) {
                Some(t) if t > now => remaining.push(pending),
                _ => due.push(pending),
            }
        }

        self.pending = remaining;

        due.sort_by_key(|p| (p.action.frame, p.seq));
        due.into_iter().map(|p| p.action).collect()
    }

    /// The earliest pending due instant, for arming a host timer.
    /// `Some(ClockTime::ZERO)` means an action is due immediately.
    pub fn next_deadline(&self) -> Option<ClockTime> {
        self.pending
            .iter()
            .map(|p| self.due_time(&p.action).unwrap_or(ClockTime::ZERO))
            .min()
    }

    /// Number of actions waiting to be released.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop all pending actions and exposure history. Called on stop;
    /// nothing scheduled before a reset can fire after it.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.last_soe = None;
        self.interval = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_action(frame: u32) -> FrameAction {
        FrameAction {
            frame,
            payload: ActionPayload::QueueBuffers,
        }
    }

    fn sensor_action(frame: u32) -> FrameAction {
        FrameAction {
            frame,
            payload: ActionPayload::SetSensor(ControlList::new()),
        }
    }

    #[test]
    fn test_delay_table() {
        assert_eq!(frame_offset(FrameActionKind::SetSensor), -1);
        assert_eq!(stage_delay(FrameActionKind::SetSensor).millis(), 5);
        assert_eq!(frame_offset(FrameActionKind::Soe), 0);
        assert_eq!(frame_offset(FrameActionKind::QueueBuffers), -1);
        assert_eq!(stage_delay(FrameActionKind::QueueBuffers).millis(), 10);
    }

    #[test]
    fn test_no_history_releases_immediately() {
        let mut timeline = Timeline::new();
        timeline.schedule(queue_action(0));

        let due = timeline.take_due(ClockTime::ZERO);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].frame, 0);
        assert_eq!(timeline.pending(), 0);
    }

    #[test]
    fn test_actions_wait_for_predicted_soe() {
        let mut timeline = Timeline::new();
        timeline.notify_start_of_exposure(0, ClockTime::from_millis(100));

        // Frame 3's QueueBuffers anchors on frame 2's SOE (offset -1):
        // predicted 100ms + 2*33ms = 166ms, plus the 10ms stage delay.
        timeline.schedule(queue_action(3));

        assert!(timeline.take_due(ClockTime::from_millis(170)).is_empty());
        assert_eq!(timeline.pending(), 1);

        let due = timeline.take_due(ClockTime::from_millis(180));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_release_order_is_frame_major() {
        let mut timeline = Timeline::new();
        timeline.schedule(queue_action(2));
        timeline.schedule(sensor_action(1));
        timeline.schedule(queue_action(1));

        let due = timeline.take_due(ClockTime::ZERO);
        let order: Vec<_> = due
            .iter()
            .map(|a| (a.frame, a.payload.kind()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, FrameActionKind::SetSensor),
                (1, FrameActionKind::QueueBuffers),
                (2, FrameActionKind::QueueBuffers),
            ]
        );
    }

    #[test]
    fn test_interval_estimated_from_samples() {
        let mut timeline = Timeline::new();
        timeline.notify_start_of_exposure(0, ClockTime::from_millis(0));
        timeline.notify_start_of_exposure(1, ClockTime::from_millis(10));

        // Interval is now 10ms: frame 5's QueueBuffers anchors on frame 4 at
        // 40ms, due at 50ms.
        timeline.schedule(queue_action(5));
        assert!(timeline.take_due(ClockTime::from_millis(49)).is_empty());
        assert_eq!(timeline.take_due(ClockTime::from_millis(50)).len(), 1);
    }

    #[test]
    fn test_negative_soe_offset() {
        let mut timeline = Timeline::new();
        timeline.set_time_offset(FrameActionKind::Soe, -5_000_000);
        timeline.record_image_buffer(0, ClockTime::from_millis(100));

        // Anchor is 95ms; frame 1's QueueBuffers is due at 95 + 10 = 105ms.
        timeline.schedule(queue_action(1));
        assert!(timeline.take_due(ClockTime::from_millis(104)).is_empty());
        assert_eq!(timeline.take_due(ClockTime::from_millis(105)).len(), 1);
    }

    #[test]
    fn test_stale_soe_sample_ignored() {
        let mut timeline = Timeline::new();
        timeline.notify_start_of_exposure(5, ClockTime::from_millis(500));
        timeline.notify_start_of_exposure(5, ClockTime::from_millis(900));
        timeline.notify_start_of_exposure(3, ClockTime::from_millis(100));

        // Anchor still at frame 5 / 500ms with the default interval.
        timeline.schedule(queue_action(6));
        assert!(timeline.take_due(ClockTime::from_millis(509)).is_empty());
        assert_eq!(timeline.take_due(ClockTime::from_millis(510)).len(), 1);
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut timeline = Timeline::new();
        timeline.notify_start_of_exposure(0, ClockTime::from_millis(100));
        timeline.schedule(queue_action(10));
        timeline.schedule(sensor_action(11));
        assert_eq!(timeline.pending(), 2);

        timeline.reset();
        assert_eq!(timeline.pending(), 0);
        assert!(timeline.take_due(ClockTime::from_millis(10_000)).is_empty());

        // History is gone too: new actions release immediately again.
        timeline.schedule(queue_action(12));
        assert_eq!(timeline.take_due(ClockTime::ZERO).len(), 1);
    }

    #[test]
    fn test_next_deadline() {
        let mut timeline = Timeline::new();
        assert!(timeline.next_deadline().is_none());

        timeline.notify_start_of_exposure(0, ClockTime::from_millis(100));
        timeline.schedule(queue_action(2));
        // Frame 1 SOE predicted at 133ms, QueueBuffers due at 143ms.
        assert_eq!(
            timeline.next_deadline(),
            Some(ClockTime::from_millis(143))
        );

        timeline.schedule(queue_action(0));
        assert_eq!(timeline.next_deadline(), Some(ClockTime::ZERO));
    }
}
