//! Camera control lists exchanged with the sensor and the IPA.
//!
//! A [`ControlList`] is an ordered set of `(id, value)` pairs: the controls a
//! request asks for, the sensor writes the IPA schedules, and the per-frame
//! result metadata the IPA hands back. [`ControlInfoMap`] describes the
//! controls a device supports and their ranges.

/// Numeric identity of a control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ControlId(pub u32);

impl std::fmt::Display for ControlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctrl:{:#06x}", self.0)
    }
}

/// Auto-exposure enable (bool).
pub const AE_ENABLE: ControlId = ControlId(0x0001);
/// Manual exposure time in microseconds (int).
pub const EXPOSURE_TIME: ControlId = ControlId(0x0002);
/// Analogue gain as a multiplier (float).
pub const ANALOGUE_GAIN: ControlId = ControlId(0x0003);
/// Digital gain as a multiplier (float).
pub const DIGITAL_GAIN: ControlId = ControlId(0x0004);
/// Colour gains `[red, blue]` for white balance (bytes-encoded pair).
pub const COLOUR_GAINS: ControlId = ControlId(0x0005);

/// Possible values a control can carry.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// An ordered list of control values, keyed by [`ControlId`].
///
/// Lists are small (a handful of entries) so lookups are linear.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlList {
    entries: Vec<(ControlId, ControlValue)>,
}

impl ControlList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of controls in the list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set a control, replacing any existing value for the same id.
    pub fn set(&mut self, id: ControlId, value: ControlValue) {
        match self.entries.iter_mut().find(|(i, _)| *i == id) {
            Some((_, v)) => *v = value,
            None => self.entries.push((id, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, id: ControlId, value: ControlValue) -> Self {
        self.set(id, value);
        self
    }

    /// Get a control value by id.
    pub fn get(&self, id: ControlId) -> Option<&ControlValue> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, v)| v)
    }

    /// Check whether the list contains the given id.
    pub fn contains(&self, id: ControlId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate over `(id, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(ControlId, ControlValue)> {
        self.entries.iter()
    }
}

/// Range description of a supported control.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlInfo {
    /// Minimum accepted value.
    pub min: ControlValue,
    /// Maximum accepted value.
    pub max: ControlValue,
}

impl ControlInfo {
    /// Create a control range.
    pub fn new(min: ControlValue, max: ControlValue) -> Self {
        Self { min, max }
    }
}

/// The set of controls a device supports, with their ranges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlInfoMap {
    entries: Vec<(ControlId, ControlInfo)>,
}

impl ControlInfoMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of supported controls.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a control, replacing any existing entry for the same id.
    pub fn insert(&mut self, id: ControlId, info: ControlInfo) {
        match self.entries.iter_mut().find(|(i, _)| *i == id) {
            Some((_, v)) => *v = info,
            None => self.entries.push((id, info)),
        }
    }

    /// Get the range of a control by id.
    pub fn get(&self, id: ControlId) -> Option<&ControlInfo> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, v)| v)
    }

    /// Iterate over `(id, info)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = &(ControlId, ControlInfo)> {
        self.entries.iter()
    }
}
