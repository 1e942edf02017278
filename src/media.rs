//! Media controller graph surface: matching, links and device opening.

use crate::sensor::CameraSensor;
use crate::video::{DeviceError, Subdevice, VideoDevice};

/// A match specification for a media device: driver name plus the entities
/// the pipeline requires.
#[derive(Clone, Debug)]
pub struct DeviceMatch {
    driver: String,
    entities: Vec<String>,
}

impl DeviceMatch {
    /// Create a match for the given driver name.
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            entities: Vec::new(),
        }
    }

    /// Require an entity to be present.
    pub fn add(&mut self, entity: impl Into<String>) {
        self.entities.push(entity.into());
    }

    /// The driver name to match.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// The required entities.
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Check a media device against this specification.
    pub fn matches(&self, media: &dyn MediaDevice) -> bool {
        media.driver() == self.driver && self.entities.iter().all(|e| media.has_entity(e))
    }
}

/// An acquired media device graph.
///
/// Covers the two things the pipelines do with the graph: route links and
/// open the devices behind entities.
pub trait MediaDevice {
    /// The kernel driver name.
    fn driver(&self) -> &str;

    /// Check whether the graph contains an entity.
    fn has_entity(&self, name: &str) -> bool;

    /// Disable every link in the graph.
    fn disable_links(&mut self) -> Result<(), DeviceError>;

    /// Enable or disable the link between two pads.
    fn set_link(
        &mut self,
        source: &str,
        source_pad: u32,
        sink: &str,
        sink_pad: u32,
        enable: bool,
    ) -> Result<(), DeviceError>;

    /// Check whether the link between two pads is enabled.
    fn link_enabled(&self, source: &str, source_pad: u32, sink: &str, sink_pad: u32) -> bool;

    /// Names of the entities whose links feed the given sink pad.
    ///
    /// Used to enumerate the sensors connected to the CSI-2 receiver.
    fn sensor_entities(&self, sink: &str, sink_pad: u32) -> Vec<String>;

    /// Open the video device node behind an entity.
    fn open_video(&mut self, entity: &str) -> Result<Box<dyn VideoDevice>, DeviceError>;

    /// Open the subdevice node behind an entity.
    fn open_subdevice(&mut self, entity: &str) -> Result<Box<dyn Subdevice>, DeviceError>;

    /// Open an entity as a camera sensor.
    fn open_sensor(&mut self, entity: &str) -> Result<Box<dyn CameraSensor>, DeviceError>;
}

/// Enumerates media devices and hands over those matching a specification.
pub trait DeviceEnumerator {
    /// Acquire the first media device matching `dm`, if any.
    fn acquire(&mut self, dm: &DeviceMatch) -> Option<Box<dyn MediaDevice>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeGraph {
        driver: &'static str,
        entities: Vec<&'static str>,
    }

    impl MediaDevice for FakeGraph {
        fn driver(&self) -> &str {
            self.driver
        }

        fn has_entity(&self, name: &str) -> bool {
            self.entities.iter().any(|e| *e == name)
        }

        fn disable_links(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn set_link(
            &mut self,
            _source: &str,
            _source_pad: u32,
            _sink: &str,
            _sink_pad: u32,
            _enable: bool,
        ) -> Result<(), DeviceError> {
            Ok(())
        }

        fn link_enabled(&self, _: &str, _: u32, _: &str, _: u32) -> bool {
            false
        }

        fn sensor_entities(&self, _sink: &str, _sink_pad: u32) -> Vec<String> {
            Vec::new()
        }

        fn open_video(&mut self, entity: &str) -> Result<Box<dyn VideoDevice>, DeviceError> {
            Err(DeviceError::NotFound(entity.into()))
        }

        fn open_subdevice(&mut self, entity: &str) -> Result<Box<dyn Subdevice>, DeviceError> {
            Err(DeviceError::NotFound(entity.into()))
        }

        fn open_sensor(&mut self, entity: &str) -> Result<Box<dyn CameraSensor>, DeviceError> {
            Err(DeviceError::NotFound(entity.into()))
        }
    }

    #[test]
    fn test_device_match() {
        let graph = FakeGraph {
            driver: "rkisp1",
            entities: vec!["rkisp1-isp-subdev", "rkisp1_mainpath"],
        };

        let mut dm = DeviceMatch::new("rkisp1");
        dm.add("rkisp1-isp-subdev");
        assert!(dm.matches(&graph));

        dm.add("rkisp1-statistics");
        assert!(!dm.matches(&graph));

        let other = DeviceMatch::new("sun6i-csi");
        assert!(!other.matches(&graph));
    }
}
