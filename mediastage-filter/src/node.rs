//! Filter node abstractions.

use crate::error::{FilterError, Result};
use crate::parser::FilterSpec;
use mediastage_core::error::ConfigError;
use mediastage_core::{Frame, MediaParams, MediaType, PixelFormat};
use mediastage_hwaccel::HardwareContext;
use std::fmt;

/// Where a frame's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Residency {
    /// Host memory.
    Software,
    /// A device surface.
    Hardware,
}

impl Residency {
    /// Residency of frames with these parameters.
    pub fn of_params(params: &MediaParams) -> Self {
        match params {
            MediaParams::Video(v) if v.format.is_hardware() => Residency::Hardware,
            _ => Residency::Software,
        }
    }

    /// Residency of a frame.
    pub fn of_frame(frame: &Frame) -> Self {
        if frame.is_hw_frame() {
            Residency::Hardware
        } else {
            Residency::Software
        }
    }

    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Residency::Software => "software",
            Residency::Hardware => "hardware",
        }
    }
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Residency a pad accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SinkResidency {
    #[default]
    Any,
    Software,
    Hardware,
}

impl SinkResidency {
    /// Check if frames of `residency` may enter.
    pub fn admits(&self, residency: Residency) -> bool {
        match self {
            SinkResidency::Any => true,
            SinkResidency::Software => residency == Residency::Software,
            SinkResidency::Hardware => residency == Residency::Hardware,
        }
    }

    /// Fail with a residency error naming `location` unless `residency` is admitted.
    pub fn check(&self, location: impl Into<String>, residency: Residency) -> std::result::Result<(), ConfigError> {
        if self.admits(residency) {
            return Ok(());
        }
        Err(ConfigError::Residency {
            location: location.into(),
            expected: self.expected_name().into(),
            actual: residency.name().into(),
        })
    }

    fn expected_name(&self) -> &'static str {
        match self {
            SinkResidency::Any => "any",
            SinkResidency::Software => "software",
            SinkResidency::Hardware => "hardware",
        }
    }
}

/// Format of the frames carried by a link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkFormat {
    /// Frame parameters. Hardware video carries the device pixel format.
    pub params: MediaParams,
    /// Format of the data inside device surfaces, for hardware video.
    pub sw_format: Option<PixelFormat>,
}

impl LinkFormat {
    /// Software frames or hardware frames whose surfaces hold `Nv12`.
    pub fn new(params: MediaParams) -> Self {
        let sw_format = (Residency::of_params(&params) == Residency::Hardware).then_some(PixelFormat::Nv12);
        Self { params, sw_format }
    }

    /// Hardware frames whose surfaces hold `sw_format`.
    pub fn hardware(params: MediaParams, sw_format: PixelFormat) -> Self {
        Self {
            params,
            sw_format: Some(sw_format),
        }
    }

    /// Residency of frames on this link.
    pub fn residency(&self) -> Residency {
        Residency::of_params(&self.params)
    }

    /// Media type of frames on this link.
    pub fn media_type(&self) -> MediaType {
        self.params.media_type()
    }
}

/// Everything a node sees while it is linked into a graph.
#[derive(Debug, Clone, Copy)]
pub struct LinkContext<'a> {
    /// Node instance name.
    pub node: &'a str,
    /// Format of the node's input link.
    pub input: &'a LinkFormat,
    /// The graph's hardware context, if the node has one.
    pub device: Option<&'a HardwareContext>,
}

impl LinkContext<'_> {
    /// The hardware context, or a configuration error naming the node.
    pub fn require_device(&self) -> std::result::Result<&HardwareContext, ConfigError> {
        self.device
            .ok_or_else(|| ConfigError::Missing(format!("hardware context for node '{}'", self.node)))
    }
}

/// A filter instance in a graph.
///
/// Nodes are one frame in, one frame out.
pub trait FilterNode: Send + fmt::Debug {
    /// Filter name, e.g. `scale`.
    fn filter_name(&self) -> &'static str;

    /// Media type handled, `None` for any.
    fn media_type(&self) -> Option<MediaType> {
        Some(MediaType::Video)
    }

    /// Residency accepted on the input pad.
    fn input_residency(&self) -> SinkResidency {
        SinkResidency::Software
    }

    /// Whether the node needs a hardware context.
    fn uses_device(&self) -> bool {
        false
    }

    /// Check the input link and return the output link format.
    fn configure(&mut self, link: &LinkContext<'_>) -> Result<LinkFormat>;

    /// Filter one frame.
    fn process(&mut self, frame: Frame) -> mediastage_core::Result<Frame>;
}

/// Instantiate a filter from its description.
pub fn create(spec: &FilterSpec) -> Result<Box<dyn FilterNode>> {
    use crate::nodes;

    let node: Box<dyn FilterNode> = match spec.name.as_str() {
        "null" => Box::new(nodes::Passthrough::video()),
        "anull" => Box::new(nodes::Passthrough::audio()),
        "scale" => Box::new(nodes::Scale::from_spec(spec)?),
        "format" => Box::new(nodes::Format::from_spec(spec)?),
        "volume" => Box::new(nodes::Volume::from_spec(spec)?),
        "hwupload" => Box::new(nodes::HwUpload::from_spec(spec)?),
        "hwdownload" => Box::new(nodes::HwDownload),
        name => match nodes::HwScale::device_for(name) {
            Some(device_type) => Box::new(nodes::HwScale::from_spec(spec, device_type)?),
            None => {
                return Err(FilterError::UnknownFilter {
                    name: name.to_string(),
                })
            }
        },
    };
    Ok(node)
}

/// Names of every built-in filter.
pub fn filter_names() -> &'static [&'static str] {
    &[
        "null",
        "anull",
        "scale",
        "format",
        "volume",
        "hwupload",
        "hwdownload",
        "scale_cuda",
        "scale_vaapi",
        "scale_vt",
        "scale_qsv",
    ]
}
