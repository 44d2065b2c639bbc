//! Device and precision planning.
//!
//! Callers describe placement either once for both models or per role.
//! [`plan`] resolves that into a [`DevicePlan`] up front so the hot path
//! never branches on the shape of the request. Devices are kept as
//! [`DeviceKind`] descriptors until a model is actually loaded; planning
//! never touches a GPU.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device};

use crate::{Error, Result};

/// The two model roles of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    /// The autoregressive token model.
    Sequence,
    /// The tokens → waveform model.
    Codec,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Sequence => write!(f, "sequence"),
            ModelRole::Codec => write!(f, "codec"),
        }
    }
}

/// A compute device that has not been opened yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceKind {
    /// Open the device.
    pub fn open(&self) -> Result<Device> {
        Ok(match *self {
            DeviceKind::Cpu => Device::Cpu,
            DeviceKind::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceKind::Metal(ordinal) => Device::new_metal(ordinal)?,
        })
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    /// Accepts `cpu`, `cuda`, `cuda:N`, `metal`, `metal:N` (any case).
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        let (name, ordinal) = match lower.split_once(':') {
            Some((name, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .map_err(|_| Error::Config(format!("invalid device ordinal in {s:?}")))?;
                (name, Some(ordinal))
            }
            None => (lower.as_str(), None),
        };
        match (name, ordinal) {
            ("cpu", None) => Ok(DeviceKind::Cpu),
            ("cuda", ordinal) => Ok(DeviceKind::Cuda(ordinal.unwrap_or(0))),
            ("metal" | "mps", ordinal) => Ok(DeviceKind::Metal(ordinal.unwrap_or(0))),
            _ => Err(Error::Config(format!(
                "unknown device {s:?}; expected cpu, cuda[:N] or metal[:N]"
            ))),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            DeviceKind::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}

/// Parse a precision name: `float32|fp32|f32`, `float16|fp16|f16`, `bfloat16|bf16`.
pub fn parse_dtype(s: &str) -> Result<DType> {
    match s.trim().to_lowercase().as_str() {
        "float32" | "fp32" | "f32" => Ok(DType::F32),
        "float16" | "fp16" | "f16" => Ok(DType::F16),
        "bfloat16" | "bf16" => Ok(DType::BF16),
        _ => Err(Error::Config(format!(
            "unknown dtype {s:?}; expected float32, float16 or bfloat16"
        ))),
    }
}

/// Either one value for both roles or one per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerRole<T> {
    Single(T),
    Split { sequence: T, codec: T },
}

impl<T: Copy> PerRole<T> {
    pub fn get(&self, role: ModelRole) -> T {
        match (*self, role) {
            (PerRole::Single(value), _) => value,
            (PerRole::Split { sequence, .. }, ModelRole::Sequence) => sequence,
            (PerRole::Split { codec, .. }, ModelRole::Codec) => codec,
        }
    }
}

/// Where the models should live.
pub type DeviceSpec = PerRole<DeviceKind>;

/// Numeric precision of each model.
pub type PrecisionSpec = PerRole<DType>;

impl Default for PrecisionSpec {
    /// The sequence model runs in bf16, the codec in f32.
    fn default() -> Self {
        PerRole::Split {
            sequence: DType::BF16,
            codec: DType::F32,
        }
    }
}

/// Device and precision of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub device: DeviceKind,
    pub dtype: DType,
}

/// Concrete placement of both models plus the effective residency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePlan {
    pub sequence: Placement,
    pub codec: Placement,
    /// `false` whenever the models live on different devices.
    pub lazy_load: bool,
}

impl DevicePlan {
    pub fn placement(&self, role: ModelRole) -> Placement {
        match role {
            ModelRole::Sequence => self.sequence,
            ModelRole::Codec => self.codec,
        }
    }
}

/// Resolve device and precision specs into a [`DevicePlan`].
///
/// Lazy loading requires both models on the same device: handing frames
/// from one device to the other needs both resident at once.
pub fn plan(device: DeviceSpec, precision: PrecisionSpec, lazy_load: bool) -> DevicePlan {
    let sequence = Placement {
        device: device.get(ModelRole::Sequence),
        dtype: precision.get(ModelRole::Sequence),
    };
    let codec = Placement {
        device: device.get(ModelRole::Codec),
        dtype: precision.get(ModelRole::Codec),
    };

    let single_device = sequence.device == codec.device;
    if !single_device && lazy_load {
        tracing::warn!(
            sequence_device = %sequence.device,
            codec_device = %codec.device,
            "models placed on different devices, lazy loading is turned off"
        );
    }
    let lazy_load = lazy_load && single_device;

    tracing::info!(
        sequence_device = %sequence.device,
        sequence_dtype = ?sequence.dtype,
        codec_device = %codec.device,
        codec_dtype = ?codec.dtype,
        lazy_load,
        "device plan"
    );

    DevicePlan {
        sequence,
        codec,
        lazy_load,
    }
}
