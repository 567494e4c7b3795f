use std::fmt;
use std::sync::Arc;

use candle_core::{DType, Device};

use crate::error::{PredictError, Result};

/// Which memory a [`MemoryUsage`] sample describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    /// Resident memory of this process on the host.
    Host,
    /// Allocations on the compute device.
    Device,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Host => "host",
            MemoryScope::Device => "device",
        }
    }
}

/// Memory figures reported when a request asks for debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub scope: MemoryScope,
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub reserved_peak_bytes: Option<u64>,
}

pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Option<MemoryUsage>;
}

/// Reads resident and peak memory of this process from `/proc/self/status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_proc_status(&status)
    }
}

fn parse_proc_status(status: &str) -> Option<MemoryUsage> {
    let field = |name: &str| -> Option<u64> {
        let line = status.lines().find(|l| l.starts_with(name))?;
        let kb = line[name.len()..]
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse::<u64>()
            .ok()?;
        Some(kb * 1024)
    };

    Some(MemoryUsage {
        scope: MemoryScope::Host,
        current_bytes: field("VmRSS:")?,
        peak_bytes: field("VmHWM:")?,
        reserved_peak_bytes: field("VmPeak:"),
    })
}

/// The compute device the predictor places weights on, injected at setup.
#[derive(Clone)]
pub struct ComputeDevice {
    device: Device,
    probe: Arc<dyn MemoryProbe>,
}

impl ComputeDevice {
    pub fn new(device: Device, probe: Arc<dyn MemoryProbe>) -> Self {
        Self { device, probe }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu, Arc::new(ProcessMemoryProbe))
    }

    /// CUDA device `ordinal` when the crate is built with CUDA support, else the CPU.
    /// candle exposes no allocator statistics, so memory reports stay host-side
    /// and are labelled [`MemoryScope::Host`] on either device.
    pub fn cuda_if_available(ordinal: usize) -> Result<Self> {
        let device = Device::cuda_if_available(ordinal)
            .map_err(|e| PredictError::load("selecting compute device", e))?;
        Ok(Self::new(device, Arc::new(ProcessMemoryProbe)))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_accelerator(&self) -> bool {
        !self.device.is_cpu()
    }

    /// Precision pretrained weights are materialised at. CPU kernels stay in f32,
    /// half precision on T5 is only worth it on an accelerator.
    pub fn reduced_precision(&self) -> DType {
        if self.is_accelerator() {
            DType::F16
        } else {
            DType::F32
        }
    }

    pub fn memory_usage(&self) -> Option<MemoryUsage> {
        self.probe.sample()
    }
}

impl fmt::Debug for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("device", &self.device)
            .finish()
    }
}

pub trait MemoryObserver: Send + Sync {
    fn observe(&self, usage: &MemoryUsage);
}

/// Default observer, emits one structured event per debug request.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMemoryObserver;

impl MemoryObserver for TracingMemoryObserver {
    fn observe(&self, usage: &MemoryUsage) {
        tracing::info!(
            scope = usage.scope.as_str(),
            current_bytes = usage.current_bytes,
            peak_bytes = usage.peak_bytes,
            reserved_peak_bytes = usage.reserved_peak_bytes,
            "memory usage"
        );
    }
}
