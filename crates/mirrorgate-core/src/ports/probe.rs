//! SystemProbe port - host resource readings.

use std::io;
use std::path::Path;

/// One CPU/memory reading, both in percent (0.0..=100.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

pub trait SystemProbe: Send + Sync {
    /// Process-wide CPU and memory utilisation right now.
    fn sample(&self) -> ResourceSample;

    /// Free bytes on the volume that holds `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}
