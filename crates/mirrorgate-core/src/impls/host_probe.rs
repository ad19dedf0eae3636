//! HostProbe - CPU/memory/disk readings of the machine we run on.

use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::ports::{ResourceSample, SystemProbe};

/// `System` keeps the previous CPU counters, so usage is measured over the
/// time between two `sample()` calls (one sweep period).
pub struct HostProbe {
    system: Mutex<System>,
}

impl HostProbe {
    pub fn new() -> Self {
        let refresh = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn sample(&self) -> ResourceSample {
        let mut system = self.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        ResourceSample {
            cpu_percent: system.global_cpu_usage(),
            memory_percent,
        }
    }

    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_percentages() {
        let probe = HostProbe::new();
        let sample = probe.sample();
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
    }

    #[test]
    fn free_space_of_temp_dir_is_known() {
        let probe = HostProbe::new();
        assert!(probe.available_space(&std::env::temp_dir()).is_ok());
    }
}
