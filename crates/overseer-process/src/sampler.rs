//! Process resource sampling.

use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, ProcessExt, System, SystemExt};

/// One resource sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessStats {
    /// CPU usage in percent since the previous sample.
    pub cpu: f32,
    /// Resident memory in bytes.
    pub memory: u64,
}

/// Reads CPU and memory use of a process.
pub trait ProcessSampler: Send + Sync {
    /// Sample `pid`. `None` if the process is gone.
    fn sample(&self, pid: u32) -> Option<ProcessStats>;
}

/// Samples through `sysinfo`.
///
/// CPU usage is relative to the previous refresh, so the first sample
/// after start reads zero.
#[derive(Debug, Default)]
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    /// Create a sampler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ProcessSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> Option<ProcessStats> {
        let pid = Pid::from(usize::try_from(pid).ok()?);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| ProcessStats {
            cpu: process.cpu_usage(),
            memory: process.memory(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_current_process() {
        let sampler = SysinfoSampler::new();
        let stats = sampler.sample(std::process::id()).unwrap();
        assert!(stats.memory > 0);
    }

    #[test]
    fn test_missing_process() {
        let sampler = SysinfoSampler::new();
        assert!(sampler.sample(u32::MAX).is_none());
    }
}
