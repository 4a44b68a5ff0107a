//! Host readings. Values are normalized here so nothing downstream sees
//! `NaN` or out-of-range numbers.

use sysinfo::System;
use tracing::warn;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One named value, not yet stamped with host and time.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: f64,
    pub unit: String,
}
impl Reading {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

pub trait Sampler: core::fmt::Debug + Send {
    fn name(&self) -> &str;
    fn sample(&mut self) -> Vec<Reading>;
}

/// `NaN` reads as 0; everything else is clamped to `[0, 100]`.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Non-finite and negative values read as 0.
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// The machine's host name, or `unknown` if the OS does not report one.
pub fn resolve_host_name() -> String {
    match System::host_name() {
        Some(name) if !name.is_empty() => name,
        _ => {
            warn!("could not determine host name, using 'unknown'");
            "unknown".to_string()
        }
    }
}

/// Global CPU usage as a percentage. The first reading after construction
/// is 0 because usage is computed between two refreshes.
#[derive(Debug)]
pub struct CpuSampler {
    sys: System,
}
impl CpuSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }
}
impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}
impl Sampler for CpuSampler {
    fn name(&self) -> &str {
        "cpu"
    }
    fn sample(&mut self) -> Vec<Reading> {
        self.sys.refresh_cpu_usage();
        let usage = f64::from(self.sys.global_cpu_usage());
        vec![Reading::new("cpu", clamp_percent(usage), "%")]
    }
}

#[derive(Debug)]
pub struct MemorySampler {
    sys: System,
}
impl MemorySampler {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}
impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
impl Sampler for MemorySampler {
    fn name(&self) -> &str {
        "memory"
    }
    fn sample(&mut self) -> Vec<Reading> {
        self.sys.refresh_memory();
        let mb = |bytes: u64| non_negative(bytes as f64 / BYTES_PER_MB);
        vec![
            Reading::new("memory_free", mb(self.sys.free_memory()), "MB"),
            Reading::new("memory_total", mb(self.sys.total_memory()), "MB"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped() {
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(150.0), 100.0);
        assert_eq!(clamp_percent(f64::INFINITY), 100.0);
        assert_eq!(clamp_percent(42.5), 42.5);
    }

    #[test]
    fn non_negative_rejects_garbage() {
        assert_eq!(non_negative(f64::NAN), 0.0);
        assert_eq!(non_negative(f64::NEG_INFINITY), 0.0);
        assert_eq!(non_negative(-1.0), 0.0);
        assert_eq!(non_negative(8.0), 8.0);
    }

    #[test]
    fn cpu_sample_is_in_range() {
        let mut sampler = CpuSampler::new();
        let readings = sampler.sample();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].name, "cpu");
        assert!((0.0..=100.0).contains(&readings[0].value));
    }

    #[test]
    fn memory_sample_reports_free_and_total() {
        let mut sampler = MemorySampler::new();
        let readings = sampler.sample();
        let names: Vec<&str> = readings.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["memory_free", "memory_total"]);
        assert!(readings.iter().all(|r| r.unit == "MB" && r.value >= 0.0));
    }
}
