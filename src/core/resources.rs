//! Admission control for the interpolation scheduler.
//!
//! The controller owns no domain data. It turns a hardware profile, chosen
//! once at startup, and live memory/CPU readings into an [`ExecutionPlan`]
//! (worker count and dates per batch) that the scheduler consults before
//! dispatching work.

use crate::types::{GridError, GridResult};
use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Point-in-time memory and CPU reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSnapshot {
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    /// Global CPU usage in percent (0-100)
    pub cpu_usage_percent: f32,
}

impl SystemSnapshot {
    /// Fraction of memory in use, 0.0-1.0
    pub fn memory_utilization(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let used = self.total_memory_bytes.saturating_sub(self.available_memory_bytes);
        used as f64 / self.total_memory_bytes as f64
    }
}

/// Source of system telemetry
pub trait SystemMonitor: Send {
    /// Number of logical cores available to this process
    fn logical_cores(&self) -> usize;

    /// Fresh memory/CPU reading
    fn snapshot(&mut self) -> SystemSnapshot;
}

/// Live telemetry backed by `sysinfo`
pub struct SysinfoMonitor {
    system: sysinfo::System,
    cores: usize,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        // CPU usage is a delta between two refreshes
        system.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|_| system.cpus().len().max(1));
        Self { system, cores }
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor for SysinfoMonitor {
    fn logical_cores(&self) -> usize {
        self.cores
    }

    fn snapshot(&mut self) -> SystemSnapshot {
        self.system.refresh_memory();
        self.system.refresh_cpu();
        SystemSnapshot {
            total_memory_bytes: self.system.total_memory(),
            available_memory_bytes: self.system.available_memory(),
            cpu_usage_percent: self.system.global_cpu_info().cpu_usage(),
        }
    }
}

/// Hardware class used to pick the baseline plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareClass {
    Server,
    Workstation,
    Standard,
    Constrained,
}

/// Baseline worker count and batch size for a hardware class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardwareProfile {
    pub class: HardwareClass,
    pub max_parallelism: usize,
    pub base_batch_size: usize,
}

struct ProfileRule {
    class: HardwareClass,
    min_memory_bytes: u64,
    min_cores: usize,
    /// Cores left free for the writer and the OS
    reserved_cores: usize,
    batch_size: usize,
}

/// Ordered from most to least capable; the first matching rule wins.
/// Memory floors sit below the nominal 64/16/8 GB: the reported total
/// excludes firmware-reserved RAM.
const PROFILE_RULES: &[ProfileRule] = &[
    ProfileRule { class: HardwareClass::Server, min_memory_bytes: 60 * GIB, min_cores: 16, reserved_cores: 2, batch_size: 30 },
    ProfileRule { class: HardwareClass::Workstation, min_memory_bytes: 15 * GIB, min_cores: 8, reserved_cores: 1, batch_size: 14 },
    ProfileRule { class: HardwareClass::Standard, min_memory_bytes: 7 * GIB, min_cores: 4, reserved_cores: 1, batch_size: 7 },
    ProfileRule { class: HardwareClass::Constrained, min_memory_bytes: 0, min_cores: 1, reserved_cores: 0, batch_size: 3 },
];

impl HardwareProfile {
    /// Pick the profile for a machine from total memory and logical cores
    pub fn detect(total_memory_bytes: u64, logical_cores: usize) -> Self {
        let cores = logical_cores.max(1);
        let rule = PROFILE_RULES
            .iter()
            .find(|r| total_memory_bytes >= r.min_memory_bytes && cores >= r.min_cores)
            .unwrap_or(&PROFILE_RULES[PROFILE_RULES.len() - 1]);

        let max_parallelism = match rule.class {
            HardwareClass::Constrained => cores.min(2),
            _ => cores.saturating_sub(rule.reserved_cores).max(1),
        };

        Self {
            class: rule.class,
            max_parallelism,
            base_batch_size: rule.batch_size,
        }
    }
}

/// Memory and CPU thresholds for degrading the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    /// Utilization above which work is scaled to three quarters
    pub elevated_utilization: f64,
    /// Utilization above which work is halved
    pub high_utilization: f64,
    /// Utilization above which execution turns sequential
    pub stress_utilization: f64,
    /// Available memory below which execution turns sequential
    pub min_free_memory_bytes: u64,
    /// CPU usage above which parallelism is halved
    pub cpu_busy_percent: f32,
    /// Batches dispatched between two plan re-evaluations
    pub reconsult_every: usize,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            elevated_utilization: 0.75,
            high_utilization: 0.85,
            stress_utilization: 0.90,
            min_free_memory_bytes: 512 * MIB,
            cpu_busy_percent: 95.0,
            reconsult_every: 4,
        }
    }
}

impl ResourceThresholds {
    pub fn validate(&self) -> GridResult<()> {
        let ordered = 0.0 < self.elevated_utilization
            && self.elevated_utilization < self.high_utilization
            && self.high_utilization < self.stress_utilization
            && self.stress_utilization <= 1.0;
        if !ordered {
            return Err(GridError::Config(format!(
                "utilization thresholds must satisfy 0 < elevated < high < stress <= 1, got {} / {} / {}",
                self.elevated_utilization, self.high_utilization, self.stress_utilization
            )));
        }
        if self.reconsult_every == 0 {
            return Err(GridError::Config("reconsult_every must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Severity of observed memory pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

/// Worker count and dates per batch for the next dispatch window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub parallelism: usize,
    pub batch_size: usize,
    pub pressure: PressureLevel,
}

impl ExecutionPlan {
    pub fn is_sequential(&self) -> bool {
        self.parallelism == 1
    }
}

/// Pure mapping from telemetry to an execution plan
#[derive(Debug, Clone)]
pub struct ResourcePolicy {
    profile: HardwareProfile,
    thresholds: ResourceThresholds,
}

impl ResourcePolicy {
    pub fn new(profile: HardwareProfile, thresholds: ResourceThresholds) -> GridResult<Self> {
        thresholds.validate()?;
        Ok(Self { profile, thresholds })
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.thresholds
    }

    /// Plan for the given reading
    pub fn plan(&self, snapshot: &SystemSnapshot) -> ExecutionPlan {
        let utilization = snapshot.memory_utilization();
        let base_parallelism = self.profile.max_parallelism.max(1);
        let base_batch = self.profile.base_batch_size.max(1);

        if snapshot.available_memory_bytes < self.thresholds.min_free_memory_bytes
            || utilization > self.thresholds.stress_utilization
        {
            return ExecutionPlan {
                parallelism: 1,
                batch_size: (base_batch / 4).max(1),
                pressure: PressureLevel::Critical,
            };
        }

        let (factor, pressure) = if utilization > self.thresholds.high_utilization {
            (0.5, PressureLevel::High)
        } else if utilization > self.thresholds.elevated_utilization {
            (0.75, PressureLevel::Elevated)
        } else {
            (1.0, PressureLevel::Normal)
        };

        let scale = |value: usize| ((value as f64 * factor).floor() as usize).max(1);
        let mut parallelism = scale(base_parallelism);
        if snapshot.cpu_usage_percent > self.thresholds.cpu_busy_percent {
            parallelism = (parallelism / 2).max(1);
        }

        ExecutionPlan {
            parallelism,
            batch_size: scale(base_batch),
            pressure,
        }
    }
}

/// Policy plus telemetry source, consulted by the batch scheduler
pub struct ResourceController {
    policy: ResourcePolicy,
    monitor: Box<dyn SystemMonitor>,
    current: Option<ExecutionPlan>,
}

impl ResourceController {
    /// Detect the hardware profile from `monitor` and build the controller
    pub fn new(mut monitor: Box<dyn SystemMonitor>, thresholds: ResourceThresholds) -> GridResult<Self> {
        let snapshot = monitor.snapshot();
        let profile = HardwareProfile::detect(snapshot.total_memory_bytes, monitor.logical_cores());
        log::info!(
            "🖥️  Hardware profile: {:?} ({} workers, {} dates/batch, {:.1} GiB, {} cores)",
            profile.class,
            profile.max_parallelism,
            profile.base_batch_size,
            snapshot.total_memory_bytes as f64 / GIB as f64,
            monitor.logical_cores()
        );
        Self::with_policy(ResourcePolicy::new(profile, thresholds)?, monitor)
    }

    pub fn with_policy(policy: ResourcePolicy, monitor: Box<dyn SystemMonitor>) -> GridResult<Self> {
        Ok(Self { policy, monitor, current: None })
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    pub fn reconsult_every(&self) -> usize {
        self.policy.thresholds.reconsult_every
    }

    /// Take a fresh reading and return the plan for the next window
    pub fn plan(&mut self) -> ExecutionPlan {
        let snapshot = self.monitor.snapshot();
        let plan = self.policy.plan(&snapshot);

        if self.current.map(|c| c != plan).unwrap_or(true) {
            let message = format!(
                "Execution plan: {} workers, {} dates/batch (memory {:.0}% used, cpu {:.0}%)",
                plan.parallelism,
                plan.batch_size,
                snapshot.memory_utilization() * 100.0,
                snapshot.cpu_usage_percent
            );
            if plan.pressure >= PressureLevel::High {
                log::warn!("⚠️  {:?} memory pressure. {}", plan.pressure, message);
            } else {
                log::info!("{}", message);
            }
        }

        self.current = Some(plan);
        plan
    }

    /// Most recent plan, if any
    pub fn current_plan(&self) -> Option<ExecutionPlan> {
        self.current
    }
}
