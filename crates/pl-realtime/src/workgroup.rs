//! Audio Workgroups
//!
//! A workgroup groups the driver's real-time thread with the worker threads
//! helping it, so the OS can schedule them as one deadline-bound workload.
//! Drivers expose their workgroup through [`AudioWorkgroup`]; a thread joins
//! with [`AudioWorkgroup::join`] and leaves when the returned
//! [`WorkgroupMembership`] is dropped.

use std::fmt;
use std::marker::PhantomData;

use crate::RealtimeResult;

/// A set of threads the OS schedules together
pub trait AudioWorkgroup: Send + Sync {
    /// The system's recommended number of threads contributing to the workload
    fn max_parallel_threads(&self) -> usize;

    /// Join the calling thread to the workgroup
    fn join(&self) -> RealtimeResult<WorkgroupMembership>;
}

/// A thread's membership in a workgroup.
///
/// The calling thread leaves the workgroup when this is dropped, so it must
/// stay on the thread that joined.
pub struct WorkgroupMembership {
    leave: Option<Box<dyn FnOnce()>>,
    _not_send: PhantomData<*const ()>,
}

impl WorkgroupMembership {
    /// Membership that runs `leave` on the joined thread when dropped
    pub fn new(leave: impl FnOnce() + 'static) -> Self {
        Self {
            leave: Some(Box::new(leave)),
            _not_send: PhantomData,
        }
    }

    /// Membership with nothing to undo
    pub fn empty() -> Self {
        Self {
            leave: None,
            _not_send: PhantomData,
        }
    }
}

impl Drop for WorkgroupMembership {
    fn drop(&mut self) {
        if let Some(leave) = self.leave.take() {
            leave();
        }
    }
}

impl fmt::Debug for WorkgroupMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkgroupMembership")
            .field("active", &self.leave.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Linux: CPU affinity
// ═══════════════════════════════════════════════════════════════════════════════

/// Workgroup that pins its members to a fixed set of CPUs.
///
/// Joining replaces the thread's affinity mask; leaving restores the mask
/// the thread had before.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug, Clone)]
pub struct CpuAffinityWorkgroup {
    cpus: Vec<usize>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl CpuAffinityWorkgroup {
    pub fn new(cpus: Vec<usize>) -> Self {
        pl_core::assert_release!(!cpus.is_empty(), "Workgroup needs at least one CPU");
        Self { cpus }
    }

    /// Workgroup spanning the first `num_cpus` physical cores
    pub fn physical_cores() -> Self {
        Self::new((0..num_cpus::get_physical().max(1)).collect())
    }

    pub fn cpus(&self) -> &[usize] {
        &self.cpus
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod affinity {
    use std::io;

    use crate::{RealtimeError, RealtimeResult};

    pub fn get() -> RealtimeResult<libc::cpu_set_t> {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
                return Err(RealtimeError::WorkgroupJoin(format!(
                    "sched_getaffinity: {}",
                    io::Error::last_os_error()
                )));
            }
            Ok(set)
        }
    }

    pub fn set(set: &libc::cpu_set_t) -> RealtimeResult<()> {
        unsafe {
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set) != 0 {
                return Err(RealtimeError::WorkgroupJoin(format!(
                    "sched_setaffinity: {}",
                    io::Error::last_os_error()
                )));
            }
        }
        Ok(())
    }

    pub fn from_cpus(cpus: &[usize]) -> libc::cpu_set_t {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            for &cpu in cpus {
                libc::CPU_SET(cpu, &mut set);
            }
            set
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl AudioWorkgroup for CpuAffinityWorkgroup {
    fn max_parallel_threads(&self) -> usize {
        self.cpus.len()
    }

    fn join(&self) -> RealtimeResult<WorkgroupMembership> {
        let previous = affinity::get()?;
        affinity::set(&affinity::from_cpus(&self.cpus))?;
        log::debug!("Joined CPU affinity workgroup {:?}", self.cpus);

        Ok(WorkgroupMembership::new(move || {
            if let Err(e) = affinity::set(&previous) {
                log::warn!("Failed to restore CPU affinity: {}", e);
            }
        }))
    }
}
