//! Real-Time Thread Scheduling
//!
//! Host time base conversion, time-constraint (deadline) scheduling and the
//! low-energy spin primitives used to fill idle time deterministically.
//!
//! # Platform Support
//!
//! - **macOS / iOS**: Mach absolute time, `THREAD_TIME_CONSTRAINT_POLICY`
//! - **Linux / Android**: `CLOCK_MONOTONIC`, `SCHED_DEADLINE` via `sched_setattr`
//!   (requires CAP_SYS_NICE or root)
//! - **Other**: process-relative `Instant` clock, no real-time policy

use std::sync::OnceLock;
use std::time::Duration;

use pl_core::REALTIME_THREAD_QUANTUM;

use crate::{RealtimeError, RealtimeResult};

/// Number of hardware delays in one unit of low-energy work
const HARDWARE_DELAYS_PER_WORK_UNIT: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════════
// Host time base
// ═══════════════════════════════════════════════════════════════════════════════

/// Ratio converting host time ticks to nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub numer: u32,
    pub denom: u32,
}

static TIMEBASE: OnceLock<Timebase> = OnceLock::new();

impl Timebase {
    /// Ask the OS for its host time base
    pub fn query() -> RealtimeResult<Self> {
        let timebase = platform_timebase()?;
        if timebase.numer == 0 || timebase.denom == 0 {
            return Err(RealtimeError::Timebase(format!(
                "degenerate ratio {}/{}",
                timebase.numer, timebase.denom
            )));
        }
        Ok(timebase)
    }

    /// Process-wide time base, queried once
    pub fn get() -> &'static Self {
        TIMEBASE.get_or_init(|| match Self::query() {
            Ok(timebase) => {
                log::debug!("Host time base {}/{}", timebase.numer, timebase.denom);
                timebase
            }
            Err(e) => pl_core::fatal(format_args!("{}", e)),
        })
    }

    #[inline]
    fn ticks_per_second(&self) -> f64 {
        1.0e9 * self.denom as f64 / self.numer as f64
    }
}

/// Convert seconds to host time ticks
#[inline]
pub fn seconds_to_host_time(seconds: f64) -> u64 {
    (seconds * Timebase::get().ticks_per_second()) as u64
}

/// Convert host time ticks to seconds
#[inline]
pub fn host_time_to_seconds(host_time: u64) -> f64 {
    host_time as f64 / Timebase::get().ticks_per_second()
}

#[inline]
pub fn duration_to_host_time(duration: Duration) -> u64 {
    seconds_to_host_time(duration.as_secs_f64())
}

#[cfg(target_vendor = "apple")]
mod mach {
    #[repr(C)]
    pub struct MachTimebaseInfo {
        pub numer: u32,
        pub denom: u32,
    }

    #[repr(C)]
    pub struct ThreadTimeConstraintPolicy {
        pub period: u32,
        pub computation: u32,
        pub constraint: u32,
        pub preemptible: i32,
    }

    pub const THREAD_TIME_CONSTRAINT_POLICY: u32 = 2;
    pub const THREAD_TIME_CONSTRAINT_POLICY_COUNT: u32 = 4;
    pub const KERN_SUCCESS: i32 = 0;

    unsafe extern "C" {
        pub fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
        pub fn mach_absolute_time() -> u64;
        pub fn pthread_mach_thread_np(thread: libc::pthread_t) -> u32;
        pub fn thread_policy_set(
            thread: u32,
            flavor: u32,
            policy_info: *const ThreadTimeConstraintPolicy,
            count: u32,
        ) -> i32;
    }
}

#[cfg(target_vendor = "apple")]
fn platform_timebase() -> RealtimeResult<Timebase> {
    let mut info = mach::MachTimebaseInfo { numer: 0, denom: 0 };
    let result = unsafe { mach::mach_timebase_info(&mut info) };
    if result != mach::KERN_SUCCESS {
        return Err(RealtimeError::Timebase(format!(
            "mach_timebase_info returned {}",
            result
        )));
    }
    Ok(Timebase {
        numer: info.numer,
        denom: info.denom,
    })
}

#[cfg(not(target_vendor = "apple"))]
fn platform_timebase() -> RealtimeResult<Timebase> {
    // Host time is counted in nanoseconds
    Ok(Timebase { numer: 1, denom: 1 })
}

/// Current host time in ticks
#[cfg(target_vendor = "apple")]
#[inline]
pub fn host_time_now() -> u64 {
    unsafe { mach::mach_absolute_time() }
}

/// Current host time in ticks
#[cfg(all(unix, not(target_vendor = "apple")))]
#[inline]
pub fn host_time_now() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Current host time in ticks
#[cfg(not(unix))]
#[inline]
pub fn host_time_now() -> u64 {
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

// ═══════════════════════════════════════════════════════════════════════════════
// Time-constraint policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Periodic real-time scheduling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeConstraintPolicy {
    /// Nominal spacing between activations
    pub period: Duration,
    /// CPU time needed per activation
    pub quantum: Duration,
    /// Deadline relative to activation
    pub constraint: Duration,
}

impl TimeConstraintPolicy {
    /// Policy for a thread woken once per audio buffer
    pub fn for_buffer_duration(buffer_duration: Duration) -> Self {
        Self {
            period: buffer_duration,
            quantum: REALTIME_THREAD_QUANTUM.min(buffer_duration),
            constraint: buffer_duration,
        }
    }
}

/// OS handle of a thread, used as the target of scheduling calls
#[derive(Debug, Clone)]
pub struct NativeThread {
    #[cfg(target_vendor = "apple")]
    port: u32,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    tid: libc::pid_t,
    name: String,
}

impl NativeThread {
    /// Handle of the calling thread
    pub fn current() -> Self {
        let name = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();

        Self {
            #[cfg(target_vendor = "apple")]
            port: unsafe { mach::pthread_mach_thread_np(libc::pthread_self()) },
            #[cfg(any(target_os = "linux", target_os = "android"))]
            tid: unsafe { libc::gettid() },
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Make the scheduler treat `thread` as a periodic real-time task
#[cfg(target_vendor = "apple")]
pub fn apply_time_constraint_policy(
    thread: &NativeThread,
    policy: &TimeConstraintPolicy,
) -> RealtimeResult<()> {
    let to_abs = |duration: Duration| duration_to_host_time(duration) as u32;
    let mach_policy = mach::ThreadTimeConstraintPolicy {
        period: to_abs(policy.period),
        computation: to_abs(policy.quantum),
        constraint: to_abs(policy.constraint),
        preemptible: 1,
    };

    let result = unsafe {
        mach::thread_policy_set(
            thread.port,
            mach::THREAD_TIME_CONSTRAINT_POLICY,
            &mach_policy,
            mach::THREAD_TIME_CONSTRAINT_POLICY_COUNT,
        )
    };
    if result != mach::KERN_SUCCESS {
        return Err(RealtimeError::ThreadPolicy {
            thread: thread.name.clone(),
            source: std::io::Error::other(format!("thread_policy_set returned {}", result)),
        });
    }

    log::debug!("Applied time constraint policy to {}: {:?}", thread.name, policy);
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SCHED_DEADLINE: u32 = 6;

/// `struct sched_attr` from the kernel uapi headers
#[cfg(any(target_os = "linux", target_os = "android"))]
#[repr(C)]
#[derive(Debug, Default)]
struct SchedAttr {
    size: u32,
    sched_policy: u32,
    sched_flags: u64,
    sched_nice: i32,
    sched_priority: u32,
    sched_runtime: u64,
    sched_deadline: u64,
    sched_period: u64,
}

/// Make the scheduler treat `thread` as a periodic real-time task
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn apply_time_constraint_policy(
    thread: &NativeThread,
    policy: &TimeConstraintPolicy,
) -> RealtimeResult<()> {
    let attr = SchedAttr {
        size: std::mem::size_of::<SchedAttr>() as u32,
        sched_policy: SCHED_DEADLINE,
        sched_runtime: policy.quantum.as_nanos() as u64,
        sched_deadline: policy.constraint.as_nanos() as u64,
        sched_period: policy.period.as_nanos() as u64,
        ..Default::default()
    };

    let result = unsafe {
        libc::syscall(
            libc::SYS_sched_setattr,
            thread.tid,
            &attr as *const SchedAttr,
            0u32,
        )
    };
    if result != 0 {
        return Err(RealtimeError::ThreadPolicy {
            thread: thread.name.clone(),
            source: std::io::Error::last_os_error(),
        });
    }

    log::debug!("Applied SCHED_DEADLINE to {}: {:?}", thread.name, policy);
    Ok(())
}

/// Make the scheduler treat `thread` as a periodic real-time task
#[cfg(not(any(target_vendor = "apple", target_os = "linux", target_os = "android")))]
pub fn apply_time_constraint_policy(
    _thread: &NativeThread,
    _policy: &TimeConstraintPolicy,
) -> RealtimeResult<()> {
    Err(RealtimeError::Unsupported("time constraint scheduling"))
}

/// Drop the calling thread to the lowest non-real-time priority
#[cfg(unix)]
pub fn set_current_thread_lowest_priority() -> RealtimeResult<()> {
    let thread = NativeThread::current();
    unsafe {
        let param = libc::sched_param {
            sched_priority: libc::sched_get_priority_min(libc::SCHED_OTHER),
        };
        let result = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_OTHER, &param);
        if result != 0 {
            return Err(RealtimeError::ThreadPolicy {
                thread: thread.name,
                source: std::io::Error::from_raw_os_error(result),
            });
        }
    }
    Ok(())
}

/// Drop the calling thread to the lowest non-real-time priority
#[cfg(not(unix))]
pub fn set_current_thread_lowest_priority() -> RealtimeResult<()> {
    Err(RealtimeError::Unsupported("thread priority"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Low-energy spinning
// ═══════════════════════════════════════════════════════════════════════════════

/// Stall the core briefly without hammering the memory system
#[inline(always)]
pub fn hardware_delay() {
    #[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
    unsafe {
        std::arch::asm!("wfe", options(nomem, nostack));
    }

    #[cfg(not(all(target_vendor = "apple", target_arch = "aarch64")))]
    std::hint::spin_loop();
}

/// One unit of work that keeps the core busy at minimal power
#[inline]
pub fn low_energy_work() {
    for _ in 0..HARDWARE_DELAYS_PER_WORK_UNIT {
        hardware_delay();
    }
}

/// Spin with low-energy work until `end_host_time` is reached
pub fn low_energy_work_until(end_host_time: u64) {
    while host_time_now() < end_host_time {
        low_energy_work();
    }
}

/// Host time `duration` from now, saturating at `u64::MAX`
#[inline]
pub fn host_time_after(duration: Duration) -> u64 {
    host_time_now().saturating_add(duration_to_host_time(duration))
}

/// Spin with low-energy work for `duration`
pub fn low_energy_work_for(duration: Duration) {
    low_energy_work_until(host_time_after(duration));
}

/// Index of the CPU the calling thread is running on, if the platform says
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
pub fn cpu_number() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).ok()
}

/// Index of the CPU the calling thread is running on, if the platform says
#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
#[inline]
pub fn cpu_number() -> Option<usize> {
    let value: u64;
    unsafe {
        std::arch::asm!("mrs {}, TPIDRRO_EL0", out(reg) value, options(nomem, nostack));
    }
    Some((value & 0x7) as usize)
}

/// Index of the CPU the calling thread is running on, if the platform says
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    all(target_vendor = "apple", target_arch = "aarch64")
)))]
#[inline]
pub fn cpu_number() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timebase_is_stable() {
        let first = Timebase::get();
        let second = Timebase::get();
        assert!(std::ptr::eq(first, second));
        assert_eq!(*first, Timebase::query().unwrap());
    }

    #[test]
    fn test_host_time_conversion() {
        let ticks = seconds_to_host_time(1.5);
        let seconds = host_time_to_seconds(ticks);
        assert!((seconds - 1.5).abs() < 1e-6, "got {}", seconds);
        assert_eq!(seconds_to_host_time(0.0), 0);
    }

    #[test]
    fn test_host_time_is_monotonic() {
        let a = host_time_now();
        let b = host_time_now();
        assert!(b >= a);
    }

    #[test]
    fn test_low_energy_work_for_waits_at_least_duration() {
        let start = std::time::Instant::now();
        low_energy_work_for(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_host_time_after_saturates() {
        assert_eq!(duration_to_host_time(Duration::MAX), u64::MAX);
        assert_eq!(host_time_after(Duration::MAX), u64::MAX);

        let before = host_time_now();
        assert!(host_time_after(Duration::ZERO) >= before);
    }

    #[test]
    fn test_low_energy_work_until_past_deadline_returns() {
        let start = host_time_now();
        low_energy_work_until(start.saturating_sub(1));
    }

    #[test]
    fn test_policy_for_buffer_duration() {
        let buffer = Duration::from_secs_f64(128.0 / 48000.0);
        let policy = TimeConstraintPolicy::for_buffer_duration(buffer);
        assert_eq!(policy.period, buffer);
        assert_eq!(policy.constraint, buffer);
        assert_eq!(policy.quantum, REALTIME_THREAD_QUANTUM);

        let tiny = Duration::from_micros(100);
        assert_eq!(TimeConstraintPolicy::for_buffer_duration(tiny).quantum, tiny);
    }

    #[test]
    fn test_native_thread_carries_name() {
        let handle = std::thread::Builder::new()
            .name("pl-test-thread".into())
            .spawn(|| NativeThread::current().name().to_string())
            .unwrap();
        assert_eq!(handle.join().unwrap(), "pl-test-thread");
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_cpu_number_within_range() {
        let cpu = cpu_number().expect("sched_getcpu");
        assert!(cpu < 4096);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_sched_attr_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<SchedAttr>(), 48);
    }
}
