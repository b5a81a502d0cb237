//! Release-mode assertions
//!
//! Contract violations on the render path (bad thread counts, frame counts,
//! pan positions) are programmer errors. They are checked in every build and
//! abort the process instead of unwinding through a real-time callback.

/// Abort the process with a logged message if `cond` is false.
///
/// Unlike `assert!`, this is never compiled out and never unwinds.
#[macro_export]
macro_rules! assert_release {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal(::std::format_args!($($arg)+));
        }
    };
}

/// Log `message` at error level and abort.
#[cold]
#[inline(never)]
pub fn fatal(message: std::fmt::Arguments<'_>) -> ! {
    log::error!("{}", message);
    eprintln!("{}", message);
    std::process::abort();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_release_passes_on_true() {
        let frames = 128;
        assert_release!(frames > 0, "Invalid number of frames: {}", frames);
    }
}
