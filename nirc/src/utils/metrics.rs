#[cfg(feature = "metrics")]
use std::time::Instant;

/// Runs `f`, logging how long it took (when the `metrics` feature is
/// enabled).
///
/// This measures CPU-side time only, i.e. how long it took to record the
/// work, not to execute it.
#[cfg(feature = "metrics")]
pub fn measure<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let tt = Instant::now();
    let val = f();

    log::debug!(
        "{label}: {}",
        humantime::format_duration(tt.elapsed())
    );

    val
}

#[cfg(not(feature = "metrics"))]
pub fn measure<T>(_: &str, f: impl FnOnce() -> T) -> T {
    f()
}
