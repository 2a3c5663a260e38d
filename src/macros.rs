/// Logs a run milestone through `tracing::info!`, stamped with local wall-clock time.
/// You can pass in the starting time and it will also log how long it took from starting time to now.
/// ```
/// use cmp_scrap::info_time;
/// info_time!("str {}, {}", 1, 2);
/// let time = chrono::Local::now();
/// info_time!(time, "str {}, {}", 1, 2);
/// ```
#[macro_export]
macro_rules! info_time {
    ($strfm:literal $(,)? $($arg:expr),*) => {{
        let local_now = ::chrono::Local::now();
        ::tracing::info!("{:<30} : {}", local_now.format("%H:%M:%S%.3f"), format!($strfm, $($arg),*));
    }};
    ($time:expr, $strfm:literal $(,)? $($arg:expr),*) => {{
        let local_now = ::chrono::Local::now();
        let run_time = (local_now - $time)
                .num_microseconds()
                .map(|n| n as f64 / 1_000_000.0)
                .unwrap_or(0.0);
        ::tracing::info!(
            "{:<30} : {} (RUNTIME: {} sec)",
            local_now.format("%H:%M:%S%.3f"),
            format!($strfm, $($arg),*),
            run_time
        );
    }};
}
