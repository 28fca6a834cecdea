//! Small helpers shared by the crates built on top of the core.
//!
//! - `retry!`: async retry macro with configurable attempts and interval (logs failures)

/// Evaluates `$f` until it returns `Ok`, sleeping `$interval` between
/// attempts and giving up after `$count` retries. Callers need `log` and
/// `tokio` in scope as dependencies.
#[macro_export]
macro_rules! retry {
    ($f:expr, $count:expr, $interval:expr) => {{
        let mut attempt = 1;
        loop {
            match $f {
                Ok(value) => break Ok(value),
                Err(e) if attempt > $count => {
                    log::error!("Failed: {}; giving up after {} attempts", e, attempt);
                    break Err(e);
                }
                Err(e) => {
                    log::error!("Failed: {}", e);
                    log::warn!("Attempt {} out of {}", attempt, $count);
                    attempt += 1;
                    tokio::time::sleep($interval).await;
                }
            }
        }
    }};
    ($f:expr) => {
        $crate::retry!($f, 5, std::time::Duration::from_secs(1))
    };
}
