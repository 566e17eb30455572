use log::LevelFilter;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;
use env_logger::{Builder, Target};

/// Global timestamp for delta calculation
static LAST_LOG: Mutex<Option<Instant>> = Mutex::new(None);

/// Initialize the logger with delta timestamps.
///
/// `level` is the configured default ("info", "debug", ...); `RUST_LOG`
/// takes precedence when set. Calling this more than once is a no-op.
pub fn init(level: &str) {
    let default_level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);

    let result = Builder::new()
        .target(Target::Stdout)
        .format(|buf, record| {
            use std::io::Write;

            let now = Instant::now();
            let delta = match LAST_LOG.lock() {
                Ok(mut last) => {
                    let delta = last.map(|t| now.duration_since(t).as_millis()).unwrap_or(0);
                    *last = Some(now);
                    delta
                }
                Err(_) => 0,
            };

            writeln!(
                buf,
                "{} [+{} ms] [{}] - {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                delta,
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .parse_default_env()
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("not-a-level");
        log::info!("logging initialized");
    }
}
