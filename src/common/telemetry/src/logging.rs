use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, Once};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;

/// Environment variable holding the maximum log level.
pub const LOG_LEVEL_ENV: &str = "SJOIN_LOG_LEVEL";

/// Resolve the log level from [`LOG_LEVEL_ENV`], falling back to `INFO` when
/// it is unset or unparsable.
pub fn log_level_from_env() -> Level {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or("INFO".to_owned());
    Level::from_str(log_level.as_str()).unwrap_or(Level::INFO)
}

/// Install the global subscriber. The returned guards flush the non-blocking
/// writer on drop and must be kept alive for the lifetime of the program.
pub fn init_logging() -> Vec<WorkerGuard> {
    let mut guards = vec![];

    let (stdout_write, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = Layer::new()
        .with_writer(stdout_write.with_max_level(log_level_from_env()))
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);
    guards.push(stdout_guard);

    let subscriber = Registry::default().with(stdout_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global subscriber already installed");
    }

    guards
}

static GLOBAL_TEST_LOG_GUARDS: LazyLock<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    LazyLock::new(|| Arc::new(Mutex::new(None)));

/// Idempotent logging setup for tests; every test may call it.
pub fn init_test_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut guards = match GLOBAL_TEST_LOG_GUARDS.as_ref().lock() {
            Ok(guards) => guards,
            Err(poisoned) => poisoned.into_inner(),
        };

        *guards = Some(init_logging());
    });
}
