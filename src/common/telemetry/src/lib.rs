mod logging;

pub use logging::{LOG_LEVEL_ENV, init_logging, init_test_logging, log_level_from_env};
