use std::time::Duration;

/// Parallelization is on unless configured off.
pub const DEFAULT_PARALLELIZATION_ENABLED: bool = true;

/// Each case runs once unless a repetition policy says otherwise.
pub const DEFAULT_MAXIMUM_ITERATION_COUNT: usize = 1;

/// Resolved time limits are rounded up to a multiple of this.
pub const DEFAULT_TIME_LIMIT_GRANULARITY: Duration = Duration::from_secs(60);

/// Project-local options file name.
pub const CONFIG_FILE_NAME: &str = "strand.toml";

/// Subdirectory of the user config dir holding the user-level options.
pub const USER_CONFIG_DIR: &str = "strand";

/// User-level options file name.
pub const USER_CONFIG_FILE: &str = "config.toml";
