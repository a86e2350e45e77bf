//! Shared constants.

/// Application name, used for platform data directories.
pub const APP_NAME: &str = "kiln";

/// Default build script file name.
pub const BUILD_FILE: &str = "kiln.lua";
