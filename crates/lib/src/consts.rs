//! Names shared across the library and the CLI.

pub const APP_NAME: &str = "dcs-deploy";

/// Environment variable overriding the working root.
pub const ROOT_ENV: &str = "DCS_DEPLOY_ROOT";

/// Default working root, relative to the home directory.
pub const DEFAULT_ROOT_DIRNAME: &str = ".dcs_deploy";

pub const STATUS_FILENAME: &str = "prepare_status.json";

/// Step name prefix for overlay installation in the prepare group.
pub const INSTALL_OVERLAY_PREFIX: &str = "install_local_overlay@";

/// Default configuration database file name.
pub const CONFIG_DB_FILENAME: &str = "config_db.json";
