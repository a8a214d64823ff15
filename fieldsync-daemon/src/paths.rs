use std::path::{Path, PathBuf};

use fieldsync_core::config::fieldsync_root;

pub const DAEMON_SOCKET: &str = "fieldsync.sock";

/// `<home>/.fieldsync/run/`
pub fn run_dir(home: &Path) -> PathBuf {
    fieldsync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
