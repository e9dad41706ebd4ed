//! Debug log file setup.
//!
//! The screens own the terminal in raw mode, so log records must never reach
//! stdout or stderr. With `--debug` every record goes to a private file;
//! otherwise no logger is installed and the `log` macros are no-ops.

use std::fs::{File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

pub const DEBUG_LOG_PATH: &str = "/tmp/manpa.log";
/// Owner read/write only: the log names audio devices
pub const DEBUG_LOG_MODE: u32 = 0o600;

/// Open the log file, creating it owner-only or truncating an existing one.
///
/// A symlink in place of the file is refused.
fn open_log_file(path: &Path) -> io::Result<File> {
    let created = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(DEBUG_LOG_MODE)
        .open(path);
    match created {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .custom_flags(libc::O_NOFOLLOW)
                .open(path)?;
            file.set_permissions(Permissions::from_mode(DEBUG_LOG_MODE))?;
            Ok(file)
        }
        Err(e) => Err(e),
    }
}

/// Install env_logger writing to [`DEBUG_LOG_PATH`] when `debug` is set.
///
/// `RUST_LOG` still filters; the default level is `debug` for this crate.
pub fn init(debug: bool) {
    if !debug {
        return;
    }
    if let Err(e) = init_file(Path::new(DEBUG_LOG_PATH)) {
        // terminal is not in raw mode yet
        eprintln!("manpa: cannot open {}: {}", DEBUG_LOG_PATH, e);
    }
}

fn init_file(path: &Path) -> io::Result<()> {
    let file = open_log_file(path)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("manpa=debug"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;

    #[test]
    fn log_file_is_private_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manpa.log");

        let file = open_log_file(&path).unwrap();
        drop(file);
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DEBUG_LOG_MODE);

        fs::write(&path, "old contents").unwrap();
        let file = open_log_file(&path).unwrap();
        drop(file);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn existing_log_is_made_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manpa.log");
        fs::write(&path, "shared").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();

        drop(open_log_file(&path).unwrap());
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DEBUG_LOG_MODE);
    }

    #[test]
    fn symlinked_log_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("elsewhere");
        fs::write(&target, "keep me").unwrap();
        let path = dir.path().join("manpa.log");
        symlink(&target, &path).unwrap();

        assert!(open_log_file(&path).is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "keep me");
    }
}
