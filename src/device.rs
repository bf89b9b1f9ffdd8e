//! Serial device discovery.

use std::path::PathBuf;

/// Devices are identified by this substring (case-insensitive) in their
/// `/dev/serial/by-id` entry name.
const DEVICE_NAME_NEEDLE: &str = "xbib-u-ss";

const BY_ID_DIR: &str = "/dev/serial/by-id";

/// Scan `/dev/serial/by-id` for entries that look like XBee carrier
/// boards. A missing directory (no USB serial devices present at all) is
/// not an error; other I/O errors are logged and treated as "no devices
/// found this pass" so the periodic rescan can recover once the condition
/// clears.
pub fn scan_serial_devices() -> Vec<PathBuf> {
    scan_dir(BY_ID_DIR)
}

fn scan_dir(dir: &str) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(dir, error = %err, "failed to scan for serial devices");
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(dir, error = %err, "failed to read a directory entry while scanning");
                continue;
            }
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.to_lowercase().contains(DEVICE_NAME_NEEDLE) {
            devices.push(entry.path());
        }
    }
    devices
}
