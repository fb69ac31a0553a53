//! Device-state hooks consumed by the run controller.
//!
//! Hooks are best-effort: every call returns a plain `bool` and the caller
//! logs failures and proceeds. Real device commands take multiple seconds of
//! external round trip, so hooks are only ever invoked from a run's worker
//! context.

use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Device-control primitives invoked around task execution.
///
/// Implementations must not panic; a failed command is reported as `false`.
pub trait DeviceControl: Send + Sync {
    /// Wake and unlock the device screen.
    fn wake(&self, device_id: &str) -> bool;
    /// Lock the device screen.
    fn lock(&self, device_id: &str) -> bool;
    /// Force-stop the given package.
    fn kill_app(&self, package: &str, device_id: &str) -> bool;
}

/// `adb`-backed [`DeviceControl`] implementation.
///
/// Shells out to the `adb` binary on PATH, selecting the device with
/// `-s <device_id>` when an id is configured.
#[derive(Debug, Default)]
pub struct AdbDevice;

/// Settle delay after wake/unlock key events (screen animation).
const WAKE_SETTLE: Duration = Duration::from_secs(2);

impl AdbDevice {
    fn run_shell(&self, device_id: &str, shell_args: &[&str]) -> bool {
        let mut cmd = Command::new("adb");
        if !device_id.is_empty() {
            cmd.args(["-s", device_id]);
        }
        cmd.arg("shell").args(shell_args);

        debug!("adb shell {}", shell_args.join(" "));
        match cmd.output() {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                warn!(
                    "adb shell {} failed: {}",
                    shell_args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("cannot spawn adb: {e}");
                false
            }
        }
    }
}

impl DeviceControl for AdbDevice {
    fn wake(&self, device_id: &str) -> bool {
        // KEYCODE_WAKEUP, then swipe up to dismiss the lock screen.
        if !self.run_shell(device_id, &["input", "keyevent", "224"]) {
            return false;
        }
        std::thread::sleep(WAKE_SETTLE);
        if !self.run_shell(device_id, &["input", "swipe", "500", "1500", "500", "500", "300"]) {
            return false;
        }
        std::thread::sleep(WAKE_SETTLE);
        true
    }

    fn lock(&self, device_id: &str) -> bool {
        // KEYCODE_SLEEP.
        self.run_shell(device_id, &["input", "keyevent", "223"])
    }

    fn kill_app(&self, package: &str, device_id: &str) -> bool {
        if package.is_empty() {
            warn!("kill_app called without a package name");
            return false;
        }
        self.run_shell(device_id, &["am", "force-stop", package])
    }
}
