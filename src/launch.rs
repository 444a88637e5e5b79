use std::process::{Command, Stdio};

use tracing::warn;

/// Open `url` in the platform's default browser. The child is detached with
/// all stdio ignored; a failed spawn is logged and otherwise ignored since
/// the reviewer can always open the printed URL by hand.
pub fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(url);
        command
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/c", "start", url]);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        command
    };

    let spawned = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(err) = spawned {
        warn!("failed to open browser for {url}: {err}");
    }
}
