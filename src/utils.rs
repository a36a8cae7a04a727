//! Small cross-cutting helpers

use log::warn;

/// Open a URL in the default system browser.
///
/// Failures are logged rather than returned; the caller keeps waiting for
/// the authorization callback either way.
pub fn open_url(url: &str) {
    #[cfg(target_os = "windows")]
    let result = std::process::Command::new("cmd")
        .args(["/C", "start", "", url])
        .spawn();

    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("open").arg(url).spawn();

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let result = std::process::Command::new("xdg-open").arg(url).spawn();

    if let Err(e) = result {
        warn!("Failed to open browser for {}: {}", url, e);
    }
}
