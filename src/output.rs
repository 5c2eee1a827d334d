//! Writing the rendered map to disk and opening it in the default browser

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::Config;
use crate::error::PipelineError;

/// Write `html` to `path` via a sibling temporary file and a rename.
///
/// A failed write never leaves a partial map at `path`. Returns the absolute
/// path of the written file.
pub fn write_html(path: &Path, html: &str) -> crate::Result<PathBuf> {
    let write_error = |source: std::io::Error| PipelineError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "map.html".into());
    tmp_name.push(".partial");
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(source) = fs::write(&tmp_path, html) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_error(source).into());
    }
    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_error(source).into());
    }

    let absolute = fs::canonicalize(path).map_err(write_error)?;
    tracing::info!("Wrote {} bytes to {}", html.len(), absolute.display());
    Ok(absolute)
}

/// Command that opens a file with the platform's default handler.
fn opener_command(path: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(path);
        command
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(path);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(path);
        command
    }
}

/// Best-effort launch of the default browser on `path`.
///
/// The returned error is always a non-fatal `PipelineError::BrowserLaunch`.
pub fn open_in_browser(path: &Path) -> Result<(), PipelineError> {
    let launch_error = |reason: String| PipelineError::BrowserLaunch {
        path: path.to_path_buf(),
        reason,
    };

    let status = opener_command(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| launch_error(e.to_string()))?;

    if status.success() {
        tracing::info!("Opened {} in the default browser", path.display());
        Ok(())
    } else {
        Err(launch_error(format!("opener exited with {status}")))
    }
}

/// Write the map to `config.output`, then open it if `config.open_browser` is set.
///
/// Once the file is written, a non-fatal opener error is logged and the
/// written path is still returned.
pub fn publish(config: &Config, html: &str) -> crate::Result<PathBuf> {
    publish_with(config, html, open_in_browser)
}

/// `publish` with a caller-supplied opener.
pub fn publish_with<F>(config: &Config, html: &str, open: F) -> crate::Result<PathBuf>
where
    F: FnOnce(&Path) -> Result<(), PipelineError>,
{
    let written = write_html(&config.output, html)?;
    if !config.open_browser {
        return Ok(written);
    }
    match open(&written) {
        Ok(()) => Ok(written),
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            tracing::warn!("{err}; open the file manually to view the map");
            Ok(written)
        }
    }
}
