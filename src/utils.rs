//! Utility functions for paths, URLs and file writes

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Extension every merged output carries
pub const OUTPUT_EXTENSION: &str = "ts";

/// Prefix of segment files inside the working directory
pub const SEGMENT_PREFIX: &str = "seg_";

/// Normalize an output path to the `.ts` extension
///
/// # Examples
///
/// ```
/// use hls_dl::utils::normalize_output_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(normalize_output_path(Path::new("/out/video.mp4")), PathBuf::from("/out/video.ts"));
/// assert_eq!(normalize_output_path(Path::new("/out/video")), PathBuf::from("/out/video.ts"));
/// ```
#[must_use]
pub fn normalize_output_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(OUTPUT_EXTENSION) => path.to_path_buf(),
        _ => path.with_extension(OUTPUT_EXTENSION),
    }
}

/// Working directory holding the segment files of `output`: `<stem>_segments/`
#[must_use]
pub fn working_dir_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    output.with_file_name(format!("{stem}_segments"))
}

/// Progress sidecar of `output`: `<stem>.progress.json`, next to the working directory
#[must_use]
pub fn progress_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    output.with_file_name(format!("{stem}.progress.json"))
}

/// File name of segment `index`: `seg_00042.ts`
#[must_use]
pub fn segment_file_name(index: usize) -> String {
    format!("{SEGMENT_PREFIX}{index:05}.{OUTPUT_EXTENSION}")
}

/// Parse the index out of a segment file name produced by [`segment_file_name`]
#[must_use]
pub fn parse_segment_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(&format!(".{OUTPUT_EXTENSION}"))?
        .parse()
        .ok()
}

/// Validate a playlist URL: non-empty, `http`/`https`, at most `max_len` characters
pub fn validate_playlist_url(raw: &str, max_len: usize) -> Result<url::Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidRequest("playlist URL is empty".to_string()));
    }
    if trimmed.chars().count() > max_len {
        return Err(Error::InvalidRequest(format!(
            "playlist URL is {} characters, limit is {}",
            trimmed.chars().count(),
            max_len
        )));
    }
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::InvalidRequest(format!("playlist URL does not parse: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::InvalidRequest(format!(
            "unsupported playlist URL scheme: {other}"
        ))),
    }
}

/// Resolve `reference` against `base`; absolute references pass through unchanged
pub fn absolutize(base: &str, reference: &str) -> Result<String> {
    if let Ok(absolute) = url::Url::parse(reference) {
        return Ok(absolute.to_string());
    }
    let base = url::Url::parse(base)?;
    Ok(base.join(reference)?.to_string())
}

/// Size of `path` if it is a regular file with nonzero length
pub fn nonempty_file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file() && m.len() > 0)
        .map(|m| m.len())
}

/// Write `data` to `dest` through a temp file and rename, so readers never see a partial file
pub async fn write_atomic(dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{file_name}.part"));

    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Returns
///
/// Returns the available disk space in bytes, or an IO error if the check fails.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: This is safe because:
        // 1. c_path is a valid, null-terminated C string created from the input path
        // 2. stat is properly initialized with zeroed memory before the call
        // 3. We check the return value and propagate any OS errors
        // 4. The statvfs struct is only read after a successful call
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            // f_frsize is the fragment size (preferred over f_bsize)
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: This is safe because:
        // 1. wide_path is a valid, null-terminated wide string
        // 2. All output pointers point to valid, properly aligned u64 variables
        // 3. We check the return value and propagate any OS errors
        // 4. The output variables are only read after a successful call
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
