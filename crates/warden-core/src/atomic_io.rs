use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

// Distinguishes swap files when two stores in the same process write to the
// same directory in the same instant.
static SWAP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `content` via a same-directory swap file and rename.
/// A crash mid-write leaves either the old contents or the new, never a torn
/// file. Missing parent directories are created.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("'{}' has no usable file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let sequence = SWAP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let swap_path = dir.join(format!(
        ".{file_name}.swap.{}.{sequence}",
        std::process::id()
    ));
    let mut swap = File::create(&swap_path)
        .with_context(|| format!("failed to create swap file {}", swap_path.display()))?;
    swap.write_all(content.as_bytes())
        .and_then(|()| swap.sync_all())
        .with_context(|| format!("failed to write swap file {}", swap_path.display()))?;
    drop(swap);

    fs::rename(&swap_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            swap_path.display(),
            path.display()
        )
    })
}
