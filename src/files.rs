//! Small filesystem helpers shared by the store and the runner.

use std::io;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Owner-only directory mode.
pub(crate) const PRIVATE_DIR_MODE: u32 = 0o700;
/// Owner read/write file mode.
pub(crate) const PRIVATE_FILE_MODE: u32 = 0o600;
/// Owner read/write/execute file mode.
pub(crate) const EXECUTABLE_FILE_MODE: u32 = 0o700;

/// Create `dir` (and missing parents) with owner-only permissions.
pub(crate) async fn create_private_dir_all(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(PRIVATE_DIR_MODE);
    builder.create(dir).await
}

/// Create exactly `dir` with owner-only permissions. Fails if it already exists.
pub(crate) async fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(PRIVATE_DIR_MODE);
    builder.create(dir).await
}

/// Write `data` to a file that must not exist yet, then sync it to disk.
///
/// The file handle is closed before this returns.
pub(crate) async fn write_new_file(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    Ok(())
}
