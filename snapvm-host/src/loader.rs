//! Snapshot image loading.

use std::{fs::File, io::Read, path::Path, sync::Arc};

use anyhow::{Context, Result};

/// Read an entire snapshot image into one allocation sized from the file's
/// length. A short read is a hard failure, never a silently truncated
/// image. The returned buffer is opaque to the host beyond its length.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Arc<[u8]>> {
    let path = path.as_ref();
    let mut file = File::open(path).with_context(|| format!("open snapshot {:?}", path))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat snapshot {:?}", path))?
        .len();
    let len = usize::try_from(len)
        .with_context(|| format!("snapshot {:?} does not fit in memory", path))?;
    let mut bytes = vec![0u8; len];
    file.read_exact(&mut bytes)
        .with_context(|| format!("read {} bytes from snapshot {:?}", len, path))?;
    Ok(bytes.into())
}
