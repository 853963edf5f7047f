use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        if dir.as_os_str().is_empty() {
            return Ok(());
        }
        match fs::metadata(dir) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("Create dir '{}'", dir.display());
                fs::create_dir_all(dir)?;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Replace the content of `path` so that readers only ever observe the old or
/// the new file. The data goes to a sibling temp file first, which is then
/// renamed over the target. Permissions of an existing target are kept, new
/// files get mode `0600` (kubeconfigs carry credentials).
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    ensure_dir(path)?;

    let tmp_path = tmp_path(path);
    let result = write_tmp(path, &tmp_path, data).and_then(|_| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result?;

    debug!("Wrote {} bytes to '{}'", data.len(), path.display());
    Ok(())
}

fn write_tmp(path: &Path, tmp_path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = create_private(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    match fs::metadata(path) {
        Ok(meta) => fs::set_permissions(tmp_path, meta.permissions()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Create a fresh file only the owner can read, before any byte is written.
/// A leftover of the same name is removed first, since `mode` only applies
/// to files the open call creates.
fn create_private(path: &Path) -> io::Result<fs::File> {
    match fs::remove_file(path) {
        Ok(()) => debug!("Remove stale temp file '{}'", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}
