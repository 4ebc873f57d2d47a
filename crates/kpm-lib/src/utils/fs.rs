use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Write `bytes` to a temp file next to `path`, then persist it over `path`.
/// A crash mid-write leaves the previous content intact.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("Create directory {:?}", parent))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Create temp file in {:?}", parent))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Write temp file for {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Sync temp file for {:?}", path))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Replace {:?}", path))?;
    Ok(())
}

/// Write `bytes` into a fresh temporary directory, then move the file into place.
pub fn write_via_temp_dir(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("Create directory {:?}", parent))?;

    let tmp_dir = tempfile::tempdir_in(parent)
        .with_context(|| format!("Create temp dir in {:?}", parent))?;
    let file_name = path.file_name().unwrap_or_else(|| "data".as_ref());
    let tmp_path = tmp_dir.path().join(file_name);
    fs::write(&tmp_path, bytes).with_context(|| format!("Write {:?}", tmp_path))?;
    move_path(&tmp_path, path)
}

/// Rename, falling back to copy + delete across filesystems.
pub fn move_path(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Create directory {:?}", parent))?;
    }
    match fs::rename(src, dest) {
        Ok(_) => Ok(()),
        Err(err) if is_cross_device_link(&err) => {
            if src.is_dir() {
                copy_dir_recursive(src, dest)?;
                fs::remove_dir_all(src).with_context(|| format!("Remove source dir {:?}", src))?;
            } else {
                fs::copy(src, dest)
                    .with_context(|| format!("Copy file {:?} -> {:?}", src, dest))?;
                fs::remove_file(src).with_context(|| format!("Remove source file {:?}", src))?;
            }
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("Move {:?} -> {:?}", src, dest)),
    }
}

pub fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Create copy dest {:?}", dest))?;
    for entry in fs::read_dir(src).with_context(|| format!("Read dir {:?}", src))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target_path = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target_path)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target_path)?;
        } else {
            fs::copy(entry.path(), &target_path)
                .with_context(|| format!("Copy file {:?} -> {:?}", entry.path(), target_path))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let target = fs::read_link(src).with_context(|| format!("Read link {:?}", src))?;
    std::os::unix::fs::symlink(&target, dest)
        .with_context(|| format!("Create link {:?} -> {:?}", dest, target))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest).with_context(|| format!("Copy file {:?} -> {:?}", src, dest))?;
    Ok(())
}

fn is_cross_device_link(err: &std::io::Error) -> bool {
    #[cfg(target_family = "unix")]
    {
        // EXDEV is 18 on Linux and macOS
        err.raw_os_error() == Some(18)
    }

    #[cfg(not(target_family = "unix"))]
    {
        let _ = err;
        false
    }
}
