//! Archive helpers: tar.gz bundle extraction and jar inspection

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Extract a `.tar.gz` into `dest`, keeping permissions and symlink entries.
///
/// With `skip_top_dir`, the first path segment of every member is dropped.
/// Returns the shallowest directory that received a regular file (the bundle
/// directory), or `dest` when the archive held no files.
pub fn extract_tar_gz(archive_path: &Path, dest: &Path, skip_top_dir: bool) -> Result<PathBuf> {
    log::debug!(
        "Extracting {:?} to {:?} (skip_top_dir={})",
        archive_path,
        dest,
        skip_top_dir
    );

    let file = fs::File::open(archive_path)
        .with_context(|| format!("Open archive {:?}", archive_path))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    fs::create_dir_all(dest).with_context(|| format!("Create extraction dir {:?}", dest))?;
    let root = dunce::canonicalize(dest)
        .with_context(|| format!("Resolve extraction dir {:?}", dest))?;

    let mut bundle_dir: Option<(usize, PathBuf)> = None;
    let mut extracted = 0usize;

    for entry in archive
        .entries()
        .with_context(|| format!("Read archive {:?}", archive_path))?
    {
        let mut entry = entry.with_context(|| format!("Read entry of {:?}", archive_path))?;
        let raw_path = entry.path()?.into_owned();
        let Some(relative) = member_path(&raw_path, skip_top_dir)? else {
            continue;
        };

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            ensure_inside(&root, parent)?;
            fs::create_dir_all(parent)
                .with_context(|| format!("Create directory {:?}", parent))?;
        }

        let entry_type = entry.header().entry_type();
        // Directory members reuse an existing path, links included
        if entry_type.is_dir() {
            ensure_inside(&root, &target)?;
        }
        if entry_type.is_hard_link() {
            let source = hard_link_source(&entry, dest, skip_top_dir)?;
            ensure_inside(&root, &source)?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)
                    .with_context(|| format!("Replace {:?}", target))?;
            }
            fs::hard_link(&source, &target)
                .with_context(|| format!("Hard link {:?} -> {:?}", target, source))?;
        } else {
            entry
                .unpack(&target)
                .with_context(|| format!("Unpack {:?} -> {:?}", raw_path, target))?;
        }
        extracted += 1;

        if entry_type.is_file() {
            let dir = target.parent().unwrap_or(dest).to_path_buf();
            let depth = dir.components().count();
            if bundle_dir.as_ref().map_or(true, |(d, _)| depth < *d) {
                bundle_dir = Some((depth, dir));
            }
        }
    }

    log::debug!("Extracted {} entries from {:?}", extracted, archive_path);
    Ok(bundle_dir
        .map(|(_, dir)| dir)
        .unwrap_or_else(|| dest.to_path_buf()))
}

/// Normalized relative path of an archive member, `None` when nothing is left
/// after dropping the top directory.
fn member_path(raw: &Path, skip_top_dir: bool) -> Result<Option<PathBuf>> {
    let mut normal = Vec::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => {}
            _ => anyhow::bail!("Refusing to extract unsafe archive path {:?}", raw),
        }
    }
    let skip = usize::from(skip_top_dir);
    if normal.len() <= skip {
        return Ok(None);
    }
    Ok(Some(normal[skip..].iter().collect()))
}

/// Fail when the deepest existing ancestor of `path` resolves outside `root`,
/// which happens when an earlier member planted a symlink on the way.
fn ensure_inside(root: &Path, path: &Path) -> Result<()> {
    let Some(existing) = path.ancestors().find(|p| fs::symlink_metadata(p).is_ok()) else {
        return Ok(());
    };
    let resolved = dunce::canonicalize(existing)
        .with_context(|| format!("Resolve {:?}", existing))?;
    if !resolved.starts_with(root) {
        anyhow::bail!(
            "Refusing to extract {:?}: resolves to {:?}, outside {:?}",
            path,
            resolved,
            root
        );
    }
    Ok(())
}

/// Hard link members name their source by archive path; map it the same way
/// as member paths so it lands under `dest`.
fn hard_link_source<R: Read>(
    entry: &tar::Entry<'_, R>,
    dest: &Path,
    skip_top_dir: bool,
) -> Result<PathBuf> {
    let link_name = entry
        .link_name()?
        .with_context(|| "Hard link member without a link name")?
        .into_owned();
    let relative = member_path(&link_name, skip_top_dir)?
        .with_context(|| format!("Hard link to archive top directory {:?}", link_name))?;
    Ok(dest.join(relative))
}

/// Version embedded in a jruby jar: the `pom.properties` of the nested
/// jruby-complete archive, falling back to one at the top level.
pub fn jruby_version(jar_path: &Path) -> Result<Option<String>> {
    let file = fs::File::open(jar_path).with_context(|| format!("Open jar {:?}", jar_path))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("Read jar {:?} as ZIP", jar_path))?;

    let nested_jars: Vec<String> = archive
        .file_names()
        .filter(|name| name.ends_with(".jar"))
        .map(str::to_string)
        .collect();

    for name in nested_jars {
        let mut bytes = Vec::new();
        archive
            .by_name(&name)
            .with_context(|| format!("Open nested jar {}", name))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Read nested jar {}", name))?;
        let mut nested = match zip::ZipArchive::new(Cursor::new(bytes)) {
            Ok(nested) => nested,
            Err(e) => {
                log::debug!("Skipping unreadable nested jar {}: {}", name, e);
                continue;
            }
        };
        if let Some(version) = pom_properties_version(&mut nested)? {
            return Ok(Some(version));
        }
    }

    pom_properties_version(&mut archive)
}

fn pom_properties_version<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Option<String>> {
    let Some(name) = archive
        .file_names()
        .find(|name| name.ends_with("pom.properties"))
        .map(str::to_string)
    else {
        return Ok(None);
    };

    let mut content = String::new();
    archive
        .by_name(&name)
        .with_context(|| format!("Open {}", name))?
        .read_to_string(&mut content)
        .with_context(|| format!("Read {}", name))?;
    Ok(parse_pom_properties_version(&content))
}

pub fn parse_pom_properties_version(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "version")
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}
