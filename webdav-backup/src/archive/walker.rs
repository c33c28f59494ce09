//! Source enumeration for the archive stage.
//!
//! Each configured source is walked depth-first in file-name order, and every
//! entry is paired with the name it gets inside the archive.

use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// How archive entry names are derived from source paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamingOptions {
    /// Keep the full path (minus the leading `/`) instead of naming entries
    /// relative to the source's parent directory
    pub preserve_absolute_paths: bool,
}

/// One filesystem object destined for the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path on disk
    pub path: PathBuf,

    /// Name inside the archive
    pub name: PathBuf,

    pub is_dir: bool,

    pub is_symlink: bool,
}

/// Prefix stripped from every entry path to form its archive name:
/// for source `/data`, `/data` becomes `data` and `/data/a.txt` becomes `data/a.txt`.
fn archive_base(source: &Path, options: NamingOptions) -> PathBuf {
    if options.preserve_absolute_paths {
        return source
            .components()
            .take_while(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
    }
    source.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Walk one source. Symlinks are reported, never followed.
///
/// # Example
/// ```no_run
/// use webdav_backup::archive::walker::{walk_source, NamingOptions};
/// use std::path::Path;
///
/// for entry in walk_source(Path::new("/data"), NamingOptions::default()) {
///     let entry = entry.unwrap();
///     println!("{} -> {}", entry.path.display(), entry.name.display());
/// }
/// ```
pub fn walk_source(
    source: &Path,
    options: NamingOptions,
) -> impl Iterator<Item = io::Result<ArchiveEntry>> {
    let base = archive_base(source, options);

    WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(walk_error(e))),
            };
            let path = entry.path().to_path_buf();
            let name = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
            if name.as_os_str().is_empty() {
                // the filesystem root itself
                return None;
            }
            let file_type = entry.file_type();
            Some(Ok(ArchiveEntry {
                path,
                name,
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            }))
        })
}

fn walk_error(err: walkdir::Error) -> io::Error {
    let path = err
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let kind = err.io_error().map(io::Error::kind).unwrap_or(io::ErrorKind::Other);
    io::Error::new(kind, format!("{}: {}", path, err))
}
