//! Local Disk
//!
//! [`Disk`] implementation over `std::fs`, rooted at a host directory.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

use super::{
    DirEntry, DirectoryIterator, Disk, DiskType, DiskWriter, RemoveRequest, SyncGuard, WriteMode,
};

/// Disk backed by a local file system directory
///
/// Recursive removals tolerate entries disappearing underneath them, so two
/// removers racing on the same tree both finish without error.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    name: String,
    root: PathBuf,
}

impl LocalDisk {
    /// Open a disk rooted at `root`, creating the directory if needed
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    fn abs(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Disk for LocalDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn disk_type(&self) -> DiskType {
        DiskType::Local
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn exists(&self, path: &Path) -> bool {
        self.abs(path).exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.abs(path).is_file()
    }

    fn is_directory(&self, path: &Path) -> bool {
        self.abs(path).is_dir()
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(self.abs(path))?.len())
    }

    fn last_modified(&self, path: &Path) -> Result<SystemTime> {
        Ok(fs::metadata(self.abs(path))?.modified()?)
    }

    fn set_last_modified(&self, path: &Path, time: SystemTime) -> Result<()> {
        File::open(self.abs(path))?.set_modified(time)?;
        Ok(())
    }

    #[cfg(unix)]
    fn ref_count(&self, path: &Path) -> Result<u32> {
        use std::os::unix::fs::MetadataExt;
        Ok(fs::metadata(self.abs(path))?.nlink() as u32)
    }

    #[cfg(not(unix))]
    fn ref_count(&self, path: &Path) -> Result<u32> {
        fs::metadata(self.abs(path))?;
        Ok(1)
    }

    fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.abs(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn iterate_directory(&self, path: &Path) -> Result<DirectoryIterator> {
        let base = path.to_path_buf();
        let entries = fs::read_dir(self.abs(path))?;
        Ok(Box::new(entries.map(move |entry| {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            Ok(DirEntry {
                path: base.join(&name),
                name,
            })
        })))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(self.abs(path))?)
    }

    fn write_file(
        &self,
        path: &Path,
        buf_size: usize,
        mode: WriteMode,
    ) -> Result<Box<dyn DiskWriter>> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            WriteMode::Rewrite => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        let file = options.open(self.abs(path))?;
        Ok(Box::new(LocalFileWriter {
            writer: BufWriter::with_capacity(buf_size.max(1), file),
        }))
    }

    fn create_file(&self, path: &Path) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.abs(path))?;
        Ok(())
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir(self.abs(path))?;
        Ok(())
    }

    fn create_directories(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(self.abs(path))?;
        Ok(())
    }

    fn move_directory(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.abs(from), self.abs(to))?;
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.abs(from), self.abs(to))?;
        Ok(())
    }

    fn replace_file(&self, from: &Path, to: &Path) -> Result<()> {
        // rename(2) atomically replaces an existing destination
        fs::rename(self.abs(from), self.abs(to))?;
        Ok(())
    }

    fn create_hard_link(&self, from: &Path, to: &Path) -> Result<()> {
        fs::hard_link(self.abs(from), self.abs(to))?;
        Ok(())
    }

    fn set_read_only(&self, path: &Path) -> Result<()> {
        let abs = self.abs(path);
        let mut permissions = fs::metadata(&abs)?.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&abs, permissions)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.abs(path))?;
        Ok(())
    }

    fn remove_file_if_exists(&self, path: &Path) -> Result<()> {
        Ok(ignore_not_found(fs::remove_file(self.abs(path)))?)
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        fs::remove_dir(self.abs(path))?;
        Ok(())
    }

    fn remove_recursive(&self, path: &Path) -> Result<()> {
        Ok(remove_tree(&self.abs(path))?)
    }

    fn remove_shared_recursive(
        &self,
        path: &Path,
        _keep_in_remote_fs: bool,
        _names_not_to_remove: &HashSet<String>,
    ) -> Result<()> {
        // Nothing on a local disk is shared with other replicas
        self.remove_recursive(path)
    }

    fn remove_shared_files(
        &self,
        files: &[RemoveRequest],
        _keep_in_remote_fs: bool,
        _names_not_to_remove: &HashSet<String>,
    ) -> Result<()> {
        for request in files {
            if request.if_exists {
                self.remove_file_if_exists(&request.path)?;
            } else {
                self.remove_file(&request.path)?;
            }
        }
        Ok(())
    }

    fn directory_sync_guard(&self, path: &Path) -> Result<SyncGuard> {
        SyncGuard::for_directory(&self.abs(path))
    }

    fn unique_id(&self, path: &Path) -> Result<String> {
        Ok(self.abs(path).to_string_lossy().into_owned())
    }
}

/// Buffered file writer for [`LocalDisk`]
struct LocalFileWriter {
    writer: BufWriter<File>,
}

impl Write for LocalFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl DiskWriter for LocalFileWriter {
    fn finalize(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Depth-first removal; entries that vanish mid-walk count as removed
fn remove_tree(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !metadata.is_dir() {
        return ignore_not_found(fs::remove_file(path));
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        match entry {
            Ok(entry) => remove_tree(&entry.path())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }

    ignore_not_found(fs::remove_dir(path))
}
