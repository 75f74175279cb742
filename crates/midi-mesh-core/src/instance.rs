//! Guarantees one live process per NodeIdentity on a host (spec.md §4.2).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use midi_mesh_proto::NodeId;
use sysinfo::{Pid, System};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("another instance for node {0} is already running")]
    AlreadyRunning(NodeId),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Held for the process lifetime. Releases the lock and removes the
/// scratch directory on drop.
pub struct InstanceGuard {
    lock_path: PathBuf,
    scratch_dir: PathBuf,
    // Keeping the File alive keeps the advisory lock held; it's released
    // automatically when this (and therefore the File) is dropped.
    _lock_file: File,
}

impl InstanceGuard {
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._lock_file);
        let _ = fs::remove_file(&self.lock_path);
        let _ = fs::remove_dir_all(&self.scratch_dir);
    }
}

pub struct InstanceManager;

impl InstanceManager {
    fn base_dir() -> PathBuf {
        std::env::temp_dir().join("midi-mesh")
    }

    /// Acquires the lock for `node_id`, retrying once after clearing a
    /// stale lock (held by a pid that is no longer alive).
    pub fn acquire(node_id: NodeId) -> Result<InstanceGuard, InstanceError> {
        let base = Self::base_dir();
        fs::create_dir_all(&base)?;

        let lock_path = base.join(format!("{}.lock", node_id.to_hex()));
        let scratch_dir = base.join(format!("{}-scratch", node_id.to_hex()));

        match Self::try_acquire(&lock_path) {
            Ok(file) => {
                fs::create_dir_all(&scratch_dir)?;
                info!(node = %node_id, path = %lock_path.display(), "Instance lock acquired");
                Ok(InstanceGuard {
                    lock_path,
                    scratch_dir,
                    _lock_file: file,
                })
            }
            Err(_would_block) => {
                if Self::holder_is_dead(&lock_path) {
                    warn!(path = %lock_path.display(), "Removing stale instance lock");
                    let _ = fs::remove_file(&lock_path);
                    let file = Self::try_acquire(&lock_path).map_err(|_| InstanceError::AlreadyRunning(node_id))?;
                    fs::create_dir_all(&scratch_dir)?;
                    info!(node = %node_id, "Instance lock acquired after stale-lock cleanup");
                    Ok(InstanceGuard {
                        lock_path,
                        scratch_dir,
                        _lock_file: file,
                    })
                } else {
                    Err(InstanceError::AlreadyRunning(node_id))
                }
            }
        }
    }

    fn try_acquire(lock_path: &Path) -> Result<File, ()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(lock_path)
            .map_err(|_| ())?;

        file.try_lock_exclusive().map_err(|_| ())?;

        let _ = file.set_len(0);
        let _ = file.seek(SeekFrom::Start(0));
        let _ = write!(file, "{}", std::process::id());
        Ok(file)
    }

    fn holder_is_dead(lock_path: &Path) -> bool {
        let Ok(mut f) = File::open(lock_path) else {
            return true;
        };
        let mut contents = String::new();
        if f.read_to_string(&mut contents).is_err() {
            return true;
        }
        let Ok(pid) = contents.trim().parse::<usize>() else {
            return true;
        };

        let system = System::new_all();
        !system.processes().contains_key(&Pid::from(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_contend_fails() {
        let node_id = NodeId::new_v4();
        let guard = InstanceManager::acquire(node_id).unwrap();
        assert!(InstanceManager::acquire(node_id).is_err());
        drop(guard);
    }

    #[test]
    fn acquire_after_release_succeeds() {
        let node_id = NodeId::new_v4();
        let guard = InstanceManager::acquire(node_id).unwrap();
        drop(guard);
        assert!(InstanceManager::acquire(node_id).is_ok());
    }

    #[test]
    fn drop_removes_scratch_dir() {
        let node_id = NodeId::new_v4();
        let guard = InstanceManager::acquire(node_id).unwrap();
        let scratch = guard.scratch_dir().to_path_buf();
        assert!(scratch.exists());
        drop(guard);
        assert!(!scratch.exists());
    }

    #[test]
    fn stale_lock_with_dead_pid_is_reclaimed() {
        let node_id = NodeId::new_v4();
        let base = InstanceManager::base_dir();
        fs::create_dir_all(&base).unwrap();
        let lock_path = base.join(format!("{}.lock", node_id.to_hex()));
        // A pid essentially guaranteed not to be alive.
        fs::write(&lock_path, "999999999").unwrap();
        let guard = InstanceManager::acquire(node_id).unwrap();
        drop(guard);
    }
}
