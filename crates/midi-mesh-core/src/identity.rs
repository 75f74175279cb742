//! Stable per-host node identity (spec.md §4.1).

use std::fs;
use std::path::{Path, PathBuf};

use midi_mesh_proto::NodeId;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid node id in {path}: {source}")]
    InvalidUuid {
        path: PathBuf,
        #[source]
        source: uuid::Error,
    },
}

#[derive(Debug, Clone)]
pub struct NodeIdentity {
    uuid: NodeId,
    name: String,
    hostname: String,
}

impl NodeIdentity {
    /// Reads the node UUID from `<config_dir>/node-id`; generates and
    /// persists a fresh v4 UUID if the file is absent. Idempotent: calling
    /// this again with the same `config_dir` returns the same UUID (I1).
    pub fn load_or_create(config_dir: &Path) -> Result<Self, IdentityError> {
        fs::create_dir_all(config_dir).map_err(|source| IdentityError::Io {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let id_path = config_dir.join("node-id");
        let uuid = match fs::read_to_string(&id_path) {
            Ok(contents) => {
                let uuid = NodeId::from_hex(contents.trim()).map_err(|source| IdentityError::InvalidUuid {
                    path: id_path.clone(),
                    source,
                })?;
                info!(uuid = %uuid, path = %id_path.display(), "Loaded existing node identity");
                uuid
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let uuid = NodeId::new_v4();
                Self::persist(&id_path, uuid)?;
                info!(uuid = %uuid, path = %id_path.display(), "Created new node identity");
                uuid
            }
            Err(source) => {
                error!(path = %id_path.display(), error = %source, "Failed to read node identity");
                return Err(IdentityError::Io {
                    path: id_path,
                    source,
                });
            }
        };

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());

        let short_host = hostname.split('.').next().unwrap_or(&hostname).to_string();
        let name = format!("{}-{}", short_host, &uuid.to_hex()[..8]);

        Ok(Self { uuid, name, hostname })
    }

    /// Atomic temp-file + rename write so a crash mid-write never leaves a
    /// half-written node-id file behind.
    fn persist(id_path: &Path, uuid: NodeId) -> Result<(), IdentityError> {
        let tmp_path = id_path.with_extension("tmp");
        fs::write(&tmp_path, uuid.to_hex()).map_err(|source| IdentityError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, id_path).map_err(|source| IdentityError::Io {
            path: id_path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn uuid(&self) -> NodeId {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_is_idempotent() {
        let dir = tempdir();
        let first = NodeIdentity::load_or_create(dir.path()).unwrap();
        let second = NodeIdentity::load_or_create(dir.path()).unwrap();
        assert_eq!(first.uuid(), second.uuid());
    }

    #[test]
    fn creates_config_dir_if_missing() {
        let dir = tempdir();
        let nested = dir.path().join("nested").join("config");
        let identity = NodeIdentity::load_or_create(&nested).unwrap();
        assert!(nested.join("node-id").exists());
        assert!(!identity.name().is_empty());
    }

    #[test]
    fn name_contains_first_eight_hex_of_uuid() {
        let dir = tempdir();
        let identity = NodeIdentity::load_or_create(dir.path()).unwrap();
        assert!(identity.name().ends_with(&identity.uuid().to_hex()[..8]));
    }

    #[test]
    fn rejects_malformed_node_id_file() {
        let dir = tempdir();
        std::fs::write(dir.path().join("node-id"), "not-a-uuid").unwrap();
        assert!(NodeIdentity::load_or_create(dir.path()).is_err());
    }

    // Minimal temp-dir helper so this crate doesn't need a dev-dependency on `tempfile`.
    struct TempDir(PathBuf);
    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
    fn tempdir() -> TempDir {
        let mut dir = std::env::temp_dir();
        dir.push(format!("midi-mesh-identity-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }
}
