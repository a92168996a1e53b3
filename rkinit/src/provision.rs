use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use common::WorkloadGroup;
use nix::unistd::{Gid, Uid, chown};
use tracing::debug;

/// Host path that holds the tenant's application cache.
pub const APP_DATA_ANNOTATION: &str = "appcache_hostpath";
/// Host path that holds the tenant's database files.
pub const DB_DATA_ANNOTATION: &str = "dbdata_hostpath";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectorySpec {
    pub relative_name: &'static str,
    pub uid: u32,
    pub gid: u32,
}

impl DirectorySpec {
    pub const fn new(relative_name: &'static str, uid: u32, gid: u32) -> Self {
        Self {
            relative_name,
            uid,
            gid,
        }
    }
}

pub const APP_DATA_DIRS: &[DirectorySpec] = &[DirectorySpec::new("launcher", 65532, 65532)];

pub const DB_DATA_DIRS: &[DirectorySpec] = &[
    DirectorySpec::new("mdbdata", 1001, 1001),
    DirectorySpec::new("mdbdata-config", 1001, 1001),
];

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("workload group {namespace}/{name} is missing data path annotations: {missing:?}")]
    MissingAnnotations {
        namespace: String,
        name: String,
        missing: Vec<&'static str>,
    },
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to chown {path} to {uid}:{gid}: {source}")]
    Chown {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: nix::Error,
    },
}

/// What `ensure_dir` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    /// Directory already existed with the wanted owner.
    Unchanged,
    /// Directory existed, only its owner was changed.
    Adjusted,
    /// Directory was created (and chowned if needed).
    Created,
}

/// The two host paths a tenant backend declares through annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub app_data: PathBuf,
    pub db_data: PathBuf,
}

impl DataPaths {
    pub fn from_group(group: &WorkloadGroup) -> Result<Self, ProvisionError> {
        let meta = &group.metadata;
        let app = meta.annotation(APP_DATA_ANNOTATION);
        let db = meta.annotation(DB_DATA_ANNOTATION);
        match (app, db) {
            (Some(app), Some(db)) => Ok(Self {
                app_data: PathBuf::from(app),
                db_data: PathBuf::from(db),
            }),
            _ => {
                let missing = [(APP_DATA_ANNOTATION, app), (DB_DATA_ANNOTATION, db)]
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(k, _)| k)
                    .collect();
                Err(ProvisionError::MissingAnnotations {
                    namespace: meta.namespace.clone(),
                    name: meta.name.clone(),
                    missing,
                })
            }
        }
    }
}

/// Creates the fixed set of tenant subdirectories and fixes their ownership.
#[derive(Debug, Clone)]
pub struct Provisioner {
    app_dirs: Vec<DirectorySpec>,
    db_dirs: Vec<DirectorySpec>,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new(APP_DATA_DIRS.to_vec(), DB_DATA_DIRS.to_vec())
    }
}

impl Provisioner {
    pub fn new(app_dirs: Vec<DirectorySpec>, db_dirs: Vec<DirectorySpec>) -> Self {
        Self { app_dirs, db_dirs }
    }

    /// Ensures every registered subdirectory exists under the group's data
    /// paths. Both annotations are validated before anything is touched.
    pub fn provision(
        &self,
        group: &WorkloadGroup,
    ) -> Result<Vec<(PathBuf, DirState)>, ProvisionError> {
        let paths = DataPaths::from_group(group)?;
        let targets = self
            .app_dirs
            .iter()
            .map(|spec| (paths.app_data.join(spec.relative_name), spec))
            .chain(
                self.db_dirs
                    .iter()
                    .map(|spec| (paths.db_data.join(spec.relative_name), spec)),
            );

        let mut results = Vec::new();
        for (path, spec) in targets {
            let state = ensure_dir(&path, spec.uid, spec.gid)?;
            results.push((path, state));
        }
        Ok(results)
    }
}

/// Idempotent mkdir -p + chown. Content is never touched.
pub fn ensure_dir(path: &Path, uid: u32, gid: u32) -> Result<DirState, ProvisionError> {
    let mut created = false;
    if !path.exists() {
        fs::create_dir_all(path).map_err(|source| ProvisionError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        created = true;
    }

    let meta = fs::metadata(path).map_err(|source| ProvisionError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    if meta.uid() == uid && meta.gid() == gid {
        return Ok(if created {
            DirState::Created
        } else {
            DirState::Unchanged
        });
    }

    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|source| {
        ProvisionError::Chown {
            path: path.to_path_buf(),
            uid,
            gid,
            source,
        }
    })?;
    debug!("{} owner set to {uid}:{gid}", path.display());
    Ok(if created {
        DirState::Created
    } else {
        DirState::Adjusted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ObjectMeta;
    use nix::unistd::{geteuid, getgid, getuid};

    fn current_owner() -> (u32, u32) {
        (getuid().as_raw(), getgid().as_raw())
    }

    #[test]
    fn ensure_dir_creates_nested_then_leaves_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let (uid, gid) = current_owner();
        let path = tmp.path().join("a/b/c");

        assert_eq!(ensure_dir(&path, uid, gid).unwrap(), DirState::Created);
        assert!(path.is_dir());
        assert_eq!(ensure_dir(&path, uid, gid).unwrap(), DirState::Unchanged);
    }

    #[test]
    fn ensure_dir_keeps_content() {
        let tmp = tempfile::tempdir().unwrap();
        let (uid, gid) = current_owner();
        fs::write(tmp.path().join("keep.txt"), b"data").unwrap();

        assert_eq!(ensure_dir(tmp.path(), uid, gid).unwrap(), DirState::Unchanged);
        assert_eq!(fs::read(tmp.path().join("keep.txt")).unwrap(), b"data");
    }

    #[test]
    fn ensure_dir_adjusts_foreign_owner() {
        if !geteuid().is_root() {
            eprintln!("skipping: chown to another owner needs root");
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let existing = tmp.path().join("launcher");
        fs::create_dir(&existing).unwrap();

        assert_eq!(ensure_dir(&existing, 65532, 65533).unwrap(), DirState::Adjusted);
        let meta = fs::metadata(&existing).unwrap();
        assert_eq!((meta.uid(), meta.gid()), (65532, 65533));
        assert_eq!(ensure_dir(&existing, 65532, 65533).unwrap(), DirState::Unchanged);

        let fresh = tmp.path().join("mdbdata/nested");
        assert_eq!(ensure_dir(&fresh, 1001, 1001).unwrap(), DirState::Created);
        let meta = fs::metadata(&fresh).unwrap();
        assert_eq!((meta.uid(), meta.gid()), (1001, 1001));
        assert_eq!(ensure_dir(&fresh, 1001, 1001).unwrap(), DirState::Unchanged);
    }

    #[test]
    fn ensure_dir_reports_denied_chown() {
        if geteuid().is_root() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (uid, _) = current_owner();
        let other = uid.wrapping_add(1);
        match ensure_dir(tmp.path(), other, other) {
            Err(ProvisionError::Chown { uid, gid, .. }) => assert_eq!((uid, gid), (other, other)),
            res => panic!("unexpected {res:?}"),
        }
    }

    #[test]
    fn missing_annotations_are_all_reported() {
        let group = WorkloadGroup::new(
            ObjectMeta::new("user-space-alice", "bfl").with_annotation(DB_DATA_ANNOTATION, ""),
        );
        match DataPaths::from_group(&group) {
            Err(ProvisionError::MissingAnnotations { missing, namespace, .. }) => {
                assert_eq!(missing, vec![APP_DATA_ANNOTATION, DB_DATA_ANNOTATION]);
                assert_eq!(namespace, "user-space-alice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_registries_match_known_layout() {
        let names: Vec<_> = APP_DATA_DIRS
            .iter()
            .chain(DB_DATA_DIRS)
            .map(|d| (d.relative_name, d.uid, d.gid))
            .collect();
        assert_eq!(
            names,
            vec![
                ("launcher", 65532, 65532),
                ("mdbdata", 1001, 1001),
                ("mdbdata-config", 1001, 1001)
            ]
        );
    }
}
