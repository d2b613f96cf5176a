use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use tokio::fs;
use uuid::Uuid;

use latch_storage::error::StorageError;
use latch_storage::info::{LockInformation, Version};
use latch_storage::storage::{CasPredicate, LockStorage};
use latch_storage::time::{SystemTimeProvider, TimeProvider};

/// Lock directories are named `storage-lock-<lockId>.lock`.
const LOCK_DIR_PREFIX: &str = "storage-lock-";
const LOCK_DIR_SUFFIX: &str = ".lock";

/// [`LockStorage`] over a shared directory.
pub struct FsLockStorage {
    workspace: PathBuf,
    clock: Arc<dyn TimeProvider>,
}

impl FsLockStorage {
    /// A storage rooted at `workspace`, using the process clock.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self::with_time_provider(workspace, Arc::new(SystemTimeProvider))
    }

    /// A storage rooted at `workspace` with an explicit time source.
    #[must_use]
    pub fn with_time_provider(workspace: impl Into<PathBuf>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            workspace: workspace.into(),
            clock,
        }
    }

    fn lock_dir(&self, lock_id: &str) -> PathBuf {
        self.workspace
            .join(format!("{LOCK_DIR_PREFIX}{lock_id}{LOCK_DIR_SUFFIX}"))
    }

    fn version_path(&self, lock_id: &str, version: Version) -> PathBuf {
        self.lock_dir(lock_id).join(version.get().to_string())
    }

    /// The highest version number present in a lock directory, if any.
    /// Temporary files and anything non-numeric are ignored.
    async fn latest_version(dir: &Path) -> Result<Option<Version>, StorageError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<u64> = None;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                latest = Some(latest.map_or(version, |current| current.max(version)));
            }
        }
        Ok(latest.map(Version::new))
    }

    async fn read_latest(&self, lock_id: &str) -> Result<Option<LockInformation>, StorageError> {
        loop {
            let Some(version) = Self::latest_version(&self.lock_dir(lock_id)).await? else {
                return Ok(None);
            };
            match fs::read_to_string(self.version_path(lock_id, version)).await {
                Ok(json) => return Ok(Some(LockInformation::from_json(&json)?)),
                // The file was pruned beneath us, so a newer version exists;
                // rescan.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Install `info` as the version file for `new_version`.
    ///
    /// The content is written to a temporary name first and hard-linked into
    /// place; the link is atomic and fails if the version file already
    /// exists, which makes it the CAS commit point.
    async fn install_version(
        &self,
        lock_id: &str,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        let dir = self.lock_dir(lock_id);
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, info.to_json()?).await?;

        let target = self.version_path(lock_id, new_version);
        let linked = fs::hard_link(&tmp, &target).await;
        let _ = fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::version_miss(lock_id, new_version))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of version files older than `keep`.
    async fn prune_below(&self, lock_id: &str, keep: Version) {
        let dir = self.lock_dir(lock_id);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
                && version < keep.get()
            {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
    }

    fn lock_id_from_dir_name(name: &str) -> Option<&str> {
        name.strip_prefix(LOCK_DIR_PREFIX)?.strip_suffix(LOCK_DIR_SUFFIX)
    }
}

#[async_trait]
impl LockStorage for FsLockStorage {
    fn name(&self) -> &str {
        "file-system-storage"
    }

    async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.workspace).await?;
        let meta = fs::metadata(&self.workspace).await?;
        if !meta.is_dir() {
            return Err(StorageError::Backend(format!(
                "workspace {} is not a directory",
                self.workspace.display()
            )));
        }
        Ok(())
    }

    async fn get(&self, lock_id: &str) -> Result<Option<String>, StorageError> {
        match self.read_latest(lock_id).await? {
            Some(info) => Ok(Some(info.to_json()?)),
            None => Ok(None),
        }
    }

    async fn create_with_version(
        &self,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        if Self::latest_version(&self.lock_dir(lock_id)).await?.is_some() {
            return Err(StorageError::LockAlreadyExists(lock_id.to_owned()));
        }
        self.install_version(lock_id, version, info)
            .await
            .map_err(|e| match e {
                // Another creator linked the same version between our scan
                // and our link.
                StorageError::VersionMiss { .. } => StorageError::LockAlreadyExists(lock_id.to_owned()),
                other => other,
            })
    }

    async fn update_with_version(
        &self,
        lock_id: &str,
        expected: &CasPredicate,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        let current = self
            .read_latest(lock_id)
            .await?
            .ok_or_else(|| StorageError::LockNotFound(lock_id.to_owned()))?;

        if current.version != expected.version
            || expected
                .owner_id
                .as_ref()
                .is_some_and(|owner| *owner != current.owner_id)
        {
            return Err(StorageError::version_miss(lock_id, expected.version));
        }

        self.install_version(lock_id, new_version, info).await?;
        self.prune_below(lock_id, new_version).await;
        Ok(())
    }

    async fn delete_with_version(
        &self,
        lock_id: &str,
        expected: &CasPredicate,
        _info: &LockInformation,
    ) -> Result<(), StorageError> {
        let current = self
            .read_latest(lock_id)
            .await?
            .ok_or_else(|| StorageError::LockNotFound(lock_id.to_owned()))?;

        if current.version != expected.version
            || expected
                .owner_id
                .as_ref()
                .is_some_and(|owner| *owner != current.owner_id)
        {
            return Err(StorageError::version_miss(lock_id, expected.version));
        }

        fs::remove_dir_all(self.lock_dir(lock_id)).await?;
        Ok(())
    }

    async fn get_time(&self) -> Result<DateTime<Utc>, StorageError> {
        self.clock.now().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn list(
        &self,
    ) -> Result<BoxStream<'_, Result<LockInformation, StorageError>>, StorageError> {
        let mut entries = fs::read_dir(&self.workspace).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(lock_id) = name.to_str().and_then(Self::lock_id_from_dir_name) else {
                continue;
            };
            match self.read_latest(lock_id).await {
                Ok(Some(info)) => records.push(Ok(info)),
                Ok(None) => {}
                Err(e) => records.push(Err(e)),
            }
        }
        Ok(Box::pin(stream::iter(records)))
    }
}

#[cfg(test)]
mod tests {
    use latch_storage::testing::run_storage_conformance_tests;

    use super::*;

    fn temp_workspace() -> PathBuf {
        std::env::temp_dir().join(format!("latch-fs-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn conformance() {
        let workspace = temp_workspace();
        let storage = FsLockStorage::new(&workspace);
        storage.init().await.expect("init should succeed");
        run_storage_conformance_tests(&storage)
            .await
            .expect("conformance tests should pass");
        let _ = fs::remove_dir_all(&workspace).await;
    }

    #[tokio::test]
    async fn latest_version_file_wins() {
        let workspace = temp_workspace();
        let storage = FsLockStorage::new(&workspace);
        storage.init().await.unwrap();

        let now = storage.get_time().await.unwrap();
        let mut info = LockInformation {
            lock_id: "multi-version".to_owned(),
            owner_id: "a".to_owned(),
            version: Version::INITIAL,
            lock_count: 1,
            lock_begin_time: now,
            lease_expire_time: now + chrono::TimeDelta::seconds(60),
        };
        storage
            .create_with_version("multi-version", Version::INITIAL, &info)
            .await
            .unwrap();

        let previous = info.version;
        info.version = previous.next();
        info.lock_count = 2;
        storage
            .update_with_version(
                "multi-version",
                &CasPredicate::owned(previous, "a"),
                info.version,
                &info,
            )
            .await
            .unwrap();

        let back =
            LockInformation::from_json(&storage.get("multi-version").await.unwrap().unwrap())
                .unwrap();
        assert_eq!(back.version, Version::new(2));
        assert_eq!(back.lock_count, 2);
        let _ = fs::remove_dir_all(&workspace).await;
    }

    #[tokio::test]
    async fn racing_writers_one_wins() {
        let workspace = temp_workspace();
        let storage = FsLockStorage::new(&workspace);
        storage.init().await.unwrap();

        let now = storage.get_time().await.unwrap();
        let info = LockInformation {
            lock_id: "race".to_owned(),
            owner_id: "a".to_owned(),
            version: Version::INITIAL,
            lock_count: 1,
            lock_begin_time: now,
            lease_expire_time: now + chrono::TimeDelta::seconds(60),
        };
        storage
            .create_with_version("race", Version::INITIAL, &info)
            .await
            .unwrap();

        // Both writers observed version 1 and race to install version 2;
        // the version-file link arbitrates.
        let mut first = info.clone();
        first.version = Version::new(2);
        let mut second = info.clone();
        second.owner_id = "b".to_owned();
        second.version = Version::new(2);

        let predicate = CasPredicate::version(Version::INITIAL);
        let (a, b) = tokio::join!(
            storage.update_with_version("race", &predicate, first.version, &first),
            storage.update_with_version("race", &predicate, second.version, &second),
        );
        assert!(
            a.is_ok() != b.is_ok(),
            "exactly one racing writer must win: {a:?} / {b:?}"
        );
        let _ = fs::remove_dir_all(&workspace).await;
    }
}
