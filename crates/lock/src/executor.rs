//! Observable wrapper around storage calls.
//!
//! The protocol never talks to a [`LockStorage`] directly; every call goes
//! through a [`StorageExecutor`], which forks one event per call, attaches
//! the call's payload (lock id, expected and new versions, record) and the
//! outcome, and publishes it. Semantics are never altered, only observed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use latch_storage::error::StorageError;
use latch_storage::info::{LockInformation, Version};
use latch_storage::storage::{CasPredicate, LockStorage};

use crate::event::{Action, Event, actions};

#[derive(Clone)]
pub struct StorageExecutor {
    storage: Arc<dyn LockStorage>,
}

fn outcome<T>(action: Action, result: &Result<T, StorageError>) -> Action {
    match result {
        Ok(_) => action,
        Err(e) => action.with_error(e),
    }
}

impl StorageExecutor {
    #[must_use]
    pub fn new(storage: Arc<dyn LockStorage>) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn storage_name(&self) -> &str {
        self.storage.name()
    }

    pub async fn init(&self, e: &Event) -> Result<(), StorageError> {
        let result = self.storage.init().await;
        e.emit(outcome(Action::new(actions::STORAGE_INIT), &result))
            .await;
        result
    }

    pub async fn get(&self, e: &Event, lock_id: &str) -> Result<Option<String>, StorageError> {
        let result = self.storage.get(lock_id).await;
        e.emit(outcome(
            Action::new(actions::STORAGE_GET).with_payload(actions::PAYLOAD_LOCK_ID, lock_id),
            &result,
        ))
        .await;
        result
    }

    pub async fn create_with_version(
        &self,
        e: &Event,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        let result = self
            .storage
            .create_with_version(lock_id, version, info)
            .await;
        e.emit(outcome(
            Action::new(actions::STORAGE_CREATE)
                .with_payload(actions::PAYLOAD_LOCK_ID, lock_id)
                .with_payload(actions::PAYLOAD_NEW_VERSION, version)
                .with_payload(actions::PAYLOAD_LOCK_INFORMATION, info),
            &result,
        ))
        .await;
        result
    }

    pub async fn update_with_version(
        &self,
        e: &Event,
        lock_id: &str,
        expected: &CasPredicate,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        let result = self
            .storage
            .update_with_version(lock_id, expected, new_version, info)
            .await;
        e.emit(outcome(
            Action::new(actions::STORAGE_UPDATE)
                .with_payload(actions::PAYLOAD_LOCK_ID, lock_id)
                .with_payload(actions::PAYLOAD_EXPECTED_VERSION, expected.version)
                .with_payload(actions::PAYLOAD_EXPECTED_OWNER, &expected.owner_id)
                .with_payload(actions::PAYLOAD_NEW_VERSION, new_version)
                .with_payload(actions::PAYLOAD_LOCK_INFORMATION, info),
            &result,
        ))
        .await;
        result
    }

    pub async fn delete_with_version(
        &self,
        e: &Event,
        lock_id: &str,
        expected: &CasPredicate,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        let result = self
            .storage
            .delete_with_version(lock_id, expected, info)
            .await;
        e.emit(outcome(
            Action::new(actions::STORAGE_DELETE)
                .with_payload(actions::PAYLOAD_LOCK_ID, lock_id)
                .with_payload(actions::PAYLOAD_EXPECTED_VERSION, expected.version)
                .with_payload(actions::PAYLOAD_EXPECTED_OWNER, &expected.owner_id),
            &result,
        ))
        .await;
        result
    }

    pub async fn get_time(&self, e: &Event) -> Result<DateTime<Utc>, StorageError> {
        let result = self.storage.get_time().await;
        e.emit(outcome(Action::new(actions::STORAGE_GET_TIME), &result))
            .await;
        result
    }

    pub async fn close(&self, e: &Event) -> Result<(), StorageError> {
        let result = self.storage.close().await;
        e.emit(outcome(Action::new(actions::STORAGE_CLOSE), &result))
            .await;
        result
    }

    pub async fn list(
        &self,
        e: &Event,
    ) -> Result<BoxStream<'_, Result<LockInformation, StorageError>>, StorageError> {
        let result = self.storage.list().await;
        e.emit(outcome(Action::new(actions::STORAGE_LIST), &result))
            .await;
        result
    }
}

#[cfg(test)]
mod tests {
    use latch_storage_memory::MemoryLockStorage;

    use crate::event::{CollectingEventListener, EventListener};

    use super::*;

    fn sample_info(lock_id: &str) -> LockInformation {
        let now = Utc::now();
        LockInformation {
            lock_id: lock_id.to_owned(),
            owner_id: "owner-a".to_owned(),
            version: Version::INITIAL,
            lock_count: 1,
            lock_begin_time: now,
            lease_expire_time: now + chrono::TimeDelta::seconds(60),
        }
    }

    #[tokio::test]
    async fn calls_emit_one_event_each() {
        let listener = Arc::new(CollectingEventListener::new());
        let root = Event::new("exec-test")
            .with_listeners(vec![Arc::clone(&listener) as Arc<dyn EventListener>]);
        let executor = StorageExecutor::new(Arc::new(MemoryLockStorage::new()));

        let info = sample_info("exec-test");
        executor
            .create_with_version(&root, "exec-test", Version::INITIAL, &info)
            .await
            .unwrap();
        executor.get(&root, "exec-test").await.unwrap();
        executor.get_time(&root).await.unwrap();

        let names = listener.action_names().await;
        assert_eq!(
            names,
            vec![
                actions::STORAGE_CREATE,
                actions::STORAGE_GET,
                actions::STORAGE_GET_TIME,
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_recorded_on_the_event() {
        let listener = Arc::new(CollectingEventListener::new());
        let root = Event::new("exec-missing")
            .with_listeners(vec![Arc::clone(&listener) as Arc<dyn EventListener>]);
        let executor = StorageExecutor::new(Arc::new(MemoryLockStorage::new()));

        let info = sample_info("exec-missing");
        let err = executor
            .update_with_version(
                &root,
                "exec-missing",
                &CasPredicate::version(Version::INITIAL),
                Version::new(2),
                &info,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LockNotFound(_)));

        let events = listener.events().await;
        assert_eq!(events.len(), 1);
        let action = &events[0].actions[0];
        assert_eq!(action.name, actions::STORAGE_UPDATE);
        assert!(action.error.as_deref().is_some_and(|e| e.contains("not found")));
    }
}
