use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::StorageError;

/// Manages the lifecycle of backend connections on behalf of a storage
/// adapter.
///
/// Adapters borrow a connection per operation (`take` then `put_back`)
/// rather than owning one, so the same storage can sit on top of a DSN, a
/// pool, or a handle the embedding application already built.
#[async_trait]
pub trait ConnectionManager<C>: Send + Sync {
    /// Identifier of this manager, non-empty.
    fn name(&self) -> &str;

    /// Borrow a connection.
    async fn take(&self) -> Result<C, StorageError>;

    /// Return a previously taken connection.
    async fn put_back(&self, connection: C) -> Result<(), StorageError>;

    /// Release every resource the manager holds. Taken connections become
    /// invalid.
    async fn shutdown(&self) -> Result<(), StorageError>;
}

/// Wraps a connection handle the application already owns.
///
/// `take` clones the handle; this fits pool-like handles (`sqlx::PgPool`,
/// client objects holding an `Arc` internally) where cloning is cheap and
/// the real pooling happens underneath.
pub struct FixedConnectionManager<C> {
    connection: C,
}

impl<C> FixedConnectionManager<C> {
    #[must_use]
    pub fn new(connection: C) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl<C> ConnectionManager<C> for FixedConnectionManager<C>
where
    C: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        "fixed-connection-manager"
    }

    async fn take(&self) -> Result<C, StorageError> {
        Ok(self.connection.clone())
    }

    async fn put_back(&self, _connection: C) -> Result<(), StorageError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

type ConnectFn<C> = dyn Fn() -> BoxFuture<'static, Result<C, StorageError>> + Send + Sync;

/// Obtains connections from a user-supplied async closure.
pub struct FnConnectionManager<C> {
    name: String,
    connect: Box<ConnectFn<C>>,
}

impl<C> FnConnectionManager<C> {
    pub fn new<F>(name: impl Into<String>, connect: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<C, StorageError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            connect: Box::new(connect),
        }
    }
}

#[async_trait]
impl<C> ConnectionManager<C> for FnConnectionManager<C>
where
    C: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn take(&self) -> Result<C, StorageError> {
        (self.connect)().await
    }

    async fn put_back(&self, _connection: C) -> Result<(), StorageError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_manager_clones_handle() {
        let manager = FixedConnectionManager::new("handle".to_owned());
        let a = manager.take().await.unwrap();
        let b = manager.take().await.unwrap();
        assert_eq!(a, b);
        manager.put_back(a).await.unwrap();
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn fn_manager_invokes_closure() {
        let manager = FnConnectionManager::new("counter", || {
            Box::pin(async { Ok::<_, StorageError>(7_u64) })
        });
        assert_eq!(manager.name(), "counter");
        assert_eq!(manager.take().await.unwrap(), 7);
    }
}
