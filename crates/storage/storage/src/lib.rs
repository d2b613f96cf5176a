pub mod connection;
pub mod error;
pub mod info;
pub mod storage;
pub mod testing;
pub mod time;

pub use connection::{ConnectionManager, FixedConnectionManager, FnConnectionManager};
pub use error::StorageError;
pub use info::{LockInformation, Version};
pub use storage::{CasPredicate, LockStorage};
pub use time::{DEFAULT_NTP_SERVERS, NtpTimeProvider, SystemTimeProvider, TimeProvider};
