//! 按用户串行化破坏性树操作的内存锁。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{CoreError, CoreResult};

/// One advisory mutex per user uuid. Conflicting edits by the same actor
/// are serialized; different users sharing a space are not.
#[derive(Debug, Default)]
pub struct UserLockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take the user's lock without waiting. Contention surfaces as
    /// `Busy`; the guard releases on drop, so no lease or timer is needed.
    pub async fn try_lock_user(&self, user_uuid: &str) -> CoreResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(user_uuid.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().map_err(|_| {
            CoreError::Busy(format!(
                "another operation is in flight for user {user_uuid}, retry later"
            ))
        })
    }
}
