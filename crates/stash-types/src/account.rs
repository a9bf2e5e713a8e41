use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AccountId;

/// A quota holder.
///
/// `storage_used` is a denormalized running total of every version blob
/// charged to the account and not yet released by a delete. It is only ever
/// changed inside a metadata transaction that also writes the file rows it
/// accounts for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Bytes currently charged to the account.
    pub storage_used: u64,
    /// Maximum bytes the account may have charged at once. Always > 0.
    pub storage_limit: u64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A fresh account with nothing charged.
    pub fn new(storage_limit: u64) -> Self {
        Self {
            id: AccountId::new(),
            storage_used: 0,
            storage_limit,
            created_at: Utc::now(),
        }
    }

    /// Bytes still available before the limit is reached.
    pub fn remaining(&self) -> u64 {
        self.storage_limit.saturating_sub(self.storage_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_empty() {
        let account = Account::new(1000);
        assert_eq!(account.storage_used, 0);
        assert_eq!(account.remaining(), 1000);
    }

    #[test]
    fn remaining_saturates() {
        let mut account = Account::new(100);
        account.storage_used = 150;
        assert_eq!(account.remaining(), 0);
    }
}
