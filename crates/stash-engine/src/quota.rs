//! Quota ledger.
//!
//! Every version ever created is charged to its account when it is created
//! and credited back only when its logical file is deleted, together with
//! all of the file's other versions. Superseding a version frees nothing.
//! Both sides run inside the metadata transaction that writes the rows they
//! account for; the counter is never touched anywhere else.

use stash_meta::{MetaError, MetaTransaction};
use stash_types::{Account, AccountId};

use crate::error::{EngineError, EngineResult};

/// Usage after adding `incoming` bytes, or `QuotaExceeded` if that would
/// exceed the limit (or overflow).
pub fn projected_usage(account: &Account, incoming: u64) -> EngineResult<u64> {
    let exceeded = || EngineError::QuotaExceeded {
        used: account.storage_used,
        limit: account.storage_limit,
        requested: incoming,
    };
    let projected = account.storage_used.checked_add(incoming).ok_or_else(exceeded)?;
    if projected > account.storage_limit {
        return Err(exceeded());
    }
    Ok(projected)
}

/// Bytes admitted by [`check_and_reserve`], not yet charged.
///
/// Call [`Reservation::charge`] on the same transaction before committing.
#[must_use = "a reservation must be charged before the transaction commits"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    account_id: AccountId,
    bytes: u64,
}

impl Reservation {
    /// The reserved byte count.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Apply the reservation to the account counter.
    pub fn charge(self, tx: &mut dyn MetaTransaction) -> EngineResult<Account> {
        adjust(tx, &self.account_id, i128::from(self.bytes))
    }
}

/// Lock the account row and admit `incoming` bytes against its limit.
pub fn check_and_reserve(
    tx: &mut dyn MetaTransaction,
    account_id: &AccountId,
    incoming: u64,
) -> EngineResult<Reservation> {
    let account = tx
        .account_for_update(account_id)?
        .ok_or(EngineError::AccountNotFound(*account_id))?;
    projected_usage(&account, incoming)?;
    Ok(Reservation {
        account_id: *account_id,
        bytes: incoming,
    })
}

/// Credit `bytes` back to the account.
///
/// Releasing more than is charged means the counter and the version rows
/// disagree, which is reported as an integrity violation.
pub fn release(
    tx: &mut dyn MetaTransaction,
    account_id: &AccountId,
    bytes: u64,
) -> EngineResult<Account> {
    adjust(tx, account_id, -i128::from(bytes))
}

fn adjust(tx: &mut dyn MetaTransaction, account_id: &AccountId, delta: i128) -> EngineResult<Account> {
    match tx.adjust_storage_used(account_id, delta) {
        Ok(account) => Ok(account),
        Err(MetaError::RowNotFound { .. }) => Err(EngineError::AccountNotFound(*account_id)),
        Err(MetaError::Constraint { reason, .. }) => Err(EngineError::IntegrityViolation(
            format!("storage counter of account {account_id}: {reason}"),
        )),
        Err(e) => Err(e.into()),
    }
}
