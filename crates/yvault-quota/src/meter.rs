//! Quota meter over the user table
//!
//! A charge persists `max(0, used + amount)` first and only then compares
//! against the allowance, so an over-limit charge stays applied when
//! `QuotaExceeded` is returned. Callers that want the charge undone must
//! issue the negative charge themselves.

use std::sync::Arc;

use yvault_core::{Meter, Usage, User, UserId, VaultError, VaultResult};
use yvault_state::MetaStore;

#[derive(Clone)]
pub struct QuotaMeter {
    store: Arc<dyn MetaStore>,
}

impl QuotaMeter {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }

    /// Return the user row, creating it with the given allowances on first
    /// sight. Existing rows keep their counters and allowances.
    pub fn ensure_user(
        &self,
        id: &UserId,
        public_name: Option<String>,
        storage_available: i64,
        send_available: i64,
    ) -> VaultResult<User> {
        if let Some(user) = self.store.user(id)? {
            return Ok(user);
        }
        let mut user = User::new(id.clone(), storage_available, send_available);
        user.public_name = public_name;
        self.store.insert_user(user.clone())?;
        tracing::info!(user = %id, storage_available, send_available, "user provisioned");
        Ok(user)
    }

    /// Apply `amount` (negative to release) to one meter of `user`.
    pub fn charge(&self, user: &UserId, meter: Meter, amount: i64) -> VaultResult<Usage> {
        let usage = self.store.apply_charge(user, meter, amount)?;
        if amount > 0 && usage.exceeded() {
            tracing::warn!(
                user = %user,
                ?meter,
                used = usage.used,
                available = usage.available,
                "quota exceeded after charge"
            );
            return Err(VaultError::QuotaExceeded {
                user: user.clone(),
                used: usage.used,
                available: usage.available,
            });
        }
        tracing::debug!(user = %user, ?meter, amount, used = usage.used, "quota charged");
        Ok(usage)
    }

    pub fn charge_storage(&self, user: &UserId, amount: i64) -> VaultResult<Usage> {
        self.charge(user, Meter::Storage, amount)
    }

    pub fn charge_send(&self, user: &UserId, amount: i64) -> VaultResult<Usage> {
        self.charge(user, Meter::Send, amount)
    }

    /// `QuotaExceeded` when the meter already reads over its allowance.
    pub fn require_within(&self, user: &UserId, meter: Meter) -> VaultResult<Usage> {
        let usage = self.usage(user, meter)?;
        if usage.exceeded() {
            return Err(VaultError::QuotaExceeded {
                user: user.clone(),
                used: usage.used,
                available: usage.available,
            });
        }
        Ok(usage)
    }

    pub fn usage(&self, user: &UserId, meter: Meter) -> VaultResult<Usage> {
        self.store
            .user(user)?
            .map(|u| u.usage(meter))
            .ok_or_else(|| VaultError::NotFound(format!("user {user}")))
    }

    /// Free space as exposed to clients, clamped at 0.
    pub fn remaining_storage(&self, user: &UserId) -> VaultResult<i64> {
        Ok(self.usage(user, Meter::Storage)?.remaining())
    }

    pub fn remaining_send(&self, user: &UserId) -> VaultResult<i64> {
        Ok(self.usage(user, Meter::Send)?.remaining())
    }

    /// Whether `size` more bytes fit; a negative allowance always fits.
    pub fn can_store(&self, user: &UserId, size: u64) -> VaultResult<bool> {
        self.fits(user, Meter::Storage, size)
    }

    pub fn can_send(&self, user: &UserId, size: u64) -> VaultResult<bool> {
        self.fits(user, Meter::Send, size)
    }

    /// Admission check: `QuotaExceeded` when `size` does not fit.
    pub fn admit(&self, user: &UserId, meter: Meter, size: u64) -> VaultResult<()> {
        let usage = self.usage(user, meter)?;
        if usage.is_unlimited() || (size as i128) <= usage.remaining() as i128 {
            Ok(())
        } else {
            Err(VaultError::QuotaExceeded {
                user: user.clone(),
                used: usage.used,
                available: usage.available,
            })
        }
    }

    fn fits(&self, user: &UserId, meter: Meter, size: u64) -> VaultResult<bool> {
        match self.admit(user, meter, size) {
            Ok(()) => Ok(true),
            Err(VaultError::QuotaExceeded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
