//! Send-object limits

use yvault_core::config::LimitsConfig;
use yvault_core::{VaultError, VaultResult};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Bounds a new send object must respect. `-1` lifts a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendLimits {
    pub max_downloads: i32,
    pub max_expiry_days: i64,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self::from_config(&LimitsConfig::default())
    }
}

impl SendLimits {
    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self {
            max_downloads: limits.max_send_downloads,
            max_expiry_days: limits.max_send_expiry_days,
        }
    }

    /// `downloads` must be in `1..=max`, or `-1` when the maximum is `-1`.
    pub fn validate_downloads(&self, downloads: i32) -> VaultResult<()> {
        let unlimited = self.max_downloads == -1;
        match downloads {
            0 => Err(VaultError::InvalidRequest(
                "downloads cannot be set to 0".into(),
            )),
            -1 if unlimited => Ok(()),
            -1 => Err(VaultError::InvalidRequest(
                "downloads cannot be set to -1".into(),
            )),
            d if d < -1 => Err(VaultError::InvalidRequest(format!(
                "invalid download count {d}"
            ))),
            d if !unlimited && d > self.max_downloads => Err(VaultError::InvalidRequest(format!(
                "downloads must be between 1-{}",
                self.max_downloads
            ))),
            _ => Ok(()),
        }
    }

    /// `days` must be at least 1 and, unless unbounded, at most the maximum.
    pub fn validate_expiry(&self, days: u32) -> VaultResult<()> {
        if days == 0 {
            return Err(VaultError::InvalidRequest(
                "expiration must be at least 1 day".into(),
            ));
        }
        if self.max_expiry_days != -1 && i64::from(days) > self.max_expiry_days {
            return Err(VaultError::InvalidRequest(format!(
                "expiration must be between 1-{} days",
                self.max_expiry_days
            )));
        }
        Ok(())
    }

    /// Unix time at which a send created at `now` with `days` of life expires.
    pub fn expires_at(now: u64, days: u32) -> u64 {
        now.saturating_add(u64::from(days) * SECS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDED: SendLimits = SendLimits {
        max_downloads: 10,
        max_expiry_days: 30,
    };
    const OPEN: SendLimits = SendLimits {
        max_downloads: -1,
        max_expiry_days: -1,
    };

    #[test]
    fn test_downloads_bounded() {
        assert!(BOUNDED.validate_downloads(1).is_ok());
        assert!(BOUNDED.validate_downloads(10).is_ok());
        assert!(BOUNDED.validate_downloads(11).is_err());
        assert!(BOUNDED.validate_downloads(0).is_err());
        assert!(BOUNDED.validate_downloads(-1).is_err());
        assert!(BOUNDED.validate_downloads(-5).is_err());
    }

    #[test]
    fn test_downloads_unbounded() {
        assert!(OPEN.validate_downloads(-1).is_ok());
        assert!(OPEN.validate_downloads(1_000_000).is_ok());
        assert!(OPEN.validate_downloads(0).is_err());
    }

    #[test]
    fn test_expiry() {
        assert!(BOUNDED.validate_expiry(1).is_ok());
        assert!(BOUNDED.validate_expiry(30).is_ok());
        assert!(BOUNDED.validate_expiry(31).is_err());
        assert!(BOUNDED.validate_expiry(0).is_err());
        assert!(OPEN.validate_expiry(3650).is_ok());
        assert!(OPEN.validate_expiry(0).is_err());
    }

    #[test]
    fn test_expires_at() {
        assert_eq!(SendLimits::expires_at(100, 2), 100 + 2 * 86_400);
    }
}
