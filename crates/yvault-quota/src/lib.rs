//! yvault-quota: per-user consumption counters and per-visitor rate limits
//!
//! Both services are constructed once at startup and shared by reference;
//! neither keeps process-wide globals.

pub mod limiter;
pub mod meter;

pub use limiter::VisitorLimiter;
pub use meter::QuotaMeter;
