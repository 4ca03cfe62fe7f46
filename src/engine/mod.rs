pub mod arbiter;
pub mod dispatch;
pub mod expiry;
pub mod lifecycle;
