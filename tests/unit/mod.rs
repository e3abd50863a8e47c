// Pure business rules exercised through the public API of the crate

pub mod booking_rules_test;
pub mod channels_test;
pub mod config_test;
pub mod payments_test;
pub mod reports_test;
