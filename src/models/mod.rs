// Data models shared by services and API handlers

pub mod analytics;
pub mod appointment;
pub mod availability;
pub mod notification;
pub mod offering;
pub mod payment;
pub mod profile;
pub mod subscription;
pub mod user;
pub mod validation;

pub use analytics::*;
pub use appointment::*;
pub use availability::*;
pub use notification::*;
pub use offering::*;
pub use payment::*;
pub use profile::*;
pub use subscription::*;
pub use user::*;
pub use validation::*;
