// Business logic services

pub mod analytics_service;
pub mod availability_service;
pub mod booking_service;
pub mod channels;
pub mod notification_scheduler;
pub mod notification_service;
pub mod offering_service;
pub mod payment_service;
pub mod profile_service;
pub mod report_renderer;
pub mod stripe_client;

pub use analytics_service::AnalyticsService;
pub use availability_service::AvailabilityService;
pub use booking_service::BookingService;
pub use notification_scheduler::{NotificationScheduler, SchedulerJobs};
pub use notification_service::NotificationService;
pub use offering_service::OfferingService;
pub use payment_service::PaymentService;
pub use profile_service::ProfileService;
