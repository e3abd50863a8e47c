// Integration tests: HTTP round trips through the router, provider clients
// against mock servers, database-backed booking flows and periodic jobs

pub mod booking_flow_test;
pub mod provider_clients_test;
pub mod scheduler_jobs_test;
