pub mod cache;
pub mod clock;
pub mod cloud_scheduler;
pub mod cron;
pub mod invoker;
pub mod jobs;
pub mod refresher;
pub mod scheduler;
pub mod wallet;
