pub mod actions;
pub mod cron_jobs;
pub mod events;
pub mod flows;
