pub mod delay_job;
pub mod notification_log;
pub mod resource;
pub mod subscription;
