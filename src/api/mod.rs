pub mod attendance;
pub mod context;
pub mod group;
pub mod holiday;
pub mod mail;
pub mod overtime;
pub mod rest_time;
pub mod summary;
pub mod timecard;
pub mod user;
