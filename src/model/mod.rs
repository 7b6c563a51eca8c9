pub mod attendance;
pub mod group;
pub mod holiday;
pub mod mail_template;
pub mod overtime;
pub mod rest_time;
pub mod role;
pub mod timecard;
pub mod user;
