pub mod attendance;
pub mod auth;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod insights;
pub mod roster;
pub mod schedule;
pub mod setup;
pub mod students;
pub mod teachers;
