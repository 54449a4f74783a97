pub mod app;
pub mod dashboard;
pub mod logging;
pub mod pid_file;
