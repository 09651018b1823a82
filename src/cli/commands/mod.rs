pub mod analyze;
pub mod ask;
pub mod cache;
pub mod config;
pub mod init;
pub mod status;
