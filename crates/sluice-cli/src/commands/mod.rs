//! CLI command implementations

pub mod cleanup;
pub mod data;
pub mod history;
pub mod init;
pub mod job;
pub mod logs;
pub mod overview;
pub mod run;
