pub mod job;
pub mod logging;
