pub mod cluster;
pub mod helm;
pub mod manifest;
pub mod runner;
pub mod status;
