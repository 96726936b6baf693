pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod grader_api;
pub mod model;
pub mod providers;
pub mod retry;
pub mod sandbox;
pub mod storage;
