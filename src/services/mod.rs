//! Pipeline stages and the services around them

pub mod dedup;
pub mod fingerprint;
pub mod m3u_parser;
pub mod merger;
pub mod metrics;
pub mod orchestrator;
pub mod prober;
pub mod publisher;
pub mod scheduler;
pub mod sources;
pub mod staging;
pub mod url_audit;
pub mod validator;
