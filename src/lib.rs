pub mod artifact;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod invoker;
pub mod logging;
pub mod matrix;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod subset;
