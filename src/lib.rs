pub mod batch_plan;
pub mod campaign;
pub mod cli;
pub mod config;
pub mod edit;
pub mod error;
pub mod executor;
pub mod findings;
pub mod report;
pub mod review;
pub mod risk;
pub mod scan;
pub mod tools;
pub mod util;
