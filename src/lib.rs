pub mod cli;
pub mod daemon;
pub mod errors;
pub mod models;
pub mod plan;
pub mod process;
pub mod reference;
pub mod registry;
pub mod server;
pub mod storage;
