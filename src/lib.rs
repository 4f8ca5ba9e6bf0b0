pub mod configuration;
pub mod controller;
pub mod enrichment;
pub mod error_handling;
pub mod network;
pub mod protocols;
pub mod session_management;
pub mod shell;
pub mod storage;
