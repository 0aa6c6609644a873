pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{DemoFlowSeed, FlowSeedInfo, SeedResult, VerificationResult};
pub use service::ApprovalService;
