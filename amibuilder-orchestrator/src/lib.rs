pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod images;
pub mod launcher;
pub mod logger;
pub mod platforms;
pub mod provider_manager;
pub mod provisioner;
pub mod resources;
pub mod retry;
pub mod run;
pub mod state_machine;
pub mod storage;
pub mod terminator;

pub use config::OrchestratorConfig;
pub use error::BuildError;
pub use run::{BuildOutcome, BuildRequest, BuildRun};
