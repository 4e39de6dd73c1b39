//! Off-chain client for the product satisfaction survey.
//!
//! `Orchestrator` drives the survey lifecycle against a `SurveyProgram`.
//! `RpcSurveyProgram` talks to a deployed program; `LocalNetwork` and
//! `MockMxe` provide an in-process deployment for local use and tests.

pub mod config;
pub mod error;
pub mod ledger;
pub mod local;
pub mod logging;
pub mod orchestrator;
pub mod program;
pub mod rpc;

pub use config::{
    ArciumAccounts, ArciumSettings, ClientConfig, ConfigError, DecryptMode, DecryptionSettings,
    LoggingSettings, NetworkSettings,
};
pub use error::{ClientError, ClientResult};
pub use ledger::{DecryptOracle, EncryptedInput, EncryptedLedger, LedgerError, MockMxe};
pub use local::{LocalNetwork, NetworkEvent};
pub use orchestrator::{
    DecryptSession, FinalizeOutcome, Orchestrator, ProductResult, SurveyResults, SurveySummary,
};
pub use program::{CallbackOrigin, SurveyProgram};
pub use rpc::{ProgramAddresses, RpcSurveyProgram};
