//! contrail-deploy - Deployment orchestrator for interdependent smart contracts.
//!
//! This crate resolves a dependency graph over named deployment units, executes
//! each unit at most once per network, and persists the resulting addresses so
//! later units and later runs can reference them.

mod error;
pub use error::{ExecutionError, ExecutionErrorKind, ResolveError};

mod unit;
pub use unit::{Arg, ContractRef, Unit, UnitAction};

mod registry;
pub use registry::UnitRegistry;

mod selector;
pub use selector::Selection;

mod resolver;
pub use resolver::{ExecutionPlan, resolve};

mod rpc;
pub use rpc::{DEFAULT_REQUEST_TIMEOUT, RpcTransport};

pub mod chain;
pub use chain::{ChainClient, Confirmation, MemoryChainClient, RpcChainClient};

pub mod store;
pub use store::{
    ArtifactPersistence, ArtifactStore, ContractInterface, DeploymentRecord,
    FileArtifactPersistence, InterfaceCatalog, MemoryPersistence, RecordKind,
};

mod report;
pub use report::{RunReport, UnitOutcome, UnitState};

mod engine;
pub use engine::{Engine, EngineConfig, ForceRedeploy, PlannedUnit, preview};

pub mod config;
pub use config::{CONFIG_FILENAME, NamedAccount, NetworkConfig, ProjectConfig, UnitSpec};
