//! The execution engine: walks an [`ExecutionPlan`] one unit at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use alloy_core::primitives::utils::parse_ether;
use alloy_core::primitives::{Address, TxHash};
use anyhow::Result;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::chain::{ChainClient, Confirmation};
use crate::report::{RunReport, UnitOutcome, UnitState};
use crate::store::{
    ArtifactPersistence, ArtifactStore, ContractInterface, DeploymentRecord, RecordKind,
};
use crate::{
    Arg, ExecutionError, ExecutionErrorKind, ExecutionPlan, Unit, UnitAction, UnitRegistry,
};

/// Which units ignore their existing record and run again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForceRedeploy {
    #[default]
    None,
    All,
    Units(BTreeSet<String>),
}

impl ForceRedeploy {
    pub fn units<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Units(names.into_iter().map(Into::into).collect())
    }

    pub fn applies(&self, unit_name: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Units(names) => names.contains(unit_name),
        }
    }
}

/// Parameters of a run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Account every transaction is sent from.
    pub sender: Address,
    /// Named accounts available to `{ account = ... }` arguments.
    pub accounts: BTreeMap<String, Address>,
    /// Upper bound on submission plus confirmation of a single unit. Both phases
    /// share one deadline.
    pub confirmation_timeout: Duration,
    pub force: ForceRedeploy,
    /// Write records for successful calls so later runs skip them.
    pub track_calls: bool,
}

impl EngineConfig {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            accounts: BTreeMap::new(),
            confirmation_timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            force: ForceRedeploy::None,
            track_calls: false,
        }
    }
}

/// A unit of the plan and whether a run would skip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub name: String,
    pub kind: &'static str,
    /// Address from the existing record, when the unit would be skipped.
    pub recorded_address: Option<Address>,
    pub skip: bool,
}

/// Describe what a run of `plan` would do against `store`, without touching the chain.
pub fn preview<P: ArtifactPersistence>(
    registry: &UnitRegistry,
    plan: &ExecutionPlan,
    store: &ArtifactStore<P>,
    force: &ForceRedeploy,
) -> Result<Vec<PlannedUnit>> {
    plan.iter()
        .map(|name| {
            let unit = registry.get(name)?;
            let record = store.record(name)?;
            let skip = record.is_some() && !force.applies(name);
            Ok(PlannedUnit {
                name: name.clone(),
                kind: unit.action.kind(),
                recorded_address: record.map(|r| r.address),
                skip,
            })
        })
        .collect()
}

/// Result of a unit that ran to confirmation.
struct Executed {
    address: Address,
    tx_hash: TxHash,
}

/// Runs units in plan order, one at a time, against a chain client.
///
/// - A unit with a record on the store's network is skipped unless forced.
/// - The first failure halts the run. Later units stay pending.
/// - Records are written only after the client reports confirmation.
#[derive(Debug)]
pub struct Engine<C> {
    client: C,
    config: EngineConfig,
    abort: Option<watch::Receiver<bool>>,
}

impl<C: ChainClient> Engine<C> {
    pub fn new(client: C, config: EngineConfig) -> Self {
        Self {
            client,
            config,
            abort: None,
        }
    }

    /// Stop before the next unit once `true` is sent on the channel.
    ///
    /// A unit already running is allowed to finish.
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn abort_requested(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Execute `plan` and report the state of every unit in it.
    pub async fn run<P: ArtifactPersistence>(
        &self,
        registry: &UnitRegistry,
        plan: &ExecutionPlan,
        store: &mut ArtifactStore<P>,
    ) -> RunReport {
        let mut outcomes: Vec<UnitOutcome> = plan
            .iter()
            .map(|name| {
                let kind = registry.get(name).map(|u| u.action.kind()).unwrap_or("unknown");
                UnitOutcome::pending(name.clone(), kind)
            })
            .collect();
        let mut aborted = false;

        tracing::info!(
            network = %store.network(),
            units = plan.len(),
            sender = %self.config.sender,
            "Starting deployment run..."
        );

        for outcome in outcomes.iter_mut() {
            if self.abort_requested() {
                tracing::warn!(unit = %outcome.name, "Run aborted before unit started");
                aborted = true;
                break;
            }

            let unit = match registry.get(&outcome.name) {
                Ok(unit) => unit,
                Err(e) => {
                    outcome.state = UnitState::Failed(ExecutionError::argument(e.to_string()));
                    break;
                }
            };

            match self.existing_record(unit, store) {
                Ok(Some(record)) => {
                    outcome.address = Some(record.address);
                    outcome.tx_hash = Some(record.transaction_hash);
                    outcome.state = UnitState::Skipped;
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(unit = %unit.name, error = %err, "Failed to read record");
                    outcome.state = UnitState::Failed(err);
                    break;
                }
            }

            outcome.state = UnitState::Running;
            tracing::info!(unit = %unit.name, action = unit.action.kind(), "Running unit...");

            match self.execute(unit, store).await {
                Ok(executed) => {
                    tracing::info!(
                        unit = %unit.name,
                        address = %executed.address,
                        tx_hash = %executed.tx_hash,
                        "Unit succeeded"
                    );
                    outcome.address = Some(executed.address);
                    outcome.tx_hash = Some(executed.tx_hash);
                    outcome.state = UnitState::Succeeded;
                }
                Err(err) => {
                    tracing::error!(unit = %unit.name, kind = %err.kind, error = %err.message, "Unit failed");
                    outcome.state = UnitState::Failed(err);
                    break;
                }
            }
        }

        let report = RunReport {
            network: store.network().to_string(),
            outcomes,
            aborted,
        };
        if report.is_success() {
            tracing::info!(
                succeeded = report.succeeded_count(),
                skipped = report.skipped_count(),
                "Deployment run complete"
            );
        }
        report
    }

    /// The record that satisfies `unit`, unless a redeploy is forced.
    fn existing_record<P: ArtifactPersistence>(
        &self,
        unit: &Unit,
        store: &ArtifactStore<P>,
    ) -> Result<Option<DeploymentRecord>, ExecutionError> {
        let record = store
            .record(&unit.name)
            .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Store, &e))?;

        let Some(record) = record else {
            return Ok(None);
        };

        if self.config.force.applies(&unit.name) {
            tracing::info!(unit = %unit.name, address = %record.address, "Forced redeploy, ignoring existing record");
            return Ok(None);
        }

        match self.resolve_args(unit.action.args(), store) {
            Ok(args) if record.args_changed(&args) => {
                tracing::warn!(
                    unit = %unit.name,
                    address = %record.address,
                    "Arguments changed since the recorded deployment. Force a redeploy to apply them"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(unit = %unit.name, error = %e, "Could not resolve arguments of skipped unit");
            }
        }

        tracing::info!(unit = %unit.name, address = %record.address, "Already deployed, skipping");
        Ok(Some(record))
    }

    async fn execute<P: ArtifactPersistence>(
        &self,
        unit: &Unit,
        store: &mut ArtifactStore<P>,
    ) -> Result<Executed, ExecutionError> {
        match &unit.action {
            UnitAction::Deploy { contract, args } => {
                let args = self.resolve_args(args, store)?;
                if let Some(interface) = Self::interface(store, &contract.contract_name)? {
                    interface
                        .encode_deploy(&args)
                        .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Argument, &e))?;
                }

                let deadline = Instant::now() + self.config.confirmation_timeout;
                let (predicted, tx_hash) = self
                    .submit(
                        deadline,
                        self.client.deploy_contract(
                            &contract.contract_name,
                            &args,
                            self.config.sender,
                        ),
                    )
                    .await?;

                // The receipt is authoritative: another transaction from the sender
                // may have taken the nonce the address was predicted from.
                let address = match self.confirm(deadline, tx_hash).await? {
                    Some(actual) if actual != predicted => {
                        tracing::warn!(
                            unit = %unit.name,
                            %predicted,
                            %actual,
                            "Contract landed at a different address than predicted"
                        );
                        actual
                    }
                    Some(actual) => actual,
                    None => predicted,
                };

                let record = DeploymentRecord::new(
                    RecordKind::Deploy,
                    &unit.name,
                    &contract.contract_name,
                    store.network(),
                    address,
                    tx_hash,
                    args,
                );
                store
                    .commit(record)
                    .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Store, &e))?;

                Ok(Executed { address, tx_hash })
            }
            UnitAction::Call {
                target,
                method,
                args,
            } => {
                let target_record = store
                    .record(target)
                    .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Store, &e))?
                    .filter(|r| r.kind == RecordKind::Deploy)
                    .ok_or_else(|| {
                        ExecutionError::argument(format!(
                            "Call target {} has no deployment on {}",
                            target,
                            store.network()
                        ))
                    })?;

                let args = self.resolve_args(args, store)?;
                if let Some(interface) = Self::interface(store, &target_record.contract_name)? {
                    interface
                        .encode_call(method, &args)
                        .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Argument, &e))?;
                }

                let deadline = Instant::now() + self.config.confirmation_timeout;
                let tx_hash = self
                    .submit(
                        deadline,
                        self.client.call_method(
                            target_record.address,
                            &target_record.contract_name,
                            method,
                            &args,
                            self.config.sender,
                        ),
                    )
                    .await?;
                self.confirm(deadline, tx_hash).await?;

                if self.config.track_calls {
                    let record = DeploymentRecord::new(
                        RecordKind::Call,
                        &unit.name,
                        &target_record.contract_name,
                        store.network(),
                        target_record.address,
                        tx_hash,
                        args,
                    );
                    store
                        .commit(record)
                        .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Store, &e))?;
                }

                Ok(Executed {
                    address: target_record.address,
                    tx_hash,
                })
            }
        }
    }

    /// Interface of `contract_name`, if the store has a catalog to check against.
    ///
    /// An empty catalog disables validation. A loaded catalog that lacks the
    /// contract is an argument error.
    fn interface<'a, P: ArtifactPersistence>(
        store: &'a ArtifactStore<P>,
        contract_name: &str,
    ) -> Result<Option<&'a ContractInterface>, ExecutionError> {
        let catalog = store.interfaces();
        if catalog.is_empty() {
            return Ok(None);
        }
        catalog.get(contract_name).map(Some).ok_or_else(|| {
            ExecutionError::argument(format!("No compiled artifact for contract {}", contract_name))
        })
    }

    /// Submission and confirmation of a unit share one `deadline`.
    async fn submit<T>(
        &self,
        deadline: Instant,
        submission: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T, ExecutionError> {
        match tokio::time::timeout_at(deadline, submission).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ExecutionError::from_anyhow(ExecutionErrorKind::Submission, &e)),
            Err(_) => Err(ExecutionError::new(
                ExecutionErrorKind::Timeout,
                format!(
                    "submission did not complete within {:?}",
                    self.config.confirmation_timeout
                ),
            )),
        }
    }

    /// Wait for `tx_hash` until `deadline`. Returns the contract address from the
    /// receipt, if the client reported one.
    async fn confirm(
        &self,
        deadline: Instant,
        tx_hash: TxHash,
    ) -> Result<Option<Address>, ExecutionError> {
        let timeout = self.config.confirmation_timeout;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let confirmation = tokio::time::timeout_at(
            deadline,
            self.client.await_confirmation(tx_hash, remaining),
        )
        .await;

        match confirmation {
            Ok(Ok(Confirmation::Confirmed { contract_address })) => Ok(contract_address),
            Ok(Ok(Confirmation::Reverted)) => Err(ExecutionError::new(
                ExecutionErrorKind::Reverted,
                format!("transaction {} reverted", tx_hash),
            )),
            Ok(Ok(Confirmation::TimedOut)) | Err(_) => Err(ExecutionError::new(
                ExecutionErrorKind::Timeout,
                format!("transaction {} not confirmed within {:?}", tx_hash, timeout),
            )),
            Ok(Err(e)) => Err(ExecutionError::from_anyhow(ExecutionErrorKind::Submission, &e)),
        }
    }

    fn resolve_args<P: ArtifactPersistence>(
        &self,
        args: &[Arg],
        store: &ArtifactStore<P>,
    ) -> Result<Vec<Value>, ExecutionError> {
        args.iter().map(|arg| self.resolve_arg(arg, store)).collect()
    }

    /// Substitute symbolic references with concrete values.
    fn resolve_arg<P: ArtifactPersistence>(
        &self,
        arg: &Arg,
        store: &ArtifactStore<P>,
    ) -> Result<Value, ExecutionError> {
        match arg {
            Arg::Literal(value) => Ok(value.clone()),
            Arg::List(items) => self.resolve_args(items, store).map(Value::Array),
            Arg::Address { unit } => store
                .address_of(unit)
                .map_err(|e| ExecutionError::from_anyhow(ExecutionErrorKind::Store, &e))?
                .map(|address| Value::String(address.to_string()))
                .ok_or_else(|| {
                    ExecutionError::argument(format!(
                        "Unit {} has no deployed address on {}",
                        unit,
                        store.network()
                    ))
                }),
            Arg::Account { account } => self
                .config
                .accounts
                .get(account)
                .map(|address| Value::String(address.to_string()))
                .ok_or_else(|| ExecutionError::argument(format!("Unknown named account {}", account))),
            Arg::Ether { ether } => parse_ether(ether)
                .map(|wei| Value::String(wei.to_string()))
                .map_err(|e| ExecutionError::argument(format!("Invalid ether amount {}: {}", ether, e))),
        }
    }
}
