//! Per-unit outcome of a run.

use std::fmt;

use alloy_core::primitives::{Address, TxHash};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};

use crate::ExecutionError;

/// Lifecycle of a unit within a run.
///
/// Every unit starts `Pending`. `Skipped`, `Succeeded` and `Failed` are terminal.
/// After a failure the remaining units stay `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Running,
    Skipped,
    Succeeded,
    Failed(ExecutionError),
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded | Self::Failed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "FAILED",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(err) => write!(f, "FAILED ({})", err),
            other => f.write_str(other.label()),
        }
    }
}

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub name: String,
    /// `deploy` or `call`.
    pub kind: &'static str,
    pub state: UnitState,
    /// Deployed address (or call target), when known.
    pub address: Option<Address>,
    pub tx_hash: Option<TxHash>,
}

impl UnitOutcome {
    pub fn pending(name: impl Into<String>, kind: &'static str) -> Self {
        Self {
            name: name.into(),
            kind,
            state: UnitState::Pending,
            address: None,
            tx_hash: None,
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  [{}] {} ({})", self.state.label(), self.name, self.kind)?;
        if let Some(address) = self.address {
            write!(f, " address={}", address)?;
        }
        if let Some(tx_hash) = self.tx_hash {
            write!(f, " tx={}", tx_hash)?;
        }
        if let UnitState::Failed(err) = &self.state {
            write!(f, " error=\"{}\"", err)?;
        }
        Ok(())
    }
}

/// Terminal status of every unit considered by a run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub network: String,
    pub outcomes: Vec<UnitOutcome>,
    /// The operator interrupted the run before it reached the end of the plan.
    pub aborted: bool,
}

impl RunReport {
    /// All units succeeded or were skipped.
    pub fn is_success(&self) -> bool {
        !self.aborted
            && self
                .outcomes
                .iter()
                .all(|o| matches!(o.state, UnitState::Succeeded | UnitState::Skipped))
    }

    pub fn outcome(&self, name: &str) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<&UnitState> {
        self.outcome(name).map(|o| &o.state)
    }

    /// The failed unit, if any. A run halts at its first failure.
    pub fn failed(&self) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.state, UnitState::Failed(_)))
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(|s| matches!(s, UnitState::Succeeded))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, UnitState::Skipped))
    }

    pub fn pending_count(&self) -> usize {
        self.count(|s| matches!(s, UnitState::Pending))
    }

    fn count(&self, predicate: impl Fn(&UnitState) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.state)).count()
    }

    /// Render the report as a table for terminal output.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Unit", "Action", "Status", "Address", "Transaction"]);

        for outcome in &self.outcomes {
            table.add_row(vec![
                outcome.name.clone(),
                outcome.kind.to_string(),
                outcome.state.to_string(),
                outcome.address.map(|a| a.to_string()).unwrap_or_default(),
                outcome.tx_hash.map(|h| h.to_string()).unwrap_or_default(),
            ]);
        }
        table
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() {
            "OK"
        } else if self.aborted {
            "ABORTED"
        } else {
            "FAILED"
        };
        writeln!(f, "Deployment on {}: {}", self.network, status)?;
        writeln!(
            f,
            "  succeeded={} skipped={} pending={}",
            self.succeeded_count(),
            self.skipped_count(),
            self.pending_count()
        )?;

        for outcome in &self.outcomes {
            writeln!(f, "{}", outcome)?;
        }
        Ok(())
    }
}
