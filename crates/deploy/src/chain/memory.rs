use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use alloy_core::primitives::{Address, TxHash, keccak256};
use anyhow::Result;
use serde_json::Value;

use super::{ChainClient, Confirmation};

/// A call observed by the in-memory chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedCall {
    pub address: Address,
    pub contract_name: String,
    pub method: String,
    pub args: Vec<Value>,
    pub sender: Address,
}

#[derive(Debug, Default)]
struct ChainState {
    nonces: HashMap<Address, u64>,
    outcomes: HashMap<TxHash, Confirmation>,
    hanging: HashSet<TxHash>,
    deployments: Vec<(String, Address, Vec<Value>)>,
    calls: Vec<SubmittedCall>,
}

/// Deterministic in-process chain.
///
/// Contract addresses follow CREATE semantics (sender and nonce), so two runs
/// over the same history produce the same addresses. Failures can be injected per
/// contract or per method to exercise the engine's failure handling.
#[derive(Debug)]
pub struct MemoryChainClient {
    accounts: Vec<Address>,
    state: Mutex<ChainState>,
    reject: BTreeSet<String>,
    revert: BTreeSet<String>,
    stall: BTreeSet<String>,
    hang: BTreeSet<String>,
    hang_submission: BTreeSet<String>,
    displace: BTreeSet<String>,
}

impl Default for MemoryChainClient {
    fn default() -> Self {
        Self::new((1..=10u8).map(Address::with_last_byte).collect())
    }
}

impl MemoryChainClient {
    pub fn new(accounts: Vec<Address>) -> Self {
        Self {
            accounts,
            state: Mutex::new(ChainState::default()),
            reject: BTreeSet::new(),
            revert: BTreeSet::new(),
            stall: BTreeSet::new(),
            hang: BTreeSet::new(),
            hang_submission: BTreeSet::new(),
            displace: BTreeSet::new(),
        }
    }

    /// Refuse submission of deployments of `contract_name` or calls to `method`.
    pub fn reject(mut self, name: impl Into<String>) -> Self {
        self.reject.insert(name.into());
        self
    }

    /// Mine deployments of `contract_name` or calls to `method` as reverted.
    pub fn revert(mut self, name: impl Into<String>) -> Self {
        self.revert.insert(name.into());
        self
    }

    /// Never confirm deployments of `contract_name` or calls to `method`.
    pub fn stall(mut self, name: impl Into<String>) -> Self {
        self.stall.insert(name.into());
        self
    }

    /// Accept deployments of `contract_name` or calls to `method` but never answer
    /// the confirmation request.
    pub fn hang(mut self, name: impl Into<String>) -> Self {
        self.hang.insert(name.into());
        self
    }

    /// Never answer the submission of deployments of `contract_name` or calls to `method`.
    pub fn hang_submission(mut self, name: impl Into<String>) -> Self {
        self.hang_submission.insert(name.into());
        self
    }

    /// Let another transaction from the sender take the nonce a deployment of
    /// `contract_name` was predicted with, so the contract lands one nonce later.
    pub fn displace(mut self, name: impl Into<String>) -> Self {
        self.displace.insert(name.into());
        self
    }

    /// Deployments submitted so far: contract name, address and arguments.
    pub fn deployments(&self) -> Vec<(String, Address, Vec<Value>)> {
        self.lock().deployments.clone()
    }

    pub fn calls(&self) -> Vec<SubmittedCall> {
        self.lock().calls.clone()
    }

    /// Number of transactions submitted so far.
    pub fn transaction_count(&self) -> usize {
        self.lock().outcomes.len()
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outcome_for(&self, name: &str, contract_address: Option<Address>) -> Confirmation {
        if self.revert.contains(name) {
            Confirmation::Reverted
        } else if self.stall.contains(name) {
            Confirmation::TimedOut
        } else {
            Confirmation::Confirmed { contract_address }
        }
    }

    fn record_outcome(
        &self,
        state: &mut ChainState,
        tx_hash: TxHash,
        name: &str,
        contract_address: Option<Address>,
    ) {
        state.outcomes.insert(tx_hash, self.outcome_for(name, contract_address));
        if self.hang.contains(name) {
            state.hanging.insert(tx_hash);
        }
    }

    /// Bump the sender nonce and derive a transaction hash from it.
    fn next_transaction(state: &mut ChainState, sender: Address) -> (u64, TxHash) {
        let nonce = state.nonces.entry(sender).or_insert(0);
        let current = *nonce;
        *nonce += 1;

        let mut preimage = sender.to_vec();
        preimage.extend_from_slice(&current.to_be_bytes());
        (current, keccak256(preimage))
    }
}

impl ChainClient for MemoryChainClient {
    async fn deploy_contract(
        &self,
        contract_name: &str,
        args: &[Value],
        sender: Address,
    ) -> Result<(Address, TxHash)> {
        if self.hang_submission.contains(contract_name) {
            std::future::pending::<()>().await;
        }
        if self.reject.contains(contract_name) {
            anyhow::bail!("Node rejected deployment of {}", contract_name);
        }

        let mut state = self.lock();
        let (nonce, tx_hash) = Self::next_transaction(&mut state, sender);
        let predicted = sender.create(nonce);

        let address = if self.displace.contains(contract_name) {
            // The displacing transaction consumes the predicted nonce.
            let (nonce, _) = Self::next_transaction(&mut state, sender);
            sender.create(nonce)
        } else {
            predicted
        };

        self.record_outcome(&mut state, tx_hash, contract_name, Some(address));
        state
            .deployments
            .push((contract_name.to_string(), address, args.to_vec()));
        Ok((predicted, tx_hash))
    }

    async fn call_method(
        &self,
        address: Address,
        contract_name: &str,
        method: &str,
        args: &[Value],
        sender: Address,
    ) -> Result<TxHash> {
        if self.hang_submission.contains(method) {
            std::future::pending::<()>().await;
        }
        if self.reject.contains(method) {
            anyhow::bail!("Node rejected call to {}", method);
        }

        let mut state = self.lock();
        let (_, tx_hash) = Self::next_transaction(&mut state, sender);

        self.record_outcome(&mut state, tx_hash, method, None);
        state.calls.push(SubmittedCall {
            address,
            contract_name: contract_name.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
            sender,
        });
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash, _timeout: Duration) -> Result<Confirmation> {
        let (hanging, outcome) = {
            let state = self.lock();
            (state.hanging.contains(&tx_hash), state.outcomes.get(&tx_hash).copied())
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        outcome.ok_or_else(|| anyhow::anyhow!("Unknown transaction {}", tx_hash))
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }
}
