//! The artifact store: compiled interfaces plus persisted deployment records.
//!
//! - [`ArtifactPersistence`] is the durable key-value seam, implemented by
//!   [`FileArtifactPersistence`] and [`MemoryPersistence`].
//! - [`InterfaceCatalog`] maps contract names to their ABI and bytecode.
//! - [`ArtifactStore`] scopes both to the network of the current run.

mod interface;
mod persistence;
mod record;

pub use interface::{ContractInterface, InterfaceCatalog};
pub use persistence::{ArtifactPersistence, FileArtifactPersistence, LOCK_FILENAME, MemoryPersistence};
pub use record::{DeploymentRecord, RecordKind};

#[cfg(test)]
pub(crate) use interface::tests::controller_artifact;

use alloy_core::primitives::Address;
use anyhow::Result;

/// Records and interfaces as seen by a run against one network.
///
/// Reads go straight to the persistence layer, so a record written earlier in the
/// run is visible to every later unit.
#[derive(Debug)]
pub struct ArtifactStore<P> {
    persistence: P,
    network: String,
    interfaces: InterfaceCatalog,
}

impl<P: ArtifactPersistence> ArtifactStore<P> {
    pub fn new(persistence: P, network: impl Into<String>) -> Self {
        Self {
            persistence,
            network: network.into(),
            interfaces: InterfaceCatalog::new(),
        }
    }

    pub fn with_interfaces(mut self, interfaces: InterfaceCatalog) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn interfaces(&self) -> &InterfaceCatalog {
        &self.interfaces
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn into_persistence(self) -> P {
        self.persistence
    }

    pub fn record(&self, unit_name: &str) -> Result<Option<DeploymentRecord>> {
        self.persistence.get(unit_name, &self.network)
    }

    /// Address recorded for a deploy unit on this network.
    ///
    /// Call records are ignored: their address is the call target, not something
    /// the unit produced.
    pub fn address_of(&self, unit_name: &str) -> Result<Option<Address>> {
        Ok(self
            .record(unit_name)?
            .filter(|r| r.kind == RecordKind::Deploy)
            .map(|r| r.address))
    }

    /// All records for this network.
    pub fn records(&self) -> Result<Vec<DeploymentRecord>> {
        Ok(self
            .persistence
            .list_all()?
            .into_iter()
            .filter(|r| r.network == self.network)
            .collect())
    }

    /// Persist a record, replacing any previous one for the same unit.
    pub fn commit(&mut self, record: DeploymentRecord) -> Result<()> {
        if record.network != self.network {
            anyhow::bail!(
                "Record for {} targets network {} but the store is scoped to {}",
                record.unit_name,
                record.network,
                self.network
            );
        }
        self.persistence.put(&record)?;
        tracing::debug!(
            unit = %record.unit_name,
            kind = %record.kind,
            address = %record.address,
            network = %self.network,
            "Record committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::TxHash;

    fn record(unit: &str, network: &str, kind: RecordKind) -> DeploymentRecord {
        DeploymentRecord::new(
            kind,
            unit,
            "Controller",
            network,
            Address::repeat_byte(0x42),
            TxHash::repeat_byte(0x01),
            Vec::new(),
        )
    }

    #[test]
    fn test_store_is_scoped_to_network() {
        let persistence = MemoryPersistence::seeded([record("Controller", "rinkeby", RecordKind::Deploy)]);
        let mut store = ArtifactStore::new(persistence, "localhost");

        assert!(store.record("Controller").unwrap().is_none());
        assert!(store.records().unwrap().is_empty());

        store
            .commit(record("Controller", "localhost", RecordKind::Deploy))
            .unwrap();
        assert_eq!(
            store.address_of("Controller").unwrap(),
            Some(Address::repeat_byte(0x42))
        );
        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(store.persistence().len(), 2);
    }

    #[test]
    fn test_commit_rejects_foreign_network() {
        let mut store = ArtifactStore::new(MemoryPersistence::new(), "localhost");
        assert!(
            store
                .commit(record("Controller", "mainnet", RecordKind::Deploy))
                .is_err()
        );
    }

    #[test]
    fn test_call_records_have_no_address() {
        let mut store = ArtifactStore::new(MemoryPersistence::new(), "localhost");
        store
            .commit(record("ControllerInit", "localhost", RecordKind::Call))
            .unwrap();

        assert!(store.record("ControllerInit").unwrap().is_some());
        assert!(store.address_of("ControllerInit").unwrap().is_none());
    }
}
