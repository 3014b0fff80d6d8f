//! Compiled contract interfaces, loaded from Hardhat-style artifact files.

use std::collections::BTreeMap;
use std::path::Path;

use alloy_core::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy_core::json_abi::{JsonAbi, Param};
use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// On-disk layout of a compiled artifact. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: String,
    abi: JsonAbi,
    #[serde(default)]
    bytecode: Bytes,
}

/// A compiled contract: its ABI and creation bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInterface {
    pub contract_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractInterface {
    pub fn new(contract_name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self {
            contract_name: contract_name.into(),
            abi,
            bytecode,
        }
    }

    /// Parse a Hardhat artifact JSON document.
    pub fn from_artifact_json(content: &str) -> Result<Self> {
        let artifact: ArtifactFile =
            serde_json::from_str(content).context("Failed to parse contract artifact")?;
        Ok(Self::new(artifact.contract_name, artifact.abi, artifact.bytecode))
    }

    /// Number of constructor parameters (zero when the ABI declares no constructor).
    pub fn constructor_arity(&self) -> usize {
        self.abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.len())
            .unwrap_or(0)
    }

    /// Arities of all overloads of `method`, empty if the method does not exist.
    pub fn method_arities(&self, method: &str) -> Vec<usize> {
        self.abi
            .function(method)
            .map(|overloads| overloads.iter().map(|f| f.inputs.len()).collect())
            .unwrap_or_default()
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn encode_deploy(&self, args: &[Value]) -> Result<Bytes> {
        if self.bytecode.is_empty() {
            anyhow::bail!(
                "Contract {} has no creation bytecode (abstract contract or interface?)",
                self.contract_name
            );
        }

        let mut data = self.bytecode.to_vec();
        match &self.abi.constructor {
            Some(constructor) => {
                let values = coerce_params(&constructor.inputs, args)
                    .context(format!("Invalid constructor arguments for {}", self.contract_name))?;
                let encoded = constructor
                    .abi_encode_input(&values)
                    .context(format!("Failed to encode constructor of {}", self.contract_name))?;
                data.extend_from_slice(&encoded);
            }
            None if !args.is_empty() => {
                anyhow::bail!(
                    "Contract {} has no constructor but {} arguments were given",
                    self.contract_name,
                    args.len()
                );
            }
            None => {}
        }

        Ok(Bytes::from(data))
    }

    /// Calldata (selector and ABI-encoded arguments) for `method`.
    ///
    /// Overloads are disambiguated by argument count.
    pub fn encode_call(&self, method: &str, args: &[Value]) -> Result<Bytes> {
        let function = self
            .abi
            .function(method)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == args.len()))
            .with_context(|| {
                format!(
                    "Contract {} has no method {} taking {} arguments",
                    self.contract_name,
                    method,
                    args.len()
                )
            })?;

        let values = coerce_params(&function.inputs, args)
            .context(format!("Invalid arguments for {}.{}", self.contract_name, method))?;
        let encoded = function
            .abi_encode_input(&values)
            .context(format!("Failed to encode {}.{}", self.contract_name, method))?;
        Ok(Bytes::from(encoded))
    }
}

/// Convert resolved JSON arguments into typed ABI values.
fn coerce_params(params: &[Param], args: &[Value]) -> Result<Vec<DynSolValue>> {
    if params.len() != args.len() {
        anyhow::bail!("expected {} arguments, got {}", params.len(), args.len());
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty: DynSolType = param
                .resolve()
                .context(format!("Unsupported parameter type {}", param.ty))?;
            coerce_value(&ty, arg).context(format!("Invalid value {} for {} {}", arg, param.ty, param.name))
        })
        .collect()
}

fn coerce_value(ty: &DynSolType, value: &Value) -> Result<DynSolValue> {
    match (ty, value) {
        (DynSolType::Array(inner), Value::Array(items)) => Ok(DynSolValue::Array(
            items
                .iter()
                .map(|item| coerce_value(inner, item))
                .collect::<Result<_>>()?,
        )),
        (DynSolType::FixedArray(inner, len), Value::Array(items)) => {
            if items.len() != *len {
                anyhow::bail!("expected {} elements, got {}", len, items.len());
            }
            Ok(DynSolValue::FixedArray(
                items
                    .iter()
                    .map(|item| coerce_value(inner, item))
                    .collect::<Result<_>>()?,
            ))
        }
        (DynSolType::Tuple(types), Value::Array(items)) => {
            if items.len() != types.len() {
                anyhow::bail!("expected a tuple of {} elements, got {}", types.len(), items.len());
            }
            Ok(DynSolValue::Tuple(
                types
                    .iter()
                    .zip(items)
                    .map(|(ty, item)| coerce_value(ty, item))
                    .collect::<Result<_>>()?,
            ))
        }
        (_, Value::String(s)) => Ok(ty.coerce_str(s)?),
        (_, Value::Number(n)) => Ok(ty.coerce_str(&n.to_string())?),
        (_, Value::Bool(b)) => Ok(ty.coerce_str(&b.to_string())?),
        _ => anyhow::bail!("cannot convert {} to {}", value, ty),
    }
}

/// Contract interfaces keyed by contract name.
#[derive(Debug, Clone, Default)]
pub struct InterfaceCatalog {
    interfaces: BTreeMap<String, ContractInterface>,
}

impl InterfaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, interface: ContractInterface) {
        self.interfaces
            .insert(interface.contract_name.clone(), interface);
    }

    pub fn get(&self, contract_name: &str) -> Option<&ContractInterface> {
        self.interfaces.get(contract_name)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Recursively load every artifact under `dir`.
    ///
    /// Debug files (`*.dbg.json`) and JSON files that are not artifacts (build
    /// info, caches) are skipped. A missing directory yields an empty catalog.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "Artifacts directory not found, no interfaces loaded");
            return Ok(catalog);
        }

        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)
                .context(format!("Failed to read artifacts directory {}", current.display()))?
            {
                let path = entry.context("Failed to read directory entry")?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }

                let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
                    continue;
                }

                let content = std::fs::read_to_string(&path)
                    .context(format!("Failed to read artifact {}", path.display()))?;
                match ContractInterface::from_artifact_json(&content) {
                    Ok(interface) => {
                        tracing::trace!(contract = %interface.contract_name, path = %path.display(), "Loaded artifact");
                        catalog.insert(interface);
                    }
                    Err(e) => {
                        tracing::trace!(err = %e, path = %path.display(), "Skipping non-artifact JSON file");
                    }
                }
            }
        }

        tracing::debug!(count = catalog.len(), dir = %dir.display(), "Loaded contract interfaces");
        Ok(catalog)
    }
}
