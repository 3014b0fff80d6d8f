//! Deployment units: named steps with dependencies and an action.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies a compiled contract interface.
///
/// The interface name is distinct from the name of the unit that deploys it, so the
/// same interface can be deployed several times under different roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractRef {
    pub contract_name: String,
}

impl ContractRef {
    pub fn new(contract_name: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
        }
    }
}

/// A constructor or call argument.
///
/// Symbolic variants are resolved by the engine right before submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    /// A list of arguments, for array and tuple parameters.
    ///
    /// Listed first so that sequences never deserialize as one of the struct variants.
    List(Vec<Arg>),
    /// The deployed address of another unit.
    Address { unit: String },
    /// The address of a named account (e.g. `deployer`).
    Account { account: String },
    /// A decimal ether amount, passed as wei.
    Ether { ether: String },
    /// A plain value passed through as is.
    Literal(Value),
}

impl Arg {
    pub fn unit(name: impl Into<String>) -> Self {
        Self::Address { unit: name.into() }
    }

    pub fn account(name: impl Into<String>) -> Self {
        Self::Account {
            account: name.into(),
        }
    }

    pub fn ether(amount: impl Into<String>) -> Self {
        Self::Ether {
            ether: amount.into(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Names of all units referenced by this argument, including nested ones.
    pub fn unit_references(&self) -> Vec<&str> {
        match self {
            Arg::Address { unit } => vec![unit.as_str()],
            Arg::List(items) => items.iter().flat_map(Arg::unit_references).collect(),
            Arg::Account { .. } | Arg::Ether { .. } | Arg::Literal(_) => Vec::new(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Address { unit } => write!(f, "@{}", unit),
            Arg::Account { account } => write!(f, "account:{}", account),
            Arg::Ether { ether } => write!(f, "{} ether", ether),
            Arg::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Arg::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// What a unit does when it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitAction {
    /// Deploy a contract instance.
    Deploy { contract: ContractRef, args: Vec<Arg> },
    /// Invoke a method on the contract deployed by another unit.
    Call {
        target: String,
        method: String,
        args: Vec<Arg>,
    },
}

impl UnitAction {
    pub fn args(&self) -> &[Arg] {
        match self {
            UnitAction::Deploy { args, .. } | UnitAction::Call { args, .. } => args,
        }
    }

    fn args_mut(&mut self) -> &mut Vec<Arg> {
        match self {
            UnitAction::Deploy { args, .. } | UnitAction::Call { args, .. } => args,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UnitAction::Deploy { .. } => "deploy",
            UnitAction::Call { .. } => "call",
        }
    }
}

/// A named deployment step.
///
/// Units are built with the generic [`Unit::deploy`] and [`Unit::call`] templates:
///
/// ```
/// use contrail_deploy::{Arg, Unit};
///
/// let storage = Unit::deploy("ASTOStorage")
///     .contract("StakingStorage")
///     .arg(Arg::unit("Controller"))
///     .tag("ASTOStorage");
///
/// let init = Unit::call("ControllerInit", "Controller", "init")
///     .arg(Arg::unit("ASTOStorage"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: String,
    pub tags: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub action: UnitAction,
}

impl Unit {
    /// A unit deploying the interface of the same name. Use [`Unit::contract`] to
    /// deploy a different interface.
    pub fn deploy(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            action: UnitAction::Deploy {
                contract: ContractRef::new(name.clone()),
                args: Vec::new(),
            },
            name,
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    /// A unit calling `method` on the contract deployed by `target`.
    pub fn call(
        name: impl Into<String>,
        target: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            action: UnitAction::Call {
                target: target.into(),
                method: method.into(),
                args: Vec::new(),
            },
        }
    }

    /// Set the deployed interface. Has no effect on call units.
    pub fn contract(mut self, contract_name: impl Into<String>) -> Self {
        if let UnitAction::Deploy { contract, .. } = &mut self.action {
            *contract = ContractRef::new(contract_name);
        }
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.action.args_mut().push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.action.args_mut().extend(args);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    pub fn is_deploy(&self) -> bool {
        matches!(self.action, UnitAction::Deploy { .. })
    }

    /// Units whose addresses this unit's action reads: the call target and every
    /// unit referenced in the arguments.
    pub fn references(&self) -> BTreeSet<&str> {
        let mut refs: BTreeSet<&str> = self
            .action
            .args()
            .iter()
            .flat_map(Arg::unit_references)
            .collect();
        if let UnitAction::Call { target, .. } = &self.action {
            refs.insert(target.as_str());
        }
        refs
    }

    /// Everything that must complete before this unit runs: declared dependencies
    /// plus referenced units.
    pub fn requirements(&self) -> BTreeSet<&str> {
        let mut reqs = self.references();
        reqs.extend(self.dependencies.iter().map(String::as_str));
        reqs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deploy_defaults_contract_to_name() {
        let unit = Unit::deploy("Controller").arg(Arg::account("deployer"));
        match &unit.action {
            UnitAction::Deploy { contract, args } => {
                assert_eq!(contract.contract_name, "Controller");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_contract_override_is_ignored_for_calls() {
        let unit = Unit::call("Init", "Controller", "init").contract("Other");
        assert!(matches!(unit.action, UnitAction::Call { .. }));
    }

    #[test]
    fn test_requirements_include_nested_references_and_target() {
        let unit = Unit::call("AddPeriod", "Converter", "addPeriod")
            .arg(Arg::List(vec![Arg::literal(1), Arg::unit("LPStorage")]))
            .depends_on("Controller");

        let reqs: Vec<&str> = unit.requirements().into_iter().collect();
        assert_eq!(reqs, vec!["Controller", "Converter", "LPStorage"]);
    }

    #[test]
    fn test_args_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            args: Vec<Arg>,
        }

        let holder: Holder = toml::from_str(
            r#"args = [{ unit = "Controller" }, { account = "agent" }, { ether = "1.36" }, [1654560000, "x"], "0x001"]"#,
        )
        .unwrap();

        assert_eq!(
            holder.args,
            vec![
                Arg::unit("Controller"),
                Arg::account("agent"),
                Arg::ether("1.36"),
                Arg::List(vec![Arg::literal(1654560000), Arg::literal("x")]),
                Arg::literal(json!("0x001")),
            ]
        );
    }

    #[test]
    fn test_arg_display() {
        let arg = Arg::List(vec![Arg::unit("Token"), Arg::ether("1"), Arg::literal(5)]);
        assert_eq!(arg.to_string(), "[@Token, 1 ether, 5]");
    }
}
