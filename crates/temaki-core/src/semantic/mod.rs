//! Semantic layer: the tank, alias table, and RuleSet expansion

pub mod alias;
pub mod ruleset;
pub mod tank;

pub use alias::{AliasError, AliasTable};
pub use ruleset::{ExpandedRule, RuleTarget, expand_rules};
pub use tank::FshTank;
