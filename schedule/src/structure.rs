//! Configuration vocabulary of the tiling rules: structures, reuse and intrinsic groups.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use vesta_ir::{IntrinDesc, IterKind, Operand, get_intrin};

use crate::error::*;

// ============================================================================
// TILING STRUCTURE
// ============================================================================

/// Ordered tile levels, each spatial or reduction.
///
/// Parsed from the compact form (`"SSRSRS"`) or the long form (`"space,space,reduce,..."`) and
/// always printed in compact form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TilingStructure {
    levels: SmallVec<[IterKind; 8]>,
}

impl TilingStructure {
    pub fn levels(&self) -> &[IterKind] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level indices of the given kind, outer to inner.
    pub fn positions(&self, kind: IterKind) -> Vec<usize> {
        self.levels.iter().enumerate().filter(|(_, k)| **k == kind).map(|(i, _)| i).collect()
    }

    pub fn count(&self, kind: IterKind) -> usize {
        self.levels.iter().filter(|k| **k == kind).count()
    }
}

impl FromStr for TilingStructure {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        let structure = s.trim();
        let tokens: Vec<String> = if structure.contains(',') {
            structure.split(',').map(|t| t.trim().to_string()).collect()
        } else {
            structure.chars().map(String::from).collect()
        };
        let mut levels = SmallVec::new();
        for token in tokens {
            let kind = token
                .parse::<IterKind>()
                .ok()
                .context(UnknownTokenSnafu { structure, token: token.clone() })?;
            levels.push(kind);
        }
        ensure!(!levels.is_empty(), InvalidStructureSnafu { structure, reason: "no tile levels" });
        ensure!(
            levels.contains(&IterKind::Spatial),
            InvalidStructureSnafu { structure, reason: "at least one spatial level is required" }
        );
        Ok(Self { levels })
    }
}

impl TryFrom<String> for TilingStructure {
    type Error = RuleError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TilingStructure> for String {
    fn from(structure: TilingStructure) -> Self {
        structure.to_string()
    }
}

impl fmt::Display for TilingStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.levels.iter().try_for_each(|k| write!(f, "{k}"))
    }
}

// ============================================================================
// REUSE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReuseType {
    #[default]
    No,
    /// Emit candidates both with and without the cache stage.
    May,
    Must,
}

/// Where and whether to stage a block's reads or writes through a cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReuseConfig {
    pub req: ReuseType,
    /// 1-based tile levels at whose last loop the cache stage is placed.
    #[serde(default)]
    pub levels: Vec<usize>,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "global".to_string()
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl ReuseConfig {
    pub fn none() -> Self {
        Self { req: ReuseType::No, levels: Vec::new(), scope: default_scope() }
    }

    pub fn may(levels: &[usize], scope: &str) -> Self {
        Self { req: ReuseType::May, levels: levels.to_vec(), scope: scope.to_string() }
    }

    pub fn must(levels: &[usize], scope: &str) -> Self {
        Self { req: ReuseType::Must, levels: levels.to_vec(), scope: scope.to_string() }
    }

    pub fn is_enabled(&self) -> bool {
        self.req != ReuseType::No
    }

    /// Check the levels against a structure with `n_levels` levels.
    pub fn validate(&self, direction: &'static str, n_levels: usize) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        ensure!(!self.levels.is_empty(), EmptyReuseLevelsSnafu { direction });
        for &level in &self.levels {
            ensure!(
                (1..=n_levels).contains(&level),
                ReuseLevelOutOfRangeSnafu { direction, level, levels: n_levels }
            );
        }
        Ok(())
    }
}

/// Parses the JSON map form, e.g. `{"req": "must", "levels": [4], "scope": "shared"}`.
impl FromStr for ReuseConfig {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| RuleError::MalformedReuseConfig { message: e.to_string() })
    }
}

impl fmt::Display for ReuseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.req {
            ReuseType::No => f.write_str("no"),
            req => write!(f, "{req}{:?}@{}", self.levels, self.scope),
        }
    }
}

// ============================================================================
// INTRINSIC GROUPS
// ============================================================================

/// The five intrinsics that together tensorize one block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntrinGroup {
    pub init: String,
    pub load_a: String,
    pub load_b: String,
    pub compute: String,
    pub store: String,
}

impl IntrinGroup {
    /// Build a group from a role map; every role must be present.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let role = |role: &'static str| map.get(role).cloned().context(MissingIntrinRoleSnafu { role });
        let group = Self {
            init: role("init")?,
            load_a: role("load_a")?,
            load_b: role("load_b")?,
            compute: role("compute")?,
            store: role("store")?,
        };
        group.validate()?;
        Ok(group)
    }

    /// Check that every role names a registered intrinsic of the right kind and that the shapes
    /// agree with the compute intrinsic.
    pub fn validate(&self) -> Result<()> {
        let IntrinDesc::Compute(compute) = role_desc("compute", &self.compute)? else {
            return IntrinRoleMismatchSnafu { role: "compute", name: &self.compute }.fail();
        };
        match role_desc("init", &self.init)? {
            IntrinDesc::Init { m, n, dtype } => ensure!(
                (m, n) == (compute.m, compute.n) && dtype == compute.c,
                IncompatibleIntrinGroupSnafu { reason: format!("{} does not fill the accumulator tile", self.init) }
            ),
            _ => return IntrinRoleMismatchSnafu { role: "init", name: &self.init }.fail(),
        }
        match role_desc("store", &self.store)? {
            IntrinDesc::Store { m, n, dtype, .. } => ensure!(
                (m, n) == (compute.m, compute.n) && dtype == compute.c,
                IncompatibleIntrinGroupSnafu { reason: format!("{} does not store the accumulator tile", self.store) }
            ),
            _ => return IntrinRoleMismatchSnafu { role: "store", name: &self.store }.fail(),
        }
        for (role, name, expected) in [("load_a", &self.load_a, Operand::A), ("load_b", &self.load_b, Operand::B)] {
            let IntrinDesc::Load { operand, rows, cols, dtype, transposed, .. } = role_desc(role, name)? else {
                return IntrinRoleMismatchSnafu { role, name }.fail();
            };
            ensure!(operand == expected, IntrinRoleMismatchSnafu { role, name });
            let (shape, input) = match operand {
                Operand::A => ((compute.m, compute.k), compute.a),
                Operand::B if compute.b_transposed => ((compute.n, compute.k), compute.b),
                Operand::B => ((compute.k, compute.n), compute.b),
            };
            ensure!(
                (rows, cols) == shape && dtype == input && (operand == Operand::A || transposed == compute.b_transposed),
                IncompatibleIntrinGroupSnafu {
                    reason: format!("{name} does not load the {operand} operand of {}", self.compute)
                }
            );
        }
        Ok(())
    }

    /// Group parsed from JSON, e.g. `{"init": "...", "load_a": "...", ...}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let map: BTreeMap<String, String> =
            serde_json::from_str(json).map_err(|e| RuleError::MalformedIntrinGroup { message: e.to_string() })?;
        Self::from_map(&map)
    }
}

impl fmt::Display for IntrinGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.compute)
    }
}

fn role_desc(role: &'static str, name: &str) -> Result<IntrinDesc> {
    get_intrin(name).map(|i| i.desc.clone()).ok().context(UnknownIntrinSnafu { role, name })
}
