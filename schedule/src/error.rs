use snafu::Snafu;

pub type Result<T, E = RuleError> = std::result::Result<T, E>;

/// Configuration errors raised while building rules and rule sets.
///
/// Applying a rule never produces one of these: a rule that cannot handle a block returns no
/// candidates instead.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum RuleError {
    #[snafu(display("invalid tiling structure {structure:?}: {reason}"))]
    InvalidStructure { structure: String, reason: &'static str },

    #[snafu(display("unknown token {token:?} in tiling structure {structure:?}"))]
    UnknownToken { structure: String, token: String },

    #[snafu(display("{direction} reuse requires at least one level"))]
    EmptyReuseLevels { direction: &'static str },

    #[snafu(display("{direction} reuse level {level} is outside the {levels}-level tiling structure"))]
    ReuseLevelOutOfRange { direction: &'static str, level: usize, levels: usize },

    #[snafu(display("read reuse must be either `no` or `must`"))]
    OptionalReadReuse,

    #[snafu(display("malformed reuse configuration: {message}"))]
    MalformedReuseConfig { message: String },

    #[snafu(display("max_innermost_factor must be positive or -1, got {value}"))]
    InvalidInnermostFactor { value: i64 },

    #[snafu(display("invalid thread extents {extents:?}: {reason}"))]
    InvalidThreadExtents { extents: Vec<i64>, reason: &'static str },

    #[snafu(display("intrinsic group is missing the {role} role"))]
    MissingIntrinRole { role: &'static str },

    #[snafu(display("intrinsic {name} used as {role} is not registered"))]
    UnknownIntrin { role: &'static str, name: String },

    #[snafu(display("intrinsic {name} cannot serve as the {role} of a group"))]
    IntrinRoleMismatch { role: &'static str, name: String },

    #[snafu(display("intrinsic group shapes disagree: {reason}"))]
    IncompatibleIntrinGroup { reason: String },

    #[snafu(display("malformed intrinsic group: {message}"))]
    MalformedIntrinGroup { message: String },

    #[snafu(display("at least one intrinsic group is required"))]
    NoIntrinGroups,

    #[snafu(display("unknown {target} rule set variant {kind:?}"))]
    UnknownVariant { target: &'static str, kind: String },

    #[snafu(display("custom rule is missing its {function} function"))]
    IncompleteCustomRule { function: &'static str },

    #[snafu(display("custom rule {name} is already registered"))]
    DuplicateCustomRule { name: String },
}
