//! Error types for dnsrule.

use thiserror::Error;

/// Error type for engine-level operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A filter's rule list could not be read
    #[error("failed to read filter {id}: {source}")]
    FilterRead {
        id: i32,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error (duplicate filter ids, invalid parameters)
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for dnsrule operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for single-rule parsing.
///
/// These never abort a rule list load: the loader logs the reason at debug
/// level and drops the line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Pattern failed domain/IP validity checks
    #[error("invalid rule pattern: {0}")]
    InvalidPattern(String),

    /// Pattern matches too broadly to be useful
    #[error("too wide rule: {0}")]
    TooWide(String),

    /// Modifier name is not recognized
    #[error("unknown modifier: {0}")]
    UnknownModifier(String),

    /// The same modifier appears twice
    #[error("duplicated modifier: {0}")]
    DuplicatedModifier(String),

    /// A parameterless modifier was given parameters
    #[error("modifier can't have parameters: {0}")]
    UnexpectedParameters(String),

    /// A parameterized modifier has an empty `=` section
    #[error("modifier has empty parameters section: {0}")]
    EmptyParameters(String),

    /// `$dnstype` names a record type that cannot be resolved
    #[error("unknown DNS record type: {0}")]
    UnknownRecordType(String),

    /// `$dnstype` mixes include and exclude entries
    #[error("DNS types can't be both enabled and excluded: {0}")]
    MixedDnsTypes(String),

    /// `$dnstype` repeats a record type
    #[error("duplicated DNS type: {0}")]
    DuplicatedDnsType(String),

    /// `$dnstype` on a blocking rule has no types
    #[error("blocking dnstype rule must have some types specified")]
    EmptyDnsTypes,

    /// `$dnsrewrite` parameter does not parse
    #[error("invalid dnsrewrite: {0}")]
    InvalidRewrite(String),

    /// Host-file rule has a malformed name field
    #[error("invalid host-file rule: {0}")]
    InvalidHostRule(String),

    /// The generated or embedded regex does not compile
    #[error("invalid regex: {0}")]
    InvalidRegex(String),
}

/// Outcome of loading one rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    /// All rules were loaded
    Ok,
    /// The list could not be read at all
    Error,
    /// Loading stopped early because the memory budget was exhausted;
    /// the partial index stays usable
    MemLimitReached,
}
