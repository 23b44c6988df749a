//! Rule types and the rule parser.

mod parser;
mod rewrite;

pub use parser::{parse_rule, rule_regex_text, text_without_badfilter};
pub(crate) use parser::compile_rule_regex;
pub use rewrite::{DnsRewrite, RewriteValue};

use bitflags::bitflags;

use crate::rrtype::RecordType;

bitflags! {
    /// Properties of an adblock-style rule, set by its markers and modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RuleProps: u8 {
        /// `@@` exception rule (allowlist)
        const EXCEPTION = 0b00000001;
        /// `$important` modifier
        const IMPORTANT = 0b00000010;
        /// `$badfilter` modifier
        const BADFILTER = 0b00000100;
        /// `$dnstype` modifier
        const DNSTYPE = 0b00001000;
        /// `$dnsrewrite` modifier
        const DNSREWRITE = 0b00010000;
    }
}

/// How a rule's pattern is matched against a queried name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    /// The name must equal one of the matching parts
    Exact,
    /// The name or one of its parent domains must equal a matching part
    Subdomains,
    /// The matching parts must appear in the name, in order, without overlap
    Shortcuts,
    /// Shortcut prefilter, then the rule's regex
    ShortcutsAndRegex,
    /// Regex only; the pattern is derived from the rule text
    Regex,
}

/// Whether a `$dnstype` list enables or excludes the listed types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsTypeMode {
    /// The rule applies only to the listed query types
    Enable,
    /// The rule applies to every query type except the listed ones
    Exclude,
}

/// Parsed `$dnstype` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsTypeInfo {
    pub types: Vec<RecordType>,
    pub mode: DnsTypeMode,
}

impl DnsTypeInfo {
    /// Check whether a query of the given type passes this modifier.
    pub fn allows(&self, rr_type: RecordType) -> bool {
        let listed = self.types.contains(&rr_type);
        match self.mode {
            DnsTypeMode::Enable => listed,
            DnsTypeMode::Exclude => !listed,
        }
    }
}

/// Content specific to the two rule kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleContent {
    /// Adblock-style rule
    Adblock {
        props: RuleProps,
        dnstype: Option<DnsTypeInfo>,
        rewrite: Option<DnsRewrite>,
    },
    /// Classic `/etc/hosts` rule; `ip` is the substituted address literal
    Hosts { ip: String },
}

impl RuleContent {
    /// Properties of the rule; host-file rules carry none.
    pub fn props(&self) -> RuleProps {
        match self {
            RuleContent::Adblock { props, .. } => *props,
            RuleContent::Hosts { .. } => RuleProps::empty(),
        }
    }

    /// True for host-file rules.
    pub fn is_hosts(&self) -> bool {
        matches!(self, RuleContent::Hosts { .. })
    }

    /// The rewrite directive, if the rule carries one.
    pub fn rewrite(&self) -> Option<&DnsRewrite> {
        match self {
            RuleContent::Adblock { rewrite, .. } => rewrite.as_ref(),
            RuleContent::Hosts { .. } => None,
        }
    }

    /// The dnstype constraint, if the rule carries one.
    pub fn dnstype(&self) -> Option<&DnsTypeInfo> {
        match self {
            RuleContent::Adblock { dnstype, .. } => dnstype.as_ref(),
            RuleContent::Hosts { .. } => None,
        }
    }
}

/// A rule parsed from one line of a rule list.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRule {
    /// Original source line (host-file rules: with the trailing comment
    /// stripped)
    pub text: String,
    /// Kind-specific content
    pub content: RuleContent,
    /// How the pattern is matched
    pub match_method: MatchMethod,
    /// Lowercased matching parts; semantics depend on `match_method`
    pub matching_parts: Vec<String>,
}

impl ParsedRule {
    /// Properties shortcut.
    pub fn props(&self) -> RuleProps {
        self.content.props()
    }
}

/// A rule that matched a query, tagged with its filter of origin.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule {
    /// Id of the filter list the rule came from
    pub filter_id: i32,
    /// Rule text
    pub text: String,
    /// Kind-specific content
    pub content: RuleContent,
}

impl MatchedRule {
    /// Properties shortcut.
    pub fn props(&self) -> RuleProps {
        self.content.props()
    }
}
