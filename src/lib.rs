//! DnsRule - a high-performance DNS filtering rule engine.
//!
//! This crate compiles blocklist/allowlist rule files into compact in-memory
//! indices and, for each DNS query, produces the ordered list of matching
//! rules together with the effective subset the caller must act on.
//!
//! # Features
//!
//! - **Three-tier matching**: domain hash tables, a 5-byte shortcut index,
//!   and a regex tail, so the common case is a handful of hash lookups
//! - **Disk-offset rule storage**: indices hold file offsets, not rule text;
//!   matched rules are re-read lazily, cutting memory use 5-10x on big lists
//! - **Memory-bounded loading**: a byte budget shared by all lists; loading
//!   degrades to a partial index instead of failing
//! - **Rule modifiers**: `$important`, `$badfilter`, `$dnstype`,
//!   `$dnsrewrite`, host-file rules, exceptions
//! - **Thread-safe**: matching is read-only and concurrent; updates take a
//!   per-filter write lock
//! - **Freshness tracking**: on-disk lists are mtime-checked during matches
//!   and rebuilt in place by [`Engine::update`]
//!
//! # Quick Start
//!
//! ```ignore
//! use dnsrule::{Engine, EngineParams, FilterParams, RecordType};
//!
//! let (engine, warning) = Engine::load(EngineParams {
//!     filters: vec![FilterParams {
//!         id: 1,
//!         data: "||ads.example.org^\n@@||good.example.org^\n".to_string(),
//!         in_memory: true,
//!     }],
//!     mem_limit: 0,
//! })?;
//!
//! let result = engine.match_request("ads.example.org", RecordType::A);
//! let effective = engine.select_effective_rules(&result.rules);
//! assert_eq!(effective[0].text, "||ads.example.org^");
//! ```
//!
//! # Rule Syntax
//!
//! The documented adblock subset for DNS plus classic hosts syntax:
//!
//! - `domain.tld` - the domain and its subdomains
//! - `||domain.tld^` - same, adblock style
//! - `|exact.host|` - exact name
//! - `/regex/` - regular expression
//! - `@@rule` - exception
//! - `rule$modifier,modifier` - with `important`, `badfilter`,
//!   `dnstype=...`, `dnsrewrite=...`
//! - `1.2.3.4 name [name...]` - hosts-file substitution
//!
//! # Precedence
//!
//! After `$badfilter` cancellation, host-file rules win, then `$important`
//! blocks, then exceptions, then `$dnsrewrite`, then `$dnstype`, then the
//! remaining rules; ties keep filter order, then file order.

mod engine;
mod error;
mod filter;
mod hash;
mod rrtype;

pub mod rule;

// Re-export core types
pub use engine::{Engine, EngineParams, MatchResult};
pub use error::{Error, LoadResult, Result, RuleError};
pub use filter::{FilterParams, MatchContext};
pub use hash::hash32;
pub use rrtype::{RCode, RecordType};

// Re-export the rule model for callers that inspect matched rules
pub use rule::{
    parse_rule, DnsRewrite, DnsTypeInfo, DnsTypeMode, MatchMethod, MatchedRule, ParsedRule,
    RewriteValue, RuleContent, RuleProps,
};
