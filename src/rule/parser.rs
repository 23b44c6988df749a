//! Rule line parsing.
//!
//! Turns one line of a rule list into a [`ParsedRule`] with a classified
//! match method and extracted matching parts. Comments and blank lines parse
//! to `Ok(None)`; malformed rules return an error that the loader logs and
//! drops.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::net::IpAddr;

use crate::error::RuleError;
use crate::rrtype::RecordType;
use crate::rule::rewrite::DnsRewrite;
use crate::rule::{
    DnsTypeInfo, DnsTypeMode, MatchMethod, ParsedRule, RuleContent, RuleProps,
};

const MODIFIERS_MARKER: char = '$';
const MODIFIERS_DELIMITER: char = ',';
const EXCEPTION_MARKER: &str = "@@";
const SKIPPABLE_PREFIXES: [&str; 8] = [
    "https://", "http://", "http*://", "ws://", "wss://", "ws*://", "://", "//",
];
const SPECIAL_SUFFIXES: [&str; 3] = ["|", "^", "/"];
const SPECIAL_REGEX_CHARACTERS: &str = "\\^$*+?.()|[]{}";

// RFC 1035 $2.3.4 size limits
const MAX_DOMAIN_LENGTH: usize = 255;
// RFC 1034 $3.5 preferred name syntax
const MAX_LABEL_LENGTH: usize = 63;
// INET6_ADDRSTRLEN - 1
const MAX_IPADDR_LENGTH: usize = 45;

/// Bracketed groups and escape classes carry no literal text usable as a
/// shortcut; they are replaced with a placeholder before extraction.
static STRIP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"([^\\]*)\([^\\]*\)",
        r"([^\\]*)\{[^\\]*\}",
        r"([^\\]*)\[[^\\]*\]",
        r"([^\\]*)\\[a-zA-Z]",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Check whether a line is a comment.
pub(crate) fn is_comment(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('#')
}

fn check_domain_pattern_labels(domain: &str) -> bool {
    domain.split('.').all(|label| label.len() <= MAX_LABEL_LENGTH)
}

fn check_domain_pattern_charset(domain: &str) -> bool {
    // RFC 1034 $3.5 charset, plus '*' for light-weight wildcards and '_'
    // as it shows up in real-world lists
    domain
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'-' | b'*' | b'_'))
}

fn is_valid_domain_pattern(domain: &str) -> bool {
    domain.len() <= MAX_DOMAIN_LENGTH
        && check_domain_pattern_charset(domain)
        && check_domain_pattern_labels(domain)
}

fn is_valid_ip_pattern(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_IPADDR_LENGTH
        && s.bytes()
            .all(|c| c.is_ascii_hexdigit() || matches!(c, b'.' | b':' | b'[' | b']' | b'*'))
}

/// Check whether a string is a plain domain name usable as a bare-domain
/// rule. A name with a leading or trailing dot is a pattern, not a name, and
/// '*' is reserved for wildcard patterns.
pub(crate) fn is_domain_name(s: &str) -> bool {
    !s.is_empty()
        && s.parse::<IpAddr>().is_err()
        && !s.ends_with('.')
        && !s.starts_with('.')
        && is_valid_domain_pattern(s)
        && !s.contains('*')
}

/// Anchor and wildcard facts extracted from an adblock pattern.
struct MatchInfo<'a> {
    /// Pattern with anchors, prefixes, suffixes, and port stripped
    text: &'a str,
    /// The rule was written as `/.../`
    is_regex_rule: bool,
    /// `*` occurs in the stripped pattern
    has_wildcard: bool,
    line_start: bool,
    domain_start: bool,
    line_end: bool,
}

fn check_regex(s: &str) -> bool {
    s.len() > 1 && s.starts_with('/') && s.ends_with('/')
}

fn remove_special_prefixes(info: &mut MatchInfo<'_>) {
    if let Some(rest) = info.text.strip_prefix("||") {
        info.text = rest;
        info.domain_start = true;
    } else if let Some(rest) = info.text.strip_prefix('|') {
        info.text = rest;
        info.line_start = true;
    }
}

fn remove_skippable_prefixes(info: &mut MatchInfo<'_>) {
    for prefix in SKIPPABLE_PREFIXES {
        if let Some(rest) = info.text.strip_prefix(prefix) {
            info.text = rest;
            info.domain_start = true;
            return;
        }
    }
}

fn remove_special_suffixes(info: &mut MatchInfo<'_>) {
    // each special suffix is stripped at most once
    let mut candidates: Vec<&str> = SPECIAL_SUFFIXES.to_vec();
    loop {
        let found = candidates
            .iter()
            .position(|suffix| info.text.ends_with(suffix));
        match found {
            Some(i) => {
                let suffix = candidates.remove(i);
                info.text = &info.text[..info.text.len() - suffix.len()];
                info.line_end = true;
            }
            None => break,
        }
    }
}

fn is_valid_port(p: &str) -> bool {
    p.len() <= 5 && p.bytes().all(|c| c.is_ascii_digit())
}

fn remove_port(info: &mut MatchInfo<'_>) {
    let text = info.text;
    let rpos = match text.rfind(':') {
        Some(pos) => pos,
        None => return,
    };
    let fpos = match text.find(':') {
        Some(pos) => pos,
        None => return,
    };

    if fpos == rpos && fpos != text.len() - 1 && is_valid_port(&text[fpos + 1..]) {
        info.text = &text[..fpos];
        info.line_end = true;
    } else if text.starts_with('[')
        && rpos >= 2
        && text.as_bytes()[rpos - 1] == b']'
        && rpos != text.len() - 1
        && is_valid_port(&text[rpos + 1..])
    {
        // bracketed IPv6 with port: [2001:db8::1]:53
        info.text = &text[1..rpos - 1];
        info.line_start = true;
        info.line_end = true;
    }
}

fn extract_match_info(pattern: &str) -> MatchInfo<'_> {
    let mut info = MatchInfo {
        text: pattern,
        is_regex_rule: check_regex(pattern),
        has_wildcard: false,
        line_start: false,
        domain_start: false,
        line_end: false,
    };

    if info.is_regex_rule {
        info.text = &pattern[1..pattern.len() - 1];
        return info;
    }

    // special prefixes come before skippable ones (`||http://example.org`)
    remove_special_prefixes(&mut info);
    remove_skippable_prefixes(&mut info);
    if info.domain_start && info.line_start {
        info.domain_start = false;
    }

    remove_special_suffixes(&mut info);
    remove_port(&mut info);

    info.has_wildcard = info.text.contains('*');
    info
}

struct ModifierDescriptor {
    name: &'static str,
    prop: RuleProps,
    has_params: bool,
}

const SUPPORTED_MODIFIERS: [ModifierDescriptor; 4] = [
    ModifierDescriptor {
        name: "important",
        prop: RuleProps::IMPORTANT,
        has_params: false,
    },
    ModifierDescriptor {
        name: "badfilter",
        prop: RuleProps::BADFILTER,
        has_params: false,
    },
    ModifierDescriptor {
        name: "dnstype",
        prop: RuleProps::DNSTYPE,
        has_params: true,
    },
    ModifierDescriptor {
        name: "dnsrewrite",
        prop: RuleProps::DNSREWRITE,
        has_params: true,
    },
];

fn parse_dnstype_params(params: &str, is_exception: bool) -> Result<DnsTypeInfo, RuleError> {
    if params.is_empty() {
        if !is_exception {
            return Err(RuleError::EmptyDnsTypes);
        }
        // exclude-nothing: the exception applies to every query type
        return Ok(DnsTypeInfo {
            types: Vec::new(),
            mode: DnsTypeMode::Exclude,
        });
    }

    let mut enabled: Vec<RecordType> = Vec::new();
    let mut excluded: Vec<RecordType> = Vec::new();

    for raw in params.split('|') {
        let (is_enable, name) = match raw.strip_prefix('~') {
            Some(rest) => (false, rest),
            None => (true, raw),
        };

        let rtype = RecordType::parse(name)
            .ok_or_else(|| RuleError::UnknownRecordType(name.to_string()))?;

        let (list, other) = if is_enable {
            (&mut enabled, &mut excluded)
        } else {
            (&mut excluded, &mut enabled)
        };
        if other.contains(&rtype) {
            return Err(RuleError::MixedDnsTypes(name.to_string()));
        }
        if list.contains(&rtype) {
            return Err(RuleError::DuplicatedDnsType(name.to_string()));
        }
        list.push(rtype);
    }

    if !enabled.is_empty() && !excluded.is_empty() {
        return Err(RuleError::MixedDnsTypes(params.to_string()));
    }

    if !enabled.is_empty() {
        Ok(DnsTypeInfo {
            types: enabled,
            mode: DnsTypeMode::Enable,
        })
    } else {
        Ok(DnsTypeInfo {
            types: excluded,
            mode: DnsTypeMode::Exclude,
        })
    }
}

fn extract_modifiers(
    props: &mut RuleProps,
    modifiers_str: &str,
    is_exception: bool,
) -> Result<(Option<DnsTypeInfo>, Option<DnsRewrite>), RuleError> {
    let mut dnstype = None;
    let mut rewrite = None;

    if modifiers_str.is_empty() {
        return Ok((None, None));
    }

    for modifier in modifiers_str.split(MODIFIERS_DELIMITER) {
        let mut found: Option<&ModifierDescriptor> = None;

        for descr in &SUPPORTED_MODIFIERS {
            if !modifier.starts_with(descr.name) {
                continue;
            }
            if modifier.len() > descr.name.len() {
                if modifier.as_bytes()[descr.name.len()] != b'=' {
                    continue;
                }
                if !descr.has_params {
                    return Err(RuleError::UnexpectedParameters(modifier.to_string()));
                }
                if modifier.len() == descr.name.len() + 1 {
                    return Err(RuleError::EmptyParameters(modifier.to_string()));
                }
            }

            if descr.has_params {
                let params = if modifier.len() > descr.name.len() {
                    &modifier[descr.name.len() + 1..]
                } else {
                    ""
                };
                match descr.name {
                    "dnstype" => dnstype = Some(parse_dnstype_params(params, is_exception)?),
                    "dnsrewrite" => rewrite = Some(DnsRewrite::parse(params, is_exception)?),
                    _ => {}
                }
            }

            found = Some(descr);
            break;
        }

        let descr = found.ok_or_else(|| RuleError::UnknownModifier(modifier.to_string()))?;
        if props.contains(descr.prop) {
            return Err(RuleError::DuplicatedModifier(descr.name.to_string()));
        }
        props.insert(descr.prop);
    }

    Ok((dnstype, rewrite))
}

fn is_too_wide(props: RuleProps, pattern: &str) -> bool {
    // $dnstype and $dnsrewrite carry their own selectivity
    !props.contains(RuleProps::DNSTYPE)
        && !props.contains(RuleProps::DNSREWRITE)
        && (pattern.len() < 3 || pattern.chars().all(|c| c == '.' || c == '*'))
}

fn skip_special_chars(s: &str) -> &str {
    if s.is_empty() {
        return s;
    }

    const SPECIAL_SEQUENCES: [&str; 15] = [
        // escape sequences
        "\\n", "\\r", "\\t",
        // metacharacters
        "\\d", "\\D", "\\w", "\\W", "\\s", "\\S",
        // position anchors
        "\\b", "\\B", "\\<", "\\>", "\\A", "\\Z",
    ];

    for seq in SPECIAL_SEQUENCES {
        if let Some(rest) = s.strip_prefix(seq) {
            return rest;
        }
    }

    let mut chars = s.chars();
    chars.next();
    chars.as_str()
}

fn extract_regex_shortcuts(text: &str) -> Vec<String> {
    let mut shortcuts = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let seek = rest
            .find(|c: char| SPECIAL_REGEX_CHARACTERS.contains(c))
            .unwrap_or(rest.len());
        if seek > 0 {
            shortcuts.push(rest[..seek].to_lowercase());
        }
        rest = skip_special_chars(&rest[seek..]);
    }
    shortcuts
}

fn regex_text_from_info(info: &MatchInfo<'_>) -> String {
    if info.is_regex_rule {
        return info.text.to_string();
    }

    let mut re = String::with_capacity(info.text.len() + 16);
    if info.line_start {
        re.push('^');
    } else if info.domain_start {
        re.push_str("^(.*\\.)?");
    }
    for ch in info.text.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '.' => re.push_str("\\."),
            _ => re.push(ch),
        }
    }
    if info.line_end {
        re.push('$');
    }
    re
}

/// Derive the canonical regex text of a regex-matched rule from its full
/// source line. Anchors are expressed as `^`, `^(.*\.)?`, and `$`; `*` in the
/// pattern becomes `.*` and `.` becomes `\.`. Embedded `/.../` rules return
/// their body unchanged.
pub fn rule_regex_text(rule_text: &str) -> String {
    let mut text = rule_text;
    if let Some(rest) = text.strip_prefix(EXCEPTION_MARKER) {
        text = rest;
    }
    if !check_regex(text) {
        if let Some(pos) = text.rfind(MODIFIERS_MARKER) {
            text = &text[..pos];
        }
    }

    let info = extract_match_info(text);
    regex_text_from_info(&info)
}

/// Compile a rule regex. Queried names are lowercased, rule patterns are not,
/// so matching must be caseless.
pub(crate) fn compile_rule_regex(re_text: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(re_text).case_insensitive(true).build()
}

/// Remove the `badfilter` modifier, with its adjoining `,` or `$`, from a
/// rule's text. The result is the exact text of the rule the badfilter rule
/// negates.
pub fn text_without_badfilter(text: &str) -> String {
    const BADFILTER: &str = "badfilter";

    let dollar = match text.rfind(MODIFIERS_MARKER) {
        Some(pos) => pos,
        None => return text.to_string(),
    };
    let modifiers = &text[dollar + 1..];
    let bf = match modifiers.find(BADFILTER) {
        Some(pos) => pos,
        None => return text.to_string(),
    };

    let mut prefix = &text[..dollar + 1 + bf];
    let mut suffix = &modifiers[bf + BADFILTER.len()..];
    if prefix.ends_with(',') || (suffix.is_empty() && prefix.ends_with(MODIFIERS_MARKER)) {
        prefix = &prefix[..prefix.len() - 1];
    } else if suffix.starts_with(',') && prefix.ends_with(MODIFIERS_MARKER) {
        suffix = &suffix[1..];
    }

    format!("{}{}", prefix, suffix)
}

fn is_host_rule(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some(first) => parts.next().is_some() && first.parse::<IpAddr>().is_ok(),
        None => false,
    }
}

// https://github.com/AdguardTeam/AdguardHome/wiki/Hosts-Blocklists#-etchosts-syntax
fn parse_host_file_rule(line: &str) -> Result<ParsedRule, RuleError> {
    let body = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let body = body.trim_end();

    let mut parts = body.split_whitespace();
    let ip = parts
        .next()
        .filter(|t| t.parse::<IpAddr>().is_ok())
        .ok_or_else(|| RuleError::InvalidHostRule(line.to_string()))?;

    let mut names = Vec::new();
    for name in parts {
        if !is_valid_domain_pattern(name) {
            return Err(RuleError::InvalidHostRule(name.to_string()));
        }
        names.push(name.to_lowercase());
    }
    if names.is_empty() {
        return Err(RuleError::InvalidHostRule(line.to_string()));
    }

    Ok(ParsedRule {
        text: body.to_string(),
        content: RuleContent::Hosts {
            ip: ip.to_string(),
        },
        match_method: MatchMethod::Subdomains,
        matching_parts: names,
    })
}

// https://github.com/AdguardTeam/AdguardHome/wiki/Hosts-Blocklists#adblock-style
fn parse_adblock_rule(orig: &str) -> Result<ParsedRule, RuleError> {
    let mut s = orig;
    let is_exception = s.starts_with(EXCEPTION_MARKER);
    if is_exception {
        s = &s[EXCEPTION_MARKER.len()..];
    }

    let (pattern, modifiers_str) = if check_regex(s) {
        (s, "")
    } else {
        match s.rfind(MODIFIERS_MARKER) {
            Some(pos) => (&s[..pos], &s[pos + 1..]),
            None => (s, ""),
        }
    };

    let info = extract_match_info(pattern);

    if !info.is_regex_rule && !is_valid_domain_pattern(info.text) && !is_valid_ip_pattern(info.text)
    {
        return Err(RuleError::InvalidPattern(info.text.to_string()));
    }

    let mut props = RuleProps::empty();
    props.set(RuleProps::EXCEPTION, is_exception);
    let (dnstype, rewrite) = extract_modifiers(&mut props, modifiers_str, is_exception)?;

    if is_too_wide(props, info.text) {
        return Err(RuleError::TooWide(info.text.to_string()));
    }

    let mut rule = ParsedRule {
        text: orig.to_string(),
        content: RuleContent::Adblock {
            props,
            dnstype,
            rewrite,
        },
        match_method: MatchMethod::Exact,
        matching_parts: Vec::new(),
    };

    if props.contains(RuleProps::BADFILTER) {
        // negation rules are matched by text, never by pattern
        return Ok(rule);
    }

    let exact_pattern = info.line_start && info.line_end && !info.domain_start;
    let subdomains_pattern = info.domain_start && info.line_end && !info.line_start;
    let anchorless = !info.line_start && !info.domain_start && !info.line_end;

    if !info.is_regex_rule && exact_pattern {
        if let Ok(ip) = info.text.parse::<IpAddr>() {
            // canonical form: port already stripped, IPv6 compressed
            rule.matching_parts = vec![ip.to_string()];
            return Ok(rule);
        }
    }

    if !info.is_regex_rule && !info.has_wildcard && (exact_pattern || subdomains_pattern) {
        rule.match_method = if exact_pattern {
            MatchMethod::Exact
        } else {
            MatchMethod::Subdomains
        };
        rule.matching_parts = vec![info.text.to_lowercase()];
        return Ok(rule);
    }

    if !info.is_regex_rule && anchorless {
        rule.match_method = MatchMethod::Shortcuts;
        rule.matching_parts = info
            .text
            .split('*')
            .filter(|part| !part.is_empty())
            .map(|part| part.to_lowercase())
            .collect();
        return Ok(rule);
    }

    if info.text.contains('?') {
        // '?' is both a regex metacharacter and a URL query separator;
        // shortcut extraction would be unreliable
        rule.match_method = MatchMethod::Regex;
    } else {
        let mut stripped = info.text.to_string();
        for re in STRIP_PATTERNS.iter() {
            stripped = re.replace_all(&stripped, "$1...").into_owned();
        }
        let shortcuts = extract_regex_shortcuts(&stripped);
        if shortcuts.is_empty() {
            rule.match_method = MatchMethod::Regex;
        } else {
            rule.match_method = MatchMethod::ShortcutsAndRegex;
            rule.matching_parts = shortcuts;
        }
    }

    let re_text = regex_text_from_info(&info);
    if compile_rule_regex(&re_text).is_err() {
        return Err(RuleError::InvalidRegex(re_text));
    }

    Ok(rule)
}

/// Parse one line of a rule list.
///
/// Returns `Ok(None)` for blank lines and comments, `Ok(Some(rule))` for a
/// parsed rule, and `Err` for a malformed rule.
pub fn parse_rule(line: &str) -> Result<Option<ParsedRule>, RuleError> {
    let line = line.trim();
    if line.is_empty() || is_comment(line) {
        return Ok(None);
    }

    // https://github.com/AdguardTeam/AdguardHome/wiki/Hosts-Blocklists#domains-only
    if is_domain_name(line) {
        return Ok(Some(ParsedRule {
            text: line.to_string(),
            content: RuleContent::Adblock {
                props: RuleProps::empty(),
                dnstype: None,
                rewrite: None,
            },
            match_method: MatchMethod::Subdomains,
            matching_parts: vec![line.to_lowercase()],
        }));
    }

    if is_host_rule(line) {
        return parse_host_file_rule(line).map(Some);
    }

    parse_adblock_rule(line).map(Some)
}
