//! A single filter list: two-pass loader, four-phase matcher, match context.

mod index;
mod source;

pub(crate) use index::SHORTCUT_LENGTH;

use crate::error::{Error, LoadResult, Result};
use crate::hash::hash32;
use crate::rrtype::RecordType;
use crate::rule::{self, MatchMethod, MatchedRule, ParsedRule, RuleContent, RuleProps};
use index::{FilterIndex, InsertOutcome, RulesStat};
use source::{FilterSource, LineReader};

/// Parameters of one filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    /// Unique id of the list; matched rules are tagged with it
    pub id: i32,
    /// Rule file contents when `in_memory`, a filesystem path otherwise
    pub data: String,
    pub in_memory: bool,
}

/// Context of one DNS transaction.
///
/// Created per query and discarded after the caller selects effective rules.
#[derive(Debug, Clone)]
pub struct MatchContext {
    /// Lowercased queried name
    pub host: String,
    /// The host plus every parent domain down to (excluding) the TLD
    pub subdomains: Vec<String>,
    /// Query RR type
    pub rr_type: RecordType,
    /// Set when the query is a reverse DNS lookup
    pub reverse_lookup_fqdn: Option<String>,
    /// Rules matched so far, in match order, de-duplicated by text
    pub matched_rules: Vec<MatchedRule>,
}

impl MatchContext {
    pub fn new(host: &str, rr_type: RecordType) -> Self {
        let host = host.to_lowercase();

        let mut n = host.matches('.').count();
        if n > 0 {
            // all except the TLD
            n -= 1;
        }
        let mut subdomains = Vec::with_capacity(n + 1);
        subdomains.push(host.clone());
        let mut current = host.as_str();
        for _ in 0..n {
            match current.find('.') {
                Some(pos) => {
                    current = &current[pos + 1..];
                    subdomains.push(current.to_string());
                }
                None => break,
            }
        }

        let reverse_lookup_fqdn = if rr_type == RecordType::Ptr
            && !host.ends_with('.')
            && (host.ends_with("in-addr.arpa") || host.ends_with("ip6.arpa"))
        {
            Some(format!("{}.", host))
        } else {
            None
        };

        Self {
            host,
            subdomains,
            rr_type,
            reverse_lookup_fqdn,
            matched_rules: Vec::new(),
        }
    }
}

enum ModifierMatch {
    /// The rule does not apply because of its modifiers
    NotMatched,
    /// Modifiers pass; the pattern still has to match
    Candidate,
    /// Modifiers decide alone; the pattern is not checked
    Surely,
}

fn match_adblock_modifiers(rule: &ParsedRule, ctx: &MatchContext) -> ModifierMatch {
    let props = rule.props();

    if props.contains(RuleProps::BADFILTER) {
        return ModifierMatch::Surely;
    }

    if props.contains(RuleProps::DNSTYPE) {
        return match rule.content.dnstype() {
            Some(info) if info.allows(ctx.rr_type) => ModifierMatch::Candidate,
            Some(_) => ModifierMatch::NotMatched,
            None => ModifierMatch::Candidate,
        };
    }

    if props.contains(RuleProps::DNSREWRITE) {
        if let Some(rewrite) = rule.content.rewrite() {
            if let Some(rtype) = rewrite.rtype {
                let compatible = match rtype {
                    RecordType::A => ctx.rr_type == RecordType::A,
                    RecordType::Aaaa => ctx.rr_type == RecordType::Aaaa,
                    RecordType::Ptr => ctx.rr_type == RecordType::Ptr,
                    RecordType::Cname => {
                        ctx.rr_type == RecordType::A || ctx.rr_type == RecordType::Aaaa
                    }
                    _ => true,
                };
                if !compatible {
                    return ModifierMatch::NotMatched;
                }
            }
        }
    }

    ModifierMatch::Candidate
}

/// Ordered, non-overlapping substring search.
fn match_shortcuts(shortcuts: &[String], domain: &str) -> bool {
    let mut seek = 0usize;
    for shortcut in shortcuts {
        match domain.get(seek..).and_then(|rest| rest.find(shortcut.as_str())) {
            Some(pos) => seek += pos + shortcut.len(),
            None => return false,
        }
    }
    true
}

fn match_pattern(rule: &ParsedRule, host: &str, subdomains: &[String]) -> bool {
    match rule.match_method {
        MatchMethod::Exact => rule.matching_parts.iter().any(|part| part == host),
        MatchMethod::Subdomains => rule
            .matching_parts
            .iter()
            .any(|part| subdomains.iter().any(|subdomain| subdomain == part)),
        MatchMethod::Shortcuts => match_shortcuts(&rule.matching_parts, host),
        MatchMethod::ShortcutsAndRegex => {
            match_shortcuts(&rule.matching_parts, host)
                && rule::compile_rule_regex(&rule::rule_regex_text(&rule.text))
                    .map_or(false, |re| re.is_match(host))
        }
        MatchMethod::Regex => rule::compile_rule_regex(&rule::rule_regex_text(&rule.text))
            .map_or(false, |re| {
                subdomains.iter().any(|subdomain| re.is_match(subdomain))
            }),
    }
}

/// One loaded filter list.
#[derive(Debug)]
pub(crate) struct Filter {
    pub params: FilterParams,
    source: FilterSource,
    index: FilterIndex,
}

impl Filter {
    /// Load a rule list, stopping early if `mem_limit` (non-zero) would be
    /// exceeded. Returns the filter together with the load outcome; IO
    /// failures on the backing file are fatal for this filter only.
    pub fn load(params: FilterParams, mem_limit: usize) -> Result<(Self, LoadResult)> {
        let mut source = if params.in_memory {
            FilterSource::memory(params.data.clone())
        } else {
            FilterSource::disk(&params.data)
        };

        let id = params.id;
        let read_error = |e: Error| match e {
            Error::Io(io) => Error::FilterRead { id, source: io },
            other => other,
        };

        // pass 1: tally rule categories to pre-size the tables
        let mut stat = RulesStat::default();
        source
            .for_each_line(|_, line| {
                if let Ok(Some(parsed)) = rule::parse_rule(line) {
                    stat.account(&parsed);
                }
                true
            })
            .map_err(read_error)?;

        // pass 2: parse again and fill the index
        let mut index = FilterIndex::with_stat(&stat);
        let mut result = LoadResult::Ok;
        source
            .for_each_line(|offset, line| {
                let parsed = match rule::parse_rule(line) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => return true,
                    Err(e) => {
                        log::debug!("filter {}: failed to parse rule {:?}: {}", id, line, e);
                        return true;
                    }
                };
                match index.add_rule(&parsed, offset, mem_limit) {
                    InsertOutcome::Inserted => true,
                    InsertOutcome::MemLimitReached => {
                        result = LoadResult::MemLimitReached;
                        false
                    }
                }
            })
            .map_err(read_error)?;

        index.shrink_to_fit();
        source.refresh_mtime();

        let (unique, multi, shortcuts, leftovers, badfilter) = index.table_sizes();
        log::info!(
            "filter {}: {} unique domains, {} non-unique, {} shortcuts, {} leftovers, {} badfilters, ~{}K",
            id,
            unique,
            multi,
            shortcuts,
            leftovers,
            badfilter,
            index.approx_mem() / 1024 + 1
        );

        Ok((
            Self {
                params,
                source,
                index,
            },
            result,
        ))
    }

    pub fn approx_mem(&self) -> usize {
        self.index.approx_mem()
    }

    /// Check whether the backing file changed since load.
    pub fn is_outdated(&self) -> bool {
        self.source.is_outdated()
    }

    /// Match a context against this filter's index. Returns `false` if the
    /// backing file went stale mid-match; the context then holds a partial
    /// result.
    pub fn match_context(&self, ctx: &mut MatchContext) -> bool {
        let mut reader = LineReader::new(&self.source);

        self.search_by_domains(ctx, &mut reader);
        self.search_by_shortcuts(ctx, &mut reader);
        self.search_in_leftovers(ctx, &mut reader);
        self.search_badfilter_rules(ctx, &mut reader);

        !reader.outdated
    }

    /// Probe this filter's badfilter table against every rule matched so
    /// far. Also runs as part of [`Filter::match_context`]; the engine calls
    /// it again after all filters matched, so a negation in an earlier list
    /// cancels rules matched by a later one.
    pub fn sweep_badfilters(&self, ctx: &mut MatchContext) -> bool {
        let mut reader = LineReader::new(&self.source);
        self.search_badfilter_rules(ctx, &mut reader);
        !reader.outdated
    }

    fn search_by_domains(&self, ctx: &mut MatchContext, reader: &mut LineReader<'_>) {
        for i in 0..ctx.subdomains.len() {
            if reader.outdated {
                return;
            }
            let hash = hash32(ctx.subdomains[i].as_bytes());
            if let Some(positions) = self.index.domain_positions(hash) {
                for &position in positions {
                    self.match_by_position(ctx, reader, position);
                }
            }
        }
    }

    fn search_by_shortcuts(&self, ctx: &mut MatchContext, reader: &mut LineReader<'_>) {
        if ctx.host.len() < SHORTCUT_LENGTH || reader.outdated {
            return;
        }
        let host = ctx.host.clone();
        for window in host.as_bytes().windows(SHORTCUT_LENGTH) {
            if reader.outdated {
                return;
            }
            if let Some(positions) = self.index.shortcut_positions(hash32(window)) {
                for &position in positions {
                    self.match_by_position(ctx, reader, position);
                }
            }
        }
    }

    fn search_in_leftovers(&self, ctx: &mut MatchContext, reader: &mut LineReader<'_>) {
        for entry in self.index.leftovers() {
            if reader.outdated {
                return;
            }
            if !entry.shortcuts.is_empty() && !match_shortcuts(&entry.shortcuts, &ctx.host) {
                continue;
            }
            let regex_hit = match &entry.regex {
                Some(re) => re.is_match(&ctx.host),
                None => true,
            };
            if regex_hit {
                self.match_by_position(ctx, reader, entry.offset);
            }
        }
    }

    fn search_badfilter_rules(&self, ctx: &mut MatchContext, reader: &mut LineReader<'_>) {
        let matched = ctx.matched_rules.len();
        for i in 0..matched {
            if reader.outdated {
                return;
            }
            let hash = hash32(ctx.matched_rules[i].text.as_bytes());
            if let Some(position) = self.index.badfilter_position(hash) {
                self.match_by_position(ctx, reader, position);
            }
        }
    }

    fn match_by_position(&self, ctx: &mut MatchContext, reader: &mut LineReader<'_>, offset: u32) {
        let line = match reader.read_line(offset) {
            Some(line) => line,
            None => return,
        };
        let line = line.trim();

        if ctx.matched_rules.iter().any(|r| r.text == line) {
            return;
        }

        let parsed = match rule::parse_rule(line) {
            Ok(Some(parsed)) => parsed,
            _ => return,
        };
        // a host-file rule's text omits its trailing comment
        if parsed.text != line && ctx.matched_rules.iter().any(|r| r.text == parsed.text) {
            return;
        }

        let surely = match &parsed.content {
            RuleContent::Adblock { .. } => match match_adblock_modifiers(&parsed, ctx) {
                ModifierMatch::NotMatched => return,
                ModifierMatch::Candidate => false,
                ModifierMatch::Surely => true,
            },
            RuleContent::Hosts { .. } => false,
        };

        if !surely && !match_pattern(&parsed, &ctx.host, &ctx.subdomains) {
            return;
        }

        log::debug!("'{}' matched against rule '{}'", ctx.host, parsed.text);
        ctx.matched_rules.push(MatchedRule {
            filter_id: self.params.id,
            text: parsed.text,
            content: parsed.content,
        });
    }
}
