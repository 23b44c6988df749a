//! Per-filter in-memory index.
//!
//! Four hash tables plus a leftovers vector, keyed by 32-bit hashes and
//! valued by file offsets. Domains seen once live in `unique_domains`; a
//! second insertion promotes the hash to the multi-entry `domains` table.
//! Real-world lists are dominated by unique domains, so the split saves a
//! lot of memory.

use ahash::AHashMap;
use regex::Regex;
use std::mem::size_of;

use crate::hash::hash32;
use crate::rule::{self, MatchMethod, ParsedRule, RuleProps};

/// Shortcut table keys use exactly this many leading bytes of a shortcut.
pub(crate) const SHORTCUT_LENGTH: usize = 5;

// Empirical
const APPROX_COMPILED_REGEX_BYTES: usize = 1024;

// Anything besides the contiguous domain tables fragments the heap; this
// coefficient was determined empirically.
const APPROX_FRAGMENTATION_COEF: f64 = 1.5;

// (key + value) * empty-bucket coefficient
const TABLE_ENTRY_BYTES: usize = 4 * size_of::<u32>();

/// A rule that fits neither the domain nor the shortcut table: a regex with
/// no usable shortcut, or a wildcard pattern whose shortcuts are all shorter
/// than [`SHORTCUT_LENGTH`]. Holds at least one of shortcuts and regex.
#[derive(Debug)]
pub(crate) struct LeftoverEntry {
    pub shortcuts: Vec<String>,
    pub regex: Option<Regex>,
    pub offset: u32,
}

/// Pass-1 tallies used to pre-size the tables.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RulesStat {
    pub simple_domain_rules: usize,
    pub shortcut_rules: usize,
    pub leftover_rules: usize,
    pub badfilter_rules: usize,
}

impl RulesStat {
    pub fn account(&mut self, rule: &ParsedRule) {
        if rule.props().contains(RuleProps::BADFILTER) {
            self.badfilter_rules += 1;
            return;
        }
        match rule.match_method {
            MatchMethod::Exact | MatchMethod::Subdomains => {
                self.simple_domain_rules += rule.matching_parts.len();
            }
            MatchMethod::Shortcuts | MatchMethod::ShortcutsAndRegex => {
                self.shortcut_rules += 1;
            }
            MatchMethod::Regex => {
                self.leftover_rules += 1;
            }
        }
    }
}

/// Whether an insertion fit into the memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted,
    MemLimitReached,
}

#[derive(Debug)]
pub(crate) struct FilterIndex {
    /// domain hash -> offset, for domains seen exactly once
    unique_domains: AHashMap<u32, u32>,
    /// domain hash -> offsets, for collisions
    domains: AHashMap<u32, Vec<u32>>,
    /// hash of a shortcut's first 5 bytes -> offsets
    shortcuts: AHashMap<u32, Vec<u32>>,
    leftovers: Vec<LeftoverEntry>,
    /// hash of the negated rule's text -> badfilter rule offset
    badfilter: AHashMap<u32, u32>,
    approx_mem: usize,
}

fn grown_capacity(len: usize, cap: usize) -> usize {
    if len < cap {
        cap
    } else if cap == 0 {
        4
    } else {
        cap * 2
    }
}

fn fragmented(cost: usize) -> usize {
    (cost as f64 * APPROX_FRAGMENTATION_COEF) as usize
}

impl FilterIndex {
    pub fn with_stat(stat: &RulesStat) -> Self {
        Self {
            unique_domains: AHashMap::with_capacity(stat.simple_domain_rules),
            domains: AHashMap::new(),
            shortcuts: AHashMap::new(),
            leftovers: Vec::with_capacity(stat.leftover_rules),
            badfilter: AHashMap::with_capacity(stat.badfilter_rules),
            approx_mem: 0,
        }
    }

    pub fn approx_mem(&self) -> usize {
        self.approx_mem
    }

    fn fits(&self, cost: usize, mem_limit: usize) -> bool {
        mem_limit == 0 || self.approx_mem + cost <= mem_limit
    }

    fn put_domain(&mut self, hash: u32, offset: u32) {
        if let Some(positions) = self.domains.get_mut(&hash) {
            positions.push(offset);
            return;
        }
        match self.unique_domains.remove(&hash) {
            // second sighting: promote to the multi table
            Some(stored) => {
                self.domains.insert(hash, vec![stored, offset]);
            }
            None => {
                self.unique_domains.insert(hash, offset);
            }
        }
    }

    /// Insert a parsed rule at its file offset, charging the memory budget.
    /// Returns [`InsertOutcome::MemLimitReached`] without inserting when the
    /// cost would push `approx_mem` over `mem_limit` (0 means no limit).
    pub fn add_rule(&mut self, rule: &ParsedRule, offset: u32, mem_limit: usize) -> InsertOutcome {
        if rule.props().contains(RuleProps::BADFILTER) {
            let cost = TABLE_ENTRY_BYTES;
            if !self.fits(cost, mem_limit) {
                return InsertOutcome::MemLimitReached;
            }
            let canonical = rule::text_without_badfilter(&rule.text);
            self.badfilter.insert(hash32(canonical.as_bytes()), offset);
            self.approx_mem += cost;
            log::trace!("rule placed in badfilter table: {}", rule.text);
            return InsertOutcome::Inserted;
        }

        match rule.match_method {
            MatchMethod::Exact | MatchMethod::Subdomains => {
                // assume non-unique domain rules are rare
                let cost = rule.matching_parts.len() * TABLE_ENTRY_BYTES;
                if !self.fits(cost, mem_limit) {
                    return InsertOutcome::MemLimitReached;
                }
                for part in &rule.matching_parts {
                    self.put_domain(hash32(part.as_bytes()), offset);
                }
                self.approx_mem += cost;
                log::trace!("rule placed in domains table: {}", rule.text);
                InsertOutcome::Inserted
            }
            MatchMethod::Shortcuts | MatchMethod::ShortcutsAndRegex => {
                let shortcut = rule
                    .matching_parts
                    .iter()
                    .find(|part| part.len() >= SHORTCUT_LENGTH);
                match shortcut {
                    Some(part) => {
                        let hash = hash32(&part.as_bytes()[..SHORTCUT_LENGTH]);
                        let cost = match self.shortcuts.get(&hash) {
                            Some(positions) => {
                                let cap = positions.capacity();
                                (grown_capacity(positions.len(), cap) - cap) * size_of::<u32>()
                            }
                            None => {
                                2 * (size_of::<u32>() + size_of::<Vec<u32>>())
                                    + grown_capacity(0, 0) * size_of::<u32>()
                            }
                        };
                        let cost = fragmented(cost);
                        if !self.fits(cost, mem_limit) {
                            return InsertOutcome::MemLimitReached;
                        }
                        self.shortcuts.entry(hash).or_default().push(offset);
                        self.approx_mem += cost;
                        log::trace!("rule placed in shortcuts table: {} ({})", rule.text, hash);
                        InsertOutcome::Inserted
                    }
                    // no usable shortcut, keep it with the leftovers
                    None => self.add_leftover(rule, offset, mem_limit),
                }
            }
            MatchMethod::Regex => self.add_leftover(rule, offset, mem_limit),
        }
    }

    fn add_leftover(&mut self, rule: &ParsedRule, offset: u32, mem_limit: usize) -> InsertOutcome {
        let regex = if rule.match_method == MatchMethod::Shortcuts {
            None
        } else {
            let re_text = rule::rule_regex_text(&rule.text);
            match rule::compile_rule_regex(&re_text) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("failed to compile regex for rule {}: {}", rule.text, e);
                    return InsertOutcome::Inserted;
                }
            }
        };

        let cap = self.leftovers.capacity();
        let mut cost = (grown_capacity(self.leftovers.len(), cap) - cap) * size_of::<LeftoverEntry>();
        cost += rule.matching_parts.iter().map(String::len).sum::<usize>();
        if regex.is_some() {
            cost += APPROX_COMPILED_REGEX_BYTES;
        }
        let cost = fragmented(cost);
        if !self.fits(cost, mem_limit) {
            return InsertOutcome::MemLimitReached;
        }

        self.leftovers.push(LeftoverEntry {
            shortcuts: rule.matching_parts.clone(),
            regex,
            offset,
        });
        self.approx_mem += cost;
        log::trace!("rule placed in leftovers table: {}", rule.text);
        InsertOutcome::Inserted
    }

    /// Offsets of domain rules stored under this hash, if any. A hash lives
    /// in exactly one of the two domain tables.
    pub fn domain_positions(&self, hash: u32) -> Option<&[u32]> {
        if let Some(position) = self.unique_domains.get(&hash) {
            return Some(std::slice::from_ref(position));
        }
        self.domains.get(&hash).map(Vec::as_slice)
    }

    pub fn shortcut_positions(&self, hash: u32) -> Option<&[u32]> {
        self.shortcuts.get(&hash).map(Vec::as_slice)
    }

    pub fn leftovers(&self) -> &[LeftoverEntry] {
        &self.leftovers
    }

    pub fn badfilter_position(&self, hash: u32) -> Option<u32> {
        self.badfilter.get(&hash).copied()
    }

    pub fn shrink_to_fit(&mut self) {
        self.unique_domains.shrink_to_fit();
        self.domains.shrink_to_fit();
        self.shortcuts.shrink_to_fit();
        self.leftovers.shrink_to_fit();
        self.badfilter.shrink_to_fit();
    }

    pub fn table_sizes(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.unique_domains.len(),
            self.domains.len(),
            self.shortcuts.len(),
            self.leftovers.len(),
            self.badfilter.len(),
        )
    }
}
