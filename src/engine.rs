//! Multi-list filter engine and rule precedence.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, LoadResult, Result};
use crate::filter::{Filter, FilterParams, MatchContext};
use crate::rrtype::RecordType;
use crate::rule::{text_without_badfilter, MatchedRule, RuleProps};

/// Engine construction parameters.
#[derive(Debug, Clone, Default)]
pub struct EngineParams {
    /// Filter lists, in precedence-relevant order
    pub filters: Vec<FilterParams>,
    /// Total memory budget in bytes shared by all lists; 0 means no limit
    pub mem_limit: usize,
}

/// Result of matching one query.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Matched rules in (filter order x phase order x file order)
    pub rules: Vec<MatchedRule>,
    /// Set when some filter's backing file changed mid-match; the result is
    /// partial and the caller should run [`Engine::update`]
    pub outdated: bool,
}

/// The filtering engine: an ordered collection of filter lists behind
/// reader/writer locks, plus the shared memory budget.
///
/// `match_request` takes shared access to every filter and is safe to call
/// concurrently; `update` takes exclusive access per filter.
#[derive(Debug)]
pub struct Engine {
    filters: Vec<RwLock<Filter>>,
    mem_limit: usize,
    mem_available: AtomicUsize,
}

impl Engine {
    /// Build an engine from filter lists.
    ///
    /// Duplicate filter ids are fatal. A filter whose file cannot be read is
    /// skipped; a filter that hits the memory budget is kept partially
    /// loaded. Both produce a warning summary returned alongside the engine.
    pub fn load(params: EngineParams) -> Result<(Self, Option<String>)> {
        let mut seen_ids = HashSet::new();
        for filter in &params.filters {
            if !seen_ids.insert(filter.id) {
                return Err(Error::Config(format!("duplicate filter id: {}", filter.id)));
            }
        }

        let mem_limit = params.mem_limit;
        let mut available = mem_limit;
        let mut warnings: Vec<String> = Vec::new();
        let mut filters = Vec::with_capacity(params.filters.len());

        for filter_params in params.filters {
            let id = filter_params.id;
            // each filter gets what the previous ones left over
            let share = if mem_limit == 0 { 0 } else { available.max(1) };
            match Filter::load(filter_params, share) {
                Ok((filter, result)) => {
                    if result == LoadResult::MemLimitReached {
                        log::warn!("filter {} loaded partially: memory limit reached", id);
                        warnings.push(format!("filter {}: memory limit reached", id));
                    }
                    available = available.saturating_sub(filter.approx_mem());
                    filters.push(RwLock::new(filter));
                }
                Err(e) => {
                    log::warn!("skipping filter {}: {}", id, e);
                    warnings.push(e.to_string());
                }
            }
        }

        let engine = Self {
            filters,
            mem_limit,
            mem_available: AtomicUsize::new(available),
        };
        let warning = if warnings.is_empty() {
            None
        } else {
            Some(warnings.join("; "))
        };
        Ok((engine, warning))
    }

    /// Number of loaded filters.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Approximate memory held by all filter indices.
    pub fn approx_mem(&self) -> usize {
        self.filters
            .iter()
            .map(|filter| filter.read().approx_mem())
            .sum()
    }

    fn run_filters(&self, ctx: &mut MatchContext) -> bool {
        let mut outdated = false;
        for filter in &self.filters {
            if !filter.read().match_context(ctx) {
                outdated = true;
            }
        }
        outdated
    }

    fn sweep_badfilters(&self, ctx: &mut MatchContext) -> bool {
        let mut outdated = false;
        for filter in &self.filters {
            if !filter.read().sweep_badfilters(ctx) {
                outdated = true;
            }
        }
        outdated
    }

    /// Match one query against every filter, in filter order.
    pub fn match_request(&self, host: &str, rr_type: RecordType) -> MatchResult {
        let mut ctx = MatchContext::new(host, rr_type);
        let mut outdated = self.run_filters(&mut ctx);
        outdated |= self.sweep_badfilters(&mut ctx);
        MatchResult {
            rules: ctx.matched_rules,
            outdated,
        }
    }

    /// Match a query plus the names discovered from its response (CNAME
    /// targets, answer addresses), merging everything into one result so
    /// exceptions and negations found on any name apply to the whole
    /// transaction.
    pub fn match_transitive(
        &self,
        host: &str,
        rr_type: RecordType,
        extra_names: &[&str],
    ) -> MatchResult {
        let mut ctx = MatchContext::new(host, rr_type);
        let mut outdated = self.run_filters(&mut ctx);

        for name in extra_names {
            let mut extra_ctx = MatchContext::new(name, rr_type);
            outdated |= self.run_filters(&mut extra_ctx);
            for rule in extra_ctx.matched_rules {
                if !ctx.matched_rules.iter().any(|r| r.text == rule.text) {
                    ctx.matched_rules.push(rule);
                }
            }
        }

        outdated |= self.sweep_badfilters(&mut ctx);
        MatchResult {
            rules: ctx.matched_rules,
            outdated,
        }
    }

    /// Reduce matched rules to the set whose action the caller must apply.
    ///
    /// Precedence: `$badfilter` cancellation first, then host-file rules
    /// beat adblock rules, then `$important` (blocks before exceptions),
    /// then exceptions, then `$dnsrewrite`, then `$dnstype`, then the rest.
    /// Ties keep filter order and file order.
    pub fn select_effective_rules(&self, rules: &[MatchedRule]) -> Vec<MatchedRule> {
        let cancelled: HashSet<String> = rules
            .iter()
            .filter(|rule| rule.props().contains(RuleProps::BADFILTER))
            .map(|rule| text_without_badfilter(&rule.text))
            .collect();

        let remaining: Vec<&MatchedRule> = rules
            .iter()
            .filter(|rule| {
                !rule.props().contains(RuleProps::BADFILTER) && !cancelled.contains(&rule.text)
            })
            .collect();

        // user-authoritative IP substitutions win over adblock rules
        let hosts: Vec<&MatchedRule> = remaining
            .iter()
            .copied()
            .filter(|rule| rule.content.is_hosts())
            .collect();
        if !hosts.is_empty() {
            return hosts.into_iter().cloned().collect();
        }

        let adblock = remaining;

        let important: Vec<&MatchedRule> = adblock
            .iter()
            .copied()
            .filter(|rule| rule.props().contains(RuleProps::IMPORTANT))
            .collect();
        if !important.is_empty() {
            let blocks: Vec<&MatchedRule> = important
                .iter()
                .copied()
                .filter(|rule| !rule.props().contains(RuleProps::EXCEPTION))
                .collect();
            let winners = if blocks.is_empty() { important } else { blocks };
            return winners.into_iter().cloned().collect();
        }

        let exceptions: Vec<&MatchedRule> = adblock
            .iter()
            .copied()
            .filter(|rule| rule.props().contains(RuleProps::EXCEPTION))
            .collect();
        if !exceptions.is_empty() {
            return exceptions.into_iter().cloned().collect();
        }

        let rewrites: Vec<&MatchedRule> = adblock
            .iter()
            .copied()
            .filter(|rule| rule.props().contains(RuleProps::DNSREWRITE))
            .collect();
        if !rewrites.is_empty() {
            return rewrites.into_iter().cloned().collect();
        }

        let typed: Vec<&MatchedRule> = adblock
            .iter()
            .copied()
            .filter(|rule| rule.props().contains(RuleProps::DNSTYPE))
            .collect();
        if !typed.is_empty() {
            return typed.into_iter().cloned().collect();
        }

        adblock.into_iter().cloned().collect()
    }

    /// Rebuild every on-disk filter whose backing file changed since load.
    pub fn update(&self) {
        for slot in &self.filters {
            if !slot.read().is_outdated() {
                continue;
            }
            let mut guard = slot.write();
            if !guard.is_outdated() {
                continue;
            }

            let id = guard.params.id;
            log::info!("updating filter {}...", id);

            let freed = guard.approx_mem();
            if self.mem_limit != 0 {
                self.mem_available.fetch_add(freed, Ordering::SeqCst);
            }
            let share = if self.mem_limit == 0 {
                0
            } else {
                self.mem_available.load(Ordering::SeqCst).max(1)
            };

            match Filter::load(guard.params.clone(), share) {
                Ok((new_filter, result)) => {
                    if self.mem_limit != 0 {
                        let consumed = new_filter.approx_mem();
                        let _ = self.mem_available.fetch_update(
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                            |v| Some(v.saturating_sub(consumed)),
                        );
                    }
                    *guard = new_filter;
                    match result {
                        LoadResult::MemLimitReached => {
                            log::warn!("filter {} updated partially (reached memory limit)", id);
                        }
                        _ => log::info!("update of filter {} successful", id),
                    }
                }
                Err(e) => {
                    // keep the old index and re-reserve its budget; the next
                    // update() run retries
                    if self.mem_limit != 0 {
                        let _ = self.mem_available.fetch_update(
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                            |v| Some(v.saturating_sub(freed)),
                        );
                    }
                    log::error!("filter {} was not updated: {}", id, e);
                }
            }
        }
    }
}
