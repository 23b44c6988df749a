//! Integration tests for the filtering engine.

use dnsrule::{
    DnsTypeMode, Engine, EngineParams, FilterParams, MatchMethod, RCode, RecordType, RewriteValue,
    RuleContent, RuleProps,
};

fn engine_from_lists(lists: &[&str]) -> Engine {
    let filters = lists
        .iter()
        .enumerate()
        .map(|(i, data)| FilterParams {
            id: i as i32 + 1,
            data: data.to_string(),
            in_memory: true,
        })
        .collect();
    let (engine, warning) = Engine::load(EngineParams {
        filters,
        mem_limit: 0,
    })
    .unwrap();
    assert_eq!(warning, None);
    engine
}

fn effective(engine: &Engine, host: &str, rr_type: RecordType) -> Vec<String> {
    let result = engine.match_request(host, rr_type);
    assert!(!result.outdated);
    engine
        .select_effective_rules(&result.rules)
        .into_iter()
        .map(|rule| rule.text)
        .collect()
}

#[test]
fn subdomain_block() {
    // S1
    let engine = engine_from_lists(&["||example.org^\n"]);

    let result = engine.match_request("sub.example.org", RecordType::A);
    assert_eq!(result.rules.len(), 1);
    assert_eq!(result.rules[0].text, "||example.org^");

    let selected = engine.select_effective_rules(&result.rules);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].text, "||example.org^");

    assert!(effective(&engine, "example.org.evil.com", RecordType::A).is_empty());
}

#[test]
fn exception_overrides_block() {
    // S2
    let engine = engine_from_lists(&["||example.org^\n@@||www.example.org^\n"]);

    let result = engine.match_request("www.example.org", RecordType::A);
    assert_eq!(result.rules.len(), 2);
    assert_eq!(
        effective(&engine, "www.example.org", RecordType::A),
        vec!["@@||www.example.org^".to_string()]
    );

    assert_eq!(
        effective(&engine, "api.example.org", RecordType::A),
        vec!["||example.org^".to_string()]
    );
}

#[test]
fn important_beats_exception() {
    // S3
    let engine = engine_from_lists(&["@@||example.org^\n||example.org^$important\n"]);
    assert_eq!(
        effective(&engine, "example.org", RecordType::A),
        vec!["||example.org^$important".to_string()]
    );
}

#[test]
fn badfilter_cancels() {
    // S4
    let engine = engine_from_lists(&["||ads.example.org^\n||ads.example.org^$badfilter\n"]);
    assert!(effective(&engine, "ads.example.org", RecordType::A).is_empty());
}

#[test]
fn dnstype_filters_query_type() {
    // S5
    let engine = engine_from_lists(&["example.com$dnstype=A|AAAA\n"]);

    assert_eq!(
        effective(&engine, "example.com", RecordType::A),
        vec!["example.com$dnstype=A|AAAA".to_string()]
    );
    assert!(engine
        .match_request("example.com", RecordType::Mx)
        .rules
        .is_empty());
}

#[test]
fn dnsrewrite_short_form() {
    // S6
    let engine = engine_from_lists(&["example.com$dnsrewrite=1.2.3.4\n"]);

    let result = engine.match_request("example.com", RecordType::A);
    let selected = engine.select_effective_rules(&result.rules);
    assert_eq!(selected.len(), 1);
    match &selected[0].content {
        RuleContent::Adblock { rewrite, .. } => {
            let rewrite = rewrite.as_ref().unwrap();
            assert_eq!(rewrite.rcode, RCode::NoError);
            assert_eq!(rewrite.rtype, Some(RecordType::A));
            assert_eq!(
                rewrite.value,
                Some(RewriteValue::A("1.2.3.4".parse().unwrap()))
            );
        }
        other => panic!("unexpected content: {:?}", other),
    }

    // type incompatibility: no rewrite for AAAA
    assert!(engine
        .match_request("example.com", RecordType::Aaaa)
        .rules
        .is_empty());
}

#[test]
fn host_file_beats_adblock() {
    // S7
    let engine = engine_from_lists(&["1.2.3.4 blocked.test\n||blocked.test^\n"]);

    let result = engine.match_request("blocked.test", RecordType::A);
    assert_eq!(result.rules.len(), 2);

    let selected = engine.select_effective_rules(&result.rules);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].text, "1.2.3.4 blocked.test");
    match &selected[0].content {
        RuleContent::Hosts { ip } => assert_eq!(ip, "1.2.3.4"),
        other => panic!("unexpected content: {:?}", other),
    }
}

#[test]
fn every_tier_finds_its_rules() {
    // one rule per phase, all designed to match the same host
    let engine = engine_from_lists(&[concat!(
        "||tracker.example.org^\n",            // domains
        "track*example\n",                     // shortcuts
        "/^track(er)?\\.example\\.org$/\n",    // leftovers ('?' forces plain regex)
        "||tracker.example.org^$badfilter\n",
    )]);

    let result = engine.match_request("tracker.example.org", RecordType::A);
    let texts: Vec<&str> = result.rules.iter().map(|r| r.text.as_str()).collect();
    assert!(texts.contains(&"||tracker.example.org^"));
    assert!(texts.contains(&"track*example"));
    assert!(texts.contains(&"/^track(er)?\\.example\\.org$/"));
    assert!(texts.contains(&"||tracker.example.org^$badfilter"));
}

#[test]
fn case_invariance() {
    let engine = engine_from_lists(&["||Example.ORG^\n1.2.3.4 Hosts.Example\n"]);
    assert_eq!(
        effective(&engine, "EXAMPLE.COM.example.org", RecordType::A),
        effective(&engine, "example.com.EXAMPLE.ORG", RecordType::A)
    );
    assert_eq!(
        effective(&engine, "HOSTS.example", RecordType::A),
        effective(&engine, "hosts.EXAMPLE", RecordType::A)
    );
    assert!(!effective(&engine, "hosts.example", RecordType::A).is_empty());
}

#[test]
fn matched_rules_have_unique_texts() {
    // the same domain is reachable through several probes
    let engine = engine_from_lists(&[
        "1.2.3.4 example.org www.example.org\n||example.org^\nexample.org\n",
    ]);
    let result = engine.match_request("www.example.org", RecordType::A);
    let mut texts: Vec<&str> = result.rules.iter().map(|r| r.text.as_str()).collect();
    let total = texts.len();
    texts.sort_unstable();
    texts.dedup();
    assert_eq!(texts.len(), total);
}

#[test]
fn selection_is_deterministic() {
    let lists = [
        "||ads.example.org^\nads*org\n@@||ads.example.org^$dnstype=A\n",
        "||ads.example.org^$important\n1.2.3.4 other.test\n",
    ];
    let engine = engine_from_lists(&lists);
    let first = effective(&engine, "ads.example.org", RecordType::A);
    for _ in 0..10 {
        let engine = engine_from_lists(&lists);
        assert_eq!(effective(&engine, "ads.example.org", RecordType::A), first);
    }
}

#[test]
fn badfilter_law_applies_engine_wide() {
    let base = "||ads.example.org^\n";
    // the negation can live in any filter, before or after
    for negating_list in [
        &["||ads.example.org^$badfilter\n", base][..],
        &[base, "||ads.example.org^$badfilter\n"][..],
        &[concat!("||ads.example.org^\n", "||ads.example.org^$badfilter\n")][..],
    ] {
        let engine = engine_from_lists(negating_list);
        assert!(
            effective(&engine, "ads.example.org", RecordType::A).is_empty(),
            "badfilter failed for lists {:?}",
            negating_list
        );
    }
    // comma form after another modifier
    let engine = engine_from_lists(&[
        "||ads.example.org^$important\n||ads.example.org^$important,badfilter\n",
    ]);
    assert!(effective(&engine, "ads.example.org", RecordType::A).is_empty());
}

#[test]
fn memory_bound_is_respected() {
    let mut rules = String::new();
    for i in 0..1000 {
        rules.push_str(&format!("||domain{}.example.org^\n", i));
    }
    let limit = 4096;
    let (engine, warning) = Engine::load(EngineParams {
        filters: vec![FilterParams {
            id: 1,
            data: rules,
            in_memory: true,
        }],
        mem_limit: limit,
    })
    .unwrap();

    assert!(warning.unwrap().contains("memory limit"));
    assert!(engine.approx_mem() <= limit);
    // early rules are present, the tail is not
    assert!(!effective(&engine, "domain0.example.org", RecordType::A).is_empty());
    assert!(effective(&engine, "domain999.example.org", RecordType::A).is_empty());
}

#[test]
fn parsed_rule_metadata_is_exposed() {
    let rule = dnsrule::parse_rule("@@||example.org^$dnstype=~MX")
        .unwrap()
        .unwrap();
    assert_eq!(rule.match_method, MatchMethod::Subdomains);
    assert!(rule.props().contains(RuleProps::EXCEPTION));
    let dnstype = rule.content.dnstype().unwrap();
    assert_eq!(dnstype.mode, DnsTypeMode::Exclude);
    assert_eq!(dnstype.types, vec![RecordType::Mx]);
}

#[test]
fn on_disk_filter_freshness_and_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("list.txt");
    std::fs::write(&path, "||stale.example^\n").unwrap();

    let (engine, warning) = Engine::load(EngineParams {
        filters: vec![FilterParams {
            id: 1,
            data: path.to_string_lossy().into_owned(),
            in_memory: false,
        }],
        mem_limit: 0,
    })
    .unwrap();
    assert_eq!(warning, None);

    assert_eq!(
        effective(&engine, "stale.example", RecordType::A),
        vec!["||stale.example^".to_string()]
    );

    // replace the list and push the mtime forward past fs granularity
    std::fs::write(&path, "||fresh.example^\n").unwrap();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(10))
        .unwrap();
    drop(file);

    // a probe that needs rehydration notices the stale file
    let result = engine.match_request("stale.example", RecordType::A);
    assert!(result.outdated);
    assert!(result.rules.is_empty());

    engine.update();

    assert_eq!(
        effective(&engine, "fresh.example", RecordType::A),
        vec!["||fresh.example^".to_string()]
    );
    let result = engine.match_request("stale.example", RecordType::A);
    assert!(!result.outdated);
    assert!(result.rules.is_empty());
}

#[test]
fn update_is_a_noop_for_fresh_filters() {
    let engine = engine_from_lists(&["||example.org^\n"]);
    engine.update();
    assert_eq!(
        effective(&engine, "example.org", RecordType::A),
        vec!["||example.org^".to_string()]
    );
}
