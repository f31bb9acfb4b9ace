use std::sync::Arc;
use std::time::{Duration, Instant};

use pagelens::{
    config::{LensConfig, SearchConfig},
    search::{SearchOrchestrator, SearchPhase},
    Card, SearchRequest,
};
use pretty_assertions::assert_eq;

use super::{orchestrator, standard_extractor, ScriptedLoader};

#[tokio::test]
async fn test_timed_out_candidate_is_dropped() {
    let loader = Arc::new(
        ScriptedLoader::new(Duration::from_millis(100))
            .image("q.png", b'q')
            .image("a.png", b'a')
            .image("b.png", b'b')
            .image("c.png", b'c')
            .delay("b.png", Duration::from_secs(30)),
    );
    let orchestrator = orchestrator(loader.clone(), standard_extractor());

    let candidates = vec![
        Card::new("a.png", "A").with_id("A"),
        Card::new("b.png", "B").with_id("B"),
        Card::new("c.png", "C").with_id("C"),
    ];
    let started = Instant::now();
    let report = orchestrator
        .search(SearchRequest::new("q.png", candidates, 1))
        .await
        .unwrap();

    // the unreachable image cannot stall the batch past its deadline
    assert!(started.elapsed() < Duration::from_secs(5));

    let ids: Vec<_> = report.cards().map(|c| c.id.to_string()).collect();
    assert_eq!(ids, vec!["A", "C"]);
    assert_eq!(report.results[0].distance, 0.0);
    assert_eq!(report.results[1].distance, 2.0);

    assert_eq!(report.omitted.len(), 1);
    assert_eq!(report.omitted[0].card_id.as_str(), "B");
    assert!(report.omitted[0].reason.contains("Timed out"));

    assert_eq!(orchestrator.view().phase, SearchPhase::Done);
}

#[tokio::test]
async fn test_all_candidates_failing_is_an_empty_success() {
    let loader = Arc::new(ScriptedLoader::new(Duration::from_secs(1)).image("q.png", b'q'));
    let orchestrator = orchestrator(loader, standard_extractor());

    let report = orchestrator
        .search(SearchRequest::new(
            "q.png",
            vec![Card::new("gone-1.png", "1"), Card::new("gone-2.png", "2")],
            1,
        ))
        .await
        .unwrap();

    assert!(report.results.is_empty());
    assert_eq!(report.omitted.len(), 2);
}

#[tokio::test]
async fn test_order_ignores_fetch_arrival_order() {
    // the closest candidate arrives last
    let loader = Arc::new(
        ScriptedLoader::new(Duration::from_secs(5))
            .image("q.png", b'q')
            .image("a.png", b'a')
            .image("b.png", b'b')
            .image("c.png", b'c')
            .delay("a.png", Duration::from_millis(150))
            .delay("b.png", Duration::from_millis(50)),
    );
    let orchestrator = orchestrator(loader, standard_extractor());

    let report = orchestrator
        .search(SearchRequest::new(
            "q.png",
            vec![
                Card::new("c.png", "c"),
                Card::new("b.png", "b"),
                Card::new("a.png", "a"),
            ],
            1,
        ))
        .await
        .unwrap();

    let titles: Vec<_> = report.cards().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_duplicate_candidate_images_embed_once() {
    let loader = Arc::new(
        ScriptedLoader::new(Duration::from_secs(5))
            .image("q.png", b'q')
            .image("a.png", b'a')
            .delay("a.png", Duration::from_millis(50)),
    );
    let extractor = standard_extractor();
    let orchestrator = orchestrator(loader.clone(), extractor.clone());

    let report = orchestrator
        .search(SearchRequest::new(
            "q.png",
            vec![
                Card::new("a.png", "first").with_id("1"),
                Card::new("a.png", "second").with_id("2"),
            ],
            1,
        ))
        .await
        .unwrap();

    let titles: Vec<_> = report.cards().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["first", "second"]);
    assert_eq!(loader.load_count("a.png"), 1);
    // one query embedding plus one candidate embedding
    assert_eq!(extractor.calls(), 2);
}

#[tokio::test]
async fn test_slow_head_does_not_block_later_loads() {
    let loader = Arc::new(
        ScriptedLoader::new(Duration::from_secs(5))
            .image("q.png", b'q')
            .image("slow.png", b'a')
            .image("quick.png", b'a')
            .image("late.png", b'a')
            .delay("slow.png", Duration::from_millis(600))
            .delay("quick.png", Duration::from_millis(10))
            .delay("late.png", Duration::from_millis(400)),
    );
    let config = LensConfig {
        search: SearchConfig {
            max_concurrent_loads: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let orchestrator = SearchOrchestrator::new(loader, standard_extractor(), &config);

    let started = Instant::now();
    let report = orchestrator
        .search(SearchRequest::new(
            "q.png",
            vec![
                Card::new("slow.png", "slow"),
                Card::new("quick.png", "quick"),
                Card::new("late.png", "late"),
            ],
            1,
        ))
        .await
        .unwrap();

    // late.png starts once quick.png frees its slot, not after slow.png
    assert!(started.elapsed() < Duration::from_millis(900));
    let titles: Vec<_> = report.cards().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["slow", "quick", "late"]);
}
