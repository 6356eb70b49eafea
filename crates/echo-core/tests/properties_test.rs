//! Integration tests for scoring, selection and trigger timing.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use echo_core::schedule::{evaluate_trigger, seconds_until_next_trigger, trigger_key};
use echo_core::selection::is_negative_leaning;
use echo_core::{
    AssetCatalog, ConfigStore, DecisionOrchestrator, EchoConfig, Frequency, InMemoryConfigStore,
    PlatformEvent, ResourceSelector, SelectorConfig, SentimentAnalyzer, TriggerSpec, TriggerState,
};
use std::sync::Arc;

fn contribution(analyzer: &SentimentAnalyzer, text: &str, tag: &str) -> f64 {
    analyzer
        .score_nodes(text)
        .into_iter()
        .find(|n| n.tag == tag)
        .map(|n| n.raw)
        .unwrap_or(0.0)
}

fn voice_dir(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for file in files {
        let path = dir.path().join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"RIFF").unwrap();
    }
    dir
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

#[test]
fn test_single_negation_removes_tag() {
    let analyzer = SentimentAnalyzer::with_defaults();
    assert!(contribution(&analyzer, "我不难过", "comfort") <= 0.0);

    let result = analyzer.analyze_detailed("我不难过", None);
    assert_ne!(result.tag.as_deref(), Some("comfort"));
    assert!(result.mixed_emotions.iter().all(|c| c.tag != "comfort"));
}

#[test]
fn test_double_negation_is_stronger_than_single() {
    let analyzer = SentimentAnalyzer::with_defaults();
    let single = contribution(&analyzer, "我不难过", "comfort");
    let double = contribution(&analyzer, "没不难过", "comfort");
    assert!(double > 0.0);
    assert!(double > single);
}

#[test]
fn test_repetition_is_sublinear() {
    let analyzer = SentimentAnalyzer::with_defaults();
    let single = contribution(&analyzer, "难过", "comfort");
    for n in 2..=5 {
        let repeated = contribution(&analyzer, &"难过".repeat(n), "comfort");
        assert!(repeated < n as f64 * single, "n = {}", n);
    }
}

#[test]
fn test_empty_text() {
    let analyzer = SentimentAnalyzer::with_defaults();
    assert_eq!(analyzer.analyze("", Some("u1")), (None, 0.0));
}

#[test]
fn test_no_immediate_repeat() {
    let dir = voice_dir(&[
        "v_comfort_01.mp3",
        "v_comfort_02.mp3",
        "v_comfort_03.mp3",
        "v_comfort_04.ogg",
    ]);
    let catalog = AssetCatalog::scan(dir.path()).unwrap();
    assert_eq!(catalog.count("comfort"), 4);

    let selector = ResourceSelector::new(catalog, SelectorConfig::default());
    let mut previous: Option<String> = None;
    for _ in 0..40 {
        let pick = selector.select(Some("comfort")).unwrap();
        assert_ne!(previous.as_ref(), Some(&pick));
        previous = Some(pick);
    }
}

#[test]
fn test_parent_directory_becomes_tag() {
    let dir = voice_dir(&["night/v_sanity_01.mp3", "notes.txt"]);
    let catalog = AssetCatalog::scan(dir.path()).unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.count("night"), 1);
    assert_eq!(catalog.count("sanity"), 1);
}

#[test]
fn test_daily_countdown() {
    let spec = TriggerSpec::new(Frequency::Daily, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    let before = seconds_until_next_trigger(at(7, 59), &spec);
    assert!((55..=65).contains(&before));

    let after = seconds_until_next_trigger(at(8, 1), &spec);
    let expected = 24 * 3600 - 120;
    assert!(after.abs_diff(expected) <= 5);
}

#[test]
fn test_grace_window() {
    let spec = TriggerSpec::new(Frequency::Daily, NaiveTime::from_hms_opt(8, 0, 0).unwrap())
        .with_grace(Duration::minutes(30));

    let late = evaluate_trigger(at(8, 10), &spec);
    assert!(matches!(late, TriggerState::Compensated { .. }));
    assert_eq!(late.key(), Some(trigger_key(Frequency::Daily, at(8, 0)).as_str()));

    assert_eq!(evaluate_trigger(at(8, 40), &spec), TriggerState::Idle);
}

#[test]
fn test_distress_outscores_mild_sadness() {
    let dir = voice_dir(&[
        "v_comfort_01.mp3",
        "v_comfort_02.mp3",
        "v_comfort_03.mp3",
        "v_morning_01.mp3",
        "v_trust_01.mp3",
    ]);

    let respond = |text: &str| {
        let config = EchoConfig::builder().cooldown_secs(0).build();
        let store: Arc<dyn ConfigStore> = Arc::new(InMemoryConfigStore::new(config));
        let catalog = AssetCatalog::scan(dir.path()).unwrap();
        let orchestrator = DecisionOrchestrator::from_config(store, catalog);
        let decision = orchestrator.decide(&PlatformEvent::message("qq:7", text));
        let response = orchestrator.respond(&PlatformEvent::message("qq:8", text));
        (decision, response)
    };

    let (strong, strong_response) = respond("我好难过，救命");
    let (mild, _) = respond("有点难过");

    let strong_analysis = strong.analysis.unwrap();
    let mild_analysis = mild.analysis.unwrap();
    assert!(strong_analysis.score > mild_analysis.score);

    let tag = strong.tag.unwrap();
    assert!(is_negative_leaning(&tag));
    let response = strong_response.unwrap();
    assert!(response.asset_id.contains("comfort"));
    assert!(response.path.is_file());
}
