//! Integration tests for the survey translator
//!
//! These tests run the whole pipeline against files in a temp directory and a
//! mocked model endpoint: table in, canned overrides and cache on disk, filled
//! table and cache log out.

use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

use survey_translator::{
    cache::{CacheRecord, TranslationCache},
    canned::CannedTable,
    gateway::{CallOptions, GatewayConfig, ModelGateway},
    orchestrator::{Orchestrator, RunSettings},
    prompt::PromptTemplate,
    table::{filled_output_path, SourceTable},
};

// ==================== Test Helpers ====================

fn chat_reply(content: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content.to_string()}}],
        "usage": {"prompt_tokens": 100, "completion_tokens": 20}
    }))
}

fn raw_chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

/// Build an orchestrator over `data/` and `outputs/logs/` inside `root`
fn create_orchestrator(server: &MockServer, root: &Path, settings: RunSettings) -> Orchestrator {
    let canned = CannedTable::load(&root.join("data").join("canned_translations.json"))
        .expect("Failed to load canned table");
    let cache = TranslationCache::load(&root.join("data").join("tmp_cache.jsonl"))
        .expect("Failed to load cache");
    let gateway = ModelGateway::new(
        GatewayConfig::new("test-openai-key", server.uri(), root.join("outputs").join("logs"))
            .with_retry_base_delay(Duration::from_millis(5)),
    )
    .expect("Failed to build gateway");

    Orchestrator::new(canned, cache, gateway, PromptTemplate::default(), settings)
}

fn test_settings() -> RunSettings {
    RunSettings {
        batch_size: 10,
        call: CallOptions {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            ..CallOptions::default()
        },
        dry_run: false,
    }
}

fn write_canned(root: &Path, content: &str) {
    let data = root.join("data");
    std::fs::create_dir_all(&data).expect("Failed to create data dir");
    std::fs::write(data.join("canned_translations.json"), content).expect("Failed to write canned");
}

fn read_cache_records(root: &Path) -> Vec<CacheRecord> {
    std::fs::read_to_string(root.join("data").join("tmp_cache.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("cache line should be valid JSON"))
        .collect()
}

// ==================== End-to-end ====================

#[tokio::test]
async fn test_end_to_end_canned_and_model() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    write_canned(root, r#"{"Strongly agree": {"IT": "Fortemente d'accordo"}}"#);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("ROW_1 || Purple elephant"))
        .respond_with(chat_reply(json!({"ROW_1": "Elefante viola"})))
        .expect(1)
        .mount(&server)
        .await;

    let input = root.join("survey.csv");
    std::fs::write(&input, "en,IT\nStrongly agree,\nPurple elephant,\n").unwrap();

    let mut table = SourceTable::load(&input, "en").unwrap();
    let mut orchestrator = create_orchestrator(&server, root, test_settings());
    let report = orchestrator
        .run(&mut table, &["IT".to_string()])
        .await
        .expect("run should succeed");

    let it = table.column_index("IT").unwrap();
    assert_eq!(table.column(it), vec!["Fortemente d'accordo", "Elefante viola"]);

    let lang = report.language("IT").unwrap();
    assert_eq!(lang.canned_hits, 1);
    assert_eq!(lang.model_translated, 1);
    assert_eq!(lang.model_calls, 1);

    // Only the model result is cached; the canned hit is not
    let records = read_cache_records(root);
    assert_eq!(
        records,
        vec![CacheRecord {
            en: "Purple elephant".to_string(),
            lang: "IT".to_string(),
            translation: "Elefante viola".to_string(),
        }]
    );

    // Canned item never reached the model
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!String::from_utf8_lossy(&requests[0].body).contains("Strongly agree"));

    // Output file is written with a BOM and reloads cleanly
    let output = filled_output_path(&input, &root.join("outputs").join("translated_csv"));
    table.write(&output).unwrap();
    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.starts_with("\u{feff}".as_bytes()));
    let reloaded = SourceTable::load(&output, "en").unwrap();
    assert_eq!(reloaded.get(1, it), "Elefante viola");

    // One "ok" line in today's call log
    let log_dir = root.join("outputs").join("logs");
    let log_files: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
    assert_eq!(log_files.len(), 1);
    let log = std::fs::read_to_string(log_files[0].as_ref().unwrap().path()).unwrap();
    let line: Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(line["status"], "ok");
    assert_eq!(line["language"], "IT");
}

#[tokio::test]
async fn test_rerun_is_idempotent_across_processes() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\\\"sv\\\""))
        .respond_with(chat_reply(json!({"ROW_0": "Ja", "ROW_1": "Nej"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\\\"nl\\\""))
        .respond_with(chat_reply(json!({"ROW_0": "Ja", "ROW_1": "Nee"})))
        .expect(1)
        .mount(&server)
        .await;

    let languages = vec!["sv".to_string(), "nl".to_string()];

    let mut first = SourceTable::parse("en\nYes\nNo\n", "en").unwrap();
    let report = create_orchestrator(&server, root, test_settings())
        .run(&mut first, &languages)
        .await
        .unwrap();
    assert_eq!(report.model_calls(), 2);

    let mut second = SourceTable::parse("en\nYes\nNo\n", "en").unwrap();
    let report = create_orchestrator(&server, root, test_settings())
        .run(&mut second, &languages)
        .await
        .unwrap();
    assert_eq!(report.model_calls(), 0);
    assert_eq!(report.resolved(), 4);

    for lang in &languages {
        let col = first.column_index(lang).unwrap();
        assert_eq!(first.column(col), second.column(second.column_index(lang).unwrap()));
    }
}

#[tokio::test]
async fn test_repaired_reply_is_merged_and_cached() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    Mock::given(method("POST"))
        .and(body_string_contains("JSON validator"))
        .respond_with(raw_chat_reply(r#"{"ROW_0": "Evet"}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(raw_chat_reply("Sure! {'ROW_0': 'Evet'}"))
        .expect(1)
        .mount(&server)
        .await;

    let mut table = SourceTable::parse("en\nYes\n", "en").unwrap();
    let mut orchestrator = create_orchestrator(&server, root, test_settings());
    orchestrator.run(&mut table, &["tr".to_string()]).await.unwrap();

    assert_eq!(table.get(0, table.column_index("tr").unwrap()), "Evet");
    assert_eq!(orchestrator.cache().lookup("Yes", "tr"), Some("Evet"));
}

#[tokio::test]
async fn test_existing_translations_are_kept() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    Mock::given(method("POST"))
        .and(body_string_contains("ROW_1 || No"))
        .respond_with(chat_reply(json!({"ROW_1": "Não"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut table = SourceTable::parse("en,pt-br\nYes,Sim (revisado)\nNo,\n", "en").unwrap();
    let mut orchestrator = create_orchestrator(&server, temp_dir.path(), test_settings());
    let report = orchestrator
        .translate_language(&mut table, "pt-br")
        .await
        .unwrap();

    assert_eq!(report.pending, 1);
    let col = table.column_index("pt-br").unwrap();
    assert_eq!(table.column(col), vec!["Sim (revisado)", "Não"]);
}

// ==================== Cache persistence ====================

#[test]
fn test_cache_roundtrip_and_corrupt_lines() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache_path = temp_dir.path().join("data").join("tmp_cache.jsonl");

    let mut cache = TranslationCache::load(&cache_path).unwrap();
    cache
        .update(
            [("Strongly  agree", "Fortemente d'accordo"), ("Çok iyi", "Molto bene")],
            "it",
        )
        .unwrap();
    cache.update([("Strongly agree", "Helt enig")], "sv").unwrap();

    // Simulate a crash mid-write
    let mut content = std::fs::read_to_string(&cache_path).unwrap();
    content.push_str("{\"en\": \"truncated\", \"lang\": \"it\", \"transl");
    std::fs::write(&cache_path, content).unwrap();

    let reloaded = TranslationCache::load(&cache_path).unwrap();
    assert_eq!(reloaded.skipped_lines(), 1);
    assert_eq!(reloaded.record_count(), 3);
    assert_eq!(reloaded.lookup("Strongly agree", "it"), Some("Fortemente d'accordo"));
    assert_eq!(reloaded.lookup("Strongly agree", "sv"), Some("Helt enig"));
    assert_eq!(reloaded.lookup("Çok iyi", "it"), Some("Molto bene"));

    // Non-ASCII text is stored verbatim
    let raw = std::fs::read_to_string(&cache_path).unwrap();
    assert!(raw.contains("Çok iyi"));
}

#[test]
fn test_find_similar_over_persisted_cache() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache_path = temp_dir.path().join("tmp_cache.jsonl");

    let mut cache = TranslationCache::load(&cache_path).unwrap();
    cache
        .update(
            [
                ("How satisfied are you with our service?", "a"),
                ("How satisfied are you with our services?", "b"),
                ("What is your age?", "c"),
            ],
            "it",
        )
        .unwrap();

    let reloaded = TranslationCache::load(&cache_path).unwrap();
    let similar = reloaded.find_similar("How satisfied are you with our service?", 0.92, 5);
    assert_eq!(
        similar,
        vec![
            "How satisfied are you with our service?".to_string(),
            "How satisfied are you with our services?".to_string(),
        ]
    );
}
