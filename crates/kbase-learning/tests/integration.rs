use kbase_core::LlmConfig;
use kbase_learning::{analyze, export_learnings, write_export, LearningStore};
use kbase_triage::LlmClient;

#[tokio::test]
async fn captured_gap_flows_to_export() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join(".kbase/memory.db");

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(
            serde_json::json!({
                "choices": [{ "message": { "content": serde_json::json!({
                    "has_gap": true,
                    "concept": "Storage API",
                    "gap_type": "missing_info",
                    "proposed_fix": "Document the rate limit headers"
                }).to_string() } }]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let llm = LlmClient::new(&LlmConfig {
        api_key: Some("sk-test".into()),
        base_url: Some(server.url()),
        max_retries: 0,
        ..LlmConfig::default()
    })
    .unwrap();

    let learning_id = {
        let store = LearningStore::open(&db).unwrap();
        let id = store
            .capture("What are the storage rate limits?", "I am not sure.", None)
            .unwrap();
        store.add_feedback(id, 1, "not helpful").unwrap();

        let interaction = store.get_interaction(id).unwrap();
        let analysis = analyze(&llm, &interaction).await.unwrap();
        assert!(analysis.has_gap);
        store.store_learning(id, &analysis).unwrap()
    };
    mock.assert_async().await;

    {
        let store = LearningStore::open(&db).unwrap();
        store.mark_issued(learning_id, 77).unwrap();
        assert!(store.pending_learnings().unwrap().is_empty());
    }

    let export = export_learnings(&db).unwrap();
    assert_eq!(export.metadata.interaction_count, 1);
    assert_eq!(export.metadata.learning_count, 1);
    assert!(export.metadata.note.is_none());

    let out = dir.path().join("web/data/learnings.json");
    write_export(&export, &out).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
    assert_eq!(json["learnings"][0]["status"], "issued");
    assert_eq!(json["learnings"][0]["issue_number"], 77);
    assert_eq!(json["interactions"][0]["created_issue_id"], 77);
    assert_eq!(json["interactions"][0]["user_feedback"], "Rating: 1/5. not helpful");
    assert!(json["metadata"].get("note").is_none());
}
