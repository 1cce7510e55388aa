use kbase_core::{LlmConfig, TriageConfig};
use kbase_metrics::TriageStats;
use kbase_triage::{
    IssueReport, LlmClient, MergeDecision, SelfHealingLoop, TriageDecision, TriageOutcome,
};
use mockito::Matcher;

fn completion(content: serde_json::Value) -> String {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }]
    })
    .to_string()
}

fn llm(server: &mockito::ServerGuard) -> LlmClient {
    LlmClient::new(&LlmConfig {
        api_key: Some("sk-test".into()),
        base_url: Some(server.url()),
        max_retries: 0,
        retry_base_delay_ms: 1,
        ..LlmConfig::default()
    })
    .unwrap()
}

fn issue() -> IssueReport {
    IssueReport {
        number: 21,
        title: "Storage token header is outdated".into(),
        body: "docs/02-storage.md still says X-Token".into(),
        labels: vec![],
    }
}

async fn mock_stage(
    server: &mut mockito::ServerGuard,
    prompt_marker: &str,
    answer: serde_json::Value,
) -> mockito::Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::Regex(prompt_marker.to_string()))
        .with_status(200)
        .with_body(completion(answer))
        .expect(1)
        .create_async()
        .await
}

#[tokio::test]
async fn confident_docs_issue_is_fixed_and_auto_merged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("docs")).unwrap();
    std::fs::write(
        dir.path().join("docs/02-storage.md"),
        "# Storage\n\nSend the X-Token header.\n",
    )
    .unwrap();

    let mut server = mockito::Server::new_async().await;
    let triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({
            "category": "outdated",
            "confidence": 0.93,
            "priority": "high",
            "summary": "Header name changed",
            "affected_files": ["docs/02-storage.md"]
        }),
    )
    .await;
    let fix = mock_stage(
        &mut server,
        "You fix documentation problems",
        serde_json::json!({
            "changes": [{
                "file": "docs/02-storage.md",
                "original": "X-Token",
                "replacement": "X-StorageApi-Token",
                "rationale": "Header was renamed"
            }],
            "pr_title": "Update storage token header",
            "pr_body": "Renames the header.",
            "confidence": 0.9
        }),
    )
    .await;
    let review = mock_stage(
        &mut server,
        "You review proposed documentation",
        serde_json::json!({"score": 9, "approve": true, "concerns": []}),
    )
    .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), dir.path());
    let mut stats = TriageStats::default();
    let report = pipeline.run(&issue(), true, &mut stats).await.unwrap();

    assert_eq!(report.outcome.decision(), Some(TriageDecision::ProposeFix));
    assert_eq!(report.merge, Some(MergeDecision::AutoMerge));
    assert_eq!(report.applied.as_ref().unwrap().applied.len(), 1);
    assert!(report
        .pr_description
        .as_deref()
        .unwrap()
        .starts_with("Fixes #21"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("docs/02-storage.md")).unwrap(),
        "# Storage\n\nSend the X-StorageApi-Token header.\n"
    );
    assert_eq!(stats.triaged_issues, 1);
    assert_eq!(stats.high_confidence_issues, 1);
    assert_eq!(stats.prs_created, 1);
    assert_eq!(stats.prs_merged, 1);
    assert!(report.fix_record().is_some());

    triage.assert_async().await;
    fix.assert_async().await;
    review.assert_async().await;
}

#[tokio::test]
async fn dry_run_leaves_files_untouched() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "teh docs\n").unwrap();

    let mut server = mockito::Server::new_async().await;
    let _triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({"category": "documentation", "confidence": "95%", "affected_files": ["README.md"]}),
    )
    .await;
    let _fix = mock_stage(
        &mut server,
        "You fix documentation problems",
        serde_json::json!({"changes": [{"file": "README.md", "original": "teh", "replacement": "the"}]}),
    )
    .await;
    let _review = mock_stage(
        &mut server,
        "You review proposed documentation",
        serde_json::json!({"score": 2, "approve": false, "concerns": ["changes meaning"]}),
    )
    .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), dir.path());
    let mut stats = TriageStats::default();
    let report = pipeline.run(&issue(), false, &mut stats).await.unwrap();

    assert_eq!(report.merge, Some(MergeDecision::Reject));
    assert!(report.applied.is_none());
    assert_eq!(stats.prs_created, 0);
    assert_eq!(std::fs::read_to_string(dir.path().join("README.md")).unwrap(), "teh docs\n");
}

#[tokio::test]
async fn vague_issue_stops_after_triage() {
    let mut server = mockito::Server::new_async().await;
    let triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({"category": "question", "confidence": 0.3, "priority": "low"}),
    )
    .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), ".");
    let mut stats = TriageStats::default();
    let report = pipeline.run(&issue(), true, &mut stats).await.unwrap();

    assert_eq!(report.outcome.decision(), Some(TriageDecision::NeedsInfo));
    assert!(report.fix.is_none());
    assert!(report.fix_record().is_none());
    assert_eq!(stats.total_issues, 1);
    triage.assert_async().await;
}

#[tokio::test]
async fn unusable_triage_counts_but_is_not_triaged() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(
            serde_json::json!({
                "choices": [{ "message": { "content": "Sorry, I cannot help with that." } }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), ".");
    let mut stats = TriageStats::default();
    let outcome = pipeline.triage(&issue(), &mut stats).await.unwrap();

    assert!(matches!(outcome, TriageOutcome::Failed { .. }));
    assert_eq!(outcome.labels(), vec!["triage-failed"]);
    assert_eq!(stats.total_issues, 1);
    assert_eq!(stats.triaged_issues, 0);
}

#[tokio::test]
async fn saved_fix_merge_is_counted_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "teh docs\n").unwrap();

    let mut server = mockito::Server::new_async().await;
    let _triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({"category": "documentation", "confidence": 0.95, "affected_files": ["README.md"]}),
    )
    .await;
    let _fix = mock_stage(
        &mut server,
        "You fix documentation problems",
        serde_json::json!({"changes": [{"file": "README.md", "original": "teh", "replacement": "the"}]}),
    )
    .await;
    let review = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::Regex("You review proposed documentation".into()))
        .with_status(200)
        .with_body(completion(serde_json::json!({"score": 9, "approve": true, "concerns": []})))
        .expect(3)
        .create_async()
        .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), dir.path());
    let mut stats = TriageStats::default();
    let report = pipeline.run(&issue(), true, &mut stats).await.unwrap();
    assert_eq!(report.merge, Some(MergeDecision::AutoMerge));

    let mut record = report.fix_record().unwrap();
    assert!(record.merged);
    for _ in 0..2 {
        let (_, decision) = pipeline.review_record(&mut record, &mut stats).await.unwrap();
        assert_eq!(decision, MergeDecision::AutoMerge);
    }

    assert_eq!(stats.prs_created, 1);
    assert_eq!(stats.prs_merged, 1);
    assert!(stats.pr_merge_rate <= 100.0);
    review.assert_async().await;
}

#[tokio::test]
async fn unmerged_record_is_counted_on_first_approval() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "teh docs\n").unwrap();

    let mut server = mockito::Server::new_async().await;
    let _triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({"category": "documentation", "confidence": 0.95, "affected_files": ["README.md"]}),
    )
    .await;
    let _fix = mock_stage(
        &mut server,
        "You fix documentation problems",
        serde_json::json!({"changes": [{"file": "README.md", "original": "teh", "replacement": "the"}]}),
    )
    .await;
    let _review = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::Regex("You review proposed documentation".into()))
        .with_status(200)
        .with_body(completion(serde_json::json!({"score": 9, "approve": true, "concerns": []})))
        .expect(3)
        .create_async()
        .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), dir.path());
    let mut stats = TriageStats::default();
    let report = pipeline.run(&issue(), true, &mut stats).await.unwrap();

    // Same record as saved before the merge was counted.
    let mut record = report.fix_record().unwrap();
    record.merged = false;
    stats.prs_merged = 0;

    pipeline.review_record(&mut record, &mut stats).await.unwrap();
    pipeline.review_record(&mut record, &mut stats).await.unwrap();
    assert!(record.merged);
    assert_eq!(stats.prs_merged, 1);
}

#[tokio::test]
async fn rejected_fix_is_not_applied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "teh docs\n").unwrap();

    let mut server = mockito::Server::new_async().await;
    let _triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({"category": "documentation", "confidence": 0.95, "affected_files": ["README.md"]}),
    )
    .await;
    let _fix = mock_stage(
        &mut server,
        "You fix documentation problems",
        serde_json::json!({"changes": [{"file": "README.md", "original": "teh", "replacement": "the"}]}),
    )
    .await;
    let _review = mock_stage(
        &mut server,
        "You review proposed documentation",
        serde_json::json!({"score": 1, "approve": false, "concerns": ["wrong file"]}),
    )
    .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), dir.path());
    let mut stats = TriageStats::default();
    let report = pipeline.run(&issue(), true, &mut stats).await.unwrap();

    assert_eq!(report.merge, Some(MergeDecision::Reject));
    assert!(report.applied.is_none());
    assert!(report.pr_description.is_none());
    assert_eq!(stats.prs_created, 0);
    assert_eq!(std::fs::read_to_string(dir.path().join("README.md")).unwrap(), "teh docs\n");
}

#[tokio::test]
async fn failed_fix_stage_keeps_triage_counts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "teh docs\n").unwrap();

    let mut server = mockito::Server::new_async().await;
    let _triage = mock_stage(
        &mut server,
        "You triage issues",
        serde_json::json!({"category": "documentation", "confidence": 0.95, "affected_files": ["README.md"]}),
    )
    .await;
    let _fix = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::Regex("You fix documentation problems".into()))
        .with_status(500)
        .with_body("upstream down")
        .create_async()
        .await;

    let pipeline = SelfHealingLoop::new(llm(&server), TriageConfig::default(), dir.path());
    let mut stats = TriageStats::default();
    assert!(pipeline.run(&issue(), true, &mut stats).await.is_err());

    assert_eq!(stats.total_issues, 1);
    assert_eq!(stats.triaged_issues, 1);
    assert_eq!(stats.high_confidence_issues, 1);
    assert_eq!(stats.prs_created, 0);

    let path = dir.path().join("triage-stats.json");
    stats.save(&path).unwrap();
    assert_eq!(TriageStats::load(&path).unwrap().triaged_issues, 1);
}
