//! Integration test: collect → render → write → staleness check on a fixture docs tree.

use std::fs;

use kbase_core::SkillConfig;
use kbase_skills::generator::{self, SkillTarget, METADATA_FILE};

#[test]
fn generated_skill_tracks_doc_changes() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("01-intro.md"), "# Intro\n\nPlatform basics.\n").unwrap();
    fs::write(docs.join("02-storage.md"), "# Storage API\n\nBuckets and tables.\n").unwrap();

    let out = dir.path().join("claude/kbase-core/SKILL.md");
    let report = generator::generate(&docs, SkillTarget::Claude, Some(&out), None, &SkillConfig::default())
        .unwrap();
    assert_eq!(report.sources, vec!["01-intro.md", "02-storage.md"]);

    let skill = fs::read_to_string(&out).unwrap();
    assert!(skill.starts_with("# Platform Knowledge for AI Coding Assistants"));
    assert!(skill.contains("Buckets and tables."));

    let meta_path = out.parent().unwrap().join(METADATA_FILE);
    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&meta_path).unwrap()).unwrap();
    assert_eq!(meta["source_count"], 2);
    assert_eq!(meta["content_hash"], report.content_hash);

    assert!(!generator::is_stale(&docs, &meta_path).unwrap());
    fs::write(docs.join("01-intro.md"), "# Intro\n\nChanged.\n").unwrap();
    assert!(generator::is_stale(&docs, &meta_path).unwrap());

    generator::generate(&docs, SkillTarget::Claude, Some(&out), None, &SkillConfig::default()).unwrap();
    assert!(!generator::is_stale(&docs, &meta_path).unwrap());
}
