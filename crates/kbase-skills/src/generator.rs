use std::path::{Path, PathBuf};

use kbase_core::{KbError, SkillConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File name of the metadata sidecar written next to a Claude skill.
pub const METADATA_FILE: &str = ".skill-metadata.json";

const GENERATOR_ID: &str = concat!("kbase-skills v", env!("CARGO_PKG_VERSION"));

/// One Markdown source fragment.
///
/// # Examples
///
/// ```
/// use kbase_skills::generator::DocSection;
///
/// let section = DocSection {
///     filename: "01-storage.md".into(),
///     content: "# Storage API".into(),
/// };
/// assert_eq!(section.filename, "01-storage.md");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSection {
    /// File name without directory.
    pub filename: String,
    /// Verbatim file content.
    pub content: String,
}

/// Provenance recorded alongside every generated skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub generated_at: String,
    pub source_path: String,
    pub generator: String,
    pub source_count: usize,
    /// SHA-256 over the ordered `(filename, content)` pairs.
    pub content_hash: String,
}

impl SkillMetadata {
    /// Build metadata for the given sections read from `source_path`.
    pub fn new(source_path: &Path, sections: &[DocSection]) -> Self {
        Self {
            generated_at: kbase_core::now_iso(),
            source_path: source_path.display().to_string(),
            generator: GENERATOR_ID.to_string(),
            source_count: sections.len(),
            content_hash: content_hash(sections),
        }
    }
}

/// Which assistant format(s) to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillTarget {
    Claude,
    Gemini,
    Both,
}

/// Outcome of a generation run, for reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReport {
    pub written: Vec<PathBuf>,
    pub section_count: usize,
    pub sources: Vec<String>,
    pub content_hash: String,
}

/// Read every `*.md` directly inside `docs_dir`, ordered by file name.
///
/// # Errors
///
/// Returns [`KbError::FileNotFound`] if `docs_dir` does not exist,
/// [`KbError::Validation`] if it is not a directory or holds no Markdown.
pub fn collect_sections(docs_dir: &Path) -> Result<Vec<DocSection>, KbError> {
    if !docs_dir.exists() {
        return Err(KbError::FileNotFound(docs_dir.to_path_buf()));
    }
    if !docs_dir.is_dir() {
        return Err(KbError::Validation(format!(
            "input path is not a directory: {}",
            docs_dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(docs_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    if paths.is_empty() {
        return Err(KbError::Validation(format!(
            "no .md files found in {}",
            docs_dir.display()
        )));
    }

    let mut sections = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!(file = %filename, bytes = content.len(), "collected section");
        sections.push(DocSection { filename, content });
    }
    Ok(sections)
}

/// Hash of the ordered sections; any rename, reorder or edit changes it.
pub fn content_hash(sections: &[DocSection]) -> String {
    let mut hasher = Sha256::new();
    for section in sections {
        hasher.update(section.filename.as_bytes());
        hasher.update([0u8]);
        hasher.update(section.content.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Render a Claude `SKILL.md`.
///
/// Header and overview, then every section in order preceded by a source
/// marker and followed by a rule, then a metadata footer.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use kbase_core::SkillConfig;
/// use kbase_skills::generator::{render_claude_skill, DocSection, SkillMetadata};
///
/// let sections = vec![DocSection { filename: "a.md".into(), content: "# A".into() }];
/// let meta = SkillMetadata::new(Path::new("docs"), &sections);
/// let skill = render_claude_skill(&sections, &meta, &SkillConfig::default()).unwrap();
/// assert!(skill.contains("<!-- Source: a.md -->"));
/// assert!(skill.ends_with("**End of Skill**"));
/// ```
pub fn render_claude_skill(
    sections: &[DocSection],
    meta: &SkillMetadata,
    skill: &SkillConfig,
) -> Result<String, KbError> {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# {}", skill.title));
    lines.push(String::new());
    lines.push(
        "> **Notice**: This skill was generated automatically from documentation. \
         Edit the sources, not this file."
            .into(),
    );
    lines.push(format!("> Source: `{}`", meta.source_path));
    lines.push(format!("> Generator: `{}`", meta.generator));
    lines.push(format!("> Generated: {}", meta.generated_at));
    lines.push(String::new());
    lines.push("---".into());
    lines.push(String::new());

    lines.push("## Overview".into());
    lines.push(String::new());
    lines.push(skill.overview.clone());
    lines.push(String::new());
    if !skill.activation.is_empty() {
        lines.push("**When to activate this skill:**".into());
        for trigger in &skill.activation {
            lines.push(format!("- {trigger}"));
        }
        lines.push(String::new());
    }
    lines.push("---".into());
    lines.push(String::new());

    for section in sections {
        lines.push(format!("<!-- Source: {} -->", section.filename));
        lines.push(String::new());
        lines.push(section.content.clone());
        lines.push(String::new());
        lines.push("---".into());
        lines.push(String::new());
    }

    lines.push("## Metadata".into());
    lines.push(String::new());
    lines.push("```json".into());
    lines.push(serde_json::to_string_pretty(meta)?);
    lines.push("```".into());
    lines.push(String::new());
    lines.push("---".into());
    lines.push(String::new());
    lines.push("**End of Skill**".into());

    Ok(lines.join("\n"))
}

#[derive(Serialize)]
struct GeminiSkill<'a> {
    name: &'a str,
    version: &'a str,
    description: String,
    metadata: GeminiMetadata<'a>,
    knowledge_base: Vec<KnowledgeEntry<'a>>,
}

#[derive(Serialize)]
struct GeminiMetadata<'a> {
    generated_at: &'a str,
    source_path: &'a str,
    generator: &'a str,
    content_hash: &'a str,
    poc_notice: &'static str,
}

#[derive(Serialize)]
struct KnowledgeEntry<'a> {
    source: &'a str,
    content: &'a str,
    format: &'static str,
}

/// Render a Gemini `skill.yaml`, keeping section order.
pub fn render_gemini_skill(
    sections: &[DocSection],
    meta: &SkillMetadata,
    skill: &SkillConfig,
) -> Result<String, KbError> {
    let doc = GeminiSkill {
        name: &skill.name,
        version: &skill.version,
        description: format!("{} for Gemini", skill.title),
        metadata: GeminiMetadata {
            generated_at: &meta.generated_at,
            source_path: &meta.source_path,
            generator: &meta.generator,
            content_hash: &meta.content_hash,
            poc_notice: "Generated from documentation. Not hand-maintained.",
        },
        knowledge_base: sections
            .iter()
            .map(|s| KnowledgeEntry {
                source: &s.filename,
                content: &s.content,
                format: "markdown",
            })
            .collect(),
    };
    Ok(serde_yaml::to_string(&doc)?)
}

/// Generate skill files for `target` from the Markdown in `docs_dir`.
///
/// `claude_out` receives the `SKILL.md` (and a sibling `.skill-metadata.json`);
/// `gemini_out` receives the YAML. Parent directories are created.
///
/// # Errors
///
/// Propagates collection and I/O errors. Returns [`KbError::Config`] if the
/// output path required by `target` is missing.
pub fn generate(
    docs_dir: &Path,
    target: SkillTarget,
    claude_out: Option<&Path>,
    gemini_out: Option<&Path>,
    skill: &SkillConfig,
) -> Result<GenerateReport, KbError> {
    let sections = collect_sections(docs_dir)?;
    let meta = SkillMetadata::new(docs_dir, &sections);
    let mut written = Vec::new();

    if matches!(target, SkillTarget::Claude | SkillTarget::Both) {
        let out = claude_out
            .ok_or_else(|| KbError::Config("no output path for the Claude skill".into()))?;
        let rendered = render_claude_skill(&sections, &meta, skill)?;
        write_file(out, &rendered)?;
        written.push(out.to_path_buf());

        let meta_path = out
            .parent()
            .unwrap_or(Path::new("."))
            .join(METADATA_FILE);
        write_file(&meta_path, &serde_json::to_string_pretty(&meta)?)?;
        written.push(meta_path);
    }

    if matches!(target, SkillTarget::Gemini | SkillTarget::Both) {
        let out = gemini_out
            .ok_or_else(|| KbError::Config("no output path for the Gemini skill".into()))?;
        let rendered = render_gemini_skill(&sections, &meta, skill)?;
        write_file(out, &rendered)?;
        written.push(out.to_path_buf());
    }

    Ok(GenerateReport {
        written,
        section_count: sections.len(),
        sources: sections.iter().map(|s| s.filename.clone()).collect(),
        content_hash: meta.content_hash,
    })
}

/// `true` if the docs changed since the metadata sidecar was written, or
/// if there is no readable sidecar.
///
/// # Errors
///
/// Propagates errors from reading the docs directory.
pub fn is_stale(docs_dir: &Path, metadata_path: &Path) -> Result<bool, KbError> {
    let sections = collect_sections(docs_dir)?;
    let current = content_hash(&sections);

    let Ok(raw) = std::fs::read_to_string(metadata_path) else {
        return Ok(true);
    };
    let stored: SkillMetadata = match serde_json::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %metadata_path.display(), error = %e, "unreadable skill metadata");
            return Ok(true);
        }
    };
    Ok(stored.content_hash != current)
}

fn write_file(path: &Path, content: &str) -> Result<(), KbError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}
