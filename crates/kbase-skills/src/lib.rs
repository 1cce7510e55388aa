//! Skill file generation and documentation export.
//!
//! Turns a directory of Markdown fragments into assistant skill files
//! (Claude `SKILL.md`, Gemini `skill.yaml`) and exports the documentation
//! together with its git history for the web viewer.

pub mod export;
pub mod generator;
pub mod history;
