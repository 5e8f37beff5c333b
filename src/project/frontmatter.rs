// src/project/frontmatter.rs — Optional YAML frontmatter on skill documents

use serde::{Deserialize, Serialize};

/// Metadata carried at the top of a skill markdown file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillFrontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

/// Split a skill document into frontmatter and body.
///
/// Format:
/// ```text
/// ---
/// name: summarizer
/// last_score: 81.5
/// ---
/// # Body content (markdown)
/// ```
/// Documents without a leading `---` have no frontmatter.
pub fn parse_skill_md(content: &str) -> anyhow::Result<(SkillFrontmatter, String)> {
    if !content.starts_with("---") {
        return Ok((SkillFrontmatter::default(), content.to_string()));
    }

    let after_first = &content[3..];
    let end_idx = after_first
        .find("\n---")
        .ok_or_else(|| anyhow::anyhow!("Missing closing --- for YAML frontmatter"))?;

    let yaml_str = &after_first[..end_idx];
    let body_start = 3 + end_idx + 4;
    let body = if body_start < content.len() {
        content[body_start..].trim_start_matches(['\r', '\n']).to_string()
    } else {
        String::new()
    };

    let frontmatter: SkillFrontmatter = if yaml_str.trim().is_empty() {
        SkillFrontmatter::default()
    } else {
        serde_yml::from_str(yaml_str)?
    };

    Ok((frontmatter, body))
}

/// Render a skill document, omitting the frontmatter block when empty.
pub fn render_skill_md(frontmatter: &SkillFrontmatter, body: &str) -> anyhow::Result<String> {
    if *frontmatter == SkillFrontmatter::default() {
        return Ok(body.to_string());
    }
    let yaml = serde_yml::to_string(frontmatter)?;
    Ok(format!("---\n{}---\n{}", yaml, body))
}
