// src/project/fs.rs — Filesystem-backed project catalog
//
// Workspace layout:
//   projects/<id>.toml        project definition
//   skills/<id>.md            skill documents (optional YAML frontmatter)
//   baselines/<id>.json       array of baseline cases
//   analysis/<project>.json   advantage segments from the analysis step
// Candidates are written into skills/ so they resolve like any other skill.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::frontmatter::{parse_skill_md, render_skill_md, SkillFrontmatter};
use super::*;
use crate::infra::config::{EvaluationConfig, EvaluationOverrides};

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    name: Option<String>,
    skills: Vec<String>,
    baseline: String,
    #[serde(default)]
    mode: Option<IterationMode>,
    #[serde(default)]
    evaluation: EvaluationOverrides,
}

/// Catalog reading projects, skills and baselines from a workspace directory.
pub struct FsCatalog {
    root: PathBuf,
    defaults: EvaluationConfig,
    default_mode: IterationMode,
}

impl FsCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            defaults: EvaluationConfig::default(),
            default_mode: IterationMode::default(),
        }
    }

    /// Global defaults applied when a project file leaves a setting out.
    pub fn with_defaults(mut self, evaluation: EvaluationConfig, mode: IterationMode) -> Self {
        self.defaults = evaluation;
        self.default_mode = mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn skill_path(&self, skill_ref: &SkillRef) -> PathBuf {
        self.root.join("skills").join(format!("{}.md", skill_ref.0))
    }

    fn load_baseline(&self, baseline: &str) -> anyhow::Result<Vec<BaselineCase>> {
        let path = self.root.join("baselines").join(format!("{baseline}.json"));
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("baseline '{}' ({}): {}", baseline, path.display(), e))?;
        let cases: Vec<BaselineCase> = serde_json::from_str(&content)?;
        Ok(cases)
    }
}

impl ProjectCatalog for FsCatalog {
    fn project(&self, project_id: &str) -> anyhow::Result<Option<ProjectSpec>> {
        let path = self.root.join("projects").join(format!("{project_id}.toml"));
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let file: ProjectFile = toml::from_str(&content)?;

        Ok(Some(ProjectSpec {
            id: project_id.to_string(),
            name: file.name.unwrap_or_else(|| project_id.to_string()),
            skills: file.skills.into_iter().map(SkillRef).collect(),
            cases: self.load_baseline(&file.baseline)?,
            evaluation: file.evaluation.apply(&self.defaults),
            mode: file.mode.unwrap_or(self.default_mode),
        }))
    }

    fn skill(&self, skill_ref: &SkillRef) -> anyhow::Result<Option<SkillDocument>> {
        let path = self.skill_path(skill_ref);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let (fm, body) = parse_skill_md(&raw)?;
        Ok(Some(SkillDocument {
            skill_ref: skill_ref.clone(),
            name: fm.name.unwrap_or_else(|| skill_ref.0.clone()),
            content: body,
            last_score: fm.last_score,
        }))
    }

    fn save_candidate(
        &self,
        project_id: &str,
        draft: &CandidateDraft<'_>,
    ) -> anyhow::Result<SkillRef> {
        let skill_ref = SkillRef(candidate_id(project_id, draft.round, draft.index));
        let fm = SkillFrontmatter {
            name: Some(skill_ref.0.clone()),
            parent: Some(draft.parent.0.clone()),
            strategy: Some(draft.strategy.to_string()),
            round: Some(draft.round),
            ..Default::default()
        };
        let path = self.skill_path(&skill_ref);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, render_skill_md(&fm, draft.content)?)?;
        Ok(skill_ref)
    }

    fn record_score(&self, skill_ref: &SkillRef, score: f64) -> anyhow::Result<()> {
        let path = self.skill_path(skill_ref);
        let raw = std::fs::read_to_string(&path)?;
        let (mut fm, body) = parse_skill_md(&raw)?;
        fm.last_score = Some(score);
        std::fs::write(&path, render_skill_md(&fm, &body)?)?;
        Ok(())
    }

    fn segments(&self, project_id: &str) -> anyhow::Result<Vec<AdvantageSegment>> {
        let path = self.root.join("analysis").join(format!("{project_id}.json"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
