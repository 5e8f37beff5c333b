// src/project/memory.rs — In-process project catalog

use std::collections::HashMap;
use std::sync::RwLock;

use super::*;

#[derive(Default)]
struct Inner {
    projects: HashMap<String, ProjectSpec>,
    skills: HashMap<SkillRef, SkillDocument>,
    segments: HashMap<String, Vec<AdvantageSegment>>,
}

/// Catalog held entirely in memory. Used by tests and embedders.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: RwLock<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project: ProjectSpec) {
        if let Ok(mut inner) = self.inner.write() {
            inner.projects.insert(project.id.clone(), project);
        }
    }

    pub fn insert_skill(&self, id: &str, content: &str, last_score: Option<f64>) -> SkillRef {
        let skill_ref = SkillRef::new(id);
        if let Ok(mut inner) = self.inner.write() {
            inner.skills.insert(
                skill_ref.clone(),
                SkillDocument {
                    skill_ref: skill_ref.clone(),
                    name: id.to_string(),
                    content: content.to_string(),
                    last_score,
                },
            );
        }
        skill_ref
    }

    pub fn insert_segments(&self, project_id: &str, segments: Vec<AdvantageSegment>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.segments.insert(project_id.to_string(), segments);
        }
    }

    pub fn skill_count(&self) -> usize {
        self.inner.read().map(|i| i.skills.len()).unwrap_or(0)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("catalog lock poisoned")
}

impl ProjectCatalog for MemoryCatalog {
    fn project(&self, project_id: &str) -> anyhow::Result<Option<ProjectSpec>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.projects.get(project_id).cloned())
    }

    fn skill(&self, skill_ref: &SkillRef) -> anyhow::Result<Option<SkillDocument>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.skills.get(skill_ref).cloned())
    }

    fn save_candidate(
        &self,
        project_id: &str,
        draft: &CandidateDraft<'_>,
    ) -> anyhow::Result<SkillRef> {
        let id = candidate_id(project_id, draft.round, draft.index);
        Ok(self.insert_skill(&id, draft.content, None))
    }

    fn record_score(&self, skill_ref: &SkillRef, score: f64) -> anyhow::Result<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let doc = inner
            .skills
            .get_mut(skill_ref)
            .ok_or_else(|| anyhow::anyhow!("unknown skill '{}'", skill_ref))?;
        doc.last_score = Some(score);
        Ok(())
    }

    fn segments(&self, project_id: &str) -> anyhow::Result<Vec<AdvantageSegment>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.segments.get(project_id).cloned().unwrap_or_default())
    }
}
