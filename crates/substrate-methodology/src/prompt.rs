/// Separates built-in prompt bodies from the runner, the way the teacher
/// separates built-in agent definitions from markdown-frontmatter-loaded
/// custom ones. Prompt-engineering content itself is out of scope here;
/// this trait only lets tests and a real methodology pack supply bodies.
pub trait PromptTemplateSource: Send + Sync {
    fn load(&self, task_type: &str) -> anyhow::Result<String>;
}

/// In-memory template source keyed by `task_type`. Used by tests and as a
/// minimal default for callers that don't need file-backed templates.
pub struct StaticTemplateSource {
    templates: std::collections::HashMap<String, String>,
}

impl StaticTemplateSource {
    pub fn new(templates: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            templates: templates.into_iter().collect(),
        }
    }
}

impl PromptTemplateSource for StaticTemplateSource {
    fn load(&self, task_type: &str) -> anyhow::Result<String> {
        self.templates
            .get(task_type)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no prompt template registered for task type `{task_type}`"))
    }
}
