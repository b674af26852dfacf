//! Template context: serializable rendering payload for one repository.

use serde::{Deserialize, Serialize};

use fleet_core::{ClassificationResult, RepoTarget};

use crate::error::TemplateError;

/// Values every baseline template can reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderContext {
    pub repo_name: String,
    pub repo_path: String,
    /// Lowercase platform name (`joomla`, `dolibarr`, `generic`).
    pub platform_type: String,
    pub confidence: u8,
    pub org: Option<String>,
    /// `fleet <version>`, stamped into managed-file headers.
    pub generator: String,
}

impl RenderContext {
    pub fn new(target: &RepoTarget, classification: &ClassificationResult) -> Self {
        Self {
            repo_name: target.id.0.clone(),
            repo_path: target.path.display().to_string(),
            platform_type: classification.platform_type.to_string(),
            confidence: classification.confidence,
            org: target.org.clone(),
            generator: format!("fleet {}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, TemplateError> {
        tera::Context::from_serialize(self).map_err(TemplateError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::PlatformType;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn context_fields_populated() {
        let target = RepoTarget::from_path(PathBuf::from("/fleet/acme/com_widgets"), Some("acme".into()));
        let classification = ClassificationResult {
            platform_type: PlatformType::Joomla,
            confidence: 80,
            indicators: vec![],
            metadata: BTreeMap::new(),
        };
        let ctx = RenderContext::new(&target, &classification);
        assert_eq!(ctx.repo_name, "com_widgets");
        assert_eq!(ctx.platform_type, "joomla");
        assert_eq!(ctx.org.as_deref(), Some("acme"));
        assert!(ctx.generator.starts_with("fleet "));
        ctx.to_tera_context().expect("context conversion");
    }
}
