//! Per-project command-pattern matcher cache, mirroring the lazy project
//! cache in [`crate::policy::PolicyEngine`]: a project's `hostexec` patterns
//! are loaded on first request and kept until the next `invalidate`/`reload`.

use crate::command::CommandMatcher;
use crate::config::ProjectLoader;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lazily compiles and caches one [`CommandMatcher`] per project, merging the
/// global `hostexec` patterns (checked first) with the project's own overlay.
pub struct CommandMatcherRegistry {
    global_auto: Vec<String>,
    global_manual: Vec<String>,
    loader: Arc<dyn ProjectLoader>,
    cache: RwLock<HashMap<String, Arc<CommandMatcher>>>,
}

impl CommandMatcherRegistry {
    pub fn new(global_auto: Vec<String>, global_manual: Vec<String>, loader: Arc<dyn ProjectLoader>) -> Self {
        Self {
            global_auto,
            global_manual,
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the matcher for `project`, compiling and caching it on first
    /// use. A project with neither global nor project-specific patterns gets
    /// an empty matcher — callers check [`CommandMatcher::is_empty`] and deny
    /// with "no approval patterns configured" rather than treating this as
    /// an error.
    pub fn get(&self, project: &str) -> anyhow::Result<Arc<CommandMatcher>> {
        if let Some(matcher) = self.cache.read().expect("command matcher cache poisoned").get(project) {
            return Ok(matcher.clone());
        }

        let (config, _decisions) = self.loader.load(project)?;
        let mut auto = self.global_auto.clone();
        auto.extend(config.hostexec.auto_approve.into_iter().map(|p| p.pattern));
        let mut manual = self.global_manual.clone();
        manual.extend(config.hostexec.manual_approve.into_iter().map(|p| p.pattern));

        let matcher = Arc::new(CommandMatcher::compile(&auto, &manual));
        self.cache
            .write()
            .expect("command matcher cache poisoned")
            .insert(project.to_string(), matcher.clone());
        Ok(matcher)
    }

    /// Drop every cached matcher, forcing a reload from disk on next access.
    /// Called on SIGHUP alongside [`crate::policy::PolicyEngine::reload`].
    pub fn reload(&self) {
        self.cache.write().expect("command matcher cache poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecisionsFile, GuardianConfig};
    use anyhow::Result;

    struct FakeLoader;
    impl ProjectLoader for FakeLoader {
        fn load(&self, project: &str) -> Result<(GuardianConfig, DecisionsFile)> {
            let mut config = GuardianConfig::default();
            if project == "demo" {
                config.hostexec.auto_approve.push(crate::config::PatternEntry {
                    pattern: "^ls$".to_string(),
                });
            }
            Ok((config, DecisionsFile::default()))
        }
    }

    #[test]
    fn test_merges_global_and_project_patterns() {
        let registry = CommandMatcherRegistry::new(
            vec!["^docker compose ps$".to_string()],
            vec![],
            Arc::new(FakeLoader),
        );
        let matcher = registry.get("demo").unwrap();
        assert!(matches!(
            matcher.match_command("docker compose ps"),
            crate::command::MatchResult::Matched { .. }
        ));
        assert!(matches!(matcher.match_command("ls"), crate::command::MatchResult::Matched { .. }));
    }

    #[test]
    fn test_empty_project_yields_empty_matcher() {
        let registry = CommandMatcherRegistry::new(vec![], vec![], Arc::new(FakeLoader));
        let matcher = registry.get("other").unwrap();
        assert!(matcher.is_empty());
    }

    #[test]
    fn test_reload_clears_cache() {
        let registry = CommandMatcherRegistry::new(vec![], vec![], Arc::new(FakeLoader));
        let first = registry.get("demo").unwrap();
        registry.reload();
        let second = registry.get("demo").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
