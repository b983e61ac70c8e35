//! Module Registry
//!
//! Holds named modules with their declared dependencies, starts them in
//! dependency order and stops them in the exact reverse of the order that
//! was actually achieved.

use super::Module;
use crate::context::SharedContext;
use crate::lifecycle::{EngineError, Failure, GraphProblem, Result};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

struct ModuleEntry {
    name: String,
    depends_on: Vec<String>,
    module: Arc<dyn Module>,
    instance: Arc<dyn Any + Send + Sync>,
}

/// Registry of named modules
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = ModuleRegistry::new();
/// registry.register("config", ConfigModule::new(), &[]);
/// registry.register("logger", LoggerModule::new(), &["config"]);
///
/// registry.start_all(&shared).await?;   // config, logger
/// // ... engine runs ...
/// registry.stop_all(&shared).await?;    // logger, config
/// ```
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
    started: Mutex<Vec<usize>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name`, to be started after `depends_on`.
    ///
    /// Problems with the graph (duplicates, unknown names, cycles) are
    /// reported by [`start_all`](Self::start_all) before anything starts.
    pub fn register<M: Module>(
        &mut self,
        name: impl Into<String>,
        module: M,
        depends_on: &[&str],
    ) -> &mut Self {
        self.register_arc(name, Arc::new(module), depends_on)
    }

    /// Register a module the caller keeps a handle to.
    pub fn register_arc<M: Module>(
        &mut self,
        name: impl Into<String>,
        module: Arc<M>,
        depends_on: &[&str],
    ) -> &mut Self {
        let name = name.into();
        tracing::debug!(module = %name, ?depends_on, "Registering module");
        self.entries.push(ModuleEntry {
            name,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            module: Arc::clone(&module) as Arc<dyn Module>,
            instance: module,
        });
        self
    }

    /// Append every module of `other` after the ones already registered.
    pub(crate) fn extend(&mut self, other: ModuleRegistry) {
        self.entries.extend(other.entries);
    }

    /// Look up a module by name and concrete type.
    pub fn get<M: Module>(&self, name: &str) -> Option<Arc<M>> {
        let entry = self.entries.iter().find(|entry| entry.name == name)?;
        Arc::clone(&entry.instance).downcast::<M>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Registered module names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute a start order in which every module follows its dependencies.
    ///
    /// Among modules whose dependencies are satisfied, registration order wins.
    pub fn resolve_order(&self) -> Result<Vec<&str>> {
        Ok(self
            .resolve_indices()?
            .into_iter()
            .map(|index| self.entries[index].name.as_str())
            .collect())
    }

    fn resolve_indices(&self) -> Result<Vec<usize>> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.name.as_str()) {
                problems.push(GraphProblem::DuplicateModule(entry.name.clone()));
            }
        }
        for entry in &self.entries {
            for dependency in &entry.depends_on {
                if !seen.contains(dependency.as_str()) {
                    problems.push(GraphProblem::UnknownDependency {
                        module: entry.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        // Unknown dependencies are already reported; treat them as satisfied
        // so only genuine cycles show up below.
        let mut order: Vec<usize> = Vec::with_capacity(self.entries.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while order.len() < self.entries.len() {
            let next = self.entries.iter().enumerate().find(|(index, entry)| {
                !order.contains(index)
                    && entry.depends_on.iter().all(|dependency| {
                        placed.contains(dependency.as_str()) || !seen.contains(dependency.as_str())
                    })
            });
            match next {
                Some((index, entry)) => {
                    order.push(index);
                    placed.insert(entry.name.as_str());
                }
                None => {
                    let stuck = self
                        .entries
                        .iter()
                        .filter(|entry| !placed.contains(entry.name.as_str()))
                        .map(|entry| entry.name.clone())
                        .collect();
                    problems.push(GraphProblem::Cycle(stuck));
                    break;
                }
            }
        }

        if problems.is_empty() {
            Ok(order)
        } else {
            Err(EngineError::InvalidModuleGraph(problems))
        }
    }

    /// Start every module in dependency order.
    ///
    /// All-or-nothing: if a module fails, the modules started by this call are
    /// stopped in reverse order before the error is returned.
    pub async fn start_all(&self, ctx: &SharedContext) -> Result<()> {
        let order = self.resolve_indices()?;

        let mut started = self.started.lock().await;
        if !started.is_empty() {
            return Err(EngineError::AlreadyStarted);
        }

        tracing::info!("Starting {} modules...", order.len());
        for index in order {
            let entry = &self.entries[index];
            tracing::debug!(module = %entry.name, "Starting module");
            if let Err(error) = entry.module.start(ctx).await {
                tracing::error!(module = %entry.name, %error, "Module failed to start, rolling back");
                for &rollback in started.iter().rev() {
                    let entry = &self.entries[rollback];
                    if let Err(error) = entry.module.stop(ctx).await {
                        tracing::error!(module = %entry.name, %error, "Module failed to stop during rollback");
                    }
                }
                started.clear();
                return Err(EngineError::ModuleStartFailed {
                    module: entry.name.clone(),
                    source: error,
                });
            }
            started.push(index);
            tracing::debug!(module = %entry.name, "Started module");
        }

        tracing::info!("Module startup complete ({} modules started)", started.len());
        Ok(())
    }

    /// Stop every started module in the reverse of the achieved start order.
    ///
    /// A failing module does not prevent the others from being stopped; all
    /// failures are returned together.
    pub async fn stop_all(&self, ctx: &SharedContext) -> Result<()> {
        let started = std::mem::take(&mut *self.started.lock().await);
        tracing::info!("Stopping {} modules...", started.len());

        let mut failures = Vec::new();
        for &index in started.iter().rev() {
            let entry = &self.entries[index];
            tracing::debug!(module = %entry.name, "Stopping module");
            if let Err(error) = entry.module.stop(ctx).await {
                tracing::error!(module = %entry.name, %error, "Module failed to stop");
                failures.push(Failure::new(entry.name.clone(), error));
            }
        }

        tracing::info!(
            "Module shutdown complete ({} modules, {} failures)",
            started.len(),
            failures.len()
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ModuleStopFailed(failures))
        }
    }

    /// Names of the currently started modules, in the order they started.
    pub async fn start_order(&self) -> Vec<String> {
        self.started
            .lock()
            .await
            .iter()
            .map(|&index| self.entries[index].name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use async_trait::async_trait;

    type Journal = Arc<std::sync::Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                fail_start: false,
                fail_stop: false,
            }
        }

        fn failing_start(mut self) -> Self {
            self.fail_start = true;
            self
        }

        fn failing_stop(mut self) -> Self {
            self.fail_stop = true;
            self
        }
    }

    #[async_trait]
    impl Module for Recorder {
        async fn start(&self, _ctx: &SharedContext) -> std::result::Result<(), BoxError> {
            if self.fail_start {
                return Err(format!("{} refused to start", self.name).into());
            }
            self.journal.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self, _ctx: &SharedContext) -> std::result::Result<(), BoxError> {
            self.journal.lock().unwrap().push(format!("stop:{}", self.name));
            if self.fail_stop {
                return Err(format!("{} refused to stop", self.name).into());
            }
            Ok(())
        }
    }

    fn journal() -> Journal {
        Arc::new(std::sync::Mutex::new(Vec::new()))
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_start_respects_dependencies() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry
            .register("app", Recorder::new("app", &log), &["logger", "config"])
            .register("logger", Recorder::new("logger", &log), &["config"])
            .register("config", Recorder::new("config", &log), &[])
            .register("utility", Recorder::new("utility", &log), &[]);

        assert_eq!(
            registry.resolve_order().unwrap(),
            vec!["config", "logger", "app", "utility"]
        );

        let shared = SharedContext::new();
        registry.start_all(&shared).await.unwrap();
        assert_eq!(
            registry.start_order().await,
            vec!["config", "logger", "app", "utility"]
        );
    }

    #[tokio::test]
    async fn test_stop_is_reverse_of_achieved_start() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry
            .register("b", Recorder::new("b", &log), &["a"])
            .register("a", Recorder::new("a", &log), &[])
            .register("c", Recorder::new("c", &log).failing_stop(), &["b"]);

        let shared = SharedContext::new();
        registry.start_all(&shared).await.unwrap();
        let err = registry.stop_all(&shared).await.unwrap_err();

        assert!(matches!(err, EngineError::ModuleStopFailed(ref failures) if failures.len() == 1));
        assert_eq!(
            entries(&log),
            vec!["start:a", "start:b", "start:c", "stop:c", "stop:b", "stop:a"]
        );
        assert!(registry.start_order().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry
            .register("a", Recorder::new("a", &log), &[])
            .register("b", Recorder::new("b", &log), &["a"])
            .register("c", Recorder::new("c", &log).failing_start(), &["b"])
            .register("d", Recorder::new("d", &log), &["c"]);

        let shared = SharedContext::new();
        let err = registry.start_all(&shared).await.unwrap_err();

        assert!(matches!(err, EngineError::ModuleStartFailed { ref module, .. } if module == "c"));
        assert_eq!(
            entries(&log),
            vec!["start:a", "start:b", "stop:b", "stop:a"]
        );
        assert!(registry.start_order().await.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_is_detected_before_anything_starts() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry
            .register("free", Recorder::new("free", &log), &[])
            .register("a", Recorder::new("a", &log), &["c"])
            .register("b", Recorder::new("b", &log), &["a"])
            .register("c", Recorder::new("c", &log), &["b"]);

        let err = registry.start_all(&SharedContext::new()).await.unwrap_err();
        match err {
            EngineError::InvalidModuleGraph(problems) => {
                assert_eq!(
                    problems,
                    vec![GraphProblem::Cycle(vec![
                        "a".to_string(),
                        "b".to_string(),
                        "c".to_string()
                    ])]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_modules_are_aggregated() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry
            .register("a", Recorder::new("a", &log), &["missing"])
            .register("a", Recorder::new("a", &log), &[]);

        let err = registry.start_all(&SharedContext::new()).await.unwrap_err();
        match err {
            EngineError::InvalidModuleGraph(problems) => {
                assert_eq!(problems.len(), 2);
                assert!(problems.contains(&GraphProblem::DuplicateModule("a".to_string())));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry.register("a", Recorder::new("a", &log), &[]);

        let shared = SharedContext::new();
        registry.start_all(&shared).await.unwrap();
        assert!(matches!(
            registry.start_all(&shared).await,
            Err(EngineError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_typed_get() {
        let log = journal();
        let mut registry = ModuleRegistry::new();
        registry.register("a", Recorder::new("a", &log), &[]);

        assert_eq!(registry.get::<Recorder>("a").unwrap().name, "a");
        assert!(registry.get::<Recorder>("b").is_none());
        assert_eq!(registry.names(), vec!["a"]);
    }
}
