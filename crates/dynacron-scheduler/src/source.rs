//! Schedulable sources and the registry they are discovered from.
//!
//! A [`SourceType`] is registered once at startup. It may expose a class
//! source (one job for the whole type), a set of instance records (one job
//! per record), or both. Every concrete [`Source`] reports its schedule,
//! optionally its own enablement, and which run methods it implements.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::types::SourceRef;

/// Which optional run methods a [`Source`] implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub class_run: bool,
    pub instance_run: bool,
    pub generic_run: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        class_run: false,
        instance_run: false,
        generic_run: false,
    };

    pub fn generic() -> Self {
        Self {
            generic_run: true,
            ..Self::NONE
        }
    }

    pub fn class() -> Self {
        Self {
            class_run: true,
            ..Self::NONE
        }
    }

    pub fn instance() -> Self {
        Self {
            instance_run: true,
            ..Self::NONE
        }
    }
}

/// The run method chosen for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCapability {
    ClassRun,
    InstanceRun,
    GenericRun,
    None,
}

impl RunCapability {
    /// Pick the run method for `source` by fixed precedence: the
    /// kind-specific method first, then the generic `run`.
    pub fn probe(source: &SourceRef, caps: Capabilities) -> Self {
        let specific = if source.is_class() {
            caps.class_run.then_some(RunCapability::ClassRun)
        } else {
            caps.instance_run.then_some(RunCapability::InstanceRun)
        };
        specific
            .or(caps.generic_run.then_some(RunCapability::GenericRun))
            .unwrap_or(RunCapability::None)
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            RunCapability::ClassRun => "run_as_class()",
            RunCapability::InstanceRun => "run_as_instance()",
            RunCapability::GenericRun => "run()",
            RunCapability::None => "<none>",
        }
    }
}

impl std::fmt::Display for RunCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_name())
    }
}

/// A schedulable entity: a whole type, or one record of it.
///
/// Only the run methods advertised by [`Source::capabilities`] are ever
/// called. The defaults return an error so a mis-declared capability shows
/// up in the job log instead of silently succeeding.
#[async_trait]
pub trait Source: Send + Sync {
    /// Cron expression, possibly several clauses joined by `;`.
    fn schedule(&self) -> String;

    /// The source's own on/off switch. `None` means it has none (treated as on).
    fn enabled(&self) -> Option<bool> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    async fn run_as_class(&self) -> anyhow::Result<()> {
        anyhow::bail!("run_as_class() is not implemented")
    }

    async fn run_as_instance(&self) -> anyhow::Result<()> {
        anyhow::bail!("run_as_instance() is not implemented")
    }

    async fn run(&self) -> anyhow::Result<()> {
        anyhow::bail!("run() is not implemented")
    }
}

/// One live record of an instance-providing [`SourceType`].
#[derive(Clone)]
pub struct Record {
    pub id: String,
    pub source: Arc<dyn Source>,
}

impl Record {
    pub fn new(id: impl Into<String>, source: Arc<dyn Source>) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

/// Descriptor of a registered type.
///
/// A type without a class source that does not provide instances is
/// skipped by discovery.
pub trait SourceType: Send + Sync {
    /// Stable identifier, stored as the job's `source_type`.
    fn type_id(&self) -> &str;

    fn class_source(&self) -> Option<Arc<dyn Source>> {
        None
    }

    fn provides_instances(&self) -> bool {
        false
    }

    /// All live records. Only called when `provides_instances` is true.
    fn list_records(&self) -> anyhow::Result<Vec<Record>> {
        Ok(Vec::new())
    }

    /// A single live record, `None` if it no longer exists.
    fn find_record(&self, _record_id: &str) -> anyhow::Result<Option<Arc<dyn Source>>> {
        Ok(None)
    }
}

/// The set of source types discovery enumerates, keyed by type id.
#[derive(Default)]
pub struct SourceRegistry {
    types: RwLock<BTreeMap<String, Arc<dyn SourceType>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source_type: Arc<dyn SourceType>) -> Result<()> {
        let type_id = source_type.type_id().to_string();
        let mut types = self.types.write().unwrap();
        if types.contains_key(&type_id) {
            return Err(SchedulerError::DuplicateSourceType { type_id });
        }
        info!(%type_id, "source type registered");
        types.insert(type_id, source_type);
        Ok(())
    }

    /// Remove a type. Its jobs are deleted by the next reconcile.
    pub fn unregister(&self, type_id: &str) -> bool {
        let removed = self.types.write().unwrap().remove(type_id).is_some();
        if removed {
            info!(%type_id, "source type unregistered");
        }
        removed
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<dyn SourceType>> {
        self.types.read().unwrap().get(type_id).cloned()
    }

    /// Snapshot of all registered types, ordered by type id.
    pub fn types(&self) -> Vec<Arc<dyn SourceType>> {
        self.types.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate the live source behind `source`, if it still exists.
    pub fn lookup(&self, source: &SourceRef) -> Result<Option<Arc<dyn Source>>> {
        let Some(source_type) = self.get(source.type_id()) else {
            return Ok(None);
        };
        match source {
            SourceRef::Class { .. } => Ok(source_type.class_source()),
            SourceRef::Instance { type_id, record_id } => {
                if !source_type.provides_instances() {
                    return Ok(None);
                }
                source_type
                    .find_record(record_id)
                    .map_err(|e| SchedulerError::Source {
                        type_id: type_id.clone(),
                        reason: e.to_string(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nightly;

    #[async_trait]
    impl Source for Nightly {
        fn schedule(&self) -> String {
            "0 0 * * *".to_string()
        }
    }

    struct NightlyType;

    impl SourceType for NightlyType {
        fn type_id(&self) -> &str {
            "nightly"
        }

        fn class_source(&self) -> Option<Arc<dyn Source>> {
            Some(Arc::new(Nightly))
        }
    }

    #[test]
    fn probe_prefers_kind_specific_method() {
        let class = SourceRef::class("t");
        let inst = SourceRef::instance("t", "1");
        let all = Capabilities {
            class_run: true,
            instance_run: true,
            generic_run: true,
        };
        assert_eq!(RunCapability::probe(&class, all), RunCapability::ClassRun);
        assert_eq!(RunCapability::probe(&inst, all), RunCapability::InstanceRun);
    }

    #[test]
    fn probe_falls_back_to_generic() {
        let class = SourceRef::class("t");
        let inst = SourceRef::instance("t", "1");
        assert_eq!(
            RunCapability::probe(&class, Capabilities::generic()),
            RunCapability::GenericRun
        );
        // an instance-only method is no use to a class source
        assert_eq!(
            RunCapability::probe(&class, Capabilities::instance()),
            RunCapability::None
        );
        assert_eq!(
            RunCapability::probe(&inst, Capabilities::class()),
            RunCapability::None
        );
        assert_eq!(
            RunCapability::probe(&inst, Capabilities::NONE),
            RunCapability::None
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = SourceRegistry::new();
        registry.register(Arc::new(NightlyType)).unwrap();
        let err = registry.register(Arc::new(NightlyType)).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateSourceType { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_follows_registration() {
        let registry = SourceRegistry::new();
        registry.register(Arc::new(NightlyType)).unwrap();
        let class = SourceRef::class("nightly");
        assert!(registry.lookup(&class).unwrap().is_some());
        // the type has no instances
        assert!(registry
            .lookup(&SourceRef::instance("nightly", "1"))
            .unwrap()
            .is_none());

        assert!(registry.unregister("nightly"));
        assert!(registry.lookup(&class).unwrap().is_none());
        assert!(!registry.unregister("nightly"));
    }

    #[tokio::test]
    async fn default_run_methods_fail() {
        let err = Nightly.run().await.unwrap_err();
        assert!(err.to_string().contains("run()"));
        assert_eq!(Nightly.enabled(), None);
        assert_eq!(Nightly.capabilities(), Capabilities::NONE);
    }
}
