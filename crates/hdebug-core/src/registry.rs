//! Association from universal context identity to its debug context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::abi::{ContextId, HandleAbi};
use crate::config::{BindPolicy, DebugConfig};
use crate::context::{lock, DebugContext};
use crate::error::DebugError;

#[derive(Debug)]
pub struct ContextRegistry {
    config: DebugConfig,
    contexts: Mutex<HashMap<ContextId, Arc<DebugContext>>>,
}

static GLOBAL: OnceCell<ContextRegistry> = OnceCell::new();

/// The process-wide registry, configured from the environment on first use.
pub fn global() -> &'static ContextRegistry {
    GLOBAL.get_or_init(|| ContextRegistry::new(DebugConfig::from_env()))
}

impl ContextRegistry {
    pub fn new(config: DebugConfig) -> Self {
        ContextRegistry {
            config,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn policy(&self) -> BindPolicy {
        self.config.bind_policy
    }

    pub fn get(&self, universal: ContextId) -> Option<Arc<DebugContext>> {
        lock(&self.contexts).get(&universal).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.contexts).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the debug context bound to `universal`, creating and
    /// registering one if there is none.
    ///
    /// Under [`BindPolicy::Singleton`] a registry that already holds a debug
    /// context for another universal context refuses with
    /// [`DebugError::Configuration`].
    pub fn bind(&self, universal: Arc<dyn HandleAbi>) -> Result<Arc<DebugContext>, DebugError> {
        let uid = universal.ctx_id();
        let mut contexts = lock(&self.contexts);
        if let Some(existing) = contexts.get(&uid) {
            return Ok(existing.clone());
        }
        self.check_singleton(&contexts, uid)?;

        let dctx = Arc::new(DebugContext::new(universal, self.config.clone()));
        tracing::info!(universal = %uid, debug = %dctx.id(), "bound debug context");
        contexts.insert(uid, dctx.clone());
        Ok(dctx)
    }

    /// Registers an already constructed debug context for its universal
    /// context. Installing the context that is already registered is a no-op.
    pub fn install(&self, dctx: Arc<DebugContext>) -> Result<Arc<DebugContext>, DebugError> {
        let uid = dctx.universal_id();
        let mut contexts = lock(&self.contexts);
        if let Some(existing) = contexts.get(&uid) {
            if Arc::ptr_eq(existing, &dctx) {
                return Ok(dctx);
            }
            let err = DebugError::Configuration {
                bound: existing.id(),
                requested: dctx.id(),
            };
            tracing::error!("{err}");
            return Err(err);
        }
        self.check_singleton(&contexts, uid)?;
        tracing::info!(universal = %uid, debug = %dctx.id(), "installed debug context");
        contexts.insert(uid, dctx.clone());
        Ok(dctx)
    }

    fn check_singleton(
        &self,
        contexts: &HashMap<ContextId, Arc<DebugContext>>,
        requested: ContextId,
    ) -> Result<(), DebugError> {
        if self.config.bind_policy != BindPolicy::Singleton {
            return Ok(());
        }
        match contexts.keys().find(|&&k| k != requested) {
            Some(&bound) => {
                let err = DebugError::Configuration { bound, requested };
                tracing::error!("{err}");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universal::MemoryUniversal;

    fn per_context() -> DebugConfig {
        DebugConfig {
            bind_policy: BindPolicy::PerContext,
            ..DebugConfig::default()
        }
    }

    #[test]
    fn bind_is_idempotent() {
        let reg = ContextRegistry::new(DebugConfig::default());
        let u: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("u"));
        let a = reg.bind(u.clone()).unwrap();
        let b = reg.bind(u.clone()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert!(reg.get(u.ctx_id()).is_some_and(|d| Arc::ptr_eq(&d, &a)));
    }

    #[test]
    fn singleton_rejects_second_universal() {
        let reg = ContextRegistry::new(DebugConfig::default());
        let u1: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("u1"));
        let u2: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("u2"));
        reg.bind(u1.clone()).unwrap();
        let err = reg.bind(u2.clone()).unwrap_err();
        assert_eq!(
            err,
            DebugError::Configuration {
                bound: u1.ctx_id(),
                requested: u2.ctx_id()
            }
        );
        // The failed bind leaves the first binding intact.
        assert_eq!(reg.len(), 1);
        assert!(reg.bind(u1).is_ok());
    }

    #[test]
    fn per_context_policy_binds_each_universal() {
        let reg = ContextRegistry::new(per_context());
        let u1: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("u1"));
        let u2: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("u2"));
        let d1 = reg.bind(u1).unwrap();
        let d2 = reg.bind(u2).unwrap();
        assert!(!Arc::ptr_eq(&d1, &d2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn install_registers_prebuilt_context() {
        let reg = ContextRegistry::new(DebugConfig::default());
        let u: Arc<dyn HandleAbi> = Arc::new(MemoryUniversal::new("u"));
        let d = Arc::new(DebugContext::new(u.clone(), DebugConfig::default()));
        let installed = reg.install(d.clone()).unwrap();
        assert!(Arc::ptr_eq(&installed, &d));
        assert!(reg.install(d.clone()).is_ok());
        assert!(Arc::ptr_eq(&reg.bind(u.clone()).unwrap(), &d));

        let rival = Arc::new(DebugContext::new(u, DebugConfig::default()));
        assert!(matches!(
            reg.install(rival),
            Err(DebugError::Configuration { .. })
        ));
    }
}
