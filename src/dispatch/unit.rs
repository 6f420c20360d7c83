//! Handler units and their lifecycle.
//!
//! A unit is created by its factory on first use (or at startup when
//! marked load-on-startup), initialised once, shared by every request,
//! and destroyed once when the application stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::dispatch::exchange::Exchange;
use crate::error::ServletError;

/// Name and init parameters of a unit or filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    #[serde(default)]
    pub init_params: HashMap<String, String>,
}

impl UnitConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.init_params.insert(key.into(), value.into());
        self
    }

    pub fn init_param(&self, key: &str) -> Option<&str> {
        self.init_params.get(key).map(String::as_str)
    }
}

/// Lifecycle hooks shared by handlers and filters.
#[async_trait]
pub trait Unit: Send + Sync {
    async fn init(&self, _config: &UnitConfig) -> Result<(), ServletError> {
        Ok(())
    }

    fn destroy(&self) {}
}

/// Application logic bound to URL patterns.
#[async_trait]
pub trait Handler: Unit {
    async fn service(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError>;
}

pub type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

/// Holds one lazily created unit instance.
pub struct UnitSlot<T: ?Sized> {
    config: UnitConfig,
    factory: Factory<T>,
    instance: OnceCell<Arc<T>>,
    destroyed: AtomicBool,
    load_on_startup: bool,
}

impl<T: ?Sized + Unit> UnitSlot<T> {
    pub fn new(config: UnitConfig, factory: Factory<T>, load_on_startup: bool) -> Self {
        Self {
            config,
            factory,
            instance: OnceCell::new(),
            destroyed: AtomicBool::new(false),
            load_on_startup,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn load_on_startup(&self) -> bool {
        self.load_on_startup
    }

    pub fn is_initialised(&self) -> bool {
        self.instance.initialized()
    }

    /// The shared instance, creating and initialising it on first call.
    /// Concurrent first calls wait for a single initialisation.
    pub async fn get(&self) -> Result<Arc<T>, ServletError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ServletError::Unavailable {
                unit: self.config.name.clone(),
                reason: "destroyed".to_string(),
            });
        }
        self.instance
            .get_or_try_init(|| async {
                let unit = (self.factory)();
                unit.init(&self.config)
                    .await
                    .map_err(|e| ServletError::Unavailable {
                        unit: self.config.name.clone(),
                        reason: e.to_string(),
                    })?;
                info!(unit = %self.config.name, "unit initialised");
                Ok(unit)
            })
            .await
            .cloned()
    }

    /// Destroys the instance if one was created. Only the first call acts.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(unit) = self.instance.get() {
            unit.destroy();
            info!(unit = %self.config.name, "unit destroyed");
        }
    }
}

/// Named unit slots.
pub struct Registry<T: ?Sized> {
    slots: HashMap<String, UnitSlot<T>>,
}

impl<T: ?Sized + Unit> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    pub fn insert(&mut self, slot: UnitSlot<T>) -> bool {
        let name = slot.name().to_string();
        if self.slots.contains_key(&name) {
            return false;
        }
        self.slots.insert(name, slot);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Result<Arc<T>, ServletError> {
        match self.slots.get(name) {
            Some(slot) => slot.get().await,
            None => Err(ServletError::Unavailable {
                unit: name.to_string(),
                reason: "not registered".to_string(),
            }),
        }
    }

    /// Initialises every slot selected by `eager`; failures are logged and
    /// retried on first use.
    pub async fn start(&self, eager: impl Fn(&UnitSlot<T>) -> bool) {
        for slot in self.slots.values().filter(|s| eager(*s)) {
            if let Err(e) = slot.get().await {
                warn!(unit = slot.name(), error = %e, "startup initialisation failed");
            }
        }
    }

    pub fn destroy_all(&self) {
        for slot in self.slots.values() {
            slot.destroy();
        }
    }

    pub fn is_initialised(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(UnitSlot::is_initialised)
    }
}

impl<T: ?Sized + Unit> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
