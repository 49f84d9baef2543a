//! Lazily populated trigger definition cache.
//!
//! The first lookup against an empty cache fetches every definition from the
//! source, resolves which programs are managed code, and groups the results
//! by name in dispatch order. Population runs under the cache lock so two
//! threads never populate at once, and with profiling suspended: the source
//! queries go through the same instrumented platform API and would otherwise
//! show up in call trees and trigger counts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::activation::Activation;
use crate::error::Error;
use crate::trigger::{execution_order, TriggerDefinition, TriggerSource};

type Groups = HashMap<String, Vec<TriggerDefinition>>;

pub struct TriggerCache {
    source: Arc<dyn TriggerSource>,
    activation: Arc<Activation>,
    entry_point: String,
    groups: Mutex<Groups>,
}

impl TriggerCache {
    pub fn new(
        source: Arc<dyn TriggerSource>,
        activation: Arc<Activation>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            source,
            activation,
            entry_point: entry_point.into(),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Definitions named `name` in dispatch order, or `None` if the platform
    /// has none by that name.
    ///
    /// The returned list is a copy. A failed population leaves the cache
    /// empty so the next call tries again.
    pub fn get(&self, name: &str) -> Result<Option<Vec<TriggerDefinition>>, Error> {
        let mut groups = self.lock();
        if groups.is_empty() {
            *groups = self.populate()?;
        }
        Ok(groups.get(name).cloned())
    }

    /// Drop everything; the next `get` repopulates.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn is_populated(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Number of distinct trigger names cached.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn populate(&self) -> Result<Groups, Error> {
        let _quiet = self.activation.suspend();

        let records = self.source.fetch_all().map_err(|e| {
            tracing::warn!(error = %e, "trigger definition fetch failed");
            e
        })?;

        let mut managed_programs: HashMap<String, bool> = HashMap::new();
        let mut groups: Groups = HashMap::new();
        let total = records.len();
        for record in records {
            let mut definition = TriggerDefinition::from_record(record);
            let managed = match managed_programs.get(definition.program_name()) {
                Some(&managed) => managed,
                None => {
                    let managed = self.source.is_managed_program(definition.program_name())?;
                    managed_programs.insert(definition.program_name().to_owned(), managed);
                    managed
                }
            };
            definition.mark_managed(managed, &self.entry_point);
            groups
                .entry(definition.name().to_owned())
                .or_default()
                .push(definition);
        }

        for list in groups.values_mut() {
            list.sort_by(execution_order);
        }

        tracing::debug!(
            definitions = total,
            names = groups.len(),
            programs = managed_programs.len(),
            "trigger definition cache populated"
        );
        Ok(groups)
    }

    fn lock(&self) -> MutexGuard<'_, Groups> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TriggerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerCache")
            .field("entry_point", &self.entry_point)
            .field("names", &self.len())
            .finish_non_exhaustive()
    }
}
