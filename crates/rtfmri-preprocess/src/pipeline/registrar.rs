//! Step manifest export.
//!
//! Each runtime step is described once, at construction, under
//!
//! ```text
//! pipeline:<pipeline_id>:<step_index>:class_name
//! pipeline:<pipeline_id>:<step_index>:<param_name>
//! ```
//!
//! so a control surface can render the running pipeline without access to
//! the step objects. Once every step is written, the step count is stored
//! under `pipeline:<pipeline_id>:step_count`. A registration that fails
//! partway leaves its step entries behind but never writes the count, and
//! [`read_manifests`] reports nothing for a pipeline without one.

use crate::error::Result;
use crate::providers::ManifestStore;
use crate::steps::Step;
use crate::types::Params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const CLASS_NAME_KEY: &str = "class_name";
const STEP_COUNT_KEY: &str = "step_count";

/// Key prefix shared by every entry of a pipeline.
pub fn pipeline_key(pipeline_id: &str) -> String {
    format!("pipeline:{}", pipeline_id)
}

/// Writes step manifests for one pipeline.
pub struct StepRegistrar<'a> {
    store: &'a dyn ManifestStore,
    prefix: String,
}

impl<'a> StepRegistrar<'a> {
    pub fn new(store: &'a dyn ManifestStore, pipeline_id: &str) -> Self {
        Self {
            store,
            prefix: pipeline_key(pipeline_id),
        }
    }

    /// Key prefix for the step at `index`.
    pub fn step_key(&self, index: usize) -> String {
        format!("{}:{}", self.prefix, index)
    }

    /// Export one step's class name and parameters.
    pub fn register(&self, index: usize, step: &dyn Step) -> Result<()> {
        let key = self.step_key(index);
        self.store.set(
            &format!("{}:{}", key, CLASS_NAME_KEY),
            serde_json::Value::String(step.class_name().to_string()),
        )?;
        for (name, value) in step.describe() {
            self.store.set(&format!("{}:{}", key, name), value.clone())?;
        }
        debug!("Registered step {} as {}", index, key);
        Ok(())
    }

    /// Mark the pipeline complete. Call after every step is registered.
    pub fn finish(&self, step_count: usize) -> Result<()> {
        self.store.set(
            &format!("{}:{}", self.prefix, STEP_COUNT_KEY),
            serde_json::Value::from(step_count),
        )?;
        Ok(())
    }
}

/// One step's exported description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepManifest {
    pub index: usize,
    pub class_name: String,
    pub parameters: Params,
}

/// Rebuild the manifests of `pipeline_id`, ordered by step index.
///
/// Returns nothing until the pipeline has been marked complete with
/// [`StepRegistrar::finish`]. Steps without a `class_name` entry and
/// indices at or beyond the step count are skipped.
pub fn read_manifests(store: &dyn ManifestStore, pipeline_id: &str) -> Result<Vec<StepManifest>> {
    let prefix = format!("{}:", pipeline_key(pipeline_id));
    let entries = store.scan_prefix(&prefix)?;

    let step_count = entries
        .iter()
        .find(|(key, _)| key[prefix.len()..] == *STEP_COUNT_KEY)
        .and_then(|(_, value)| value.as_u64())
        .and_then(|count| usize::try_from(count).ok());
    let Some(step_count) = step_count else {
        debug!("Pipeline {} has no completed registration", pipeline_id);
        return Ok(Vec::new());
    };

    let mut steps: BTreeMap<usize, (Option<String>, Params)> = BTreeMap::new();
    for (key, value) in entries {
        let Some((index, name)) = key[prefix.len()..].split_once(':') else {
            continue;
        };
        let Ok(index) = index.parse::<usize>() else {
            warn!("Ignoring manifest key with a non-numeric step index: {}", key);
            continue;
        };
        if index >= step_count {
            continue;
        }

        let entry = steps.entry(index).or_default();
        if name == CLASS_NAME_KEY {
            entry.0 = value.as_str().map(str::to_string);
        } else {
            entry.1.insert(name.to_string(), value);
        }
    }

    Ok(steps
        .into_iter()
        .filter_map(|(index, (class_name, parameters))| {
            class_name.map(|class_name| StepManifest {
                index,
                class_name,
                parameters,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemoryManifestStore;
    use crate::steps::{RunningMeanStd, StepArgs, StepContext};
    use serde_json::json;

    fn running(n: usize) -> RunningMeanStd {
        let kwargs: Params = serde_json::from_value(json!({"n": n})).unwrap();
        RunningMeanStd::from_args(&StepArgs::new(Vec::new(), kwargs), &StepContext::default()).unwrap()
    }

    #[test]
    fn test_register_writes_class_name_and_params() {
        let store = InMemoryManifestStore::new();
        let registrar = StepRegistrar::new(&store, "17");
        registrar.register(0, &running(3)).unwrap();

        assert_eq!(store.get("pipeline:17:0:class_name"), Some(json!("RunningMeanStd")));
        assert_eq!(store.get("pipeline:17:0:n"), Some(json!(3)));
        assert_eq!(store.get("pipeline:17:0:n_skip"), Some(json!(5)));
    }

    #[test]
    fn test_read_manifests_orders_by_index() {
        let store = InMemoryManifestStore::new();
        let registrar = StepRegistrar::new(&store, "p");
        // indices 2 and 10 sort wrongly as strings
        registrar.register(10, &running(4)).unwrap();
        registrar.register(2, &running(3)).unwrap();
        registrar.finish(11).unwrap();
        store.set("pipeline:other:0:class_name", json!("ZScore")).unwrap();

        let manifests = read_manifests(&store, "p").unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].index, 2);
        assert_eq!(manifests[0].parameters["n"], json!(3));
        assert_eq!(manifests[1].index, 10);
        assert_eq!(manifests[1].class_name, "RunningMeanStd");
    }

    #[test]
    fn test_read_manifests_skips_steps_without_class_name() {
        let store = InMemoryManifestStore::new();
        store.set("pipeline:p:0:n", json!(3)).unwrap();
        StepRegistrar::new(&store, "p").finish(1).unwrap();
        assert!(read_manifests(&store, "p").unwrap().is_empty());
    }

    #[test]
    fn test_unfinished_registration_is_not_listed() {
        let store = InMemoryManifestStore::new();
        let registrar = StepRegistrar::new(&store, "p");
        registrar.register(0, &running(3)).unwrap();
        assert!(read_manifests(&store, "p").unwrap().is_empty());

        registrar.finish(1).unwrap();
        assert_eq!(read_manifests(&store, "p").unwrap().len(), 1);
    }

    #[test]
    fn test_stale_steps_beyond_count_are_ignored() {
        let store = InMemoryManifestStore::new();
        let registrar = StepRegistrar::new(&store, "p");
        registrar.register(0, &running(3)).unwrap();
        registrar.register(1, &running(4)).unwrap();
        registrar.finish(1).unwrap();

        let manifests = read_manifests(&store, "p").unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].parameters["n"], json!(3));
    }
}
