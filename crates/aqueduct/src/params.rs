/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Layered parameter scopes.
//!
//! A [`ParamScope`] is an ordered stack of string-to-string maps. Lookup walks
//! the layers from highest precedence to lowest and returns the first match.
//! The engine assembles one scope per task dispatch:
//!
//! 1. runtime overrides (CLI `--params` file or a backfill date overlay)
//! 2. per-task parameters
//! 3. workflow-global parameters
//!
//! In addition to the flat layers, a scope can carry named *namespaces* for
//! dotted lookups. The `custom_command` template of a script task resolves
//! `params.<name>` against the task's already-resolved parameter map exposed
//! as the `params` namespace.
//!
//! Maps are [`IndexMap`]s because insertion order is observable: script
//! runners pass `--key=value` flags in the order the task's parameter map
//! declared them.

use indexmap::IndexMap;
use std::collections::HashMap;

/// A precedence-ordered stack of parameter layers plus dotted namespaces.
///
/// Layers pushed first have the highest precedence. The scope is read-only
/// during execution; the engine builds a fresh scope per task dispatch.
#[derive(Debug, Clone, Default)]
pub struct ParamScope {
    layers: Vec<IndexMap<String, String>>,
    namespaces: HashMap<String, IndexMap<String, String>>,
}

impl ParamScope {
    /// Creates an empty scope. Lookups against it always miss, which makes
    /// template resolution the identity function.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer below all previously pushed layers.
    pub fn push_layer(&mut self, layer: IndexMap<String, String>) {
        self.layers.push(layer);
    }

    /// Builder-style [`push_layer`](Self::push_layer).
    pub fn with_layer(mut self, layer: IndexMap<String, String>) -> Self {
        self.push_layer(layer);
        self
    }

    /// Attaches a named namespace for dotted lookups (`<namespace>.<key>`).
    pub fn with_namespace(mut self, name: &str, map: IndexMap<String, String>) -> Self {
        self.namespaces.insert(name.to_string(), map);
        self
    }

    /// Looks up a flat name, first match across layers wins.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(name).map(String::as_str))
    }

    /// Looks up a dotted path against the attached namespaces.
    ///
    /// Only two-level paths are supported (`params.day_id`); anything deeper
    /// or referencing an unknown namespace misses.
    pub fn lookup_path(&self, path: &str) -> Option<&str> {
        let (namespace, key) = path.split_once('.')?;
        self.namespaces
            .get(namespace)
            .and_then(|map| map.get(key).map(String::as_str))
    }

    /// True when the scope has no layers and no namespaces.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.namespaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;

    fn layer(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_lookup_precedence() {
        init_test_logging();

        let scope = ParamScope::new()
            .with_layer(layer(&[("region", "eu")]))
            .with_layer(layer(&[("region", "us"), ("bucket", "raw")]));

        assert_eq!(scope.lookup("region"), Some("eu"));
        assert_eq!(scope.lookup("bucket"), Some("raw"));
        assert_eq!(scope.lookup("missing"), None);
    }

    #[test]
    fn test_namespace_lookup() {
        init_test_logging();

        let scope = ParamScope::new()
            .with_layer(layer(&[("day_id", "top-level")]))
            .with_namespace("params", layer(&[("day_id", "2024-07-15")]));

        assert_eq!(scope.lookup_path("params.day_id"), Some("2024-07-15"));
        assert_eq!(scope.lookup_path("params.missing"), None);
        assert_eq!(scope.lookup_path("other.day_id"), None);
        // A dotted path never falls back to the flat layers.
        assert_eq!(scope.lookup_path("day_id"), None);
    }

    #[test]
    fn test_empty_scope() {
        init_test_logging();

        let scope = ParamScope::new();
        assert!(scope.is_empty());
        assert_eq!(scope.lookup("anything"), None);
    }
}
