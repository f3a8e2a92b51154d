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

//! `${...}` template substitution.
//!
//! The resolver expands tokens left to right, one pass per recursion level.
//! Each token is handled as:
//!
//! 1. date expression (see [`crate::dateexpr`]) — evaluated against the
//!    resolver's reference instant, with an optional `ref_date` override from
//!    the scope;
//! 2. dotted path (`params.<name>`) — resolved against the scope's namespaces;
//! 3. plain name — resolved against the scope's layers. When the resolved
//!    value itself contains `${...}`, substitution recurses.
//!
//! Recursion depth is capped at [`MAX_RECURSION_DEPTH`]; on overflow the token
//! is left literal and a warning is logged. Unknown names are also left
//! literal — a deliberately permissive policy so that downstream consumers of
//! a command string can spot the unexpanded reference.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::dateexpr::DateExpr;
use crate::error::TemplateError;
use crate::params::ParamScope;

/// Maximum substitution recursion depth before a token is left literal.
pub const MAX_RECURSION_DEPTH: usize = 8;

/// Matches one `${...}` token; the capture is the token body.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Expands `${...}` references within strings against a [`ParamScope`].
///
/// A resolver is cheap to construct and clone; the engine builds one per run
/// so that all tasks of that run share the same reference instant.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    reference: NaiveDateTime,
}

impl TemplateResolver {
    /// Creates a resolver with an explicit reference instant.
    pub fn new(reference: NaiveDateTime) -> Self {
        Self { reference }
    }

    /// Creates a resolver anchored at the current local time, honouring a
    /// `ref_date` override (format `YYYY-MM-DD`) from the given scope. An
    /// unparseable override is logged and ignored.
    pub fn for_run(scope: &ParamScope) -> Self {
        let now = chrono::Local::now().naive_local();
        let reference = match scope.lookup("ref_date") {
            Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(date) => date.and_time(now.time()),
                Err(_) => {
                    warn!("ignoring unparseable ref_date override: {raw:?}");
                    now
                }
            },
            None => now,
        };
        Self { reference }
    }

    /// The reference instant date expressions evaluate against.
    pub fn reference(&self) -> NaiveDateTime {
        self.reference
    }

    /// Expands every `${...}` token in `input`. Infallible by design: tokens
    /// that cannot be resolved come through unchanged.
    pub fn resolve(&self, input: &str, scope: &ParamScope) -> String {
        self.resolve_at_depth(input, scope, 0)
    }

    fn resolve_at_depth(&self, input: &str, scope: &ParamScope, depth: usize) -> String {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in TOKEN_RE.captures_iter(input) {
            let token = caps.get(0).expect("capture 0 always present");
            let body = &caps[1];
            out.push_str(&input[last..token.start()]);
            out.push_str(&self.expand_token(body, token.as_str(), scope, depth));
            last = token.end();
        }
        out.push_str(&input[last..]);
        out
    }

    fn expand_token(&self, body: &str, literal: &str, scope: &ParamScope, depth: usize) -> String {
        if let Some(expr) = DateExpr::parse(body) {
            return expr.evaluate(self.reference);
        }

        let value = if body.contains('.') {
            scope.lookup_path(body)
        } else {
            scope.lookup(body)
        };

        match value {
            Some(value) if TOKEN_RE.is_match(value) => {
                if depth + 1 > MAX_RECURSION_DEPTH {
                    warn!(
                        "{}",
                        TemplateError::RecursionOverflow {
                            token: body.to_string()
                        }
                    );
                    literal.to_string()
                } else {
                    self.resolve_at_depth(value, scope, depth + 1)
                }
            }
            Some(value) => value.to_string(),
            None => {
                debug!("no value for ${{{body}}}, leaving token literal");
                literal.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;
    use indexmap::IndexMap;

    fn layer(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolver() -> TemplateResolver {
        TemplateResolver::new(
            chrono::NaiveDate::from_ymd_opt(2024, 7, 15)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_empty_scope_is_identity() {
        init_test_logging();

        let scope = ParamScope::new();
        let input = "echo ${msg} ${unknown}";
        assert_eq!(resolver().resolve(input, &scope), input);
    }

    #[test]
    fn test_simple_substitution() {
        init_test_logging();

        let scope = ParamScope::new().with_layer(layer(&[("region", "us")]));
        assert_eq!(
            resolver().resolve("deploy to ${region}", &scope),
            "deploy to us"
        );
    }

    #[test]
    fn test_recursive_substitution() {
        init_test_logging();

        let scope = ParamScope::new()
            .with_layer(layer(&[("msg", "hello ${region}"), ("region", "us")]));
        assert_eq!(resolver().resolve("echo ${msg}", &scope), "echo hello us");
    }

    #[test]
    fn test_recursion_overflow_leaves_token_literal() {
        init_test_logging();

        let scope = ParamScope::new().with_layer(layer(&[("a", "${b}"), ("b", "${a}")]));
        assert_eq!(resolver().resolve("${a}", &scope), "${a}");
    }

    #[test]
    fn test_date_expression_wins_over_name_lookup() {
        init_test_logging();

        // Even with a parameter of the same name, a date-like body is treated
        // as a date expression.
        let scope = ParamScope::new().with_layer(layer(&[("yyyyMMdd", "should-not-win")]));
        assert_eq!(resolver().resolve("${yyyyMMdd}", &scope), "20240715");
    }

    #[test]
    fn test_date_offset_via_ref_date_override() {
        init_test_logging();

        let scope = ParamScope::new().with_layer(layer(&[("ref_date", "2024-03-01")]));
        let resolver = TemplateResolver::for_run(&scope);
        assert_eq!(resolver.resolve("dt=${yyyyMMdd-1}", &scope), "dt=20240229");
    }

    #[test]
    fn test_invalid_ref_date_falls_back_to_now() {
        init_test_logging();

        let scope = ParamScope::new().with_layer(layer(&[("ref_date", "last tuesday")]));
        let resolver = TemplateResolver::for_run(&scope);
        // Resolution still succeeds and produces an eight-digit date.
        let resolved = resolver.resolve("${yyyyMMdd}", &scope);
        assert_eq!(resolved.len(), 8);
        assert!(resolved.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_dotted_path_resolution() {
        init_test_logging();

        let scope = ParamScope::new()
            .with_namespace("params", layer(&[("day_id", "2024-07-15")]));
        assert_eq!(
            resolver().resolve("--date=${params.day_id}", &scope),
            "--date=2024-07-15"
        );
    }

    #[test]
    fn test_left_to_right_multiple_tokens() {
        init_test_logging();

        let scope = ParamScope::new().with_layer(layer(&[("a", "1"), ("b", "2")]));
        assert_eq!(resolver().resolve("${a}-${b}-${c}", &scope), "1-2-${c}");
    }

    #[test]
    fn test_malformed_date_expression_left_literal() {
        init_test_logging();

        let scope = ParamScope::new();
        assert_eq!(
            resolver().resolve("${yyyy-MM-dd-}", &scope),
            "${yyyy-MM-dd-}"
        );
    }

    #[test]
    fn test_fully_resolvable_leaves_no_tokens() {
        init_test_logging();

        let scope = ParamScope::new().with_layer(layer(&[
            ("table", "events_${yyyyMMdd}"),
            ("db", "warehouse"),
        ]));
        let resolved = resolver().resolve("select * from ${db}.${table}", &scope);
        assert_eq!(resolved, "select * from warehouse.events_20240715");
        assert!(!resolved.contains("${"));
    }
}
