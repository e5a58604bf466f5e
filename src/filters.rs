// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered write/read/delete filter tables.
//!
//! Filters are first-match sequences, not maps: declaration order is
//! observable and significant. A filter's path may itself be a glob
//! pattern; the first entry whose path equals or matches the checked key
//! wins.
//!
//! In static mode a key with no matching filter is refused with
//! [`FilterError::RouteUndefined`]; otherwise missing write/read filters
//! behave as identity and missing delete hooks as no-ops.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::key;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("route not defined, static mode, key: {0}")]
    RouteUndefined(String),
    #[error("filter rejected key '{key}': {reason}")]
    Rejected { key: String, reason: String },
}

impl FilterError {
    /// Convenience constructor for user filter callbacks.
    pub fn rejected(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// A data filter: receives the key and the body, returns the body to store
/// or send, or an error to abort the operation.
pub type Apply = Arc<dyn Fn(&str, Vec<u8>) -> Result<Vec<u8>, FilterError> + Send + Sync>;

/// A delete hook: receives the key, may veto the deletion.
pub type ApplyHook = Arc<dyn Fn(&str) -> Result<(), FilterError> + Send + Sync>;

struct Filter {
    path: String,
    apply: Apply,
}

struct Hook {
    path: String,
    apply: ApplyHook,
}

/// First-match ordered sequence of data filters.
#[derive(Default)]
pub struct Router {
    filters: Vec<Filter>,
}

impl Router {
    pub fn add(&mut self, path: &str, apply: Apply) {
        self.filters.push(Filter {
            path: path.to_string(),
            apply,
        });
    }

    /// Run the first matching filter over `data`.
    pub fn check(&self, path: &str, data: Vec<u8>, static_mode: bool) -> Result<Vec<u8>, FilterError> {
        let found = self
            .filters
            .iter()
            .find(|f| f.path == path || key::matches(&f.path, path));

        match found {
            Some(filter) => (filter.apply)(path, data),
            None if static_mode => Err(FilterError::RouteUndefined(path.to_string())),
            None => Ok(data),
        }
    }
}

/// First-match ordered sequence of delete hooks.
#[derive(Default)]
pub struct Hooks {
    hooks: Vec<Hook>,
}

impl Hooks {
    pub fn add(&mut self, path: &str, apply: ApplyHook) {
        self.hooks.push(Hook {
            path: path.to_string(),
            apply,
        });
    }

    pub fn check(&self, path: &str, static_mode: bool) -> Result<(), FilterError> {
        let found = self
            .hooks
            .iter()
            .find(|h| h.path == path || key::matches(&h.path, path));

        match found {
            Some(hook) => (hook.apply)(path),
            None if static_mode => Err(FilterError::RouteUndefined(path.to_string())),
            None => Ok(()),
        }
    }
}

/// The three filter tables of a server instance.
#[derive(Default)]
pub struct Filters {
    pub write: Router,
    pub read: Router,
    pub delete: Hooks,
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filters")
            .field("write", &self.write.filters.len())
            .field("read", &self.read.filters.len())
            .field("delete", &self.delete.hooks.len())
            .finish()
    }
}

/// Identity filter, useful for opening a route in static mode.
pub fn noop_filter(_key: &str, data: Vec<u8>) -> Result<Vec<u8>, FilterError> {
    Ok(data)
}

/// No-op delete hook.
pub fn noop_hook(_key: &str) -> Result<(), FilterError> {
    Ok(())
}
