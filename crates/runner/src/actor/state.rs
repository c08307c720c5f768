// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Change-detecting state cell.
//!
//! Handlers receive an explicit mutable view of the state value; the cell
//! compares before/after, bumps its version counter on a real change, and
//! rolls back mutations that produce a non-serializable value. The runtime
//! persists whenever the counter moved.

use crate::error::WarrenError;
use crate::persist::validate_state;
use crate::protocol::Value;

pub struct StateCell {
    value: Value,
    version: u64,
}

impl StateCell {
    pub fn new(value: Value) -> Self {
        Self { value, version: 0 }
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply a mutation. On validation failure the cell rolls back and the
    /// mutator's error surfaces as `state/invalid_type`; the version only
    /// moves when the value actually changed.
    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut Value) -> R) -> Result<R, WarrenError> {
        let prior = self.value.clone();
        let out = f(&mut self.value);
        if let Err(err) = validate_state(&self.value) {
            self.value = prior;
            return Err(err);
        }
        if self.value != prior {
            self.version += 1;
        }
        Ok(out)
    }

    /// Wholesale assignment; validates and always counts as a change when
    /// the value differs.
    pub fn replace(&mut self, value: Value) -> Result<(), WarrenError> {
        self.mutate(|state| *state = value).map(|_| ())
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
