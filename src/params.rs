//! Change-tracked parameters
//!
//! A [`Parameter`] remembers the value it last had on the broker, so a
//! publisher can send only what actually changed. Values are compared as a
//! whole: setting a parameter back to its published value makes it clean
//! again.

use crate::transport::{DataItem, Value};

/// Named value with publish tracking
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: Value,
    published: Option<Value>,
}

impl Parameter {
    /// Parameter without a value yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Missing,
            published: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Update the value; returns whether it now differs from the broker's copy
    pub fn set(&mut self, value: impl Into<Value>) -> bool {
        self.value = value.into();
        self.is_pending()
    }

    /// Never published, or changed since
    pub fn is_pending(&self) -> bool {
        self.published.as_ref() != Some(&self.value)
    }

    pub fn mark_published(&mut self) {
        self.published = Some(self.value.clone());
    }

    /// Treat the broker's copy as unknown, for example after a reconnect
    pub fn invalidate(&mut self) {
        self.published = None;
    }

    pub fn item(&self) -> DataItem {
        DataItem {
            key: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

/// Ordered collection of parameters, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, adding the parameter on first use
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(param) => param.set(value),
            None => {
                self.params.push(Parameter::with_value(name, value));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.params.iter().any(Parameter::is_pending)
    }

    /// Items changed since their last publish
    pub fn pending_items(&self) -> Vec<DataItem> {
        self.params
            .iter()
            .filter(|p| p.is_pending())
            .map(Parameter::item)
            .collect()
    }

    /// Every item, changed or not
    pub fn all_items(&self) -> Vec<DataItem> {
        self.params.iter().map(Parameter::item).collect()
    }

    /// Record the current values as published
    pub fn commit(&mut self) {
        self.params.iter_mut().for_each(Parameter::mark_published);
    }

    /// Forget the broker's copies so every value goes out again
    pub fn invalidate(&mut self) {
        self.params.iter_mut().for_each(Parameter::invalidate);
    }
}
