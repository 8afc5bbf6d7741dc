//! Client-side item filters

use serde_json::Value;

/// Client-side filter over list items
///
/// Implemented for any `Fn(&T) -> bool`, so closures work directly.
pub trait Predicate<T: ?Sized> {
    fn matches(&self, item: &T) -> bool;
}

impl<T: ?Sized, F> Predicate<T> for F
where
    F: Fn(&T) -> bool,
{
    fn matches(&self, item: &T) -> bool {
        self(item)
    }
}

/// Default predicate: keeps every item
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<T: ?Sized> Predicate<T> for AcceptAll {
    fn matches(&self, _item: &T) -> bool {
        true
    }
}

/// Compare one declared filter value against an item's value
///
/// An unset filter accepts anything. A set filter rejects the item when the
/// item's value is absent or different.
pub fn field_matches<V: PartialEq + ?Sized>(desired: Option<&V>, actual: Option<&V>) -> bool {
    match desired {
        None => true,
        Some(desired) => actual.is_some_and(|actual| actual == desired),
    }
}

/// Look up a value using a dot-notation path (`properties.hardwareProfile.vmSize`,
/// `tags.env`, `zones.0`). JSON `null` counts as absent.
pub fn lookup<'v>(item: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = item;
    for part in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(part)?,
            _ => return None,
        };
    }

    match current {
        Value::Null => None,
        value => Some(value),
    }
}

/// Equality filter over JSON items, one condition per field path
///
/// All conditions must hold. A condition declared with `None` is ignored,
/// mirroring an unset field on a typed filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPredicate {
    conditions: Vec<(String, Option<Value>)>,
}

impl FieldPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `path` to equal `desired`
    pub fn field(mut self, path: impl Into<String>, desired: impl Into<Value>) -> Self {
        self.conditions.push((path.into(), Some(desired.into())));
        self
    }

    /// Require `path` to equal `desired` when it is set
    pub fn optional_field(mut self, path: impl Into<String>, desired: Option<Value>) -> Self {
        self.conditions.push((path.into(), desired));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.iter().all(|(_, desired)| desired.is_none())
    }
}

impl Predicate<Value> for FieldPredicate {
    fn matches(&self, item: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(path, desired)| field_matches(desired.as_ref(), lookup(item, path)))
    }
}
