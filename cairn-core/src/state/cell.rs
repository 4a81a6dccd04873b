use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cairn_types::{ActionSource, LoadPriority, StateValue, Variant};
use parking_lot::RwLock;

use super::registry::RegistryShared;
use super::{StateBase, StateError, StateRegistry};
use crate::signal::Signal;

/// Payload of a cell's change signal.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange<T> {
    pub value: T,
    pub source: ActionSource,
}

type Check<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

enum Constraint<T> {
    Unrestricted,
    Range {
        min: T,
        max: T,
        contains: fn(&T, &T, &T) -> bool,
        clamp: fn(T, &T, &T) -> T,
    },
    Options(Vec<String>),
    Custom(Check<T>),
}

impl<T: StateValue> Constraint<T> {
    fn check(&self, value: &T) -> Result<(), String> {
        match self {
            Constraint::Unrestricted => Ok(()),
            Constraint::Range {
                min, max, contains, ..
            } => {
                if contains(value, min, max) {
                    Ok(())
                } else {
                    Err(format!(
                        "{} is outside the range [{}, {}]",
                        value.to_state_string(),
                        min.to_state_string(),
                        max.to_state_string()
                    ))
                }
            }
            Constraint::Options(options) => {
                let text = value.to_state_string();
                if options.iter().any(|o| *o == text) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of [{}]", text, options.join(",")))
                }
            }
            Constraint::Custom(check) => check(value),
        }
    }
}

fn in_range<T: PartialOrd>(value: &T, min: &T, max: &T) -> bool {
    value >= min && value <= max
}

fn clamp_to<T: PartialOrd + Clone>(value: T, min: &T, max: &T) -> T {
    if value < *min {
        min.clone()
    } else if value > *max {
        max.clone()
    } else {
        value
    }
}

/// Builder for a [`StateCell`]. Cells are normally created through
/// [`StateCellBuilder::register`] so they share the registry lock.
pub struct StateCellBuilder<T: StateValue> {
    id: String,
    default: T,
    constraint: Constraint<T>,
    project_data: bool,
    locked: bool,
    priority: LoadPriority,
}

impl<T: StateValue> StateCellBuilder<T> {
    /// Mark the cell as part of the saved session.
    pub fn project_data(mut self) -> Self {
        self.project_data = true;
        self
    }

    pub fn session_priority(mut self, priority: LoadPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Locked cells refuse writes that arrive through the action path.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraint = Constraint::Options(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator(
        mut self,
        check: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.constraint = Constraint::Custom(Arc::new(check));
        self
    }

    /// Build a cell that is not attached to any registry.
    pub fn build(self) -> StateCell<T> {
        StateCell {
            id: self.id,
            value: RwLock::new(self.default),
            constraint: RwLock::new(self.constraint),
            changed: Signal::new(),
            locked: AtomicBool::new(self.locked),
            project_data: self.project_data,
            priority: self.priority,
            registry: Weak::new(),
        }
    }

    pub fn register(self, registry: &StateRegistry) -> Result<Arc<StateCell<T>>, StateError> {
        registry.add(self.build())
    }

    /// Register under an id the caller reserved earlier.
    pub fn register_reserved(
        self,
        registry: &StateRegistry,
    ) -> Result<Arc<StateCell<T>>, StateError> {
        registry.add_reserved(self.build())
    }
}

impl<T: StateValue + PartialOrd> StateCellBuilder<T> {
    /// Restrict the value to `[min, max]`. Out-of-range writes are rejected.
    pub fn ranged(mut self, min: T, max: T) -> Self {
        self.constraint = Constraint::Range {
            min,
            max,
            contains: in_range::<T>,
            clamp: clamp_to::<T>,
        };
        self
    }
}

/// A named, typed, observable value.
pub struct StateCell<T: StateValue> {
    id: String,
    value: RwLock<T>,
    constraint: RwLock<Constraint<T>>,
    changed: Signal<StateChange<T>>,
    locked: AtomicBool,
    project_data: bool,
    priority: LoadPriority,
    pub(super) registry: Weak<RegistryShared>,
}

impl<T: StateValue> StateCell<T> {
    pub fn builder(id: impl Into<String>, default: T) -> StateCellBuilder<T> {
        StateCellBuilder {
            id: id.into(),
            default,
            constraint: Constraint::Unrestricted,
            project_data: false,
            locked: false,
            priority: LoadPriority::DEFAULT_LOAD,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    pub fn changed(&self) -> &Signal<StateChange<T>> {
        &self.changed
    }

    pub fn check(&self, value: &T) -> Result<(), String> {
        self.constraint.read().check(value)
    }

    /// Write a new value. Returns `Ok(false)` without notifying when the
    /// value is unchanged.
    pub fn set(&self, value: T, source: ActionSource) -> Result<bool, StateError> {
        let registry = self.registry.upgrade();
        let guard = registry.as_ref().map(|r| r.lock());

        if let Err(reason) = self.check(&value) {
            return Err(StateError::Rejected {
                id: self.id.clone(),
                reason,
            });
        }
        {
            let mut current = self.value.write();
            if *current == value {
                return Ok(false);
            }
            *current = value.clone();
        }

        drop(guard);
        self.changed.emit(StateChange { value, source });
        Ok(true)
    }

    pub fn options(&self) -> Option<Vec<String>> {
        match &*self.constraint.read() {
            Constraint::Options(options) => Some(options.clone()),
            _ => None,
        }
    }

    /// Replace the option list. A current value missing from the new list
    /// falls back to the first option.
    pub fn set_options(&self, options: Vec<String>, source: ActionSource) -> bool {
        let registry = self.registry.upgrade();
        let guard = registry.as_ref().map(|r| r.lock());

        let fallback = options.first().and_then(|o| T::from_state_string(o));
        *self.constraint.write() = Constraint::Options(options);
        let changed = {
            let mut current = self.value.write();
            match fallback {
                Some(first) if self.constraint.read().check(&current).is_err() => {
                    *current = first.clone();
                    Some(first)
                }
                _ => None,
            }
        };

        drop(guard);
        match changed {
            Some(value) => {
                self.changed.emit(StateChange { value, source });
                true
            }
            None => false,
        }
    }
}

impl<T: StateValue + PartialOrd> StateCell<T> {
    pub fn range(&self) -> Option<(T, T)> {
        match &*self.constraint.read() {
            Constraint::Range { min, max, .. } => Some((min.clone(), max.clone())),
            _ => None,
        }
    }

    /// Change the allowed range, clamping the current value into it.
    pub fn set_range(&self, min: T, max: T, source: ActionSource) -> bool {
        let registry = self.registry.upgrade();
        let guard = registry.as_ref().map(|r| r.lock());

        let clamped = {
            let mut current = self.value.write();
            let next = clamp_to(current.clone(), &min, &max);
            *self.constraint.write() = Constraint::Range {
                min,
                max,
                contains: in_range::<T>,
                clamp: clamp_to::<T>,
            };
            if next != *current {
                *current = next.clone();
                Some(next)
            } else {
                None
            }
        };

        drop(guard);
        match clamped {
            Some(value) => {
                self.changed.emit(StateChange { value, source });
                true
            }
            None => false,
        }
    }

    /// Clamp a candidate into the current range without writing it.
    pub fn clamp(&self, value: T) -> T {
        match &*self.constraint.read() {
            Constraint::Range {
                min, max, clamp, ..
            } => clamp(value, min, max),
            _ => value,
        }
    }
}

impl<T: StateValue> StateBase for StateCell<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn export_to_string(&self) -> String {
        self.get().to_state_string()
    }

    fn import_from_string(&self, text: &str, source: ActionSource) -> bool {
        let Some(value) = T::from_state_string(text) else {
            log::debug!(target: "state", "{}: cannot convert '{}'", self.id, text);
            return false;
        };
        match self.set(value, source) {
            Ok(_) => true,
            Err(e) => {
                log::debug!(target: "state", "{}", e);
                false
            }
        }
    }

    fn export_to_variant(&self) -> Variant {
        self.get().to_variant()
    }

    fn import_from_variant(
        &self,
        value: &Variant,
        source: ActionSource,
    ) -> Result<bool, StateError> {
        let converted = T::from_variant(value).ok_or_else(|| StateError::Conversion {
            id: self.id.clone(),
            value: value.to_string(),
        })?;
        self.set(converted, source)
    }

    fn validate_variant(&self, value: &Variant) -> Result<(), String> {
        let converted = T::from_variant(value).ok_or_else(|| {
            format!(
                "cannot convert {} '{}' for state '{}'",
                value.type_name(),
                value,
                self.id
            )
        })?;
        self.check(&converted)
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    fn is_project_data(&self) -> bool {
        self.project_data
    }

    fn session_priority(&self) -> LoadPriority {
        self.priority
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: StateValue> std::fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .finish()
    }
}
