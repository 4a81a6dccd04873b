use std::sync::Arc;

use cairn_types::StateValue;

use super::{StateBase, StateCell, StateCellBuilder, StateError, StateRegistry};

/// Owner of a family of cells registered as `<prefix>::<key>`.
///
/// Dropping the group removes the prefix and all of its children from the
/// registry.
pub struct StateGroup {
    prefix: String,
    registry: StateRegistry,
    cells: Vec<Arc<dyn StateBase>>,
}

impl StateGroup {
    /// Create a group with an auto-numbered prefix (`type_name`,
    /// `type_name_1`, ...).
    pub fn new(registry: &StateRegistry, type_name: &str) -> Self {
        Self {
            prefix: registry.create_unique_id(type_name),
            registry: registry.clone(),
            cells: Vec::new(),
        }
    }

    /// Create a group with an exact prefix, failing if it is taken.
    pub fn with_prefix(registry: &StateRegistry, prefix: &str) -> Result<Self, StateError> {
        registry.reserve_id(prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
            registry: registry.clone(),
            cells: Vec::new(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}::{}", self.prefix, name)
    }

    /// Start a cell under this group's prefix; finish it with
    /// [`register`](Self::register).
    pub fn cell<T: StateValue>(&self, name: &str, default: T) -> StateCellBuilder<T> {
        StateCell::builder(self.key(name), default)
    }

    pub fn register<T: StateValue>(
        &mut self,
        builder: StateCellBuilder<T>,
    ) -> Result<Arc<StateCell<T>>, StateError> {
        let cell = builder.register(&self.registry)?;
        self.cells.push(cell.clone());
        Ok(cell)
    }

    pub fn states(&self) -> &[Arc<dyn StateBase>] {
        &self.cells
    }

    /// Owning group of a state id: everything before the first `::`.
    pub fn prefix_of(state_id: &str) -> &str {
        state_id.split("::").next().unwrap_or(state_id)
    }
}

impl Drop for StateGroup {
    fn drop(&mut self) {
        self.cells.clear();
        self.registry.remove(&self.prefix);
        self.registry.release_id(&self.prefix);
    }
}

impl std::fmt::Debug for StateGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGroup")
            .field("prefix", &self.prefix)
            .field("cells", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_number_their_prefixes() {
        let registry = StateRegistry::new();
        let a = StateGroup::new(&registry, "measurement");
        let b = StateGroup::new(&registry, "measurement");
        assert_eq!(a.prefix(), "measurement");
        assert_eq!(b.prefix(), "measurement_1");
    }

    #[test]
    fn dropping_group_unregisters_children() {
        let registry = StateRegistry::new();
        {
            let mut group = StateGroup::with_prefix(&registry, "layer_1").unwrap();
            let builder = group.cell("name", "CT".to_string());
            group.register(builder).unwrap();
            assert!(registry.contains("layer_1::name"));
            assert!(StateGroup::with_prefix(&registry, "layer_1").is_err());
        }
        assert!(!registry.contains("layer_1::name"));
        assert!(StateGroup::with_prefix(&registry, "layer_1").is_ok());
    }

    #[test]
    fn prefix_of_splits_on_first_separator() {
        assert_eq!(StateGroup::prefix_of("layer_2::opacity"), "layer_2");
        assert_eq!(StateGroup::prefix_of("plain"), "plain");
    }
}
