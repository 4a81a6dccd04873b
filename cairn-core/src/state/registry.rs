use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use cairn_types::{ActionSource, LoadPriority, StateValue};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use super::{StateBase, StateCell, StateError};
use crate::signal::Signal;

struct Entry {
    cell: Weak<dyn StateBase>,
    seq: u64,
}

pub(super) struct RegistryInner {
    states: HashMap<String, Entry>,
    /// Ids handed out by `create_unique_id` or claimed by a group prefix.
    reserved: HashSet<String>,
    /// Removed cells that still have live handles somewhere.
    retired: Vec<(String, Weak<dyn StateBase>)>,
    aliases: HashMap<String, String>,
    next_seq: u64,
}

impl RegistryInner {
    fn is_live(&self, id: &str) -> bool {
        self.states
            .get(id)
            .is_some_and(|e| e.cell.strong_count() > 0)
            || self
                .retired
                .iter()
                .any(|(rid, cell)| rid == id && cell.strong_count() > 0)
    }

    fn is_taken(&self, id: &str) -> bool {
        self.is_live(id) || self.reserved.contains(id)
    }

    fn prune_retired(&mut self) {
        self.retired.retain(|(_, cell)| cell.strong_count() > 0);
    }
}

pub(super) struct RegistryShared {
    inner: ReentrantMutex<RefCell<RegistryInner>>,
    list_changed: Signal<()>,
}

impl RegistryShared {
    pub(super) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<RegistryInner>> {
        self.inner.lock()
    }
}

/// Held lock on a registry. Every cell write made while the guard lives on
/// this thread is part of one serialised region.
pub struct RegistryGuard<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<RegistryInner>>,
}

/// Directory of every state cell in one workspace.
///
/// Cells are owned by whoever registered them; the registry keeps weak
/// references, so a cell disappears from lookups once its owner drops it.
#[derive(Clone)]
pub struct StateRegistry {
    shared: Arc<RegistryShared>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                inner: ReentrantMutex::new(RefCell::new(RegistryInner {
                    states: HashMap::new(),
                    reserved: HashSet::new(),
                    retired: Vec::new(),
                    aliases: HashMap::new(),
                    next_seq: 0,
                })),
                list_changed: Signal::new(),
            }),
        }
    }

    /// Take the registry lock. The lock is re-entrant, so cells can still
    /// be written from the same thread while the guard is held.
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            _guard: self.shared.lock(),
        }
    }

    /// Emitted whenever cells are added or removed.
    pub fn list_changed(&self) -> &Signal<()> {
        &self.shared.list_changed
    }

    /// Attach a cell and register it under its id. Ids reserved with
    /// [`create_unique_id`](Self::create_unique_id) or
    /// [`reserve_id`](Self::reserve_id) are refused; their holder claims
    /// them with [`add_reserved`](Self::add_reserved).
    pub fn add<T: StateValue>(&self, cell: StateCell<T>) -> Result<Arc<StateCell<T>>, StateError> {
        self.attach(cell, false)
    }

    /// Register a cell under an id previously reserved for it, consuming
    /// the reservation.
    pub fn add_reserved<T: StateValue>(
        &self,
        cell: StateCell<T>,
    ) -> Result<Arc<StateCell<T>>, StateError> {
        self.attach(cell, true)
    }

    fn attach<T: StateValue>(
        &self,
        mut cell: StateCell<T>,
        claim: bool,
    ) -> Result<Arc<StateCell<T>>, StateError> {
        cell.registry = Arc::downgrade(&self.shared);
        let id = cell.id().to_string();
        let cell = Arc::new(cell);
        {
            let guard = self.shared.lock();
            let mut inner = guard.borrow_mut();
            inner.prune_retired();
            if inner.is_live(&id) {
                return Err(StateError::DuplicateId(id));
            }
            let was_reserved = inner.reserved.remove(&id);
            if was_reserved != claim {
                if was_reserved {
                    inner.reserved.insert(id.clone());
                    return Err(StateError::DuplicateId(id));
                }
                return Err(StateError::NotReserved(id));
            }
            let erased: Arc<dyn StateBase> = cell.clone();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.states.insert(
                id.clone(),
                Entry {
                    cell: Arc::downgrade(&erased),
                    seq,
                },
            );
        }
        log::trace!(target: "state", "registered {}", id);
        self.shared.list_changed.emit(());
        Ok(cell)
    }

    /// Remove `id` and every `id::` child. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let guard = self.shared.lock();
            let mut inner = guard.borrow_mut();
            let child_prefix = format!("{}::", id);
            let keys: Vec<String> = inner
                .states
                .keys()
                .filter(|k| k.as_str() == id || k.starts_with(&child_prefix))
                .cloned()
                .collect();
            for key in &keys {
                if let Some(entry) = inner.states.remove(key) {
                    if entry.cell.strong_count() > 0 {
                        inner.retired.push((key.clone(), entry.cell));
                    }
                }
            }
            inner
                .reserved
                .retain(|r| r != id && !r.starts_with(&child_prefix));
            inner.aliases.retain(|_, target| !keys.contains(target));
            inner.prune_retired();
            !keys.is_empty()
        };
        if removed {
            log::trace!(target: "state", "removed {}", id);
            self.shared.list_changed.emit(());
        }
        removed
    }

    /// Look up a cell. A leading `$` resolves an alias.
    pub fn get(&self, id: &str) -> Option<Arc<dyn StateBase>> {
        let guard = self.shared.lock();
        let inner = guard.borrow();
        let key = match id.strip_prefix('$') {
            Some(alias) => inner.aliases.get(alias)?.as_str(),
            None => id,
        };
        inner.states.get(key)?.cell.upgrade()
    }

    pub fn get_typed<T: StateValue>(&self, id: &str) -> Option<Arc<StateCell<T>>> {
        self.get(id)?.as_any().downcast::<StateCell<T>>().ok()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Reserve and return `basename`, or `basename_N` with the smallest
    /// unused N.
    pub fn create_unique_id(&self, basename: &str) -> String {
        let guard = self.shared.lock();
        let mut inner = guard.borrow_mut();
        inner.prune_retired();
        let mut candidate = basename.to_string();
        let mut n = 1;
        while inner.is_taken(&candidate) {
            candidate = format!("{}_{}", basename, n);
            n += 1;
        }
        inner.reserved.insert(candidate.clone());
        candidate
    }

    /// Claim an exact id without creating a cell for it.
    pub fn reserve_id(&self, id: &str) -> Result<(), StateError> {
        let guard = self.shared.lock();
        let mut inner = guard.borrow_mut();
        inner.prune_retired();
        if inner.is_taken(id) {
            return Err(StateError::DuplicateId(id.to_string()));
        }
        inner.reserved.insert(id.to_string());
        Ok(())
    }

    pub fn release_id(&self, id: &str) -> bool {
        let guard = self.shared.lock();
        let removed = guard.borrow_mut().reserved.remove(id);
        removed
    }

    pub fn add_alias(&self, alias: &str, id: &str) -> Result<(), StateError> {
        let guard = self.shared.lock();
        let mut inner = guard.borrow_mut();
        if !inner.is_live(id) {
            return Err(StateError::NotFound(id.to_string()));
        }
        if inner.aliases.contains_key(alias) {
            return Err(StateError::DuplicateAlias(alias.to_string()));
        }
        inner.aliases.insert(alias.to_string(), id.to_string());
        Ok(())
    }

    /// Like [`add_alias`](Self::add_alias), but disambiguates a taken alias
    /// as `basename_N`.
    pub fn add_unique_alias(&self, basename: &str, id: &str) -> Result<String, StateError> {
        let guard = self.shared.lock();
        let mut inner = guard.borrow_mut();
        if !inner.is_live(id) {
            return Err(StateError::NotFound(id.to_string()));
        }
        let mut candidate = basename.to_string();
        let mut n = 1;
        while inner.aliases.contains_key(&candidate) {
            candidate = format!("{}_{}", basename, n);
            n += 1;
        }
        inner.aliases.insert(candidate.clone(), id.to_string());
        Ok(candidate)
    }

    pub fn remove_alias(&self, alias: &str) -> bool {
        let guard = self.shared.lock();
        let removed = guard.borrow_mut().aliases.remove(alias).is_some();
        removed
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        let guard = self.shared.lock();
        let target = guard.borrow().aliases.get(alias).cloned();
        target
    }

    /// Live state ids in registration order.
    pub fn state_ids(&self) -> Vec<String> {
        self.live_cells()
            .into_iter()
            .map(|cell| cell.id().to_string())
            .collect()
    }

    pub fn num_states(&self) -> usize {
        self.live_cells().len()
    }

    fn live_cells(&self) -> Vec<Arc<dyn StateBase>> {
        let guard = self.shared.lock();
        let inner = guard.borrow();
        let mut cells: Vec<(u64, Arc<dyn StateBase>)> = inner
            .states
            .values()
            .filter_map(|e| e.cell.upgrade().map(|cell| (e.seq, cell)))
            .collect();
        cells.sort_by_key(|(seq, _)| *seq);
        cells.into_iter().map(|(_, cell)| cell).collect()
    }

    /// Project-data cells as `(id, value)` pairs in registration order.
    pub fn export_session(&self) -> Vec<(String, String)> {
        self.live_cells()
            .into_iter()
            .filter(|cell| cell.is_project_data())
            .map(|cell| (cell.id().to_string(), cell.export_to_string()))
            .collect()
    }

    /// Import saved `(id, value)` pairs. Cells load by descending priority,
    /// keeping saved order within a priority; `DO_NOT_LOAD` cells are
    /// skipped. Returns the ids that could not be restored.
    pub fn import_session(&self, entries: &[(String, String)], source: ActionSource) -> Vec<String> {
        let mut failed = Vec::new();
        let mut pending: Vec<(LoadPriority, usize, Arc<dyn StateBase>, &str)> = Vec::new();

        for (index, (id, value)) in entries.iter().enumerate() {
            match self.get(id) {
                Some(cell) if cell.is_project_data() => {
                    let priority = cell.session_priority();
                    if priority != LoadPriority::DO_NOT_LOAD {
                        pending.push((priority, index, cell, value.as_str()));
                    }
                }
                Some(_) => {}
                None => {
                    log::warn!(target: "state", "session entry for unknown state '{}'", id);
                    failed.push(id.clone());
                }
            }
        }

        pending.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for (_, _, cell, value) in pending {
            if !cell.import_from_string(value, source) {
                log::warn!(target: "state", "could not restore '{}' from '{}'", cell.id(), value);
                failed.push(cell.id().to_string());
            }
        }
        failed
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("states", &self.num_states())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unique_ids_count_up_from_one() {
        let registry = StateRegistry::new();
        assert_eq!(registry.create_unique_id("Layer"), "Layer");
        assert_eq!(registry.create_unique_id("Layer"), "Layer_1");
        assert_eq!(registry.create_unique_id("Layer"), "Layer_2");
    }

    #[test]
    fn unique_id_reuses_released_slot() {
        let registry = StateRegistry::new();
        registry.create_unique_id("Tool");
        let second = registry.create_unique_id("Tool");
        registry.create_unique_id("Tool");
        assert!(registry.release_id(&second));
        assert_eq!(registry.create_unique_id("Tool"), "Tool_1");
    }

    #[test]
    fn reserved_ids_need_their_reservation() {
        let registry = StateRegistry::new();
        let id = registry.create_unique_id("Tool");
        let err = StateCell::builder(id.as_str(), 1i64).register(&registry).unwrap_err();
        assert_eq!(err, StateError::DuplicateId(id.clone()));
        assert_eq!(registry.create_unique_id("Tool"), "Tool_1");

        let cell = StateCell::builder(id.as_str(), 2i64)
            .register_reserved(&registry)
            .unwrap();
        assert_eq!(cell.get(), 2);
        assert!(!registry.release_id(&id));

        let err = StateCell::builder("Brush", 0i64)
            .register_reserved(&registry)
            .unwrap_err();
        assert_eq!(err, StateError::NotReserved("Brush".into()));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = StateRegistry::new();
        let _a = StateCell::builder("a", 1i64).register(&registry).unwrap();
        let err = StateCell::builder("a", 2i64).register(&registry).unwrap_err();
        assert_eq!(err, StateError::DuplicateId("a".into()));
    }

    #[test]
    fn remove_takes_children_and_is_idempotent() {
        let registry = StateRegistry::new();
        let _a = StateCell::builder("Tool::Brush", 0i64).register(&registry).unwrap();
        let _b = StateCell::builder("Tool::Brush::Radius", 3i64)
            .register(&registry)
            .unwrap();
        let _c = StateCell::builder("Tool::BrushSize", 1i64).register(&registry).unwrap();

        assert!(registry.remove("Tool::Brush"));
        assert!(!registry.contains("Tool::Brush::Radius"));
        assert!(registry.contains("Tool::BrushSize"));
        assert!(!registry.remove("Tool::Brush"));
    }

    #[test]
    fn ids_stay_reserved_while_handles_live() {
        let registry = StateRegistry::new();
        let held = StateCell::builder("x", 1i64).register(&registry).unwrap();
        registry.remove("x");
        assert!(StateCell::builder("x", 2i64).register(&registry).is_err());
        assert_eq!(registry.create_unique_id("x"), "x_1");

        drop(held);
        assert!(StateCell::builder("x", 3i64).register(&registry).is_ok());
    }

    #[test]
    fn dropped_cells_vanish_from_lookups() {
        let registry = StateRegistry::new();
        let cell = StateCell::builder("temp", 0i64).register(&registry).unwrap();
        assert!(registry.contains("temp"));
        drop(cell);
        assert!(!registry.contains("temp"));
        assert_eq!(registry.num_states(), 0);
    }

    #[test]
    fn aliases_resolve_with_dollar_prefix() {
        let registry = StateRegistry::new();
        let _cell = StateCell::builder("view::zoom", 1.0f64).register(&registry).unwrap();
        registry.add_alias("zoom", "view::zoom").unwrap();
        assert!(registry.get("$zoom").is_some());
        assert_eq!(
            registry.add_alias("zoom", "view::zoom"),
            Err(StateError::DuplicateAlias("zoom".into()))
        );
        assert_eq!(registry.add_unique_alias("zoom", "view::zoom").unwrap(), "zoom_1");

        registry.remove("view::zoom");
        assert!(registry.resolve_alias("zoom").is_none());
    }

    #[test]
    fn typed_lookup_checks_the_value_type() {
        let registry = StateRegistry::new();
        let _cell = StateCell::builder("n", 1i64).register(&registry).unwrap();
        assert!(registry.get_typed::<i64>("n").is_some());
        assert!(registry.get_typed::<String>("n").is_none());
    }

    #[test]
    fn observers_can_reenter_the_registry() {
        let registry = StateRegistry::new();
        let source = StateCell::builder("a", 0i64).register(&registry).unwrap();
        let mirror = StateCell::builder("b", 0i64).register(&registry).unwrap();

        let r = registry.clone();
        source.changed().connect(move |change| {
            let b = r.get_typed::<i64>("b").unwrap();
            b.set(change.value * 2, change.source).unwrap();
        });

        let _guard = registry.lock();
        source.set(4, ActionSource::None).unwrap();
        assert_eq!(mirror.get(), 8);
    }

    #[test]
    fn state_ids_follow_registration_order() {
        let registry = StateRegistry::new();
        let _c = StateCell::builder("c", 0i64).register(&registry).unwrap();
        let _a = StateCell::builder("a", 0i64).register(&registry).unwrap();
        let _b = StateCell::builder("b", 0i64).register(&registry).unwrap();
        assert_eq!(registry.state_ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn session_import_honours_priority() {
        let registry = StateRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let late = StateCell::builder("late", 0i64)
            .project_data()
            .session_priority(LoadPriority::LOAD_LAST)
            .register(&registry)
            .unwrap();
        let early = StateCell::builder("early", 0i64)
            .project_data()
            .register(&registry)
            .unwrap();
        let skipped = StateCell::builder("skipped", 0i64)
            .project_data()
            .session_priority(LoadPriority::DO_NOT_LOAD)
            .register(&registry)
            .unwrap();

        for cell in [&late, &early, &skipped] {
            let o = Arc::clone(&order);
            let id = cell.id().to_string();
            cell.changed().connect(move |_| o.lock().push(id.clone()));
        }

        let saved = vec![
            ("late".to_string(), "1".to_string()),
            ("early".to_string(), "2".to_string()),
            ("skipped".to_string(), "3".to_string()),
            ("gone".to_string(), "4".to_string()),
        ];
        let failed = registry.import_session(&saved, ActionSource::None);

        assert_eq!(failed, vec!["gone".to_string()]);
        assert_eq!(*order.lock(), vec!["early".to_string(), "late".to_string()]);
        assert_eq!(skipped.get(), 0);
    }

    #[test]
    fn list_changed_fires_on_add_and_remove() {
        let registry = StateRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        registry.list_changed().connect(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let _cell = StateCell::builder("a", 0i64).register(&registry).unwrap();
        registry.remove("a");
        registry.remove("a");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
