use homeboard_core::{
    BookmarkPayload, Collection, DayKey, DomainError, EntityPayload, FilteredView, JournalPayload,
    MutationOutcome, Record, RecordId, Selector, TaskPayload,
};
use homeboard_gateway::{Gateway, LoadSource, SaveDurability};

pub type TaskManager = Manager<TaskPayload>;
pub type BookmarkManager = Manager<BookmarkPayload>;
pub type JournalManager = Manager<JournalPayload>;

/// Owns the in-memory collection for one entity kind and serializes every
/// mutation through the persistence gateway.
///
/// Lifecycle is explicit: construct with a gateway, call [`Manager::load`],
/// then mutate. Every mutation runs the collection operation, saves the whole
/// collection through the gateway (recording how durable the write got), and
/// recomputes the filtered view handed to the presentation side. The manager
/// assumes a single caller per session; it takes no locks.
pub struct Manager<P: EntityPayload> {
    gateway: Gateway,
    collection: Collection<P>,
    selector: Selector,
    query: String,
    view: FilteredView<P>,
    load_source: Option<LoadSource>,
    last_save: Option<SaveDurability>,
}

impl<P: EntityPayload> Manager<P> {
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            collection: Collection::new(),
            selector: Selector::All,
            query: String::new(),
            view: FilteredView::default(),
            load_source: None,
            last_save: None,
        }
    }

    /// Populate the collection from the gateway. Never fails; an unreachable
    /// remote degrades to the cache and then to an empty collection.
    pub fn load(&mut self) {
        let (collection, source) = self.gateway.load::<P>();
        self.collection = collection;
        self.load_source = Some(source);
        self.refresh_view();
    }

    fn refresh_view(&mut self) {
        self.view = self.collection.filtered(&self.selector, &self.query);
    }

    fn commit(&mut self) {
        self.last_save = Some(self.gateway.save(&self.collection));
        self.refresh_view();
    }

    /// # Errors
    /// Returns [`DomainError::Validation`] for an invalid payload or day key;
    /// nothing is saved in that case.
    pub fn create(&mut self, day: Option<DayKey>, payload: P) -> Result<Record<P>, DomainError> {
        let record = self.collection.create(day, payload)?;
        self.commit();
        Ok(record)
    }

    /// # Errors
    /// Returns [`DomainError::Validation`] when the merged payload would be
    /// invalid; a missing record is reported through the outcome instead.
    pub fn update(
        &mut self,
        day: Option<DayKey>,
        id: RecordId,
        patch: P::Patch,
    ) -> Result<MutationOutcome, DomainError> {
        let outcome = self.collection.update(day, id, patch)?;
        self.commit();
        Ok(outcome)
    }

    /// # Errors
    /// Returns [`DomainError::Validation`] for a day key that does not fit
    /// the kind's bucketing.
    pub fn delete(
        &mut self,
        day: Option<DayKey>,
        id: RecordId,
    ) -> Result<MutationOutcome, DomainError> {
        let outcome = self.collection.delete(day, id)?;
        self.commit();
        Ok(outcome)
    }

    /// Move a record to another day bucket. The replacement record carries a
    /// new id (inherited edit-across-days behavior).
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] for an invalid payload or for a
    /// kind that is not day-bucketed.
    pub fn move_day(
        &mut self,
        old_day: DayKey,
        new_day: DayKey,
        id: RecordId,
        payload: P,
    ) -> Result<Record<P>, DomainError> {
        let record = self.collection.move_day(old_day, new_day, id, payload)?;
        self.commit();
        Ok(record)
    }

    pub fn set_selector(&mut self, selector: Selector) {
        self.selector = selector;
        self.refresh_view();
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.refresh_view();
    }

    /// The current filtered projection, ready for a presentation sink.
    #[must_use]
    pub fn view(&self) -> &FilteredView<P> {
        &self.view
    }

    #[must_use]
    pub fn collection(&self) -> &Collection<P> {
        &self.collection
    }

    #[must_use]
    pub fn load_source(&self) -> Option<LoadSource> {
        self.load_source
    }

    /// Durability of the most recent save, if any mutation happened yet.
    #[must_use]
    pub fn last_save(&self) -> Option<SaveDurability> {
        self.last_save
    }
}

impl Manager<TaskPayload> {
    /// Flip a task's completion flag and persist.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] only for bucketing mismatches; a
    /// missing record is an outcome, not an error.
    pub fn toggle(&mut self, day: DayKey, id: RecordId) -> Result<MutationOutcome, DomainError> {
        let outcome = self.collection.toggle(day, id)?;
        self.commit();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    use anyhow::{anyhow, Result};
    use homeboard_core::EntityKind;
    use homeboard_gateway::RemoteStore;
    use homeboard_store_file::JsonDocumentStore;
    use serde_json::Value;

    use super::*;

    struct FakeRemote {
        documents: RefCell<BTreeMap<EntityKind, Value>>,
        fail: Cell<bool>,
    }

    impl FakeRemote {
        fn leaked() -> &'static Self {
            Box::leak(Box::new(Self {
                documents: RefCell::new(BTreeMap::new()),
                fail: Cell::new(false),
            }))
        }
    }

    impl RemoteStore for &FakeRemote {
        fn fetch(&self, kind: EntityKind) -> Result<Value> {
            if self.fail.get() {
                return Err(anyhow!("remote unavailable"));
            }
            Ok(self.documents.borrow().get(&kind).cloned().unwrap_or_else(|| kind.empty_wire()))
        }

        fn replace(&self, kind: EntityKind, collection: &Value) -> Result<bool> {
            if self.fail.get() {
                return Err(anyhow!("remote unavailable"));
            }
            self.documents.borrow_mut().insert(kind, collection.clone());
            Ok(true)
        }
    }

    fn gateway(remote: &'static FakeRemote) -> Gateway {
        let dir = std::env::temp_dir().join(format!("homeboard-api-{}", ulid::Ulid::new()));
        let cache = match JsonDocumentStore::open(&dir) {
            Ok(cache) => cache,
            Err(err) => panic!("failed to open temp cache: {err}"),
        };
        Gateway::new(Box::new(remote), cache)
    }

    fn day(value: &str) -> DayKey {
        match value.parse() {
            Ok(day) => day,
            Err(err) => panic!("invalid fixture day {value}: {err}"),
        }
    }

    fn task(text: &str) -> TaskPayload {
        TaskPayload { text: text.to_string(), completed: false }
    }

    fn must<T>(result: Result<T, DomainError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("operation should succeed: {err}"),
        }
    }

    #[test]
    fn create_persists_remotely_and_refreshes_view() {
        let remote = FakeRemote::leaked();
        let mut manager = TaskManager::new(gateway(remote));
        manager.load();
        assert_eq!(manager.load_source(), Some(homeboard_gateway::LoadSource::Remote));

        let record = must(manager.create(Some(day("2025-01-15")), task("buy milk")));
        assert_eq!(manager.last_save(), Some(SaveDurability::Remote));
        assert_eq!(manager.view().total_records(), 1);
        assert_eq!(manager.view().buckets[0].records[0].id, record.id);

        let stored = remote.documents.borrow().get(&EntityKind::Task).cloned();
        let Some(Value::Object(map)) = stored else {
            panic!("remote should hold a day-keyed object, got {stored:?}");
        };
        assert!(map.contains_key("2025-01-15"));
    }

    #[test]
    fn mutations_save_even_when_remote_is_down() {
        let remote = FakeRemote::leaked();
        let mut manager = TaskManager::new(gateway(remote));
        manager.load();

        remote.fail.set(true);
        let _record = must(manager.create(Some(day("2025-01-15")), task("offline")));
        assert_eq!(manager.last_save(), Some(SaveDurability::LocalOnly));
        // The mutation already happened in memory; the UI proceeds.
        assert_eq!(manager.view().total_records(), 1);
    }

    #[test]
    fn a_second_session_sees_what_the_first_saved() {
        let remote = FakeRemote::leaked();
        let mut first = TaskManager::new(gateway(remote));
        first.load();
        let record = must(first.create(Some(day("2025-01-15")), task("persisted")));

        let mut second = TaskManager::new(gateway(remote));
        second.load();
        assert_eq!(second.collection().total_records(), 1);
        let stored = second.collection().get(Some(day("2025-01-15")), record.id);
        match stored {
            Some(stored) => assert_eq!(stored.payload.text, "persisted"),
            None => panic!("record should round-trip through the remote"),
        }
    }

    #[test]
    fn toggle_and_delete_flow_through_the_gateway() {
        let remote = FakeRemote::leaked();
        let mut manager = TaskManager::new(gateway(remote));
        manager.load();
        let record = must(manager.create(Some(day("2025-01-15")), task("flip me")));

        assert_eq!(must(manager.toggle(day("2025-01-15"), record.id)), MutationOutcome::Applied);
        assert_eq!(must(manager.delete(Some(day("2025-01-15")), record.id)), MutationOutcome::Applied);
        assert!(!manager.collection().contains_day(day("2025-01-15")));

        let stored = remote.documents.borrow().get(&EntityKind::Task).cloned();
        assert_eq!(stored, Some(serde_json::json!({})));
    }

    #[test]
    fn stale_delete_is_observable_but_harmless() {
        let remote = FakeRemote::leaked();
        let mut manager = TaskManager::new(gateway(remote));
        manager.load();
        let record = must(manager.create(Some(day("2025-01-15")), task("twice")));

        assert_eq!(must(manager.delete(Some(day("2025-01-15")), record.id)), MutationOutcome::Applied);
        assert_eq!(
            must(manager.delete(Some(day("2025-01-15")), record.id)),
            MutationOutcome::NotFound
        );
    }

    #[test]
    fn selector_and_query_changes_recompute_the_view() {
        let remote = FakeRemote::leaked();
        let mut manager = BookmarkManager::new(gateway(remote));
        manager.load();
        let _a = must(manager.create(
            None,
            BookmarkPayload {
                title: "Site A".to_string(),
                url: "https://a.example".to_string(),
                category: "dev".to_string(),
                desc: String::new(),
            },
        ));
        let _b = must(manager.create(
            None,
            BookmarkPayload {
                title: "Site B".to_string(),
                url: "https://b.example".to_string(),
                category: "news".to_string(),
                desc: String::new(),
            },
        ));

        manager.set_selector(Selector::Category("dev".to_string()));
        assert_eq!(manager.view().total_records(), 1);

        manager.set_selector(Selector::All);
        manager.set_query("site a");
        assert_eq!(manager.view().total_records(), 1);
        assert_eq!(manager.view().buckets[0].records[0].payload.title, "Site A");

        manager.set_query("");
        assert_eq!(manager.view().total_records(), 2);
    }

    #[test]
    fn validation_failure_saves_nothing() {
        let remote = FakeRemote::leaked();
        let mut manager = TaskManager::new(gateway(remote));
        manager.load();

        assert!(manager.create(Some(day("2025-01-15")), task("   ")).is_err());
        assert_eq!(manager.last_save(), None);
        assert!(remote.documents.borrow().get(&EntityKind::Task).is_none());
    }

    #[test]
    fn move_day_mints_a_new_id_and_persists_both_buckets() {
        let remote = FakeRemote::leaked();
        let mut manager = JournalManager::new(gateway(remote));
        manager.load();
        let record = must(manager.create(
            Some(day("2025-01-15")),
            JournalPayload { content: "note".to_string(), tags: Vec::new(), time: None },
        ));

        let moved = must(manager.move_day(
            day("2025-01-15"),
            day("2025-01-16"),
            record.id,
            record.payload.clone(),
        ));
        assert_ne!(moved.id, record.id);
        assert!(!manager.collection().contains_day(day("2025-01-15")));

        let stored = remote.documents.borrow().get(&EntityKind::Journal).cloned();
        let Some(Value::Object(map)) = stored else {
            panic!("remote should hold a day-keyed object, got {stored:?}");
        };
        assert!(!map.contains_key("2025-01-15"));
        assert!(map.contains_key("2025-01-16"));
    }
}
