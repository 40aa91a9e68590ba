//! Record services: the write path used by the rest of the application.
//!
//! Every mutation appends exactly one queue entry describing it. Creates and
//! updates write the local store first; deletes queue first so the remote
//! reference is never lost. Both steps run under the record's lock so the
//! processor never observes a half-applied mutation. Updates are written
//! with [`RecordStore::replace`], so a writer in another process sharing
//! the database cannot be silently overwritten. Reads only touch the local
//! store.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde_json::Value;

use pawtrack_core::models::{
    CareItem, Contact, Entity, Event, EventType, Pet, Record, TrackingStamp,
};
use pawtrack_core::queue::{NewEntry, SyncQueue};
use pawtrack_core::store::{self, remote_id_of, RecordStore};

use crate::error::{SyncError, SyncResult};
use crate::locks::KeyedLocks;

/// Fields a caller may never overwrite through a patch.
const PROTECTED_FIELDS: [&str; 6] = [
    "id",
    "synced",
    "remote_id",
    "revision",
    "created_at",
    "updated_at",
];

/// Conditional writes tried before an update gives up on a record that
/// another process keeps rewriting.
const MAX_WRITE_ATTEMPTS: usize = 5;

pub struct RecordService<T: Entity> {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn SyncQueue>,
    locks: Arc<KeyedLocks>,
    _entity: PhantomData<fn() -> T>,
}

pub type Pets = RecordService<Pet>;
pub type Events = RecordService<Event>;
pub type Contacts = RecordService<Contact>;
pub type CareItems = RecordService<CareItem>;
pub type EventTypes = RecordService<EventType>;
pub type Stamps = RecordService<TrackingStamp>;

impl<T: Entity> RecordService<T> {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn SyncQueue>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            queue,
            locks,
            _entity: PhantomData,
        }
    }

    fn invalid(reason: String) -> SyncError {
        SyncError::Validation {
            collection: T::COLLECTION,
            reason,
        }
    }

    fn not_found(id: &str) -> SyncError {
        SyncError::NotFound {
            collection: T::COLLECTION,
            id: id.to_string(),
        }
    }

    /// Store a new record and queue its create.
    pub async fn create(&self, data: T) -> SyncResult<Record<T>> {
        data.validate().map_err(Self::invalid)?;
        let record = Record::new(data);

        let _guard = self.locks.lock(record.id()).await;
        store::save(self.store.as_ref(), &record).await?;
        self.queue.add(NewEntry::create(&record)?).await?;

        tracing::debug!(collection = %T::COLLECTION, id = %record.id(), "record created");
        Ok(record)
    }

    /// Merge `patch` (a JSON object of entity fields) into the record and
    /// queue an update. Bookkeeping keys in the patch are ignored.
    pub async fn update(&self, id: &str, patch: Value) -> SyncResult<Record<T>> {
        let Value::Object(fields) = patch else {
            return Err(Self::invalid("patch must be a JSON object".to_string()));
        };

        let _guard = self.locks.lock(id).await;
        self.commit_update(id, |mut current| {
            if let Some(object) = current.as_object_mut() {
                for (key, value) in &fields {
                    if !PROTECTED_FIELDS.contains(&key.as_str()) {
                        object.insert(key.clone(), value.clone());
                    }
                }
            }
            Record::from_json(current).map_err(|e| Self::invalid(format!("{:#}", e)))
        })
        .await
    }

    /// Apply `change` to the typed record and queue an update. `change` runs
    /// again if another process writes the record in the meantime.
    pub async fn update_with<F>(&self, id: &str, mut change: F) -> SyncResult<Record<T>>
    where
        F: FnMut(&mut T) + Send,
    {
        let _guard = self.locks.lock(id).await;
        self.commit_update(id, |current| {
            let mut record: Record<T> = Record::from_json(current)?;
            change(&mut record.data);
            Ok(record)
        })
        .await
    }

    /// Read, change, validate and conditionally write the record, then queue
    /// the update. The write only lands on the revision that was read; if a
    /// writer outside this process got there first, start over from its
    /// version. Caller holds the record lock.
    async fn commit_update<F>(&self, id: &str, mut change: F) -> SyncResult<Record<T>>
    where
        F: FnMut(Value) -> SyncResult<Record<T>> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .store
                .get(T::COLLECTION, id)
                .await?
                .ok_or_else(|| Self::not_found(id))?;

            let mut record = change(current)?;
            record.data.validate().map_err(Self::invalid)?;
            let read_revision = record.meta.revision;
            record.meta.touch();

            if self
                .store
                .replace(T::COLLECTION, id, &record.to_json()?, read_revision)
                .await?
            {
                self.queue.add(NewEntry::update(&record)?).await?;
                tracing::debug!(
                    collection = %T::COLLECTION,
                    id = %id,
                    revision = record.meta.revision,
                    "record updated"
                );
                return Ok(record);
            }
            tracing::debug!(
                collection = %T::COLLECTION,
                id = %id,
                "record changed underneath, rereading"
            );
        }

        Err(SyncError::Storage(anyhow!(
            "{} record {} kept changing during update",
            T::COLLECTION,
            id
        )))
    }

    /// Queue the record's delete and remove it locally. Returns `false` (and
    /// queues nothing) when the record does not exist.
    ///
    /// The entry goes in before the row comes out, so a drain that assigns a
    /// remote id in between either sees the row or finds the queued delete
    /// to hand the id to.
    pub async fn delete(&self, id: &str) -> SyncResult<bool> {
        let _guard = self.locks.lock(id).await;
        let Some(current) = self.store.get(T::COLLECTION, id).await? else {
            return Ok(false);
        };

        let mut entry = self
            .queue
            .add(NewEntry::delete(T::COLLECTION, id, remote_id_of(&current)))
            .await?;
        let removed = self.store.delete(T::COLLECTION, id).await?;

        // Acknowledged by a drain in another process since it was read.
        if entry.payload_remote_id().is_none() {
            if let Some(remote_id) = removed.as_ref().and_then(remote_id_of) {
                entry.payload["remote_id"] = Value::String(remote_id.to_string());
                self.queue.update(&entry).await?;
            }
        }

        tracing::debug!(collection = %T::COLLECTION, id = %id, "record deleted");
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> SyncResult<Option<Record<T>>> {
        Ok(store::load(self.store.as_ref(), id).await?)
    }

    pub async fn get_all(&self) -> SyncResult<Vec<Record<T>>> {
        Ok(store::load_all(self.store.as_ref()).await?)
    }

    pub async fn find<F>(&self, predicate: F) -> SyncResult<Vec<Record<T>>>
    where
        F: Fn(&Record<T>) -> bool + Send,
    {
        Ok(store::find(self.store.as_ref(), predicate).await?)
    }
}

impl Events {
    /// Events that involve `pet_id`, earliest first; undated events last.
    pub async fn for_pet(&self, pet_id: &str) -> SyncResult<Vec<Record<Event>>> {
        let mut events = self
            .find(|e: &Record<Event>| e.pet_ids.iter().any(|p| p == pet_id))
            .await?;
        events.sort_by_key(|e| (e.starts_at.is_none(), e.starts_at));
        Ok(events)
    }
}

impl Contacts {
    pub async fn for_pet(&self, pet_id: &str) -> SyncResult<Vec<Record<Contact>>> {
        self.find(|c: &Record<Contact>| c.pet_ids.iter().any(|p| p == pet_id))
            .await
    }
}

/// Result of [`Stamps::toggle`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Created(Record<TrackingStamp>),
    Removed,
}

impl ToggleOutcome {
    pub fn created(&self) -> bool {
        matches!(self, ToggleOutcome::Created(_))
    }
}

impl Stamps {
    /// Stamps for one pet with `from <= date <= to`, oldest first.
    pub async fn for_pet_between(
        &self,
        pet_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SyncResult<Vec<Record<TrackingStamp>>> {
        let mut stamps = self
            .find(|s: &Record<TrackingStamp>| {
                s.pet_id == pet_id && s.date >= from && s.date <= to
            })
            .await?;
        stamps.sort_by_key(|s| s.date);
        Ok(stamps)
    }

    /// Mark `care_item_id` done for `pet_id` on `date`, or unmark it if a
    /// stamp already exists. Two concurrent toggles of the same triple
    /// serialize, so the pair always cancels out.
    pub async fn toggle(
        &self,
        pet_id: &str,
        care_item_id: &str,
        date: NaiveDate,
    ) -> SyncResult<ToggleOutcome> {
        let key = format!("stamp:{}:{}:{}", pet_id, care_item_id, date);
        let _guard = self.locks.lock(&key).await;

        let existing = self
            .find(|s: &Record<TrackingStamp>| s.matches(pet_id, care_item_id, date))
            .await?;

        if existing.is_empty() {
            let stamp = self
                .create(TrackingStamp {
                    pet_id: pet_id.to_string(),
                    care_item_id: care_item_id.to_string(),
                    date,
                })
                .await?;
            return Ok(ToggleOutcome::Created(stamp));
        }

        for stamp in existing {
            self.delete(stamp.id()).await?;
        }
        Ok(ToggleOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawtrack_core::models::Collection;
    use pawtrack_core::queue::memory::InMemoryQueue;
    use pawtrack_core::queue::OperationKind;
    use pawtrack_core::store::memory::InMemoryStore;
    use serde_json::json;
    use crate::testing::HookedStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        queue: Arc<InMemoryQueue>,
        locks: Arc<KeyedLocks>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                queue: Arc::new(InMemoryQueue::new()),
                locks: Arc::new(KeyedLocks::new()),
            }
        }

        fn service<T: Entity>(&self) -> RecordService<T> {
            RecordService::new(self.store.clone(), self.queue.clone(), self.locks.clone())
        }
    }

    fn pet(name: &str) -> Pet {
        Pet {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_each_mutation_appends_one_entry() {
        let fx = Fixture::new();
        let pets: Pets = fx.service();

        let fido = pets.create(pet("Fido")).await.unwrap();
        pets.update(fido.id(), json!({ "breed": "beagle" })).await.unwrap();
        pets.update_with(fido.id(), |p| p.color = Some("brown".to_string()))
            .await
            .unwrap();
        assert!(pets.delete(fido.id()).await.unwrap());

        let kinds: Vec<OperationKind> = fx
            .queue
            .drain()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Create,
                OperationKind::Update,
                OperationKind::Update,
                OperationKind::Delete
            ]
        );
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Create(usize),
        Update(usize),
        InvalidUpdate(usize),
        Delete(usize),
    }

    /// Deterministic pseudo-random steps over three record slots.
    fn generated_steps(mut seed: u64, count: usize) -> Vec<Step> {
        (0..count)
            .map(|_| {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let r = (seed >> 33) as usize;
                let slot = (r / 4) % 3;
                match r % 4 {
                    0 => Step::Create(slot),
                    1 => Step::Update(slot),
                    2 => Step::InvalidUpdate(slot),
                    _ => Step::Delete(slot),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_sequences_queue_one_entry_per_successful_call() {
        use Step::*;
        let mut sequences = vec![
            vec![Update(0), Delete(0), InvalidUpdate(0)],
            vec![Create(0), Delete(0), Update(0), Delete(0), InvalidUpdate(0)],
            vec![Create(0), InvalidUpdate(0), Update(0), Create(1), Delete(0), Update(1)],
            vec![Create(0), Create(0), Update(0), Delete(0), Delete(0), Update(0)],
        ];
        for seed in [1, 7, 42, 2024] {
            sequences.push(generated_steps(seed, 40));
        }

        for steps in sequences {
            let fx = Fixture::new();
            let pets: Pets = fx.service();
            let mut slots: [Option<String>; 3] = Default::default();
            let mut expected: Vec<(OperationKind, String)> = Vec::new();

            for (n, step) in steps.iter().enumerate() {
                match *step {
                    Create(slot) => {
                        let record = pets.create(pet(&format!("pet-{}", n))).await.unwrap();
                        expected.push((OperationKind::Create, record.id().to_string()));
                        slots[slot] = Some(record.id().to_string());
                    }
                    Update(slot) | InvalidUpdate(slot) => {
                        let id = slots[slot].clone().unwrap_or_else(|| format!("missing-{}", slot));
                        let name = match step {
                            Update(_) => format!("name-{}", n),
                            _ => String::new(),
                        };
                        let result = pets.update(&id, json!({ "name": name })).await;
                        match (step, slots[slot].is_some()) {
                            (Update(_), true) => {
                                result.unwrap();
                                expected.push((OperationKind::Update, id));
                            }
                            (_, true) => {
                                assert!(matches!(result, Err(SyncError::Validation { .. })));
                            }
                            (_, false) => {
                                assert!(matches!(result, Err(SyncError::NotFound { .. })));
                            }
                        }
                    }
                    Delete(slot) => match slots[slot].take() {
                        Some(id) => {
                            assert!(pets.delete(&id).await.unwrap());
                            expected.push((OperationKind::Delete, id));
                        }
                        None => {
                            assert!(!pets.delete(&format!("missing-{}", slot)).await.unwrap());
                        }
                    },
                }
            }

            let queued: Vec<(OperationKind, String)> = fx
                .queue
                .drain()
                .await
                .unwrap()
                .into_iter()
                .map(|e| (e.kind, e.record_id))
                .collect();
            assert_eq!(queued, expected, "steps: {:?}", steps);
            assert_eq!(fx.queue.len().await.unwrap(), expected.len());
        }
    }

    #[tokio::test]
    async fn test_update_rereads_after_write_from_another_process() {
        let store = HookedStore::new();
        let queue = Arc::new(InMemoryQueue::new());
        let pets: Pets = RecordService::new(store.clone(), queue.clone(), Arc::new(KeyedLocks::new()));
        let neighbour: Pets =
            RecordService::new(store.shared(), queue.clone(), Arc::new(KeyedLocks::new()));

        let id = pets.create(pet("Fido")).await.unwrap().id().to_string();
        store.before_replace({
            let id = id.clone();
            async move {
                neighbour
                    .update(&id, json!({ "species": "dog" }))
                    .await
                    .unwrap();
            }
        });

        let updated = pets
            .update(&id, json!({ "breed": "beagle" }))
            .await
            .unwrap();
        assert_eq!(updated.meta.revision, 3);

        let stored = pets.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.species.as_deref(), Some("dog"));
        assert_eq!(stored.breed.as_deref(), Some("beagle"));
        assert_eq!(stored.meta.revision, 3);

        let revisions: Vec<Option<u64>> = queue
            .drain()
            .await
            .unwrap()
            .iter()
            .map(|e| e.payload_revision())
            .collect();
        assert_eq!(revisions, vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_update_keeps_remote_id_acknowledged_meanwhile() {
        let store = HookedStore::new();
        let queue = Arc::new(InMemoryQueue::new());
        let pets: Pets = RecordService::new(store.clone(), queue, Arc::new(KeyedLocks::new()));

        let id = pets.create(pet("Fido")).await.unwrap().id().to_string();
        let shared = store.shared();
        store.before_replace({
            let id = id.clone();
            async move {
                shared
                    .acknowledge(Collection::Pets, &id, Some(1), Some("remote-1"))
                    .await
                    .unwrap();
            }
        });

        pets.update(&id, json!({ "name": "Rex" })).await.unwrap();

        let stored = pets.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Rex");
        assert_eq!(stored.remote_id(), Some("remote-1"));
        assert!(!stored.is_synced());
    }

    #[tokio::test]
    async fn test_delete_picks_up_remote_id_acknowledged_meanwhile() {
        let store = HookedStore::new();
        let queue = Arc::new(InMemoryQueue::new());
        let pets: Pets = RecordService::new(store.clone(), queue.clone(), Arc::new(KeyedLocks::new()));

        let id = pets.create(pet("Fido")).await.unwrap().id().to_string();
        let shared = store.shared();
        store.before_delete({
            let id = id.clone();
            async move {
                shared
                    .acknowledge(Collection::Pets, &id, Some(1), Some("remote-1"))
                    .await
                    .unwrap();
            }
        });

        assert!(pets.delete(&id).await.unwrap());

        let entries = queue.drain().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, OperationKind::Delete);
        assert_eq!(entries[1].payload_remote_id(), Some("remote-1"));
        assert!(pets.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_create_writes_nothing() {
        let fx = Fixture::new();
        let pets: Pets = fx.service();

        let err = pets.create(Pet::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
        assert!(pets.get_all().await.unwrap().is_empty());
        assert!(fx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_ignores_bookkeeping_keys() {
        let fx = Fixture::new();
        let pets: Pets = fx.service();
        let fido = pets.create(pet("Fido")).await.unwrap();

        let updated = pets
            .update(
                fido.id(),
                json!({ "name": "Rex", "synced": true, "remote_id": "forged", "revision": 99 }),
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Rex");
        assert!(!updated.is_synced());
        assert_eq!(updated.remote_id(), None);
        assert_eq!(updated.meta.revision, 2);
        assert_eq!(updated.meta.created_at, fido.meta.created_at);

        let snapshot = &fx.queue.drain().await.unwrap()[1];
        assert_eq!(snapshot.payload["name"], "Rex");
        assert_eq!(snapshot.payload_revision(), Some(2));
    }

    #[tokio::test]
    async fn test_update_missing_and_invalid() {
        let fx = Fixture::new();
        let pets: Pets = fx.service();
        let err = pets.update("nope", json!({ "name": "x" })).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));

        let fido = pets.create(pet("Fido")).await.unwrap();
        let err = pets.update(fido.id(), json!({ "name": "" })).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
        let err = pets
            .update(fido.id(), json!({ "birth_date": "not a date" }))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));

        // Only the create was queued; the record is unchanged.
        assert_eq!(fx.queue.len().await.unwrap(), 1);
        assert_eq!(pets.get(fido.id()).await.unwrap().unwrap().name, "Fido");
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let fx = Fixture::new();
        let pets: Pets = fx.service();
        assert!(!pets.delete("ghost").await.unwrap());
        assert!(fx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_carries_remote_id() {
        let fx = Fixture::new();
        let pets: Pets = fx.service();
        let mut fido = Record::new(pet("Fido"));
        fido.meta.remote_id = Some("remote-7".to_string());
        store::save(fx.store.as_ref(), &fido).await.unwrap();

        pets.delete(fido.id()).await.unwrap();
        let entries = fx.queue.drain().await.unwrap();
        assert_eq!(entries[0].collection, Collection::Pets);
        assert_eq!(entries[0].payload_remote_id(), Some("remote-7"));
        assert!(pets.get(fido.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filtered_reads() {
        let fx = Fixture::new();
        let events: Events = fx.service();
        let contacts: Contacts = fx.service();

        for (title, pets) in [("Walk", vec!["p1"]), ("Vet", vec!["p1", "p2"]), ("Bath", vec!["p2"])] {
            events
                .create(Event {
                    title: title.to_string(),
                    pet_ids: pets.into_iter().map(String::from).collect(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        contacts
            .create(Contact {
                name: "Dr. Vet".to_string(),
                pet_ids: vec!["p2".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        let titles: Vec<String> = events
            .for_pet("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title.clone())
            .collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"Walk".to_string()));
        assert!(titles.contains(&"Vet".to_string()));
        assert!(contacts.for_pet("p1").await.unwrap().is_empty());
        assert_eq!(contacts.for_pet("p2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_creates_then_removes() {
        let fx = Fixture::new();
        let stamps: Stamps = fx.service();

        let first = stamps.toggle("p1", "c1", day(5)).await.unwrap();
        assert!(first.created());
        assert_eq!(stamps.get_all().await.unwrap().len(), 1);

        let second = stamps.toggle("p1", "c1", day(5)).await.unwrap();
        assert_eq!(second, ToggleOutcome::Removed);
        assert!(stamps.get_all().await.unwrap().is_empty());

        let kinds: Vec<OperationKind> =
            fx.queue.drain().await.unwrap().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![OperationKind::Create, OperationKind::Delete]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_cancel_out() {
        let fx = Fixture::new();
        let stamps: Arc<Stamps> = Arc::new(fx.service());

        let a = tokio::spawn({
            let stamps = stamps.clone();
            async move { stamps.toggle("p1", "c1", day(5)).await.unwrap() }
        });
        let b = tokio::spawn({
            let stamps = stamps.clone();
            async move { stamps.toggle("p1", "c1", day(5)).await.unwrap() }
        });
        let outcomes = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.created()).count(), 1);
        assert!(stamps.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stamps_in_range() {
        let fx = Fixture::new();
        let stamps: Stamps = fx.service();
        for d in [1, 3, 9] {
            stamps.toggle("p1", "c1", day(d)).await.unwrap();
        }
        stamps.toggle("p2", "c1", day(3)).await.unwrap();

        let dates: Vec<NaiveDate> = stamps
            .for_pet_between("p1", day(2), day(9))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.date)
            .collect();
        assert_eq!(dates, vec![day(3), day(9)]);
    }
}
