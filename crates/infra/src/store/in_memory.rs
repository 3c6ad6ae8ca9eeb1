use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};

use agrotrack_core::{
    Animal, AnimalChanges, AnimalId, Identity, NationalId, NewAnimal, NewProductionRecord,
    OwnedProduction, ProductionAnimal, ProductionChanges, ProductionId, ProductionKind,
    ProductionRecord, ReportPeriod, UserId,
};

use super::{
    AnimalFilter, AnimalScope, AnimalSort, IdentityStore, LivestockStore, OwnerScope, OwnershipStore,
    ProductionFilter, ProductionSort, ReportRow, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct State {
    identities: HashMap<UserId, Identity>,
    animals: HashMap<AnimalId, Animal>,
    production: HashMap<ProductionId, ProductionRecord>,
}

impl State {
    fn tag_taken(&self, tag: &str, except: Option<AnimalId>) -> bool {
        self.animals
            .values()
            .any(|a| a.external_tag.as_str() == tag && Some(a.id) != except)
    }

    fn join(&self, record: &ProductionRecord) -> Option<OwnedProduction> {
        let animal = self.animals.get(&record.animal_id)?;
        Some(OwnedProduction {
            record: record.clone(),
            animal: ProductionAnimal {
                id: animal.id,
                owner_id: animal.owner_id,
                external_tag: animal.external_tag.clone(),
                breed: animal.breed.clone(),
                sex: animal.sex,
            },
        })
    }

    fn scoped_production<'a>(
        &'a self,
        scope: &'a AnimalScope,
        kind: ProductionKind,
    ) -> impl Iterator<Item = &'a ProductionRecord> + 'a {
        self.production
            .values()
            .filter(move |r| scope.contains(r.animal_id) && r.kind == kind)
    }
}

/// In-memory store for tests/dev.
///
/// A single lock guards all three tables, so unique checks, cascades and
/// joins observe one consistent snapshot.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_identity_by_id(&self, id: UserId) -> StoreResult<Option<Identity>> {
        Ok(self.read()?.identities.get(&id).cloned())
    }

    async fn find_identity_by_national_id(&self, national_id: &NationalId) -> StoreResult<Option<Identity>> {
        Ok(self
            .read()?
            .identities
            .values()
            .find(|i| &i.national_id == national_id)
            .cloned())
    }

    async fn insert_identity(&self, identity: Identity) -> StoreResult<Identity> {
        let mut state = self.write()?;
        if state.identities.values().any(|i| i.national_id == identity.national_id) {
            return Err(StoreError::Conflict("national id already registered".into()));
        }
        state.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }
}

#[async_trait::async_trait]
impl OwnershipStore for InMemoryStore {
    async fn find_animal_by_id(&self, id: AnimalId) -> StoreResult<Option<Animal>> {
        Ok(self.read()?.animals.get(&id).cloned())
    }

    async fn find_production_by_id(&self, id: ProductionId) -> StoreResult<Option<OwnedProduction>> {
        let state = self.read()?;
        Ok(state.production.get(&id).and_then(|r| state.join(r)))
    }

    async fn owned_animal_ids(&self, owner: UserId) -> StoreResult<Vec<AnimalId>> {
        let mut ids: Vec<AnimalId> = self
            .read()?
            .animals
            .values()
            .filter(|a| a.owner_id == owner)
            .map(|a| a.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl LivestockStore for InMemoryStore {
    async fn list_animals(
        &self,
        scope: &OwnerScope,
        filter: &AnimalFilter,
        sort: AnimalSort,
    ) -> StoreResult<Vec<Animal>> {
        let mut animals: Vec<Animal> = self
            .read()?
            .animals
            .values()
            .filter(|a| a.owner_id == scope.owner())
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        sort.sort(&mut animals);
        Ok(animals)
    }

    async fn insert_animal(&self, new: NewAnimal, now: DateTime<Utc>) -> StoreResult<Animal> {
        let mut state = self.write()?;
        if state.tag_taken(new.external_tag.as_str(), None) {
            return Err(StoreError::Conflict("an animal with this external tag already exists".into()));
        }
        let animal = Animal::create(new, now);
        state.animals.insert(animal.id, animal.clone());
        Ok(animal)
    }

    async fn update_animal(
        &self,
        id: AnimalId,
        changes: AnimalChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Animal> {
        let mut state = self.write()?;
        if let Some(tag) = &changes.external_tag {
            if state.tag_taken(tag.as_str(), Some(id)) {
                return Err(StoreError::Conflict("an animal with this external tag already exists".into()));
            }
        }
        let animal = state.animals.get_mut(&id).ok_or(StoreError::NotFound)?;
        animal.apply(changes, now);
        Ok(animal.clone())
    }

    async fn delete_animal(&self, id: AnimalId) -> StoreResult<()> {
        let mut state = self.write()?;
        state.animals.remove(&id).ok_or(StoreError::NotFound)?;
        state.production.retain(|_, r| r.animal_id != id);
        Ok(())
    }

    async fn list_production(
        &self,
        scope: &AnimalScope,
        filter: &ProductionFilter,
        sort: ProductionSort,
    ) -> StoreResult<Vec<OwnedProduction>> {
        let state = self.read()?;
        let mut records: Vec<OwnedProduction> = state
            .production
            .values()
            .filter(|r| scope.contains(r.animal_id))
            .filter_map(|r| state.join(r))
            .filter(|p| filter.matches(p))
            .collect();
        sort.sort(&mut records);
        Ok(records)
    }

    async fn insert_production(
        &self,
        new: NewProductionRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<OwnedProduction> {
        let mut state = self.write()?;
        if !state.animals.contains_key(&new.animal_id) {
            return Err(StoreError::NotFound);
        }
        let record = ProductionRecord::create(new, now);
        state.production.insert(record.id, record.clone());
        state.join(&record).ok_or(StoreError::NotFound)
    }

    async fn update_production(
        &self,
        id: ProductionId,
        changes: ProductionChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<OwnedProduction> {
        let mut state = self.write()?;
        let record = state.production.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.apply(changes, now);
        let record = record.clone();
        state.join(&record).ok_or(StoreError::NotFound)
    }

    async fn delete_production(&self, id: ProductionId) -> StoreResult<()> {
        self.write()?
            .production
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn production_report(
        &self,
        scope: &AnimalScope,
        kind: ProductionKind,
        period: ReportPeriod,
    ) -> StoreResult<Vec<ReportRow>> {
        struct Bucket {
            total: f64,
            entries: usize,
            animals: Vec<AnimalId>,
        }

        let state = self.read()?;
        let mut buckets: HashMap<String, Bucket> = HashMap::new();
        for record in state.scoped_production(scope, kind) {
            let bucket = buckets
                .entry(period.bucket(record.recorded_date))
                .or_insert_with(|| Bucket {
                    total: 0.0,
                    entries: 0,
                    animals: Vec::new(),
                });
            bucket.total += record.quantity.value();
            bucket.entries += 1;
            if !bucket.animals.contains(&record.animal_id) {
                bucket.animals.push(record.animal_id);
            }
        }

        let mut rows: Vec<ReportRow> = buckets
            .into_iter()
            .map(|(period, b)| ReportRow {
                period,
                total_production: b.total,
                animal_count: b.animals.len() as i64,
                average_production: b.total / b.entries as f64,
            })
            .collect();
        rows.sort_by(|a, b| b.period.cmp(&a.period));
        Ok(rows)
    }

    async fn has_production_between(
        &self,
        scope: &AnimalScope,
        kind: ProductionKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<bool> {
        Ok(self
            .read()?
            .scoped_production(scope, kind)
            .any(|r| r.recorded_date >= from && r.recorded_date <= to))
    }
}
