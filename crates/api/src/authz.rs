//! Ownership gate for single-resource routes.
//!
//! Every check re-reads the resource from the store; nothing is cached across
//! requests. Verified resources are handed to handlers as typed values
//! ([`VerifiedAnimal`], [`VerifiedProduction`], [`CandidateAnimal`]) so a
//! handler can only obtain them by passing the gate.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, FromRequestParts, Path};
use axum::http::request::Parts;

use agrotrack_auth::{OwnershipError, authorize_owner};
use agrotrack_core::{Animal, AnimalId, OwnedByUser, OwnedProduction, ProductionId};
use agrotrack_infra::store::OwnershipStore;
use agrotrack_observability::audit;

use crate::app::errors::ApiError;
use crate::app::services::{AppServices, bounded};
use crate::context::IdentityContext;

/// The animal addressed by the request path, owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAnimal(pub Animal);

/// The production record addressed by the request path, owned (through its
/// animal) by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedProduction(pub OwnedProduction);

/// The animal a new production record will be attached to. Distinct from
/// [`VerifiedAnimal`]: it is the target of a mutation, not the addressed
/// resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAnimal(pub Animal);

pub struct OwnershipGate<'a, S: ?Sized> {
    store: &'a S,
    timeout: Duration,
}

impl<'a, S> OwnershipGate<'a, S>
where
    S: OwnershipStore + ?Sized,
{
    pub fn new(store: &'a S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn verify_animal_ownership(
        &self,
        id: AnimalId,
        requester: &IdentityContext,
    ) -> Result<VerifiedAnimal, ApiError> {
        let animal = bounded(self.timeout, self.store.find_animal_by_id(id))
            .await?
            .ok_or(ApiError::NotFound("animal"))?;
        enforce(&animal, requester)?;
        Ok(VerifiedAnimal(animal))
    }

    /// Record and owner come from one joined read.
    pub async fn verify_production_ownership(
        &self,
        id: ProductionId,
        requester: &IdentityContext,
    ) -> Result<VerifiedProduction, ApiError> {
        let production = bounded(self.timeout, self.store.find_production_by_id(id))
            .await?
            .ok_or(ApiError::NotFound("production record"))?;
        enforce(&production, requester)?;
        Ok(VerifiedProduction(production))
    }

    /// Passes through with `None` when the body names no animal; the caller
    /// is then responsible for rejecting the request.
    pub async fn verify_animal_ownership_for_creation(
        &self,
        animal_id: Option<AnimalId>,
        requester: &IdentityContext,
    ) -> Result<Option<CandidateAnimal>, ApiError> {
        let Some(id) = animal_id else {
            return Ok(None);
        };
        let VerifiedAnimal(animal) = self.verify_animal_ownership(id, requester).await?;
        Ok(Some(CandidateAnimal(animal)))
    }
}

fn enforce<R: OwnedByUser>(resource: &R, requester: &IdentityContext) -> Result<(), ApiError> {
    authorize_owner(resource, requester.user_id()).map_err(|err| {
        let OwnershipError::Mismatch {
            resource_kind,
            resource_id,
            owner,
            requester,
        } = err;
        audit::ownership_denied(resource_kind, &resource_id, owner, requester);
        ApiError::Forbidden
    })
}

fn parse_path_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: core::str::FromStr<Err = agrotrack_core::DomainError>,
{
    raw.parse::<T>().map_err(ApiError::from)
}

async fn request_context<S: Send + Sync>(
    parts: &mut Parts,
    state: &S,
) -> Result<(Arc<AppServices>, IdentityContext, String), ApiError> {
    let Extension(services) = Extension::<Arc<AppServices>>::from_request_parts(parts, state)
        .await
        .map_err(|e| ApiError::internal(format!("services missing: {e}")))?;
    let identity = IdentityContext::from_request_parts(parts, state).await?;
    let Path(id) = Path::<String>::from_request_parts(parts, state)
        .await
        .map_err(|e| ApiError::validation(e.body_text()))?;
    Ok((services, identity, id))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for VerifiedAnimal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let (services, identity, raw_id) = request_context(parts, state).await?;
        let id: AnimalId = parse_path_id(&raw_id)?;
        services.gate().verify_animal_ownership(id, &identity).await
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for VerifiedProduction
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let (services, identity, raw_id) = request_context(parts, state).await?;
        let id: ProductionId = parse_path_id(&raw_id)?;
        services.gate().verify_production_ownership(id, &identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use agrotrack_core::{Identity, NationalId, NewAnimal, NewProductionRecord, ProductionKind, Quantity, Sex};
    use agrotrack_infra::store::{InMemoryStore, LivestockStore, StoreError, StoreResult};
    use chrono::{NaiveDate, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_ID: AtomicU32 = AtomicU32::new(1);

    fn requester() -> IdentityContext {
        let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let identity = Identity::new(
            "Ana",
            NationalId::parse(&format!("V-{n:08}")).unwrap(),
            "hash".into(),
            Utc::now(),
        )
        .unwrap();
        IdentityContext::new(identity)
    }

    async fn seed_animal(store: &InMemoryStore, owner: &IdentityContext, tag: &str) -> Animal {
        let birth = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let new = NewAnimal::new(owner.user_id(), tag, "Holstein", birth, Sex::Female, 450.5, None).unwrap();
        store.insert_animal(new, Utc::now()).await.unwrap()
    }

    #[tokio::test]
    async fn owner_passes_foreigner_is_forbidden() {
        let store = InMemoryStore::new();
        let alice = requester();
        let bob = requester();
        let animal = seed_animal(&store, &alice, "G001").await;
        let gate = OwnershipGate::new(&store, Duration::from_secs(1));

        let verified = gate.verify_animal_ownership(animal.id, &alice).await.unwrap();
        assert_eq!(verified.0.id, animal.id);

        let denied = gate.verify_animal_ownership(animal.id, &bob).await.unwrap_err();
        assert!(matches!(denied, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn missing_resources_are_not_found() {
        let store = InMemoryStore::new();
        let gate = OwnershipGate::new(&store, Duration::from_secs(1));
        let me = requester();

        assert!(matches!(
            gate.verify_animal_ownership(AnimalId::new(), &me).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            gate.verify_production_ownership(ProductionId::new(), &me).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn production_ownership_follows_the_animal() {
        let store = InMemoryStore::new();
        let alice = requester();
        let bob = requester();
        let animal = seed_animal(&store, &alice, "G001").await;
        let record = store
            .insert_production(
                NewProductionRecord {
                    animal_id: animal.id,
                    kind: ProductionKind::Milk,
                    quantity: Quantity::new(18.0).unwrap(),
                    recorded_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let gate = OwnershipGate::new(&store, Duration::from_secs(1));

        assert!(gate.verify_production_ownership(record.record.id, &alice).await.is_ok());
        assert!(matches!(
            gate.verify_production_ownership(record.record.id, &bob).await,
            Err(ApiError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn creation_guard_passes_through_without_an_animal() {
        let store = InMemoryStore::new();
        let gate = OwnershipGate::new(&store, Duration::from_secs(1));
        let me = requester();
        assert_eq!(gate.verify_animal_ownership_for_creation(None, &me).await.unwrap(), None);
    }

    #[tokio::test]
    async fn creation_guard_rejects_foreign_animals() {
        let store = InMemoryStore::new();
        let alice = requester();
        let bob = requester();
        let animal = seed_animal(&store, &alice, "G001").await;
        let gate = OwnershipGate::new(&store, Duration::from_secs(1));

        let candidate = gate
            .verify_animal_ownership_for_creation(Some(animal.id), &alice)
            .await
            .unwrap();
        assert_eq!(candidate.map(|c| c.0.id), Some(animal.id));
        assert!(matches!(
            gate.verify_animal_ownership_for_creation(Some(animal.id), &bob).await,
            Err(ApiError::Forbidden)
        ));
    }

    struct StalledStore;

    #[axum::async_trait]
    impl OwnershipStore for StalledStore {
        async fn find_animal_by_id(&self, _id: AnimalId) -> StoreResult<Option<Animal>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(StoreError::Unavailable("unreachable".into()))
        }

        async fn find_production_by_id(&self, _id: ProductionId) -> StoreResult<Option<OwnedProduction>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn owned_animal_ids(&self, _owner: agrotrack_core::UserId) -> StoreResult<Vec<AnimalId>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn lookup_timeouts_are_internal_not_forbidden() {
        let gate = OwnershipGate::new(&StalledStore, Duration::from_millis(20));
        let me = requester();
        assert!(matches!(
            gate.verify_animal_ownership(AnimalId::new(), &me).await,
            Err(ApiError::Internal(_))
        ));
        assert!(matches!(
            gate.verify_production_ownership(ProductionId::new(), &me).await,
            Err(ApiError::Internal(_))
        ));
    }

    mod audit_trail {
        use super::*;

        use std::collections::HashMap;
        use std::sync::Mutex;

        use agrotrack_observability::audit::AUDIT_TARGET;
        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

        #[derive(Debug, Clone)]
        struct Captured {
            target: String,
            level: Level,
            fields: HashMap<String, String>,
        }

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<Captured>>>);

        struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

        impl Visit for FieldVisitor<'_> {
            fn record_str(&mut self, field: &Field, value: &str) {
                self.0.insert(field.name().to_string(), value.to_string());
            }

            fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
                self.0.insert(field.name().to_string(), format!("{value:?}"));
            }
        }

        impl<S: Subscriber> Layer<S> for Capture {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut fields = HashMap::new();
                event.record(&mut FieldVisitor(&mut fields));
                self.0.lock().unwrap().push(Captured {
                    target: event.metadata().target().to_string(),
                    level: *event.metadata().level(),
                    fields,
                });
            }
        }

        impl Capture {
            fn audit_events(&self) -> Vec<Captured> {
                self.0
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|e| e.target == AUDIT_TARGET)
                    .cloned()
                    .collect()
            }
        }

        fn assert_denial(event: &Captured, kind: &str, id: &str, owner: &IdentityContext, requester: &IdentityContext) {
            assert_eq!(event.level, Level::WARN);
            assert_eq!(event.fields["resource_kind"], kind);
            assert_eq!(event.fields["resource_id"], id);
            assert_eq!(event.fields["owner"], owner.user_id().to_string());
            assert_eq!(event.fields["requester"], requester.user_id().to_string());
        }

        #[tokio::test]
        async fn cross_owner_access_is_audited_with_the_true_owner() {
            let capture = Capture::default();
            let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

            let store = InMemoryStore::new();
            let alice = requester();
            let bob = requester();
            let animal = seed_animal(&store, &alice, "AUD-1").await;
            let record = store
                .insert_production(
                    NewProductionRecord {
                        animal_id: animal.id,
                        kind: ProductionKind::Meat,
                        quantity: Quantity::new(120.0).unwrap(),
                        recorded_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                    },
                    Utc::now(),
                )
                .await
                .unwrap();
            let gate = OwnershipGate::new(&store, Duration::from_secs(1));

            gate.verify_animal_ownership(animal.id, &alice).await.unwrap();
            gate.verify_production_ownership(record.record.id, &alice).await.unwrap();
            assert!(capture.audit_events().is_empty());

            gate.verify_animal_ownership(animal.id, &bob).await.unwrap_err();
            gate.verify_production_ownership(record.record.id, &bob).await.unwrap_err();

            let events = capture.audit_events();
            assert_eq!(events.len(), 2);
            assert_denial(&events[0], "animal", &animal.id.to_string(), &alice, &bob);
            assert_denial(&events[1], "production", &record.record.id.to_string(), &alice, &bob);
        }

        #[tokio::test]
        async fn missing_resources_are_not_audited() {
            let capture = Capture::default();
            let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

            let store = InMemoryStore::new();
            let gate = OwnershipGate::new(&store, Duration::from_secs(1));
            let me = requester();
            gate.verify_animal_ownership(AnimalId::new(), &me).await.unwrap_err();

            assert!(capture.audit_events().is_empty());
        }
    }
}
