//! In-memory domain and persona schemas.
//!
//! Activation swaps the active flag of every same-named schema while holding
//! one write lock, so two versions are never observed active at once.

use async_trait::async_trait;
use lorekeep_core::error::StoreError;
use lorekeep_core::schema::{DomainSchema, PersonaSchema};
use lorekeep_core::store::SchemaRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub struct InMemorySchemaRepository {
    domains: Arc<RwLock<HashMap<String, DomainSchema>>>,
    personas: Arc<RwLock<HashMap<String, PersonaSchema>>>,
}

impl InMemorySchemaRepository {
    pub fn new() -> Self {
        Self {
            domains: Arc::new(RwLock::new(HashMap::new())),
            personas: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySchemaRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRepository for InMemorySchemaRepository {
    async fn create_domain(&self, schema: DomainSchema) -> Result<DomainSchema, StoreError> {
        let mut domains = self.domains.write().await;
        if domains.contains_key(&schema.id) {
            return Err(StoreError::Conflict(format!("domain schema {} exists", schema.id)));
        }
        domains.insert(schema.id.clone(), schema.clone());
        Ok(schema)
    }

    async fn get_domain(&self, id: &str) -> Result<Option<DomainSchema>, StoreError> {
        Ok(self.domains.read().await.get(id).cloned())
    }

    async fn get_active_domain(&self, name: &str) -> Result<Option<DomainSchema>, StoreError> {
        Ok(self
            .domains
            .read()
            .await
            .values()
            .find(|d| d.name == name && d.is_active)
            .cloned())
    }

    async fn list_domain_versions(&self, name: &str) -> Result<Vec<DomainSchema>, StoreError> {
        let mut versions: Vec<DomainSchema> = self
            .domains
            .read()
            .await
            .values()
            .filter(|d| d.name == name)
            .cloned()
            .collect();
        versions.sort_by_key(|d| d.version);
        Ok(versions)
    }

    async fn save_and_activate_domain(&self, mut schema: DomainSchema) -> Result<DomainSchema, StoreError> {
        let mut domains = self.domains.write().await;
        for other in domains.values_mut().filter(|d| d.name == schema.name) {
            other.is_active = false;
        }
        schema.is_active = true;
        domains.insert(schema.id.clone(), schema.clone());
        info!(schema_id = %schema.id, name = %schema.name, version = schema.version, "Activated domain schema");
        Ok(schema)
    }

    async fn create_persona(&self, persona: PersonaSchema) -> Result<PersonaSchema, StoreError> {
        let mut personas = self.personas.write().await;
        if personas.contains_key(&persona.id) {
            return Err(StoreError::Conflict(format!("persona schema {} exists", persona.id)));
        }
        personas.insert(persona.id.clone(), persona.clone());
        Ok(persona)
    }

    async fn get_persona(&self, id: &str) -> Result<Option<PersonaSchema>, StoreError> {
        Ok(self.personas.read().await.get(id).cloned())
    }

    async fn get_active_persona(&self, name: &str) -> Result<Option<PersonaSchema>, StoreError> {
        Ok(self
            .personas
            .read()
            .await
            .values()
            .find(|p| p.name == name && p.is_active)
            .cloned())
    }

    async fn save_and_activate_persona(&self, mut persona: PersonaSchema) -> Result<PersonaSchema, StoreError> {
        let mut personas = self.personas.write().await;
        for other in personas.values_mut().filter(|p| p.name == persona.name) {
            other.is_active = false;
        }
        persona.is_active = true;
        personas.insert(persona.id.clone(), persona.clone());
        Ok(persona)
    }
}
