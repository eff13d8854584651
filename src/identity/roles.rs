use crate::error::StoreError;
use crate::models::Role;
use crate::store::RoleStore;
use std::sync::Arc;

/// Resolves a role name to its privilege level. Uncached; role lookups are rare.
#[derive(Clone)]
pub struct RoleCatalog {
    store: Arc<dyn RoleStore>,
}

impl RoleCatalog {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Role, StoreError> {
        self.store.get_by_name(name).await
    }
}
