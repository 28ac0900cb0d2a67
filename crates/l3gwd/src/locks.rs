//! Per-tenant request serialization.
//!
//! Route-table scoped work holds its tenant's lock shared plus the table's
//! mutex, so two tables of one tenant proceed in parallel. Work that can
//! touch several tables (subnets, associations, table deletion) holds the
//! tenant lock exclusively. Different tenants never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

/// Guard for route-table scoped work.
pub struct RouteTableGuard {
    // Field order is drop order: table mutex before the tenant lock.
    _table: OwnedMutexGuard<()>,
    _tenant: OwnedRwLockReadGuard<()>,
}

/// Lock registry keyed by tenant and route table.
#[derive(Default)]
pub struct TenantLocks {
    tenants: DashMap<String, Arc<RwLock<()>>>,
    tables: DashMap<(String, Uuid), Arc<Mutex<()>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant(&self, tenant_id: &str) -> Arc<RwLock<()>> {
        self.tenants
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    /// Exclusive access to everything the tenant owns.
    pub async fn lock_tenant(&self, tenant_id: &str) -> OwnedRwLockWriteGuard<()> {
        self.tenant(tenant_id).write_owned().await
    }

    /// Access to one route table of the tenant.
    pub async fn lock_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> RouteTableGuard {
        let tenant = self.tenant(tenant_id).read_owned().await;
        let table = self
            .tables
            .entry((tenant_id.to_string(), routetable_id))
            .or_default()
            .clone();
        RouteTableGuard {
            _table: table.lock_owned().await,
            _tenant: tenant,
        }
    }

    /// Drops the mutex of a deleted route table. Callers hold the tenant
    /// lock exclusively, so nobody is waiting on it.
    pub fn forget_routetable(&self, tenant_id: &str, routetable_id: Uuid) {
        self.tables.remove(&(tenant_id.to_string(), routetable_id));
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}
