//! The data-access contract consumed by the reconciler.

use async_trait::async_trait;
use ipnet::Ipv4Net;
use l3gw_common::{Endpoint, L3Result, Route, RouteTable, RouteTarget, Subnet, Target};
use uuid::Uuid;

/// Fields accepted by [`ModelStore::create_subnet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubnet {
    pub tenant_id: String,
    /// Already validated and truncated.
    pub cidr: Ipv4Net,
    pub network_id: Uuid,
}

/// Partial subnet update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetUpdate {
    pub cidr: Option<Ipv4Net>,
    pub network_id: Option<Uuid>,
}

/// Partial route table update; `None` and empty strings are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTableUpdate {
    pub label: Option<String>,
    pub description: Option<String>,
}

/// Fields accepted by [`ModelStore::create_route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoute {
    pub routetable_id: Uuid,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub target: RouteTarget,
}

/// Partial route update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteUpdate {
    pub source: Option<Endpoint>,
    pub destination: Option<Endpoint>,
    pub target: Option<RouteTarget>,
}

/// Persistent records of the declarative model.
///
/// Each call is its own unit of work: the invariant of the touched record
/// holds when the call returns, and a failed call changes nothing.
/// Tenant-scoped lookups report records of other tenants as not found.
#[async_trait]
pub trait ModelStore: Send + Sync {
    // Subnets

    /// Fails with `DuplicateCidr` if the tenant already owns `cidr`.
    async fn create_subnet(&self, new: NewSubnet) -> L3Result<Subnet>;

    async fn get_subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Subnet>;

    async fn list_subnets(&self, tenant_id: &str) -> L3Result<Vec<Subnet>>;

    /// Re-checks CIDR uniqueness only when `update.cidr` is set.
    async fn update_subnet(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
        update: SubnetUpdate,
    ) -> L3Result<Subnet>;

    /// Does not cascade; callers check [`ModelStore::subnet_routes`] first.
    async fn delete_subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Subnet>;

    /// Routes naming the subnet as source or destination, in any table.
    async fn subnet_routes(&self, subnet_id: Uuid) -> L3Result<Vec<Route>>;

    // Route tables

    /// Missing label or description fall back to per-tenant defaults.
    async fn create_routetable(
        &self,
        tenant_id: &str,
        label: Option<String>,
        description: Option<String>,
    ) -> L3Result<RouteTable>;

    async fn get_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<RouteTable>;

    async fn list_routetables(&self, tenant_id: &str) -> L3Result<Vec<RouteTable>>;

    async fn update_routetable(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        update: RouteTableUpdate,
    ) -> L3Result<RouteTable>;

    /// Destroys every route of the table, clears associations that point
    /// at it, then deletes the table row.
    async fn delete_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<RouteTable>;

    /// Subnets whose association names this table.
    async fn associated_subnets(&self, routetable_id: Uuid) -> L3Result<Vec<Subnet>>;

    // Routes

    /// Fails with `RoutetableNotFound` or `DuplicateRoute` before inserting.
    async fn create_route(&self, new: NewRoute) -> L3Result<Route>;

    async fn get_route(&self, routetable_id: Uuid, route_id: Uuid) -> L3Result<Route>;

    async fn list_routes(&self, routetable_id: Uuid) -> L3Result<Vec<Route>>;

    /// Fails with `DuplicateRoute` if the result would equal another route.
    async fn update_route(
        &self,
        routetable_id: Uuid,
        route_id: Uuid,
        update: RouteUpdate,
    ) -> L3Result<Route>;

    async fn delete_route(&self, routetable_id: Uuid, route_id: Uuid) -> L3Result<Route>;

    // Targets

    /// Tags are case-folded; fails with `DuplicateTarget` on
    /// (tenant, tag) collision.
    async fn create_target(
        &self,
        tenant_id: Option<&str>,
        tag: &str,
        description: Option<String>,
    ) -> L3Result<Target>;

    /// Resolves a tag against the tenant's targets and system targets.
    async fn get_target(&self, tenant_id: &str, tag: &str) -> L3Result<Target>;

    /// System targets followed by the tenant's own.
    async fn list_targets(&self, tenant_id: &str) -> L3Result<Vec<Target>>;

    /// Only the tenant's own targets may be deleted.
    async fn delete_target(&self, tenant_id: &str, target_id: Uuid) -> L3Result<Target>;

    // Associations

    /// Fails with `SubnetAlreadyAssociated` if the subnet is bound.
    async fn set_association(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
        routetable_id: Uuid,
    ) -> L3Result<Subnet>;

    /// Clears the association and returns the previous table, if any.
    async fn unset_association(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Option<Uuid>>;

    async fn get_association(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Option<Uuid>>;

    // Restore walks

    async fn all_subnets(&self) -> L3Result<Vec<Subnet>>;

    async fn all_routetables(&self) -> L3Result<Vec<RouteTable>>;
}
