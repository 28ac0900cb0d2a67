//! Model invariants observed through the reconciler.

mod common;

use common::Host;
use l3gw_common::L3Error;
use l3gwd::Backend;
use pretty_assertions::assert_eq;

const TENANT: &str = "tenant-a";
const OTHER: &str = "tenant-b";

#[tokio::test]
async fn test_cidr_unique_per_tenant() {
    let host = Host::new(Backend::PacketFilter);
    let r = host.start().await;

    r.create_subnet(TENANT, "10.0.0.0/24", None).await.unwrap();
    let err = r
        .create_subnet(TENANT, "10.0.0.0/24", None)
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::DuplicateCidr { .. }));

    // another tenant may reuse the range
    r.create_subnet(OTHER, "10.0.0.0/24", None).await.unwrap();
    assert_eq!(r.list_subnets(TENANT).await.unwrap().len(), 1);
    assert_eq!(r.list_subnets(OTHER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_identical_route_rejected() {
    let host = Host::new(Backend::PacketFilter);
    let r = host.start().await;
    r.create_subnet(TENANT, "10.0.0.0/24", None).await.unwrap();
    let rt = r.create_routetable(TENANT, None, None).await.unwrap();

    r.create_route(TENANT, rt.id, "10.0.0.0/24", "default", "public")
        .await
        .unwrap();
    let err = r
        .create_route(TENANT, rt.id, "10.0.0.0/24", "0.0.0.0/0", "public")
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::DuplicateRoute { .. }));
    assert_eq!(r.list_routes(TENANT, rt.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_association_is_exclusive() {
    let host = Host::new(Backend::PacketFilter);
    let r = host.start().await;
    let subnet = r.create_subnet(TENANT, "10.0.0.0/24", None).await.unwrap();
    let rt1 = r.create_routetable(TENANT, None, None).await.unwrap();
    let rt2 = r.create_routetable(TENANT, None, None).await.unwrap();

    r.associate_subnet(TENANT, subnet.id, rt1.id).await.unwrap();
    let err = r
        .associate_subnet(TENANT, subnet.id, rt2.id)
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::SubnetAlreadyAssociated { .. }));
    assert_eq!(
        r.get_association(TENANT, subnet.id).await.unwrap(),
        Some(rt1.id)
    );

    assert_eq!(
        r.disassociate_subnet(TENANT, subnet.id).await.unwrap(),
        Some(rt1.id)
    );
    assert_eq!(r.disassociate_subnet(TENANT, subnet.id).await.unwrap(), None);
    r.associate_subnet(TENANT, subnet.id, rt2.id).await.unwrap();
    assert_eq!(
        r.get_association(TENANT, subnet.id).await.unwrap(),
        Some(rt2.id)
    );
}

#[tokio::test]
async fn test_routetable_delete_leaves_no_routes() {
    let host = Host::new(Backend::PacketFilter);
    let r = host.start().await;
    r.create_subnet(TENANT, "10.0.0.0/24", None).await.unwrap();
    let rt = r.create_routetable(TENANT, None, None).await.unwrap();
    r.create_route(TENANT, rt.id, "10.0.0.0/24", "default", "public")
        .await
        .unwrap();

    r.delete_routetable(TENANT, rt.id).await.unwrap();
    let err = r.list_routes(TENANT, rt.id).await.unwrap_err();
    assert!(matches!(err, L3Error::RoutetableNotFound { .. }));
    assert!(r.list_routetables(TENANT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_referenced_subnet_survives_delete() {
    let host = Host::new(Backend::PacketFilter);
    let r = host.start().await;
    let subnet = r.create_subnet(TENANT, "10.0.0.0/24", None).await.unwrap();
    let rt = r.create_routetable(TENANT, None, None).await.unwrap();
    r.create_route(TENANT, rt.id, "10.0.0.0/24", "default", "public")
        .await
        .unwrap();
    let rules = host.kernel.rules(l3gw_iptables::DEFAULT_CHAIN);

    let err = r.delete_subnet(TENANT, subnet.id).await.unwrap_err();
    assert!(matches!(
        err,
        L3Error::SubnetRouteError { route_count: 1, .. }
    ));
    assert_eq!(r.get_subnet(TENANT, subnet.id).await.unwrap(), subnet);
    assert_eq!(host.kernel.rules(l3gw_iptables::DEFAULT_CHAIN), rules);
}

#[tokio::test]
async fn test_endpoint_boundaries() {
    let host = Host::new(Backend::PacketFilter);
    let r = host.start().await;
    r.create_subnet(TENANT, "10.0.0.0/24", None).await.unwrap();
    let rt = r.create_routetable(TENANT, None, None).await.unwrap();

    let err = r
        .create_route(TENANT, rt.id, "???", "default", "public")
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::InvalidCidr { .. }));

    // a source must be one of the tenant's subnets
    let err = r
        .create_route(TENANT, rt.id, "10.1.0.0/24", "default", "public")
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::RouteSourceInvalid { .. }));

    let err = r
        .create_route(TENANT, rt.id, "*", "default", "nowhere")
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::TargetNotFound { .. }));

    // the source cidr must equal the subnet's, host bits included
    let err = r
        .create_route(TENANT, rt.id, "10.0.0.5/24", "0.0.0.0", "public")
        .await
        .unwrap_err();
    assert!(matches!(err, L3Error::RouteSourceInvalid { .. }));

    r.create_route(TENANT, rt.id, "*", "10.20.0.0/16", "private")
        .await
        .unwrap();
    r.create_route(TENANT, rt.id, "10.0.0.0/24", "0.0.0.0", "public")
        .await
        .unwrap();
    assert_eq!(r.list_routes(TENANT, rt.id).await.unwrap().len(), 2);
    assert!(!r.is_dirty());
}
