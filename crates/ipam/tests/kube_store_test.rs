//! Smoke test against a live cluster
//!
//! Requires the CRDs from `crdgen` to be applied and a kubeconfig with
//! cluster-admin rights. Run with `cargo test -p ipam -- --ignored`.

use crds::{IPPool, IPPoolSpec};
use ipam::{Ipam, KubeStore};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::{DeleteParams, PostParams};
use std::collections::BTreeMap;

#[tokio::test]
#[ignore] // Requires a Kubernetes cluster
async fn test_assign_and_release_on_cluster() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let client = kube::Client::try_default().await.expect("kubeconfig");
    let pools: Api<IPPool> = Api::all(client.clone());
    let pool = IPPool {
        metadata: ObjectMeta {
            name: Some("ipam-smoke-test".to_string()),
            ..Default::default()
        },
        spec: IPPoolSpec {
            cidr: "198.51.100.0/24".to_string(),
            block_size: Some(28),
            ..Default::default()
        },
        status: None,
    };
    pools.create(&PostParams::default(), &pool).await.expect("create pool");

    let ipam = Ipam::new(KubeStore::new(client));
    let assigned = ipam
        .auto_assign("ipam-smoke-test", "smoke-handle", &BTreeMap::new())
        .await
        .expect("assign");
    assert_eq!(assigned.ip().to_string(), "198.51.100.0");

    ipam.release_by_handle("smoke-handle").await.expect("release");
    let usage = ipam.get_utilization(&["ipam-smoke-test"]).await.expect("utilization");
    assert_eq!(usage[0].allocated, 0);

    pools
        .delete("ipam-smoke-test", &DeleteParams::default())
        .await
        .expect("delete pool");
}
