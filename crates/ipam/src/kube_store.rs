//! Kubernetes-backed store
//!
//! Pools, blocks and handles are cluster-scoped custom resources. The API
//! server's `resourceVersion` check on replace and the delete precondition
//! provide the optimistic concurrency the engine relies on.

use crate::error::StoreError;
use crate::store::IpamStore;
use crds::{IPAMBlock, IPAMHandle, IPPool, POOL_NAME_LABEL};
use kube::api::{DeleteParams, ListParams, PostParams, Preconditions};
use kube::{Api, Client, ResourceExt};

/// [`IpamStore`] over the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    pools: Api<IPPool>,
    blocks: Api<IPAMBlock>,
    handles: Api<IPAMHandle>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            pools: Api::all(client.clone()),
            blocks: Api::all(client.clone()),
            handles: Api::all(client),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }
}

/// Map API errors onto the store's race signals.
fn map_err(kind: &str, name: &str, err: kube::Error) -> StoreError {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => {
            StoreError::NotFound(format!("{} {}", kind, name))
        }
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(format!("{} {}", kind, name))
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict(format!("{} {}: {}", kind, name, ae.message))
        }
        _ => StoreError::Kube(err),
    }
}

fn delete_params(resource_version: Option<String>) -> DeleteParams {
    DeleteParams {
        preconditions: Some(Preconditions {
            resource_version,
            uid: None,
        }),
        ..DeleteParams::default()
    }
}

#[async_trait::async_trait]
impl IpamStore for KubeStore {
    async fn get_pool(&self, name: &str) -> Result<IPPool, StoreError> {
        self.pools.get(name).await.map_err(|e| map_err("IPPool", name, e))
    }

    async fn list_pools(&self) -> Result<Vec<IPPool>, StoreError> {
        let pools = self
            .pools
            .list(&ListParams::default())
            .await
            .map_err(|e| map_err("IPPool", "list", e))?;
        Ok(pools.items)
    }

    async fn get_block(&self, name: &str) -> Result<IPAMBlock, StoreError> {
        self.blocks.get(name).await.map_err(|e| map_err("IPAMBlock", name, e))
    }

    async fn list_blocks(&self, pool: &str) -> Result<Vec<IPAMBlock>, StoreError> {
        let lp = ListParams::default().labels(&format!("{}={}", POOL_NAME_LABEL, pool));
        let blocks = self
            .blocks
            .list(&lp)
            .await
            .map_err(|e| map_err("IPAMBlock", pool, e))?;
        Ok(blocks.items)
    }

    async fn create_block(&self, block: &IPAMBlock) -> Result<IPAMBlock, StoreError> {
        self.blocks
            .create(&PostParams::default(), block)
            .await
            .map_err(|e| map_err("IPAMBlock", &block.name_any(), e))
    }

    async fn update_block(&self, block: &IPAMBlock) -> Result<IPAMBlock, StoreError> {
        let name = block.name_any();
        self.blocks
            .replace(&name, &PostParams::default(), block)
            .await
            .map_err(|e| map_err("IPAMBlock", &name, e))
    }

    async fn delete_block(&self, block: &IPAMBlock) -> Result<(), StoreError> {
        let name = block.name_any();
        self.blocks
            .delete(&name, &delete_params(block.resource_version()))
            .await
            .map(|_| ())
            .map_err(|e| map_err("IPAMBlock", &name, e))
    }

    async fn get_handle(&self, name: &str) -> Result<IPAMHandle, StoreError> {
        self.handles.get(name).await.map_err(|e| map_err("IPAMHandle", name, e))
    }

    async fn create_handle(&self, handle: &IPAMHandle) -> Result<IPAMHandle, StoreError> {
        self.handles
            .create(&PostParams::default(), handle)
            .await
            .map_err(|e| map_err("IPAMHandle", &handle.name_any(), e))
    }

    async fn update_handle(&self, handle: &IPAMHandle) -> Result<IPAMHandle, StoreError> {
        let name = handle.name_any();
        self.handles
            .replace(&name, &PostParams::default(), handle)
            .await
            .map_err(|e| map_err("IPAMHandle", &name, e))
    }

    async fn delete_handle(&self, handle: &IPAMHandle) -> Result<(), StoreError> {
        let name = handle.name_any();
        self.handles
            .delete(&name, &delete_params(handle.resource_version()))
            .await
            .map(|_| ())
            .map_err(|e| map_err("IPAMHandle", &name, e))
    }
}
