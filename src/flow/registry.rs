/// Hot-reload flow registry using ArcSwap
///
/// Holds every stored flow in compiled form. Updates clone the map, change one
/// entry and swap the pointer with `rcu`, so walks that already hold an
/// `Arc<CompiledFlow>` keep running on the version they started with. Writers
/// are serialized so storage and the published map agree. Activation state is read
/// from here once per transition, which is how deactivation reaches in-flight
/// walks.

use crate::error::{EngineError, GraphIntegrityError};
use crate::flow::{
    graph::CompiledFlow,
    storage::{FlowMetadata, FlowStorage},
    types::Flow,
};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct FlowRegistry {
    /// Key: flow id
    flows: ArcSwap<HashMap<String, Arc<CompiledFlow>>>,
    storage: Option<FlowStorage>,
    writes: Mutex<()>,
}

impl FlowRegistry {
    pub fn new(storage: FlowStorage) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            storage: Some(storage),
            writes: Mutex::new(()),
        }
    }

    /// Registry without persistence, used by embedders and tests
    pub fn in_memory() -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            storage: None,
            writes: Mutex::new(()),
        }
    }

    /// Load and compile every stored flow.
    ///
    /// A stored document that no longer passes integrity checks is left out
    /// of the registry and reported; it does not stop startup.
    pub async fn init_from_storage(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let mut compiled = HashMap::new();
        for flow in storage.load_all_flows().await? {
            let id = flow.id.clone();
            match CompiledFlow::compile(flow) {
                Ok(c) => {
                    compiled.insert(id, Arc::new(c));
                }
                Err(e) => tracing::error!(
                    target: "convoflow::alert",
                    flow_id = %id,
                    "❌ Stored flow failed integrity checks and was not loaded: {}", e
                ),
            }
        }
        self.flows.store(Arc::new(compiled));

        tracing::info!("📚 Flow registry initialized with {} flows", self.flows.load().len());
        Ok(())
    }

    /// Dry run of the write path: compile without storing
    pub fn validate(flow: Flow) -> Result<CompiledFlow, GraphIntegrityError> {
        CompiledFlow::compile(flow)
    }

    /// Validated write path: compile, persist, then publish
    pub async fn save_flow(&self, flow: Flow) -> Result<Arc<CompiledFlow>, EngineError> {
        let _guard = self.writes.lock().await;
        self.persist(flow).await
    }

    /// Flip the active flag through the same validated path
    pub async fn set_active(&self, flow_id: &str, active: bool) -> Result<Arc<CompiledFlow>, EngineError> {
        let _guard = self.writes.lock().await;
        let current = self
            .get(flow_id)
            .ok_or_else(|| EngineError::FlowNotFound(flow_id.to_string()))?;
        let mut flow = current.flow.clone();
        flow.active = active;
        self.persist(flow).await
    }

    pub async fn remove_flow(&self, flow_id: &str) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let stored = match &self.storage {
            Some(storage) => storage.delete_flow(flow_id).await?,
            None => false,
        };

        let cached = self.get(flow_id).is_some();
        if cached {
            self.flows.rcu(|current| {
                let mut next = (**current).clone();
                next.remove(flow_id);
                next
            });
            tracing::info!("🗑️ Removed flow from registry: {}", flow_id);
        }
        Ok(stored || cached)
    }

    async fn persist(&self, flow: Flow) -> Result<Arc<CompiledFlow>, EngineError> {
        let compiled = Arc::new(CompiledFlow::compile(flow)?);
        if let Some(storage) = &self.storage {
            storage.save_flow(&compiled).await?;
        }
        self.publish(compiled.clone());

        tracing::info!("🔄 Hot-reloaded flow '{}' (active: {})", compiled.id(), compiled.flow.active);
        Ok(compiled)
    }

    /// Lock-free read
    pub fn get(&self, flow_id: &str) -> Option<Arc<CompiledFlow>> {
        self.flows.load().get(flow_id).cloned()
    }

    /// False for unknown and for deactivated flows
    pub fn is_active(&self, flow_id: &str) -> bool {
        self.flows
            .load()
            .get(flow_id)
            .is_some_and(|f| f.flow.active)
    }

    /// Active flows of one company, ordered by id
    pub fn active_flows_for(&self, company_id: &str) -> Vec<Arc<CompiledFlow>> {
        let mut flows: Vec<_> = self
            .flows
            .load()
            .values()
            .filter(|f| f.flow.active && f.company_id() == company_id)
            .cloned()
            .collect();
        flows.sort_by(|a, b| a.id().cmp(b.id()));
        flows
    }

    /// Summaries from storage when persistent, otherwise from memory
    pub async fn list_flows(&self, company_id: Option<&str>) -> Result<Vec<FlowMetadata>> {
        if let Some(storage) = &self.storage {
            return storage.list_flows(company_id).await;
        }

        let mut flows: Vec<FlowMetadata> = self
            .flows
            .load()
            .values()
            .filter(|f| company_id.map_or(true, |c| f.company_id() == c))
            .map(|f| FlowMetadata {
                id: f.flow.id.clone(),
                company_id: f.flow.company_id.clone(),
                name: f.flow.name.clone(),
                active: f.flow.active,
                created_at: None,
                updated_at: None,
            })
            .collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(flows)
    }

    fn publish(&self, compiled: Arc<CompiledFlow>) {
        let id = compiled.id().to_string();
        self.flows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(id.clone(), compiled.clone());
            next
        });
    }
}
