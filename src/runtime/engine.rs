/// Conversational graph walker
///
/// Each inbound message is one call to [`ExecutionEngine::handle_inbound`]:
/// load the counterparty's state, pick the flow, walk from the trigger (or
/// from the node the conversation was waiting on) until a message node waits
/// for a reply, a terminal node is reached, or the walk fails, then persist.
/// Walks for the same counterparty are serialized by [`ConversationLocks`].

use crate::collaborators::guard::guarded;
use crate::config::EngineConfig;
use crate::conversation::{ConversationState, ConversationStore, HistoryRecord, Position};
use crate::error::{EngineError, GraphIntegrityError, NodeError};
use crate::flow::graph::{Branch, CompiledFlow};
use crate::flow::registry::FlowRegistry;
use crate::flow::types::NodeSpec;
use crate::runtime::executor::{ConversationContext, InboundMessage, NodeExecutor, SideEffect};
use crate::runtime::locks::ConversationLocks;
use crate::runtime::nodes::trigger;
use crate::runtime::variables::{VarValue, VariableSchema, VariableStore};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const ALERT_TARGET: &str = "convoflow::alert";

/// How a walk segment ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WalkOutcome {
    /// Waiting for the counterparty's next message
    Suspended { node_id: String },
    Finished { node_id: String },
    /// No eligible outgoing edge; the fallback reply was sent
    Stuck { node_id: String },
    /// Segment rolled back; the fallback reply was sent
    Aborted { node_id: Option<String>, reason: String },
    /// The flow was deactivated while walking
    Cancelled { node_id: String },
    /// No trigger accepted the message; nothing was persisted
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkReport {
    pub flow_id: Option<String>,
    pub outcome: WalkOutcome,
    /// Executed node ids, in order
    pub visited: Vec<String>,
    pub effects: Vec<SideEffect>,
    pub steps: usize,
}

impl WalkReport {
    fn ignored(flow_id: Option<String>) -> Self {
        Self {
            flow_id,
            outcome: WalkOutcome::Ignored,
            visited: Vec::new(),
            effects: Vec::new(),
            steps: 0,
        }
    }
}

/// Failures that roll the segment back
#[derive(Debug, Error)]
enum AbortReason {
    #[error(transparent)]
    Integrity(#[from] GraphIntegrityError),
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Bookkeeping for one walk segment
#[derive(Debug, Default)]
struct Segment {
    current: Option<String>,
    visited: Vec<String>,
    effects: Vec<SideEffect>,
    steps: usize,
    /// Applied writes that outlive a rollback
    durable: Vec<(String, VarValue)>,
}

enum Transition {
    Next(NodeIndex),
    Done(WalkOutcome),
}

/// Schema-check a batch of writes, then apply all of them
fn apply_writes(
    schema: &VariableSchema,
    store: &mut VariableStore,
    writes: Vec<(String, VarValue)>,
) -> Result<(), NodeError> {
    for (name, value) in &writes {
        schema.check(name, value)?;
    }
    for (name, value) in writes {
        store.set(name, value);
    }
    Ok(())
}

fn trigger_accepts(flow: &CompiledFlow, inbound: &InboundMessage, first_message: bool) -> bool {
    match &flow.node(flow.trigger()).spec {
        NodeSpec::Trigger(cfg) => trigger::accepts(cfg, inbound, first_message),
        _ => false,
    }
}

#[derive(Debug)]
pub struct ExecutionEngine {
    registry: Arc<FlowRegistry>,
    store: Arc<dyn ConversationStore>,
    executor: Arc<NodeExecutor>,
    locks: ConversationLocks,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<FlowRegistry>,
        store: Arc<dyn ConversationStore>,
        executor: Arc<NodeExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            locks: ConversationLocks::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one inbound message end to end
    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<WalkReport, EngineError> {
        let _guard = self
            .locks
            .acquire(
                &inbound.company_id,
                &inbound.phone,
                Duration::from_secs(self.config.lock_wait_secs),
            )
            .await?;

        let mut state = self
            .store
            .load(&inbound.company_id, &inbound.phone)
            .await?
            .unwrap_or_else(|| ConversationState::new(&inbound.company_id, &inbound.phone));

        let Some(flow) = self.select_flow(&mut state, &inbound)? else {
            tracing::debug!("🚫 No trigger of company {} accepted message from {}",
                inbound.company_id, inbound.phone);
            return Ok(WalkReport::ignored(None));
        };

        let report = self.step(&flow, &mut state, &inbound).await;
        if report.outcome != WalkOutcome::Ignored {
            state.touch();
            self.store.save(&state).await?;
        }
        Ok(report)
    }

    /// Resume the awaited flow, honor a pinned flow, or find the first
    /// active company flow whose trigger accepts the message
    fn select_flow(
        &self,
        state: &mut ConversationState,
        inbound: &InboundMessage,
    ) -> Result<Option<Arc<CompiledFlow>>, EngineError> {
        if let Some(flow_id) = state.position.awaiting().map(|(flow_id, _)| flow_id.to_string()) {
            if self.registry.is_active(&flow_id) {
                return Ok(self.registry.get(&flow_id));
            }
            tracing::warn!("⚠️ Awaited flow {} is gone or inactive, restarting {}/{}",
                flow_id, state.company_id, state.phone);
            state.position = Position::Start;
        }

        if let Some(flow_id) = &inbound.flow_id {
            return self
                .registry
                .get(flow_id)
                .filter(|f| f.company_id() == inbound.company_id && self.registry.is_active(flow_id))
                .map(Some)
                .ok_or_else(|| EngineError::FlowNotFound(flow_id.clone()));
        }

        let flows = self.registry.active_flows_for(&inbound.company_id);
        if flows.is_empty() {
            return Err(EngineError::NoMatchingFlow(inbound.company_id.clone()));
        }
        let first_message = state.is_first_message();
        Ok(flows
            .into_iter()
            .find(|flow| trigger_accepts(flow, inbound, first_message)))
    }

    /// Advance one conversation by one inbound message.
    ///
    /// Never fails: integrity and collaborator failures roll back the
    /// segment's variable writes and are reported as [`WalkOutcome::Aborted`].
    pub async fn step(
        &self,
        flow: &CompiledFlow,
        state: &mut ConversationState,
        inbound: &InboundMessage,
    ) -> WalkReport {
        let walk_start = Instant::now();
        let before = state.clone();

        let ctx = ConversationContext {
            flow,
            inbound,
            history: state.chat_turns(),
            first_message: state.is_first_message(),
        };
        state.push_history(
            HistoryRecord::inbound(&inbound.text, inbound.timestamp),
            self.config.history_limit,
        );

        tracing::info!("🚀 Walking flow {} for {}/{}", flow.id(), inbound.company_id, inbound.phone);
        let mut segment = Segment::default();
        let result = self.walk(flow, state, &ctx, &mut segment).await;

        let outcome = match result {
            Ok(WalkOutcome::Ignored) => {
                *state = before;
                WalkOutcome::Ignored
            }
            Ok(WalkOutcome::Stuck { node_id }) => {
                tracing::error!(
                    target: ALERT_TARGET,
                    flow_id = %flow.id(),
                    node_id = %node_id,
                    company_id = %state.company_id,
                    phone = %state.phone,
                    "❌ Walk stuck: {}", GraphIntegrityError::NoEligibleEdge(node_id.clone())
                );
                self.send_fallback(state, &node_id, &mut segment).await;
                WalkOutcome::Stuck { node_id }
            }
            Ok(outcome) => outcome,
            Err(reason) => {
                state.variables = before.variables;
                state.position = before.position;
                for (name, value) in segment.durable.drain(..) {
                    state.variables.set(name, value);
                }
                let node_id = segment.current.clone();
                tracing::error!(
                    target: ALERT_TARGET,
                    flow_id = %flow.id(),
                    node_id = ?node_id,
                    company_id = %state.company_id,
                    phone = %state.phone,
                    "❌ Walk aborted and rolled back: {}", reason
                );
                let fallback_node = node_id.clone().unwrap_or_else(|| flow.node(flow.trigger()).id.clone());
                self.send_fallback(state, &fallback_node, &mut segment).await;
                WalkOutcome::Aborted {
                    node_id,
                    reason: reason.to_string(),
                }
            }
        };

        tracing::info!("🎉 Walk of flow {} ended in {:?} after {} steps: {:?}",
            flow.id(), walk_start.elapsed(), segment.steps, outcome);

        WalkReport {
            flow_id: Some(flow.id().to_string()),
            outcome,
            visited: segment.visited,
            effects: segment.effects,
            steps: segment.steps,
        }
    }

    async fn walk(
        &self,
        flow: &CompiledFlow,
        state: &mut ConversationState,
        ctx: &ConversationContext<'_>,
        segment: &mut Segment,
    ) -> Result<WalkOutcome, AbortReason> {
        let limit = flow.max_steps().unwrap_or(self.config.max_steps);

        let resume_at = state
            .position
            .awaiting()
            .filter(|(flow_id, _)| *flow_id == flow.id())
            .map(|(_, node_id)| node_id.to_string());

        let mut current = match resume_at.as_deref().and_then(|id| flow.index_of(id).map(|i| (id, i))) {
            Some((node_id, index)) => {
                tracing::info!("⏯️ Resuming flow {} at {}", flow.id(), node_id);
                segment.current = Some(node_id.to_string());
                self.capture_reply(flow, index, state, ctx.inbound)?;
                match self.advance(flow, index, &Branch::Any, state) {
                    Transition::Next(next) => next,
                    Transition::Done(outcome) => return Ok(outcome),
                }
            }
            None => {
                if let Some(node_id) = &resume_at {
                    tracing::warn!("⚠️ Awaited node {} no longer exists in flow {}, starting over",
                        node_id, flow.id());
                }
                for (name, value) in flow.defaults().iter() {
                    if !state.variables.contains(name) {
                        state.variables.set(name.clone(), value.clone());
                    }
                }
                flow.trigger()
            }
        };

        loop {
            segment.steps += 1;
            if segment.steps > limit {
                return Err(GraphIntegrityError::StepLimitExceeded(limit).into());
            }

            let node = flow.node(current);
            segment.current = Some(node.id.clone());
            segment.visited.push(node.id.clone());
            tracing::info!("📍 Step {}: node '{}' (type: {:?})", segment.steps, node.id, node.node_type);

            let outcome = self.executor.execute_node(node, &state.variables, ctx).await?;
            if outcome.ignored {
                return Ok(WalkOutcome::Ignored);
            }

            let durable: Vec<(String, VarValue)> = outcome
                .writes
                .iter()
                .filter(|(name, _)| outcome.durable.contains(name))
                .cloned()
                .collect();
            apply_writes(flow.schema(), &mut state.variables, outcome.writes)?;
            segment.durable.extend(durable);
            for effect in outcome.effects {
                if let SideEffect::MessageSent { node_id, text, .. } = &effect {
                    state.push_history(
                        HistoryRecord::outbound(text.clone(), Some(node_id.clone())),
                        self.config.history_limit,
                    );
                }
                segment.effects.push(effect);
            }

            if outcome.awaits_input && matches!(node.spec, NodeSpec::Message(_)) {
                state.position = Position::AwaitingInput {
                    flow_id: flow.id().to_string(),
                    node_id: node.id.clone(),
                };
                tracing::info!("⏸️ Flow {} waiting for reply at {}", flow.id(), node.id);
                return Ok(WalkOutcome::Suspended {
                    node_id: node.id.clone(),
                });
            }

            match self.advance(flow, current, &outcome.branch, state) {
                Transition::Next(next) => current = next,
                Transition::Done(outcome) => return Ok(outcome),
            }
        }
    }

    /// Inbound variables and the optional reply capture of the awaited node
    fn capture_reply(
        &self,
        flow: &CompiledFlow,
        index: NodeIndex,
        state: &mut ConversationState,
        inbound: &InboundMessage,
    ) -> Result<(), NodeError> {
        let mut writes: Vec<(String, VarValue)> = trigger::inbound_writes(inbound)
            .into_iter()
            .map(|(name, value)| (name, VarValue::from(value)))
            .collect();

        if let NodeSpec::Message(cfg) = &flow.node(index).spec {
            if let Some(variable) = &cfg.save_reply_to {
                let kind = flow.schema().kind_of(variable);
                let reply = kind.coerce(Value::String(inbound.text.trim().to_string()));
                writes.push((variable.clone(), VarValue::from(reply)));
            }
        }

        apply_writes(flow.schema(), &mut state.variables, writes)
    }

    /// Transition out of a node that just ran (or was resumed)
    fn advance(
        &self,
        flow: &CompiledFlow,
        from: NodeIndex,
        branch: &Branch,
        state: &mut ConversationState,
    ) -> Transition {
        let node_id = flow.node(from).id.clone();

        if flow.is_terminal(from) {
            state.position = Position::Finished {
                flow_id: flow.id().to_string(),
                node_id: node_id.clone(),
            };
            return Transition::Done(WalkOutcome::Finished { node_id });
        }

        if !self.registry.is_active(flow.id()) {
            tracing::warn!("⏹️ Flow {} was deactivated, stopping after {}", flow.id(), node_id);
            state.position = Position::Start;
            return Transition::Done(WalkOutcome::Cancelled { node_id });
        }

        match flow.select_edge(from, branch, &state.variables) {
            Some(edge) => {
                tracing::debug!("🔗 {} → {} via edge {}", node_id, flow.node(edge.target).id, edge.id);
                Transition::Next(edge.target)
            }
            None => {
                state.position = Position::Stuck {
                    flow_id: flow.id().to_string(),
                    node_id: node_id.clone(),
                };
                Transition::Done(WalkOutcome::Stuck { node_id })
            }
        }
    }

    /// Best effort; a failed fallback is only logged
    async fn send_fallback(&self, state: &mut ConversationState, node_id: &str, segment: &mut Segment) {
        let text = self.config.fallback_message.clone();
        let messenger = &self.executor.collaborators.messenger;
        let phone = state.phone.clone();

        match guarded("whatsapp", &self.executor.policy.once(), || messenger.send(&phone, &text)).await {
            Ok(_) => {
                state.push_history(HistoryRecord::outbound(text.clone(), None), self.config.history_limit);
                segment.effects.push(SideEffect::MessageSent {
                    node_id: node_id.to_string(),
                    to: phone,
                    text,
                });
            }
            Err(e) => tracing::error!(
                target: ALERT_TARGET,
                company_id = %state.company_id,
                phone = %phone,
                "❌ Fallback reply could not be delivered: {}", e
            ),
        }
    }

    /// Current persisted state of one conversation
    pub async fn conversation(
        &self,
        company_id: &str,
        phone: &str,
    ) -> Result<Option<ConversationState>, EngineError> {
        Ok(self.store.load(company_id, phone).await?)
    }

    /// Forget a conversation; the next message starts fresh
    pub async fn reset(&self, company_id: &str, phone: &str) -> Result<bool, EngineError> {
        let _guard = self
            .locks
            .acquire(company_id, phone, Duration::from_secs(self.config.lock_wait_secs))
            .await?;
        let cleared = self.store.clear(company_id, phone).await?;
        tracing::info!("🧹 Conversation {}/{} reset (existed: {})", company_id, phone, cleared);
        Ok(cleared)
    }

    /// Drop conversations idle for longer than the session TTL
    pub async fn purge_idle(&self) -> Result<u64, EngineError> {
        let before = Utc::now() - chrono::Duration::minutes(self.config.session_ttl_minutes);
        let purged = self.store.purge_idle(before).await?;
        let pruned = self.locks.prune();
        tracing::debug!("🧹 Purged {} idle conversations, pruned {} locks", purged, pruned);
        Ok(purged)
    }
}
