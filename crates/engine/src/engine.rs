//! The orchestration engine — the run-loop state machine.
//!
//! Observable state is the pair (branch navigation stack, session context).
//! Each loop iteration asks the active branch's decision node for the next
//! action, then either navigates (push/pop/reset of the stack) or invokes a
//! tool and streams its envelopes: every envelope is forwarded to the sink
//! *before* it is appended to the memory trail, and before the next decision
//! is issued. The loop never panics and never lets an error escape
//! unconverted; terminal failures become one kind=`error` envelope plus an
//! `EngineError` return.

use std::collections::HashMap;
use std::sync::Arc;

use datascope_core::decision::Action;
use datascope_core::envelope::Envelope;
use datascope_core::error::{EngineError, RegistryError};
use datascope_core::inference::InferenceBackend;
use datascope_core::session::{MemoryEntry, SessionContext};
use datascope_core::tool::ToolCapability;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::branch::{BASE_BRANCH, BranchArena};
use crate::node::DecisionNode;

/// Default cap on decisions within one conversation step.
pub const DEFAULT_MAX_STEPS: u64 = 64;

/// Consecutive routing failures tolerated before the step is terminated.
pub const DEFAULT_ROUTING_RETRY_LIMIT: u32 = 3;

const BASE_INSTRUCTION: &str = "Choose the appropriate next action for the user's request.";

/// The orchestration engine for one conversation.
///
/// Owns the session context, the branch tree with one decision node per
/// branch, and the navigation stack. Registry mutation is only possible
/// between runs: `run` takes `&mut self`, so no decision can be in flight
/// while options change.
pub struct Orchestrator {
    conversation_id: String,
    backend: Arc<dyn InferenceBackend>,
    context: SessionContext,
    arena: BranchArena,
    nodes: HashMap<String, DecisionNode>,
    stack: Vec<String>,
    max_steps: u64,
    routing_retry_limit: u32,
}

impl Orchestrator {
    /// Create an engine with a fresh session context and the permanent base
    /// branch.
    pub fn new(
        conversation_id: impl Into<String>,
        domain_context: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            BASE_BRANCH.to_string(),
            DecisionNode::new(BASE_BRANCH, BASE_INSTRUCTION),
        );
        Self {
            conversation_id: conversation_id.into(),
            backend,
            context: SessionContext::new(domain_context),
            arena: BranchArena::new(BASE_INSTRUCTION),
            nodes,
            stack: vec![BASE_BRANCH.to_string()],
            max_steps: DEFAULT_MAX_STEPS,
            routing_retry_limit: DEFAULT_ROUTING_RETRY_LIMIT,
        }
    }

    /// Override the per-run decision cap.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Override the consecutive routing-failure limit.
    pub fn with_routing_retry_limit(mut self, limit: u32) -> Self {
        self.routing_retry_limit = limit;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// The ordered memory trail accumulated so far.
    pub fn memory_trail(&self) -> &[MemoryEntry] {
        self.context.memory.entries()
    }

    /// The active navigation path (bottom element is always the base).
    pub fn branch_stack(&self) -> &[String] {
        &self.stack
    }

    // ── Registry mutation ─────────────────────────────────────────────

    /// Register a tool under a branch. Fails if the branch is unknown or
    /// the tool name already exists in that branch.
    pub fn add_tool(
        &mut self,
        branch_id: &str,
        capability: Arc<dyn ToolCapability>,
    ) -> Result<(), RegistryError> {
        let node = self
            .nodes
            .get_mut(branch_id)
            .ok_or_else(|| RegistryError::UnknownBranch(branch_id.to_string()))?;
        let name = capability.name().to_string();
        node.add_tool_option(capability)?;
        info!(branch = branch_id, tool = %name, "Registered tool");
        Ok(())
    }

    /// Create a child branch with its own decision node and expose it as an
    /// option on the parent.
    pub fn add_branch(
        &mut self,
        branch_id: &str,
        instruction: &str,
        parent: &str,
        description: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.arena.insert(branch_id, instruction, parent)?;
        self.nodes
            .insert(branch_id.to_string(), DecisionNode::new(branch_id, instruction));

        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Navigate to {branch_id} for specialized operations"));
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.add_branch_option(branch_id, &description)?;
        }
        info!(branch = branch_id, parent, "Added branch");
        Ok(())
    }

    /// Remove a non-root branch and its entire subtree: descendant branches,
    /// their decision nodes, and every tool registration they own. The
    /// branch disappears from its parent's options.
    pub fn remove_branch(&mut self, branch_id: &str) -> Result<(), RegistryError> {
        let parent = self
            .arena
            .get(branch_id)
            .and_then(|b| b.parent.clone());
        let removed = self.arena.remove_subtree(branch_id)?;

        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.remove_branch_option(branch_id);
            }
        }
        for removed_id in &removed {
            self.nodes.remove(removed_id);
        }
        info!(branch = branch_id, removed = removed.len(), "Removed branch subtree");
        Ok(())
    }

    /// Every registered tool as `(branch_id, tool_name)`, sorted.
    pub fn registered_tools(&self) -> Vec<(String, String)> {
        let mut tools: Vec<(String, String)> = self
            .nodes
            .iter()
            .flat_map(|(branch, node)| {
                node.tool_names()
                    .into_iter()
                    .map(move |tool| (branch.clone(), tool))
            })
            .collect();
        tools.sort();
        tools
    }

    // ── Run loop ──────────────────────────────────────────────────────

    /// Process one user request, streaming envelopes into `sink` as they
    /// are produced. Returns when a termination transition fires; the
    /// engine can be run again later with a new request on the same
    /// accumulated session context.
    pub async fn run(
        &mut self,
        user_request: &str,
        sink: &mpsc::Sender<Envelope>,
    ) -> Result<(), EngineError> {
        info!(
            conversation_id = %self.conversation_id,
            request = user_request,
            "Starting conversation step"
        );

        self.context.begin_request(user_request);
        self.stack = vec![BASE_BRANCH.to_string()];

        let mut steps_this_run: u64 = 0;
        let mut routing_failures: u32 = 0;

        loop {
            if steps_this_run >= self.max_steps {
                let message = format!(
                    "conversation step exceeded {} decisions without completing",
                    self.max_steps
                );
                warn!(conversation_id = %self.conversation_id, "{message}");
                let _ = sink.send(Envelope::terminal_error("step_limit", &message)).await;
                return Err(EngineError::StepLimit {
                    limit: self.max_steps,
                });
            }

            let top = match self.stack.last() {
                Some(branch) => branch.clone(),
                None => BASE_BRANCH.to_string(),
            };
            steps_this_run += 1;
            self.context.step_count += 1;

            let decision = {
                let node = self
                    .nodes
                    .get(&top)
                    .ok_or_else(|| EngineError::UnknownBranch(top.clone()))?;
                match node.decide(&self.context, self.backend.as_ref()).await {
                    Ok(decision) => decision,
                    Err(source) => {
                        let message = format!("decision failed in branch '{top}': {source}");
                        warn!(conversation_id = %self.conversation_id, "{message}");
                        self.context.failures.record(&top, &message);
                        let _ = sink
                            .send(Envelope::terminal_error("decision_failed", &message))
                            .await;
                        return Err(EngineError::Decision {
                            branch: top,
                            source,
                        });
                    }
                }
            };

            match decision.action {
                Action::Branch => {
                    let known = self
                        .nodes
                        .get(&top)
                        .is_some_and(|node| node.has_branch_option(&decision.target));
                    if !known {
                        self.routing_failure(&top, &decision.target, "branch", &mut routing_failures, sink)
                            .await?;
                        continue;
                    }
                    routing_failures = 0;
                    debug!(from = %top, to = %decision.target, "Navigating into branch");
                    self.stack.push(decision.target);
                }
                Action::Tool => {
                    let capability = self
                        .nodes
                        .get(&top)
                        .and_then(|node| node.tool_option(&decision.target))
                        .map(|option| option.capability.clone());
                    let Some(capability) = capability else {
                        self.routing_failure(&top, &decision.target, "tool", &mut routing_failures, sink)
                            .await?;
                        continue;
                    };
                    routing_failures = 0;

                    debug!(tool = %decision.target, "Invoking tool");
                    match capability.invoke(&self.context, &decision.tool_inputs).await {
                        Ok(mut stream) => {
                            while let Some(envelope) = stream.next().await {
                                sink.send(envelope.clone())
                                    .await
                                    .map_err(|_| EngineError::Cancelled)?;
                                self.context.memory.append(&decision.target, &envelope);
                            }
                        }
                        Err(failure) => {
                            warn!(tool = %decision.target, error = %failure, "Tool failed");
                            let envelope =
                                Envelope::error_text(&decision.target, &failure.to_string());
                            sink.send(envelope.clone())
                                .await
                                .map_err(|_| EngineError::Cancelled)?;
                            self.context.memory.append(&decision.target, &envelope);
                            self.context
                                .failures
                                .record(&decision.target, &failure.to_string());
                        }
                    }

                    // Flag rules, in order: end wins over return-to-parent,
                    // and neither pops past the base.
                    let on_base = top == BASE_BRANCH;
                    if decision.end_actions && !on_base {
                        self.stack = vec![BASE_BRANCH.to_string()];
                    } else if decision.end_actions {
                        info!(conversation_id = %self.conversation_id, "Conversation step complete");
                        return Ok(());
                    } else if decision.return_to_parent && on_base {
                        info!(conversation_id = %self.conversation_id, "Conversation step complete");
                        return Ok(());
                    } else if decision.return_to_parent {
                        self.stack.pop();
                    }
                }
            }
        }
    }

    /// Record a routing failure and decide whether to re-invoke or give up.
    async fn routing_failure(
        &mut self,
        branch: &str,
        target: &str,
        kind: &str,
        failures: &mut u32,
        sink: &mpsc::Sender<Envelope>,
    ) -> Result<(), EngineError> {
        *failures += 1;
        let message = format!("decision selected unknown {kind} '{target}' in branch '{branch}'");
        warn!(attempt = *failures, "{message}");
        self.context.failures.record(branch, &message);

        if *failures >= self.routing_retry_limit {
            let surfaced = format!(
                "Unable to route the request after {} attempts: {message}",
                *failures
            );
            let _ = sink
                .send(Envelope::terminal_error("routing_failed", &surfaced))
                .await;
            return Err(EngineError::RoutingExhausted {
                branch: branch.to_string(),
                target: target.to_string(),
                attempts: *failures,
            });
        }
        Ok(())
    }
}
