//! End-to-end run-loop scenarios driven by the scripted mock backend.

use std::sync::Arc;

use async_trait::async_trait;
use datascope_core::envelope::{Envelope, EnvelopeKind};
use datascope_core::error::{EngineError, RegistryError, ToolError};
use datascope_core::session::SessionContext;
use datascope_core::tool::{
    EnvelopeStream, InputSchema, ToolCapability, ToolInputs, envelope_stream,
};
use datascope_engine::{BASE_BRANCH, Orchestrator};
use datascope_providers::MockBackend;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// A tool that replays a fixed sequence of envelopes.
struct StaticTool {
    name: &'static str,
    envelopes: Vec<Envelope>,
}

impl StaticTool {
    fn new(name: &'static str, envelopes: Vec<Envelope>) -> Arc<Self> {
        Arc::new(Self { name, envelopes })
    }

    fn single(name: &'static str, marker: &str) -> Arc<Self> {
        Self::new(
            name,
            vec![
                Envelope::new(EnvelopeKind::Table, json!([{ "marker": marker }]))
                    .with_description(format!("result from {name}")),
            ],
        )
    }
}

#[async_trait]
impl ToolCapability for StaticTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "replays canned envelopes"
    }
    fn input_schema(&self) -> InputSchema {
        InputSchema::new().required("guidance", "string", "ignored")
    }
    async fn invoke(
        &self,
        _ctx: &SessionContext,
        _inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        Ok(envelope_stream(self.envelopes.clone()))
    }
}

/// A tool whose invocation always fails.
struct FailingTool;

#[async_trait]
impl ToolCapability for FailingTool {
    fn name(&self) -> &str {
        "explode"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
    }
    async fn invoke(
        &self,
        _ctx: &SessionContext,
        _inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "explode".into(),
            reason: "synthetic failure".into(),
        })
    }
}

fn decide_tool(target: &str, end_actions: bool, return_to_parent: bool) -> Value {
    json!({
        "action": "tool",
        "target": target,
        "guidance": "do the thing",
        "reasoning": "test script",
        "tool_inputs": {},
        "return_to_parent": return_to_parent,
        "end_actions": end_actions
    })
}

fn decide_branch(target: &str) -> Value {
    json!({
        "action": "branch",
        "target": target,
        "guidance": "specialize",
        "reasoning": "test script",
        "tool_inputs": {},
        "return_to_parent": false,
        "end_actions": false
    })
}

fn engine_with(backend: Arc<MockBackend>) -> Orchestrator {
    Orchestrator::new("conv-test", r#"{"tables": ["sales"]}"#, backend)
}

async fn run_collect(
    engine: &mut Orchestrator,
    request: &str,
) -> (Result<(), EngineError>, Vec<Envelope>) {
    let (tx, mut rx) = mpsc::channel(64);
    let result = engine.run(request, &tx).await;
    drop(tx);
    let mut envelopes = Vec::new();
    while let Some(envelope) = rx.recv().await {
        envelopes.push(envelope);
    }
    (result, envelopes)
}

#[tokio::test]
async fn memory_sequences_increase_by_one_across_runs() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("emit", false, false));
    backend.push(decide_tool("emit", false, false));
    backend.push(decide_tool("emit", true, false));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();

    let (result, _) = run_collect(&mut engine, "count things").await;
    result.unwrap();

    let sequences: Vec<u64> = engine.memory_trail().iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    // A later run on the same engine continues the numbering.
    backend.push(decide_tool("emit", true, false));
    let (result, _) = run_collect(&mut engine, "again").await;
    result.unwrap();
    let sequences: Vec<u64> = engine.memory_trail().iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn streamed_envelopes_keep_order_and_reach_memory() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("triple", false, false));
    backend.push(decide_tool("triple", true, false));

    let triple = StaticTool::new(
        "triple",
        vec![
            Envelope::new(EnvelopeKind::Table, json!([{ "marker": "a" }])).with_description("A"),
            Envelope::new(EnvelopeKind::Table, json!([{ "marker": "b" }])).with_description("B"),
            Envelope::new(EnvelopeKind::Table, json!([{ "marker": "c" }])).with_description("C"),
        ],
    );

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, triple).unwrap();

    let (result, envelopes) = run_collect(&mut engine, "stream three").await;
    result.unwrap();

    // Transport order matches stream order.
    let markers: Vec<&str> = envelopes
        .iter()
        .take(3)
        .map(|e| e.data[0]["marker"].as_str().unwrap())
        .collect();
    assert_eq!(markers, ["a", "b", "c"]);

    // Memory order matches, with contiguous sequences.
    let trail = engine.memory_trail();
    assert_eq!(trail[0].sequence, 1);
    assert_eq!(trail[1].sequence, 2);
    assert_eq!(trail[2].sequence, 3);
    assert_eq!(trail[0].data[0]["marker"], "a");
    assert_eq!(trail[2].data[0]["marker"], "c");

    // The decision after the stream already sees all three results, oldest
    // first — envelopes reached the boundary before the next step.
    let requests = backend.requests();
    let digest = &requests[1].context.memory_digest;
    let a = digest.find("\"marker\":\"a\"").unwrap();
    let c = digest.find("\"marker\":\"c\"").unwrap();
    assert!(a < c);
}

#[tokio::test]
async fn return_to_parent_on_base_terminates_instead_of_popping() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("emit", false, true));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();

    let (result, _) = run_collect(&mut engine, "one step").await;
    result.unwrap();
    assert_eq!(backend.calls(), 1);
    assert_eq!(engine.branch_stack(), [BASE_BRANCH]);
}

#[tokio::test]
async fn end_actions_wins_over_return_to_parent() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_branch("reporting"));
    // Both flags set inside the branch: "end" must win, resetting to base
    // and continuing rather than popping-and-terminating.
    backend.push(decide_tool("report", true, true));
    backend.push(decide_tool("finish", false, true));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, StaticTool::single("finish", "f")).unwrap();
    engine
        .add_branch("reporting", "Build reports", BASE_BRANCH, None)
        .unwrap();
    engine.add_tool("reporting", StaticTool::single("report", "r")).unwrap();

    let (result, _) = run_collect(&mut engine, "report it").await;
    result.unwrap();

    // Three decisions: base → reporting → back at base.
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    let tools_after_reset = requests[2].context.available_tools.to_string();
    assert!(tools_after_reset.contains("finish"));
    assert!(!tools_after_reset.contains("report\""));
}

#[tokio::test]
async fn branch_push_then_return_to_parent_pops() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_branch("reporting"));
    backend.push(decide_tool("report", false, true));
    backend.push(decide_tool("finish", true, false));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, StaticTool::single("finish", "f")).unwrap();
    engine
        .add_branch("reporting", "Build reports", BASE_BRANCH, Some("report workflows"))
        .unwrap();
    engine.add_tool("reporting", StaticTool::single("report", "r")).unwrap();

    let (result, envelopes) = run_collect(&mut engine, "report it").await;
    result.unwrap();

    let requests = backend.requests();
    // The second decision was issued inside "reporting": it sees the report
    // tool and no child branches.
    let reporting_tools = requests[1].context.available_tools.to_string();
    assert!(reporting_tools.contains("report"));
    assert!(!reporting_tools.contains("finish"));

    // Pure navigation produced no memory entry; the two tool calls did.
    assert_eq!(engine.memory_trail().len(), 2);
    assert_eq!(envelopes[0].data[0]["marker"], "r");
    assert_eq!(envelopes[1].data[0]["marker"], "f");
}

#[tokio::test]
async fn routing_failures_retry_then_surface_terminal_error() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("missing_tool", false, false));
    backend.push(decide_tool("missing_tool", false, false));
    backend.push(decide_tool("missing_tool", false, false));

    let mut engine = engine_with(backend.clone());

    let (result, envelopes) = run_collect(&mut engine, "use the missing tool").await;
    match result {
        Err(EngineError::RoutingExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected RoutingExhausted, got {other:?}"),
    }

    assert_eq!(backend.calls(), 3);
    assert_eq!(engine.context().failures.entries().len(), 3);

    // Exactly one user-visible error envelope with a machine-readable code.
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].kind, EnvelopeKind::Error);
    assert_eq!(envelopes[0].metadata["code"], "routing_failed");
}

#[tokio::test]
async fn single_routing_failure_recovers_on_retry() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("missing_tool", false, false));
    backend.push(decide_tool("emit", true, false));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();

    let (result, envelopes) = run_collect(&mut engine, "try again").await;
    result.unwrap();

    assert_eq!(engine.context().failures.entries().len(), 1);
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].data[0]["marker"], "x");

    // The retry decision was biased by the recorded mismatch.
    let digest = &backend.requests()[1].context.failure_digest;
    assert!(digest.contains("missing_tool"));
}

#[tokio::test]
async fn failing_tool_yields_one_error_envelope_and_loop_continues() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("explode", false, false));
    backend.push(decide_tool("emit", true, false));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, Arc::new(FailingTool)).unwrap();
    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();

    let (result, envelopes) = run_collect(&mut engine, "boom then recover").await;
    result.unwrap();

    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[0].kind, EnvelopeKind::Text);
    assert!(envelopes[0].is_error());
    assert!(!envelopes[1].is_error());

    // The contained failure still became a memory entry and a failure log
    // entry under the tool's name.
    assert_eq!(engine.memory_trail().len(), 2);
    assert_eq!(engine.memory_trail()[0].producer, "explode");
    assert_eq!(engine.context().failures.entries()[0].producer, "explode");
}

#[tokio::test]
async fn removing_a_branch_cascades_tools_and_options() {
    let backend = Arc::new(MockBackend::new());
    let mut engine = engine_with(backend);
    engine
        .add_branch("reporting", "Build reports", BASE_BRANCH, None)
        .unwrap();
    engine.add_tool("reporting", StaticTool::single("weekly", "w")).unwrap();
    engine.add_tool("reporting", StaticTool::single("monthly", "m")).unwrap();
    assert_eq!(engine.registered_tools().len(), 2);

    engine.remove_branch("reporting").unwrap();
    assert!(engine.registered_tools().is_empty());

    // The id is free again, which also proves the parent option was
    // detached.
    engine
        .add_branch("reporting", "Rebuilt", BASE_BRANCH, None)
        .unwrap();
}

#[tokio::test]
async fn removing_a_branch_takes_descendants_with_it() {
    let backend = Arc::new(MockBackend::new());
    let mut engine = engine_with(backend);
    engine
        .add_branch("reporting", "Build reports", BASE_BRANCH, None)
        .unwrap();
    engine
        .add_branch("weekly", "Weekly reports", "reporting", None)
        .unwrap();
    engine.add_tool("weekly", StaticTool::single("rollup", "x")).unwrap();

    engine.remove_branch("reporting").unwrap();
    assert!(engine.registered_tools().is_empty());
    assert!(matches!(
        engine.remove_branch("weekly"),
        Err(RegistryError::UnknownBranch(_))
    ));
}

#[tokio::test]
async fn structural_violations_fail_fast() {
    let backend = Arc::new(MockBackend::new());
    let mut engine = engine_with(backend);

    engine
        .add_branch("reporting", "Build reports", BASE_BRANCH, None)
        .unwrap();
    assert!(matches!(
        engine.add_branch("reporting", "again", BASE_BRANCH, None),
        Err(RegistryError::DuplicateBranch(_))
    ));
    assert!(matches!(
        engine.add_branch("base", "root again", BASE_BRANCH, None),
        Err(RegistryError::ReservedRoot(_))
    ));
    assert!(matches!(
        engine.add_branch("orphan", "x", "nowhere", None),
        Err(RegistryError::UnknownBranch(_))
    ));
    assert!(matches!(
        engine.remove_branch(BASE_BRANCH),
        Err(RegistryError::ReservedRoot(_))
    ));

    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();
    assert!(matches!(
        engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")),
        Err(RegistryError::DuplicateTool { .. })
    ));
    assert!(matches!(
        engine.add_tool("nowhere", StaticTool::single("other", "x")),
        Err(RegistryError::UnknownBranch(_))
    ));
}

#[tokio::test]
async fn step_limit_guards_runaway_loops() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("emit", false, false));
    backend.push(decide_tool("emit", false, false));

    let mut engine = engine_with(backend.clone()).with_max_steps(2);
    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();

    let (result, envelopes) = run_collect(&mut engine, "never ends").await;
    assert!(matches!(result, Err(EngineError::StepLimit { limit: 2 })));
    assert_eq!(backend.calls(), 2);

    let last = envelopes.last().unwrap();
    assert_eq!(last.kind, EnvelopeKind::Error);
    assert_eq!(last.metadata["code"], "step_limit");
}

#[tokio::test]
async fn decision_failure_is_terminal_for_the_step() {
    let backend = Arc::new(MockBackend::new());
    backend.push_failure("inference timed out");

    let mut engine = engine_with(backend);
    let (result, envelopes) = run_collect(&mut engine, "anything").await;

    assert!(matches!(result, Err(EngineError::Decision { .. })));
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].kind, EnvelopeKind::Error);
    assert_eq!(envelopes[0].metadata["code"], "decision_failed");
    assert_eq!(engine.context().failures.entries().len(), 1);
}

#[tokio::test]
async fn malformed_decision_is_a_decision_failure_not_a_routing_one() {
    let backend = Arc::new(MockBackend::new());
    backend.push(json!({"action": "teleport", "target": "anywhere"}));

    let mut engine = engine_with(backend);
    let (result, envelopes) = run_collect(&mut engine, "anything").await;

    assert!(matches!(result, Err(EngineError::Decision { .. })));
    assert_eq!(envelopes[0].metadata["code"], "decision_failed");
}

#[tokio::test]
async fn decision_prompt_carries_schema_and_options() {
    let backend = Arc::new(MockBackend::new());
    backend.push(decide_tool("emit", true, false));

    let mut engine = engine_with(backend.clone());
    engine.add_tool(BASE_BRANCH, StaticTool::single("emit", "x")).unwrap();

    let (result, _) = run_collect(&mut engine, "quick check").await;
    result.unwrap();

    let request = &backend.requests()[0];
    assert_eq!(
        request.output_schema["properties"]["action"]["enum"][1],
        "tool"
    );
    assert!(request.context.available_tools.to_string().contains("emit"));
    assert!(request.context.domain_context.contains("sales"));
    assert_eq!(request.context.user_request, "quick check");
}
