//! Scheduling behavior of graph runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use weft_orchestration::{
    step_fn, stream_fn, Chain, FnStep, Graph, GraphConfig, GraphError, NodeFailure, OrchestrationMetrics,
    StepContext, StepError,
};

type EventLog = Arc<Mutex<Vec<String>>>;

/// Step that logs its start and end around a short sleep
fn logged(name: &'static str, log: &EventLog, delay: Duration) -> FnStep {
    let log = log.clone();
    step_fn(name, move |_ctx, input| {
        let log = log.clone();
        async move {
            log.lock().push(format!("start {name}"));
            tokio::time::sleep(delay).await;
            log.lock().push(format!("end {name}"));
            Ok(json!(format!("{}>{name}", input.as_str().unwrap_or_default())))
        }
    })
}

fn failing(name: &'static str, delay: Duration) -> FnStep {
    step_fn(name, move |_ctx, _input| async move {
        tokio::time::sleep(delay).await;
        Err(StepError::failed(format!("{name} exploded")))
    })
}

fn position(log: &[String], event: &str) -> usize {
    log.iter()
        .position(|entry| entry == event)
        .unwrap_or_else(|| panic!("missing event {event:?} in {log:?}"))
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_dependencies_run_in_order_with_independent_branch() {
    let log = EventLog::default();
    let mut graph = Graph::new("ordering");
    graph.add_node("a", logged("a", &log, Duration::from_millis(10))).unwrap();
    graph.add_node("b", logged("b", &log, Duration::from_millis(10))).unwrap();
    graph.add_node("c", logged("c", &log, Duration::from_millis(10))).unwrap();
    graph.add_node("d", logged("d", &log, Duration::from_millis(25))).unwrap();
    graph.add_edge("a", "b").unwrap();
    graph.add_edge("b", "c").unwrap();

    let outcome = graph.run(&StepContext::new(), json!("in")).await.unwrap();

    let log = log.lock().clone();
    assert!(position(&log, "end a") < position(&log, "start b"));
    assert!(position(&log, "end b") < position(&log, "start c"));
    // d is independent and starts alongside a
    assert!(position(&log, "start d") < position(&log, "end a"));

    assert!(outcome.is_success());
    assert_eq!(outcome.outputs.get("c"), Some(&json!("in>a>b>c")));
    assert_eq!(outcome.outputs.get("d"), Some(&json!("in>d")));
}

#[tokio::test]
async fn test_linear_graph_returns_finish_output() {
    let log = EventLog::default();
    let mut graph = Graph::new("linear");
    graph.add_node("first", logged("first", &log, Duration::ZERO)).unwrap();
    graph.add_node("second", logged("second", &log, Duration::ZERO)).unwrap();
    graph.add_edge("first", "second").unwrap();
    graph.set_entry_points(["first"]).unwrap();
    graph.set_finish_points(["second"]).unwrap();

    let output = graph.invoke(&StepContext::new(), json!("x")).await.unwrap();
    assert_eq!(output, json!("x>first>second"));
}

#[tokio::test]
async fn test_multiple_finish_points_return_object() {
    let log = EventLog::default();
    let mut graph = Graph::new("branching");
    graph.add_node("root", logged("root", &log, Duration::ZERO)).unwrap();
    graph.add_node("left", logged("left", &log, Duration::ZERO)).unwrap();
    graph.add_node("right", logged("right", &log, Duration::ZERO)).unwrap();
    graph.add_edge("root", "left").unwrap();
    graph.add_edge("root", "right").unwrap();

    let output = graph.invoke(&StepContext::new(), json!("x")).await.unwrap();
    assert_eq!(output, json!({"left": "x>root>left", "right": "x>root>right"}));
}

#[tokio::test]
async fn test_join_node_receives_outputs_keyed_by_predecessor() {
    let mut graph = Graph::new("join");
    graph
        .add_node("price", step_fn("price", |_ctx, _input| async move { Ok(json!(40)) }))
        .unwrap();
    graph
        .add_node("tax", step_fn("tax", |_ctx, _input| async move { Ok(json!(2)) }))
        .unwrap();
    graph
        .add_node(
            "total",
            step_fn("total", |_ctx, input| async move {
                let price = input["price"].as_i64().unwrap_or_default();
                let tax = input["tax"].as_i64().unwrap_or_default();
                Ok(json!(price + tax))
            }),
        )
        .unwrap();
    graph.add_edge("price", "total").unwrap();
    graph.add_edge("tax", "total").unwrap();

    let output = graph.invoke(&StepContext::new(), Value::Null).await.unwrap();
    assert_eq!(output, json!(42));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failure_skips_only_dependents() {
    let log = EventLog::default();
    let mut graph = Graph::new("partial");
    graph.add_node("failing", failing("failing", Duration::ZERO)).unwrap();
    graph.add_node("after_failing", logged("after_failing", &log, Duration::ZERO)).unwrap();
    graph.add_node("independent", logged("independent", &log, Duration::from_millis(5))).unwrap();
    graph.add_node("after_independent", logged("after_independent", &log, Duration::ZERO)).unwrap();
    graph.add_edge("failing", "after_failing").unwrap();
    graph.add_edge("independent", "after_independent").unwrap();

    let outcome = graph.run(&StepContext::new(), json!("x")).await.unwrap();

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.failures,
        vec![NodeFailure {
            node: "failing".into(),
            error: StepError::failed("failing exploded"),
        }]
    );
    assert_eq!(outcome.skipped, vec!["after_failing".to_string()]);
    assert!(!log.lock().iter().any(|entry| entry.contains("after_failing")));

    let err = outcome.into_result().unwrap_err();
    assert!(err.to_string().contains("error in graph node failing"));
    match err {
        GraphError::NodesFailed { outputs, .. } => {
            assert_eq!(outputs.get("after_independent"), Some(&json!("x>independent>after_independent")));
            assert!(!outputs.contains_key("after_failing"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_reported_in_topological_order() {
    let mut graph = Graph::new("two_failures");
    // The earlier node fails later in wall-clock time
    graph.add_node("x", failing("x", Duration::from_millis(20))).unwrap();
    graph.add_node("y", failing("y", Duration::ZERO)).unwrap();

    let outcome = graph.run(&StepContext::new(), Value::Null).await.unwrap();

    let failed: Vec<_> = outcome.failures.iter().map(|failure| failure.node.as_str()).collect();
    assert_eq!(failed, vec!["x", "y"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut graph = Graph::new("fan_out").with_config(GraphConfig::default().with_max_concurrency(2));
    for i in 0..6 {
        let active = active.clone();
        let peak = peak.clone();
        let step = step_fn(format!("worker-{i}"), move |_ctx, _input| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(i))
            }
        });
        graph.add_node(format!("worker-{i}"), step).unwrap();
    }

    let outcome = graph.run(&StepContext::new(), Value::Null).await.unwrap();

    assert_eq!(outcome.outputs.len(), 6);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_graph_timeout() {
    let mut graph =
        Graph::new("slow").with_config(GraphConfig::default().with_timeout(Duration::from_millis(50)));
    graph
        .add_node(
            "sleeper",
            step_fn("sleeper", |_ctx, _input| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            }),
        )
        .unwrap();

    let err = graph.invoke(&StepContext::new(), Value::Null).await.unwrap_err();
    assert_eq!(err, GraphError::Timeout(Duration::from_millis(50)));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_the_run() {
    let token = CancellationToken::new();
    let mut graph = Graph::new("cancelable");
    graph
        .add_node(
            "waiter",
            step_fn("waiter", |ctx, _input| async move {
                ctx.cancelled().await;
                Err(StepError::Canceled)
            }),
        )
        .unwrap();

    let canceler = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceler.cancel();
    });

    let ctx = StepContext::new().with_cancellation(token);
    let err = graph.run(&ctx, Value::Null).await.unwrap_err();
    assert_eq!(err, GraphError::Canceled);
}

#[tokio::test]
async fn test_run_rejects_invalid_graph() {
    let graph = Graph::new("empty");
    assert_eq!(
        graph.run(&StepContext::new(), Value::Null).await.unwrap_err(),
        GraphError::Empty
    );
}

#[tokio::test]
async fn test_chain_as_graph_node() {
    let chain = Chain::builder("normalize")
        .step(step_fn("trim", |_ctx, input| async move {
            Ok(json!(input.as_str().unwrap_or_default().trim()))
        }))
        .step(step_fn("lower", |_ctx, input| async move {
            Ok(json!(input.as_str().unwrap_or_default().to_lowercase()))
        }))
        .build()
        .unwrap();

    let mut graph = Graph::new("nested");
    graph.add_node("normalize", chain).unwrap();
    graph
        .add_node(
            "wrap",
            step_fn("wrap", |_ctx, input| async move {
                Ok(json!({ "value": input }))
            }),
        )
        .unwrap();
    graph.add_edge("normalize", "wrap").unwrap();

    let output = graph.invoke(&StepContext::new(), json!("  HeLLo ")).await.unwrap();
    assert_eq!(output, json!({"value": "hello"}));
}

#[tokio::test]
async fn test_graph_batch() {
    use weft_orchestration::StepExt;

    let mut graph = Graph::new("batch");
    graph
        .add_node(
            "double",
            step_fn("double", |_ctx, input| async move {
                input
                    .as_i64()
                    .map(|n| json!(n * 2))
                    .ok_or_else(|| StepError::failed("not a number"))
            }),
        )
        .unwrap();

    let results = graph.batch(&StepContext::new(), vec![json!(1), json!("two")]).await;

    assert_eq!(results[0], Ok(json!(2)));
    let err = results[1].clone().unwrap_err();
    assert!(err.to_string().contains("error processing batch item 1"));
    assert!(err.to_string().contains("error in graph node double"));
}

#[tokio::test]
async fn test_stream_emits_finish_node_chunks_after_upstream() {
    let mut graph = Graph::new("stream-graph");
    graph
        .add_node(
            "prefix",
            step_fn("prefix", |_ctx, input| async move {
                Ok(json!(format!("chunk:{}", input.as_str().unwrap_or_default())))
            }),
        )
        .unwrap();
    graph
        .add_node(
            "split",
            stream_fn("split", |_ctx, input| {
                let text = input.as_str().unwrap_or_default().to_string();
                futures::stream::iter(text.split(':').map(|part| Ok(json!(part))).collect::<Vec<_>>())
            }),
        )
        .unwrap();
    graph.add_edge("prefix", "split").unwrap();

    let chunks: Vec<_> = graph
        .stream(&StepContext::new(), json!("body"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks, vec![Ok(json!("chunk")), Ok(json!("body"))]);
}

#[tokio::test]
async fn test_stream_with_several_finish_points_yields_combined_output() {
    let log = EventLog::default();
    let mut graph = Graph::new("fan");
    graph.add_node("left", logged("left", &log, Duration::ZERO)).unwrap();
    graph.add_node("right", logged("right", &log, Duration::ZERO)).unwrap();

    let chunks: Vec<_> = graph
        .stream(&StepContext::new(), json!("x"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks, vec![Ok(json!({"left": "x>left", "right": "x>right"}))]);
}

#[tokio::test]
async fn test_stream_without_nodes_has_no_exit() {
    let graph = Graph::new("no-exit-graph");
    let err = graph.stream(&StepContext::new(), Value::Null).await.err().unwrap();
    assert_eq!(err, GraphError::NoExitNodes);
    assert!(err.to_string().contains("no exit nodes defined"));
}

#[tokio::test]
async fn test_stream_does_not_run_finish_node_after_upstream_failure() {
    let log = EventLog::default();
    let mut graph = Graph::new("broken-stream");
    graph.add_node("failing", failing("failing", Duration::ZERO)).unwrap();
    graph.add_node("finish", logged("finish", &log, Duration::ZERO)).unwrap();
    graph.add_edge("failing", "finish").unwrap();

    let err = graph.stream(&StepContext::new(), Value::Null).await.err().unwrap();

    assert!(err.to_string().contains("error in graph node failing"));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_graph_metrics_count_node_failures_as_errors() {
    let metrics = OrchestrationMetrics::new();
    let log = EventLog::default();
    let mut graph = Graph::new("measured").with_metrics(metrics.clone());
    graph.add_node("ok", logged("ok", &log, Duration::ZERO)).unwrap();
    graph.run(&StepContext::new(), json!("x")).await.unwrap();

    graph.add_node("failing", failing("failing", Duration::ZERO)).unwrap();
    let outcome = graph.run(&StepContext::new(), json!("x")).await.unwrap();
    assert!(!outcome.is_success());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.graphs.executions, 2);
    assert_eq!(snapshot.graphs.errors, 1);
    assert_eq!(snapshot.graph_nodes, 3);
    assert_eq!(snapshot.total_executions(), 2);
}
