//! End-to-end scenarios against in-process emulated nodes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use maestro_node::emulated::{self, GripperArm};
use maestro_node::{NodeRuntime, NodeServer};
use maestro_orchestrator::{
    Expansion, Orchestrator, OrchestratorError, Timeouts, planner,
};
use maestro_types::{ArgValue, Plan, Step};

fn timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_secs(2),
        step: Duration::from_secs(2),
    }
}

async fn spawn_base() -> String {
    let runtime = emulated::drive_base_runtime("base", "base-1").unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(NodeServer::new(runtime).serve(listener));
    addr
}

async fn spawn_arm() -> (String, Arc<Mutex<NodeRuntime<GripperArm>>>) {
    let runtime = emulated::gripper_arm_runtime("arm", "arm-1").unwrap();
    let server = NodeServer::new(runtime);
    let handle = server.runtime();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(listener));
    (addr, handle)
}

/// "forward then close gripper" planned and executed against two live
/// emulated nodes.
#[tokio::test]
async fn forward_then_close_gripper_end_to_end() {
    let base_addr = spawn_base().await;
    let (arm_addr, arm_handle) = spawn_arm().await;

    let orchestrator = Orchestrator::new(
        vec![
            format!("base={base_addr}").parse().unwrap(),
            format!("arm={arm_addr}").parse().unwrap(),
        ],
        timeouts(),
    );
    assert!(orchestrator.connect_all().await.is_empty());

    let plan = orchestrator
        .make_plan("forward then close gripper", "test-1")
        .await
        .unwrap();
    assert_eq!(
        plan.steps,
        vec![
            Step::run("base", "FWD", vec![ArgValue::Float(0.6)], Some(1200)),
            Step::run("arm", "GRIP", vec![ArgValue::Str("close".into())], None),
            Step::Stop,
        ]
    );

    let reports = orchestrator.execute_plan(&plan, "test-1").await.unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().take(2).all(|r| r.status == "OK"));
    assert_eq!(arm_handle.lock().await.device().grip, "close");
}

/// A scripted "base" that serves the real drive-base manifest, accepts three
/// RUNs after the handshake, and then drops the socket.
async fn spawn_flaky_base(accepted_runs: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let manifest_json =
        serde_json::to_string(&emulated::drive_base_manifest("base", "base-1")).unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut runs = 0;
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = if line.starts_with("READ_MANIFEST") {
                format!("MANIFEST {manifest_json}")
            } else if line.starts_with("RUN") {
                runs += 1;
                if runs > accepted_runs {
                    return; // drop the connection mid-plan
                }
                "OK".to_string()
            } else {
                "OK".to_string()
            };
            if write_half
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .is_err()
            {
                return;
            }
        }
    });
    addr
}

/// Mid-plan socket close: steps 0..=2 succeed, step 3 fails, and the
/// still-connected arm receives a STOP.
#[tokio::test]
async fn mid_plan_disconnect_panic_stops_survivors() {
    let base_addr = spawn_flaky_base(3).await;
    let (arm_addr, arm_handle) = spawn_arm().await;

    let orchestrator = Orchestrator::new(
        vec![
            format!("base={base_addr}").parse().unwrap(),
            format!("arm={arm_addr}").parse().unwrap(),
        ],
        timeouts(),
    );
    assert!(orchestrator.connect_all().await.is_empty());

    let fwd = |ms| Step::run("base", "FWD", vec![ArgValue::Float(0.5)], Some(ms));
    let plan = Plan::new(vec![fwd(60), fwd(60), fwd(60), fwd(60), Step::Stop]);

    let err = orchestrator.execute_plan(&plan, "test-2").await.unwrap_err();
    match err {
        OrchestratorError::Execution(exec) => {
            let text = exec.to_string();
            assert!(text.contains("step[3]"), "{text}");
            assert!(text.contains("panic STOP sent"), "{text}");
        }
        other => panic!("expected execution failure, got {other}"),
    }

    // The arm survived and was neutralised by the panic stop.
    assert_eq!(arm_handle.lock().await.device().last_token, "STOP");
}

/// A second plan submitted while one is executing is rejected as busy.
#[tokio::test]
async fn concurrent_plans_are_rejected() {
    let base_addr = spawn_base().await;
    let orchestrator = Arc::new(Orchestrator::new(
        vec![format!("base={base_addr}").parse().unwrap()],
        timeouts(),
    ));
    assert!(orchestrator.connect_all().await.is_empty());

    let slow = Plan::new(vec![
        Step::run("base", "FWD", vec![ArgValue::Float(0.3)], Some(400)),
        Step::Stop,
    ]);
    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let slow = slow.clone();
        tokio::spawn(async move { orchestrator.execute_plan(&slow, "busy-1").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = orchestrator.execute_plan(&slow, "busy-2").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Busy));

    first.await.unwrap().unwrap();
}

/// Emergency stop preempts a plan parked in a duration hold.
#[tokio::test]
async fn emergency_stop_preempts_duration_hold() {
    let base_addr = spawn_base().await;
    let orchestrator = Arc::new(Orchestrator::new(
        vec![format!("base={base_addr}").parse().unwrap()],
        timeouts(),
    ));
    assert!(orchestrator.connect_all().await.is_empty());

    let long_hold = Plan::new(vec![
        Step::run("base", "FWD", vec![ArgValue::Float(0.3)], Some(5_000)),
        Step::Stop,
    ]);
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute_plan(&long_hold, "preempt-1").await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = std::time::Instant::now();
    orchestrator.emergency_stop().await;
    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, OrchestratorError::Execution(_)), "{err}");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop must not wait out the hold"
    );
}

/// Unknown tokens are rejected by validation before any network I/O.
#[tokio::test]
async fn unknown_token_never_reaches_the_wire() {
    let (arm_addr, arm_handle) = spawn_arm().await;
    let orchestrator = Orchestrator::new(
        vec![format!("arm={arm_addr}").parse().unwrap()],
        timeouts(),
    );
    assert!(orchestrator.connect_all().await.is_empty());

    let plan = Plan::new(vec![
        Step::Run {
            target: None,
            token: "THROTTLE".to_string(),
            args: vec![ArgValue::Float(0.6)],
            duration_ms: Some(900),
        },
        Step::Stop,
    ]);
    let err = orchestrator.execute_plan(&plan, "test-3").await.unwrap_err();
    match err {
        OrchestratorError::Validation(v) => {
            assert_eq!(v.reason, "Token 'THROTTLE' not found");
        }
        other => panic!("expected validation failure, got {other}"),
    }
    // Nothing was dispatched to the arm.
    assert_eq!(arm_handle.lock().await.device().last_token, "NONE");
}

/// The square macro survives the full pipeline against a live base.
#[tokio::test]
async fn square_macro_expands_and_validates() {
    let base_addr = spawn_base().await;
    let orchestrator = Orchestrator::new(
        vec![format!("base={base_addr}").parse().unwrap()],
        timeouts(),
    );
    assert!(orchestrator.connect_all().await.is_empty());

    let plan = match planner::expand("square") {
        Expansion::Plan(plan) => plan,
        Expansion::Unrecognized => panic!("square must be recognised"),
    };
    assert_eq!(plan.len(), 9);
    orchestrator.validate(&plan).unwrap();
}
