//! End-to-end launcher service tests: HTTP surface plus a mocked controller.

mod common;

use common::ScriptedSyncer;
use httpmock::prelude::*;
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use workload_launcher::event::channel::pub_sub;
use workload_launcher::event::ApplicationEvent;
use workload_launcher::launcher::config::{ControllerConfig, LauncherConfig};
use workload_launcher::launcher::http_server::config::ServerConfig;
use workload_launcher::launcher::manifest::Manifest;
use workload_launcher::launcher::run::Application;
use workload_launcher::supervisor::backoff::BackoffPolicy;
use workload_launcher::supervisor::SupervisorOptions;

const MANIFEST: &str = r#"
templates:
  - name: consumer
    version: "1.0.0"
    isolation_level: namespace
    address: "127.0.0.1:7400"
"#;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn http() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap()
}

fn config(port: u16, controller: Option<ControllerConfig>) -> LauncherConfig {
    LauncherConfig {
        launcher_id: "launcher-e2e".to_string(),
        controller,
        server: ServerConfig {
            port,
            workers: 1,
            ..Default::default()
        },
        supervisor: SupervisorOptions {
            resync_interval: Duration::from_millis(100),
            ..Default::default()
        },
        launch_timeout: Duration::from_secs(3),
        ..Default::default()
    }
}

fn wait_for_server(port: u16) {
    let client = http();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if client
            .get(format!("http://127.0.0.1:{port}/status"))
            .send()
            .is_ok()
        {
            return;
        }
        assert!(Instant::now() < deadline, "server did not come up");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
#[serial]
fn launch_list_health_and_terminate_over_http() {
    let port = free_port();
    let application = Application::with_manifest(
        config(port, None),
        Manifest::parse(MANIFEST).unwrap(),
        Arc::new(ScriptedSyncer::new()),
    );
    let (stop_tx, stop_rx) = pub_sub();
    let runtime = std::thread::spawn(move || application.run_with_stop(stop_rx));
    wait_for_server(port);

    let client = http();
    let base = format!("http://127.0.0.1:{port}");

    // Launch: isolation level and address come from the manifest template.
    let launched: serde_json::Value = client
        .post(format!("{base}/v1/processes"))
        .json(&json!({"pattern": "consumer", "namespace": "tenant-a"}))
        .send()
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(launched["process_id"], "ns:tenant-a:consumer");
    assert_eq!(launched["address"], "127.0.0.1:7400");
    assert_eq!(launched["healthy"], true);

    // Listing shows it; the state filter works.
    let processes: serde_json::Value = client
        .get(format!("{base}/v1/processes?state=syncing"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(processes.as_array().unwrap().len(), 1);

    // Aggregate health with the isolation distribution.
    let health: serde_json::Value = client
        .get(format!("{base}/v1/health?include_processes=true"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["total_processes"], 1);
    assert_eq!(health["running_processes"], 1);
    assert_eq!(health["isolation_distribution"]["namespace"], 1);
    assert_eq!(health["processes"].as_array().unwrap().len(), 1);

    // Terminating an unknown process is NotFound.
    let missing = client
        .delete(format!("{base}/v1/processes/ns:tenant-a:ghost"))
        .send()
        .unwrap();
    assert_eq!(missing.status(), 404);

    // Terminating the real one works and the record winds down.
    let gone = client
        .delete(format!("{base}/v1/processes/ns:tenant-a:consumer?grace_seconds=1"))
        .send()
        .unwrap();
    assert_eq!(gone.status(), 200);

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let health: serde_json::Value = client
            .get(format!("{base}/v1/health"))
            .send()
            .unwrap()
            .json()
            .unwrap();
        if health["running_processes"] == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "termination not observed");
        std::thread::sleep(Duration::from_millis(50));
    }

    stop_tx.publish(ApplicationEvent::StopRequested).unwrap();
    runtime.join().unwrap().unwrap();
}

#[test]
#[serial]
fn controller_assignments_flow_into_the_supervisor_and_heartbeats_report_them() {
    let controller = MockServer::start();
    controller.mock(|when, then| {
        when.method(POST).path("/v1/launchers");
        then.status(200).json_body(json!({}));
    });
    controller.mock(|when, then| {
        when.method(GET).path("/v1/launchers/launcher-e2e/assignments");
        then.status(200).json_body(json!({
            "assignments": [{
                "process_id": "assigned:keyvalue",
                "type": "backend",
                "address": "10.0.0.5:7100",
                "config": {"engine": "memstore"},
            }],
            "revocations": [],
            "cursor": 1,
        }));
    });
    let heartbeat_mock = controller.mock(|when, then| {
        when.method(POST).path("/v1/launchers/launcher-e2e/heartbeat");
        then.status(200).json_body(json!({}));
    });

    let port = free_port();
    let controller_config = ControllerConfig {
        endpoint: Url::parse(&controller.base_url()).unwrap(),
        poll_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(100),
        request_timeout: Duration::from_secs(2),
        registration_backoff: BackoffPolicy::new(
            Duration::from_millis(20),
            Duration::from_millis(100),
            0.0,
        ),
    };
    let application = Application::with_manifest(
        config(port, Some(controller_config)),
        Manifest::default(),
        Arc::new(ScriptedSyncer::new()),
    );
    let (stop_tx, stop_rx) = pub_sub();
    let runtime = std::thread::spawn(move || application.run_with_stop(stop_rx));
    wait_for_server(port);

    let client = http();
    let base = format!("http://127.0.0.1:{port}");

    // The assignment lands in the supervisor.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let health: serde_json::Value = client
            .get(format!("{base}/v1/health?include_processes=true"))
            .send()
            .unwrap()
            .json()
            .unwrap();
        if health["running_processes"] == 1 {
            let process = &health["processes"][0];
            assert_eq!(process["id"], "assigned:keyvalue");
            assert_eq!(process["category"], "backend");
            break;
        }
        assert!(Instant::now() < deadline, "assignment not applied");
        std::thread::sleep(Duration::from_millis(50));
    }

    // The status endpoint shows the controller as registered and reachable.
    let status: serde_json::Value = client
        .get(format!("{base}/status"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(status["controller"]["enabled"], true);
    assert_eq!(status["controller"]["registered"], true);
    assert_eq!(status["controller"]["reachable"], true);

    // Heartbeats keep flowing.
    let deadline = Instant::now() + Duration::from_secs(5);
    while heartbeat_mock.hits() < 2 {
        assert!(Instant::now() < deadline, "heartbeats not observed");
        std::thread::sleep(Duration::from_millis(50));
    }

    stop_tx.publish(ApplicationEvent::StopRequested).unwrap();
    runtime.join().unwrap().unwrap();
}
