//! Watchdog against real processes

#![cfg(unix)]

use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tape_keeper::config::SupervisorConfig;
use tape_keeper::data::{last_records, DataLayout, SupervisorRecord};
use tape_keeper::supervisor::{
    pid_alive, write_identity, CommandSpec, OsProcessControl, ProcessControl, ProcessIdentity,
    Verdict, Watchdog,
};
use tempfile::TempDir;

fn silent_child() -> OsProcessControl {
    OsProcessControl::new(CommandSpec {
        program: PathBuf::from("sleep"),
        args: vec!["60".to_string()],
    })
}

#[tokio::test]
async fn test_silent_capture_is_killed_and_restarted() {
    let dir = TempDir::new().unwrap();
    let layout = DataLayout::new(dir.path(), "XAUUSD");
    let config = SupervisorConfig {
        startup_grace_secs: 2,
        terminate_grace_secs: 2,
        ..Default::default()
    };
    let mut watchdog = Watchdog::open(silent_child(), layout.clone(), &config).unwrap();

    let t0 = Utc::now();
    let i0 = Instant::now();
    watchdog.step(t0, i0).await.unwrap();
    let first = watchdog.pid().unwrap();
    assert!(pid_alive(first));

    // within the startup grace the missing heartbeat is tolerated
    let verdict = watchdog
        .step(t0 + ChronoDuration::seconds(1), i0 + Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::Starting);

    // grace over, never reported: stalled, killed within this probe
    let verdict = watchdog
        .step(t0 + ChronoDuration::seconds(3), i0 + Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::Stalled { age: None });
    assert!(!pid_alive(first));

    watchdog
        .step(t0 + ChronoDuration::seconds(10), i0 + Duration::from_secs(10))
        .await
        .unwrap();
    let second = watchdog.pid().unwrap();
    assert_ne!(first, second);

    let events: Vec<String> = last_records::<SupervisorRecord>(&layout.supervisor_log(), 10)
        .unwrap()
        .into_iter()
        .map(|r| r.event)
        .collect();
    assert_eq!(events, vec!["start", "stall", "start"]);

    let reasons: Vec<SupervisorRecord> = last_records(&layout.supervisor_log(), 10).unwrap();
    assert!(reasons[1].reason.contains("never reported"));
    assert_eq!(reasons[2].attempt, 2);

    // clean up the restarted child
    watchdog
        .control_mut()
        .terminate(second, Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unrelated_process_on_a_recycled_pid_survives() {
    let dir = TempDir::new().unwrap();
    let layout = DataLayout::new(dir.path(), "XAUUSD");
    layout.ensure_dirs().unwrap();

    let mut stranger = std::process::Command::new("sleep").arg("60").spawn().unwrap();
    // a capture that died long ago held the same pid number
    write_identity(
        &layout.pid_file(),
        &ProcessIdentity {
            pid: stranger.id(),
            started: Some("0:0".to_string()),
        },
    )
    .unwrap();

    let config = SupervisorConfig {
        startup_grace_secs: 2,
        terminate_grace_secs: 2,
        ..Default::default()
    };
    let mut watchdog = Watchdog::open(silent_child(), layout.clone(), &config).unwrap();
    assert_eq!(watchdog.pid(), None);

    let verdict = watchdog.step(Utc::now(), Instant::now()).await.unwrap();
    assert_eq!(verdict, Verdict::NotRunning);
    let spawned = watchdog.pid().unwrap();
    assert_ne!(spawned, stranger.id());
    assert!(pid_alive(stranger.id()));

    let events: Vec<String> = last_records::<SupervisorRecord>(&layout.supervisor_log(), 10)
        .unwrap()
        .into_iter()
        .map(|r| r.event)
        .collect();
    assert_eq!(events, vec!["stale_pid", "start"]);

    watchdog
        .control_mut()
        .terminate(spawned, Duration::from_secs(2))
        .await
        .unwrap();
    stranger.kill().unwrap();
    stranger.wait().unwrap();
}
