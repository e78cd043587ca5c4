// SPDX-License-Identifier: GPL-3.0-only

//! System coordination: multi-camera sessions, command dispatch, pause
//! rules, and supervisor retry after hardware loss.

mod common;

use std::sync::Arc;
use std::time::Duration;

use multicam::camera::virtual_driver::VirtualCameraDriver;
use multicam::system::commands::Command;
use multicam::system::supervisor::Supervisor;
use multicam::system::{CameraSystem, RunMode};
use tokio::sync::watch;

#[tokio::test]
async fn two_cameras_share_one_session_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path(), 30.0);
    config.min_cameras = 2;
    let driver = Arc::new(VirtualCameraDriver::new(2));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Headless, shutdown_rx);
    system.initialize().await.expect("initialize");
    assert_eq!(system.handlers().len(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    system.start_recording_all().await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    system.stop_recording_all().await;

    // One session directory holding one video + one CSV per camera.
    let sessions: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(sessions.len(), 1, "all cameras share one session directory");
    let session = sessions[0].path();
    assert_eq!(common::find_files(&session, ".h264").len(), 2);
    assert_eq!(common::find_files(&session, "_frame_timing.csv").len(), 2);

    let names: Vec<String> = common::find_files(&session, ".h264")
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names[0].starts_with("cam0_96x64_30.0fps_"), "got {names:?}");
    assert!(names[1].starts_with("cam1_96x64_30.0fps_"), "got {names:?}");

    system.cleanup().await;
}

#[tokio::test]
async fn commands_drive_recording_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path(), 30.0);
    let driver = Arc::new(VirtualCameraDriver::new(1));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Slave, shutdown_rx);
    system.initialize().await.expect("initialize");

    system.handle_command(Command::StartRecording).await;
    assert!(system.is_recording());
    // A second start is rejected without disturbing the active recording.
    system.handle_command(Command::StartRecording).await;
    assert!(system.is_recording());

    system.handle_command(Command::StopRecording).await;
    assert!(!system.is_recording());
    // Stop when idle reports an error but stays healthy.
    system.handle_command(Command::StopRecording).await;
    assert!(!system.is_recording());

    system.handle_command(Command::GetStatus).await;
    system
        .handle_command(Command::TogglePreview {
            camera_id: 0,
            enabled: false,
        })
        .await;
    // Out-of-range camera ids are reported, not fatal.
    system
        .handle_command(Command::TogglePreview {
            camera_id: 99,
            enabled: true,
        })
        .await;

    system.cleanup().await;
}

#[tokio::test]
async fn snapshots_land_in_the_session_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path(), 30.0);
    let driver = Arc::new(VirtualCameraDriver::new(1));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Slave, shutdown_rx);
    system.initialize().await.expect("initialize");

    // Wait for the processor to publish a display frame.
    tokio::time::sleep(Duration::from_millis(500)).await;
    system.handle_command(Command::TakeSnapshot).await;

    let snapshots = common::find_files(dir.path(), ".jpg");
    assert_eq!(snapshots.len(), 1);
    let name = snapshots[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("snapshot_cam0_"), "got {name}");
    // Valid JPEG payload.
    let bytes = std::fs::read(&snapshots[0]).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG magic");

    system.cleanup().await;
}

#[tokio::test]
async fn pause_is_refused_while_recording() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path(), 30.0);
    let driver = Arc::new(VirtualCameraDriver::new(1));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Headless, shutdown_rx);
    system.initialize().await.expect("initialize");

    let handler = Arc::clone(&system.handlers()[0]);
    system.start_recording_all().await;
    assert!(!handler.pause(), "pause must be refused while recording");

    system.stop_recording_all().await;
    assert!(handler.pause(), "pause allowed once idle");
    assert!(handler.resume());

    system.cleanup().await;
}

#[tokio::test]
async fn supervisor_retries_until_a_camera_appears() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path(), 30.0);
    config.discovery_timeout = 0.3;
    config.discovery_retry = 0.2;
    config.auto_start_recording = true;

    // No camera attached at startup.
    let driver = Arc::new(VirtualCameraDriver::new(1));
    driver.set_attached(0);

    let supervisor = Arc::new(Supervisor::new(
        config,
        Arc::clone(&driver) as Arc<dyn multicam::camera::driver::CameraDriver>,
        RunMode::Headless,
    ));
    let runner = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.run().await })
    };

    // Let a few discovery rounds fail, then plug the camera in.
    tokio::time::sleep(Duration::from_millis(900)).await;
    driver.set_attached(1);

    // Within a few retry intervals the system must come up and, with
    // auto-start enabled, begin recording into a session directory.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !common::find_files(dir.path(), ".h264").is_empty() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "supervisor never recovered after the camera appeared"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    supervisor.shutdown();
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("supervisor exits after shutdown")
        .expect("supervisor task");
}

/// Captures the status protocol stream for inspection.
#[derive(Clone, Default)]
struct CapturedStatus(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedStatus {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedStatus {
    fn statuses(&self) -> Vec<(String, String)> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .expect("status stream is UTF-8")
            .lines()
            .map(|line| {
                let value: serde_json::Value =
                    serde_json::from_str(line).expect("each status line is JSON");
                assert_eq!(value["type"], "status");
                (
                    value["status"].as_str().expect("status kind").to_string(),
                    value["timestamp"].as_str().expect("timestamp").to_string(),
                )
            })
            .collect()
    }
}

#[tokio::test]
async fn back_to_back_commands_respond_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path(), 30.0);
    let driver = Arc::new(VirtualCameraDriver::new(1));
    let captured = CapturedStatus::default();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Slave, shutdown_rx)
        .with_status_sink(multicam::system::status::StatusSink::to_writer(
            captured.clone(),
        ));
    system.initialize().await.expect("initialize");

    system.handle_command(Command::StartRecording).await;
    system.handle_command(Command::StopRecording).await;
    system.cleanup().await;

    let statuses = captured.statuses();
    let kinds: Vec<&str> = statuses.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "initializing",
            "initialized",
            "recording_started",
            "recording_stopped",
            "shutdown",
        ],
        "one response per command, in issuance order"
    );

    // ISO-8601 timestamps must be parseable and strictly increasing.
    let mut previous: Option<chrono::DateTime<chrono::FixedOffset>> = None;
    for (kind, timestamp) in &statuses {
        let parsed = chrono::DateTime::parse_from_rfc3339(timestamp)
            .unwrap_or_else(|e| panic!("bad timestamp on {kind}: {e}"));
        if let Some(prev) = previous {
            assert!(
                parsed > prev,
                "timestamps must strictly increase ({kind} at {timestamp})"
            );
        }
        previous = Some(parsed);
    }
}
