//! End-to-end revert against recorded agents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gpupgrade_core::idl::{RevertRequest, Status, StepStatus};
use gpupgrade_core::{ClusterConfig, ContentId, Segment, SegmentRole};
use gpupgrade_hub::config::{HubConfig, TargetInstall};
use gpupgrade_hub::mock::{AgentCall, MockAgentDialer, MockConnector, RecordingExecutor, RecordingStream};
use gpupgrade_hub::revert::{DELETE_SEGMENT_DIRS, REVERT_STEP, STOP_AGENTS};
use gpupgrade_hub::{FixedOffsetPolicy, Hub, HubError, Outcome, StepStore};
use gpupgrade_telemetry::LogSink;
use semver::Version;

fn primary(host: &str, content: i32) -> Segment {
    Segment {
        hostname: host.into(),
        port: (25432 + content) as u16,
        data_dir: PathBuf::from(format!("/data/primary/gpseg{content}")),
        db_id: content + 2,
        content: ContentId::from(content),
        role: SegmentRole::Primary,
    }
}

fn three_host_hub(state_dir: &Path, dialer: Arc<MockAgentDialer>) -> Hub {
    let mut master = primary("mdw", -1);
    master.port = 15432;
    master.data_dir = PathBuf::from("/data/master/gpseg-1");

    let config = HubConfig {
        state_dir: state_dir.to_path_buf(),
        source: ClusterConfig {
            name: "source".into(),
            segments: vec![master, primary("sdw1", 0), primary("sdw2", 1), primary("sdw3", 2)],
        },
        target: TargetInstall {
            bin_dir: PathBuf::from("/usr/local/gpdb6/bin"),
            version: Version::new(6, 20, 3),
        },
        ports: FixedOffsetPolicy::default(),
    };
    Hub::new(
        config,
        dialer,
        Arc::new(RecordingExecutor::succeeding()),
        Arc::new(MockConnector::new()),
        LogSink::discard(),
    )
    .unwrap()
}

#[tokio::test]
async fn failing_host_is_reported_and_siblings_complete() {
    let state = tempfile::tempdir().unwrap();
    let dialer = Arc::new(MockAgentDialer::new().failing("sdw2"));
    let stream = Arc::new(RecordingStream::new());
    let hub = three_host_hub(state.path(), dialer.clone());

    let err = hub
        .revert(RevertRequest::default(), stream.clone())
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("host sdw2"), "{message}");
    assert!(!message.contains("host sdw1"));
    match &err {
        HubError::Aggregate(errs) => assert_eq!(errs.hosts(), vec!["sdw2"]),
        other => panic!("expected aggregate error, got {other}"),
    }

    assert_eq!(
        dialer.calls_to("sdw1"),
        vec![AgentCall::Delete {
            host: "sdw1".into(),
            datadirs: vec![PathBuf::from("/data/primary_upgrade/gpseg0")],
        }]
    );
    assert_eq!(
        dialer.calls_to("sdw3"),
        vec![AgentCall::Delete {
            host: "sdw3".into(),
            datadirs: vec![PathBuf::from("/data/primary_upgrade/gpseg2")],
        }]
    );

    let statuses = stream.statuses();
    assert!(statuses.contains(&StepStatus {
        step: DELETE_SEGMENT_DIRS.into(),
        status: Status::Failed,
    }));
    assert!(statuses.contains(&StepStatus {
        step: STOP_AGENTS.into(),
        status: Status::Skipped,
    }));

    let store = StepStore::new(state.path());
    let outcome = store.outcome(REVERT_STEP).unwrap().unwrap();
    assert_eq!(outcome.outcome, Outcome::Failed);
    assert!(outcome.error.unwrap().contains("host sdw2"));
    assert_eq!(store.running().unwrap(), None);
}

#[tokio::test]
async fn unreachable_host_does_not_stop_the_others() {
    let state = tempfile::tempdir().unwrap();
    let dialer = Arc::new(MockAgentDialer::new().unreachable("sdw1"));
    let hub = three_host_hub(state.path(), dialer.clone());

    let err = hub
        .revert(RevertRequest::default(), Arc::new(RecordingStream::new()))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("agent on sdw1 is unreachable"));
    assert_eq!(dialer.calls_to("sdw2").len(), 1);
    assert_eq!(dialer.calls_to("sdw3").len(), 1);
}

#[tokio::test]
async fn revert_can_run_again_after_finishing() {
    let state = tempfile::tempdir().unwrap();
    let dialer = Arc::new(MockAgentDialer::new());
    let hub = three_host_hub(state.path(), dialer.clone());

    for _ in 0..2 {
        hub.revert(RevertRequest::default(), Arc::new(RecordingStream::new()))
            .await
            .unwrap();
    }

    assert_eq!(dialer.calls().len(), 6);
    assert_eq!(dialer.dials().len(), 3);
}
