//! Recording session lifecycle against the in-memory writer backend

mod common;

use common::{destination, recorder, sensors, T0};
use duocam::testing::{
    read_manifest, synthetic_audio, synthetic_tuple, MemoryWriterFactory, FRAME_INTERVAL_US,
};
use duocam::{OutputRole, RecorderEvent, RecordingError, RecordingState, StopOutcome, StopReason};
use tempfile::tempdir;

#[tokio::test]
async fn three_admitted_tuples_reach_every_output() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new().with_manifests();
    let recorder = recorder(&factory);

    let paths = recorder.start_recording(destination(dir.path())).await.unwrap();
    assert_eq!(recorder.state(), RecordingState::Recording);

    for i in 0..3 {
        let tuple = synthetic_tuple(&sensors(), T0 + i * FRAME_INTERVAL_US);
        recorder.process_synchronized_frames(tuple).unwrap();
    }

    let summary = recorder.stop_recording().await.unwrap();
    assert_eq!(summary.statistics.frame_count, 3);
    assert_eq!(summary.statistics.dropped_frame_count, 0);
    assert_eq!(summary.reason, StopReason::UserRequested);
    assert_eq!(summary.origin_us, Some(T0));
    assert!(summary.completed());
    assert_eq!(recorder.state(), RecordingState::Stopped(StopOutcome::Completed));

    let expected = vec![0, FRAME_INTERVAL_US, 2 * FRAME_INTERVAL_US];
    for role in OutputRole::ALL {
        let path = paths.get(role);
        assert!(path.exists(), "{role} output should exist");
        let manifest = read_manifest(path).unwrap();
        assert!(manifest.finished);
        assert_eq!(manifest.session_starts, vec![T0], "{role} origin");
        assert_eq!(manifest.video_timestamps_us, expected, "{role} timestamps");
        assert_eq!(summary.muxer(role).unwrap().summary.as_ref().unwrap().video_frames, 3);
    }

    let composed = factory.output(OutputRole::Composed).unwrap();
    assert!(composed.video_dimensions.iter().all(|d| (d.width, d.height) == (64, 36)));
    let back = factory.output(OutputRole::Back).unwrap();
    assert!(back.video_dimensions.iter().all(|d| *d == sensors().back));
}

#[tokio::test]
async fn stop_while_idle_is_misuse() {
    let factory = MemoryWriterFactory::new();
    let recorder = recorder(&factory);
    assert!(matches!(recorder.stop_recording().await, Err(RecordingError::NotRecording)));
    assert_eq!(recorder.state(), RecordingState::Idle);
}

#[tokio::test]
async fn second_start_leaves_recording_untouched() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    let recorder = recorder(&factory);

    recorder.start_recording(destination(dir.path())).await.unwrap();
    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();

    let again = recorder.start_recording(destination(dir.path())).await;
    assert!(matches!(again, Err(RecordingError::AlreadyRecording)));
    assert_eq!(recorder.state(), RecordingState::Recording);
    assert_eq!(factory.created(), 3, "no extra writers were configured");

    recorder
        .process_synchronized_frames(synthetic_tuple(&sensors(), T0 + FRAME_INTERVAL_US))
        .unwrap();
    let summary = recorder.stop_recording().await.unwrap();
    assert_eq!(summary.statistics.frame_count, 2);
}

#[tokio::test]
async fn rejected_configuration_fails_start_atomically() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    factory.reject_configuration(OutputRole::Front);
    let recorder = recorder(&factory);

    let result = recorder.start_recording(destination(dir.path())).await;
    assert!(matches!(
        result,
        Err(RecordingError::Configuration {
            role: Some(OutputRole::Front),
            ..
        })
    ));
    assert_eq!(recorder.state(), RecordingState::Stopped(StopOutcome::Failed));
    assert!(factory.output(OutputRole::Composed).unwrap().cancelled);
    assert!(factory.output(OutputRole::Back).unwrap().cancelled);
    assert!(matches!(recorder.stop_recording().await, Err(RecordingError::NotRecording)));
}

#[tokio::test]
async fn not_ready_output_drops_whole_tuples() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    factory.set_ready(OutputRole::Back, false);
    let recorder = recorder(&factory);
    recorder.start_recording(destination(dir.path())).await.unwrap();

    for i in 0..5 {
        recorder
            .process_synchronized_frames(synthetic_tuple(&sensors(), T0 + i * FRAME_INTERVAL_US))
            .unwrap();
    }
    let stats = recorder.statistics().await.unwrap().unwrap();
    assert_eq!(stats.frame_count, 0);
    assert_eq!(stats.dropped_frame_count, 5);
    for role in OutputRole::ALL {
        assert_eq!(factory.output(role).unwrap().video_frames(), 0, "{role} got a partial tuple");
    }

    // The origin is the first *admitted* tuple, not the first offered one
    factory.set_ready(OutputRole::Back, true);
    let first_admitted = T0 + 5 * FRAME_INTERVAL_US;
    recorder
        .process_synchronized_frames(synthetic_tuple(&sensors(), first_admitted))
        .unwrap();
    let next = first_admitted + FRAME_INTERVAL_US;
    recorder
        .process_synchronized_frames(synthetic_tuple(&sensors(), next))
        .unwrap();

    let summary = recorder.stop_recording().await.unwrap();
    assert_eq!(summary.statistics.frame_count, 2);
    assert_eq!(summary.statistics.dropped_frame_count, 5);
    assert_eq!(summary.origin_us, Some(first_admitted));
    for role in OutputRole::ALL {
        let output = factory.output(role).unwrap();
        assert_eq!(output.session_starts, vec![first_admitted]);
        assert_eq!(output.video_timestamps_us, vec![0, FRAME_INTERVAL_US]);
    }
}

#[tokio::test]
async fn out_of_order_and_mismatched_tuples_are_dropped() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    let recorder = recorder(&factory);
    recorder.start_recording(destination(dir.path())).await.unwrap();

    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    // Repeat and regress
    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0 - 1)).unwrap();
    // Wrong sensor geometry
    let mut wrong = synthetic_tuple(&sensors(), T0 + FRAME_INTERVAL_US);
    wrong.back = duocam::testing::solid_frame(10, 10, [0, 0, 0, 255]);
    recorder.process_synchronized_frames(wrong).unwrap();

    let summary = recorder.stop_recording().await.unwrap();
    assert_eq!(summary.statistics.frame_count, 1);
    assert_eq!(summary.statistics.dropped_frame_count, 3);
    assert_eq!(summary.statistics.tuples_offered, 4);
}

#[tokio::test]
async fn audio_fans_out_after_origin() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    let recorder = recorder(&factory);
    recorder.start_recording(destination(dir.path())).await.unwrap();

    // Before the origin: ignored
    recorder.process_audio(synthetic_audio(T0 - 20_000, 960, 48_000, 2)).unwrap();
    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    recorder.process_audio(synthetic_audio(T0, 960, 48_000, 2)).unwrap();
    recorder.process_audio(synthetic_audio(T0 + 20_000, 960, 48_000, 2)).unwrap();

    let summary = recorder.stop_recording().await.unwrap();
    assert_eq!(summary.statistics.audio_sample_count, 2);
    assert_eq!(summary.statistics.audio_partial_writes, 0);
    for role in OutputRole::ALL {
        let audio = factory.output(role).unwrap().audio_timestamps_us;
        assert_eq!(audio, vec![0, 20_000], "{role} audio");
    }
}

#[tokio::test]
async fn rejected_audio_on_one_output_keeps_video_flowing() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    factory.fail_audio(OutputRole::Back);
    let recorder = recorder(&factory);
    recorder.start_recording(destination(dir.path())).await.unwrap();

    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    recorder.process_audio(synthetic_audio(T0, 960, 48_000, 2)).unwrap();

    // The back writer rejects the same sample on its own thread
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while factory.output(OutputRole::Composed).unwrap().audio_timestamps_us.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first audio sample written");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    for i in 1..=5 {
        let t = T0 + i * FRAME_INTERVAL_US;
        recorder.process_synchronized_frames(synthetic_tuple(&sensors(), t)).unwrap();
        recorder.process_audio(synthetic_audio(t, 960, 48_000, 2)).unwrap();
    }

    let summary = recorder.stop_recording().await.expect("audio rejection is not fatal");
    assert_eq!(summary.statistics.frame_count, 6);
    assert_eq!(summary.statistics.dropped_frame_count, 0);
    assert_eq!(summary.statistics.audio_sample_count, 6);
    assert_eq!(summary.statistics.audio_partial_writes, 5);
    assert_eq!(summary.statistics.audio_unrouted, 0);

    for role in OutputRole::ALL {
        assert_eq!(factory.output(role).unwrap().video_frames(), 6, "{role} video");
    }
    assert!(factory.output(OutputRole::Back).unwrap().audio_timestamps_us.is_empty());
    assert_eq!(factory.output(OutputRole::Front).unwrap().audio_timestamps_us.len(), 6);
}

#[tokio::test]
async fn frames_after_stop_are_not_counted() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    let recorder = recorder(&factory);
    recorder.start_recording(destination(dir.path())).await.unwrap();
    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    let summary = recorder.stop_recording().await.unwrap();

    recorder
        .process_synchronized_frames(synthetic_tuple(&sensors(), T0 + FRAME_INTERVAL_US))
        .unwrap();
    assert!(recorder.statistics().await.unwrap().is_none());
    assert_eq!(summary.statistics.tuples_offered, 1);
    assert_eq!(factory.output(OutputRole::Composed).unwrap().video_frames(), 1);
}

#[tokio::test]
async fn finalize_failure_is_reported_after_all_outputs_finish() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    factory.fail_finish(OutputRole::Back);
    let recorder = recorder(&factory);
    let mut events = recorder.subscribe();

    recorder.start_recording(destination(dir.path())).await.unwrap();
    recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    let result = recorder.stop_recording().await;

    assert!(matches!(
        result,
        Err(RecordingError::WriteFailure {
            role: OutputRole::Back,
            ..
        })
    ));
    assert_eq!(recorder.state(), RecordingState::Stopped(StopOutcome::Failed));
    assert!(factory.output(OutputRole::Composed).unwrap().finished);
    assert!(factory.output(OutputRole::Front).unwrap().finished);

    let finished = loop {
        match events.recv().await.unwrap() {
            RecorderEvent::Finished { reason, result } => break (reason, result),
            _ => continue,
        }
    };
    assert_eq!(finished.0, StopReason::UserRequested);
    assert!(finished.1.unwrap_err().contains("back"));
}

#[tokio::test]
async fn stop_without_admitted_frames_fails_every_output() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new().with_manifests();
    let recorder = recorder(&factory);
    let paths = recorder.start_recording(destination(dir.path())).await.unwrap();

    let result = recorder.stop_recording().await;
    assert!(matches!(result, Err(RecordingError::WriteFailure { .. })));
    for role in OutputRole::ALL {
        assert!(!paths.get(role).exists(), "{role} left a file behind");
    }
}

#[tokio::test]
async fn dropping_the_recorder_cancels_outputs() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    {
        let recorder = recorder(&factory);
        recorder.start_recording(destination(dir.path())).await.unwrap();
        recorder.process_synchronized_frames(synthetic_tuple(&sensors(), T0)).unwrap();
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let cancelled = OutputRole::ALL
                .iter()
                .all(|role| factory.output(*role).is_some_and(|o| o.cancelled));
            if cancelled {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("outputs cancelled after the recorder was dropped");
}

#[tokio::test]
async fn a_new_session_can_follow_a_finished_one() {
    let dir = tempdir().unwrap();
    let factory = MemoryWriterFactory::new();
    let recorder = recorder(&factory);

    for session in 0..2u64 {
        recorder.start_recording(destination(dir.path())).await.unwrap();
        let t = T0 + session * 10_000_000;
        recorder.process_synchronized_frames(synthetic_tuple(&sensors(), t)).unwrap();
        let summary = recorder.stop_recording().await.unwrap();
        assert_eq!(summary.origin_us, Some(t));
        assert_eq!(summary.statistics.frame_count, 1);
    }
    assert_eq!(factory.created(), 6);
}
