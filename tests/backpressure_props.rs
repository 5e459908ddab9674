//! Property tests for whole-tuple admission under random readiness changes
//!
//! Whatever the interleaving of readiness toggles and offered tuples, either
//! all three outputs receive a tuple or none does.

mod common;

use common::{destination, recorder, sensors, T0};
use duocam::testing::{synthetic_tuple, MemoryWriterFactory, FRAME_INTERVAL_US};
use duocam::OutputRole;
use proptest::prelude::*;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Step {
    SetReady(OutputRole, bool),
    Offer,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (prop::sample::select(OutputRole::ALL.to_vec()), any::<bool>())
            .prop_map(|(role, ready)| Step::SetReady(role, ready)),
        Just(Step::Offer),
        Just(Step::Offer),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn outputs_stay_frame_aligned(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let dir = tempdir().unwrap();
            let factory = MemoryWriterFactory::new();
            let recorder = recorder(&factory);
            recorder.start_recording(destination(dir.path())).await.unwrap();

            let mut ready = [true; 3];
            let mut timestamp = T0;
            let mut admitted = 0u64;

            for step in &steps {
                match step {
                    Step::SetReady(role, value) => {
                        factory.set_ready(*role, *value);
                        let index = OutputRole::ALL.iter().position(|r| r == role).unwrap();
                        ready[index] = *value;
                    }
                    Step::Offer => {
                        recorder
                            .process_synchronized_frames(synthetic_tuple(&sensors(), timestamp))
                            .unwrap();
                        timestamp += FRAME_INTERVAL_US;

                        // The statistics reply is ordered after the tuple
                        let stats = recorder.statistics().await.unwrap().unwrap();
                        if ready.contains(&false) {
                            prop_assert_eq!(
                                stats.frame_count,
                                admitted,
                                "admitted while not ready"
                            );
                        }
                        prop_assert!(stats.frame_count <= admitted + 1);
                        admitted = stats.frame_count;
                    }
                }
            }

            let stats = recorder.statistics().await.unwrap().unwrap();
            prop_assert_eq!(stats.frame_count + stats.dropped_frame_count, stats.tuples_offered);

            for role in OutputRole::ALL {
                factory.set_ready(role, true);
            }
            let _ = recorder.stop_recording().await;

            for role in OutputRole::ALL {
                let written = factory.output(role).map(|o| o.video_frames()).unwrap_or(0);
                prop_assert_eq!(written as u64, admitted, "{} is misaligned", role);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
