#[cfg(test)]
mod error_tests {
    use duocam::errors::{RecordingError, RecordingResult};
    use duocam::OutputRole;
    use std::error::Error;

    #[test]
    fn test_misuse_errors_display() {
        assert_eq!(
            RecordingError::AlreadyRecording.to_string(),
            "a recording is already in progress"
        );
        assert_eq!(RecordingError::NotRecording.to_string(), "no recording is in progress");
    }

    #[test]
    fn test_configuration_error_names_output_when_known() {
        let error = RecordingError::output_configuration(OutputRole::Back, "odd height");
        assert!(error.to_string().contains("back output"));
        assert!(error.to_string().contains("odd height"));

        let error = RecordingError::configuration("no writer backend");
        assert!(!error.to_string().contains("output"));
    }

    #[test]
    fn test_write_failure_carries_role() {
        let error = RecordingError::write_failure(OutputRole::Front, "session never started");
        match &error {
            RecordingError::WriteFailure { role, message } => {
                assert_eq!(*role, OutputRole::Front);
                assert_eq!(message, "session never started");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(error.to_string(), "write failure on front output: session never started");
    }

    #[test]
    fn test_encoding_and_sync_display() {
        assert_eq!(RecordingError::encoding("bad frame").to_string(), "encoding error: bad frame");
        assert_eq!(RecordingError::sync("skew 40ms").to_string(), "frame sync error: skew 40ms");
    }

    #[test]
    fn test_debug_format() {
        let error = RecordingError::encoding("Debug test");
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("Encoding"));
        assert!(debug_str.contains("Debug test"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let error: RecordingError = io.into();
        assert!(error.to_string().contains("read-only volume"));
        assert!(matches!(error, RecordingError::Io(_)));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_error_trait_objects() {
        fn boxed() -> Result<(), Box<dyn Error + Send + Sync>> {
            Err(RecordingError::Shutdown)?;
            Ok(())
        }
        let error = boxed().unwrap_err();
        assert_eq!(error.to_string(), "recorder task has shut down");
    }

    #[test]
    fn test_result_alias_propagates() {
        fn stop() -> RecordingResult<u64> {
            Err(RecordingError::NotRecording)
        }
        fn wrapper() -> RecordingResult<u64> {
            let frames = stop()?;
            Ok(frames + 1)
        }
        assert!(matches!(wrapper(), Err(RecordingError::NotRecording)));
    }

    #[test]
    fn test_errors_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<RecordingError>();
    }
}
