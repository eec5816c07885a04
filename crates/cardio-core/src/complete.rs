use crate::error::IoError;

/// Completion collaborator provided by the block layer.
///
/// Called one or more times per request; each call covers the next
/// `bytes_ok` bytes of the request (with `error` set for failed ranges).
/// Implementations should return quickly; the engine never calls this
/// while waiting on the transport.
pub trait CompletionSink: Send {
    fn end_request(&mut self, bytes_ok: u64, error: Option<IoError>);
}

/// Enforces the completion accounting rules over a [`CompletionSink`]:
/// coverage is monotone, never exceeds the request, and a failure is
/// reported exactly once for exactly the uncovered remainder.
pub struct CompletionReporter<'a> {
    sink: &'a mut dyn CompletionSink,
    total_bytes: u64,
    completed_bytes: u64,
    finished: bool,
}

impl<'a> CompletionReporter<'a> {
    pub fn new(total_bytes: u64, sink: &'a mut dyn CompletionSink) -> Self {
        Self {
            sink,
            total_bytes,
            completed_bytes: 0,
            finished: false,
        }
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes - self.completed_bytes
    }

    /// Report the next `bytes` of the request as successfully transferred.
    ///
    /// Clamped to the remainder so a device-reported count can never push
    /// coverage past the request. Zero-byte progress is not reported.
    pub fn complete_bytes(&mut self, bytes: u64) -> u64 {
        if self.finished {
            return 0;
        }
        let bytes = bytes.min(self.remaining_bytes());
        if bytes == 0 {
            return 0;
        }
        self.completed_bytes += bytes;
        self.sink.end_request(bytes, None);
        bytes
    }

    /// Fail everything not yet reported. Always emits exactly one call so
    /// the failure is never silently dropped, even when the prefix covered
    /// the whole request.
    pub fn fail_remainder(&mut self, error: IoError) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.sink.end_request(self.remaining_bytes(), Some(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoErrorKind;

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(u64, Option<IoError>)>,
    }

    impl CompletionSink for RecordingSink {
        fn end_request(&mut self, bytes_ok: u64, error: Option<IoError>) {
            self.calls.push((bytes_ok, error));
        }
    }

    #[test]
    fn full_success_is_one_call() {
        let mut sink = RecordingSink::default();
        let mut reporter = CompletionReporter::new(16384, &mut sink);
        assert_eq!(reporter.complete_bytes(16384), 16384);
        assert_eq!(reporter.remaining_bytes(), 0);
        assert_eq!(sink.calls, vec![(16384, None)]);
    }

    #[test]
    fn incremental_progress_is_monotone() {
        let mut sink = RecordingSink::default();
        let mut reporter = CompletionReporter::new(2048, &mut sink);
        reporter.complete_bytes(512);
        reporter.complete_bytes(512);
        assert_eq!(reporter.completed_bytes(), 1024);
        reporter.fail_remainder(IoError::new(IoErrorKind::Data));

        let mut covered = 0;
        for (bytes, _) in &sink.calls {
            covered += bytes;
        }
        assert_eq!(covered, 2048);
        assert_eq!(sink.calls.len(), 3);
        assert_eq!(sink.calls[2].0, 1024);
        assert!(sink.calls[2].1.is_some());
    }

    #[test]
    fn completion_never_exceeds_request() {
        let mut sink = RecordingSink::default();
        let mut reporter = CompletionReporter::new(1024, &mut sink);
        // A device-reported written count can exceed the remainder.
        assert_eq!(reporter.complete_bytes(4096), 1024);
        assert_eq!(reporter.completed_bytes(), 1024);
    }

    #[test]
    fn zero_progress_is_not_reported() {
        let mut sink = RecordingSink::default();
        let mut reporter = CompletionReporter::new(1024, &mut sink);
        assert_eq!(reporter.complete_bytes(0), 0);
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn failure_with_full_prefix_still_surfaces() {
        let mut sink = RecordingSink::default();
        let mut reporter = CompletionReporter::new(512, &mut sink);
        reporter.complete_bytes(512);
        reporter.fail_remainder(IoError::new(IoErrorKind::Stop));
        assert_eq!(sink.calls.len(), 2);
        assert_eq!(sink.calls[1].0, 0);
        assert_eq!(sink.calls[1].1.as_ref().unwrap().kind(), IoErrorKind::Stop);
    }
}
