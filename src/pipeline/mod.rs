//! Render-to-encode pipeline
//!
//! One run, start to finish:
//! 1. create the encoder session (resolution from config or the frame source)
//! 2. register the surface's texture as the encoder input
//! 3. open the packet sink
//! 4. pump frames until the source is exhausted, a frame fails, or a cancel
//!    arrives
//! 5. drain: destroy the session, write the trailing packet, close the sink
//!
//! Failures in 1-3 abort before any frame and destroy whatever session
//! exists. Once the pump has started, the drain always runs.

mod drain;
mod pump;

use crate::config::BridgeConfig;
use crate::encode::{EncoderModule, EncoderSession};
use crate::error::{Error, Result};
use crate::output::PacketSink;
use crate::render::{FrameSource, PresentationSurface};

use crossbeam_channel::Receiver;
use std::fmt;
use std::time::{Duration, Instant};

use pump::FramePump;

/// Why the frame loop ended
#[derive(Debug)]
pub enum StopReason {
    /// The frame source ran out
    Exhausted,
    /// A cancel message arrived between frames
    Cancelled,
    /// Presenting, encoding or writing `frame` failed
    Failed { frame: u64, error: Error },
}

impl StopReason {
    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::Failed { .. })
    }

    /// The failure that ended the loop, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            StopReason::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The loop ended because the sink stopped accepting bytes
    pub fn is_fatal(&self) -> bool {
        matches!(self.error(), Some(Error::Sink(_) | Error::Io(_)))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "source exhausted"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::Failed { frame, error } => write!(f, "frame {}: {}", frame, error),
        }
    }
}

/// Outcome of a completed run
#[derive(Debug)]
pub struct RunReport {
    /// Successful encode calls
    pub frames_encoded: u64,
    /// Non-empty packets written, trailing packet included
    pub packets_written: u64,
    /// Bytes accepted by the sink
    pub bytes_written: u64,
    /// Size of the trailing packet if it was written
    pub trailing_packet_bytes: usize,
    /// From session creation to sink close
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

impl RunReport {
    /// Average encoded frames per second over the whole run
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_encoded as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Encoding elapsed: {} ms, total fps: {:.6}",
            self.elapsed.as_millis(),
            self.fps()
        )
    }
}

/// Drives one render target through one encoder session into one sink
pub struct Pipeline<'m, M: EncoderModule + ?Sized> {
    module: &'m M,
    config: BridgeConfig,
    cancel: Option<Receiver<()>>,
}

impl<'m, M: EncoderModule + ?Sized> Pipeline<'m, M> {
    pub fn new(module: &'m M, config: BridgeConfig) -> Self {
        Self {
            module,
            config,
            cancel: None,
        }
    }

    /// Stop between frames once a message arrives on `cancel`
    pub fn with_cancel(mut self, cancel: Receiver<()>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run until the source is exhausted, a frame fails, or cancel.
    ///
    /// `open_sink` is only called once the encoder is bound to the surface.
    /// Encode and present failures end the loop but still produce a report
    /// (see [`RunReport::stop_reason`]); a sink failure is returned as an
    /// error after the drain.
    pub fn run<Src, Surf, S, F>(
        &self,
        mut source: Src,
        mut surface: Surf,
        open_sink: F,
    ) -> Result<RunReport>
    where
        Src: FrameSource,
        Surf: PresentationSurface<Src::Frame>,
        S: PacketSink,
        F: FnOnce() -> Result<S>,
    {
        let start = Instant::now();

        let resolution = self
            .config
            .encoder
            .resolution
            .unwrap_or_else(|| source.resolution());
        let mut session =
            EncoderSession::create(self.module, resolution, self.config.encoder.device_index)?;

        if let Err(e) = session.register_target(surface.native_handle()) {
            session.abort();
            return Err(e);
        }

        let mut sink = match open_sink() {
            Ok(sink) => sink,
            Err(e) => {
                session.abort();
                return Err(match e {
                    Error::SinkOpen(_) => e,
                    other => Error::SinkOpen(other.to_string()),
                });
            }
        };

        match source.frame_count_hint() {
            Some(total) => tracing::info!("Encoding {} frames at {}", total, resolution),
            None => tracing::info!("Encoding at {} until the source ends", resolution),
        }

        let outcome = FramePump::new(self.config.progress_interval, self.cancel.as_ref()).run(
            &mut source,
            &mut surface,
            &mut session,
            &mut sink,
        );

        let drained = drain::finalize(session, &mut sink, &outcome.stop, self.config.finalize);
        let trailing_packet_bytes = *drained.as_ref().unwrap_or(&0);

        let report = RunReport {
            frames_encoded: outcome.frames_encoded,
            packets_written: outcome.packets_written + u64::from(trailing_packet_bytes > 0),
            bytes_written: outcome.bytes_written + trailing_packet_bytes as u64,
            trailing_packet_bytes,
            elapsed: start.elapsed(),
            stop_reason: outcome.stop,
        };

        tracing::info!("{}", report);
        if let Err(e) = drained {
            tracing::error!("Finalizing the run failed: {}", e);
            return Err(e);
        }
        tracing::info!(
            "Run finished ({}): {} frames, {} packets, {} bytes",
            report.stop_reason,
            report.frames_encoded,
            report.packets_written,
            report.bytes_written
        );

        if report.stop_reason.is_fatal() {
            if let StopReason::Failed { error, .. } = report.stop_reason {
                return Err(error);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrailingPacketPolicy;
    use crate::encode::{ModuleCall, ScriptedEncode, ScriptedModule};
    use crate::output::MemorySink;
    use crate::render::{ExternalTexture, FrameCounter};
    use crate::types::{Resolution, TextureId};

    fn collect_into<'a>(
        sink: &'a mut MemorySink,
    ) -> impl FnOnce() -> Result<&'a mut MemorySink> + 'a {
        move || Ok(sink)
    }

    fn destroys(module: &ScriptedModule) -> usize {
        module.count_calls(|c| matches!(c, ModuleCall::DestroyEncoder))
    }

    fn encodes(module: &ScriptedModule) -> usize {
        module.count_calls(|c| matches!(c, ModuleCall::EncodeFrame))
    }

    fn frames(total: u64) -> FrameCounter {
        FrameCounter::new(Resolution::HD_720P, total)
    }

    fn texture() -> ExternalTexture {
        ExternalTexture::new(TextureId(7))
    }

    #[test]
    fn test_three_frames_with_final_packet() {
        let module = ScriptedModule::new()
            .with_encodes([
                ScriptedEncode::packet(b"p1"),
                ScriptedEncode::Empty,
                ScriptedEncode::packet(b"p3"),
            ])
            .with_final_packet(b"final");
        let mut sink = MemorySink::new();

        let report = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(3), texture(), collect_into(&mut sink))
            .unwrap();

        assert_eq!(
            sink.packets(),
            &[b"p1".to_vec(), b"p3".to_vec(), b"final".to_vec()]
        );
        assert_eq!(module.frees(), sink.packets().to_vec());
        assert_eq!(module.invalid_frees(), 0);
        assert_eq!(module.outstanding_packets(), 0);
        assert_eq!(destroys(&module), 1);
        assert_eq!(sink.finishes(), 1);

        assert!(matches!(report.stop_reason, StopReason::Exhausted));
        assert_eq!(report.frames_encoded, 3);
        assert_eq!(report.packets_written, 3);
        assert_eq!(report.bytes_written, 9);
        assert_eq!(report.trailing_packet_bytes, 5);
    }

    #[test]
    fn test_call_order() {
        let module = ScriptedModule::new()
            .with_encodes([ScriptedEncode::packet(b"a")])
            .with_final_packet(b"z");
        let mut sink = MemorySink::new();

        Pipeline::new(&module, BridgeConfig::default().with_device_index(2))
            .run(frames(1), texture(), collect_into(&mut sink))
            .unwrap();

        assert_eq!(
            module.calls(),
            vec![
                ModuleCall::CreateEncoder {
                    width: 1280,
                    height: 720,
                    device_index: 2
                },
                ModuleCall::RegisterTexture(TextureId(7)),
                ModuleCall::EncodeFrame,
                ModuleCall::FreePacket(b"a".to_vec()),
                ModuleCall::DestroyEncoder,
                ModuleCall::FreePacket(b"z".to_vec()),
            ]
        );
    }

    #[test]
    fn test_configured_resolution_overrides_source() {
        let module = ScriptedModule::new();
        let mut sink = MemorySink::new();

        Pipeline::new(&module, BridgeConfig::default().with_resolution(640, 480))
            .run(frames(0), texture(), collect_into(&mut sink))
            .unwrap();

        assert!(module.calls().contains(&ModuleCall::CreateEncoder {
            width: 640,
            height: 480,
            device_index: 0
        }));
    }

    #[test]
    fn test_create_failure_touches_nothing_else() {
        let module = ScriptedModule::new().failing_create();
        let mut opened = false;

        let err = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(3), texture(), || {
                opened = true;
                Ok(MemorySink::new())
            })
            .unwrap_err();

        assert!(matches!(err, Error::SessionCreate { .. }));
        assert!(!opened);
        assert_eq!(module.calls().len(), 1);
    }

    #[test]
    fn test_register_failure_destroys_once_and_never_opens_sink() {
        let module = ScriptedModule::new()
            .with_register_status(4)
            .with_final_packet(b"tail");
        let mut opened = false;

        let err = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(3), texture(), || {
                opened = true;
                Ok(MemorySink::new())
            })
            .unwrap_err();

        assert!(matches!(err, Error::TargetBind { status: 4, .. }));
        assert!(!opened);
        assert_eq!(encodes(&module), 0);
        assert_eq!(destroys(&module), 1);
        assert_eq!(module.outstanding_packets(), 0);
    }

    #[test]
    fn test_sink_open_failure_destroys_session() {
        let module = ScriptedModule::new();

        let err = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(3), texture(), || -> Result<MemorySink> {
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "denied",
                )))
            })
            .unwrap_err();

        assert!(matches!(err, Error::SinkOpen(_)));
        assert!(err.is_preflight());
        assert_eq!(encodes(&module), 0);
        assert_eq!(destroys(&module), 1);
    }

    #[test]
    fn test_encode_failure_still_flushes() {
        let module = ScriptedModule::new()
            .with_encodes([ScriptedEncode::packet(b"p1"), ScriptedEncode::Fail(7)])
            .with_synthetic_packets(32)
            .with_final_packet(b"final");
        let mut sink = MemorySink::new();

        let report = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(5), texture(), collect_into(&mut sink))
            .unwrap();

        assert!(matches!(
            report.stop_reason,
            StopReason::Failed {
                frame: 2,
                error: Error::EncodeFrame { frame: 2, status: 7 }
            }
        ));
        assert_eq!(encodes(&module), 2);
        assert_eq!(destroys(&module), 1);
        assert_eq!(sink.packets(), &[b"p1".to_vec(), b"final".to_vec()]);
        assert_eq!(module.outstanding_packets(), 0);
        assert_eq!(module.invalid_frees(), 0);
        assert_eq!(report.frames_encoded, 1);
    }

    #[test]
    fn test_discard_on_error_policy() {
        let module = ScriptedModule::new()
            .with_encodes([ScriptedEncode::packet(b"p1"), ScriptedEncode::Fail(7)])
            .with_final_packet(b"final");
        let mut sink = MemorySink::new();
        let config =
            BridgeConfig::default().with_trailing_policy(TrailingPacketPolicy::DiscardOnError);

        let report = Pipeline::new(&module, config)
            .run(frames(5), texture(), collect_into(&mut sink))
            .unwrap();

        assert_eq!(sink.packets(), &[b"p1".to_vec()]);
        assert_eq!(report.trailing_packet_bytes, 0);
        assert_eq!(module.frees(), vec![b"p1".to_vec(), b"final".to_vec()]);
        assert_eq!(module.outstanding_packets(), 0);
    }

    #[test]
    fn test_present_failure_still_flushes() {
        let module = ScriptedModule::new()
            .with_synthetic_packets(8)
            .with_final_packet(b"final");
        let mut sink = MemorySink::new();

        let report = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(5), texture().failing_on(4), collect_into(&mut sink))
            .unwrap();

        assert!(report.stop_reason.is_error());
        assert!(!report.stop_reason.is_fatal());
        assert_eq!(report.frames_encoded, 3);
        assert_eq!(sink.packets().len(), 4);
        assert_eq!(sink.packets()[3], b"final");
        assert_eq!(destroys(&module), 1);
    }

    #[test]
    fn test_sink_failure_is_returned_after_drain() {
        let module = ScriptedModule::new()
            .with_synthetic_packets(8)
            .with_final_packet(b"final");
        let mut sink = MemorySink::new().failing_after(2);

        let err = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(10), texture(), collect_into(&mut sink))
            .unwrap_err();

        assert!(matches!(err, Error::Sink(_)));
        assert_eq!(encodes(&module), 3);
        assert_eq!(destroys(&module), 1);
        assert_eq!(sink.packets().len(), 2);
        assert!(sink.is_finished());
        assert_eq!(module.outstanding_packets(), 0);
        assert_eq!(module.invalid_frees(), 0);
    }

    #[test]
    fn test_cancelled_run_still_finalizes() {
        let module = ScriptedModule::new()
            .with_synthetic_packets(8)
            .with_final_packet(b"final");
        let mut sink = MemorySink::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();

        let report = Pipeline::new(&module, BridgeConfig::default())
            .with_cancel(rx)
            .run(frames(100), texture(), collect_into(&mut sink))
            .unwrap();

        assert!(matches!(report.stop_reason, StopReason::Cancelled));
        assert_eq!(report.frames_encoded, 0);
        assert_eq!(sink.packets(), &[b"final".to_vec()]);
        assert_eq!(destroys(&module), 1);
    }

    #[test]
    fn test_packet_from_failed_encode_is_freed_unwritten() {
        let module = ScriptedModule::new().with_encodes([ScriptedEncode::FailWithPacket(
            9,
            b"bad".to_vec(),
        )]);
        let mut sink = MemorySink::new();

        let report = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(3), texture(), collect_into(&mut sink))
            .unwrap();

        assert!(matches!(
            report.stop_reason,
            StopReason::Failed {
                frame: 1,
                error: Error::EncodeFrame { frame: 1, status: 9 }
            }
        ));
        assert!(sink.packets().is_empty());
        assert_eq!(module.frees(), vec![b"bad".to_vec()]);
        assert_eq!(module.outstanding_packets(), 0);
        assert_eq!(module.invalid_frees(), 0);
        assert_eq!(destroys(&module), 1);
        assert!(sink.is_finished());
        assert_eq!(report.frames_encoded, 0);
        assert_eq!(report.bytes_written, 0);
    }

    #[test]
    fn test_negative_size_packets_are_freed_unwritten() {
        let module = ScriptedModule::new().with_encodes([
            ScriptedEncode::NegativeLength(b"x1".to_vec()),
            ScriptedEncode::NegativeLength(b"x2".to_vec()),
            ScriptedEncode::NegativeLength(b"x3".to_vec()),
        ]);
        let mut sink = MemorySink::new();

        let report = Pipeline::new(&module, BridgeConfig::default())
            .run(frames(3), texture(), collect_into(&mut sink))
            .unwrap();

        assert!(matches!(report.stop_reason, StopReason::Exhausted));
        assert!(sink.packets().is_empty());
        assert_eq!(module.frees().len(), 3);
        assert_eq!(module.outstanding_packets(), 0);
        assert_eq!(module.invalid_frees(), 0);
        assert_eq!(report.frames_encoded, 3);
        assert_eq!(report.packets_written, 0);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_report_is_logged_when_finish_fails() {
        let logs = SharedBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let module = ScriptedModule::new()
            .with_synthetic_packets(4)
            .with_final_packet(b"final");
        let mut sink = MemorySink::new().failing_finish();

        let err = tracing::subscriber::with_default(subscriber, || {
            Pipeline::new(&module, BridgeConfig::default())
                .run(frames(2), texture(), collect_into(&mut sink))
                .unwrap_err()
        });

        assert!(matches!(err, Error::Muxer(_)));
        assert_eq!(destroys(&module), 1);
        assert_eq!(module.outstanding_packets(), 0);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Encoding elapsed:"), "{}", output);
    }

    #[test]
    fn test_only_sink_failures_are_fatal() {
        let failed = |error| StopReason::Failed { frame: 1, error };

        assert!(failed(Error::Sink("closed".into())).is_fatal());
        assert!(failed(Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe",
        )))
        .is_fatal());
        assert!(!failed(Error::Render("lost context".into())).is_fatal());
        assert!(!failed(Error::EncodeFrame { frame: 1, status: 3 }).is_fatal());
        assert!(!failed(Error::SessionState("destroyed".into())).is_fatal());
        assert!(!StopReason::Exhausted.is_fatal());
        assert!(!StopReason::Cancelled.is_fatal());
    }

    #[test]
    fn test_report_line() {
        let report = RunReport {
            frames_encoded: 120,
            packets_written: 120,
            bytes_written: 0,
            trailing_packet_bytes: 0,
            elapsed: Duration::from_millis(2000),
            stop_reason: StopReason::Exhausted,
        };
        assert_eq!(report.fps(), 60.0);
        assert_eq!(
            report.to_string(),
            "Encoding elapsed: 2000 ms, total fps: 60.000000"
        );
    }

    #[test]
    fn test_zero_elapsed_fps() {
        let report = RunReport {
            frames_encoded: 3,
            packets_written: 0,
            bytes_written: 0,
            trailing_packet_bytes: 0,
            elapsed: Duration::ZERO,
            stop_reason: StopReason::Cancelled,
        };
        assert_eq!(report.fps(), 0.0);
    }
}
