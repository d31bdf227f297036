//! Frame pump: present, encode, forward, repeat

use super::StopReason;
use crate::encode::{EncoderModule, EncoderSession};
use crate::output::PacketSink;
use crate::render::{FrameSource, PresentationSurface};

use crossbeam_channel::Receiver;

/// Counters collected by one pump run
#[derive(Debug)]
pub(crate) struct PumpOutcome {
    pub frames_encoded: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub stop: StopReason,
}

/// Drives one frame at a time through surface, session and sink.
///
/// Fully synchronous: the surface has finished frame N before the encoder is
/// asked for it, and the packet for frame N is written and freed before the
/// next encode call.
pub(crate) struct FramePump<'a> {
    progress_interval: u64,
    cancel: Option<&'a Receiver<()>>,
}

impl<'a> FramePump<'a> {
    pub fn new(progress_interval: u64, cancel: Option<&'a Receiver<()>>) -> Self {
        Self {
            progress_interval,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        // A dropped sender never cancels
        self.cancel.is_some_and(|rx| rx.try_recv().is_ok())
    }

    pub fn run<M, Src, Surf, S>(
        &self,
        source: &mut Src,
        surface: &mut Surf,
        session: &mut EncoderSession<'_, M>,
        sink: &mut S,
    ) -> PumpOutcome
    where
        M: EncoderModule + ?Sized,
        Src: FrameSource + ?Sized,
        Surf: PresentationSurface<Src::Frame> + ?Sized,
        S: PacketSink + ?Sized,
    {
        let mut frame = 0u64;
        let mut frames_encoded = 0u64;
        let mut packets_written = 0u64;
        let mut bytes_written = 0u64;

        let stop = loop {
            if self.cancelled() {
                tracing::info!("Cancel requested after {} frames", frame);
                break StopReason::Cancelled;
            }

            let Some(next) = source.next_frame() else {
                break StopReason::Exhausted;
            };
            frame += 1;

            if let Err(error) = surface.present(&next) {
                tracing::error!("Presenting frame {} failed: {}", frame, error);
                break StopReason::Failed { frame, error };
            }

            let packet = match session.encode() {
                Ok(packet) => packet,
                Err(error) => {
                    tracing::error!("{}", error);
                    break StopReason::Failed { frame, error };
                }
            };
            frames_encoded += 1;

            match packet.forward_to(sink) {
                Ok(0) => {}
                Ok(len) => {
                    packets_written += 1;
                    bytes_written += len as u64;
                }
                Err(error) => {
                    tracing::error!("Writing packet for frame {} failed: {}", frame, error);
                    break StopReason::Failed { frame, error };
                }
            }

            if self.progress_interval > 0 && frame % self.progress_interval == 0 {
                tracing::debug!(
                    "Frame {}: {} packets, {} bytes so far",
                    frame,
                    packets_written,
                    bytes_written
                );
            }
        };

        PumpOutcome {
            frames_encoded,
            packets_written,
            bytes_written,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{ModuleCall, ScriptedEncode, ScriptedModule};
    use crate::error::Error;
    use crate::output::MemorySink;
    use crate::render::{ExternalTexture, FrameCounter};
    use crate::types::{Resolution, TextureId};

    fn bound_session(module: &ScriptedModule) -> EncoderSession<'_, ScriptedModule> {
        let mut session = EncoderSession::create(module, Resolution::HD_720P, 0).unwrap();
        session.register_target(TextureId(1)).unwrap();
        session
    }

    #[test]
    fn test_each_packet_written_and_freed_before_next_encode() {
        let module = ScriptedModule::new().with_encodes([
            ScriptedEncode::packet(b"one"),
            ScriptedEncode::packet(b"two"),
        ]);
        let mut session = bound_session(&module);
        let mut sink = MemorySink::new();

        let outcome = FramePump::new(60, None).run(
            &mut FrameCounter::new(Resolution::HD_720P, 2),
            &mut ExternalTexture::new(TextureId(1)),
            &mut session,
            &mut sink,
        );

        assert!(matches!(outcome.stop, StopReason::Exhausted));
        assert_eq!(outcome.packets_written, 2);
        assert_eq!(outcome.bytes_written, 6);

        let calls: Vec<_> = module
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ModuleCall::EncodeFrame | ModuleCall::FreePacket(_)))
            .collect();
        assert_eq!(
            calls,
            vec![
                ModuleCall::EncodeFrame,
                ModuleCall::FreePacket(b"one".to_vec()),
                ModuleCall::EncodeFrame,
                ModuleCall::FreePacket(b"two".to_vec()),
            ]
        );
        session.abort();
    }

    #[test]
    fn test_present_failure_stops_before_encode() {
        let module = ScriptedModule::new().with_synthetic_packets(16);
        let mut session = bound_session(&module);
        let mut sink = MemorySink::new();

        let outcome = FramePump::new(0, None).run(
            &mut FrameCounter::new(Resolution::HD_720P, 10),
            &mut ExternalTexture::new(TextureId(1)).failing_on(3),
            &mut session,
            &mut sink,
        );

        assert!(matches!(
            outcome.stop,
            StopReason::Failed {
                frame: 3,
                error: Error::Render(_)
            }
        ));
        assert_eq!(outcome.frames_encoded, 2);
        assert_eq!(module.count_calls(|c| matches!(c, ModuleCall::EncodeFrame)), 2);
        session.abort();
    }

    #[test]
    fn test_cancel_checked_between_frames() {
        let module = ScriptedModule::new().with_synthetic_packets(16);
        let mut session = bound_session(&module);
        let mut sink = MemorySink::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();

        let outcome = FramePump::new(0, Some(&rx)).run(
            &mut FrameCounter::new(Resolution::HD_720P, 10),
            &mut ExternalTexture::new(TextureId(1)),
            &mut session,
            &mut sink,
        );

        assert!(matches!(outcome.stop, StopReason::Cancelled));
        assert_eq!(outcome.frames_encoded, 0);
        session.abort();
    }

    #[test]
    fn test_dropped_cancel_sender_does_not_cancel() {
        let module = ScriptedModule::new().with_synthetic_packets(16);
        let mut session = bound_session(&module);
        let mut sink = MemorySink::new();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        drop(tx);

        let outcome = FramePump::new(1, Some(&rx)).run(
            &mut FrameCounter::new(Resolution::HD_720P, 4),
            &mut ExternalTexture::new(TextureId(1)),
            &mut session,
            &mut sink,
        );

        assert!(matches!(outcome.stop, StopReason::Exhausted));
        assert_eq!(outcome.frames_encoded, 4);
        assert_eq!(sink.packets().len(), 4);
        session.abort();
    }
}
