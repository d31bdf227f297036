//! End-of-run drain
//!
//! Runs on every exit path once the session exists and the sink is open:
//! destroy the session, deal with the trailing packet, close the sink.

use super::StopReason;
use crate::config::TrailingPacketPolicy;
use crate::encode::{EncoderModule, EncoderSession};
use crate::error::Result;
use crate::output::PacketSink;

/// Destroy `session`, forward or drop its trailing packet, then finish `sink`.
///
/// Returns the trailing packet's size in bytes when it was written, 0 when it
/// was empty or dropped. When the loop stopped on a sink failure the trailing
/// packet is dropped and a failing `finish` is only logged, so the caller
/// reports the original write error.
pub(crate) fn finalize<M, S>(
    session: EncoderSession<'_, M>,
    sink: &mut S,
    stop: &StopReason,
    policy: TrailingPacketPolicy,
) -> Result<usize>
where
    M: EncoderModule + ?Sized,
    S: PacketSink + ?Sized,
{
    let tail = session.destroy();
    let sink_broken = stop.is_fatal();

    let forwarded = if sink_broken || discards(policy, stop) {
        if !tail.is_empty() {
            tracing::warn!(
                "Discarding {} byte trailing packet ({})",
                tail.len(),
                stop
            );
        }
        tail.release();
        Ok(0)
    } else {
        tail.forward_to(sink)
    };

    let finished = sink.finish();
    if sink_broken {
        if let Err(e) = finished {
            tracing::warn!("Closing failed sink: {}", e);
        }
        return Ok(0);
    }

    let written = forwarded?;
    finished?;
    if written > 0 {
        tracing::debug!("Trailing packet written: {} bytes", written);
    }
    Ok(written)
}

fn discards(policy: TrailingPacketPolicy, stop: &StopReason) -> bool {
    policy == TrailingPacketPolicy::DiscardOnError && stop.is_error()
}
