use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use bytes::BytesMut;
use ctrlwire_frame::{encode_message, OutboundMessage, WrapperMessage};
use tracing::debug;

use crate::error::Result;
use crate::registry::{HandlerRegistry, InboundMessage};

/// Destination for encoded frames.
pub trait FrameSink {
    /// Write one complete frame.
    fn write_frame(&self, frame: &[u8]) -> Result<()>;
}

/// Routes inbound envelopes to handlers and frames outbound messages.
#[derive(Debug)]
pub struct Dispatcher {
    registry: RwLock<HandlerRegistry>,
    next_sequence: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Register or replace the handler for `tag`.
    pub fn on_message<F>(&self, tag: impl Into<i32>, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(tag, handler);
    }

    /// Allocate the next outbound sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Frame `message` and write it to `sink`.
    ///
    /// Uses `sequence` when given, otherwise the next internal sequence
    /// number. Returns the sequence number sent. Errors are returned to the
    /// caller only; they never affect connection state.
    pub fn send<S: FrameSink + ?Sized>(
        &self,
        sink: &S,
        message: &OutboundMessage,
        sequence: Option<u64>,
    ) -> Result<u64> {
        let sequence = sequence.unwrap_or_else(|| self.next_sequence());
        let mut frame = BytesMut::new();
        encode_message(message, sequence, &mut frame)?;
        sink.write_frame(&frame)?;
        debug!(
            tag = ?message.message_type().ok(),
            sequence,
            bytes = frame.len(),
            "sent frame"
        );
        Ok(sequence)
    }

    /// Hand a decoded envelope to its handler.
    ///
    /// Returns false when no handler is registered for the tag; such frames
    /// are dropped.
    pub fn on_frame(&self, wrapper: WrapperMessage) -> bool {
        // Clone the handler out so it runs without the registry lock held.
        let handler = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handler_for(wrapper.tag);

        match handler {
            Some(handler) => {
                let message = InboundMessage::from(wrapper);
                debug!(
                    tag = message.tag,
                    sequence = message.sequence,
                    bytes = message.payload.len(),
                    "dispatching frame"
                );
                handler(&message);
                true
            }
            None => {
                debug!(
                    tag = wrapper.tag,
                    sequence = wrapper.sequence,
                    "no handler registered; dropping frame"
                );
                false
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(HandlerRegistry::default())
    }
}
