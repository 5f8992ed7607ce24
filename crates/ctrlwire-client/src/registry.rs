use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use ctrlwire_frame::{FrameError, MessageType, WrapperMessage};

/// An inbound message, as handed to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Raw wire tag.
    pub tag: i32,
    /// Serialized message body; decoding is up to the handler.
    pub payload: Bytes,
    pub compressed: bool,
    pub sequence: u64,
}

impl InboundMessage {
    /// The known message type, if this protocol version defines the tag.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(self.tag)
    }

    /// Decode the payload as a prost message.
    pub fn decode<M: prost::Message + Default>(&self) -> Result<M, FrameError> {
        M::decode(self.payload.clone()).map_err(FrameError::from)
    }
}

impl From<WrapperMessage> for InboundMessage {
    fn from(wrapper: WrapperMessage) -> Self {
        Self {
            tag: wrapper.tag,
            payload: wrapper.payload,
            compressed: wrapper.compressed,
            sequence: wrapper.sequence,
        }
    }
}

/// Callback invoked for each inbound message of a registered tag.
pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Maps inbound wire tags to handlers.
///
/// Tags are raw integers so handlers can be registered for tags newer than
/// [`MessageType`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<i32, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: impl Into<i32>, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.handlers.insert(tag.into(), Arc::new(handler));
    }

    /// Remove the handler for `tag`. Returns true if one was registered.
    pub fn remove(&mut self, tag: impl Into<i32>) -> bool {
        self.handlers.remove(&tag.into()).is_some()
    }

    /// Handler for `tag`, if registered.
    pub fn handler_for(&self, tag: i32) -> Option<Handler> {
        self.handlers.get(&tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<i32> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("HandlerRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ctrlwire_frame::SyncRequest;

    use super::*;

    fn inbound(tag: i32, payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            tag,
            payload: Bytes::from_static(payload),
            compressed: false,
            sequence: 1,
        }
    }

    #[test]
    fn register_and_lookup() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(&hits);
        registry.register(MessageType::SyncRouteResponse, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handler = registry.handler_for(4).expect("handler should be registered");
        handler(&inbound(4, b""));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.handler_for(1).is_none());
    }

    #[test]
    fn register_replaces_previous_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(7, |_| panic!("replaced handler must not run"));
        let counter = Arc::clone(&hits);
        registry.register(7, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.len(), 1);
        (registry.handler_for(7).unwrap())(&inbound(7, b""));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(MessageType::SyncRequest, |_| {});
        assert!(registry.remove(MessageType::SyncRequest));
        assert!(!registry.remove(MessageType::SyncRequest));
        assert!(registry.is_empty());
    }

    #[test]
    fn inbound_decode_payload() {
        let msg = inbound(1, &[0x08, 0x2A]);
        let decoded: SyncRequest = msg.decode().unwrap();
        assert_eq!(decoded.last_sync_time, 42);
        assert_eq!(msg.message_type(), Some(MessageType::SyncRequest));

        let broken = inbound(1, &[0x08]);
        assert!(matches!(
            broken.decode::<SyncRequest>(),
            Err(FrameError::MalformedPayload(_))
        ));
    }

    #[test]
    fn debug_lists_tags() {
        let mut registry = HandlerRegistry::new();
        registry.register(4, |_| {});
        registry.register(1, |_| {});
        assert_eq!(format!("{registry:?}"), "HandlerRegistry { tags: [1, 4] }");
    }
}
