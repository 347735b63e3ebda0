//! The `IoLayer` trait: a filter in an [`crate::io_handle::IoHandle`]'s stack.
//!
//! Layer 0 is always the transport; higher layers are filters (TLS,
//! bandwidth shaping, user protocol framing). Events flow bottom-up through
//! [`IoLayer::process_event`]; writes flow top-down through [`IoLayer::write`];
//! reads flow bottom-up through [`IoLayer::read`], each layer transforming
//! the bytes the one below it produced in place before the next layer up
//! sees them. A layer never stores a reference back to its owning handle —
//! it only ever sees one borrowed for the duration of a single call, via
//! [`LayerContext`], which is how this crate avoids the ownership cycle a
//! back-pointer would create.

use std::io;

use crate::reactor::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// This layer fully handled the event; do not propagate further up the
    /// stack.
    Consumed,
    /// Propagate the event to the next layer up.
    PassUp,
}

#[derive(Debug, Clone)]
pub enum LayerEvent {
    Readable,
    Writable,
    /// A layer-originated synthetic event, carrying an opaque payload kind.
    Soft(u32),
    Error(String),
}

/// Per-call, non-owning view of the handle a layer is attached to. Layers
/// use this to talk to layers above/below themselves and to the owning
/// event loop without holding a lifetime past the current call.
pub struct LayerContext<'a> {
    pub(crate) token: Token,
    pub(crate) layer_index: usize,
    pub(crate) stack_len: usize,
    pub(crate) waker: Option<&'a crate::reactor::Waker>,
    pub(crate) pending_soft_events: &'a mut Vec<(Token, usize, LayerEvent)>,
}

impl<'a> LayerContext<'a> {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    pub fn is_transport(&self) -> bool {
        self.layer_index == 0
    }

    pub fn is_top(&self) -> bool {
        self.layer_index + 1 == self.stack_len
    }

    /// Enqueues a synthetic event for `target` (an index into the same
    /// handle's layer stack). `cross_thread = true` routes through the
    /// owning loop's waker and is safe from any thread; `cross_thread =
    /// false` assumes the caller is already running inside a callback on
    /// the owning loop and just appends to the pending queue directly.
    pub fn post_soft_event(&mut self, target: usize, cross_thread: bool, event: LayerEvent) {
        self.pending_soft_events.push((self.token, target, event));
        if cross_thread {
            if let Some(waker) = self.waker {
                let _ = waker.wake();
            }
        }
    }
}

/// The six-method layer contract. Default bodies exist only where the
/// upstream spec leaves them no-ops (`unregister`); `init`/`process_event`/
/// `read`/`write`/`destroy` are always meaningful so they stay required.
pub trait IoLayer: Send {
    fn init(&mut self, ctx: &mut LayerContext) -> io::Result<()>;

    fn process_event(
        &mut self,
        ctx: &mut LayerContext,
        event: LayerEvent,
    ) -> io::Result<EventDisposition>;

    /// Pulls bytes up from the layer below. `buf` arrives holding the bytes
    /// the layer below already produced (its own returned length, not
    /// necessarily `buf.len()`'s original capacity); this layer transforms
    /// them in place — decrypting, de-shaping, whatever its job is — and
    /// returns the new length, which may be smaller than what came in.
    fn read(&mut self, ctx: &mut LayerContext, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, ctx: &mut LayerContext, buf: &[u8]) -> io::Result<usize>;

    fn unregister(&mut self, _ctx: &mut LayerContext) {}

    fn destroy(self: Box<Self>, ctx: &mut LayerContext);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl IoLayer for Echo {
        fn init(&mut self, _ctx: &mut LayerContext) -> io::Result<()> {
            Ok(())
        }

        fn process_event(
            &mut self,
            _ctx: &mut LayerContext,
            _event: LayerEvent,
        ) -> io::Result<EventDisposition> {
            Ok(EventDisposition::PassUp)
        }

        fn read(&mut self, _ctx: &mut LayerContext, buf: &mut [u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn write(&mut self, _ctx: &mut LayerContext, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn destroy(self: Box<Self>, _ctx: &mut LayerContext) {}
    }

    #[test]
    fn context_reports_position() {
        let mut pending = Vec::new();
        let mut ctx = LayerContext {
            token: Token(1),
            layer_index: 0,
            stack_len: 2,
            waker: None,
            pending_soft_events: &mut pending,
        };
        assert!(ctx.is_transport());
        assert!(!ctx.is_top());
        ctx.post_soft_event(1, false, LayerEvent::Soft(7));
        assert_eq!(ctx.pending_soft_events.len(), 1);

        let mut echo = Echo;
        assert_eq!(echo.write(&mut ctx, b"hi").unwrap(), 2);
        let mut buf = *b"hi";
        assert_eq!(echo.read(&mut ctx, &mut buf).unwrap(), 2);
    }
}
