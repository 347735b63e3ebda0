//! A handle: an ordered stack of [`IoLayer`]s wrapping one transport,
//! registered with exactly one owning event loop at a time.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::sync::RwLock;

use crate::layer::{EventDisposition, IoLayer, LayerContext, LayerEvent};
use crate::reactor::{Token, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Detached,
    Attached,
    Disconnecting,
    Destroyed,
}

/// An ordered layer stack plus bookkeeping: the token it's registered under,
/// a tag map for user data, and its lifecycle state. Layers are only added
/// while [`HandleState::Detached`]; `attach` runs `init` top-down... no,
/// bottom-up, so the transport is live before filters start touching it.
pub struct IoHandle {
    token: Token,
    layers: RwLock<Vec<Box<dyn IoLayer>>>,
    tags: HashMap<String, Box<dyn Any + Send>>,
    state: HandleState,
}

impl IoHandle {
    pub fn new(token: Token) -> Self {
        IoHandle {
            token,
            layers: RwLock::new(Vec::new()),
            tags: HashMap::new(),
            state: HandleState::Detached,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Pushes a new topmost layer. Only valid while detached — once
    /// attached, the stack shape is fixed so layers never observe a
    /// concurrent insert mid-dispatch.
    pub fn push_layer(&mut self, layer: Box<dyn IoLayer>) -> io::Result<()> {
        if self.state != HandleState::Detached {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "cannot push a layer onto an attached handle",
            ));
        }
        self.layers.get_mut().unwrap().push(layer);
        Ok(())
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: Box<dyn Any + Send>) {
        self.tags.insert(key.into(), value);
    }

    pub fn get_tag(&self, key: &str) -> Option<&(dyn Any + Send)> {
        self.tags.get(key).map(|b| b.as_ref())
    }

    pub fn attach(&mut self, waker: Option<&Waker>) -> io::Result<()> {
        if self.state != HandleState::Detached {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "handle already attached",
            ));
        }
        let mut pending = Vec::new();
        let mut layers = self.layers.write().unwrap();
        let stack_len = layers.len();
        for (idx, layer) in layers.iter_mut().enumerate() {
            let mut ctx = LayerContext {
                token: self.token,
                layer_index: idx,
                stack_len,
                waker,
                pending_soft_events: &mut pending,
            };
            layer.init(&mut ctx)?;
        }
        self.state = HandleState::Attached;
        #[cfg(feature = "log")]
        log::debug!("handle attached, token={}, layers={stack_len}", self.token.0);
        Ok(())
    }

    /// Dispatches a bottom-up readiness event starting at `from_layer`
    /// (normally 0, the transport). Stops at the first layer that reports
    /// `Consumed`.
    pub fn dispatch_event(
        &mut self,
        from_layer: usize,
        event: LayerEvent,
        waker: Option<&Waker>,
    ) -> io::Result<Vec<(Token, usize, LayerEvent)>> {
        let mut pending = Vec::new();
        let mut layers = self.layers.write().unwrap();
        let stack_len = layers.len();
        let mut current = event;
        for idx in from_layer..stack_len {
            let mut ctx = LayerContext {
                token: self.token,
                layer_index: idx,
                stack_len,
                waker,
                pending_soft_events: &mut pending,
            };
            match layers[idx].process_event(&mut ctx, current.clone())? {
                EventDisposition::Consumed => break,
                EventDisposition::PassUp => {
                    if idx + 1 >= stack_len {
                        break;
                    }
                }
            }
        }
        Ok(pending)
    }

    /// Dispatches a top-down write starting at the topmost layer; each
    /// layer's `write` is expected to call down into the one below it as
    /// part of its own implementation (this just invokes the top).
    pub fn write(&mut self, buf: &[u8], waker: Option<&Waker>) -> io::Result<usize> {
        let mut pending = Vec::new();
        let mut layers = self.layers.write().unwrap();
        let stack_len = layers.len();
        if stack_len == 0 {
            return Ok(0);
        }
        let top = stack_len - 1;
        let mut ctx = LayerContext {
            token: self.token,
            layer_index: top,
            stack_len,
            waker,
            pending_soft_events: &mut pending,
        };
        layers[top].write(&mut ctx, buf)
    }

    /// Dispatches a bottom-up read: layer 0 fills `buf` from the transport,
    /// then each layer above transforms the previous layer's output in
    /// place (decrypting, de-shaping, ...), the slice shrinking to whatever
    /// length the layer below actually produced. Returns the length the
    /// topmost layer produced.
    pub fn read(&mut self, buf: &mut [u8], waker: Option<&Waker>) -> io::Result<usize> {
        let mut pending = Vec::new();
        let mut layers = self.layers.write().unwrap();
        let stack_len = layers.len();
        if stack_len == 0 {
            return Ok(0);
        }
        let mut len = buf.len();
        for (idx, layer) in layers.iter_mut().enumerate() {
            let mut ctx = LayerContext {
                token: self.token,
                layer_index: idx,
                stack_len,
                waker,
                pending_soft_events: &mut pending,
            };
            len = layer.read(&mut ctx, &mut buf[..len])?;
            if len == 0 {
                break;
            }
        }
        Ok(len)
    }

    /// Half-close: flush is the caller's responsibility before calling this
    /// (the handle itself has no flush-tracking state); this just runs
    /// `unregister` top-down.
    pub fn disconnect(&mut self, waker: Option<&Waker>) {
        if self.state != HandleState::Attached {
            return;
        }
        self.state = HandleState::Disconnecting;
        #[cfg(feature = "log")]
        log::debug!("handle disconnecting, token={}", self.token.0);
        let mut pending = Vec::new();
        let mut layers = self.layers.write().unwrap();
        let stack_len = layers.len();
        for idx in (0..stack_len).rev() {
            let mut ctx = LayerContext {
                token: self.token,
                layer_index: idx,
                stack_len,
                waker,
                pending_soft_events: &mut pending,
            };
            layers[idx].unregister(&mut ctx);
        }
    }

    /// Hard close: destroys layers top-down so filters observe the
    /// transport disappearing first.
    pub fn destroy(mut self, waker: Option<&Waker>) {
        self.state = HandleState::Destroyed;
        let mut pending = Vec::new();
        let mut layers = std::mem::take(&mut *self.layers.write().unwrap());
        let stack_len = layers.len();
        while let Some(layer) = layers.pop() {
            let idx = layers.len();
            let mut ctx = LayerContext {
                token: self.token,
                layer_index: idx,
                stack_len,
                waker,
                pending_soft_events: &mut pending,
            };
            layer.destroy(&mut ctx);
        }
    }
}
