//! Request pipeline hooks.
//!
//! Handlers are plain `Send + Sync` closures. With an asynchronous
//! transport they may run on whatever thread completes the transport
//! future, not on the thread that started the save or query.

use crate::error::{ClientError, ClientResult};
use http::Method;
use odata_protocol::{HeaderCollection, RequestMessage, ResponseMessage};
use odata_tracking::DescriptorKey;
use std::fmt;
use std::sync::Arc;

/// Request data a building-request handler may rewrite.
#[derive(Debug, Clone)]
pub struct BuildingRequestArgs {
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: String,
    /// Headers computed so far.
    pub headers: HeaderCollection,
    pub(crate) descriptor: Option<DescriptorKey>,
}

impl BuildingRequestArgs {
    pub(crate) fn new(
        method: Method,
        uri: String,
        headers: HeaderCollection,
        descriptor: Option<DescriptorKey>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            descriptor,
        }
    }

    /// Descriptor the request is for, if it is part of a save.
    #[must_use]
    pub fn descriptor(&self) -> Option<&DescriptorKey> {
        self.descriptor.as_ref()
    }
}

/// The constructed request, which a sending-request handler may replace.
#[derive(Debug, Clone)]
pub struct SendingRequestArgs {
    /// The request about to be sent or written into a batch.
    pub request: RequestMessage,
    descriptor: Option<DescriptorKey>,
    is_batch_part: bool,
}

impl SendingRequestArgs {
    pub(crate) fn new(
        request: RequestMessage,
        descriptor: Option<DescriptorKey>,
        is_batch_part: bool,
    ) -> Self {
        Self {
            request,
            descriptor,
            is_batch_part,
        }
    }

    /// Descriptor the request is for, if it is part of a save.
    #[must_use]
    pub fn descriptor(&self) -> Option<&DescriptorKey> {
        self.descriptor.as_ref()
    }

    /// True for a part of a batch request.
    #[must_use]
    pub fn is_batch_part(&self) -> bool {
        self.is_batch_part
    }
}

/// A received response, or its absence after a transport failure.
#[derive(Debug, Clone, Copy)]
pub struct ReceivingResponseArgs<'a> {
    /// The response. `None` if the transport failed without one.
    pub response: Option<&'a ResponseMessage>,
    /// Descriptor the response is for, if it is part of a save.
    pub descriptor: Option<&'a DescriptorKey>,
    /// True for a part of a batch response.
    pub is_batch_part: bool,
}

type BuildingHandler = Arc<dyn Fn(&mut BuildingRequestArgs) + Send + Sync>;
type LegacySendingHandler = Arc<dyn Fn(&mut RequestMessage) + Send + Sync>;
type SendingHandler = Arc<dyn Fn(&mut SendingRequestArgs) + Send + Sync>;
type ReceivingHandler = Arc<dyn Fn(&ReceivingResponseArgs<'_>) + Send + Sync>;

/// Registered sending-request observers. Only one kind can be present.
#[derive(Clone, Default)]
pub enum SendingRequestHook {
    /// Nothing registered.
    #[default]
    None,
    /// Legacy handlers, fired for top-level requests only.
    Legacy(Vec<LegacySendingHandler>),
    /// Modern handlers, fired for top-level requests and batch parts.
    Modern(Vec<SendingHandler>),
}

impl fmt::Debug for SendingRequestHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Legacy(h) => write!(f, "Legacy({} handlers)", h.len()),
            Self::Modern(h) => write!(f, "Modern({} handlers)", h.len()),
        }
    }
}

/// Event handlers of one client.
#[derive(Clone, Default)]
pub struct ClientEvents {
    building: Vec<BuildingHandler>,
    sending: SendingRequestHook,
    receiving: Vec<ReceivingHandler>,
}

impl fmt::Debug for ClientEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEvents")
            .field("building", &self.building.len())
            .field("sending", &self.sending)
            .field("receiving", &self.receiving.len())
            .finish()
    }
}

impl ClientEvents {
    /// Creates an empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler that may rewrite method, URI and headers before
    /// the request is constructed.
    pub fn on_building_request<F>(&mut self, handler: F)
    where
        F: Fn(&mut BuildingRequestArgs) + Send + Sync + 'static,
    {
        self.building.push(Arc::new(handler));
    }

    /// Registers a legacy sending-request handler.
    ///
    /// Fails if a modern handler is registered.
    pub fn on_sending_request<F>(&mut self, handler: F) -> ClientResult<()>
    where
        F: Fn(&mut RequestMessage) + Send + Sync + 'static,
    {
        match &mut self.sending {
            SendingRequestHook::Modern(_) => Err(ClientError::EventConflict {
                message: "a sending-request handler is already registered; \
                          the legacy event cannot be combined with it"
                    .into(),
            }),
            SendingRequestHook::Legacy(handlers) => {
                handlers.push(Arc::new(handler));
                Ok(())
            }
            SendingRequestHook::None => {
                self.sending = SendingRequestHook::Legacy(vec![Arc::new(handler)]);
                Ok(())
            }
        }
    }

    /// Registers a sending-request handler that sees batch parts too.
    ///
    /// Fails if a legacy handler is registered.
    pub fn on_sending_request2<F>(&mut self, handler: F) -> ClientResult<()>
    where
        F: Fn(&mut SendingRequestArgs) + Send + Sync + 'static,
    {
        match &mut self.sending {
            SendingRequestHook::Legacy(_) => Err(ClientError::EventConflict {
                message: "a legacy sending-request handler is already registered".into(),
            }),
            SendingRequestHook::Modern(handlers) => {
                handlers.push(Arc::new(handler));
                Ok(())
            }
            SendingRequestHook::None => {
                self.sending = SendingRequestHook::Modern(vec![Arc::new(handler)]);
                Ok(())
            }
        }
    }

    /// Registers a response observer.
    pub fn on_receiving_response<F>(&mut self, handler: F)
    where
        F: Fn(&ReceivingResponseArgs<'_>) + Send + Sync + 'static,
    {
        self.receiving.push(Arc::new(handler));
    }

    /// The registered sending-request hook.
    #[must_use]
    pub fn sending_hook(&self) -> &SendingRequestHook {
        &self.sending
    }

    pub(crate) fn fire_building(&self, args: &mut BuildingRequestArgs) {
        for handler in &self.building {
            handler(args);
        }
    }

    pub(crate) fn fire_sending(&self, args: &mut SendingRequestArgs) {
        match &self.sending {
            SendingRequestHook::None => {}
            SendingRequestHook::Legacy(handlers) => {
                if !args.is_batch_part {
                    for handler in handlers {
                        handler(&mut args.request);
                    }
                }
            }
            SendingRequestHook::Modern(handlers) => {
                for handler in handlers {
                    handler(args);
                }
            }
        }
    }

    pub(crate) fn fire_receiving(&self, args: &ReceivingResponseArgs<'_>) {
        for handler in &self.receiving {
            handler(args);
        }
    }
}
