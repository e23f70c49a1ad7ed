//! Wire protocol message model.
//!
//! A [`Message`] is the single envelope for everything on the wire:
//! method calls, responses, event notifications, subscription control,
//! and service discovery. Messages are constructed fresh per send and
//! immutable once encoded.

use bytes::Bytes;
use ferrobus_types::ServiceKey;

/// Wire protocol version stamped into every header.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Interface version used when the application does not specify one.
pub const DEFAULT_INTERFACE_VERSION: u8 = 0x01;

/// The message-type byte of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Method call expecting a response.
    Request,
    /// Fire-and-forget method call.
    RequestNoReturn,
    /// One-way event payload delivered to a subscriber.
    Notification,
    /// Subscribe to an event of a service.
    Subscribe,
    /// Withdraw a subscription.
    Unsubscribe,
    /// Confirms a subscription to the subscriber.
    SubscribeAck,
    /// Announces that a service is offered.
    OfferService,
    /// Searches for a service.
    FindService,
    /// Withdraws a previously offered service.
    StopOfferService,
    /// Successful answer to a `Request`.
    Response,
    /// Failed answer to a `Request`; the return code carries the reason.
    Error,
}

impl MessageType {
    /// Wire encoding of this message type.
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Request => 0x00,
            MessageType::RequestNoReturn => 0x01,
            MessageType::Notification => 0x02,
            MessageType::Subscribe => 0x06,
            MessageType::Unsubscribe => 0x07,
            MessageType::SubscribeAck => 0x08,
            MessageType::OfferService => 0x10,
            MessageType::FindService => 0x11,
            MessageType::StopOfferService => 0x12,
            MessageType::Response => 0x80,
            MessageType::Error => 0x81,
        }
    }

    /// Parse a wire type byte. `None` for unrecognised values.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(MessageType::Request),
            0x01 => Some(MessageType::RequestNoReturn),
            0x02 => Some(MessageType::Notification),
            0x06 => Some(MessageType::Subscribe),
            0x07 => Some(MessageType::Unsubscribe),
            0x08 => Some(MessageType::SubscribeAck),
            0x10 => Some(MessageType::OfferService),
            0x11 => Some(MessageType::FindService),
            0x12 => Some(MessageType::StopOfferService),
            0x80 => Some(MessageType::Response),
            0x81 => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// The return-code byte of the fixed header.
///
/// Meaningful on `Response` and `Error` messages; `Ok` everywhere else.
/// Unrecognised bytes decode to [`ReturnCode::Reserved`] so decoding
/// stays total over the full u8 space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// No error.
    Ok,
    /// Unspecified failure in the method handler.
    NotOk,
    /// The requested service is not offered here.
    UnknownService,
    /// The service is offered but the method id is not known.
    UnknownMethod,
    /// The service is known but cannot be reached.
    NotReachable,
    /// The remote side gave up on the request.
    Timeout,
    /// Any return code this implementation does not interpret.
    Reserved(u8),
}

impl ReturnCode {
    /// Wire encoding of this return code.
    pub fn to_byte(self) -> u8 {
        match self {
            ReturnCode::Ok => 0x00,
            ReturnCode::NotOk => 0x01,
            ReturnCode::UnknownService => 0x02,
            ReturnCode::UnknownMethod => 0x03,
            ReturnCode::NotReachable => 0x05,
            ReturnCode::Timeout => 0x06,
            ReturnCode::Reserved(byte) => byte,
        }
    }

    /// Parse a wire return-code byte. Never fails.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => ReturnCode::Ok,
            0x01 => ReturnCode::NotOk,
            0x02 => ReturnCode::UnknownService,
            0x03 => ReturnCode::UnknownMethod,
            0x05 => ReturnCode::NotReachable,
            0x06 => ReturnCode::Timeout,
            other => ReturnCode::Reserved(other),
        }
    }
}

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The service instance this message concerns.
    pub key: ServiceKey,
    /// Method id for calls, event id for notifications and subscriptions,
    /// zero for discovery messages.
    pub method: u16,
    /// Id of the client endpoint that originated the exchange.
    pub client: u16,
    /// Correlation tag pairing a request with its response.
    pub session: u16,
    /// Wire protocol version.
    pub protocol_version: u8,
    /// Version of the service interface being spoken.
    pub interface_version: u8,
    /// Message type.
    pub kind: MessageType,
    /// Return code (meaningful on responses).
    pub return_code: ReturnCode,
    /// Application payload.
    pub payload: Bytes,
}

impl Message {
    fn base(key: ServiceKey, method: u16, kind: MessageType) -> Self {
        Self {
            key,
            method,
            client: 0,
            session: 0,
            protocol_version: PROTOCOL_VERSION,
            interface_version: DEFAULT_INTERFACE_VERSION,
            kind,
            return_code: ReturnCode::Ok,
            payload: Bytes::new(),
        }
    }

    /// Build a method call.
    pub fn request(
        key: ServiceKey,
        method: u16,
        client: u16,
        session: u16,
        payload: Bytes,
    ) -> Self {
        Self {
            client,
            session,
            payload,
            ..Self::base(key, method, MessageType::Request)
        }
    }

    /// Build a fire-and-forget method call. No session is allocated:
    /// the receiver never answers it.
    pub fn request_no_return(key: ServiceKey, method: u16, client: u16, payload: Bytes) -> Self {
        Self {
            client,
            payload,
            ..Self::base(key, method, MessageType::RequestNoReturn)
        }
    }

    /// Build a successful response to `request`, preserving its
    /// correlation ids.
    pub fn response(request: &Message, payload: Bytes) -> Self {
        Self {
            client: request.client,
            session: request.session,
            interface_version: request.interface_version,
            payload,
            ..Self::base(request.key, request.method, MessageType::Response)
        }
    }

    /// Build an error response to `request` carrying `code`.
    pub fn error_response(request: &Message, code: ReturnCode) -> Self {
        Self {
            client: request.client,
            session: request.session,
            interface_version: request.interface_version,
            return_code: code,
            ..Self::base(request.key, request.method, MessageType::Error)
        }
    }

    /// Build an event notification addressed to one subscriber.
    pub fn notification(key: ServiceKey, event: u16, subscriber: u16, payload: Bytes) -> Self {
        Self {
            client: subscriber,
            payload,
            ..Self::base(key, event, MessageType::Notification)
        }
    }

    /// Build a subscription request for an event.
    pub fn subscribe(key: ServiceKey, event: u16, client: u16) -> Self {
        Self {
            client,
            ..Self::base(key, event, MessageType::Subscribe)
        }
    }

    /// Build a subscription withdrawal.
    pub fn unsubscribe(key: ServiceKey, event: u16, client: u16) -> Self {
        Self {
            client,
            ..Self::base(key, event, MessageType::Unsubscribe)
        }
    }

    /// Build the acknowledgement for a received `Subscribe`.
    pub fn subscribe_ack(subscribe: &Message) -> Self {
        Self {
            client: subscribe.client,
            ..Self::base(subscribe.key, subscribe.method, MessageType::SubscribeAck)
        }
    }

    /// Build a service announcement.
    pub fn offer(key: ServiceKey) -> Self {
        Self::base(key, 0, MessageType::OfferService)
    }

    /// Build a service search.
    pub fn find(key: ServiceKey) -> Self {
        Self::base(key, 0, MessageType::FindService)
    }

    /// Build a service withdrawal.
    pub fn stop_offer(key: ServiceKey) -> Self {
        Self::base(key, 0, MessageType::StopOfferService)
    }
}
