use amq_protocol_types::{FieldTable, ShortShortUInt, ShortString, Timestamp};
use lapin::BasicProperties;

/// A message to be published via [`Publisher`](super::Publisher).
#[derive(Debug, Clone, Default)]
pub struct MessageEnvelope {
    pub payload: Vec<u8>,
    /// The exchange the message is published to. Empty for the default exchange.
    pub exchange_name: String,
    /// Used by the exchange to decide which queues get the message.
    pub routing_key: String,
    /// AMQP properties attached to the message.
    pub properties: BasicProperties,
    /// Ask the broker to return the message if no queue is bound to receive it.
    /// Returned messages fail their publish confirmation.
    pub mandatory: bool,
}

impl MessageEnvelope {
    pub fn new<E, R>(exchange_name: E, routing_key: R, payload: Vec<u8>) -> Self
    where
        E: Into<String>,
        R: Into<String>,
    {
        Self {
            payload,
            exchange_name: exchange_name.into(),
            routing_key: routing_key.into(),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, value: Vec<u8>) -> Self {
        self.payload = value;
        self
    }

    pub fn with_exchange_name<E: Into<String>>(mut self, value: E) -> Self {
        self.exchange_name = value.into();
        self
    }

    pub fn with_routing_key<R: Into<String>>(mut self, value: R) -> Self {
        self.routing_key = value.into();
        self
    }

    pub fn with_mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    fn props(mut self, f: impl FnOnce(BasicProperties) -> BasicProperties) -> Self {
        self.properties = f(self.properties);
        self
    }

    pub fn with_content_type(self, value: ShortString) -> Self {
        self.props(|p| p.with_content_type(value))
    }

    pub fn with_content_encoding(self, value: ShortString) -> Self {
        self.props(|p| p.with_content_encoding(value))
    }

    pub fn with_headers(self, value: FieldTable) -> Self {
        self.props(|p| p.with_headers(value))
    }

    /// Non-persistent (1) or persistent (2). Messages are persistent unless set otherwise.
    pub fn with_delivery_mode(self, value: ShortShortUInt) -> Self {
        self.props(|p| p.with_delivery_mode(value))
    }

    pub fn with_priority(self, value: ShortShortUInt) -> Self {
        self.props(|p| p.with_priority(value))
    }

    pub fn with_correlation_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_correlation_id(value))
    }

    pub fn with_reply_to(self, value: ShortString) -> Self {
        self.props(|p| p.with_reply_to(value))
    }

    pub fn with_expiration(self, value: ShortString) -> Self {
        self.props(|p| p.with_expiration(value))
    }

    pub fn with_message_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_message_id(value))
    }

    pub fn with_timestamp(self, value: Timestamp) -> Self {
        self.props(|p| p.with_timestamp(value))
    }

    pub fn with_kind(self, value: ShortString) -> Self {
        self.props(|p| p.with_kind(value))
    }

    pub fn with_app_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_app_id(value))
    }
}
