use amq_protocol_types::{AMQPValue, FieldTable, LongString};
use lapin::ExchangeKind;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The name of the broker's nameless default exchange.
///
/// Every queue is implicitly bound to it, using the queue name as routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// The name of RabbitMq's [direct reply-to](https://www.rabbitmq.com/direct-reply-to.html)
/// pseudo-queue. It always exists and can't be declared.
pub const DIRECT_REPLY_TO_QUEUE: &str = "amq.rabbitmq.reply-to";

/// A request for an exchange to exist with a given set of properties.
///
/// Two declarations are considered the same if they have the same name: the broker does not
/// allow two exchanges with the same name, whatever their properties.
#[derive(Debug, Clone)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    /// Auto-delete exchanges are removed by the broker once their last binding is gone.
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl ExchangeDeclaration {
    /// A durable exchange that survives broker restarts.
    pub fn durable<N: Into<String>>(name: N, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            auto_delete: false,
            arguments: FieldTable::default(),
        }
    }

    /// A transient exchange, gone after a broker restart.
    pub fn transient<N: Into<String>>(name: N, kind: ExchangeKind) -> Self {
        Self {
            durable: false,
            ..Self::durable(name, kind)
        }
    }

    #[must_use]
    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    #[must_use]
    pub fn with_argument(mut self, key: &str, value: AMQPValue) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// `true` for the broker's nameless default exchange.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_EXCHANGE
    }
}

impl PartialEq for ExchangeDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ExchangeDeclaration {}

impl Hash for ExchangeDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A request for a queue to exist with a given set of properties.
///
/// Like [`ExchangeDeclaration`], identity is the queue name.
#[derive(Debug, Clone)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    /// Exclusive queues are used by a single connection and deleted when it closes.
    pub exclusive: bool,
    /// Auto-delete queues are removed by the broker once their last consumer goes away.
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl QueueDeclaration {
    /// A durable, shared, long-lived queue.
    pub fn durable<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            arguments: FieldTable::default(),
        }
    }

    /// A throw-away queue, removed by the broker when nobody consumes from it anymore.
    pub fn temporary<N: Into<String>>(name: N) -> Self {
        Self {
            durable: false,
            auto_delete: true,
            ..Self::durable(name)
        }
    }

    #[must_use]
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    #[must_use]
    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    #[must_use]
    pub fn with_argument(mut self, key: &str, value: AMQPValue) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Route rejected and expired messages to the [dead letter exchange](https://www.rabbitmq.com/dlx.html)
    /// called `exchange`.
    ///
    /// Queue arguments are immutable: changing them on an existing queue requires rolling a new one.
    #[must_use]
    pub fn with_dead_letter_exchange(self, exchange: &str) -> Self {
        self.with_argument(
            "x-dead-letter-exchange",
            AMQPValue::LongString(LongString::from(exchange)),
        )
    }

    /// Enable [priority queue](https://www.rabbitmq.com/priority.html) support, up to
    /// `max_priority` (1-255).
    #[must_use]
    pub fn with_max_priority(self, max_priority: u8) -> Self {
        self.with_argument("x-max-priority", AMQPValue::ShortShortUInt(max_priority))
    }

    /// `true` for the direct reply-to pseudo-queue.
    pub fn is_direct_reply_to(&self) -> bool {
        self.name == DIRECT_REPLY_TO_QUEUE
    }
}

impl PartialEq for QueueDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for QueueDeclaration {}

impl Hash for QueueDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A routing rule between an exchange and a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl BindingKey {
    pub fn new<Q, E, R>(queue: Q, exchange: E, routing_key: R) -> Self
    where
        Q: Into<String>,
        E: Into<String>,
        R: Into<String>,
    {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Bindings to the default exchange exist implicitly.
    pub fn is_implicit(&self) -> bool {
        self.exchange == DEFAULT_EXCHANGE
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.exchange, self.queue, self.routing_key
        )
    }
}
