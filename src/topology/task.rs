use super::{BindingKey, ExchangeDeclaration, QueueDeclaration, TopologyError};
use crate::deferred::Completion;
use std::fmt;

pub(crate) type TopologyCompletion = Completion<(), TopologyError>;

/// The kind of a topology operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyTaskKind {
    DeclareExchange,
    DeclareQueue,
    Bind,
    Unbind,
}

impl fmt::Display for TopologyTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclareExchange => write!(f, "exchange declaration"),
            Self::DeclareQueue => write!(f, "queue declaration"),
            Self::Bind => write!(f, "queue binding"),
            Self::Unbind => write!(f, "queue unbinding"),
        }
    }
}

/// A topology operation waiting for the drain loop, with the handle its caller awaits.
pub(crate) enum TopologyTask {
    DeclareExchange {
        declaration: ExchangeDeclaration,
        completion: TopologyCompletion,
    },
    DeclareQueue {
        declaration: QueueDeclaration,
        completion: TopologyCompletion,
    },
    Bind {
        binding: BindingKey,
        completion: TopologyCompletion,
    },
    Unbind {
        binding: BindingKey,
        completion: TopologyCompletion,
    },
}

impl TopologyTask {
    pub(crate) fn kind(&self) -> TopologyTaskKind {
        match self {
            Self::DeclareExchange { .. } => TopologyTaskKind::DeclareExchange,
            Self::DeclareQueue { .. } => TopologyTaskKind::DeclareQueue,
            Self::Bind { .. } => TopologyTaskKind::Bind,
            Self::Unbind { .. } => TopologyTaskKind::Unbind,
        }
    }

    /// What the task operates on, for logs and errors.
    pub(crate) fn target(&self) -> String {
        match self {
            Self::DeclareExchange { declaration, .. } => declaration.name.clone(),
            Self::DeclareQueue { declaration, .. } => declaration.name.clone(),
            Self::Bind { binding, .. } | Self::Unbind { binding, .. } => binding.to_string(),
        }
    }
}
