use bytes::Bytes;
use std::{fmt, sync::Arc};

use crate::{
    common::ByteStr,
    postgres::{
        ColumnDescriptor, DatabaseError, Oid, TransactionStatus,
        backend::{CopyResponse, NotificationResponse},
    },
    Error,
};

/// Identify a request submitted to a [`Session`][super::Session].
///
/// Every [`Event`] carry the id of the request it belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) u64);

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A response routed to the request that caused it.
#[derive(Debug)]
pub enum Event {
    /// `ReadyForQuery`, the request group is finished.
    Ready { id: RequestId, status: TransactionStatus },
    ParseComplete { id: RequestId },
    BindComplete { id: RequestId },
    ParameterDescription { id: RequestId, types: Vec<Oid> },
    RowDescription { id: RequestId, columns: Arc<[ColumnDescriptor]> },
    NoData { id: RequestId },
    DataRow { id: RequestId, values: Vec<Option<Bytes>> },
    CommandComplete { id: RequestId, tag: ByteStr },
    EmptyQuery { id: RequestId },
    PortalSuspended { id: RequestId },
    CloseComplete { id: RequestId },
    CopyIn { id: RequestId, response: CopyResponse },
    CopyOut { id: RequestId, response: CopyResponse },
    CopyData { id: RequestId, data: Bytes },
    CopyDone { id: RequestId },
    /// The request failed, the group is drained until `ReadyForQuery`.
    Error { id: RequestId, error: Error },
    /// The request was skipped because an earlier request of its pipeline failed.
    Aborted { id: RequestId },
}

impl Event {
    pub fn id(&self) -> RequestId {
        match self {
            Event::Ready { id, .. }
            | Event::ParseComplete { id }
            | Event::BindComplete { id }
            | Event::ParameterDescription { id, .. }
            | Event::RowDescription { id, .. }
            | Event::NoData { id }
            | Event::DataRow { id, .. }
            | Event::CommandComplete { id, .. }
            | Event::EmptyQuery { id }
            | Event::PortalSuspended { id }
            | Event::CloseComplete { id }
            | Event::CopyIn { id, .. }
            | Event::CopyOut { id, .. }
            | Event::CopyData { id, .. }
            | Event::CopyDone { id }
            | Event::Error { id, .. }
            | Event::Aborted { id } => *id,
        }
    }
}

/// Message the server may send at any time, outside of any request.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// `NOTIFY` delivered to a channel this session `LISTEN` on.
    Notification(NotificationResponse),
    /// Warning or informational message.
    Notice(DatabaseError),
    /// A run-time parameter changed.
    ParameterStatus { name: ByteStr, value: ByteStr },
}
