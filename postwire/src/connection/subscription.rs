use futures_core::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::session::AsyncMessage;

/// Stream of [`AsyncMessage`] received by a connection.
///
/// Messages are delivered while the connection is driven, by running queries
/// or by [`Connection::wait_async_message`][super::Connection::wait_async_message].
/// The stream ends when the connection is dropped or subscribed again.
#[derive(Debug)]
pub struct Subscription {
    pub(super) rx: UnboundedReceiver<AsyncMessage>,
}

impl Subscription {
    /// Receive the next message.
    pub async fn recv(&mut self) -> Option<AsyncMessage> {
        self.rx.recv().await
    }

    /// Receive a message already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<AsyncMessage> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = AsyncMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
