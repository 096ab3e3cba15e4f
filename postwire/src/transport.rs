//! The [`PgTransport`] trait.
use std::{
    future::poll_fn,
    sync::Arc,
    task::{Context, Poll, ready},
};

use crate::{
    Result,
    codec::CodecRegistry,
    common::verbose,
    session::{Event, Session},
};

/// A driven [`Session`] which can send requests and receive their [`Event`]s.
pub trait PgTransport: Unpin {
    /// Poll to flush buffered requests to the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<Result<()>>;

    /// Poll to receive the next event.
    ///
    /// Calling `poll_event` will also try to [`poll_flush`][1] if there is buffered request.
    ///
    /// Bytes are only read from the io while there is no event ready, so
    /// unconsumed responses stay in the socket.
    ///
    /// [1]: PgTransport::poll_flush
    fn poll_event(&mut self, cx: &mut Context) -> Poll<Result<Event>>;

    /// The session to submit requests into.
    ///
    /// Requests are buffered, caller must also call [`poll_flush`][1] or
    /// [`poll_event`][2] afterwards.
    ///
    /// [1]: PgTransport::poll_flush
    /// [2]: PgTransport::poll_event
    fn session(&mut self) -> &mut Session;

    /// Codecs used to encode parameters and decode rows.
    fn registry(&self) -> &Arc<CodecRegistry>;
}

impl<P> PgTransport for &mut P where P: PgTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_event(&mut self, cx: &mut Context) -> Poll<Result<Event>> {
        P::poll_event(self, cx)
    }

    fn session(&mut self) -> &mut Session {
        P::session(self)
    }

    fn registry(&self) -> &Arc<CodecRegistry> {
        P::registry(self)
    }
}

/// An extension trait to provide `Future` API for [`PgTransport`].
pub trait PgTransportExt: PgTransport {
    /// Poll to discard events of previous requests until the session is idle.
    ///
    /// Requests abandoned midway, such as a dropped row stream, leave their
    /// responses behind, these are consumed before a new request is sent.
    fn poll_drain(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        while !self.session().is_idle() {
            let event = ready!(self.poll_event(cx))?;
            verbose!(?event, "discard");
            if let Event::CopyIn { .. } = event {
                self.session().copy_fail("COPY FROM STDIN abandoned")?;
            }
        }
        Poll::Ready(Ok(()))
    }

    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = Result<()>> {
        poll_fn(|cx| self.poll_flush(cx))
    }

    /// Receive the next event.
    fn event(&mut self) -> impl Future<Output = Result<Event>> {
        poll_fn(|cx| self.poll_event(cx))
    }

    /// Discard events of previous requests.
    fn drain(&mut self) -> impl Future<Output = Result<()>> {
        poll_fn(|cx| self.poll_drain(cx))
    }
}

impl<T> PgTransportExt for T where T: PgTransport { }
