//! Broadcast channel of whole agendas
//!
//! The dispatcher is hot: subscribers only see agendas published after they
//! subscribed. It never completes and never fails; individual agendas do.

use std::fmt;

use crate::agenda::SharedAgenda;
use crate::subject::{Subject, Subscription};

/// Multicast channel whose elements are agendas.
pub struct Dispatcher<A> {
    subject: Subject<SharedAgenda<A>>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            subject: self.subject.clone(),
        }
    }
}

impl<A> Default for Dispatcher<A> {
    fn default() -> Self {
        Self {
            subject: Subject::default(),
        }
    }
}

impl<A: Send + Sync + 'static> Dispatcher<A> {
    /// Create a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `agenda` to every current subscriber, then seal it.
    pub fn publish(&self, agenda: &SharedAgenda<A>) {
        tracing::trace!(
            agenda = agenda.id(),
            subscribers = self.subject.observer_count(),
            "Publishing agenda"
        );
        self.subject.next(agenda);
        agenda.seal();
    }

    /// Receive every agenda published from now on.
    pub fn subscribe(
        &self,
        observer: impl Fn(&SharedAgenda<A>) + Send + Sync + 'static,
    ) -> Subscription {
        self.subject.subscribe(observer)
    }

    /// Number of subscribers (stores plus loggers).
    pub fn subscriber_count(&self) -> usize {
        self.subject.observer_count()
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
