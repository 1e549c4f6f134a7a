//! Routes and the output channels they are emitted on

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Message;

/// Output channel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Submitted,
    Retry,
    DeadLetter,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Retry => write!(f, "retry"),
            Self::DeadLetter => write!(f, "dead-letter"),
        }
    }
}

/// The single output produced for one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Envelope carrying the request and its new job
    Submitted(Message),

    /// Request with its attempt counter bumped, to be re-delivered later
    Retry(Message),

    /// Serialized request (or raw payload) for manual handling
    DeadLetter(String),
}

impl Route {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Submitted(_) => Channel::Submitted,
            Self::Retry(_) => Channel::Retry,
            Self::DeadLetter(_) => Channel::DeadLetter,
        }
    }
}

/// Sending halves of the three output channels
#[derive(Clone)]
pub struct Outputs {
    submitted: mpsc::Sender<Message>,
    retry: mpsc::Sender<Message>,
    dead_letter: mpsc::Sender<String>,
}

/// Receiving halves of the three output channels
pub struct OutputReceivers {
    pub submitted: mpsc::Receiver<Message>,
    pub retry: mpsc::Receiver<Message>,
    pub dead_letter: mpsc::Receiver<String>,
}

impl Outputs {
    /// Create the three bounded channels
    pub fn channel(capacity: usize) -> (Self, OutputReceivers) {
        debug!(capacity, "Outputs::channel: called");
        let (submitted_tx, submitted_rx) = mpsc::channel(capacity);
        let (retry_tx, retry_rx) = mpsc::channel(capacity);
        let (dead_letter_tx, dead_letter_rx) = mpsc::channel(capacity);
        (
            Self {
                submitted: submitted_tx,
                retry: retry_tx,
                dead_letter: dead_letter_tx,
            },
            OutputReceivers {
                submitted: submitted_rx,
                retry: retry_rx,
                dead_letter: dead_letter_rx,
            },
        )
    }

    /// Send a route to its channel
    pub async fn emit(&self, route: Route) -> eyre::Result<()> {
        let channel = route.channel();
        debug!(%channel, "Outputs::emit: called");
        let sent = match route {
            Route::Submitted(message) => self.submitted.send(message).await.is_ok(),
            Route::Retry(message) => self.retry.send(message).await.is_ok(),
            Route::DeadLetter(record) => self.dead_letter.send(record).await.is_ok(),
        };
        if !sent {
            return Err(eyre::eyre!("{} channel closed", channel));
        }
        Ok(())
    }
}
