use std::io;

use thiserror::Error;

/// Why a line could not be handed to a session's transport.
///
/// Broadcasters only log this; the affected session notices on its own task
/// and tears itself down.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("session is closed")]
    Closed,

    #[error("failed to write to session transport")]
    Io(#[from] io::Error),
}
