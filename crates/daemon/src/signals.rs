//! Shutdown signal handling for the daemon.

use std::fmt;

use tracing::{error, info};

/// The signal that ended the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolve once SIGINT or SIGTERM arrives.
///
/// A handler that cannot be installed never fires; the other one still
/// ends the daemon.
pub async fn wait_for_shutdown() -> Shutdown {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => Shutdown::Interrupt,
        _ = terminate => Shutdown::Terminate,
    };
    info!(signal = %received, "shutdown signal received");
    received
}
