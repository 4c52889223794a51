//! Presentation side channel: the active-connection indicator.

use tracing::info;

/// Receiver of indicator signals
pub trait Presentation: Send + Sync {
    /// Session is connected with nobody watching
    fn show_indicator(&self, peer: &str);
    /// Observer attached or session ended
    fn clear_indicator(&self);
    /// Session stopped for good
    fn session_ended(&self);
}

/// Presentation that reports indicator changes through tracing
#[derive(Debug, Clone, Default)]
pub struct LogPresentation;

impl Presentation for LogPresentation {
    fn show_indicator(&self, peer: &str) {
        info!(component = "indicator", "Connected to {}", peer);
    }

    fn clear_indicator(&self) {
        info!(component = "indicator", "Indicator cleared");
    }

    fn session_ended(&self) {
        info!(component = "indicator", "Session ended");
    }
}
