//! Host environment signals.
//!
//! The surface that renders the test (a browser shell, a kiosk wrapper, the
//! CLI's stdin) reports focus and presentation changes as
//! [`EnvironmentSignal`]s. The runtime subscribes through an
//! [`EnvironmentSource`] so the transport stays swappable.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::model::ViolationKind;

/// Raw change reported by the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EnvironmentSignal {
    /// The surface lost focus
    FocusLost,
    /// The surface regained focus
    FocusGained,
    /// Full-screen presentation ended
    FullscreenExited,
    /// Full-screen presentation started
    FullscreenEntered,
    /// The surface was hidden
    Hidden,
    /// The surface became visible again
    Visible,
    /// Any other "left the surface" report
    Other {
        /// Free-form description
        #[serde(default)]
        detail: Option<String>,
    },
}

impl EnvironmentSignal {
    /// The violation this signal represents, or `None` for restorations.
    #[must_use]
    pub const fn violation_kind(&self) -> Option<ViolationKind> {
        match self {
            Self::FocusLost => Some(ViolationKind::FocusLost),
            Self::FullscreenExited => Some(ViolationKind::FullscreenExit),
            Self::Hidden => Some(ViolationKind::SurfaceHidden),
            Self::Other { .. } => Some(ViolationKind::Other),
            Self::FocusGained | Self::FullscreenEntered | Self::Visible => None,
        }
    }

    /// Host-supplied detail, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Other { detail } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Something the runtime can subscribe to for environment signals.
pub trait EnvironmentSource: Send + Sync + std::fmt::Debug {
    /// A new receiver that sees every signal sent after this call.
    fn subscribe(&self) -> broadcast::Receiver<EnvironmentSignal>;
}

/// Broadcast-backed source; anything holding a clone can publish.
#[derive(Debug, Clone)]
pub struct ChannelEnvironmentSource {
    tx: broadcast::Sender<EnvironmentSignal>,
}

impl ChannelEnvironmentSource {
    /// Creates a source buffering up to `capacity` undelivered signals per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes a signal; returns how many subscribers received it.
    pub fn publish(&self, signal: EnvironmentSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }
}

impl Default for ChannelEnvironmentSource {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EnvironmentSource for ChannelEnvironmentSource {
    fn subscribe(&self) -> broadcast::Receiver<EnvironmentSignal> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restorations_are_not_violations() {
        assert_eq!(EnvironmentSignal::FocusGained.violation_kind(), None);
        assert_eq!(EnvironmentSignal::FullscreenEntered.violation_kind(), None);
        assert_eq!(EnvironmentSignal::Visible.violation_kind(), None);
        assert_eq!(
            EnvironmentSignal::FullscreenExited.violation_kind(),
            Some(ViolationKind::FullscreenExit)
        );
    }

    #[test]
    fn signals_parse_from_tagged_json() {
        let s: EnvironmentSignal = serde_json::from_str(r#"{"kind":"focus_lost"}"#).unwrap();
        assert_eq!(s, EnvironmentSignal::FocusLost);

        let s: EnvironmentSignal =
            serde_json::from_str(r#"{"kind":"other","detail":"devtools opened"}"#).unwrap();
        assert_eq!(s.detail(), Some("devtools opened"));
    }

    #[tokio::test]
    async fn channel_source_fans_out() {
        let source = ChannelEnvironmentSource::default();
        assert_eq!(source.publish(EnvironmentSignal::Hidden), 0);

        let mut a = source.subscribe();
        let mut b = source.subscribe();
        assert_eq!(source.publish(EnvironmentSignal::FocusLost), 2);
        assert_eq!(a.recv().await.unwrap(), EnvironmentSignal::FocusLost);
        assert_eq!(b.recv().await.unwrap(), EnvironmentSignal::FocusLost);
    }
}
