use std::fmt::{self, Display};

/// Why a provider connection closed.
///
/// Codes follow the status codes reported by the protocol sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    UnavailableService,
    RestartRequired,
    Unknown(Option<u16>),
}

impl DisconnectReason {
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(403) => Self::Forbidden,
            Some(408) => Self::ConnectionLost,
            Some(411) => Self::MultideviceMismatch,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(503) => Self::UnavailableService,
            Some(515) => Self::RestartRequired,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            Self::LoggedOut => Some(401),
            Self::Forbidden => Some(403),
            Self::ConnectionLost => Some(408),
            Self::MultideviceMismatch => Some(411),
            Self::ConnectionClosed => Some(428),
            Self::ConnectionReplaced => Some(440),
            Self::BadSession => Some(500),
            Self::UnavailableService => Some(503),
            Self::RestartRequired => Some(515),
            Self::Unknown(code) => *code,
        }
    }

    /// Only a logout is terminal; every other reason is retried.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::LoggedOut => "loggedOut",
            Self::Forbidden => "forbidden",
            Self::ConnectionLost => "connectionLost",
            Self::MultideviceMismatch => "multideviceMismatch",
            Self::ConnectionClosed => "connectionClosed",
            Self::ConnectionReplaced => "connectionReplaced",
            Self::BadSession => "badSession",
            Self::UnavailableService => "unavailableService",
            Self::RestartRequired => "restartRequired",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} ({})", self.name(), code),
            None => write!(f, "{}", self.name()),
        }
    }
}
