//! Connection lifecycle.
//!
//! Holds the controller state enumeration and the RAII owner of a live
//! transport.

use tracing::debug;

use crate::ble::adapter::GattConnection;

/// Lifecycle state of a device controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControllerState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Looking for the configured peripheral.
    Scanning,
    /// Waiting for the link to come up.
    Connecting,
    /// Waiting for service discovery to complete.
    DiscoveringServices,
    /// Issuing notification subscriptions.
    Subscribing,
    /// Subscriptions issued; measurements flow to the handler.
    Active,
    /// Releasing the transport.
    Closing,
}

impl ControllerState {
    /// Check if measurements are being delivered.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if a connection attempt or teardown is underway.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::DiscoveringServices | Self::Subscribing | Self::Closing
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Active => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

/// Exclusive owner of one live transport.
///
/// The transport is closed exactly once, either through [`ConnectionHandle::close`]
/// or when the handle is dropped.
pub struct ConnectionHandle<C: GattConnection> {
    connection: C,
    closed: bool,
}

impl<C: GattConnection> ConnectionHandle<C> {
    /// Take ownership of an open connection.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            closed: false,
        }
    }

    /// Address of the connected peripheral.
    pub fn address(&self) -> &str {
        self.connection.address()
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Mutably borrow the underlying connection.
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Close the transport.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if !self.closed {
            debug!("Closing connection to {}", self.connection.address());
            self.connection.close();
            self.closed = true;
        }
    }
}

impl<C: GattConnection> Drop for ConnectionHandle<C> {
    fn drop(&mut self) {
        self.close_inner();
    }
}
