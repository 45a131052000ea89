// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connectivity switch for tests.

use tokio::sync::watch;

use sonar_core::NetworkStateProvider;

pub struct MockNetwork {
    state: watch::Sender<bool>,
}

impl MockNetwork {
    pub fn new(connected: bool) -> Self {
        Self {
            state: watch::Sender::new(connected),
        }
    }

    /// Change connectivity and wake every subscriber.
    pub fn set_connected(&self, connected: bool) {
        self.state.send_replace(connected);
    }
}

impl NetworkStateProvider for MockNetwork {
    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
