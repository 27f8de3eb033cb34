// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

/// Per-session knobs inherited from the listener config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    keep_alive: u16,
    connect_timeout: u16,
    allow_empty_client_id: bool,
    maximum_inflight_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keep_alive: 60,
            connect_timeout: 60,
            allow_empty_client_id: true,
            maximum_inflight_messages: 20,
        }
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Fallback keep alive in seconds, used when the CONNECT packet sets
    /// none.
    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: u16) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Seconds the peer gets to produce its CONNECT packet.
    #[must_use]
    pub const fn connect_timeout(&self) -> u16 {
        self.connect_timeout
    }

    pub fn set_allow_empty_client_id(&mut self, allow: bool) -> &mut Self {
        self.allow_empty_client_id = allow;
        self
    }

    #[must_use]
    pub const fn allow_empty_client_id(&self) -> bool {
        self.allow_empty_client_id
    }

    pub fn set_maximum_inflight_messages(&mut self, maximum: usize) -> &mut Self {
        self.maximum_inflight_messages = maximum;
        self
    }

    #[must_use]
    pub const fn maximum_inflight_messages(&self) -> usize {
        self.maximum_inflight_messages
    }
}
