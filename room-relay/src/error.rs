//! Error types for the room relay
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::room::RoomId;
use thiserror::Error;

/// Room relay error
#[derive(Debug, Error)]
pub enum RelayError {
    /// Operation attempted on a room that has already been torn down
    #[error("Attempt to use an invalid room: {0}")]
    InvalidRoom(RoomId),

    /// Transport failed to start, send or disconnect
    #[error("Transport error: {0}")]
    Transport(String),

    /// Socket-level failure
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(#[from] relay_config::ConfigError),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
