//! Structured logging for IKE operations
//!
//! Provides structured, contextual logging using the `tracing` framework.
//! All log messages include relevant context fields for debugging and
//! monitoring.
//!
//! # Log Levels
//!
//! - **TRACE**: Message contents and payload lists
//! - **DEBUG**: Dropped datagrams, retransmissions, EAP rounds
//! - **INFO**: State transitions, handshake and rekey events
//! - **WARN**: Unusual but recoverable conditions
//! - **ERROR**: Fatal session failures

use tracing::{debug, info, warn};

/// Log a session state transition
pub fn log_session_transition(from: &str, to: &str) {
    info!(state_from = from, state_to = to, "IKE session state transition");
}

/// Log successful establishment of the IKE SA
pub fn log_ike_established(spi_i: &[u8], spi_r: &[u8]) {
    info!(
        ike_spi_i = %hex::encode(spi_i),
        ike_spi_r = %hex::encode(spi_r),
        "IKE SA established"
    );
}

/// Log the start of an IKE SA rekey
pub fn log_ike_rekey_start(old_spi_i: &[u8], old_spi_r: &[u8]) {
    info!(
        old_spi_i = %hex::encode(old_spi_i),
        old_spi_r = %hex::encode(old_spi_r),
        "IKE SA rekey started"
    );
}

/// Log completion of an IKE SA rekey
pub fn log_ike_rekey_complete(new_spi_i: &[u8], new_spi_r: &[u8]) {
    info!(
        new_spi_i = %hex::encode(new_spi_i),
        new_spi_r = %hex::encode(new_spi_r),
        "IKE SA rekey completed"
    );
}

/// Log the resolution of a simultaneous rekey
pub fn log_rekey_collision(local_candidate_won: bool) {
    warn!(
        survivor = if local_candidate_won { "local" } else { "remote" },
        "Simultaneous IKE rekey resolved by nonce comparison"
    );
}

/// Log a retransmission attempt
pub fn log_retransmit(attempt: u32) {
    debug!(attempt, "Retransmitting request");
}

/// Log an inbound EAP round
pub fn log_eap_round(method_type: u8, outcome: &str) {
    debug!(method_type, outcome, "EAP round processed");
}
