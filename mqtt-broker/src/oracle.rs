//! Network availability oracle (§6): a boolean liveness check of the
//! underlying network stack, external to the broker itself. Consulted
//! before binding the listener and on every reactor pass; a `false` result
//! is treated as the `DOWN` state and triggers a controlled restart.
//!
//! There is no real liveness backend wired in here (see non-goals) — this
//! mirrors `handler::authenticate`'s always-accept placeholder as the
//! extension point a production deployment would replace.
pub fn network_available() -> bool {
    return true;
}
