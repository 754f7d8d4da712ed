//! Legal lifecycle transitions.

use shoal_protocol::ShardState;

/// Whether `from -> to` is a legal lifecycle step.
///
/// The happy path is Created -> LoggingIn -> AwaitingReady -> Ready. A lost
/// connection sends any live state to Disconnected, a reconnect goes back
/// through AwaitingReady, and Faulted is terminal.
pub(crate) fn transition_allowed(from: ShardState, to: ShardState) -> bool {
    use ShardState::*;
    match (from, to) {
        (Created, LoggingIn) => true,
        (LoggingIn, AwaitingReady) => true,
        (AwaitingReady, Ready) => true,
        (LoggingIn | AwaitingReady | Ready, Disconnected) => true,
        (Disconnected, AwaitingReady) => true,
        (from, Faulted) => from != Faulted,
        _ => false,
    }
}
