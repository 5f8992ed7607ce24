/// Foreground/background notifications from the host application.
///
/// The host adapts its own notification mechanism to these two
/// edge-triggered signals and passes them to [`Client::handle_lifecycle`].
///
/// [`Client::handle_lifecycle`]: crate::Client::handle_lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The application moved to the background; connection is suspended.
    EnteredBackground,
    /// The application became active; connection is resumed.
    BecameActive,
}
