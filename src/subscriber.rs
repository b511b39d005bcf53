use crate::frame::FrameDescriptor;

/// Frame consumer capability
///
/// Implemented by downstream stages (inference, encoding, preview) that
/// want frames from the broker. Callbacks run on broker worker threads.
pub trait FrameSubscriber: Send + Sync {
    /// Frame delivery callback.
    ///
    /// Runs synchronously inside a worker; return promptly. The descriptor
    /// and its backing memory must not be retained past return, and the
    /// callback must not call back into the broker's publish or
    /// subscribe/unsubscribe paths.
    fn on_frame(&self, frame: &FrameDescriptor);

    /// Stable name used in logs and diagnostics.
    fn subscriber_name(&self) -> &str;

    /// Scheduling priority, 0-255; higher dispatches first.
    fn priority(&self) -> u8 {
        128
    }

    /// Notification that the subscriber was explicitly removed.
    fn on_unsubscribed(&self) {}
}
