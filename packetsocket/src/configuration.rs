use std::{collections::HashSet, sync::Arc};

use crate::{observer::DoNothingObserver, ConnectionObserver};

/// Configuration for a `packetsocket` connection.
#[derive(Clone)]
pub struct Configuration {
    max_payload_length: usize,
    allowed_groups: HashSet<String>,
    max_consecutive_frame_errors: usize,
    max_queued_outbound_frames: usize,
    observer: Arc<dyn ConnectionObserver>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("max_payload_length", &self.max_payload_length)
            .field("allowed_groups", &self.allowed_groups)
            .field(
                "max_consecutive_frame_errors",
                &self.max_consecutive_frame_errors,
            )
            .field(
                "max_queued_outbound_frames",
                &self.max_queued_outbound_frames,
            )
            .finish_non_exhaustive()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_payload_length: 4 * (1 << 20),
            allowed_groups: HashSet::new(),
            max_consecutive_frame_errors: 16,
            max_queued_outbound_frames: 256,
            observer: Arc::new(DoNothingObserver),
        }
    }
}

impl Configuration {
    /// Largest payload this connection sends or accepts. A peer that announces a
    /// larger payload is disconnected; a larger local send fails.
    ///
    /// Default: 4MiB
    pub fn max_payload_length(&mut self, max_payload_length: usize) {
        self.max_payload_length = max_payload_length;
    }

    /// Accept inbound packets of this group. While no group is allowed, every
    /// group is accepted. The wildcard group `"*"` is always accepted.
    pub fn allow_group(&mut self, group: impl Into<String>) {
        self.allowed_groups.insert(group.into());
    }

    /// Replace the accepted groups.
    pub fn allowed_groups(&mut self, groups: impl IntoIterator<Item = impl Into<String>>) {
        self.allowed_groups = groups.into_iter().map(Into::into).collect();
    }

    /// How many frames in a row may fail to resolve or decode before the
    /// connection gives up on the peer.
    ///
    /// Default: 16
    pub fn max_consecutive_frame_errors(&mut self, max_consecutive_frame_errors: usize) {
        self.max_consecutive_frame_errors = max_consecutive_frame_errors;
    }

    /// How many encoded frames may wait for the transport before a send waits
    /// for room in the queue.
    ///
    /// Default: 256
    pub fn max_queued_outbound_frames(&mut self, max_queued_outbound_frames: usize) {
        self.max_queued_outbound_frames = max_queued_outbound_frames;
    }

    /// Where reportable events go.
    ///
    /// Default: nowhere
    pub fn observer(&mut self, observer: impl ConnectionObserver) {
        self.observer = Arc::new(observer);
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_length
    }

    pub(crate) fn frame_error_limit(&self) -> usize {
        self.max_consecutive_frame_errors
    }

    pub(crate) fn outbound_queue_limit(&self) -> usize {
        self.max_queued_outbound_frames.max(1)
    }

    pub(crate) fn connection_observer(&self) -> &Arc<dyn ConnectionObserver> {
        &self.observer
    }

    pub(crate) fn accepts_group(&self, group: &str) -> bool {
        self.allowed_groups.is_empty()
            || group == crate::WILDCARD_GROUP
            || self.allowed_groups.contains(group)
    }
}
