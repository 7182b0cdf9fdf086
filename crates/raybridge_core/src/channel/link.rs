//! The full set of named objects one bridge instance uses.

use raybridge_shared::{
    CONSUMER_EVENT_NAME, MUTEX_NAME, PRESENT_EVENT_NAME, PRODUCER_EVENT_NAME,
};
use tracing::info;

use super::layout::SharedChannel;
use crate::error::SyncResult;
use crate::sync::{NamedEvent, NamedMutex, Namespace, Role};

/// Mutex, events and channel, created by the owner or opened by its peer.
///
/// Both sides walk the objects in one order: mutex, *producer-written*,
/// *consumer-finished*, *presentation-ready*, channel.
#[derive(Debug)]
pub struct BridgeLink {
    role: Role,
    owner: bool,
    mutex: NamedMutex,
    producer_written: NamedEvent,
    consumer_finished: NamedEvent,
    presentation_ready: NamedEvent,
    channel: SharedChannel,
}

impl BridgeLink {
    /// Creates every named object.
    ///
    /// *consumer-finished* starts signaled so the producer's first wait
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// Fails if any name already exists. Objects created before the failure
    /// are unlinked again.
    pub fn create(namespace: &Namespace, role: Role, capacity: usize) -> SyncResult<Self> {
        let mutex = NamedMutex::create(namespace, MUTEX_NAME)?;
        let producer_written = NamedEvent::create(namespace, PRODUCER_EVENT_NAME, false)?;
        let consumer_finished = NamedEvent::create(namespace, CONSUMER_EVENT_NAME, true)?;
        let presentation_ready = NamedEvent::create(namespace, PRESENT_EVENT_NAME, false)?;
        let channel = SharedChannel::create(namespace, capacity)?;

        info!(%role, root = %namespace.root().display(), capacity, "created bridge objects");
        Ok(Self {
            role,
            owner: true,
            mutex,
            producer_written,
            consumer_finished,
            presentation_ready,
            channel,
        })
    }

    /// Opens every named object created by the peer.
    ///
    /// # Errors
    ///
    /// `SyncError::NotFound` naming the first object, in creation order, the
    /// owner has not created yet.
    pub fn open(namespace: &Namespace, role: Role) -> SyncResult<Self> {
        let mutex = NamedMutex::open(namespace, MUTEX_NAME)?;
        let producer_written = NamedEvent::open(namespace, PRODUCER_EVENT_NAME)?;
        let consumer_finished = NamedEvent::open(namespace, CONSUMER_EVENT_NAME)?;
        let presentation_ready = NamedEvent::open(namespace, PRESENT_EVENT_NAME)?;
        let channel = SharedChannel::open(namespace)?;

        info!(%role, root = %namespace.root().display(), capacity = channel.capacity(), "opened bridge objects");
        Ok(Self {
            role,
            owner: false,
            mutex,
            producer_written,
            consumer_finished,
            presentation_ready,
            channel,
        })
    }

    /// Creates when `role` is the owner, opens otherwise.
    ///
    /// # Errors
    ///
    /// As `create` or `open`.
    pub fn establish(
        namespace: &Namespace,
        role: Role,
        owner: Role,
        capacity: usize,
    ) -> SyncResult<Self> {
        if role == owner {
            Self::create(namespace, role, capacity)
        } else {
            Self::open(namespace, role)
        }
    }

    /// This side.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// True if this side created the objects.
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        self.owner
    }

    /// Record area size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    /// Mutex guarding the channel.
    #[must_use]
    pub const fn mutex(&self) -> &NamedMutex {
        &self.mutex
    }

    /// *producer-has-written*
    #[must_use]
    pub const fn producer_written(&self) -> &NamedEvent {
        &self.producer_written
    }

    /// *consumer-has-finished*
    #[must_use]
    pub const fn consumer_finished(&self) -> &NamedEvent {
        &self.consumer_finished
    }

    /// *presentation-is-ready*
    #[must_use]
    pub const fn presentation_ready(&self) -> &NamedEvent {
        &self.presentation_ready
    }

    /// The record channel.
    #[must_use]
    pub const fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn namespace(tag: &str) -> Namespace {
        Namespace::new(std::env::temp_dir()).with_suffix(format!(
            "link_{tag}_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn missing(result: SyncResult<BridgeLink>) -> String {
        match result {
            Err(SyncError::NotFound { name }) => name,
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_open_follows_creation_order() {
        let namespace = namespace("order");
        assert_eq!(
            missing(BridgeLink::open(&namespace, Role::Producer)),
            namespace.object_name(MUTEX_NAME)
        );

        let _mutex = NamedMutex::create(&namespace, MUTEX_NAME).unwrap();
        let _written = NamedEvent::create(&namespace, PRODUCER_EVENT_NAME, false).unwrap();
        assert_eq!(
            missing(BridgeLink::open(&namespace, Role::Producer)),
            namespace.object_name(CONSUMER_EVENT_NAME)
        );
    }

    #[test]
    fn test_create_then_open() {
        let namespace = namespace("pair");
        let owner = BridgeLink::create(&namespace, Role::Consumer, 4096).unwrap();
        let peer = BridgeLink::open(&namespace, Role::Producer).unwrap();

        assert!(owner.is_owner());
        assert!(!peer.is_owner());
        assert_eq!(peer.capacity(), owner.capacity());
        assert!(peer.consumer_finished().poll());
    }

    #[test]
    fn test_failed_create_unlinks_earlier_objects() {
        let namespace = namespace("clash");
        let _squatter = SharedChannel::create(&namespace, 4096).unwrap();

        let result = BridgeLink::create(&namespace, Role::Consumer, 4096);
        assert!(matches!(result, Err(SyncError::AlreadyExists { .. })));
        assert!(!namespace.path_for(MUTEX_NAME).exists());
        assert!(!namespace.path_for(PRESENT_EVENT_NAME).exists());
    }
}
