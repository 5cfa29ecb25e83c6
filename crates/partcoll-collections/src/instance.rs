//! Entry point handing out collections bound to one member of a cluster.

use std::sync::Arc;

use partcoll_kv::{MapProvider, MemberId};

use crate::codec::Element;
use crate::config::CollectionConfig;
use crate::queue::LinkedQueue;
use crate::set::EntrySet;

/// Opens named queues and sets through one store member.
///
/// Handles are cheap; opening the same name twice attaches to the same state.
#[derive(Clone)]
pub struct Collections {
    provider: Arc<dyn MapProvider>,
    config: CollectionConfig,
}

impl Collections {
    /// Binds to `provider` with default tunables.
    pub fn new(provider: Arc<dyn MapProvider>) -> Self {
        Self::with_config(provider, CollectionConfig::default())
    }

    /// Binds to `provider` with explicit tunables.
    pub fn with_config(provider: Arc<dyn MapProvider>, config: CollectionConfig) -> Self {
        Self { provider, config }
    }

    /// Member this factory operates as.
    pub fn member_id(&self) -> MemberId {
        self.provider.member_id()
    }

    /// Tunables applied to every collection opened here.
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// The queue called `name`.
    pub fn queue<E: Element>(&self, name: &str) -> LinkedQueue<E> {
        LinkedQueue::open(self.provider.as_ref(), name, self.config.clone())
    }

    /// The set called `name`.
    pub fn set<E: Element>(&self, name: &str) -> EntrySet<E> {
        EntrySet::open(
            self.provider.as_ref(),
            name,
            &self.config.set_map_name(name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::DistributedCollection;
    use partcoll_kv::MemoryCluster;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_shares_state_across_members() {
        let cluster = MemoryCluster::new();
        let a = Collections::new(Arc::new(cluster.join()));
        let b = Collections::new(Arc::new(cluster.join()));
        assert_ne!(a.member_id(), b.member_id());

        let qa = a.queue::<String>("jobs");
        let qb = b.queue::<String>("jobs");
        assert!(qa.offer("x".to_string(), Duration::from_secs(1)).await.unwrap());
        assert_eq!(qb.size().await.unwrap(), 1);
        assert_eq!(qb.poll(Duration::from_secs(1)).await.unwrap(), Some("x".to_string()));

        let sa = a.set::<u64>("seen");
        sa.add(3).await.unwrap();
        assert!(b.set::<u64>("seen").contains(&3).await.unwrap());
    }

    #[tokio::test]
    async fn test_backing_map_names() {
        let cluster = MemoryCluster::new();
        let config = CollectionConfig {
            name_prefix: "app".to_string(),
            ..CollectionConfig::default()
        };
        let c = Collections::with_config(Arc::new(cluster.join()), config);
        c.queue::<u8>("q").offer(1, Duration::from_secs(1)).await.unwrap();
        c.set::<u8>("s").add(1).await.unwrap();

        let mut names = cluster.map_names();
        names.sort();
        assert_eq!(
            names,
            vec!["app:queue:q:meta", "app:queue:q:nodes", "app:set:s"]
        );
    }

    #[tokio::test]
    async fn test_queue_and_set_with_same_name_are_distinct() {
        let c = Collections::new(Arc::new(MemoryCluster::new().join()));
        c.queue::<u8>("x").offer(1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(c.set::<u8>("x").size().await.unwrap(), 0);
        assert_eq!(c.queue::<u8>("x").name(), "x");
    }
}
