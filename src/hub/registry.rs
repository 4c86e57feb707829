//! Name-keyed store of forwarders.
//!
//! Each name maps to a slot that is filled once the service has been dialed.
//! [`Registry::register`] reserves the slot under the map lock and dials with
//! the lock released, so a slow or silent service never stalls lookups for
//! other names. Racing registrations for one name share the slot and produce
//! exactly one forwarder.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};

use super::forwarder::{Forwarder, ForwarderConfig};
use crate::error::{RelayError, Result};

/// A name's forwarder, empty while the first dial is in flight.
type Slot = Arc<OnceCell<Arc<Forwarder>>>;

/// Outcome of a registration.
#[derive(Debug, Clone)]
pub enum Registration {
    /// First registration for this name; a forwarder was created.
    Created(Arc<Forwarder>),
    /// Name already known; its liveness was refreshed.
    Refreshed(Arc<Forwarder>),
}

impl Registration {
    /// The forwarder registered under the name.
    pub fn forwarder(&self) -> &Arc<Forwarder> {
        match self {
            Self::Created(f) | Self::Refreshed(f) => f,
        }
    }

    /// Whether this call created the forwarder.
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Registered services by name.
pub struct Registry {
    forwarders: Mutex<HashMap<String, Slot>>,
    config: ForwarderConfig,
}

impl Registry {
    /// Create an empty registry whose forwarders use `config`.
    pub fn new(config: ForwarderConfig) -> Self {
        Self {
            forwarders: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Insert-if-absent: create a forwarder for an unknown name, refresh a
    /// known one.
    ///
    /// A known name keeps its original URL. While a name's first dial is in
    /// flight, further registrations for it wait on that dial; every other
    /// name stays reachable.
    pub async fn register(&self, name: &str, url: &str) -> Result<Registration> {
        if name.is_empty() {
            return Err(RelayError::Protocol(
                "registration without a service name".to_string(),
            ));
        }
        if url.is_empty() {
            return Err(RelayError::Protocol(format!(
                "registration for {name} without a url"
            )));
        }

        let slot = {
            let mut forwarders = self.forwarders.lock().await;
            let slot = forwarders.entry(name.to_string()).or_default().clone();
            if let Some(existing) = slot.get() {
                return Ok(refresh_existing(existing, url));
            }
            slot
        };

        let mut dialed = false;
        let result = slot
            .get_or_try_init(|| {
                dialed = true;
                Forwarder::connect(name, url, &self.config)
            })
            .await
            .cloned();

        match result {
            Ok(forwarder) if dialed => self.confirm(name, &slot, forwarder).await,
            Ok(existing) => Ok(refresh_existing(&existing, url)),
            Err(e) => {
                self.release(name, &slot).await;
                Err(e)
            }
        }
    }

    /// Make sure the slot we filled is the one the map holds.
    ///
    /// A failed dial by a racing registration may have dropped the slot from
    /// the map in the meantime.
    async fn confirm(
        &self,
        name: &str,
        slot: &Slot,
        forwarder: Arc<Forwarder>,
    ) -> Result<Registration> {
        let replaced = {
            let mut forwarders = self.forwarders.lock().await;
            let current = forwarders
                .entry(name.to_string())
                .or_insert_with(|| slot.clone());
            !Arc::ptr_eq(current, slot)
        };

        if replaced {
            if let Err(e) = forwarder.close().await {
                tracing::debug!(service = name, "close of superseded forwarder: {}", e);
            }
            return Err(RelayError::DuplicateService(name.to_string()));
        }
        Ok(Registration::Created(forwarder))
    }

    /// Drop a slot whose dial failed, unless something filled or replaced it.
    async fn release(&self, name: &str, slot: &Slot) {
        let mut forwarders = self.forwarders.lock().await;
        if let Some(current) = forwarders.get(name) {
            if Arc::ptr_eq(current, slot) && !slot.initialized() {
                forwarders.remove(name);
            }
        }
    }

    /// Insert an already connected forwarder.
    ///
    /// Fails with [`RelayError::DuplicateService`] if the name is taken or
    /// being dialed.
    pub async fn add(&self, forwarder: Arc<Forwarder>) -> Result<()> {
        match self.forwarders.lock().await.entry(forwarder.name().to_string()) {
            Entry::Occupied(entry) => Err(RelayError::DuplicateService(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(OnceCell::new_with(Some(forwarder))));
                Ok(())
            }
        }
    }

    /// Look up a forwarder by service name.
    ///
    /// A name whose first dial is still in flight is not found.
    pub async fn get(&self, name: &str) -> Option<Arc<Forwarder>> {
        self.forwarders
            .lock()
            .await
            .get(name)
            .and_then(|slot| slot.get().cloned())
    }

    /// Refresh a known service's liveness. Returns `false` for unknown names.
    pub async fn refresh(&self, name: &str) -> bool {
        match self.get(name).await {
            Some(forwarder) => {
                forwarder.touch();
                true
            }
            None => false,
        }
    }

    /// Remove and close every forwarder idle for longer than `ttl`.
    ///
    /// Returns the evicted names.
    pub async fn evict_stale(&self, ttl: Duration) -> Vec<String> {
        let stale: Vec<Arc<Forwarder>> = {
            let mut forwarders = self.forwarders.lock().await;
            let names: Vec<String> = forwarders
                .iter()
                .filter(|(_, slot)| slot.get().is_some_and(|f| f.idle() > ttl))
                .map(|(name, _)| name.clone())
                .collect();
            names
                .iter()
                .filter_map(|name| forwarders.remove(name))
                .filter_map(|slot| slot.get().cloned())
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for forwarder in stale {
            if let Err(e) = forwarder.close().await {
                tracing::debug!(service = forwarder.name(), "close on eviction: {}", e);
            }
            evicted.push(forwarder.name().to_string());
        }
        evicted
    }

    /// Number of registered services.
    pub async fn len(&self) -> usize {
        self.forwarders
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Whether no service is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registered service names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .forwarders
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove and close every forwarder.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Forwarder>> = self
            .forwarders
            .lock()
            .await
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();

        for forwarder in drained {
            if let Err(e) = forwarder.close().await {
                tracing::warn!(service = forwarder.name(), "failed to close forwarder: {}", e);
            }
        }
    }
}

fn refresh_existing(existing: &Arc<Forwarder>, url: &str) -> Registration {
    existing.touch();
    if existing.url() != url {
        tracing::warn!(
            service = existing.name(),
            registered = existing.url(),
            requested = url,
            "re-registration with a different url ignored"
        );
    }
    Registration::Refreshed(existing.clone())
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ForwarderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Endpoint, PullConfig, PullSocket};

    async fn service() -> (PullSocket, String) {
        let pull = PullSocket::listen(
            &Endpoint::parse("tcp://127.0.0.1:0").unwrap(),
            PullConfig::default(),
        )
        .await
        .unwrap();
        let url = format!("tcp://{}", pull.local_addr());
        (pull, url)
    }

    #[tokio::test]
    async fn test_register_twice_creates_one_forwarder() {
        let (_pull, url) = service().await;
        let registry = Registry::default();

        let first = registry.register("cfg", &url).await.unwrap();
        assert!(first.is_created());
        let created_at = first.forwarder().last_alive();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = registry.register("cfg", &url).await.unwrap();
        assert!(!second.is_created());
        assert!(Arc::ptr_eq(first.forwarder(), second.forwarder()));
        assert!(second.forwarder().last_alive() > created_at);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_racing_registrations() {
        let (_pull, url) = service().await;
        let registry = Arc::new(Registry::default());

        let a = tokio::spawn({
            let registry = registry.clone();
            let url = url.clone();
            async move { registry.register("cfg", &url).await.unwrap() }
        });
        let b = tokio::spawn({
            let registry = registry.clone();
            let url = url.clone();
            async move { registry.register("cfg", &url).await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_ne!(a.is_created(), b.is_created());
        assert!(Arc::ptr_eq(a.forwarder(), b.forwarder()));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let registry = Registry::default();
        assert!(registry.register("", "tcp://127.0.0.1:1").await.is_err());
        assert!(registry.register("cfg", "").await.is_err());
        assert!(matches!(
            registry.register("cfg", "ipc:///tmp/cfg").await,
            Err(RelayError::InvalidScheme(_))
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_dial_frees_the_name() {
        let (pull, url) = service().await;
        let dead = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            format!("tcp://{}", l.local_addr().unwrap())
        };
        let registry = Registry::default();

        assert!(registry.register("cfg", &dead).await.is_err());
        assert!(registry.get("cfg").await.is_none());

        let retry = registry.register("cfg", &url).await.unwrap();
        assert!(retry.is_created());
        assert_eq!(registry.len().await, 1);
        drop(pull);
    }

    #[tokio::test]
    async fn test_pending_dial_does_not_block_other_names() {
        let (_pull, url) = service().await;
        let registry = Arc::new(Registry::default());
        registry.register("good", &url).await.unwrap();

        // Accepts connections but never answers the handshake.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_url = format!("tcp://{}", silent.local_addr().unwrap());
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                held.push(stream);
            }
        });

        let slow = tokio::spawn({
            let registry = registry.clone();
            async move { registry.register("slow", &silent_url).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let found = tokio::time::timeout(Duration::from_millis(500), registry.get("good"))
            .await
            .expect("lookup must not wait for another name's dial");
        assert!(found.is_some());
        assert!(
            tokio::time::timeout(Duration::from_millis(500), registry.refresh("good"))
                .await
                .unwrap()
        );
        assert!(registry.get("slow").await.is_none());
        assert_eq!(registry.names().await, vec!["good".to_string()]);
        assert!(!slow.is_finished());

        slow.abort();
        holder.abort();
    }

    #[tokio::test]
    async fn test_refresh_unknown_is_noop() {
        let registry = Registry::default();
        assert!(!registry.refresh("ghost").await);
        assert!(registry.get("ghost").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_duplicate() {
        let (_pull, url) = service().await;
        let registry = Registry::default();
        registry.register("cfg", &url).await.unwrap();

        let other = Forwarder::connect("cfg", &url, &ForwarderConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            registry.add(other.clone()).await,
            Err(RelayError::DuplicateService(name)) if name == "cfg"
        ));
        other.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_stale() {
        let (_pull, url) = service().await;
        let registry = Registry::default();
        registry.register("old", &url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.register("new", &url).await.unwrap();

        let evicted = registry.evict_stale(Duration::from_millis(20)).await;
        assert_eq!(evicted, vec!["old".to_string()]);
        assert_eq!(registry.names().await, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let (_pull, url) = service().await;
        let registry = Registry::default();
        let a = registry.register("a", &url).await.unwrap();
        let b = registry.register("b", &url).await.unwrap();

        registry.shutdown().await;

        assert!(registry.is_empty().await);
        assert!(a.forwarder().is_closed());
        assert!(b.forwarder().is_closed());
    }
}
