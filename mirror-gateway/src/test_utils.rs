//! In-memory transport doubles shared by the unit tests.

use {
    crate::{
        client::{CallExecutor, MirrorClient},
        error::{MirrorError, Result},
        payload::ObjectLocation,
        target::PeerTarget,
    },
    async_trait::async_trait,
    dashmap::{DashMap, DashSet},
    std::sync::Arc,
};

/// Installs `env_logger` once per test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `10.0.0.n:8081`
pub fn peer(n: u8) -> PeerTarget {
    PeerTarget::new(format!("10.0.0.{n}"), 8081)
}

pub fn location(uuid: &str, name: &str, ip: &str) -> ObjectLocation {
    ObjectLocation {
        name: name.to_owned(),
        uuid: uuid.to_owned(),
        ips: vec![ip.to_owned()],
    }
}

/// Connection pool where only registered addresses can be dialed.
#[derive(Default)]
pub struct TestExecutor {
    reachable: DashSet<String>,
    clients: DashMap<String, Arc<dyn MirrorClient>>,
    connected: DashSet<String>,
    dials: DashMap<String, usize>,
    stuck: DashSet<String>,
}

impl TestExecutor {
    pub fn add_reachable(&self, addr: &str) {
        self.reachable.insert(addr.to_owned());
    }

    /// Makes `addr` dialable and serves `client` once connected.
    pub fn add_client(&self, addr: &str, client: impl MirrorClient + 'static) {
        self.add_reachable(addr);
        self.clients.insert(addr.to_owned(), Arc::new(client));
    }

    /// Registers `client` and marks it connected without a dial.
    pub fn add_connected(&self, addr: &str, client: impl MirrorClient + 'static) {
        self.add_client(addr, client);
        self.connected.insert(addr.to_owned());
    }

    /// Makes every close of `addr` fail while the connection stays up.
    pub fn fail_disconnect(&self, addr: &str) {
        self.stuck.insert(addr.to_owned());
    }

    pub fn drop_connection(&self, addr: &str) {
        self.connected.remove(addr);
    }

    pub fn dial_count(&self, addr: &str) -> usize {
        self.dials.get(addr).map_or(0, |count| *count)
    }
}

#[async_trait]
impl CallExecutor for TestExecutor {
    async fn connect(&self, addr: &str) -> Result<()> {
        let mut count = self.dials.entry(addr.to_owned()).or_insert(0);
        *count = count.saturating_add(1);
        drop(count);

        if self.reachable.contains(addr) {
            self.connected.insert(addr.to_owned());
            Ok(())
        } else {
            Err(MirrorError::ConnectionFailed(
                addr.to_owned(),
                "connection refused".to_owned(),
            ))
        }
    }

    async fn disconnect(&self, addr: &str) -> Result<()> {
        if self.stuck.contains(addr) {
            return Err(MirrorError::ConnectionFailed(
                addr.to_owned(),
                "close timed out".to_owned(),
            ));
        }
        self.connected
            .remove(addr)
            .map(|_| ())
            .ok_or_else(|| MirrorError::ConnectionNotFound(addr.to_owned()))
    }

    fn is_connected(&self, addr: &str) -> bool {
        self.connected.contains(addr)
    }

    fn client(&self, addr: &str) -> Option<Arc<dyn MirrorClient>> {
        if !self.connected.contains(addr) {
            return None;
        }
        self.clients.get(addr).map(|client| client.value().clone())
    }
}
