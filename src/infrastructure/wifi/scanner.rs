//! Concurrent subnet sweep for robots on the local access-point network.

use crate::domain::models::Device;
use crate::domain::settings::WifiSettings;
use crate::infrastructure::wifi::client::WifiTransport;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

pub struct SubnetSweep {
    transport: Arc<WifiTransport>,
    port: u16,
    subnets: Vec<String>,
    first_host: u8,
    last_host: u8,
    timeout: Duration,
}

impl SubnetSweep {
    pub fn new(transport: Arc<WifiTransport>, settings: &WifiSettings) -> Self {
        Self {
            transport,
            port: settings.port,
            subnets: settings.sweep_subnets.clone(),
            first_host: settings.sweep_first_host,
            last_host: settings.sweep_last_host,
            timeout: settings.sweep_timeout(),
        }
    }

    /// Every `a.b.c.N` this sweep will probe
    pub fn candidates(&self) -> Vec<String> {
        self.subnets
            .iter()
            .flat_map(|subnet| {
                (self.first_host..=self.last_host).map(move |host| format!("{subnet}.{host}"))
            })
            .collect()
    }

    /// Probe every candidate at once and return those that answered before
    /// the overall deadline, sorted by address. Probes still running at the
    /// deadline are aborted.
    pub async fn run(&self) -> Vec<Device> {
        self.run_until(std::future::pending::<()>()).await.unwrap_or_default()
    }

    /// [`Self::run`] that gives up with `None` once `cancel` resolves.
    /// Every probe task has ended by the time this returns.
    pub async fn run_until<C>(&self, cancel: C) -> Option<Vec<Device>>
    where
        C: Future<Output = ()>,
    {
        let candidates = self.candidates();
        info!(
            "Sweeping {} host(s) on port {} for up to {:?}",
            candidates.len(),
            self.port,
            self.timeout
        );

        let deadline = Instant::now() + self.timeout;
        let mut probes = JoinSet::new();
        for host in candidates {
            let device = Device::wifi(&host, self.port);
            let session = self.transport.session(&device);
            probes.spawn(async move {
                match session.probe().await {
                    Ok(_) => Some(device),
                    Err(e) => {
                        debug!("{} did not answer: {}", device.address, e);
                        None
                    }
                }
            });
        }

        tokio::pin!(cancel);
        let mut found = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = &mut cancel => {
                    info!("Sweep cancelled with {} probe(s) pending", probes.len());
                    cancelled = true;
                    break;
                }
                next = timeout_at(deadline, probes.join_next()) => match next {
                    Ok(Some(Ok(Some(device)))) => {
                        info!("Robot answered at {}", device.address);
                        found.push(device);
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(_) => {
                        debug!("Sweep deadline reached with {} probe(s) pending", probes.len());
                        break;
                    }
                },
            }
        }
        probes.abort_all();
        while probes.join_next().await.is_some() {}

        if cancelled {
            return None;
        }
        found.sort_by_key(|device| host_key(&device.address));
        Some(found)
    }
}

fn host_key(address: &str) -> (Option<Ipv4Addr>, String) {
    let host = address.split(':').next().unwrap_or(address);
    (host.parse().ok(), address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sweep_for(port: u16, subnets: &[&str], first: u8, last: u8, timeout_ms: u64) -> SubnetSweep {
        let settings = WifiSettings {
            port,
            sweep_subnets: subnets.iter().map(|s| s.to_string()).collect(),
            sweep_first_host: first,
            sweep_last_host: last,
            sweep_timeout_ms: timeout_ms,
            ..WifiSettings::default()
        };
        let transport = Arc::new(WifiTransport::new(&settings).unwrap());
        SubnetSweep::new(transport, &settings)
    }

    #[test]
    fn test_candidates_cover_every_subnet() {
        let sweep = sweep_for(80, &["192.168.1", "192.168.4"], 1, 254, 10_000);
        let candidates = sweep.candidates();
        assert_eq!(candidates.len(), 508);
        assert_eq!(candidates[0], "192.168.1.1");
        assert_eq!(candidates[507], "192.168.4.254");
    }

    #[tokio::test]
    async fn test_finds_answering_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let port = server.address().port();
        let found = sweep_for(port, &["127.0.0"], 1, 1, 5_000).run().await;
        assert_eq!(found, vec![Device::wifi("127.0.0.1", port)]);
    }

    #[tokio::test]
    async fn test_sweep_returns_within_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let port = server.address().port();
        let sweep = sweep_for(port, &["127.0.0"], 1, 4, 300);

        let started = std::time::Instant::now();
        let found = sweep.run().await;
        assert!(found.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_results_sort_numerically() {
        let mut hosts = vec!["192.168.4.10:80", "192.168.4.9:80", "192.168.1.200:80"];
        hosts.sort_by_key(|h| host_key(h));
        assert_eq!(hosts, vec!["192.168.1.200:80", "192.168.4.9:80", "192.168.4.10:80"]);
    }

    #[tokio::test]
    async fn test_cancel_ends_sweep_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let sweep = sweep_for(server.address().port(), &["127.0.0"], 1, 1, 10_000);
        let started = std::time::Instant::now();
        let found = sweep
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(found, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
