//! Scripted collaborators for probe tests.

use async_trait::async_trait;
use ocspwatch_oracle::{NetworkProbe, OcspCheck};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A probe that answers from fixed tables and records what it was asked.
#[derive(Default)]
pub struct ScriptedProbe {
    reachable_hosts: Vec<String>,
    checks: HashMap<String, OcspCheck>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reachable(mut self, host: &str) -> Self {
        self.reachable_hosts.push(host.to_string());
        self
    }

    pub fn with_check(mut self, url: &str, check: OcspCheck) -> Self {
        self.checks.insert(url.to_string(), check);
        self
    }

    /// Make every call sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NetworkProbe for ScriptedProbe {
    async fn reachable(&self, host: &str) -> bool {
        self.pause().await;
        self.calls.lock().unwrap().push(format!("ping {host}"));
        self.reachable_hosts.iter().any(|h| h == host)
    }

    async fn ocsp_check(&self, _subject: &[u8], _issuer: &[u8], url: &str) -> OcspCheck {
        self.pause().await;
        self.calls.lock().unwrap().push(format!("ocsp {url}"));
        self.checks
            .get(url)
            .copied()
            .unwrap_or(OcspCheck::Success { good: false })
    }
}
