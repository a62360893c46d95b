// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Elasticsearch.
//!
//! Provides helpers to spin up single-node clusters with security disabled.

use index_replicator::config::ClusterConfig;
use index_replicator::{HttpStore, StoreClient};
use std::time::Duration;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

const ES_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch";
const ES_TAG: &str = "8.11.3";

/// Single-node Elasticsearch 8 without TLS or authentication.
pub fn elasticsearch_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new(ES_IMAGE, ES_TAG)
        .with_env_var("discovery.type", "single-node")
        .with_env_var("xpack.security.enabled", "false")
        .with_env_var("ES_JAVA_OPTS", "-Xms512m -Xmx512m")
        .with_exposed_port(9200)
        .with_wait_for(WaitFor::message_on_stdout("started"));
    docker.run(image)
}

/// Base URL of a container's HTTP port.
pub fn elasticsearch_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(9200);
    format!("http://127.0.0.1:{port}")
}

/// A running cluster plus a client for it.
pub struct TestCluster<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub url: String,
    pub config: ClusterConfig,
}

impl<'a> TestCluster<'a> {
    /// Start a container and wait until it answers HTTP.
    pub async fn start(docker: &'a Cli, name: &str) -> Self {
        let container = elasticsearch_container(docker);
        let url = elasticsearch_url(&container);
        let config = ClusterConfig::for_testing(&url);

        let cluster = Self {
            container,
            url,
            config,
        };
        let store = cluster.store(name);
        for _ in 0..60 {
            if matches!(store.ping().await, Ok(true)) {
                return cluster;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("elasticsearch container {name} did not become reachable");
    }

    pub fn store(&self, name: &str) -> HttpStore {
        HttpStore::new(name, &self.config).expect("valid test cluster config")
    }

    /// Make recent writes visible to search and count.
    pub async fn refresh(&self, collection: &str) {
        let url = format!("{}/{collection}/_refresh", self.url);
        reqwest::Client::new()
            .post(url)
            .send()
            .await
            .expect("refresh request");
    }
}
