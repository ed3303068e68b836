use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// One observation of the out-of-band infrastructure feed.
///
/// Both fields are optional: a feed may only know a utilization figure, only a
/// replica count, or both. Missing fields are carried forward by the sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    /// Opaque metric such as CPU utilization in percent.
    pub value: Option<f64>,
    /// Externally observed population, e.g. number of backend replicas.
    pub population: Option<u32>,
}

impl SignalReading {
    /// Whether the reading observed anything at all.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.population.is_none()
    }
}

/// Source of the external signal consumed by the sampler.
///
/// Failures are expected and non-fatal: a failed fetch only means the next
/// sample reuses the last known values.
pub trait SignalSource
where
    Self: Send + Sync + 'static,
{
    fn fetch(&self) -> impl Future<Output = Result<SignalReading, SignalError>> + Send;
}

/// A source that never observes anything. Samples then carry only latency.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSignal;

impl SignalSource for NoSignal {
    async fn fetch(&self) -> Result<SignalReading, SignalError> {
        Ok(SignalReading::default())
    }
}

/// Payload shapes understood by [`HttpSignalSource`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MetricsFormat {
    /// `{"cpu_pct": 12.5, ...}` as served by the workload backend itself.
    #[default]
    CpuPct,
    /// A kubelet stats summary. Only pods whose name contains `pod_filter` are
    /// considered; their count becomes the population.
    KubeletSummary { pod_filter: String },
}

#[derive(Deserialize)]
struct CpuPctPayload {
    cpu_pct: f64,
}

#[derive(Deserialize)]
struct KubeletSummary {
    #[serde(default)]
    pods: Vec<PodStats>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStats {
    #[serde(default)]
    pod_ref: Option<PodRef>,
    #[serde(default)]
    containers: Vec<ContainerStats>,
}

#[derive(Deserialize)]
struct PodRef {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct ContainerStats {
    #[serde(default)]
    cpu: Option<CpuStats>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpuStats {
    #[serde(default)]
    usage_nano_cores: f64,
}

impl MetricsFormat {
    /// Turn a raw metrics body into a reading.
    pub fn parse(&self, body: &[u8]) -> Result<SignalReading, SignalError> {
        match self {
            MetricsFormat::CpuPct => {
                let payload: CpuPctPayload = serde_json::from_slice(body)?;
                Ok(SignalReading {
                    value: Some(payload.cpu_pct),
                    population: None,
                })
            }
            MetricsFormat::KubeletSummary { pod_filter } => {
                let summary: KubeletSummary = serde_json::from_slice(body)?;
                let pods: Vec<&PodStats> = summary
                    .pods
                    .iter()
                    .filter(|p| {
                        p.pod_ref
                            .as_ref()
                            .is_some_and(|r| r.name.contains(pod_filter.as_str()))
                    })
                    .collect();

                // nanocores -> millicores -> percent of one core
                let usages: Vec<f64> = pods
                    .iter()
                    .flat_map(|p| p.containers.iter())
                    .map(|c| c.cpu.as_ref().map_or(0.0, |cpu| cpu.usage_nano_cores) / 1e6 / 10.0)
                    .collect();
                let value = if usages.is_empty() {
                    0.0
                } else {
                    usages.iter().sum::<f64>() / usages.len() as f64
                };

                Ok(SignalReading {
                    value: Some(value),
                    population: Some(pods.len() as u32),
                })
            }
        }
    }
}

#[cfg(feature = "http")]
pub use http::*;

#[cfg(feature = "http")]
mod http {
    use super::*;

    use reqwest::Client;
    use typed_builder::TypedBuilder;

    /// Polls a metrics URL and parses it with the configured [`MetricsFormat`].
    #[derive(TypedBuilder)]
    pub struct HttpSignalSource {
        #[builder(setter(into))]
        pub url: String,
        #[builder(default)]
        pub format: MetricsFormat,
        #[builder(default = Client::new())]
        pub client: Client,
    }

    impl SignalSource for HttpSignalSource {
        async fn fetch(&self) -> Result<SignalReading, SignalError> {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| SignalError::Unavailable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(SignalError::Unavailable(format!(
                    "metrics endpoint answered with status {}",
                    response.status()
                )));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| SignalError::Unavailable(e.to_string()))?;
            self.format.parse(&body)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = r#"{
        "node": {"nodeName": "worker-1"},
        "pods": [
            {"podRef": {"name": "backend-7d9f-abc", "namespace": "demo"},
             "containers": [{"name": "app", "cpu": {"usageNanoCores": 250000000}}]},
            {"podRef": {"name": "backend-7d9f-def", "namespace": "demo"},
             "containers": [{"name": "app", "cpu": {"usageNanoCores": 750000000}}]},
            {"podRef": {"name": "frontend-55c-xyz", "namespace": "demo"},
             "containers": [{"name": "web", "cpu": {"usageNanoCores": 900000000}}]}
        ]
    }"#;

    #[test]
    fn kubelet_summary_counts_matching_pods_and_averages_cpu() {
        let format = MetricsFormat::KubeletSummary {
            pod_filter: "backend".into(),
        };

        let reading = format.parse(SUMMARY.as_bytes()).unwrap();

        assert_eq!(reading.population, Some(2));
        // 250m and 750m -> 25% and 75%
        assert_eq!(reading.value, Some(50.0));
    }

    #[test]
    fn kubelet_summary_without_matches_is_zero() {
        let format = MetricsFormat::KubeletSummary {
            pod_filter: "database".into(),
        };

        let reading = format.parse(SUMMARY.as_bytes()).unwrap();

        assert_eq!(reading.population, Some(0));
        assert_eq!(reading.value, Some(0.0));
    }

    #[test]
    fn cpu_pct_requires_the_field() {
        assert!(matches!(
            MetricsFormat::CpuPct.parse(br#"{"uptime": 3}"#),
            Err(SignalError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn no_signal_observes_nothing() {
        assert_eq!(NoSignal.fetch().await.unwrap(), SignalReading::default());
    }
}
