use std::net::IpAddr;
use std::time::Duration;

use prost::Message;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use metrix_core::collector::Snapshot;
use metrix_core::security::{Encryptor, Signer};
use metrix_proto::metrics_client::MetricsClient;
use metrix_proto::{BatchUpdateMetricsRequest, HASH_METADATA, Metric, MetricList, REAL_IP_METADATA};

use super::{ReportError, Reporter};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends snapshots through `BatchUpdateMetrics`.
pub(crate) struct GrpcReporter {
    client: MetricsClient<Channel>,
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    real_ip: Option<IpAddr>,
}

impl GrpcReporter {
    /// The channel connects on first use, so a server that is down at
    /// startup only fails the first reports.
    pub fn new(
        address: &str,
        signer: Option<Signer>,
        encryptor: Option<Encryptor>,
        gzip: bool,
        real_ip: Option<IpAddr>,
    ) -> Result<Self, ReportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let channel = Endpoint::from_shared(uri)?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .connect_lazy();

        let mut client = MetricsClient::new(channel);
        if gzip {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        Ok(Self {
            client,
            signer,
            encryptor,
            real_ip,
        })
    }

    pub(crate) fn build_request(
        &self,
        snapshot: &Snapshot,
    ) -> Result<tonic::Request<BatchUpdateMetricsRequest>, ReportError> {
        let metrics: Vec<Metric> = snapshot.records().into_iter().map(Metric::from).collect();
        let message = match &self.encryptor {
            Some(encryptor) => BatchUpdateMetricsRequest {
                metrics: Vec::new(),
                sealed: encryptor.encrypt(&MetricList { metrics }.encode_to_vec())?,
            },
            None => BatchUpdateMetricsRequest {
                metrics,
                sealed: Vec::new(),
            },
        };

        let tag = self
            .signer
            .as_ref()
            .map(|s| s.sign(&message.encode_to_vec()))
            .transpose()?;

        let mut request = tonic::Request::new(message);
        if let Some(tag) = tag {
            let value = MetadataValue::try_from(tag.as_str())
                .map_err(|e| ReportError::Metadata(e.to_string()))?;
            request.metadata_mut().insert(HASH_METADATA, value);
        }
        if let Some(ip) = self.real_ip {
            let value = MetadataValue::try_from(ip.to_string().as_str())
                .map_err(|e| ReportError::Metadata(e.to_string()))?;
            request.metadata_mut().insert(REAL_IP_METADATA, value);
        }
        Ok(request)
    }
}

impl Reporter for GrpcReporter {
    async fn report(&mut self, snapshot: &Snapshot) -> Result<usize, ReportError> {
        let request = self.build_request(snapshot)?;
        let applied = self
            .client
            .batch_update_metrics(request)
            .await?
            .into_inner()
            .applied;
        debug!(applied, "rpc report delivered");
        Ok(applied as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::collector::RuntimeCollector;
    use metrix_core::collector::mock::MockFs;
    use metrix_core::metric::MetricRecord;

    fn snapshot() -> Snapshot {
        RuntimeCollector::new(MockFs::typical_system()).collect()
    }

    #[tokio::test]
    async fn test_request_carries_tag_over_message_encoding() {
        let signer = Signer::new(b"secret").unwrap();
        let reporter = GrpcReporter::new(
            "127.0.0.1:3200",
            Some(signer.clone()),
            None,
            true,
            Some("10.0.0.7".parse().unwrap()),
        )
        .unwrap();

        let snap = snapshot();
        let request = reporter.build_request(&snap).unwrap();
        let tag = request.metadata().get(HASH_METADATA).unwrap().to_str().unwrap();
        assert!(signer.verify(&request.get_ref().encode_to_vec(), Some(tag)).is_ok());
        assert_eq!(
            request.metadata().get(REAL_IP_METADATA).unwrap().to_str().unwrap(),
            "10.0.0.7"
        );

        let records: Vec<MetricRecord> = request
            .get_ref()
            .metrics
            .iter()
            .cloned()
            .map(|m| MetricRecord::try_from(m).unwrap())
            .collect();
        assert_eq!(records, snap.records());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let mut reporter = GrpcReporter::new("127.0.0.1:1", None, None, false, None).unwrap();
        assert!(reporter.report(&snapshot()).await.is_err());
    }
}
