//! gRPC front end over the same storage and security settings as HTTP.

use prost::Message;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use metrix_core::metric::{MetricBatch, MetricError, MetricRecord};
use metrix_core::storage::StoreError;
use metrix_proto::metrics_server::{Metrics, MetricsServer};
use metrix_proto::{
    BatchUpdateMetricsRequest, BatchUpdateMetricsResponse, DbPingRequest, DbPingResponse,
    GetMetricRequest, HASH_METADATA, ListMetricsValuesRequest, ListMetricsValuesResponse, Metric,
    MetricList, REAL_IP_METADATA, UpdateMetricRequest, kind_from_wire,
};
use tonic::codec::CompressionEncoding;

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn into_server(self) -> MetricsServer<Self> {
        MetricsServer::new(self)
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip)
    }

    fn check_source<T>(&self, req: &Request<T>) -> Result<(), Status> {
        let real_ip = req
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok());
        if self.state.security.admits(real_ip) == Some(false) {
            warn!(real_ip = real_ip.unwrap_or("-"), "rpc: source not trusted");
            return Err(Status::permission_denied("source address not trusted"));
        }
        Ok(())
    }

    /// The tag covers the protobuf encoding of the request message.
    fn check_tag<T: Message>(&self, req: &Request<T>) -> Result<(), Status> {
        let Some(signer) = &self.state.security.signer else {
            return Ok(());
        };
        let tag = req
            .metadata()
            .get(HASH_METADATA)
            .and_then(|v| v.to_str().ok());
        signer
            .verify(&req.get_ref().encode_to_vec(), tag)
            .map_err(|e| {
                warn!(error = %e, "rpc: integrity check failed");
                Status::permission_denied(e.to_string())
            })
    }

    fn open_sealed(&self, sealed: &[u8]) -> Result<Vec<u8>, Status> {
        let decryptor = self
            .state
            .security
            .decryptor
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("sealed payload but no private key configured"))?;
        decryptor
            .decrypt(sealed)
            .map_err(|e| Status::invalid_argument(e.to_string()))
    }

    fn require_plain_allowed(&self) -> Result<(), Status> {
        if self.state.security.decryptor.is_some() {
            return Err(Status::invalid_argument("payload must be sealed"));
        }
        Ok(())
    }
}

fn metric_status(e: MetricError) -> Status {
    Status::invalid_argument(e.to_string())
}

fn api_status(e: ApiError) -> Status {
    match e {
        ApiError::Store(StoreError::NotFound { .. }) => Status::not_found(e.to_string()),
        ApiError::Store(StoreError::InvalidMetric(_)) | ApiError::Metric(_) => {
            Status::invalid_argument(e.to_string())
        }
        ApiError::Forbidden(_) => Status::permission_denied(e.to_string()),
        other => {
            warn!(error = %other, "rpc: request failed");
            Status::internal(other.to_string())
        }
    }
}

fn record(m: Metric) -> Result<MetricRecord, Status> {
    MetricRecord::try_from(m).map_err(metric_status)
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> Result<Response<Metric>, Status> {
        self.check_source(&request)?;
        self.check_tag(&request)?;

        let req = request.into_inner();
        let metric = if !req.sealed.is_empty() {
            let plain = self.open_sealed(&req.sealed)?;
            Metric::decode(plain.as_slice()).map_err(|e| Status::invalid_argument(e.to_string()))?
        } else {
            self.require_plain_allowed()?;
            req.metric
                .ok_or_else(|| Status::invalid_argument("metric required"))?
        };

        let record = record(metric)?;
        let value = record.metric_value().map_err(metric_status)?;
        let id = record.id;
        let stored = self
            .state
            .with_store({
                let id = id.clone();
                move |store| store.update(&id, value)
            })
            .await
            .map_err(api_status)?;
        Ok(Response::new(Metric::from_value(id, stored)))
    }

    async fn batch_update_metrics(
        &self,
        request: Request<BatchUpdateMetricsRequest>,
    ) -> Result<Response<BatchUpdateMetricsResponse>, Status> {
        self.check_source(&request)?;
        self.check_tag(&request)?;

        let req = request.into_inner();
        let metrics = if !req.sealed.is_empty() {
            let plain = self.open_sealed(&req.sealed)?;
            MetricList::decode(plain.as_slice())
                .map_err(|e| Status::invalid_argument(e.to_string()))?
                .metrics
        } else {
            self.require_plain_allowed()?;
            req.metrics
        };

        let records = metrics
            .into_iter()
            .map(record)
            .collect::<Result<Vec<_>, _>>()?;
        let batch = MetricBatch::from_records(&records).map_err(metric_status)?;
        let applied = batch.len() as u32;

        self.state
            .with_store(move |store| store.update_batch(&batch))
            .await
            .map_err(api_status)?;
        debug!(received = records.len(), applied, "rpc: batch applied");
        Ok(Response::new(BatchUpdateMetricsResponse { applied }))
    }

    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<Metric>, Status> {
        self.check_source(&request)?;
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(metric_status(MetricError::EmptyName));
        }
        let kind = kind_from_wire(req.r#type).map_err(metric_status)?;

        let id = req.id;
        let value = self
            .state
            .with_store({
                let id = id.clone();
                move |store| store.get(kind, &id)
            })
            .await
            .map_err(api_status)?;
        Ok(Response::new(Metric::from_value(id, value)))
    }

    async fn list_metrics_values(
        &self,
        request: Request<ListMetricsValuesRequest>,
    ) -> Result<Response<ListMetricsValuesResponse>, Status> {
        self.check_source(&request)?;
        let values = self
            .state
            .with_store(|store| store.list_all())
            .await
            .map_err(api_status)?;
        Ok(Response::new(ListMetricsValuesResponse { values }))
    }

    async fn db_ping(
        &self,
        request: Request<DbPingRequest>,
    ) -> Result<Response<DbPingResponse>, Status> {
        self.check_source(&request)?;
        self.state
            .with_store(|store| store.ping())
            .await
            .map_err(api_status)?;
        Ok(Response::new(DbPingResponse {}))
    }
}
