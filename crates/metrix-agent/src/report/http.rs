use std::net::IpAddr;
use std::time::Duration;

use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, warn};

use metrix_core::collector::Snapshot;
use metrix_core::security::{self, Encryptor, Signer};
use metrix_core::{HASH_HEADER, REAL_IP_HEADER};

use super::{ReportError, Reporter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts snapshots as a JSON array to `/updates/`.
pub(crate) struct HttpReporter {
    client: reqwest::Client,
    url: String,
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    gzip: bool,
    real_ip: Option<IpAddr>,
}

impl HttpReporter {
    pub fn new(
        address: &str,
        signer: Option<Signer>,
        encryptor: Option<Encryptor>,
        gzip: bool,
        real_ip: Option<IpAddr>,
    ) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("metrix-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Ok(Self {
            client,
            url: format!("{base}/updates/"),
            signer,
            encryptor,
            gzip,
            real_ip,
        })
    }

    /// Request body bytes exactly as they go on the wire.
    pub(crate) fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>, ReportError> {
        let mut body = serde_json::to_vec(&snapshot.records())?;
        if let Some(encryptor) = &self.encryptor {
            body = encryptor.encrypt(&body)?;
        }
        if self.gzip {
            body = security::gzip(&body)?;
        }
        Ok(body)
    }
}

impl Reporter for HttpReporter {
    async fn report(&mut self, snapshot: &Snapshot) -> Result<usize, ReportError> {
        let body = self.encode(snapshot)?;

        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json");
        if self.gzip {
            req = req.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(signer) = &self.signer {
            req = req.header(HASH_HEADER, signer.sign(&body)?);
        }
        if let Some(ip) = self.real_ip {
            req = req.header(REAL_IP_HEADER, ip.to_string());
        }

        let bytes = body.len();
        let resp = req.body(body).send().await?;
        let status = resp.status();
        let tag = resp
            .headers()
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let reply = resp.bytes().await?;

        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&reply).trim().to_string(),
            });
        }
        if let Some(signer) = &self.signer
            && let Err(e) = signer.verify(&reply, tag.as_deref())
        {
            warn!(url = %self.url, error = %e, "response signature rejected");
            return Err(e.into());
        }
        debug!(url = %self.url, bytes, metrics = snapshot.len(), "report delivered");
        Ok(snapshot.len())
    }
}
