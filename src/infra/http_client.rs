use async_trait::async_trait;
use reqwest::header::ACCEPT;

use crate::common::error::Result;

/// Identifies this service to the upstream alert providers.
pub const USER_AGENT: &str = "cap-ingester/0.1";

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, accept: &str) -> Result<HttpGetResult>;
}

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new() -> Result<ReqwestHttp> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(ReqwestHttp { client })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str, accept: &str) -> Result<HttpGetResult> {
        let resp = self.client.get(url).header(ACCEPT, accept).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpGetResult { status, body })
    }
}
