//! Blocking reqwest implementation of the engine's HTTP client.

use filesync_engine::{HttpClient, HttpResponse, HttpStream};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

/// HTTP client backed by `reqwest::blocking`.
///
/// Event streams use a second client without a request timeout, since they
/// stay open for the whole session.
pub struct ReqwestClient {
    client: Client,
    streaming: Client,
}

impl ReqwestClient {
    /// Creates a client whose plain requests time out after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            streaming: Client::builder().timeout(None::<Duration>).build()?,
        })
    }
}

fn with_bearer(request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

fn send(request: RequestBuilder) -> Result<HttpResponse, String> {
    let response = request.send().map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let body = response.bytes().map_err(|e| e.to_string())?;
    Ok(HttpResponse::new(status, body.to_vec()))
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String> {
        send(with_bearer(self.client.get(url), bearer))
    }

    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, String> {
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        send(with_bearer(request, bearer))
    }

    fn open_stream(&self, url: &str, bearer: Option<&str>) -> Result<HttpStream, String> {
        let request = self
            .streaming
            .get(url)
            .header(ACCEPT, "text/event-stream");
        let response = with_bearer(request, bearer)
            .send()
            .map_err(|e| e.to_string())?;
        Ok(HttpStream {
            status: response.status().as_u16(),
            body: Box::new(response),
        })
    }
}
