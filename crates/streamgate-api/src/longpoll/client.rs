use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use super::message::{
    advice_request, connect_request, handshake_request, subscribe_request,
};
use super::{Advice, CONTENT_TYPE_JSON, ConnectBatch, CookieCache, ProtocolStep, Reply};
use crate::auth::Credentials;
use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client for one server's long-poll endpoints.
///
/// Every request carries the credentials' `Authorization` value and the
/// caller's cookies; `Set-Cookie` headers on every response are written
/// back into the same cache.
pub struct LongPollClient {
    http: reqwest::Client,
    base_url: Url,
    authorization: SecretString,
    api_version: String,
}

impl LongPollClient {
    pub fn new(
        credentials: &Credentials,
        api_version: &str,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, credentials, api_version)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        credentials: &Credentials,
        api_version: &str,
    ) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: credentials.base_url()?,
            authorization: credentials.token().clone(),
            api_version: api_version.to_owned(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, step: ProtocolStep) -> Result<Url, Error> {
        let path = format!("/cometd/{}/{}", self.api_version, step.endpoint());
        Ok(self.base_url.join(&path)?)
    }

    // ── Protocol exchanges ──────────────────────────────────────────

    /// Open a session; returns the server-assigned client id.
    pub async fn handshake(&self, cookies: &mut CookieCache) -> Result<String, Error> {
        let messages = self
            .exchange(ProtocolStep::Handshake, &handshake_request(), cookies)
            .await?;
        let reply = first_reply(ProtocolStep::Handshake, &messages)?;
        let client_id = reply.client_id.ok_or_else(|| Error::Protocol {
            step: ProtocolStep::Handshake,
            message: "reply carries no clientId".into(),
        })?;
        debug!(client_id = %client_id, "handshake complete");
        Ok(client_id)
    }

    /// Negotiate connection advice for the session.
    pub async fn advise(
        &self,
        client_id: &str,
        cookies: &mut CookieCache,
    ) -> Result<Option<Advice>, Error> {
        let messages = self
            .exchange(ProtocolStep::Advice, &advice_request(client_id), cookies)
            .await?;
        let reply = first_reply(ProtocolStep::Advice, &messages)?;
        debug!(advice = ?reply.advice, "advice accepted");
        Ok(reply.advice)
    }

    /// Subscribe the session to a topic.
    pub async fn subscribe(
        &self,
        client_id: &str,
        topic: &str,
        cookies: &mut CookieCache,
    ) -> Result<Reply, Error> {
        let messages = self
            .exchange(
                ProtocolStep::Subscribe,
                &subscribe_request(client_id, topic),
                cookies,
            )
            .await?;
        let reply = first_reply(ProtocolStep::Subscribe, &messages)?;
        debug!(topic, "subscribed");
        Ok(reply)
    }

    /// Issue one long-poll connect. The last element of the response is
    /// the status reply; everything before it is an event envelope.
    pub async fn connect(
        &self,
        client_id: &str,
        id: u32,
        cookies: &mut CookieCache,
    ) -> Result<ConnectBatch, Error> {
        let mut messages = self
            .exchange(ProtocolStep::Connect, &connect_request(client_id, id), cookies)
            .await?;

        let Some(last) = messages.pop() else {
            return Err(Error::Protocol {
                step: ProtocolStep::Connect,
                message: "empty response".into(),
            });
        };
        let status = parse_reply(ProtocolStep::Connect, last)?;
        if !status.successful {
            return Err(unsuccessful(ProtocolStep::Connect, &status));
        }

        trace!(id, events = messages.len(), "connect returned");
        Ok(ConnectBatch {
            events: messages,
            status,
        })
    }

    // ── Transport mechanics ─────────────────────────────────────────

    async fn exchange(
        &self,
        step: ProtocolStep,
        body: &Value,
        cookies: &mut CookieCache,
    ) -> Result<Vec<Value>, Error> {
        let url = self.endpoint(step)?;
        trace!(%step, %url, "posting");

        let payload = serde_json::to_vec(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_string(),
        })?;

        let mut request = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.authorization.expose_secret())
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(payload);
        if let Some(cookie) = cookies.header_value() {
            request = request.header(COOKIE, cookie);
        }

        let resp = request.send().await.map_err(Error::Transport)?;
        cookies.capture(resp.headers());

        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(Error::Protocol {
                step,
                message: format!("HTTP {status}: {text}"),
            });
        }

        serde_json::from_str::<Vec<Value>>(&text).map_err(|e| Error::Protocol {
            step,
            message: format!("malformed response ({e}): {text}"),
        })
    }
}

fn parse_reply(step: ProtocolStep, message: Value) -> Result<Reply, Error> {
    serde_json::from_value(message).map_err(|e| Error::Protocol {
        step,
        message: format!("unreadable reply: {e}"),
    })
}

fn first_reply(step: ProtocolStep, messages: &[Value]) -> Result<Reply, Error> {
    let first = messages.first().cloned().ok_or_else(|| Error::Protocol {
        step,
        message: "empty response".into(),
    })?;
    let reply = parse_reply(step, first)?;
    if reply.successful {
        Ok(reply)
    } else {
        Err(unsuccessful(step, &reply))
    }
}

fn unsuccessful(step: ProtocolStep, reply: &Reply) -> Error {
    Error::Protocol {
        step,
        message: reply
            .error
            .clone()
            .unwrap_or_else(|| "server reported failure".into()),
    }
}
