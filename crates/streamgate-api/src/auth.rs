// Credentials shared between login providers and the units that use them
//
// A `Credentials` value pairs the server a session belongs to with the
// authorization token to present there. It also has a compact wire frame
// (length-prefixed JSON) so it can be handed across process boundaries.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Authorization material for one remote server.
#[derive(Debug, Clone)]
pub struct Credentials {
    server_identity: String,
    token: SecretString,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCredentials {
    server_name: String,
    session_token: String,
}

impl Credentials {
    pub fn new(server_identity: impl Into<String>, token: SecretString) -> Self {
        Self {
            server_identity: server_identity.into(),
            token,
        }
    }

    /// Host (or base URL) the token is valid for.
    pub fn server_identity(&self) -> &str {
        &self.server_identity
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Value for the `Authorization` header, used verbatim.
    pub fn authorization(&self) -> &str {
        self.token.expose_secret()
    }

    /// Base URL of the server. Bare host names are assumed to speak HTTPS.
    pub fn base_url(&self) -> Result<Url, Error> {
        server_base_url(&self.server_identity)
    }

    // ── Wire frame ──────────────────────────────────────────────────

    /// Encode as a 4-byte big-endian length followed by a JSON body.
    pub fn encode(&self) -> Result<Bytes, Error> {
        let wire = WireCredentials {
            server_name: self.server_identity.clone(),
            session_token: self.token.expose_secret().to_owned(),
        };
        let body = serde_json::to_vec(&wire).map_err(|e| Error::Codec(e.to_string()))?;
        let len = u32::try_from(body.len())
            .map_err(|_| Error::Codec(format!("frame of {} bytes is too large", body.len())))?;

        let mut buf = BytesMut::with_capacity(body.len() + 4);
        buf.put_u32(len);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decode a frame produced by [`Credentials::encode`].
    pub fn decode(mut frame: impl Buf) -> Result<Self, Error> {
        if frame.remaining() < 4 {
            return Err(Error::Codec("missing length prefix".into()));
        }
        let len = usize::try_from(frame.get_u32())
            .map_err(|_| Error::Codec("length prefix overflows usize".into()))?;
        if frame.remaining() < len {
            return Err(Error::Codec(format!(
                "frame declares {len} bytes but only {} remain",
                frame.remaining()
            )));
        }
        let body = frame.copy_to_bytes(len);
        let wire: WireCredentials =
            serde_json::from_slice(&body).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(Self::new(wire.server_name, SecretString::from(wire.session_token)))
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.server_identity == other.server_identity
            && self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for Credentials {}

/// Resolve a server identity into a base URL.
pub fn server_base_url(identity: &str) -> Result<Url, Error> {
    if identity.contains("://") {
        Ok(Url::parse(identity)?)
    } else {
        Ok(Url::parse(&format!("https://{identity}"))?)
    }
}
