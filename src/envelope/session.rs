//! Session envelope: state announcements and the in-band authentication payload.
//!
//! `authentication` is a raw JSON value on the wire whose shape is selected by
//! the sibling `scheme` field, so `SessionEnvelope` gets a hand-written
//! `Serialize`/`Deserialize` instead of `#[derive]` (serde has no "tag lives
//! in a sibling field" mechanism for an `Option<Value>`-style body).

use std::fmt;

use base64::Engine;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::{EnvelopeBase, Reason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Authenticating,
    Established,
    Finishing,
    Finished,
    Failed,
}

impl SessionState {
    /// Monotonic step order used to enforce forward-only transitions (§3).
    pub fn step(self) -> u8 {
        match self {
            SessionState::New => 0,
            SessionState::Negotiating => 1,
            SessionState::Authenticating => 2,
            SessionState::Established => 3,
            SessionState::Finishing => 4,
            SessionState::Finished => 5,
            SessionState::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Authenticating => "authenticating",
            SessionState::Established => "established",
            SessionState::Finishing => "finishing",
            SessionState::Finished => "finished",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionOption {
    None,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionOption {
    None,
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Guest,
    Plain,
    Key,
    Transport,
    External,
}

/// One of the five authentication payload shapes, tagged by `scheme`.
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    Guest,
    Plain { password: Vec<u8> },
    Key { key: Vec<u8> },
    Transport,
    External { token: String, issuer: String },
}

impl Authentication {
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Authentication::Guest => AuthenticationScheme::Guest,
            Authentication::Plain { .. } => AuthenticationScheme::Plain,
            Authentication::Key { .. } => AuthenticationScheme::Key,
            Authentication::Transport => AuthenticationScheme::Transport,
            Authentication::External { .. } => AuthenticationScheme::External,
        }
    }

    pub fn plain(password: impl AsRef<[u8]>) -> Self {
        Authentication::Plain {
            password: password.as_ref().to_vec(),
        }
    }

    pub fn key(key: impl AsRef<[u8]>) -> Self {
        Authentication::Key {
            key: key.as_ref().to_vec(),
        }
    }

    /// Decodes the scheme-tagged JSON body. Called by the codec once it has
    /// read the sibling `scheme` field.
    pub fn from_scheme_and_value(
        scheme: AuthenticationScheme,
        value: Option<Value>,
    ) -> Result<Self, String> {
        let value = value.unwrap_or(Value::Object(Default::default()));
        match scheme {
            AuthenticationScheme::Guest => Ok(Authentication::Guest),
            AuthenticationScheme::Transport => Ok(Authentication::Transport),
            AuthenticationScheme::Plain => {
                let password = value
                    .get("password")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "plain authentication missing password".to_string())?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(password)
                    .map_err(|e| format!("plain authentication base64: {e}"))?;
                Ok(Authentication::Plain { password: decoded })
            }
            AuthenticationScheme::Key => {
                let key = value
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "key authentication missing key".to_string())?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(key)
                    .map_err(|e| format!("key authentication base64: {e}"))?;
                Ok(Authentication::Key { key: decoded })
            }
            AuthenticationScheme::External => {
                let token = value
                    .get("token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "external authentication missing token".to_string())?
                    .to_string();
                let issuer = value
                    .get("issuer")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "external authentication missing issuer".to_string())?
                    .to_string();
                Ok(Authentication::External { token, issuer })
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Authentication::Guest | Authentication::Transport => {
                Value::Object(Default::default())
            }
            Authentication::Plain { password } => {
                serde_json::json!({ "password": base64::engine::general_purpose::STANDARD.encode(password) })
            }
            Authentication::Key { key } => {
                serde_json::json!({ "key": base64::engine::general_purpose::STANDARD.encode(key) })
            }
            Authentication::External { token, issuer } => {
                serde_json::json!({ "token": token, "issuer": issuer })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionEnvelope {
    pub base: EnvelopeBase,
    pub state: SessionState,
    pub encryption_options: Option<Vec<EncryptionOption>>,
    pub encryption: Option<EncryptionOption>,
    pub compression_options: Option<Vec<CompressionOption>>,
    pub compression: Option<CompressionOption>,
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    pub scheme: Option<AuthenticationScheme>,
    pub authentication: Option<Authentication>,
    pub reason: Option<Reason>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::New
    }
}

impl SessionEnvelope {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn failed(reason: Reason) -> Self {
        Self {
            state: SessionState::Failed,
            reason: Some(reason),
            ..Default::default()
        }
    }
}

impl Serialize for SessionEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(id) = &self.base.id {
            map.serialize_entry("id", id)?;
        }
        if let Some(from) = &self.base.from {
            map.serialize_entry("from", from)?;
        }
        if let Some(to) = &self.base.to {
            map.serialize_entry("to", to)?;
        }
        if let Some(pp) = &self.base.pp {
            map.serialize_entry("pp", pp)?;
        }
        if let Some(metadata) = &self.base.metadata {
            map.serialize_entry("metadata", metadata)?;
        }
        map.serialize_entry("state", &self.state)?;
        if let Some(v) = &self.encryption_options {
            map.serialize_entry("encryptionOptions", v)?;
        }
        if let Some(v) = &self.encryption {
            map.serialize_entry("encryption", v)?;
        }
        if let Some(v) = &self.compression_options {
            map.serialize_entry("compressionOptions", v)?;
        }
        if let Some(v) = &self.compression {
            map.serialize_entry("compression", v)?;
        }
        if let Some(v) = &self.scheme_options {
            map.serialize_entry("schemeOptions", v)?;
        }
        if let Some(v) = &self.scheme {
            map.serialize_entry("scheme", v)?;
        }
        if let Some(auth) = &self.authentication {
            map.serialize_entry("authentication", &auth.to_value())?;
        }
        if let Some(v) = &self.reason {
            map.serialize_entry("reason", v)?;
        }
        map.end()
    }
}

struct SessionEnvelopeVisitor;

impl<'de> Visitor<'de> for SessionEnvelopeVisitor {
    type Value = SessionEnvelope;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a LIME session envelope")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut env = SessionEnvelope::default();
        let mut state_set = false;
        let mut raw_authentication: Option<Value> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "id" => env.base.id = map.next_value()?,
                "from" => env.base.from = map.next_value()?,
                "to" => env.base.to = map.next_value()?,
                "pp" => env.base.pp = map.next_value()?,
                "metadata" => env.base.metadata = map.next_value()?,
                "state" => {
                    env.state = map.next_value()?;
                    state_set = true;
                }
                "encryptionOptions" => env.encryption_options = map.next_value()?,
                "encryption" => env.encryption = map.next_value()?,
                "compressionOptions" => env.compression_options = map.next_value()?,
                "compression" => env.compression = map.next_value()?,
                "schemeOptions" => env.scheme_options = map.next_value()?,
                "scheme" => env.scheme = map.next_value()?,
                "authentication" => raw_authentication = map.next_value()?,
                "reason" => env.reason = map.next_value()?,
                _ => {
                    let _ignored: de::IgnoredAny = map.next_value()?;
                }
            }
        }

        if !state_set {
            return Err(de::Error::missing_field("state"));
        }

        if let (Some(scheme), Some(raw)) = (env.scheme, raw_authentication.clone()) {
            env.authentication = Some(
                Authentication::from_scheme_and_value(scheme, Some(raw))
                    .map_err(de::Error::custom)?,
            );
        } else if let Some(scheme) = env.scheme {
            if raw_authentication.is_some() {
                env.authentication =
                    Some(Authentication::from_scheme_and_value(scheme, raw_authentication)
                        .map_err(de::Error::custom)?);
            }
        }

        Ok(env)
    }
}

impl<'de> Deserialize<'de> for SessionEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(SessionEnvelopeVisitor)
    }
}
