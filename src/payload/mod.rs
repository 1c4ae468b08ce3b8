//! Payload normalization.
//!
//! Application messages arrive in many shapes. [`normalize`] runs an ordered
//! chain of recognizers over a [`MessageSource`] and always produces a
//! serialization-safe [`serde_json::Value`]:
//!
//! 1. structured model export
//! 2. HTTP-style response (status + body)
//! 3. generic attribute map
//! 4. plain string form
//!
//! A recognizer that matches but fails yields a degraded
//! `{type, message, error}` value instead of an error.

mod codec;

pub use codec::{CodecError, EventCodec, DEFAULT_COMPRESSION_LEVEL};

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Map, Value};

/// A message that can be stored as an event payload.
///
/// Every capability except [`MessageSource::describe`] is optional; the
/// recognizer chain uses the first one a message exposes.
pub trait MessageSource {
    /// Human-readable string form, used by the fallback recognizer.
    fn describe(&self) -> String;

    /// Best-effort type name for diagnostics.
    fn type_name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Structured export of the whole message.
    fn model_export(&self) -> Option<Result<Value, String>> {
        None
    }

    /// Status code and raw body of an HTTP-style response.
    fn http_response(&self) -> Option<HttpResponseParts> {
        None
    }

    /// Named attributes of the message.
    fn attributes(&self) -> Option<Vec<(String, Attribute)>> {
        None
    }
}

/// Status and body of an HTTP-like response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseParts {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Already serialization-safe.
    Safe(Value),
    /// Not serializable; carries the attribute's string form.
    Opaque(String),
}

/// Result of the recognizer chain, before rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognized {
    Model(Value),
    HttpStructured { status: u16, body: Value },
    HttpText { status: u16, body: String },
    Attributes(Map<String, Value>),
    Plain { type_name: String, message: String },
    Degraded {
        type_name: String,
        message: String,
        error: String,
    },
}

impl Recognized {
    pub fn into_value(self) -> Value {
        match self {
            Recognized::Model(value) => value,
            Recognized::HttpStructured { status, body } => {
                json!({ "status_code": status, "body": body })
            }
            Recognized::HttpText { status, body } => {
                json!({ "status_code": status.to_string(), "body": body })
            }
            Recognized::Attributes(map) => Value::Object(map),
            Recognized::Plain { type_name, message } => {
                json!({ "message": message, "type": type_name })
            }
            Recognized::Degraded {
                type_name,
                message,
                error,
            } => json!({ "type": type_name, "message": message, "error": error }),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Recognized::Degraded { .. })
    }
}

type Recognizer = fn(&dyn MessageSource) -> Option<Recognized>;

const RECOGNIZERS: &[Recognizer] = &[recognize_model, recognize_http, recognize_attributes];

/// Run the recognizer chain. Total: never fails.
pub fn recognize(message: &dyn MessageSource) -> Recognized {
    RECOGNIZERS
        .iter()
        .find_map(|recognizer| recognizer(message))
        .unwrap_or_else(|| Recognized::Plain {
            type_name: message.type_name(),
            message: message.describe(),
        })
}

/// Normalize a message into a serialization-safe value.
pub fn normalize(message: &dyn MessageSource) -> Value {
    let recognized = recognize(message);
    if let Recognized::Degraded { ref error, .. } = recognized {
        tracing::warn!(error = %error, "Payload normalization degraded");
    }
    recognized.into_value()
}

fn recognize_model(message: &dyn MessageSource) -> Option<Recognized> {
    match message.model_export()? {
        Ok(value) => Some(Recognized::Model(value)),
        Err(error) => Some(degraded(message, error)),
    }
}

fn recognize_http(message: &dyn MessageSource) -> Option<Recognized> {
    let HttpResponseParts { status, body } = message.http_response()?;
    Some(match serde_json::from_slice::<Value>(&body) {
        Ok(body) => Recognized::HttpStructured { status, body },
        Err(_) => Recognized::HttpText {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        },
    })
}

fn recognize_attributes(message: &dyn MessageSource) -> Option<Recognized> {
    let attributes = message.attributes()?;
    let map = attributes
        .into_iter()
        .map(|(name, attribute)| {
            let value = match attribute {
                Attribute::Safe(value) => value,
                Attribute::Opaque(repr) => Value::String(repr),
            };
            (name, value)
        })
        .collect();
    Some(Recognized::Attributes(map))
}

fn degraded(message: &dyn MessageSource, error: String) -> Recognized {
    Recognized::Degraded {
        type_name: message.type_name(),
        message: message.describe(),
        error,
    }
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

// ============================================================================
// Common message shapes
// ============================================================================

impl MessageSource for Value {
    fn describe(&self) -> String {
        self.to_string()
    }

    fn type_name(&self) -> String {
        "Value".to_string()
    }

    fn model_export(&self) -> Option<Result<Value, String>> {
        Some(Ok(self.clone()))
    }
}

impl MessageSource for &str {
    fn describe(&self) -> String {
        (*self).to_string()
    }

    fn type_name(&self) -> String {
        "str".to_string()
    }
}

impl MessageSource for String {
    fn describe(&self) -> String {
        self.clone()
    }

    fn type_name(&self) -> String {
        "String".to_string()
    }
}

/// Wraps any `Serialize` type as a structured-export message.
#[derive(Debug, Clone)]
pub struct Model<T>(pub T);

impl<T: Serialize + fmt::Debug> MessageSource for Model<T> {
    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }

    fn type_name(&self) -> String {
        short_type_name(std::any::type_name::<T>())
    }

    fn model_export(&self) -> Option<Result<Value, String>> {
        Some(serde_json::to_value(&self.0).map_err(|e| e.to_string()))
    }
}

/// An HTTP-style response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

impl MessageSource for HttpResponse {
    fn describe(&self) -> String {
        format!(
            "HttpResponse({}, {})",
            self.status,
            String::from_utf8_lossy(&self.body)
        )
    }

    fn type_name(&self) -> String {
        "HttpResponse".to_string()
    }

    fn http_response(&self) -> Option<HttpResponseParts> {
        Some(HttpResponseParts {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

/// A named bag of attributes, for messages without a structured export.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    type_name: String,
    attributes: BTreeMap<String, Attribute>,
}

impl AttributeMap {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add a serializable attribute, or its string form if it fails to serialize.
    pub fn with<T: Serialize + fmt::Debug>(mut self, name: impl Into<String>, value: T) -> Self {
        let attribute = match serde_json::to_value(&value) {
            Ok(v) => Attribute::Safe(v),
            Err(_) => Attribute::Opaque(format!("{:?}", value)),
        };
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Add an attribute known to be non-serializable.
    pub fn with_opaque(mut self, name: impl Into<String>, repr: impl fmt::Display) -> Self {
        self.attributes
            .insert(name.into(), Attribute::Opaque(repr.to_string()));
        self
    }
}

impl MessageSource for AttributeMap {
    fn describe(&self) -> String {
        format!("{}({} attributes)", self.type_name, self.attributes.len())
    }

    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn attributes(&self) -> Option<Vec<(String, Attribute)>> {
        Some(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
