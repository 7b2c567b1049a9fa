//! One-shot messages carried to the next rendered page in a cookie.

use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::SET_COOKIE, request::Parts, HeaderName, HeaderValue},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cookies;

pub const FLASH_COOKIE: &str = "authgate_flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Error,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub kind: FlashKind,
    pub text: String,
}

impl FlashMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            text: text.into(),
        }
    }

    pub fn global(text: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Global,
            text: text.into(),
        }
    }
}

pub fn encode(messages: &[FlashMessage]) -> anyhow::Result<String> {
    let json = serde_json::to_vec(messages)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

pub fn decode(value: &str) -> Option<Vec<FlashMessage>> {
    let json = Base64UrlUnpadded::decode_vec(value).ok()?;
    serde_json::from_slice(&json).ok()
}

/// 303 to `to`, carrying `messages` for the page rendered there.
pub fn redirect(to: &str, messages: &[FlashMessage], secure: bool) -> anyhow::Result<Response> {
    if messages.is_empty() {
        return Ok(Redirect::to(to).into_response());
    }
    // Sessionless pages use a short-lived cookie; it is dropped on first render.
    let cookie = cookies::set(FLASH_COOKIE, &encode(messages)?, 300, secure)?;
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::to(to)).into_response())
}

/// Messages flashed by the previous request.
#[derive(Debug, Default)]
pub struct Flash(pub Vec<FlashMessage>);

impl Flash {
    /// `Set-Cookie` that consumes the flash, when there was one.
    pub fn consume(&self, secure: bool) -> Option<(HeaderName, HeaderValue)> {
        if self.0.is_empty() {
            return None;
        }
        cookies::clear(FLASH_COOKIE, secure).ok().map(|v| (SET_COOKIE, v))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Flash {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let messages = cookies::read(&parts.headers, FLASH_COOKIE)
            .and_then(|v| {
                let decoded = decode(v);
                if decoded.is_none() {
                    debug!("dropping undecodable flash cookie");
                }
                decoded
            })
            .unwrap_or_default();
        Ok(Flash(messages))
    }
}
