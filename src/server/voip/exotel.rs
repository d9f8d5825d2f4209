//! Exotel connect API dialect (form bodies in, XML out)

use reqwest::Method;

use super::http::ProviderHttp;
use super::{signature, AdapterError, UNKNOWN_STATUS};
use crate::models::CallSession;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Text of `<tag>` inside the first `<Call>` element. Attributes on either
/// tag are ignored and CDATA sections are taken verbatim.
fn call_element(xml: &str, tag: &str) -> Option<String> {
    let (after_call, _) = open_tag(xml, "Call")?;
    let call = close_tag(after_call, "Call").unwrap_or(after_call);
    let (after, self_closing) = open_tag(call, tag)?;
    if self_closing {
        return None;
    }
    let text = element_text(close_tag(after, tag)?);
    let value = text.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Input after the first `<tag>` or `<tag attr="..">`, and whether it was `<tag/>`.
fn open_tag<'a>(xml: &'a str, tag: &str) -> Option<(&'a str, bool)> {
    let mut from = 0;
    loop {
        let at = from + xml[from..].find('<')?;
        if let Some(after) = xml[at + 1..].strip_prefix(tag) {
            match after.chars().next() {
                Some('>') => return Some((&after[1..], false)),
                Some(c) if c.is_whitespace() || c == '/' => {
                    let end = after.find('>')?;
                    return Some((&after[end + 1..], after[..end].ends_with('/')));
                }
                _ => {}
            }
        }
        from = at + 1;
    }
}

/// Content up to the matching `</tag>`, stepping over CDATA sections.
fn close_tag<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let close = format!("</{tag}");
    let mut pos = 0;
    loop {
        let at = pos + body[pos..].find('<')?;
        let rest = &body[at..];
        if rest.starts_with(CDATA_OPEN) {
            pos = at + rest.find(CDATA_CLOSE)? + CDATA_CLOSE.len();
            continue;
        }
        if let Some(after) = rest.strip_prefix(close.as_str()) {
            if after.trim_start().starts_with('>') {
                return Some(&body[..at]);
            }
        }
        pos = at + 1;
    }
}

fn element_text(raw: &str) -> String {
    let mut out = String::new();
    let mut rest = raw;
    while let Some(start) = rest.find(CDATA_OPEN) {
        out.push_str(&unescape(&rest[..start]));
        let inner = &rest[start + CDATA_OPEN.len()..];
        let end = inner.find(CDATA_CLOSE).unwrap_or(inner.len());
        out.push_str(&inner[..end]);
        rest = inner.get(end + CDATA_CLOSE.len()..).unwrap_or("");
    }
    out.push_str(&unescape(rest));
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[derive(Clone)]
pub struct ExotelAdapter {
    http: ProviderHttp,
}

impl ExotelAdapter {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn authed(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let creds = &self.http.provider.credentials;
        self.http
            .request(method, path)
            .basic_auth(&creds.api_key, Some(&creds.api_secret))
    }

    fn calls_path(&self, suffix: &str) -> String {
        format!(
            "/v1/Accounts/{}/Calls{}",
            self.http.provider.credentials.api_key, suffix
        )
    }

    pub async fn initiate_call(&self, session: &CallSession) -> Result<String, AdapterError> {
        let provider = &self.http.provider;
        let timeout = provider.timeout_seconds.max(1).to_string();
        let form = [
            ("From", provider.sender_number.as_str()),
            ("To", session.to_phone.as_str()),
            ("CallerId", provider.caller_id.as_str()),
            ("Timeout", timeout.as_str()),
        ];
        let response = self
            .http
            .send(self.authed(Method::POST, &self.calls_path("/connect")).form(&form))
            .await?;
        call_element(&response, "Sid")
            .ok_or_else(|| AdapterError::Parse("Call Sid missing from Exotel response".to_string()))
    }

    pub async fn end_call(&self, external_id: &str) -> Result<(), AdapterError> {
        self.http
            .send(self.authed(Method::POST, &self.calls_path(&format!("/{external_id}"))))
            .await?;
        Ok(())
    }

    pub async fn transfer_call(&self, external_id: &str, to_phone: &str) -> Result<(), AdapterError> {
        self.http
            .send(
                self.authed(Method::POST, &self.calls_path(&format!("/{external_id}")))
                    .form(&[("ForwardingPhoneNumber", to_phone)]),
            )
            .await?;
        Ok(())
    }

    pub async fn get_call_status(&self, external_id: &str) -> Result<String, AdapterError> {
        let body = self
            .http
            .send_lenient(self.authed(Method::GET, &self.calls_path(&format!("/{external_id}"))))
            .await?;
        Ok(body
            .and_then(|b| call_element(&b, "Status"))
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()))
    }

    /// Hex HMAC-SHA256 over the body, keyed by the webhook secret or the API secret.
    pub fn validate_webhook_signature(&self, payload: &[u8], sig: &str) -> bool {
        let creds = &self.http.provider.credentials;
        let secret = creds
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&creds.api_secret);
        !secret.is_empty() && signature::verify_sha256_hex(secret, payload, sig)
    }
}
