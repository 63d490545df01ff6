use agent_console_error::{message_from_body, ConsoleError};
use agent_console_settings::{AgentSettings, ConfigInfo};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::backend::{SessionBackend, SettingsBackend};
use crate::session::{Session, SessionId};

/// REST implementation of the session and settings backends.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ConsoleError> {
        Url::parse(base_url).map_err(|err| {
            ConsoleError::invalid_config(format!("invalid server URL {base_url}: {err}"))
        })?;
        let client = Client::builder()
            .build()
            .map_err(|err| ConsoleError::invalid_config(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String), ConsoleError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        debug!(status = %status, "backend response");
        Ok((status, text))
    }

    /// Sends the request and unwraps the `{status, data, message}` envelope.
    async fn call(&self, builder: RequestBuilder) -> Result<Value, ConsoleError> {
        let (status, text) = self.send(builder).await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        unwrap_envelope(&text)
    }

    async fn call_data<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ConsoleError> {
        let data = self.call(builder).await?;
        decode(data)
    }
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, ConsoleError> {
        let request = self
            .request(Method::GET, "/sessions/")
            .query(&[("user_id", user_id)]);
        self.call_data(request).await
    }

    async fn get_session(
        &self,
        id: SessionId,
        user_id: &str,
    ) -> Result<Option<Session>, ConsoleError> {
        let request = self
            .request(Method::GET, &format!("/sessions/{id}"))
            .query(&[("user_id", user_id)]);
        let (status, text) = self.send(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        // `{"status": false}` without data is how a missing session is reported.
        let envelope: Value = serde_json::from_str(&text).map_err(decode_error)?;
        if envelope.get("status") == Some(&Value::Bool(false))
            && envelope.get("data").map_or(true, Value::is_null)
        {
            return Ok(None);
        }
        match unwrap_envelope(&text)? {
            Value::Null => Ok(None),
            data => decode(data).map(Some),
        }
    }

    async fn create_session(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Session, ConsoleError> {
        let body = with_fields(session, &[("user_id", Value::from(user_id))])?;
        self.call_data(self.request(Method::POST, "/sessions/").json(&body))
            .await
    }

    async fn update_session(
        &self,
        id: SessionId,
        session: &Session,
        user_id: &str,
    ) -> Result<Session, ConsoleError> {
        let body = with_fields(
            session,
            &[("id", Value::from(id.0)), ("user_id", Value::from(user_id))],
        )?;
        self.call_data(
            self.request(Method::PUT, &format!("/sessions/{id}"))
                .json(&body),
        )
        .await
    }

    async fn delete_session(&self, id: SessionId, user_id: &str) -> Result<(), ConsoleError> {
        let request = self
            .request(Method::DELETE, &format!("/sessions/{id}"))
            .query(&[("user_id", user_id)]);
        self.call(request).await.map(|_| ())
    }
}

#[async_trait]
impl SettingsBackend for HttpBackend {
    async fn get_settings(&self, user_id: &str) -> Result<AgentSettings, ConsoleError> {
        let request = self
            .request(Method::GET, "/settings/")
            .query(&[("user_id", user_id)]);
        match self.call(request).await? {
            Value::Null => Ok(AgentSettings::default()),
            data => decode(data),
        }
    }

    async fn update_settings(
        &self,
        user_id: &str,
        settings: &AgentSettings,
    ) -> Result<(), ConsoleError> {
        let body = with_fields(settings, &[("user_id", Value::from(user_id))])?;
        self.call(self.request(Method::PUT, "/settings/").json(&body))
            .await
            .map(|_| ())
    }

    async fn config_info(&self) -> Result<Option<ConfigInfo>, ConsoleError> {
        let request = self.request(Method::GET, "/settings/config-info");
        let (status, text) = self.send(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        decode(unwrap_envelope(&text)?).map(Some)
    }
}

/// Returns `data` from an enveloped body, or the body itself when it is not
/// enveloped. `{"status": false}` becomes a backend error.
fn unwrap_envelope(text: &str) -> Result<Value, ConsoleError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let mut value: Value = serde_json::from_str(text).map_err(decode_error)?;
    let Some(status) = value.get("status").and_then(Value::as_bool) else {
        return Ok(value);
    };
    if !status {
        return Err(ConsoleError::Backend {
            status: None,
            message: message_from_body(text),
        });
    }
    Ok(value
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

fn with_fields<T: Serialize>(body: &T, fields: &[(&str, Value)]) -> Result<Value, ConsoleError> {
    let mut value = serde_json::to_value(body)
        .map_err(|err| ConsoleError::invalid_request(format!("failed to encode request: {err}")))?;
    if let Value::Object(map) = &mut value {
        for (key, field) in fields {
            map.insert((*key).to_string(), field.clone());
        }
    }
    Ok(value)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ConsoleError> {
    serde_json::from_value(value).map_err(decode_error)
}

fn decode_error(err: serde_json::Error) -> ConsoleError {
    ConsoleError::backend(format!("unexpected response body: {err}"))
}

fn transport_error(err: reqwest::Error) -> ConsoleError {
    ConsoleError::Backend {
        status: err.status().map(|status| status.as_u16()),
        message: err.to_string(),
    }
}

fn status_error(status: StatusCode, text: &str) -> ConsoleError {
    let message = message_from_body(text);
    ConsoleError::Backend {
        status: Some(status.as_u16()),
        message: if message.is_empty() {
            status.to_string()
        } else {
            message
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_are_unwrapped() {
        assert_eq!(
            unwrap_envelope(r#"{"status": true, "data": [1, 2]}"#).expect("data"),
            serde_json::json!([1, 2])
        );
        assert_eq!(
            unwrap_envelope(r#"{"has_config_file": false}"#).expect("raw"),
            serde_json::json!({"has_config_file": false})
        );
        let err = unwrap_envelope(r#"{"status": false, "message": "Database unavailable"}"#)
            .expect_err("failure");
        assert_eq!(err.to_string(), "backend error: Database unavailable");
    }

    #[test]
    fn rejects_malformed_base_urls() {
        let err = HttpBackend::new("not a url", None).expect_err("invalid");
        assert!(err.is_fatal());
        let backend = HttpBackend::new("http://localhost:8081/api/", None).expect("valid");
        assert_eq!(backend.base_url(), "http://localhost:8081/api");
    }
}
