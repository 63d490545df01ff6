use agent_console_error::ConsoleError;
use url::Url;

const API_PATH: &str = "/api";

/// Builds run stream URLs from the configured server URL and the page the
/// console is served from.
#[derive(Debug, Clone)]
pub struct StreamEndpoint {
    server_url: String,
    page: Url,
}

impl StreamEndpoint {
    pub fn new(server_url: impl Into<String>, page: Url) -> Self {
        Self {
            server_url: server_url.into(),
            page,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// `host[:port]` the stream server listens on.
    pub fn host(&self) -> Result<String, ConsoleError> {
        let raw = self.server_url.trim();
        if raw.is_empty() {
            return Err(ConsoleError::invalid_config("server URL is empty"));
        }
        let rest = strip_scheme(raw);
        let host = if rest.starts_with("localhost") {
            rest.replacen(API_PATH, "", 1)
        } else if rest == API_PATH {
            page_host(&self.page).ok_or_else(|| {
                ConsoleError::invalid_config(format!(
                    "server URL {raw} is relative but page {} has no host",
                    self.page
                ))
            })?
        } else {
            rest.replacen(API_PATH, "", 1)
        };
        let host = host.strip_suffix('/').unwrap_or(&host).to_string();

        if host.is_empty() || Url::parse(&format!("ws://{host}/")).is_err() {
            return Err(ConsoleError::invalid_config(format!(
                "server URL is not usable for streaming: {raw}"
            )));
        }
        Ok(host)
    }

    pub fn scheme(&self) -> &'static str {
        if self.page.scheme() == "https" {
            "wss"
        } else {
            "ws"
        }
    }

    pub fn run_url(&self, run_id: &str) -> Result<String, ConsoleError> {
        Ok(format!(
            "{}://{}/api/ws/runs/{run_id}",
            self.scheme(),
            self.host()?
        ))
    }
}

/// Drops a leading `scheme://` or bare `//`.
fn strip_scheme(url: &str) -> &str {
    if let Some(rest) = url.strip_prefix("//") {
        return rest;
    }
    if let Some((scheme, rest)) = url.split_once("://") {
        let is_word = !scheme.is_empty()
            && scheme
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if is_word {
            return rest;
        }
    }
    url
}

fn page_host(page: &Url) -> Option<String> {
    let host = page.host_str()?;
    Some(match page.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
