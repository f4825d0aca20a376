use std::time::Duration;

use reqwest::{Client, Error, header};

use crate::gateway::constants::USER_AGENT;

pub struct HttpClient;

impl HttpClient {
    /// Client preconfigured with bot authorization for the Discord REST API.
    pub fn discord(token: &str) -> Result<Client, Error> {
        let mut headers = header::HeaderMap::new();
        if let Ok(mut auth) = header::HeaderValue::from_str(&format!("Bot {}", token)) {
            auth.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth);
        }
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
    }
}
