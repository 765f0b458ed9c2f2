use std::net::TcpListener;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};
use urlencoding::encode;

use crate::error::ValidationError;
use crate::osu_api::http_client;

pub const AUTHORIZE_URL: &str = "https://osu.ppy.sh/oauth/authorize";
pub const TOKEN_URL: &str = "https://osu.ppy.sh/oauth/token";
const SUCCESS_PAGE: &str = "Success! You can now close this window.";

static CODE_RE: OnceCell<Regex> = OnceCell::new();

#[derive(Clone, Debug)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_port: u16,
}

impl OAuthApp {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return Err(ValidationError::MissingClientCredentials);
        }
        Ok(())
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.redirect_port)
    }

    pub fn authorize_url(&self) -> String {
        format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope=public",
            encode(&self.client_id),
            encode(&self.redirect_uri()),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

pub fn extract_code(request_target: &str) -> Option<String> {
    let re = CODE_RE
        .get_or_try_init(|| Regex::new(r"[?&]code=([^&#\s]+)"))
        .ok()?;
    re.captures(request_target)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Answers exactly one request on `server` and returns the `code` it carried.
pub fn wait_for_code(server: &Server) -> Result<String> {
    let request = server.recv().context("waiting for the OAuth redirect")?;
    let target = request.url().to_string();
    match extract_code(&target) {
        Some(code) => {
            let header = Header::from_bytes(&b"Content-Type"[..], &b"text/plain; charset=utf-8"[..])
                .map_err(|_| anyhow!("invalid header"))?;
            if let Err(err) = request.respond(Response::from_string(SUCCESS_PAGE).with_header(header)) {
                warn!("could not answer the browser: {err}");
            }
            Ok(code)
        }
        None => {
            let _ = request.respond(
                Response::from_string("No authorization code in the request.")
                    .with_status_code(400),
            );
            bail!("redirect did not include an authorization code: {target}")
        }
    }
}

pub fn exchange_code(
    client: &Client,
    token_url: &str,
    app: &OAuthApp,
    code: &str,
) -> Result<TokenResponse> {
    let redirect_uri = app.redirect_uri();
    let form = [
        ("client_id", app.client_id.as_str()),
        ("client_secret", app.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri.as_str()),
    ];
    let resp = client
        .post(token_url)
        .header(ACCEPT, "application/json")
        .form(&form)
        .send()
        .with_context(|| format!("requesting token from {token_url}"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        bail!("token exchange failed with HTTP {}: {body}", status.as_u16());
    }
    resp.json::<TokenResponse>()
        .context("token response was not the expected JSON")
}

/// Full authorization-code flow: open the browser, wait for the loopback
/// redirect, trade the code for an access token.
pub fn login(app: &OAuthApp, notify: &mut dyn FnMut(&str)) -> Result<String> {
    app.validate()?;
    let listener = TcpListener::bind(("127.0.0.1", app.redirect_port))
        .with_context(|| format!("binding localhost:{}", app.redirect_port))?;
    let server = Server::from_listener(listener, None).map_err(|e| anyhow!(e.to_string()))?;

    let url = app.authorize_url();
    notify("opening the browser to authorize");
    if let Err(err) = open::that(&url) {
        warn!("could not open a browser: {err}");
        notify(&format!("open this URL to continue: {url}"));
    }
    notify(&format!("waiting for the callback on {}", app.redirect_uri()));
    let code = wait_for_code(&server)?;

    let client = http_client(Duration::from_secs(30))?;
    let token = exchange_code(&client, TOKEN_URL, app, &code)?;
    info!(
        "token obtained ({}, expires in {:?}s)",
        token.token_type.as_deref().unwrap_or("bearer"),
        token.expires_in
    );
    Ok(token.access_token)
}
