use crate::domain::{Credentials, ServiceAddress, VersionClient};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::time::Duration;

pub const INFO_PATH: &str = "/opennms/rest/info";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    #[serde(default)]
    display_version: Option<String>,
}

/// Reads the version a core server reports on its REST info endpoint.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::blocking::Client,
    credentials: Credentials,
}

impl RestClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("criando cliente HTTP")?;
        Ok(Self { http, credentials })
    }
}

impl VersionClient for RestClient {
    fn display_version(&self, addr: &ServiceAddress) -> Result<String> {
        let url = format!("http://{addr}{INFO_PATH}");
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} retornou {status}");
        }

        let body = response.text().with_context(|| format!("lendo resposta de {url}"))?;
        parse_display_version(&body)
    }
}

fn parse_display_version(body: &str) -> Result<String> {
    let info: InfoResponse = serde_json::from_str(body).context("resposta de info inválida")?;
    Ok(info.display_version.unwrap_or_default())
}
