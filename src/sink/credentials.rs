//! Blob storage connection strings and request signing.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

const DEV_STORAGE_ACCOUNT: &str = "devstoreaccount1";
const DEV_STORAGE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_STORAGE_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Clone)]
pub enum BlobAuth {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

impl std::fmt::Debug for BlobAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobAuth::SharedKey { account, .. } => {
                write!(f, "SharedKey {{ account: {:?}, key: <redacted> }}", account)
            }
            BlobAuth::Sas(_) => write!(f, "Sas(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobCredentials {
    /// Service endpoint without trailing slash, e.g.
    /// `https://myaccount.blob.core.windows.net`.
    pub endpoint: String,
    pub auth: BlobAuth,
}

impl BlobCredentials {
    /// Parse a storage connection string
    /// (`DefaultEndpointsProtocol=https;AccountName=...;AccountKey=...`).
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for part in connection_string.split(';').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .with_context(|| format!("Malformed connection string segment '{}'", part))?;
            fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if fields
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                endpoint: DEV_STORAGE_ENDPOINT.to_string(),
                auth: BlobAuth::SharedKey {
                    account: DEV_STORAGE_ACCOUNT.to_string(),
                    key: STANDARD.decode(DEV_STORAGE_KEY)?,
                },
            });
        }

        let account = fields.get("accountname").cloned();
        let endpoint = match (fields.get("blobendpoint"), &account) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(account)) => {
                let protocol = fields
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = fields
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{}://{}.blob.{}", protocol, account, suffix)
            }
            (None, None) => bail!("Connection string needs either BlobEndpoint or AccountName"),
        };

        let auth = if let Some(sas) = fields.get("sharedaccesssignature") {
            BlobAuth::Sas(sas.trim_start_matches('?').to_string())
        } else {
            let account = account.context("Connection string has no AccountName")?;
            let key = fields
                .get("accountkey")
                .context("Connection string has neither AccountKey nor SharedAccessSignature")?;
            let key = STANDARD
                .decode(key)
                .context("AccountKey is not valid base64")?;
            BlobAuth::SharedKey { account, key }
        };

        Ok(Self { endpoint, auth })
    }
}

/// Build the Shared Key string-to-sign of a `PUT` without conditional
/// headers. `x_ms_headers` must be lowercase and sorted by name.
pub fn put_string_to_sign(
    content_length: usize,
    content_type: &str,
    x_ms_headers: &[(&str, &str)],
    account: &str,
    url_path: &str,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let canonical_headers: String = x_ms_headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    format!(
        "PUT\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}/{}{}",
        content_length, content_type, canonical_headers, account, url_path
    )
}

/// Base64 HMAC-SHA256 of `string_to_sign` under the decoded account key.
pub fn sign(key: &[u8], string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key).context("Invalid account key")?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
