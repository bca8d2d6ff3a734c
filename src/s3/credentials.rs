//! S3 credential sourcing: Shared, Auto (EC2 IMDS), and WebId (STS) modes.
//!
//! Auto mode does an IMDSv2-token fetch with silent IMDSv1 fallback
//! against `/latest/meta-data/iam/security-credentials[/<role>]`; WebId
//! mode calls AssumeRoleWithWebIdentity and parses its XML response,
//! using the crate's own `HttpClient`/`serde_json`/XML helpers.

use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::http::{HttpBody, HttpClient, HttpHeaders, HttpQuery, HttpRequest, Verb};
use crate::s3::xml;

const CRED_RENEW_WINDOW: Duration = Duration::from_secs(5 * 60);
const IMDS_HOST: &str = "169.254.169.254";
const IMDS_PATH: &str = "/latest/meta-data/iam/security-credentials";
const STS_HOST: &str = "sts.amazonaws.com";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_access_key: String,
    pub security_token: Option<String>,
    pub expiration: Option<SystemTime>,
}

impl Credentials {
    /// True when `expiration` is unset (shared static credentials never
    /// expire) or still more than the renew window away.
    pub fn needs_refresh(&self) -> bool {
        match self.expiration {
            None => false,
            Some(exp) => match exp.duration_since(SystemTime::now()) {
                Ok(remaining) => remaining < CRED_RENEW_WINDOW,
                Err(_) => true,
            },
        }
    }
}

pub enum CredentialSource {
    Shared(Credentials),
    Auto {
        role: Option<String>,
    },
    WebId {
        role_arn: String,
        token_file: String,
    },
}

#[derive(Deserialize)]
struct ImdsCredentialResponse {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "AccessKeyId")]
    access_key_id: Option<String>,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: Option<String>,
    #[serde(rename = "Token")]
    token: Option<String>,
    #[serde(rename = "Expiration")]
    expiration: Option<String>,
}

/// Parse AWS's near-ISO-8601 `YYYY-MM-DDTHH:MM:SS.MSECZ` timestamp
/// (milliseconds discarded).
pub fn parse_aws_time(s: &str) -> Result<SystemTime> {
    let b = s.as_bytes();
    if b.len() < 19 {
        bail!("timestamp too short: {}", s);
    }
    let year: i64 = s[0..4].parse().context("year")?;
    let month: i64 = s[5..7].parse().context("month")?;
    let day: i64 = s[8..10].parse().context("day")?;
    let hour: i64 = s[11..13].parse().context("hour")?;
    let minute: i64 = s[14..16].parse().context("minute")?;
    let second: i64 = s[17..19].parse().context("second")?;

    let days_from_epoch = days_from_civil(year, month, day);
    let secs = days_from_epoch * 86400 + hour * 3600 + minute * 60 + second;
    if secs < 0 {
        bail!("timestamp before unix epoch: {}", s);
    }
    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
}

/// Howard Hinnant's days-from-civil algorithm (proleptic Gregorian).
pub(crate) fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

async fn fetch_imds_token(client: &HttpClient, timeout: Duration) -> Option<String> {
    let mut headers = HttpHeaders::new();
    headers.set("x-aws-ec2-metadata-token-ttl-seconds", (timeout.as_secs() * 3).to_string());
    let request = HttpRequest {
        verb: Verb::Put,
        host: IMDS_HOST.to_string(),
        path: "/latest/api/token".to_string(),
        query: HttpQuery::new(),
        headers,
        body: HttpBody::Empty,
    };
    match client.send(request).await {
        Ok(resp) if resp.status.is_success() => resp.into_body_bytes(4096).await.ok().map(|b| String::from_utf8_lossy(&b).into_owned()),
        _ => {
            log::debug!("IMDSv2 token request failed, falling back to IMDSv1");
            None
        }
    }
}

/// Retrieve temporary credentials from EC2 instance metadata. `role` is
/// discovered via a request to the base credentials path when unset.
pub async fn fetch_auto_credentials(client: &HttpClient, role: &mut Option<String>, timeout: Duration) -> Result<Credentials> {
    let token = fetch_imds_token(client, timeout).await;

    let mut headers = HttpHeaders::new();
    if let Some(t) = &token {
        headers.set("x-aws-ec2-metadata-token", t.clone());
    }
    headers.set("host", IMDS_HOST);

    if role.is_none() {
        let request = HttpRequest {
            verb: Verb::Get,
            host: IMDS_HOST.to_string(),
            path: IMDS_PATH.to_string(),
            query: HttpQuery::new(),
            headers: headers.clone(),
            body: HttpBody::Empty,
        };
        let response = client.send(request).await?;
        if response.status == hyper::StatusCode::NOT_FOUND {
            bail!("role to retrieve temporary credentials not found\nHINT: is a valid IAM role associated with this instance?");
        }
        if !response.status.is_success() {
            bail!("unable to retrieve IAM role list: http status {}", response.status);
        }
        let body = response.into_body_bytes(4096).await?;
        *role = Some(String::from_utf8_lossy(&body).trim().to_string());
    }
    let role_name = role.as_deref().unwrap();

    let request = HttpRequest {
        verb: Verb::Get,
        host: IMDS_HOST.to_string(),
        path: format!("{}/{}", IMDS_PATH, role_name),
        query: HttpQuery::new(),
        headers,
        body: HttpBody::Empty,
    };
    let response = client.send(request).await?;
    if response.status == hyper::StatusCode::NOT_FOUND {
        bail!("role '{}' not found\nHINT: is '{}' a valid IAM role associated with this instance?", role_name, role_name);
    }
    if !response.status.is_success() {
        bail!("unable to retrieve temporary credentials: http status {}", response.status);
    }
    let body = response.into_body_bytes(1 << 16).await?;
    let parsed: ImdsCredentialResponse = serde_json::from_slice(&body).context("parsing IMDS credential response")?;

    if parsed.code != "Success" {
        bail!("unable to retrieve temporary credentials: {}", parsed.code);
    }
    let access_key = parsed.access_key_id.context("access key missing")?;
    let secret_access_key = parsed.secret_access_key.context("secret access key missing")?;
    let security_token = parsed.token.context("token missing")?;
    let expiration_str = parsed.expiration.context("expiration missing")?;

    Ok(Credentials {
        access_key,
        secret_access_key,
        security_token: Some(security_token),
        expiration: Some(parse_aws_time(&expiration_str)?),
    })
}

/// Exchange a web-identity token (read fresh from `token_file` on every
/// refresh) for STS credentials via AssumeRoleWithWebIdentity.
pub async fn fetch_webid_credentials(
    client: &HttpClient,
    role_arn: &str,
    token_file: &str,
) -> Result<Credentials> {
    let web_id_token = tokio::fs::read_to_string(token_file)
        .await
        .with_context(|| format!("reading web identity token file '{}'", token_file))?;
    let web_id_token = web_id_token.trim();

    let mut query = HttpQuery::new();
    query.add("Action", "AssumeRoleWithWebIdentity").unwrap();
    query.add("RoleArn", role_arn).unwrap();
    query.add("RoleSessionName", "pg-backrest-engine").unwrap();
    query.add("Version", "2011-06-15").unwrap();
    query.add("WebIdentityToken", web_id_token).unwrap();

    let mut headers = HttpHeaders::new();
    headers.set("host", STS_HOST);

    let request = HttpRequest {
        verb: Verb::Get,
        host: STS_HOST.to_string(),
        path: "/".to_string(),
        query,
        headers,
        body: HttpBody::Empty,
    };
    let response = client.send(request).await?;
    if response.status == hyper::StatusCode::NOT_FOUND {
        bail!("invalid response code from STS");
    }
    let body = response.into_body_bytes(1 << 16).await?;
    let doc = xml::parse(&body)?;
    let cred = doc
        .child("AssumeRoleWithWebIdentityResult")
        .and_then(|n| n.child("Credentials"))
        .context("missing Credentials element in STS response")?;

    let access_key = cred.child_text("AccessKeyId").context("AccessKeyId missing")?;
    let secret_access_key = cred.child_text("SecretAccessKey").context("SecretAccessKey missing")?;
    let security_token = cred.child_text("SessionToken").context("SessionToken missing")?;
    let expiration = cred.child_text("Expiration").context("Expiration missing")?;

    Ok(Credentials {
        access_key,
        secret_access_key,
        security_token: Some(security_token),
        expiration: Some(parse_aws_time(&expiration)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aws_timestamp() {
        let t = parse_aws_time("2020-01-02T03:04:05.000Z").unwrap();
        let secs = t.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, 1577934245);
    }

    #[test]
    fn credentials_need_refresh_within_window() {
        let soon = Credentials {
            access_key: "a".into(),
            secret_access_key: "b".into(),
            security_token: None,
            expiration: Some(SystemTime::now() + Duration::from_secs(60)),
        };
        assert!(soon.needs_refresh());

        let later = Credentials {
            expiration: Some(SystemTime::now() + Duration::from_secs(3600)),
            ..soon
        };
        assert!(!later.needs_refresh());
    }

    #[test]
    fn shared_credentials_never_need_refresh() {
        let shared = Credentials {
            access_key: "a".into(),
            secret_access_key: "b".into(),
            security_token: None,
            expiration: None,
        };
        assert!(!shared.needs_refresh());
    }
}
