//! Sentinel-1 orbit file retrieval from the Copernicus Data Space Ecosystem.
//!
//! Precise orbits (AUX_POEORB) are preferred; restituted orbits (AUX_RESORB)
//! are a fallback for recent acquisitions. Catalogue queries are anonymous,
//! the download itself needs an OIDC bearer token obtained with the resolved
//! ESA credentials.
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};
use crate::scene;

const CDSE_TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
const CDSE_CATALOGUE_URL: &str = "https://catalogue.dataspace.copernicus.eu/odata/v1/Products";
const CDSE_DOWNLOAD_URL: &str = "https://zipper.dataspace.copernicus.eu/odata/v1/Products";
const CDSE_CLIENT_ID: &str = "cdse-public";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrbitKind {
    Precise,
    Restituted,
}

impl OrbitKind {
    pub fn product_type(&self) -> &'static str {
        match self {
            Self::Precise => "AUX_POEORB",
            Self::Restituted => "AUX_RESORB",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ProductList {
    value: Vec<ProductEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

/// Download the best available orbit file for `granule` into `directory`.
/// Returns the local path and the precision class that was found.
pub async fn download_orbit_file(
    client: &reqwest::Client,
    credentials: &CredentialBundle,
    granule: &str,
    directory: &Path,
) -> Result<(PathBuf, OrbitKind)> {
    let platform = granule
        .get(0..3)
        .filter(|p| p.starts_with("S1"))
        .ok_or_else(|| Error::Argument(format!("not a Sentinel-1 granule: {granule}")))?;
    let acquired = scene::acquisition_datetime(granule)?;

    std::fs::create_dir_all(directory)?;

    for kind in [OrbitKind::Precise, OrbitKind::Restituted] {
        let candidates = query_catalogue(client, platform, kind, acquired).await?;
        if let Some(entry) = select_orbit(&candidates, acquired) {
            info!(name = %entry.name, kind = kind.product_type(), "found orbit file");
            let path = fetch_product(client, credentials, entry, directory).await?;
            return Ok((path, kind));
        }
    }

    Err(Error::Download(format!(
        "no orbit file available for {granule}"
    )))
}

async fn query_catalogue(
    client: &reqwest::Client,
    platform: &str,
    kind: OrbitKind,
    acquired: NaiveDateTime,
) -> Result<Vec<ProductEntry>> {
    let url = format!(
        "{CDSE_CATALOGUE_URL}?$filter={}&$orderby=Name desc&$top=20",
        catalogue_filter(platform, kind, acquired)
    );
    let products: ProductList = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(products.value)
}

fn catalogue_filter(platform: &str, kind: OrbitKind, acquired: NaiveDateTime) -> String {
    let timestamp = acquired.format("%Y-%m-%dT%H:%M:%S.000Z");
    format!(
        "startswith(Name,'{platform}') and contains(Name,'{product_type}') \
         and ContentDate/Start lt {timestamp} and ContentDate/End gt {timestamp}",
        product_type = kind.product_type(),
    )
}

/// Pick the entry whose validity window covers the acquisition, preferring
/// the most recently generated file. Orbit names end in
/// `V<start>_<stop>.EOF`.
fn select_orbit<'a>(entries: &'a [ProductEntry], acquired: NaiveDateTime) -> Option<&'a ProductEntry> {
    entries
        .iter()
        .filter(|entry| {
            validity_window(&entry.name)
                .map(|(start, stop)| start <= acquired && acquired <= stop)
                .unwrap_or(false)
        })
        .max_by(|a, b| a.name.cmp(&b.name))
}

fn validity_window(name: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let re = Regex::new(r"V(?<start>\d{8}T\d{6})_(?<stop>\d{8}T\d{6})")
        .expect("Regex pattern should always compile");
    let captures = re.captures(name)?;
    let parse = |value: &str| NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok();
    Some((parse(&captures["start"])?, parse(&captures["stop"])?))
}

async fn access_token(client: &reqwest::Client, credentials: &CredentialBundle) -> Result<String> {
    let response = client
        .post(CDSE_TOKEN_URL)
        .form(&[
            ("grant_type", "password"),
            ("client_id", CDSE_CLIENT_ID),
            ("username", credentials.esa_username.as_str()),
            ("password", credentials.esa_password.as_str()),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "CDSE token request failed with status {}",
            response.status()
        )));
    }
    Ok(response.json::<TokenResponse>().await?.access_token)
}

async fn fetch_product(
    client: &reqwest::Client,
    credentials: &CredentialBundle,
    entry: &ProductEntry,
    directory: &Path,
) -> Result<PathBuf> {
    let token = access_token(client, credentials).await?;
    let url = format!("{CDSE_DOWNLOAD_URL}({})/$value", entry.id);
    let response = client
        .get(url)
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?;

    let path = directory.join(&entry.name);
    std::fs::write(&path, response.bytes().await?)?;
    Ok(path)
}
