//! Remote catalogue lookups for optical scenes: where the imagery for a named
//! scene actually lives, expressed as GDAL-readable virtual paths for the
//! downstream processor.

pub mod sentinel2 {
    use crate::error::{Error, Result};
    use crate::scene;
    use chrono::NaiveDateTime;

    const GCP_ROOT_URL: &str = "https://storage.googleapis.com/gcp-public-data-sentinel-2/tiles";

    #[derive(Debug, Clone)]
    pub struct SceneMetadata {
        pub id: String,
        pub path: String,
        pub acquired: NaiveDateTime,
    }

    /// Base URL of the SAFE archive on the GCP public mirror.
    pub fn safe_url(scene: &str) -> Result<String> {
        let utm = scene
            .get(39..41)
            .zip(scene.get(41..42))
            .zip(scene.get(42..44))
            .ok_or_else(|| Error::Argument(format!("malformed Sentinel-2 scene name: {scene}")))?;
        let ((zone, band), square) = utm;
        Ok(format!("{GCP_ROOT_URL}/{zone}/{band}/{square}/{scene}.SAFE"))
    }

    pub async fn fetch_manifest(scene: &str) -> Result<String> {
        let url = format!("{}/manifest.safe", safe_url(scene)?);
        let response = reqwest::get(url).await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Locate the B08 image inside a SAFE manifest and return it as a
    /// `/vsicurl/` path.
    pub fn image_path(manifest: &str, scene: &str) -> Result<String> {
        let doc = roxmltree::Document::parse(manifest)?;
        let hrefs: Vec<&str> = doc
            .descendants()
            .filter(|n| n.has_tag_name("fileLocation"))
            .filter(|n| n.attribute("locatorType") == Some("URL"))
            .filter_map(|n| n.attribute("href"))
            .filter(|href| href.ends_with("_B08.jp2") && href.contains("/IMG_DATA/"))
            .collect();

        let file_path = if hrefs.len() == 1 {
            // post-2016-12-06 product; only one tile
            hrefs[0]
        } else {
            // pre-2016-12-06 product; choose the requested tile
            let tile_token = scene.split('_').nth(5).ok_or_else(|| {
                Error::Argument(format!("malformed Sentinel-2 scene name: {scene}"))
            })?;
            let suffix = format!("_{tile_token}_B08.jp2");
            hrefs
                .iter()
                .find(|href| href.ends_with(&suffix))
                .ok_or_else(|| {
                    Error::Metadata(format!("no B08 image for tile {tile_token} in manifest"))
                })?
        };

        Ok(format!(
            "/vsicurl/{}/{}",
            safe_url(scene)?,
            file_path.trim_start_matches("./")
        ))
    }

    pub async fn scene_metadata(scene: &str) -> Result<SceneMetadata> {
        let manifest = fetch_manifest(scene).await?;
        let path = image_path(&manifest, scene)?;
        let acquired = scene::acquisition_datetime(scene)?;
        Ok(SceneMetadata {
            id: scene.to_string(),
            path,
            acquired,
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SCENE: &str = "S2A_MSIL1C_20160805T155912_N0204_R097_T17XNA_20160805T160118";

        fn manifest(entries: &[&str]) -> String {
            let locations: String = entries
                .iter()
                .map(|href| {
                    format!(r#"<fileLocation locatorType="URL" href="{href}"/>"#)
                })
                .collect();
            format!(
                "<xfdu:XFDU xmlns:xfdu=\"urn:ccsds:schema:xfdu:1\">\
                 <dataObjectSection>{locations}</dataObjectSection></xfdu:XFDU>"
            )
        }

        #[test]
        fn safe_url_encodes_the_tile() {
            assert_eq!(
                safe_url(SCENE).unwrap(),
                format!("{GCP_ROOT_URL}/17/X/NA/{SCENE}.SAFE")
            );
            assert!(safe_url("S2A_short").is_err());
        }

        #[test]
        fn selects_the_only_tile_in_modern_products() {
            let manifest = manifest(&[
                "./GRANULE/L1C_T17XNA/IMG_DATA/T17XNA_20160805T155912_B08.jp2",
                "./GRANULE/L1C_T17XNA/IMG_DATA/T17XNA_20160805T155912_B04.jp2",
            ]);
            let path = image_path(&manifest, SCENE).unwrap();
            assert_eq!(
                path,
                format!(
                    "/vsicurl/{}/GRANULE/L1C_T17XNA/IMG_DATA/T17XNA_20160805T155912_B08.jp2",
                    safe_url(SCENE).unwrap()
                )
            );
        }

        #[test]
        fn selects_the_requested_tile_in_multi_tile_products() {
            let manifest = manifest(&[
                "./GRANULE/a/IMG_DATA/S2A_OPER_MSI_L1C_TL_x_T16XNA_B08.jp2",
                "./GRANULE/b/IMG_DATA/S2A_OPER_MSI_L1C_TL_x_T17XNA_B08.jp2",
            ]);
            let path = image_path(&manifest, SCENE).unwrap();
            assert!(path.ends_with("_T17XNA_B08.jp2"), "got: {path}");
        }

        #[test]
        fn errors_when_the_tile_is_absent() {
            let manifest = manifest(&[
                "./GRANULE/a/IMG_DATA/S2A_OPER_MSI_L1C_TL_x_T16XNA_B08.jp2",
                "./GRANULE/b/IMG_DATA/S2A_OPER_MSI_L1C_TL_x_T18XNA_B08.jp2",
            ]);
            assert!(matches!(
                image_path(&manifest, SCENE),
                Err(Error::Metadata(_))
            ));
        }
    }
}

pub mod landsat {
    use aws_config::BehaviorVersion;
    use aws_sdk_s3::types::RequestPayer;
    use reqwest::StatusCode;
    use stac::Item;
    use tracing::debug;

    use crate::error::{Error, Result};
    use crate::scene::Platform;

    const LC2_SEARCH_URL: &str =
        "https://landsatlook.usgs.gov/stac-server/collections/landsat-c2l1/items";
    const LANDSAT_BUCKET: &str = "usgs-landsat";
    const LANDSAT_DATA_URL: &str = "https://landsatlook.usgs.gov/data/";

    fn sensor(scene: &str) -> Result<&'static str> {
        let platform = Platform::from_scene(scene)?;
        match (platform, scene.as_bytes().get(1)) {
            (Platform::L8 | Platform::L9, Some(b'C' | b'O' | b'T')) => Ok("oli-tirs"),
            (Platform::L7, Some(b'E')) => Ok("etm"),
            (Platform::L4 | Platform::L5, Some(b'T')) => Ok("tm"),
            (Platform::L4 | Platform::L5, Some(b'M')) => Ok("mss"),
            _ => Err(Error::Metadata(format!(
                "no Landsat sensor mapping for scene: {scene}"
            ))),
        }
    }

    /// Key of the scene's STAC item inside the `usgs-landsat` bucket.
    pub fn stac_json_key(scene: &str) -> Result<String> {
        let sensor = sensor(scene)?;
        let (year, path, row) = scene
            .get(17..21)
            .zip(scene.get(10..13))
            .zip(scene.get(13..16))
            .map(|((year, path), row)| (year, path, row))
            .ok_or_else(|| Error::Argument(format!("malformed Landsat scene name: {scene}")))?;
        Ok(format!(
            "collection02/level-1/standard/{sensor}/{year}/{path}/{row}/{scene}/{scene}_stac.json"
        ))
    }

    /// Fetch the scene's STAC item from the stac-server, falling back to the
    /// requester-pays bucket when the item has not been indexed yet.
    pub async fn fetch_item(client: &reqwest::Client, scene: &str) -> Result<Item> {
        let response = client.get(format!("{LC2_SEARCH_URL}/{scene}")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(scene, "scene not in stac-server; falling back to s3");
            return fetch_item_from_s3(scene).await;
        }
        Ok(response.error_for_status()?.json::<Item>().await?)
    }

    async fn fetch_item_from_s3(scene: &str) -> Result<Item> {
        let key = stac_json_key(scene)?;
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&config);

        let object = client
            .get_object()
            .bucket(LANDSAT_BUCKET)
            .key(&key)
            .request_payer(RequestPayer::Requester)
            .send()
            .await
            .map_err(|e| Error::Metadata(format!("s3://{LANDSAT_BUCKET}/{key}: {e}")))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| Error::Metadata(format!("reading s3://{LANDSAT_BUCKET}/{key}: {e}")))?
            .to_vec();

        Ok(serde_json::from_slice(&data)?)
    }

    /// Select the velocity-tracking band for the platform and return it as a
    /// `/vsis3/` path into the requester-pays bucket.
    pub fn image_path(item: &Item) -> Result<String> {
        let asset = match item.id.as_bytes().get(3) {
            Some(b'4' | b'5') => item
                .assets
                .get("B2.TIF")
                .or_else(|| item.assets.get("green")),
            Some(b'7' | b'8' | b'9') => item
                .assets
                .get("B8.TIF")
                .or_else(|| item.assets.get("pan")),
            _ => None,
        }
        .ok_or_else(|| {
            Error::Metadata(format!(
                "autoRIFT processing is not available for this platform: {}",
                item.id
            ))
        })?;

        Ok(asset
            .href
            .replace(LANDSAT_DATA_URL, &format!("/vsis3/{LANDSAT_BUCKET}/")))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SCENE: &str = "LC08_L1TP_009011_20200703_20200913_02_T1";

        fn item(id: &str, band: &str, href: &str) -> Item {
            serde_json::from_value(serde_json::json!({
                "type": "Feature",
                "stac_version": "1.0.0",
                "id": id,
                "geometry": null,
                "properties": {"datetime": "2020-07-03T00:00:00Z"},
                "links": [],
                "assets": {band: {"href": href}},
            }))
            .unwrap()
        }

        #[test]
        fn builds_the_stac_json_key() {
            assert_eq!(
                stac_json_key(SCENE).unwrap(),
                "collection02/level-1/standard/oli-tirs/2020/009/011/\
                 LC08_L1TP_009011_20200703_20200913_02_T1/\
                 LC08_L1TP_009011_20200703_20200913_02_T1_stac.json"
            );
        }

        #[test]
        fn maps_sensors_by_platform_and_type() {
            assert_eq!(sensor(SCENE).unwrap(), "oli-tirs");
            assert_eq!(
                sensor("LE07_L1TP_009011_20020703_20200913_02_T1").unwrap(),
                "etm"
            );
            assert_eq!(
                sensor("LT05_L1TP_009011_19890703_20200913_02_T1").unwrap(),
                "tm"
            );
            assert_eq!(
                sensor("LM04_L1GS_009011_19830703_20200913_02_T2").unwrap(),
                "mss"
            );
            assert!(sensor("LE08_L1TP_009011_20200703_20200913_02_T1").is_err());
        }

        #[test]
        fn selects_pan_band_for_modern_platforms() {
            let item = item(
                SCENE,
                "B8.TIF",
                "https://landsatlook.usgs.gov/data/collection02/x/LC08_B8.TIF",
            );
            assert_eq!(
                image_path(&item).unwrap(),
                "/vsis3/usgs-landsat/collection02/x/LC08_B8.TIF"
            );
        }

        #[test]
        fn selects_green_band_for_tm_platforms() {
            let item = item(
                "LT05_L1TP_009011_19890703_20200913_02_T1",
                "green",
                "https://landsatlook.usgs.gov/data/collection02/x/LT05_B2.TIF",
            );
            assert_eq!(
                image_path(&item).unwrap(),
                "/vsis3/usgs-landsat/collection02/x/LT05_B2.TIF"
            );
        }

        #[test]
        fn rejects_unsupported_platforms() {
            let item = item("LM01_x", "green", "https://landsatlook.usgs.gov/data/x");
            assert!(image_path(&item).is_err());
        }
    }
}
