//! Scene-name parsing shared by the workflows: platform detection,
//! acquisition times, polarization, and product naming.
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Platform {
    S1,
    S2,
    L4,
    L5,
    L7,
    L8,
    L9,
}

impl Platform {
    pub fn from_scene(scene: &str) -> Result<Self> {
        if scene.starts_with("S1") {
            return Ok(Self::S1);
        }
        if scene.starts_with("S2") {
            return Ok(Self::S2);
        }
        if scene.starts_with('L') {
            match scene.as_bytes().get(3) {
                Some(b'4') => return Ok(Self::L4),
                Some(b'5') => return Ok(Self::L5),
                Some(b'7') => return Ok(Self::L7),
                Some(b'8') => return Ok(Self::L8),
                Some(b'9') => return Ok(Self::L9),
                _ => {}
            }
        }
        Err(Error::Argument(format!(
            "autoRIFT processing is not available for scene: {scene}"
        )))
    }

    pub fn is_landsat(&self) -> bool {
        matches!(self, Self::L4 | Self::L5 | Self::L7 | Self::L8 | Self::L9)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::L4 => "L4",
            Self::L5 => "L5",
            Self::L7 => "L7",
            Self::L8 => "L8",
            Self::L9 => "L9",
        }
    }
}

fn slice<'a>(scene: &'a str, start: usize, end: usize) -> Result<&'a str> {
    scene.get(start..end).ok_or_else(|| {
        Error::Argument(format!("scene name is too short to parse: {scene}"))
    })
}

fn parse_timestamp(scene: &str, value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").map_err(|_| {
        Error::Argument(format!("cannot parse acquisition time from scene: {scene}"))
    })
}

fn parse_date(scene: &str, value: &str) -> Result<NaiveDateTime> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|_| Error::Argument(format!("cannot parse acquisition date from scene: {scene}")))
}

/// Acquisition start time encoded in a scene name. Handles Sentinel-1,
/// ESA and COG-style Sentinel-2, and Landsat Collection 2 names.
pub fn acquisition_datetime(scene: &str) -> Result<NaiveDateTime> {
    if scene.starts_with("S1") {
        return parse_timestamp(scene, slice(scene, 17, 32)?);
    }
    if scene.starts_with("S2") && scene.len() > 25 {
        return parse_timestamp(scene, slice(scene, 11, 26)?);
    }
    if scene.starts_with("S2") {
        let token = scene.split('_').nth(2).ok_or_else(|| {
            Error::Argument(format!("cannot parse acquisition date from scene: {scene}"))
        })?;
        return parse_date(scene, token);
    }
    if scene.starts_with('L') {
        return parse_date(scene, slice(scene, 17, 25)?);
    }
    Err(Error::Argument(format!("unsupported scene format: {scene}")))
}

/// Primary co-polarization of a Sentinel-1 granule.
pub fn s1_primary_polarization(granule: &str) -> Result<&'static str> {
    match slice(granule, 14, 16)? {
        "SV" | "DV" => Ok("vv"),
        "SH" | "DH" => Ok("hh"),
        other => Err(Error::Argument(format!(
            "cannot determine co-polarization of granule {granule}: {other}"
        ))),
    }
}

/// Orbit precision class used in ASF product names: `P` when every orbit is
/// precise, `R` when any is restituted, `O` when any is missing.
pub fn least_precise_orbit_of(orbits: &[Option<String>]) -> char {
    if orbits.iter().any(|orbit| orbit.is_none()) {
        return 'O';
    }
    if orbits
        .iter()
        .flatten()
        .any(|orbit| orbit.contains("RESORB"))
    {
        return 'R';
    }
    'P'
}

/// Build an ASF-style product name for a processed pair.
pub fn product_name(
    reference: &str,
    secondary: &str,
    orbit_files: &[Option<String>],
    pixel_spacing: u32,
) -> Result<String> {
    let mission = slice(reference, 0, 2)?;
    let plat1 = platform_letter(reference)?;
    let plat2 = platform_letter(secondary)?;

    let ref_datetime = acquisition_datetime(reference)?;
    let sec_datetime = acquisition_datetime(secondary)?;
    let days = (ref_datetime - sec_datetime).num_days().abs();

    let datetime1 = ref_datetime.format("%Y%m%dT%H%M%S");
    let datetime2 = sec_datetime.format("%Y%m%dT%H%M%S");

    let misc = if reference.starts_with("S1") {
        let polarization1 = slice(reference, 15, 16)?;
        let polarization2 = slice(secondary, 15, 16)?;
        let orbit = least_precise_orbit_of(orbit_files);
        format!("{polarization1}{polarization2}{orbit}")
    } else {
        "B08".to_string()
    };

    let product_id = Uuid::new_v4().simple().to_string()[..4].to_uppercase();

    Ok(format!(
        "{mission}{plat1}{plat2}_{datetime1}_{datetime2}_{misc}{days:03}_VEL{pixel_spacing}_A_{product_id}"
    ))
}

fn platform_letter(scene: &str) -> Result<char> {
    scene
        .split('_')
        .next()
        .and_then(|field| field.chars().last())
        .ok_or_else(|| Error::Argument(format!("malformed scene name: {scene}")))
}
