//! Workflow selection and dispatch.
//!
//! Workflow names map to a closed enum and dispatch through one exhaustive
//! match; an unrecognized name fails before any resource is touched, and the
//! selected workflow's arguments are validated before any download or compute
//! occurs.
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, ValueEnum};
use tracing::info;

use crate::catalog;
use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};
use crate::fetch;
use crate::orbits;
use crate::processing::{ProcessingRequest, Processor, StagedInputs};
use crate::scene::{self, Platform};

pub const DEFAULT_PARAMETER_FILE: &str = "/vsicurl/http://its-live-data.s3.amazonaws.com/\
                                          autorift_parameters/v001/autorift_landice_0120m.shp";

const DEFAULT_PIXEL_SPACING: u32 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Hyp3Autorift,
    S1Correction,
}

impl Workflow {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hyp3Autorift => "hyp3_autorift",
            Self::S1Correction => "s1_correction",
        }
    }
}

impl FromStr for Workflow {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "hyp3_autorift" => Ok(Self::Hyp3Autorift),
            "s1_correction" => Ok(Self::S1Correction),
            other => Err(Error::UnknownWorkflow {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NamingScheme {
    #[value(name = "ITS_LIVE_OD")]
    ItsLiveOd,
    #[value(name = "ITS_LIVE_PROD")]
    ItsLiveProd,
    #[value(name = "ASF")]
    Asf,
}

/// Arguments of the `hyp3_autorift` pair-processing workflow.
#[derive(Debug, Parser)]
#[command(name = "hyp3_autorift")]
pub struct AutoriftArgs {
    /// Reference scene of the pair
    pub reference: String,

    /// Secondary scene of the pair
    pub secondary: String,

    /// Shapefile for determining the correct search parameters by geographic
    /// location; path must be understood by GDAL
    #[arg(long, default_value = DEFAULT_PARAMETER_FILE)]
    pub parameter_file: String,

    /// Naming scheme to use for product files
    #[arg(long, value_enum, default_value_t = NamingScheme::ItsLiveOd)]
    pub naming_scheme: NamingScheme,
}

/// Arguments of the `s1_correction` single-scene workflow.
#[derive(Debug, Parser)]
#[command(name = "s1_correction")]
pub struct S1CorrectionArgs {
    /// Sentinel-1 granule to create a correction grid for
    pub granule: String,

    /// Number of pixels to buffer the correction grid by
    #[arg(long, default_value_t = 0)]
    pub buffer: u32,

    /// Shapefile for determining the correct search parameters by geographic
    /// location
    #[arg(long, default_value = DEFAULT_PARAMETER_FILE)]
    pub parameter_file: String,
}

fn parse_args<T: Parser>(workflow: Workflow, args: &[String]) -> Result<T> {
    T::try_parse_from(
        std::iter::once(workflow.name()).chain(args.iter().map(String::as_str)),
    )
    .map_err(|e| Error::Argument(e.to_string()))
}

/// Staging of a workflow's remote inputs into the working directory. The
/// network-facing implementation is [`RemoteStager`]; the seam exists so
/// dispatch can be exercised without reaching any remote service.
pub trait InputStager {
    /// Stage both scenes of a pair for the platform, returning the processor
    /// inputs and the names of any orbit files that were fetched.
    async fn stage_pair(
        &self,
        credentials: &CredentialBundle,
        platform: Platform,
        reference: &str,
        secondary: &str,
        workdir: &Path,
    ) -> Result<(StagedInputs, Vec<Option<String>>)>;

    /// Stage one Sentinel-1 granule and its orbit file, returning the local
    /// granule path and the orbit directory.
    async fn stage_granule(
        &self,
        credentials: &CredentialBundle,
        granule: &str,
        workdir: &Path,
    ) -> Result<(PathBuf, PathBuf)>;
}

/// Stages inputs from the real remote services.
pub struct RemoteStager {
    client: reqwest::Client,
}

impl RemoteStager {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for RemoteStager {
    fn default() -> Self {
        Self::new()
    }
}

impl InputStager for RemoteStager {
    async fn stage_pair(
        &self,
        credentials: &CredentialBundle,
        platform: Platform,
        reference: &str,
        secondary: &str,
        workdir: &Path,
    ) -> Result<(StagedInputs, Vec<Option<String>>)> {
        let mut orbit_files: Vec<Option<String>> = Vec::new();

        let inputs = match platform {
            Platform::S1 => {
                let reference_zip =
                    fetch::download_granule(&self.client, credentials, reference, workdir).await?;
                let secondary_zip =
                    fetch::download_granule(&self.client, credentials, secondary, workdir).await?;

                let orbit_dir = workdir.join("Orbits");
                for granule in [reference, secondary] {
                    let (path, kind) =
                        orbits::download_orbit_file(&self.client, credentials, granule, &orbit_dir)
                            .await?;
                    info!(granule = %granule, orbit = %path.display(), ?kind, "downloaded orbit file");
                    orbit_files.push(path.file_name().map(|n| n.to_string_lossy().to_string()));
                }

                StagedInputs::Sentinel1 {
                    reference: reference_zip,
                    secondary: secondary_zip,
                    orbit_dir,
                    polarization: scene::s1_primary_polarization(reference)?,
                }
            }
            Platform::S2 => {
                let reference_metadata = catalog::sentinel2::scene_metadata(reference).await?;
                let secondary_metadata = catalog::sentinel2::scene_metadata(secondary).await?;
                info!(path = %reference_metadata.path, "reference scene");
                info!(path = %secondary_metadata.path, "secondary scene");

                StagedInputs::Optical {
                    reference_path: reference_metadata.path,
                    secondary_path: secondary_metadata.path,
                    platform,
                }
            }
            _ => {
                let reference_item = catalog::landsat::fetch_item(&self.client, reference).await?;
                let secondary_item = catalog::landsat::fetch_item(&self.client, secondary).await?;
                let reference_path = catalog::landsat::image_path(&reference_item)?;
                let secondary_path = catalog::landsat::image_path(&secondary_item)?;
                info!(path = %reference_path, "reference scene");
                info!(path = %secondary_path, "secondary scene");

                StagedInputs::Optical {
                    reference_path,
                    secondary_path,
                    platform,
                }
            }
        };

        Ok((inputs, orbit_files))
    }

    async fn stage_granule(
        &self,
        credentials: &CredentialBundle,
        granule: &str,
        workdir: &Path,
    ) -> Result<(PathBuf, PathBuf)> {
        let granule_zip =
            fetch::download_granule(&self.client, credentials, granule, workdir).await?;

        let orbit_dir = workdir.join("Orbits");
        let (orbit, kind) =
            orbits::download_orbit_file(&self.client, credentials, granule, &orbit_dir).await?;
        info!(orbit = %orbit.display(), ?kind, "downloaded orbit file");

        Ok((granule_zip, orbit_dir))
    }
}

/// Run exactly one workflow to completion and return its final artifact set.
pub async fn dispatch(
    workflow: Workflow,
    args: &[String],
    credentials: &CredentialBundle,
    stager: &impl InputStager,
    processor: &impl Processor,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(workdir)?;
    info!(workflow = workflow.name(), workdir = %workdir.display(), "dispatching");

    match workflow {
        Workflow::Hyp3Autorift => {
            run_autorift(
                parse_args(workflow, args)?,
                credentials,
                stager,
                processor,
                workdir,
            )
            .await
        }
        Workflow::S1Correction => {
            run_s1_correction(
                parse_args(workflow, args)?,
                credentials,
                stager,
                processor,
                workdir,
            )
            .await
        }
    }
}

async fn run_autorift(
    args: AutoriftArgs,
    credentials: &CredentialBundle,
    stager: &impl InputStager,
    processor: &impl Processor,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    let (mut reference, mut secondary) = (args.reference, args.secondary);

    // validate both scenes before touching the network
    let reference_time = scene::acquisition_datetime(&reference)?;
    let secondary_time = scene::acquisition_datetime(&secondary)?;
    Platform::from_scene(&reference)?;
    Platform::from_scene(&secondary)?;

    if secondary_time < reference_time {
        std::mem::swap(&mut reference, &mut secondary);
    }
    // staging follows the chronologically-first scene
    let platform = Platform::from_scene(&reference)?;

    let (inputs, orbit_files) = stager
        .stage_pair(credentials, platform, &reference, &secondary, workdir)
        .await?;

    let request = ProcessingRequest {
        workflow: Workflow::Hyp3Autorift,
        inputs,
        credentials,
        parameter_file: args.parameter_file,
        workdir: workdir.to_path_buf(),
    };
    let outputs = processor.run(&request).await?;

    apply_naming_scheme(
        outputs,
        args.naming_scheme,
        &reference,
        &secondary,
        &orbit_files,
    )
}

async fn run_s1_correction(
    args: S1CorrectionArgs,
    credentials: &CredentialBundle,
    stager: &impl InputStager,
    processor: &impl Processor,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    if Platform::from_scene(&args.granule)? != Platform::S1 {
        return Err(Error::Argument(format!(
            "s1_correction requires a Sentinel-1 granule, got: {}",
            args.granule
        )));
    }
    let polarization = scene::s1_primary_polarization(&args.granule)?;

    let (granule_zip, orbit_dir) = stager
        .stage_granule(credentials, &args.granule, workdir)
        .await?;

    let request = ProcessingRequest {
        workflow: Workflow::S1Correction,
        inputs: StagedInputs::CorrectionScene {
            granule: granule_zip,
            orbit_dir,
            polarization,
            buffer: args.buffer,
        },
        credentials,
        parameter_file: args.parameter_file,
        workdir: workdir.to_path_buf(),
    };
    processor.run(&request).await
}

/// Rename the netCDF products on disk according to the requested naming
/// scheme; browse images follow their product.
fn apply_naming_scheme(
    outputs: Vec<PathBuf>,
    scheme: NamingScheme,
    reference: &str,
    secondary: &str,
    orbit_files: &[Option<String>],
) -> Result<Vec<PathBuf>> {
    let rename = |path: &Path, stem: &str| -> Result<PathBuf> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let renamed = path.with_file_name(format!("{stem}.{extension}"));
        std::fs::rename(path, &renamed)?;
        Ok(renamed)
    };

    match scheme {
        NamingScheme::ItsLiveProd => Ok(outputs),
        NamingScheme::ItsLiveOd => outputs
            .into_iter()
            .map(|path| {
                let stem = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .ok_or_else(|| {
                        Error::Processing(format!("unnamed output file: {}", path.display()))
                    })?;
                rename(&path, &format!("{stem}_IL_ASF_OD"))
            })
            .collect(),
        NamingScheme::Asf => {
            let product_name = scene::product_name(
                reference,
                secondary,
                orbit_files,
                DEFAULT_PIXEL_SPACING,
            )?;
            outputs
                .into_iter()
                .map(|path| rename(&path, &product_name))
                .collect()
        }
    }
}
