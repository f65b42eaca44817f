//! Boundary to the external scientific processors (autoRIFT, ISCE2).
//!
//! Everything behind [`Processor::run`] is opaque to this crate: the staged
//! inputs go in, product files come out. The concrete implementation shells
//! out to the externally installed processing scripts and captures their
//! output in per-step logfiles inside the working directory.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};
use crate::scene::Platform;
use crate::workflow::Workflow;

/// Names of the external processing entry points. Overridable through a TOML
/// config file for containers that install them under non-default paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub tops_app: String,
    pub geogrid: String,
    pub geogrid_optical: String,
    pub autorift: String,
    pub autorift_optical: String,
    pub s1_correction: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tops_app: "topsApp.py".to_string(),
            geogrid: "testGeogrid_ISCE.py".to_string(),
            geogrid_optical: "testGeogridOptical.py".to_string(),
            autorift: "testautoRIFT_ISCE.py".to_string(),
            autorift_optical: "testautoRIFT.py".to_string(),
            s1_correction: "S1_correction.py".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Inputs staged by a workflow before handing off to the processor.
#[derive(Debug)]
pub enum StagedInputs {
    Sentinel1 {
        reference: PathBuf,
        secondary: PathBuf,
        orbit_dir: PathBuf,
        polarization: &'static str,
    },
    Optical {
        reference_path: String,
        secondary_path: String,
        platform: Platform,
    },
    CorrectionScene {
        granule: PathBuf,
        orbit_dir: PathBuf,
        polarization: &'static str,
        buffer: u32,
    },
}

#[derive(Debug)]
pub struct ProcessingRequest<'a> {
    pub workflow: Workflow,
    pub inputs: StagedInputs,
    pub credentials: &'a CredentialBundle,
    pub parameter_file: String,
    pub workdir: PathBuf,
}

pub trait Processor {
    async fn run(&self, request: &ProcessingRequest<'_>) -> Result<Vec<PathBuf>>;
}

/// Processor implementation backed by the ISCE2/autoRIFT command line entry
/// points.
pub struct IsceProcessor {
    config: ProcessorConfig,
}

impl IsceProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    fn child_env(credentials: &CredentialBundle) -> Vec<(&'static str, String)> {
        vec![
            ("EARTHDATA_USERNAME", credentials.earthdata_username.clone()),
            ("EARTHDATA_PASSWORD", credentials.earthdata_password.clone()),
            ("ESA_USERNAME", credentials.esa_username.clone()),
            ("ESA_PASSWORD", credentials.esa_password.clone()),
        ]
    }
}

impl Processor for IsceProcessor {
    async fn run(&self, request: &ProcessingRequest<'_>) -> Result<Vec<PathBuf>> {
        let workdir = &request.workdir;
        let env = Self::child_env(request.credentials);
        info!(workflow = request.workflow.name(), "invoking external processing");

        match &request.inputs {
            StagedInputs::Sentinel1 {
                reference,
                secondary,
                orbit_dir,
                polarization,
            } => {
                write_tops_config(workdir, reference, secondary, orbit_dir, polarization)?;
                run_step(
                    workdir,
                    &env,
                    &self.config.tops_app,
                    &["topsApp.xml", "--end=mergebursts"],
                    "topsApp.txt",
                )
                .await?;

                let reference_slc = workdir.join("merged/reference.slc.full");
                let secondary_slc = workdir.join("merged/secondary.slc.full");
                let (reference_slc, secondary_slc) = (
                    reference_slc.to_string_lossy().to_string(),
                    secondary_slc.to_string_lossy().to_string(),
                );

                run_step(
                    workdir,
                    &env,
                    &self.config.geogrid,
                    &["-m", &reference_slc, "-s", &secondary_slc],
                    "testGeogrid.txt",
                )
                .await?;

                run_step(
                    workdir,
                    &env,
                    &self.config.autorift,
                    &[
                        "-m",
                        &reference_slc,
                        "-s",
                        &secondary_slc,
                        "-g",
                        "window_location.tif",
                        "-o",
                        "window_offset.tif",
                        "-vx",
                        "window_rdr_off2vel_x_vec.tif",
                        "-vy",
                        "window_rdr_off2vel_y_vec.tif",
                        "-fp",
                        &request.parameter_file,
                        "-nc",
                        "S",
                    ],
                    "testautoRIFT.txt",
                )
                .await?;
            }
            StagedInputs::Optical {
                reference_path,
                secondary_path,
                platform,
            } => {
                run_step(
                    workdir,
                    &env,
                    &self.config.geogrid_optical,
                    &["-m", reference_path, "-s", secondary_path],
                    "testGeogrid.txt",
                )
                .await?;

                run_step(
                    workdir,
                    &env,
                    &self.config.autorift_optical,
                    &[
                        "-m",
                        reference_path,
                        "-s",
                        secondary_path,
                        "-g",
                        "window_location.tif",
                        "-o",
                        "window_offset.tif",
                        "-fp",
                        &request.parameter_file,
                        "-nc",
                        platform.as_str(),
                    ],
                    "testautoRIFT.txt",
                )
                .await?;
            }
            StagedInputs::CorrectionScene {
                granule,
                orbit_dir,
                polarization,
                buffer,
            } => {
                // geometry-only run; the single granule plays both roles
                write_tops_config(workdir, granule, granule, orbit_dir, polarization)?;
                run_step(
                    workdir,
                    &env,
                    &self.config.tops_app,
                    &["topsApp.xml", "--end=topo"],
                    "topsApp.txt",
                )
                .await?;

                let granule = granule.to_string_lossy().to_string();
                let buffer = buffer.to_string();
                run_step(
                    workdir,
                    &env,
                    &self.config.s1_correction,
                    &["--buffer", &buffer, &granule],
                    "s1_correction.txt",
                )
                .await?;
            }
        }

        collect_outputs(workdir)
    }
}

/// Write the topsApp configuration consumed by the ISCE2 entry point.
fn write_tops_config(
    workdir: &Path,
    reference: &Path,
    secondary: &Path,
    orbit_dir: &Path,
    polarization: &str,
) -> Result<()> {
    let scene_config = |name: &str, safe: &Path| {
        format!(
            r#"    <component name="{name}">
      <property name="safe">{safe}</property>
      <property name="orbit directory">{orbits}</property>
      <property name="polarization">{polarization}</property>
      <property name="output directory">{name}</property>
    </component>
"#,
            safe = safe.display(),
            orbits = orbit_dir.display(),
        )
    };

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<topsApp>
  <component name="topsinsar">
    <property name="Sensor name">SENTINEL1</property>
{reference}{secondary}  </component>
</topsApp>
"#,
        reference = scene_config("reference", reference),
        secondary = scene_config("secondary", secondary),
    );

    std::fs::write(workdir.join("topsApp.xml"), xml)?;
    Ok(())
}

async fn run_step(
    workdir: &Path,
    env: &[(&'static str, String)],
    program: &str,
    args: &[&str],
    logfile: &str,
) -> Result<()> {
    info!(program, logfile, "running processing step");

    let log = File::create(workdir.join(logfile))?;
    let status = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .status()
        .await
        .map_err(|e| Error::Processing(format!("failed to start {program}: {e}")))?;

    if !status.success() {
        return Err(Error::Processing(format!(
            "{program} exited with {status}; see {logfile}"
        )));
    }
    Ok(())
}

/// Final product files produced by a processing run: netCDF products plus
/// any browse images, in name order. Logfiles and other scratch files in the
/// working directory are never part of the artifact set.
pub fn collect_outputs(workdir: &Path) -> Result<Vec<PathBuf>> {
    let mut outputs: Vec<PathBuf> = std::fs::read_dir(workdir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("nc" | "png")
            )
        })
        .collect();
    outputs.sort();

    if !outputs.iter().any(|path| {
        path.extension().and_then(|ext| ext.to_str()) == Some("nc")
    }) {
        return Err(Error::Processing(
            "output netCDF file not found".to_string(),
        ));
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_path_lookup_names() {
        let config = ProcessorConfig::default();
        assert_eq!(config.tops_app, "topsApp.py");
        assert_eq!(config.autorift, "testautoRIFT_ISCE.py");
    }

    #[test]
    fn config_overrides_are_partial() {
        let config: ProcessorConfig =
            toml::from_str("tops_app = \"/opt/isce2/applications/topsApp.py\"\n").unwrap();
        assert_eq!(config.tops_app, "/opt/isce2/applications/topsApp.py");
        assert_eq!(config.geogrid, "testGeogrid_ISCE.py");
    }

    #[test]
    fn config_rejects_unknown_keys() {
        assert!(toml::from_str::<ProcessorConfig>("topsapp = \"x\"\n").is_err());
    }

    #[test]
    fn outputs_are_products_only_in_name_order() {
        let workdir = tempfile::tempdir().unwrap();
        for name in ["b.nc", "a.nc", "a.png", "topsApp.txt", "window_location.tif"] {
            std::fs::write(workdir.path().join(name), b"x").unwrap();
        }

        let outputs = collect_outputs(workdir.path()).unwrap();
        let names: Vec<_> = outputs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.nc", "a.png", "b.nc"]);
    }

    #[test]
    fn missing_product_is_a_processing_error() {
        let workdir = tempfile::tempdir().unwrap();
        std::fs::write(workdir.path().join("browse.png"), b"x").unwrap();
        assert!(matches!(
            collect_outputs(workdir.path()),
            Err(Error::Processing(_))
        ));
    }

    #[test]
    fn tops_config_names_both_scenes_and_the_orbit_directory() {
        let workdir = tempfile::tempdir().unwrap();
        write_tops_config(
            workdir.path(),
            Path::new("/work/reference.zip"),
            Path::new("/work/secondary.zip"),
            Path::new("/work/Orbits"),
            "vv",
        )
        .unwrap();

        let content = std::fs::read_to_string(workdir.path().join("topsApp.xml")).unwrap();
        let doc = roxmltree::Document::parse(&content).unwrap();
        let safes: Vec<&str> = doc
            .descendants()
            .filter(|n| n.has_tag_name("property"))
            .filter(|n| n.attribute("name") == Some("safe"))
            .filter_map(|n| n.text())
            .collect();
        assert_eq!(safes, ["/work/reference.zip", "/work/secondary.zip"]);
        assert!(content.contains("/work/Orbits"));
        assert!(content.contains(">vv<"));
    }

    #[tokio::test]
    async fn run_step_captures_status_and_logs() {
        let workdir = tempfile::tempdir().unwrap();
        run_step(workdir.path(), &[], "true", &[], "ok.txt")
            .await
            .unwrap();
        assert!(workdir.path().join("ok.txt").exists());

        let err = run_step(workdir.path(), &[], "false", &[], "fail.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Processing(_)));
    }
}
