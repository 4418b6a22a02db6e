//! Build command implementation
//!
//! Orchestrates a full compilation: load the project configuration, load
//! the FHIR definitions, discover and import `.fsh` sources, run the
//! exporters, and write the artifacts plus ig.ini to the output directory.

use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use temaki_core::diagnostics::Severity;
use temaki_core::{DiagnosticCollector, ExportError, FhirDefs, ProjectConfiguration, build};
use tracing::info;
use walkdir::WalkDir;

const CONFIG_NAMES: &[&str] = &["sushi-config.yaml", "temaki.yaml"];

pub fn run(
    project_path: Option<PathBuf>,
    output: Option<PathBuf>,
    defs_path: PathBuf,
) -> anyhow::Result<ExitCode> {
    let start = Instant::now();
    let project = project_path.unwrap_or_else(|| PathBuf::from("."));
    info!("Building FSH project at {}", project.display());

    let config = load_configuration(&project)?;
    info!("Canonical: {}", config.canonical);

    let defs = FhirDefs::load(&defs_path)
        .map_err(|err| {
            // a failed load of the rolling CI build is its own diagnostic kind
            if matches!(config.fhir_version.as_str(), "current" | "dev") {
                anyhow::Error::new(ExportError::CurrentPackageLoad {
                    message: err.to_string(),
                })
            } else {
                anyhow::Error::new(err)
            }
        })
        .with_context(|| format!("loading FHIR definitions from {}", defs_path.display()))?;
    info!("Loaded {} FHIR definitions", defs.len());

    let sources = discover_sources(&project)?;
    if sources.is_empty() {
        bail!("no .fsh sources found under {}", project.display());
    }
    info!("Found {} FSH files", sources.len());

    let ig_ini_path = project.join("ig-data").join("ig.ini");
    let existing_ig_ini = std::fs::read_to_string(&ig_ini_path).ok();

    let collector = DiagnosticCollector::new();
    let result = build(
        &sources,
        &config,
        &defs,
        &collector,
        existing_ig_ini
            .as_deref()
            .map(|content| (ig_ini_path.as_path(), content)),
    );

    let out_dir = output.unwrap_or_else(|| project.join("fsh-generated"));
    write_artifacts(&out_dir, &result)?;

    for diagnostic in collector.records() {
        match diagnostic.severity {
            Severity::Error | Severity::Warning => eprintln!("{diagnostic}"),
            Severity::Info => println!("{diagnostic}"),
        }
    }
    println!(
        "Done in {:.2}s: {} artifacts, {} errors, {} warnings",
        start.elapsed().as_secs_f64(),
        result.package.artifacts().len(),
        collector.error_count(),
        collector.warning_count(),
    );

    // recoverable diagnostics do not fail the build; only catastrophic
    // conditions (handled above with `?`) do
    Ok(ExitCode::SUCCESS)
}

fn load_configuration(project: &Path) -> anyhow::Result<ProjectConfiguration> {
    for name in CONFIG_NAMES {
        let candidate = project.join(name);
        if candidate.exists() {
            return ProjectConfiguration::load(&candidate)
                .with_context(|| format!("loading {}", candidate.display()));
        }
    }
    bail!(
        "no configuration found in {} (expected one of: {})",
        project.display(),
        CONFIG_NAMES.join(", ")
    )
}

/// `.fsh` files under input/fsh/, falling back to the whole project tree
fn discover_sources(project: &Path) -> anyhow::Result<Vec<(PathBuf, String)>> {
    let preferred = project.join("input").join("fsh");
    let root = if preferred.is_dir() { preferred } else { project.to_path_buf() };

    let mut sources = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("fsh")
        {
            let text = std::fs::read_to_string(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            sources.push((entry.path().to_path_buf(), text));
        }
    }
    Ok(sources)
}

fn write_artifacts(out_dir: &Path, result: &temaki_core::BuildResult) -> anyhow::Result<()> {
    let resources_dir = out_dir.join("resources");
    std::fs::create_dir_all(&resources_dir)
        .with_context(|| format!("creating {}", resources_dir.display()))?;

    for (resource_type, id, json) in result.package.artifacts() {
        let path = resources_dir.join(format!("{resource_type}-{id}.json"));
        let text = serde_json::to_string_pretty(&json)?;
        std::fs::write(&path, text + "\n")
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if let Some(ig_ini) = &result.ig_ini {
        let path = out_dir.join("ig.ini");
        std::fs::write(&path, ig_ini).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
