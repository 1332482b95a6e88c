//! `lumgroup` command-line entry point.
//!
//! # Responsibility
//! - Resolve the GeoPackage, layer and output path from arguments or prompts.
//! - Run the reconciliation pipeline and the Shapefile export.
//! - Report outcomes to the user; details go to the rolling log files.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::warn;
use lumgroup_core::model::feature::{ID_FIELD, ITEM_FIELD, LUM_CANT_POS_FIELD};
use lumgroup_core::{
    default_log_dir, default_log_level, default_output_path, export_layer, init_logging,
    list_vector_layers, open_gpkg, select_layer, ExportReport, FieldOutcome, GpkgLayerRepository,
    LayerDescriptor, LogConfig, ReconcileOptions, ReconcileReport, ReconcileService, RecordFields,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lumgroup")]
#[command(
    about = "Repair feature IDs and group co-located features of a GeoPackage layer",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// GeoPackage file to process
    input: PathBuf,

    /// Layer to process; prompted for when the file has several
    #[arg(short, long)]
    layer: Option<String>,

    /// Shapefile to write (`.shp` is appended when missing)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List the vector layers and exit
    #[arg(long)]
    list_layers: bool,

    /// Reconcile the layer without exporting it
    #[arg(long)]
    skip_export: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Absolute directory for rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long)]
    log_level: Option<String>,

    /// Identifier column
    #[arg(long, default_value = ID_FIELD)]
    id_field: String,

    /// Group representative column
    #[arg(long, default_value = ITEM_FIELD)]
    item_field: String,

    /// Group size column
    #[arg(long, default_value = LUM_CANT_POS_FIELD)]
    count_field: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let logging = LogConfig::parse(
        cli.log_level.as_deref().unwrap_or(default_log_level()),
        cli.log_dir.clone().unwrap_or_else(default_log_dir),
    )
    .and_then(|config| init_logging(&config));
    if let Err(err) = logging {
        // The run proceeds without file logs.
        eprintln!("warning: logging disabled: {err}");
    }

    let conn = open_gpkg(&cli.input)
        .with_context(|| format!("cannot open GeoPackage `{}`", cli.input.display()))?;
    let layers = list_vector_layers(&conn).context("cannot read the layer catalogue")?;

    if cli.list_layers {
        for layer in &layers {
            println!("{}", describe_layer(layer));
        }
        return Ok(());
    }

    let layer = select_layer(&layers, cli.layer.as_deref(), prompt_for_layer)?;
    let repo = GpkgLayerRepository::try_new(&conn, &layer.name)?;
    let options = ReconcileOptions::with_fields(RecordFields {
        id: cli.id_field.clone(),
        item: cli.item_field.clone(),
        lum_cant_pos: cli.count_field.clone(),
    });
    let service = ReconcileService::new(repo, options);
    let report = service
        .run()
        .with_context(|| format!("reconciliation of layer `{}` failed", layer.name))?;

    let export = if cli.skip_export {
        None
    } else {
        let target = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.input, &layer.name));
        Some(export_layer(service.repo(), target))
    };

    if cli.json {
        let payload = serde_json::json!({ "reconcile": &report, "export": &export });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_report(&report);
        if let Some(export) = &export {
            print_export(export);
        }
    }

    match export {
        Some(export) if !export.verified => bail!(
            "export to `{}` failed: {}",
            export.path.display(),
            export
                .writer_error
                .as_deref()
                .unwrap_or("output file was not created")
        ),
        _ => Ok(()),
    }
}

fn describe_layer(layer: &LayerDescriptor) -> String {
    format!(
        "{}: {} ({}, srs {})",
        layer.index + 1,
        layer.name,
        layer.geometry_type.as_deref().unwrap_or("GEOMETRY"),
        layer
            .srs_id
            .map_or_else(|| "unknown".to_string(), |srs_id| srs_id.to_string())
    )
}

/// Numbered prompt on stderr; an empty or invalid answer cancels.
fn prompt_for_layer(layers: &[LayerDescriptor]) -> Option<usize> {
    let mut stderr = io::stderr();
    for layer in layers {
        let _ = writeln!(stderr, "  {}", describe_layer(layer));
    }
    let _ = write!(stderr, "Select a layer [1-{}]: ", layers.len());
    let _ = stderr.flush();

    let mut answer = String::new();
    if let Err(err) = io::stdin().lock().read_line(&mut answer) {
        warn!("event=layer_select module=cli status=warn reason=stdin_read_failed error={err}");
        return None;
    }
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|choice| choice.checked_sub(1))
        .filter(|position| *position < layers.len())
}

fn print_report(report: &ReconcileReport) {
    println!("Layer: {}", report.layer);
    for field in &report.fields {
        match &field.outcome {
            FieldOutcome::AlreadyPresent => println!("Field `{}` already exists.", field.field),
            FieldOutcome::Created => println!("Field `{}` was missing and was created.", field.field),
            FieldOutcome::Failed(reason) => {
                println!("Field `{}` was missing and could not be created: {reason}", field.field)
            }
        }
    }
    println!(
        "Features: {} | IDs repaired: {} null, {} duplicate (max ID {})",
        report.feature_count,
        report.ids.null_repaired,
        report.ids.duplicates_repaired,
        report.ids.max_id
    );
    println!(
        "Geometry groups: {} | largest: {} | features sharing a geometry: {}",
        report.grouping.groups, report.grouping.largest_group, report.grouping.shared_records
    );
    for skipped in &report.skipped_outputs {
        println!("Output field `{skipped}` is missing; its values were not written.");
    }
}

fn print_export(export: &ExportReport) {
    if export.is_suspect_failure() {
        println!(
            "Writer reported an error but `{}` exists; check the output: {}",
            export.path.display(),
            export.writer_error.as_deref().unwrap_or_default()
        );
    } else if export.verified {
        println!(
            "Exported {} features to `{}` ({} skipped).",
            export.features_written,
            export.path.display(),
            export.features_skipped
        );
    }
}
