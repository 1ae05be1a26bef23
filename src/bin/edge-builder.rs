use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use edge_builder::combustion::rpm;
use edge_builder::fileio;
use edge_builder::image::{parse_definition, ImageContext};
use edge_builder::preflight;

const DEFINITION_FILE_NAME: &str = "definition.toml";
const RUN_MANIFEST_NAME: &str = "run-manifest.json";

#[derive(Debug, Serialize)]
struct RunManifest {
    run_id: String,
    image_config_dir: String,
    image_type: String,
    output_image_name: String,
    scripts: Vec<String>,
}

fn usage() -> &'static str {
    "Usage:\n  edge-builder build <image-config-dir> [<build-dir>]\n    \
     expects <image-config-dir>/definition.toml,\n    \
     the base image under <image-config-dir>/images/,\n    \
     and optional local RPMs under <image-config-dir>/rpms/"
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("build") => run_build(&args[1..]),
        _ => {
            eprintln!("{}", usage());
            bail!("unrecognized command");
        }
    }
}

fn run_build(args: &[String]) -> Result<()> {
    let Some(config_dir) = args.first() else {
        eprintln!("{}", usage());
        bail!("missing <image-config-dir> argument");
    };
    let config_dir = PathBuf::from(config_dir);
    let build_dir = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir.join("build"));

    preflight::check_host_tools()?;

    let definition_path = config_dir.join(DEFINITION_FILE_NAME);
    let data = fs::read_to_string(&definition_path)
        .with_context(|| format!("reading image definition {}", definition_path.display()))?;
    let definition = parse_definition(&data)?;

    fs::create_dir_all(&build_dir)
        .with_context(|| format!("creating build dir {}", build_dir.display()))?;
    let ctx = ImageContext::new(&config_dir, &build_dir, definition)?;

    println!(
        "Building combustion configuration for {}...",
        ctx.definition.image.output_image_name
    );

    let mut scripts = Vec::new();
    if let Some(script) = rpm::configure_rpms(&ctx)? {
        scripts.push(script);
    }

    write_run_manifest(&ctx, &scripts)?;

    println!("  Combustion dir: {}", ctx.combustion_dir.display());
    Ok(())
}

fn write_run_manifest(ctx: &ImageContext, scripts: &[String]) -> Result<()> {
    let manifest = RunManifest {
        run_id: fileio::timestamp(),
        image_config_dir: ctx.image_config_dir.display().to_string(),
        image_type: ctx.definition.image.image_type.to_string(),
        output_image_name: ctx.definition.image.output_image_name.clone(),
        scripts: scripts.to_vec(),
    };

    let path = ctx.build_dir.join(RUN_MANIFEST_NAME);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing run manifest")?;
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;

    Ok(())
}
