//! usdz CLI - Tool for exporting, importing and inspecting USDZ packages.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use usdz::host::InMemoryScene;
use usdz::prelude::*;
use usdz::usdz::Archive;
use usdz::{usda, usdc};

#[cfg(feature = "trace")]
type TraceGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "trace"))]
type TraceGuard = ();

/// Install the fmt subscriber, plus a Chrome trace when `USDZ_TRACE=1`.
fn init_logging(level: Option<&str>) -> TraceGuard {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("usdz={level}")),
        None => EnvFilter::try_from_env("USDZ_LOG").unwrap_or_else(|_| EnvFilter::new("usdz=info")),
    };
    let fmt = tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "trace")]
    {
        if env::var("USDZ_TRACE").ok().as_deref() == Some("1") {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new().file("trace.json").build();
            if registry.with(chrome_layer).try_init().is_ok() {
                return Some(guard);
            }
            return None;
        }
        let _ = registry.try_init();
        None
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = registry.try_init();
    }
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    // Parse global flags
    let mut level = None;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args {
        match arg.as_str() {
            "-v" | "--verbose" => level = Some("debug"),
            "-vv" | "--trace" => level = Some("trace"),
            "-q" | "--quiet" => level = Some("error"),
            _ => filtered_args.push(arg),
        }
    }
    let _guard = init_logging(level);

    if let Err(e) = run(&filtered_args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &[&str]) -> Result<()> {
    let Some(&command) = args.first() else {
        print_help();
        return Ok(());
    };
    let rest = &args[1..];
    match command {
        "e" | "export" => {
            let [input, output, flags @ ..] = rest else {
                bail!("missing arguments\nUsage: usdz-cli export <scene.json> <out.usdz> [options]");
            };
            cmd_export(input, output, flags)
        }
        "im" | "import" => {
            let [input, output, flags @ ..] = rest else {
                bail!("missing arguments\nUsage: usdz-cli import <in.usdz|usda|usdc> <out.json> [--no-materials] [--no-animations]");
            };
            cmd_import(input, output, flags)
        }
        "i" | "info" => cmd_info(file_arg(rest, "info")?),
        "t" | "tree" => cmd_tree(file_arg(rest, "tree")?),
        "cat" => cmd_cat(file_arg(rest, "cat")?),
        "c" | "convert" => {
            let [input, output] = rest else {
                bail!("missing arguments\nUsage: usdz-cli convert <in> <out>");
            };
            cmd_convert(input, output)
        }
        "h" | "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        "--version" | "version" => {
            println!(
                "usdz-cli {} (built {} {})",
                env!("CARGO_PKG_VERSION"),
                env!("USDZ_BUILD_DATE"),
                env!("USDZ_BUILD_TIME")
            );
            Ok(())
        }
        // Default: if file exists, show info; otherwise error
        _ if Path::new(command).exists() => cmd_info(command),
        _ => {
            print_help();
            bail!("unknown command: {command}")
        }
    }
}

fn file_arg<'a>(rest: &[&'a str], command: &str) -> Result<&'a str> {
    match rest.first() {
        Some(&file) => Ok(file),
        None => bail!("missing file argument\nUsage: usdz-cli {command} <file>"),
    }
}

fn print_help() {
    println!("usdz-cli - USDZ export/import toolkit");
    println!();
    println!("USAGE:");
    println!("    usdz-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    e, export  <scene.json> <out.usdz>   Export a scene document as a package");
    println!("    im, import <in> <out.json>           Import a package or layer into a scene document");
    println!("    i, info    <file>                    Show package entries and stage summary");
    println!("    t, tree    <file>                    Show the prim hierarchy");
    println!("    cat        <file>                    Print the default layer as text");
    println!("    c, convert <in> <out>                Convert between .usda, .usdc and .usdz");
    println!("    h, help                              Show this help");
    println!("    version                              Show version and build date");
    println!();
    println!("EXPORT OPTIONS:");
    println!("    --options <file.json>    Load export options (host option names)");
    println!("    --no-materials           Skip materials");
    println!("    --animations             Sample animation over the scene frame range");
    println!("    --bake                   Bake procedural material inputs");
    println!("    --ao [samples]           Bake ambient occlusion");
    println!("    --size <px>              Bake texture size (16-4096)");
    println!("    --scale <factor>         Global scale (0.01-1000)");
    println!("    --collection <name>      Export one collection only");
    println!("    --text                   Write a text default layer");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!();
    println!("ENVIRONMENT:");
    println!("    USDZ_LOG         Log filter when no flag is given (e.g. usdz=debug)");
    println!("    USDZ_TRACE=1     Write trace.json (requires --features trace)");
    println!();
    println!("EXAMPLES:");
    println!("    usdz-cli export scene.json scene.usdz --bake --size 512");
    println!("    usdz-cli tree scene.usdz");
    println!("    usdz-cli convert scene.usdz scene.usda");
}

fn flag_value<'a>(it: &mut impl Iterator<Item = &'a str>, flag: &str) -> Result<&'a str> {
    it.next().with_context(|| format!("{flag} needs a value"))
}

fn parse_export_options(flags: &[&str]) -> Result<ExportOptions> {
    let mut options = ExportOptions::default();
    let mut it = flags.iter().copied().peekable();
    while let Some(flag) = it.next() {
        match flag {
            "--options" => {
                let file = flag_value(&mut it, flag)?;
                let text = fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
                options = serde_json::from_str(&text).with_context(|| format!("parsing {file}"))?;
            }
            "--no-materials" => options.export_materials = false,
            "--animations" => options.export_animations = true,
            "--bake" => options.bake_textures = true,
            "--ao" => {
                options.bake_ao = true;
                if let Some(samples) = it.peek().and_then(|s| s.parse::<i32>().ok()) {
                    options.bake_ao_samples = samples;
                    it.next();
                }
            }
            "--size" => options.bake_texture_size = flag_value(&mut it, flag)?.parse().context("--size")?,
            "--scale" => options.global_scale = flag_value(&mut it, flag)?.parse().context("--scale")?,
            "--collection" => options.collection = Some(flag_value(&mut it, flag)?.to_string()),
            "--text" => options.layer_format = LayerFormat::Text,
            other => bail!("unknown export option: {other}"),
        }
    }
    Ok(options)
}

fn print_warnings(warnings: &[Warning]) {
    for w in warnings {
        println!("  warning: {w}");
    }
}

fn cmd_export(input: &str, output: &str, flags: &[&str]) -> Result<()> {
    let options = parse_export_options(flags)?;
    debug!(?options, "export options");
    let mut scene = InMemoryScene::load(input).with_context(|| format!("loading {input}"))?;
    let report = export_usdz(&mut scene, output, &options, &CancelToken::new())?;

    println!("Package: {}", report.path.display());
    println!("Layer:   {}", report.layer_name);
    println!("Prims:   {} ({} meshes, {} materials)", report.prims, report.meshes, report.materials);
    println!("Assets:  {} ({} baked)", report.textures, report.bakes);
    println!("Size:    {} bytes", report.bytes);
    print_warnings(&report.warnings);
    Ok(())
}

fn cmd_import(input: &str, output: &str, flags: &[&str]) -> Result<()> {
    let mut options = ImportOptions::default();
    for flag in flags {
        match *flag {
            "--no-materials" => options.materials = false,
            "--no-animations" => options.animations = false,
            other => bail!("unknown import option: {other}"),
        }
    }
    let stem = Path::new(input).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut scene = InMemoryScene::new(&stem);
    let report = import_usdz(input, &mut scene, &options)?;
    scene.save(output).with_context(|| format!("writing {output}"))?;

    println!("Layer:     {}", report.layer);
    println!("Nodes:     {}", report.nodes.len());
    println!("Meshes:    {}", report.meshes);
    println!("Materials: {}", report.materials);
    println!("Images:    {}", report.images);
    print_warnings(&report.warnings);
    Ok(())
}

fn cmd_info(path: &str) -> Result<()> {
    info!("Opening {}", path);
    println!("File: {}", path);
    if path.to_ascii_lowercase().ends_with(".usdz") {
        let archive = Archive::open(path)?;
        println!("Entries ({}):", archive.len());
        for entry in archive.entries() {
            println!("  {:>10} @ {:<10} {}", entry.data.len(), entry.offset, entry.name);
        }
        print_warnings(archive.warnings());
        println!();
    }

    let stage = read_stage(path)?;
    let md = &stage.metadata;
    println!("Default prim: {}", md.default_prim.as_deref().unwrap_or("-"));
    println!("Up axis:      {}", md.up_axis);
    println!("Meters/unit:  {}", md.meters_per_unit);
    if let (Some(start), Some(end)) = (md.start_time_code, md.end_time_code) {
        println!("Time codes:   {start} - {end} @ {}", md.time_codes_per_second.unwrap_or(24.0));
    }
    println!();

    let prims = stage.traverse();
    let count = |t: PrimType| prims.iter().filter(|p| p.prim_type == t).count();
    println!("Prims:");
    println!("  Xforms:    {}", count(PrimType::Xform) + count(PrimType::SkelRoot));
    println!("  Meshes:    {}", count(PrimType::Mesh));
    println!("  Instances: {}", prims.iter().filter(|p| p.instanceable).count());
    println!("  Materials: {}", count(PrimType::Material));
    println!("  Skeletons: {}", count(PrimType::Skeleton));
    println!();
    println!("Total prims: {}", prims.len());
    Ok(())
}

fn print_tree(prim: &Prim, depth: usize) {
    let indent = "  ".repeat(depth);
    let kind = match prim.prim_type.type_name() {
        "" => "-",
        name => name,
    };
    let extra = match prim.references.first() {
        Some(target) => format!(" -> {target}"),
        None => String::new(),
    };
    println!("{indent}{} [{kind}]{extra}", prim.name);
    for child in &prim.children {
        print_tree(child, depth + 1);
    }
}

fn cmd_tree(path: &str) -> Result<()> {
    let stage = read_stage(path)?;
    println!("File: {}", path);
    println!();
    for root in &stage.root_prims {
        print_tree(root, 0);
    }
    Ok(())
}

fn cmd_cat(path: &str) -> Result<()> {
    let stage = read_stage(path)?;
    print!("{}", usda::encode(&stage));
    Ok(())
}

fn cmd_convert(input: &str, output: &str) -> Result<()> {
    let stage = read_stage(input)?;
    let ext = Path::new(output).extension().map(|e| e.to_string_lossy().to_ascii_lowercase());
    let bytes = match ext.as_deref() {
        Some("usda") => usda::encode(&stage).into_bytes(),
        Some("usdc") | Some("usd") => usdc::encode(&stage)?,
        Some("usdz") => {
            let root = stage.metadata.default_prim.clone().unwrap_or_else(|| "scene".to_string());
            let layer = usdc::encode(&stage)?;
            let assets: Vec<usdz::usdz::Asset> = if input.to_ascii_lowercase().ends_with(".usdz") {
                let archive = Archive::open(input)?;
                archive
                    .entries()
                    .iter()
                    .skip(1)
                    .map(|e| usdz::usdz::Asset { name: e.name.clone(), data: e.data.clone() })
                    .collect()
            } else {
                Vec::new()
            };
            usdz::usdz::pack(&format!("{root}.usdc"), &layer, &assets)?
        }
        _ => bail!("unsupported output format: {output}"),
    };
    fs::write(output, &bytes).with_context(|| format!("writing {output}"))?;
    println!("Converted {} -> {} ({} bytes)", input, output, bytes.len());
    Ok(())
}
