//! LK-008: CLI subcommands: validate, plan, generate.

use crate::core::{codegen, linker, parser, types};
use clap::Subcommand;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a layer file against the module specs
    Validate {
        /// Path to the layer file
        #[arg(short, long, default_value = "layer.yaml")]
        file: PathBuf,

        /// Directory holding one subdirectory per module type
        #[arg(short, long, default_value = "modules")]
        modules_dir: PathBuf,
    },

    /// Resolve links and show the execution order
    Plan {
        /// Path to the layer file
        #[arg(short, long, default_value = "layer.yaml")]
        file: PathBuf,

        /// Directory holding one subdirectory per module type
        #[arg(short, long, default_value = "modules")]
        modules_dir: PathBuf,

        /// Print the link result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve links and emit the provisioning document
    Generate {
        /// Path to the layer file
        #[arg(short, long, default_value = "layer.yaml")]
        file: PathBuf,

        /// Directory holding one subdirectory per module type
        #[arg(short, long, default_value = "modules")]
        modules_dir: PathBuf,

        /// Environment name bound to `meta.env`
        #[arg(long)]
        env: String,

        /// Region bound to `meta.region`
        #[arg(long)]
        region: Option<String>,

        /// Account id bound to `meta.account_id`
        #[arg(long)]
        account_id: Option<String>,

        /// Only emit this execution step (0-based)
        #[arg(long)]
        step: Option<usize>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Validate { file, modules_dir } => cmd_validate(&file, &modules_dir),
        Commands::Plan {
            file,
            modules_dir,
            json,
        } => cmd_plan(&file, &modules_dir, json),
        Commands::Generate {
            file,
            modules_dir,
            env,
            region,
            account_id,
            step,
            output,
        } => {
            let ctx = types::RuntimeContext {
                env,
                layer: String::new(),
                region,
                account_id,
            };
            cmd_generate(&file, &modules_dir, ctx, step, output.as_deref())
        }
    }
}

fn cmd_validate(file: &Path, modules_dir: &Path) -> Result<(), String> {
    let layer = parser::parse_layer_file(file)?;
    let specs = parser::spec_registry(parser::load_module_specs(modules_dir)?);
    let errors = parser::validate_layer(&layer, &specs);

    if errors.is_empty() {
        println!(
            "OK: {} ({} modules, {} module types)",
            layer.name,
            layer.modules.len(),
            specs.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse, validate and resolve a layer.
fn load_and_resolve(
    file: &Path,
    modules_dir: &Path,
) -> Result<(types::Layer, IndexMap<String, types::ModuleSpec>, types::LinkResult), String> {
    let mut layer = parser::parse_layer_file(file)?;
    let specs = parser::spec_registry(parser::load_module_specs(modules_dir)?);

    let errors = parser::validate_layer(&layer, &specs);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err("validation failed".to_string());
    }

    let linker = linker::Linker::new(specs.values().cloned());
    let result = linker
        .process(&mut layer.modules)
        .map_err(|e| format!("{} error: {}", e.kind(), e))?;
    Ok((layer, specs, result))
}

fn cmd_plan(file: &Path, modules_dir: &Path, json: bool) -> Result<(), String> {
    let (layer, _, result) = load_and_resolve(file, modules_dir)?;

    if json {
        let out = serde_json::to_string_pretty(&result)
            .map_err(|e| format!("JSON serialization error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    print_plan(&layer, &result);
    Ok(())
}

/// Display the execution order and discovered interpolations.
fn print_plan(layer: &types::Layer, result: &types::LinkResult) {
    println!(
        "Planning: {} ({} modules, {} steps)",
        layer.name,
        layer.modules.len(),
        result.execution_order.len()
    );
    println!();

    for (idx, step) in result.execution_order.iter().enumerate() {
        println!("Step {}:", idx + 1);
        for alias in step {
            let links: Vec<String> = layer
                .modules
                .iter()
                .find(|m| m.alias() == alias)
                .map(|m| m.links.iter().map(format_link).collect())
                .unwrap_or_default();
            if links.is_empty() {
                println!("  {}", alias);
            } else {
                println!("  {} <- {}", alias, links.join(", "));
            }
        }
    }

    let interpolations: usize = result.interpolations.values().map(|m| m.len()).sum();
    if interpolations > 0 {
        println!();
        println!("Interpolations:");
        for (alias, found) in &result.interpolations {
            for (path, interp) in found {
                println!("  {}.{} = {}", alias, path, interp);
            }
        }
    }
}

fn format_link(link: &types::Link) -> String {
    let types: Vec<&str> = link.type_names().collect();
    if types.is_empty() {
        link.name.clone()
    } else {
        format!("{} [{}]", link.name, types.join(", "))
    }
}

fn cmd_generate(
    file: &Path,
    modules_dir: &Path,
    mut ctx: types::RuntimeContext,
    step: Option<usize>,
    output: Option<&Path>,
) -> Result<(), String> {
    let (layer, specs, result) = load_and_resolve(file, modules_dir)?;
    ctx.layer = layer.name.clone();

    let doc = match step {
        Some(idx) => {
            let step = result.execution_order.get(idx).ok_or_else(|| {
                format!(
                    "step {} out of range ({} steps)",
                    idx,
                    result.execution_order.len()
                )
            })?;
            codegen::build_step_document(step, &layer.modules, &specs, &ctx)?
        }
        None => {
            let all = result.execution_order.iter().flatten().map(String::as_str);
            codegen::build_modules_document(all, &layer.modules, &specs, &ctx)?
        }
    };

    let out = serde_json::to_string_pretty(&doc)
        .map_err(|e| format!("JSON serialization error: {}", e))?;
    match output {
        Some(path) => {
            std::fs::write(path, out + "\n")
                .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", out),
    }
    Ok(())
}
