//! LK-004: YAML loading and structural validation.
//!
//! Loads layer files and `module.yaml` spec files, and validates structural
//! constraints before resolution:
//! - Version must be supported
//! - Module types must have a spec
//! - Aliases must be unique
//! - Links must name another module in the layer

use super::types::*;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;

/// File name of a module spec inside its type directory.
pub const MODULE_SPEC_FILE: &str = "module.yaml";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a layer file from disk.
pub fn parse_layer_file(path: &Path) -> Result<Layer, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_layer(&content)
}

/// Parse a layer from a string.
pub fn parse_layer(yaml: &str) -> Result<Layer, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Parse a module spec from a string.
pub fn parse_module_spec(yaml: &str) -> Result<ModuleSpec, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("module spec parse error: {}", e))
}

/// Load `<dir>/module.yaml` and remember `dir` on the spec.
pub fn load_module_spec(dir: &Path) -> Result<ModuleSpec, String> {
    let path = dir.join(MODULE_SPEC_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut spec =
        parse_module_spec(&content).map_err(|e| format!("{}: {}", path.display(), e))?;
    spec.dir = Some(dir.to_path_buf());
    Ok(spec)
}

/// Load every module spec below `base`, one per subdirectory, sorted by
/// directory name. Subdirectories without a `module.yaml` are skipped.
pub fn load_module_specs(base: &Path) -> Result<Vec<ModuleSpec>, String> {
    let entries = std::fs::read_dir(base)
        .map_err(|e| format!("failed to read {}: {}", base.display(), e))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("failed to read {}: {}", base.display(), e))?;
        let path = entry.path();
        if path.is_dir() && path.join(MODULE_SPEC_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let specs = dirs
        .iter()
        .map(|dir| load_module_spec(dir))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(count = specs.len(), base = %base.display(), "loaded module specs");
    Ok(specs)
}

/// Index specs by module type name.
pub fn spec_registry(specs: Vec<ModuleSpec>) -> IndexMap<String, ModuleSpec> {
    specs.into_iter().map(|s| (s.name.clone(), s)).collect()
}

/// Validate a parsed layer against the known specs. Returns a list of errors
/// (empty = valid).
pub fn validate_layer(layer: &Layer, specs: &IndexMap<String, ModuleSpec>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Version check
    if layer.version != CURRENT_LAYER_VERSION {
        errors.push(ValidationError {
            message: format!(
                "version must be {}, got {}",
                CURRENT_LAYER_VERSION, layer.version
            ),
        });
    }

    // Name check
    if layer.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    let aliases: HashSet<&str> = layer.modules.iter().map(Module::alias).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for module in &layer.modules {
        let alias = module.alias();

        if !seen.insert(alias) {
            errors.push(ValidationError {
                message: format!("duplicate module alias '{}'", alias),
            });
        }

        if !specs.contains_key(&module.module_type) {
            errors.push(ValidationError {
                message: format!(
                    "module '{}' has unknown type '{}'",
                    alias, module.module_type
                ),
            });
        }

        for link in &module.links {
            if link.name == alias {
                errors.push(ValidationError {
                    message: format!("module '{}' links to itself", alias),
                });
            } else if !aliases.contains(link.name.as_str()) {
                errors.push(ValidationError {
                    message: format!(
                        "module '{}' links to unknown module '{}'",
                        alias, link.name
                    ),
                });
            }
        }
    }

    errors
}
