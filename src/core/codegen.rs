//! LK-007: Provisioning variable generation.
//!
//! Each module becomes one block in the provisioning document:
//! - variables bound from its input or runtime context by `input_terraform_connections`
//! - a `source` pointing at the module's `tf_module` directory
//!
//! Cross-module pointers `module.<alias>.output.<path>` are rendered in the
//! provisioning engine's native syntax `${module.<alias>.<path>}`.

use super::document::{fill_missing_sequence_or_mapping, Document};
use super::linker::{MODULE_ROOT, OUTPUT_SEGMENT};
use super::reference::{Fragment, InterpolatedReference, Reference};
use super::types::{Module, ModuleSpec, RuntimeContext};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Directory name of the provisioning sources inside a module spec directory.
pub const TF_MODULE_DIR: &str = "tf_module";

/// Runtime values addressable as `meta.*` sources.
pub fn special_references(module: &Module, ctx: &RuntimeContext) -> Vec<(Reference, Document)> {
    let refs = [
        ("env", Some(ctx.env.clone())),
        ("layer", Some(ctx.layer.clone())),
        ("module", Some(module.alias().to_string())),
        ("region", ctx.region.clone()),
        ("account_id", ctx.account_id.clone()),
    ];
    refs.into_iter()
        .filter_map(|(key, value)| {
            let reference = Reference::from_keys(&["meta", key]).ok()?;
            Some((reference, Document::from(value?)))
        })
        .collect()
}

/// Bind provisioning variables for `module` from its spec's connection rules.
///
/// Runtime references win over input values. Rules whose source is neither
/// are skipped.
pub fn build_terraform_variables(
    module: &Module,
    spec: &ModuleSpec,
    ctx: &RuntimeContext,
) -> Result<Document, String> {
    let special = special_references(module, ctx);
    let mut vars = Document::empty_mapping();

    for conn in &spec.input_terraform_connections {
        let value = match special.iter().find(|(r, _)| *r == conn.source) {
            Some((_, value)) => value.clone(),
            None => match module.input.get(&conn.source) {
                Ok(value) => value.clone(),
                Err(_) => continue,
            },
        };

        vars.set(&conn.target, value, Some(fill_missing_sequence_or_mapping))
            .map_err(|e| format!("module {}: cannot bind {}: {}", module.alias(), conn.target, e))?;
    }

    Ok(vars)
}

/// Variables plus `source` for one module, after the module's `pre_plan` hook.
pub fn build_module_block(
    module: &Module,
    spec: &ModuleSpec,
    ctx: &RuntimeContext,
) -> Result<Document, String> {
    let mut vars = build_terraform_variables(module, spec, ctx)?;
    module.pre_plan(&mut vars);

    if let (Some(dir), Some(block)) = (&spec.dir, vars.as_mapping_mut()) {
        let source = dir.join(TF_MODULE_DIR);
        block.insert("source".to_string(), Document::from(source.display().to_string()));
    }
    Ok(vars)
}

/// Provisioning document covering `aliases`, emitted in sorted order.
pub fn build_modules_document<'a>(
    aliases: impl IntoIterator<Item = &'a str>,
    modules: &[Module],
    specs: &IndexMap<String, ModuleSpec>,
    ctx: &RuntimeContext,
) -> Result<Value, String> {
    let mut aliases: Vec<&str> = aliases.into_iter().collect();
    aliases.sort_unstable();

    let mut blocks = Map::new();
    for alias in aliases {
        let module = modules
            .iter()
            .find(|m| m.alias() == alias)
            .ok_or_else(|| format!("unknown module {}", alias))?;
        let spec = specs
            .get(&module.module_type)
            .ok_or_else(|| format!("unknown module type {} for {}", module.module_type, alias))?;
        let block = build_module_block(module, spec, ctx)?;
        blocks.insert(alias.to_string(), render_terraform(&block));
    }

    let mut doc = Map::new();
    doc.insert("module".to_string(), Value::Object(blocks));
    Ok(Value::Object(doc))
}

/// Provisioning document for one execution step.
pub fn build_step_document(
    step: &std::collections::BTreeSet<String>,
    modules: &[Module],
    specs: &IndexMap<String, ModuleSpec>,
    ctx: &RuntimeContext,
) -> Result<Value, String> {
    build_modules_document(step.iter().map(String::as_str), modules, specs, ctx)
}

/// Convert a document to JSON, rendering interpolations in provisioning syntax.
pub fn render_terraform(doc: &Document) -> Value {
    match doc {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Int(i) => Value::from(*i),
        Document::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Document::String(s) => Value::String(s.clone()),
        Document::Sequence(items) => Value::Array(items.iter().map(render_terraform).collect()),
        Document::Mapping(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_terraform(v)))
                .collect(),
        ),
        Document::Interpolation(interp) => Value::String(render_interpolation(interp)),
    }
}

fn render_interpolation(interp: &InterpolatedReference) -> String {
    match interp {
        InterpolatedReference::Simple(simple) => render_reference(simple.reference()),
        InterpolatedReference::Complex(complex) => complex
            .fragments()
            .iter()
            .map(|fragment| match fragment {
                Fragment::Literal(s) => s.clone(),
                Fragment::Reference(r) => render_reference(r.reference()),
            })
            .collect(),
    }
}

/// `module.x.output.y` → `${module.x.y}`; anything else is kept as written.
fn render_reference(reference: &Reference) -> String {
    let is_module_output = reference.len() > 2
        && reference.get(0).and_then(|s| s.as_key()) == Some(MODULE_ROOT)
        && reference.get(2).and_then(|s| s.as_key()) == Some(OUTPUT_SEGMENT);

    if is_module_output {
        let native = reference.slice(..2).join(&reference.slice(3..));
        format!("${{{}}}", native)
    } else {
        format!("${{{}}}", reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_module_spec;
    use crate::core::types::ModuleProcessor;
    use serde_json::json;
    use std::sync::Arc;

    fn r(raw: &str) -> Reference {
        Reference::parse(raw).unwrap()
    }

    fn ctx() -> RuntimeContext {
        RuntimeContext {
            env: "staging".to_string(),
            layer: "core".to_string(),
            region: Some("us-east-1".to_string()),
            account_id: None,
        }
    }

    fn spec() -> ModuleSpec {
        parse_module_spec(
            r#"
name: service
input_terraform_connections:
  - source: meta.env
    target: env_name
  - source: meta.module
    target: labels.module
  - source: meta.account_id
    target: account
  - source: image
    target: container.image
  - source: missing
    target: never
  - both: network
"#,
        )
        .unwrap()
    }

    fn app() -> Module {
        let input: Document = serde_yaml_ng::from_str(
            r#"
image: nginx
network:
  id: "${module.net.output.vpc_id}"
"#,
        )
        .unwrap();
        let mut module = Module::new("service").with_alias("app").with_input(input);
        let id = module.input.get(&r("network.id")).unwrap().as_str().unwrap().to_string();
        let parsed = InterpolatedReference::parse(&id).unwrap().unwrap();
        module.input.set(&r("network.id"), Document::from(parsed), None).unwrap();
        module
    }

    #[test]
    fn test_lk007_special_references() {
        let refs = special_references(&app(), &ctx());
        let keys: Vec<String> = refs.iter().map(|(r, _)| r.to_string()).collect();
        assert_eq!(keys, vec!["meta.env", "meta.layer", "meta.module", "meta.region"]);
        assert_eq!(refs[2].1, Document::from("app"));
    }

    #[test]
    fn test_lk007_build_variables() {
        let vars = build_terraform_variables(&app(), &spec(), &ctx()).unwrap();
        assert_eq!(
            render_terraform(&vars),
            json!({
                "env_name": "staging",
                "labels": {"module": "app"},
                "container": {"image": "nginx"},
                "network": {"id": "${module.net.vpc_id}"},
            })
        );
    }

    #[test]
    fn test_lk007_render_interpolations() {
        let mut doc = Document::empty_mapping();
        for (key, raw) in [
            ("simple", "${module.db.output.conn.host}"),
            ("complex", "postgres://${module.db.output.host}:${var.port}/app"),
            ("other", "${var.region}"),
        ] {
            let parsed = InterpolatedReference::parse(raw).unwrap().unwrap();
            doc.set(&r(key), Document::from(parsed), None).unwrap();
        }
        assert_eq!(
            render_terraform(&doc),
            json!({
                "simple": "${module.db.conn.host}",
                "complex": "postgres://${module.db.host}:${var.port}/app",
                "other": "${var.region}",
            })
        );
    }

    #[test]
    fn test_lk007_render_scalars() {
        let doc: Document = serde_yaml_ng::from_str("{a: 1, b: 1.5, c: true, d: ~, e: [x]}").unwrap();
        assert_eq!(
            render_terraform(&doc),
            json!({"a": 1, "b": 1.5, "c": true, "d": null, "e": ["x"]})
        );
    }

    #[derive(Debug)]
    struct Replicas;

    impl ModuleProcessor for Replicas {
        fn pre_plan(&self, _module: &Module, vars: &mut Document) {
            vars.set(&r("replicas"), Document::Int(3), None).unwrap();
        }
    }

    #[test]
    fn test_lk007_module_block_source_and_hook() {
        let mut spec = spec();
        spec.dir = Some(std::path::PathBuf::from("/modules/service"));
        let mut module = app();
        module.processor = Some(Arc::new(Replicas));

        let block = render_terraform(&build_module_block(&module, &spec, &ctx()).unwrap());
        assert_eq!(block["source"], json!("/modules/service/tf_module"));
        assert_eq!(block["replicas"], json!(3));
    }

    #[test]
    fn test_lk007_step_document() {
        let mut specs = IndexMap::new();
        specs.insert("service".to_string(), spec());
        specs.insert("network".to_string(), ModuleSpec::new("network"));
        let modules = vec![app(), Module::new("network").with_alias("net")];
        let step = ["net".to_string(), "app".to_string()].into_iter().collect();

        let doc = build_step_document(&step, &modules, &specs, &ctx()).unwrap();
        let names: Vec<&String> = doc["module"].as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["app", "net"]);
        assert_eq!(doc["module"]["net"], json!({}));

        let missing = ["ghost".to_string()].into_iter().collect();
        assert!(build_step_document(&missing, &modules, &specs, &ctx()).is_err());
    }
}
