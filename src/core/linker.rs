//! LK-005: Multi-pass link resolution.
//!
//! Passes, in order:
//! 1. Interpolation discovery: parse `${...}` strings in module inputs in place
//! 2. Links from interpolation: add untyped links for `module.<alias>` references
//! 3. Automatic links: wire `automatic` input link specs to their single provider
//! 4. Connect inputs: write `${module.<provider>.output.<path>}` pointers
//! 5. Execution order: layered topological sort over links
//!
//! Explicit links are validated while the automatic pass runs. Resolution is
//! all-or-nothing: it works on a copy of the modules and only writes the
//! rewritten modules back once every pass has succeeded.

use super::document::{fill_missing_sequence_or_mapping, Document};
use super::error::{DocumentError, ResolutionError};
use super::reference::{InterpolatedReference, Reference, SimpleInterpolatedReference};
use super::resolver::build_execution_order;
use super::types::*;
use super::visitor::Visitor;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::instrument;

/// First segment of a reference into another module.
pub const MODULE_ROOT: &str = "module";

/// Segment between a module alias and its output path.
pub const OUTPUT_SEGMENT: &str = "output";

type ModuleMap = IndexMap<String, Module>;

/// Module alias → input location → parsed interpolation.
pub type InterpolationMap = BTreeMap<String, BTreeMap<Reference, InterpolatedReference>>;

/// Resolves links between modules against a registry of module specs.
#[derive(Debug, Clone, Default)]
pub struct Linker {
    specs: IndexMap<String, ModuleSpec>,
}

impl Linker {
    pub fn new(specs: impl IntoIterator<Item = ModuleSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn specs(&self) -> &IndexMap<String, ModuleSpec> {
        &self.specs
    }

    /// Run every pass over `modules`. On success the modules hold their
    /// rewritten inputs and inferred links; on failure they are untouched.
    #[instrument(skip_all, fields(modules = modules.len()))]
    pub fn process(&self, modules: &mut [Module]) -> Result<LinkResult, ResolutionError> {
        let mut module_map = self.module_map(modules)?;

        tracing::debug!("pass: interpolation discovery");
        let interpolations = self.pass_interpolation(&mut module_map)?;

        tracing::debug!("pass: links from interpolation");
        self.pass_add_links_from_interpolation(&mut module_map, &interpolations)?;

        tracing::debug!("pass: automatic links");
        self.pass_automatic_links(&mut module_map)?;

        tracing::debug!("pass: connect inputs");
        self.pass_connect_inputs(&mut module_map)?;

        tracing::debug!("pass: execution order");
        let resolved: Vec<Module> = module_map.into_values().collect();
        let execution_order = build_execution_order(&resolved)?;

        for (slot, module) in modules.iter_mut().zip(resolved) {
            *slot = module;
        }

        Ok(LinkResult {
            execution_order,
            interpolations,
        })
    }

    /// Copy `modules` into an alias-keyed map, rejecting unknown types and
    /// duplicate aliases.
    fn module_map(&self, modules: &[Module]) -> Result<ModuleMap, ResolutionError> {
        let mut module_map = ModuleMap::with_capacity(modules.len());
        for module in modules {
            if !self.specs.contains_key(&module.module_type) {
                return Err(ResolutionError::UnknownModuleType {
                    alias: module.alias().to_string(),
                    module_type: module.module_type.clone(),
                });
            }
            if module_map.contains_key(module.alias()) {
                return Err(ResolutionError::DuplicateAlias {
                    alias: module.alias().to_string(),
                });
            }
            module_map.insert(module.alias().to_string(), module.clone());
        }
        Ok(module_map)
    }

    fn spec_of(&self, module: &Module) -> Result<&ModuleSpec, ResolutionError> {
        self.specs
            .get(&module.module_type)
            .ok_or_else(|| ResolutionError::UnknownModuleType {
                alias: module.alias().to_string(),
                module_type: module.module_type.clone(),
            })
    }

    /// Replace every interpolation string in module inputs with its parsed form.
    fn pass_interpolation(&self, modules: &mut ModuleMap) -> Result<InterpolationMap, ResolutionError> {
        let mut found = InterpolationMap::new();

        for (alias, module) in modules.iter_mut() {
            let parsed = discover_interpolations(alias, &module.input)?;

            for (path, interpolation) in &parsed {
                module
                    .input
                    .set(path, Document::Interpolation(interpolation.clone()), None)
                    .map_err(|error| ResolutionError::Document {
                        alias: alias.clone(),
                        error,
                    })?;
            }

            if !parsed.is_empty() {
                tracing::debug!(module = %alias, count = parsed.len(), "found interpolations");
            }
            found.insert(alias.clone(), parsed);
        }

        Ok(found)
    }

    /// Add untyped links for modules referenced only through interpolation.
    fn pass_add_links_from_interpolation(
        &self,
        modules: &mut ModuleMap,
        interpolations: &InterpolationMap,
    ) -> Result<(), ResolutionError> {
        let known: BTreeSet<String> = modules.keys().cloned().collect();

        for (alias, module) in modules.iter_mut() {
            let Some(found) = interpolations.get(alias) else {
                continue;
            };

            let mut referenced: BTreeSet<&str> = BTreeSet::new();
            for (path, interpolation) in found {
                for reference in interpolation.references() {
                    if reference.first().and_then(|s| s.as_key()) != Some(MODULE_ROOT) {
                        continue;
                    }
                    let Some(target) = reference.get(1).and_then(|s| s.as_key()) else {
                        return Err(ResolutionError::MissingModuleAlias {
                            alias: alias.clone(),
                            path: path.clone(),
                        });
                    };
                    if !known.contains(target) {
                        return Err(ResolutionError::UnknownModuleReference {
                            alias: alias.clone(),
                            path: path.clone(),
                            target: target.to_string(),
                        });
                    }
                    referenced.insert(target);
                }
            }

            for target in referenced {
                if module.link_for_module(target).is_none() {
                    tracing::debug!(module = %alias, provider = target, "link from interpolation");
                    module.links.push(Link::untyped(target));
                }
            }
        }

        Ok(())
    }

    /// Link every automatic input link spec to the one module providing it.
    fn pass_automatic_links(&self, modules: &mut ModuleMap) -> Result<(), ResolutionError> {
        // relationship type → providing aliases, in declaration order
        let mut providers: HashMap<&str, Vec<String>> = HashMap::new();
        for (alias, module) in modules.iter() {
            for output in &self.spec_of(module)?.output_links {
                providers
                    .entry(output.link_type.as_str())
                    .or_default()
                    .push(alias.clone());
            }
        }

        let aliases: Vec<String> = modules.keys().cloned().collect();
        for alias in &aliases {
            let Some(module) = modules.get(alias) else {
                continue;
            };
            let already_linked = self.check_explicit_links(modules, module)?;
            let spec = self.spec_of(module)?;

            let mut additions: Vec<(String, String)> = Vec::new();
            for link_spec in spec.input_links.iter().filter(|s| s.automatic) {
                if already_linked.contains(&link_spec.link_type) && link_spec.multiple_target.is_none() {
                    continue;
                }

                let candidates: Vec<String> = providers
                    .get(link_spec.link_type.as_str())
                    .into_iter()
                    .flatten()
                    .filter(|p| *p != alias)
                    .cloned()
                    .collect();

                match candidates.as_slice() {
                    [] => continue,
                    [provider] => additions.push((provider.clone(), link_spec.alias().to_string())),
                    _ => {
                        return Err(ResolutionError::AmbiguousAutomaticLink {
                            alias: alias.clone(),
                            link_type: link_spec.link_type.clone(),
                            providers: candidates,
                        })
                    }
                }
            }

            if let Some(module) = modules.get_mut(alias) {
                for (provider, link_type) in additions {
                    tracing::debug!(module = %alias, provider = %provider, link_type = %link_type, "automatic link");
                    module.link_for_module_or_insert(&provider).add_type(link_type);
                }
            }
        }

        Ok(())
    }

    /// Validate explicit links on `module`. Returns the canonical link types
    /// already in use.
    fn check_explicit_links(
        &self,
        modules: &ModuleMap,
        module: &Module,
    ) -> Result<BTreeSet<String>, ResolutionError> {
        let spec = self.spec_of(module)?;
        let mut already_linked = BTreeSet::new();

        for link in &module.links {
            if !modules.contains_key(&link.name) {
                return Err(ResolutionError::UnknownLinkTarget {
                    alias: module.alias().to_string(),
                    target: link.name.clone(),
                });
            }

            for type_or_alias in link.type_names() {
                let link_spec = spec.input_link_spec_for(type_or_alias).ok_or_else(|| {
                    ResolutionError::UnknownLinkType {
                        alias: module.alias().to_string(),
                        link_type: type_or_alias.to_string(),
                    }
                })?;

                let fresh = already_linked.insert(link_spec.link_type.clone());
                if !fresh && link_spec.multiple_target.is_none() {
                    return Err(ResolutionError::DuplicateLinkType {
                        alias: module.alias().to_string(),
                        link_type: link_spec.link_type.clone(),
                    });
                }
            }
        }

        Ok(already_linked)
    }

    /// Point linked inputs at provider outputs.
    fn pass_connect_inputs(&self, modules: &mut ModuleMap) -> Result<(), ResolutionError> {
        let provider_types: HashMap<String, String> = modules
            .iter()
            .map(|(alias, m)| (alias.clone(), m.module_type.clone()))
            .collect();

        for module in modules.values_mut() {
            self.connect_inputs_for_module(&provider_types, module)?;
        }
        Ok(())
    }

    fn connect_inputs_for_module(
        &self,
        provider_types: &HashMap<String, String>,
        module: &mut Module,
    ) -> Result<(), ResolutionError> {
        let spec = self.spec_of(module)?;
        let alias = module.alias().to_string();
        let links = module.links.clone();
        let doc_err = |error: DocumentError| ResolutionError::Document {
            alias: alias.clone(),
            error,
        };

        for link in &links {
            let provider_spec = provider_types
                .get(&link.name)
                .and_then(|t| self.specs.get(t))
                .ok_or_else(|| ResolutionError::UnknownLinkTarget {
                    alias: alias.clone(),
                    target: link.name.clone(),
                })?;

            for type_or_alias in link.type_names() {
                let input_spec = spec.input_link_spec_for(type_or_alias).ok_or_else(|| {
                    ResolutionError::UnknownLinkType {
                        alias: alias.clone(),
                        link_type: type_or_alias.to_string(),
                    }
                })?;

                // canonical type, never the alias
                let output_spec = provider_spec
                    .output_link_spec_for(&input_spec.link_type)
                    .ok_or_else(|| ResolutionError::MissingOutputLinkSpec {
                        alias: alias.clone(),
                        provider: link.name.clone(),
                        link_type: input_spec.link_type.clone(),
                    })?;

                let connections = build_connection_map(&alias, &link.name, input_spec, output_spec)?;
                let output_root = provider_output_root(&link.name)?;

                let base = match input_spec.multiple_target {
                    Some(ref target) => append_entry(&mut module.input, target).map_err(doc_err)?,
                    None => Reference::root(),
                };

                for (target, source) in &connections {
                    let pointer = InterpolatedReference::from(output_root.join(source));
                    module
                        .input
                        .set(
                            &base.join(target),
                            Document::Interpolation(pointer),
                            Some(fill_missing_sequence_or_mapping),
                        )
                        .map_err(doc_err)?;
                }

                let params = link
                    .params_for(type_or_alias)
                    .or_else(|| link.params_for(&input_spec.link_type));
                let Some(params) = params else {
                    continue;
                };
                for conn in &input_spec.params_connections {
                    let Ok(value) = params.get(&conn.source) else {
                        continue;
                    };
                    module
                        .input
                        .set(
                            &base.join(&conn.target),
                            value.clone(),
                            Some(fill_missing_sequence_or_mapping),
                        )
                        .map_err(doc_err)?;
                }
            }
        }

        Ok(())
    }
}

/// Map consumer input locations to provider output locations for one link type.
fn build_connection_map(
    alias: &str,
    provider: &str,
    input_spec: &InputLinkSpec,
    output_spec: &OutputLinkSpec,
) -> Result<Vec<(Reference, Reference)>, ResolutionError> {
    let one_sided = |side: &'static str| ResolutionError::OneSidedWildcard {
        alias: alias.to_string(),
        provider: provider.to_string(),
        link_type: input_spec.link_type.clone(),
        side,
    };

    match (&input_spec.connect_all_to, &output_spec.connect_all_from) {
        (Some(to), Some(from)) => Ok(vec![(to.clone(), from.clone())]),
        (Some(_), None) => Err(one_sided("connect_all_to")),
        (None, Some(_)) => Err(one_sided("connect_all_from")),
        (None, None) => {
            let empty = |side: &'static str| ResolutionError::EmptyConnections {
                alias: alias.to_string(),
                provider: provider.to_string(),
                link_type: input_spec.link_type.clone(),
                side,
            };
            if input_spec.connections.is_empty() {
                return Err(empty("input"));
            }
            if output_spec.connections.is_empty() {
                return Err(empty("output"));
            }

            let outputs: HashMap<&Reference, &Reference> = output_spec
                .connections
                .iter()
                .map(|c| (&c.target, &c.source))
                .collect();

            input_spec
                .connections
                .iter()
                .map(|c| match outputs.get(&c.source) {
                    Some(source) => Ok((c.target.clone(), (*source).clone())),
                    None => Err(ResolutionError::UnmatchedConnection {
                        alias: alias.to_string(),
                        provider: provider.to_string(),
                        link_type: input_spec.link_type.clone(),
                        declared: c.source.clone(),
                    }),
                })
                .collect()
        }
    }
}

/// `${module.<provider>.output}`
/// Parse every interpolation string in `input`, keyed by location. Fails when
/// one sits under a key a `Reference` cannot address.
fn discover_interpolations(
    alias: &str,
    input: &Document,
) -> Result<BTreeMap<Reference, InterpolatedReference>, ResolutionError> {
    let visitor = Visitor::new(input);

    for (path, key, value) in visitor.non_addressable() {
        if holds_interpolation(value) {
            return Err(ResolutionError::NonAddressableKey {
                alias: alias.to_string(),
                path,
                key: key.to_string(),
            });
        }
    }

    let mut parsed = BTreeMap::new();
    for (path, value) in visitor.iter() {
        let interpolation = match value {
            Document::String(raw) => match InterpolatedReference::parse(raw) {
                Ok(Some(interpolation)) => interpolation,
                Ok(None) => continue,
                Err(error) => {
                    return Err(ResolutionError::MalformedInterpolation {
                        alias: alias.to_string(),
                        path,
                        error,
                    })
                }
            },
            Document::Interpolation(interpolation) => interpolation.clone(),
            _ => continue,
        };
        parsed.insert(path, interpolation);
    }
    Ok(parsed)
}

/// Whether any string in `doc`, under any key, carries `${...}` text.
fn holds_interpolation(doc: &Document) -> bool {
    let mut pending = vec![doc];
    while let Some(node) = pending.pop() {
        match node {
            Document::Interpolation(_) => return true,
            Document::String(raw) if !matches!(InterpolatedReference::parse(raw), Ok(None)) => {
                return true
            }
            Document::Sequence(items) => pending.extend(items),
            Document::Mapping(map) => pending.extend(map.values()),
            _ => {}
        }
    }
    false
}

fn provider_output_root(provider: &str) -> Result<SimpleInterpolatedReference, ResolutionError> {
    Reference::from_keys(&[MODULE_ROOT, provider, OUTPUT_SEGMENT])
        .map(SimpleInterpolatedReference::new)
        .map_err(|error| ResolutionError::InvalidAlias {
            alias: provider.to_string(),
            error,
        })
}

/// Append an empty mapping to the sequence at `base`, creating the sequence
/// when absent or null. Returns the path of the new entry.
fn append_entry(input: &mut Document, base: &Reference) -> Result<Reference, DocumentError> {
    let missing = input.get(base).map_or(true, Document::is_null);
    if missing {
        input.set(
            base,
            Document::Sequence(Vec::new()),
            Some(fill_missing_sequence_or_mapping),
        )?;
    }

    match input.get_mut(base)? {
        Document::Sequence(items) => {
            items.push(Document::empty_mapping());
            Ok(base.child(items.len() - 1))
        }
        other => Err(DocumentError::WrongType {
            path: base.clone(),
            expected: "sequence",
            found: other.type_name(),
        }),
    }
}

/// Resolve `modules` against `specs` in one call.
pub fn resolve(
    modules: &mut [Module],
    specs: impl IntoIterator<Item = ModuleSpec>,
) -> Result<LinkResult, ResolutionError> {
    Linker::new(specs).process(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::parser::{parse_layer, parse_module_spec};

    const SPECS: &[&str] = &[
        r#"
name: network
output_links:
  - type: vpc
    connections:
      - target: id
        source: vpc_id
"#,
        r#"
name: service
input_links:
  - type: vpc
    alias: network
    automatic: true
    connections:
      - target: network.id
        source: id
"#,
        r#"
name: vault
output_links:
  - type: secret
    connections:
      - target: arn
        source: secret_arn
"#,
        r#"
name: worker
input_links:
  - type: secret
    multiple_target: secrets
    connections:
      - target: arn
        source: arn
    params_connections:
      - source: mount
        target: mount_path
"#,
        r#"
name: bucket
output_links:
  - type: storage
    connect_all_from: outputs
  - type: blob
    connections:
      - target: name
        source: bucket_name
  - type: cache
    connections:
      - target: host
        source: cache_host
  - type: queue
    connections:
      - target: arn
        source: queue_arn
"#,
        r#"
name: reader
input_links:
  - type: storage
    connect_all_to: storage
  - type: blob
    connect_all_to: blob
  - type: cache
  - type: queue
    connections:
      - target: queue.url
        source: url
"#,
        r#"
name: mesh
input_links:
  - type: peer
    automatic: true
    connections:
      - target: peer
        source: addr
output_links:
  - type: peer
    connections:
      - target: addr
        source: address
"#,
        "name: plain",
    ];

    fn linker() -> Linker {
        Linker::new(SPECS.iter().map(|s| parse_module_spec(s).unwrap()))
    }

    fn modules(yaml: &str) -> Vec<Module> {
        parse_layer(yaml).unwrap().modules
    }

    fn r(raw: &str) -> Reference {
        Reference::parse(raw).unwrap()
    }

    fn pointer(raw: &str) -> Document {
        Document::Interpolation(InterpolatedReference::parse(raw).unwrap().unwrap())
    }

    fn step(aliases: &[&str]) -> BTreeSet<String> {
        aliases.iter().map(|s| s.to_string()).collect()
    }

    fn module<'a>(modules: &'a [Module], alias: &str) -> &'a Module {
        modules.iter().find(|m| m.alias() == alias).unwrap()
    }

    const NET_APP: &str = r#"
name: staging
modules:
  - type: service
    alias: app
  - type: network
    alias: net
"#;

    #[test]
    fn test_lk005_automatic_connection_rewrite() {
        let mut mods = modules(NET_APP);
        let result = linker().process(&mut mods).unwrap();

        let app = module(&mods, "app");
        assert_eq!(
            app.input.get(&r("network.id")).unwrap(),
            &pointer("${module.net.output.vpc_id}")
        );
        assert_eq!(
            app.link_for_module("net").unwrap().type_names().collect::<Vec<_>>(),
            vec!["network"]
        );
        assert_eq!(result.execution_order, vec![step(&["net"]), step(&["app"])]);
    }

    #[test]
    fn test_lk005_resolve_entry_point() {
        let mut mods = modules(NET_APP);
        let specs = SPECS.iter().map(|s| parse_module_spec(s).unwrap());
        let result = resolve(&mut mods, specs).unwrap();
        assert_eq!(result.step_of("net"), Some(0));
        assert_eq!(result.step_of("app"), Some(1));
    }

    #[test]
    fn test_lk005_mutual_links_cycle() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: a
    links: [b]
  - type: plain
    alias: b
    links: [a]
"#,
        );
        let err = linker().process(&mut mods).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Graph);
        assert_eq!(
            err,
            ResolutionError::LinkCycle {
                aliases: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_lk005_ambiguous_automatic_link() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net1
  - type: network
    alias: net2
  - type: service
    alias: app
"#,
        );
        let err = linker().process(&mut mods).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::AmbiguousAutomaticLink {
                alias: "app".to_string(),
                link_type: "vpc".to_string(),
                providers: vec!["net1".to_string(), "net2".to_string()],
            }
        );
    }

    #[test]
    fn test_lk005_explicit_link_settles_ambiguity() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net1
  - type: network
    alias: net2
  - type: service
    alias: app
    links:
      - name: net2
        types: [vpc]
"#,
        );
        let result = linker().process(&mut mods).unwrap();
        let app = module(&mods, "app");
        assert_eq!(app.links.len(), 1);
        assert_eq!(
            app.input.get(&r("network.id")).unwrap(),
            &pointer("${module.net2.output.vpc_id}")
        );
        assert_eq!(result.execution_order, vec![step(&["net1", "net2"]), step(&["app"])]);
    }

    #[test]
    fn test_lk005_multiple_target_fan_in() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: vault
    alias: db1
  - type: vault
    alias: db2
  - type: worker
    alias: jobs
    links:
      - name: db1
        types: [secret]
        params:
          secret:
            mount: /run/db1
      - name: db2
        types: [secret]
"#,
        );
        let result = linker().process(&mut mods).unwrap();
        let jobs = module(&mods, "jobs");
        let secrets = jobs.input.get(&r("secrets")).unwrap().as_sequence().unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(
            jobs.input.get(&r("secrets.0.arn")).unwrap(),
            &pointer("${module.db1.output.secret_arn}")
        );
        assert_eq!(
            jobs.input.get(&r("secrets.0.mount_path")).unwrap(),
            &Document::from("/run/db1")
        );
        assert_eq!(
            jobs.input.get(&r("secrets.1.arn")).unwrap(),
            &pointer("${module.db2.output.secret_arn}")
        );
        assert!(!jobs.input.contains(&r("secrets.1.mount_path")));
        assert_eq!(result.execution_order, vec![step(&["db1", "db2"]), step(&["jobs"])]);
    }

    #[test]
    fn test_lk005_multiple_target_appends_to_existing() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: vault
    alias: db1
  - type: worker
    alias: jobs
    secrets:
      - arn: static
    links:
      - name: db1
        types: [secret]
"#,
        );
        linker().process(&mut mods).unwrap();
        let jobs = module(&mods, "jobs");
        assert_eq!(jobs.input.get(&r("secrets")).unwrap().as_sequence().unwrap().len(), 2);
        assert_eq!(jobs.input.get(&r("secrets.0.arn")).unwrap(), &Document::from("static"));
    }

    #[test]
    fn test_lk005_multiple_target_not_a_sequence() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: vault
    alias: db1
  - type: worker
    alias: jobs
    secrets: nope
    links:
      - name: db1
        types: [secret]
"#,
        );
        let err = linker().process(&mut mods).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Document);
        assert_eq!(err.alias(), Some("jobs"));
    }

    #[test]
    fn test_lk005_interpolation_discovery() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net
  - type: plain
    alias: web
    arn: "arn:${module.net.output.vpc_id}/*"
    region: "${var.region}"
    plain: just text
"#,
        );
        let result = linker().process(&mut mods).unwrap();

        let web = &result.interpolations["web"];
        assert_eq!(web.len(), 2);
        assert_eq!(web[&r("arn")].to_string(), "arn:${module.net.output.vpc_id}/*");
        assert!(web.contains_key(&r("region")));
        assert!(result.interpolations["net"].is_empty());

        let module_web = module(&mods, "web");
        assert!(matches!(
            module_web.input.get(&r("arn")).unwrap(),
            Document::Interpolation(InterpolatedReference::Complex(_))
        ));
        assert_eq!(module_web.input.get(&r("plain")).unwrap(), &Document::from("just text"));
        assert_eq!(module_web.link_for_module("net").unwrap(), &Link::untyped("net"));
        assert_eq!(result.execution_order, vec![step(&["net"]), step(&["web"])]);
    }

    #[test]
    fn test_lk005_reference_to_unknown_module() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: web
    nested:
      target: "${module.ghost.output.id}"
"#,
        );
        let err = linker().process(&mut mods).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownModuleReference {
                alias: "web".to_string(),
                path: r("nested.target"),
                target: "ghost".to_string(),
            }
        );
        assert_eq!(err.kind(), ErrorKind::Reference);
    }

    #[test]
    fn test_lk005_malformed_interpolation() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: web
    bad: "${module.1x}"
"#,
        );
        assert!(matches!(
            linker().process(&mut mods),
            Err(ResolutionError::MalformedInterpolation { .. })
        ));
    }

    #[test]
    fn test_lk005_interpolation_in_sequence() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net
  - type: plain
    alias: web
    hosts:
      - "${module.net.output.host}"
      - static.example.com
"#,
        );
        let result = linker().process(&mut mods).unwrap();

        assert_eq!(result.interpolations["web"].len(), 1);
        assert!(result.interpolations["web"].contains_key(&r("hosts.0")));
        assert_eq!(module(&mods, "web").link_for_module("net").unwrap(), &Link::untyped("net"));
        assert_eq!(result.execution_order, vec![step(&["net"]), step(&["web"])]);
    }

    #[test]
    fn test_lk005_interpolation_under_non_identifier_key() {
        let original = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net
  - type: plain
    alias: web
    env:
      MY-VAR: "${module.net.output.id}"
"#,
        );
        let mut mods = original.clone();
        let err = linker().process(&mut mods).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::NonAddressableKey {
                alias: "web".to_string(),
                path: r("env"),
                key: "MY-VAR".to_string(),
            }
        );
        assert_eq!(err.kind(), ErrorKind::Reference);
        assert_eq!(mods, original);
    }

    #[test]
    fn test_lk005_interpolation_nested_below_non_identifier_key() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: web
    tags:
      kubernetes.io/role:
        - owner: "team-${module.ghost.output.id}"
"#,
        );
        match linker().process(&mut mods).unwrap_err() {
            ResolutionError::NonAddressableKey { alias, path, key } => {
                assert_eq!(alias, "web");
                assert_eq!(path, r("tags"));
                assert_eq!(key, "kubernetes.io/role");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lk005_non_identifier_key_with_plain_values() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: web
    labels:
      app.kubernetes.io/name: web
      MY-VAR: [1, 2]
"#,
        );
        let result = linker().process(&mut mods).unwrap();
        assert!(result.interpolations["web"].is_empty());
        assert_eq!(result.execution_order, vec![step(&["web"])]);
    }

    #[test]
    fn test_lk005_module_reference_without_alias() {
        for raw in [r#""${module}""#, r#""prefix-${module}""#] {
            let mut mods = modules(&format!(
                "name: staging\nmodules:\n  - type: plain\n    alias: web\n    x: {raw}\n"
            ));
            let err = linker().process(&mut mods).unwrap_err();
            assert_eq!(
                err,
                ResolutionError::MissingModuleAlias {
                    alias: "web".to_string(),
                    path: r("x"),
                }
            );
            assert_eq!(err.kind(), ErrorKind::Reference);
        }
    }

    #[test]
    fn test_lk005_link_to_unknown_module() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: web
    links: [ghost]
"#,
        );
        assert_eq!(
            linker().process(&mut mods).unwrap_err(),
            ResolutionError::UnknownLinkTarget {
                alias: "web".to_string(),
                target: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_lk005_duplicate_link_type() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net1
  - type: network
    alias: net2
  - type: service
    alias: app
    links:
      - name: net1
        types: [vpc]
      - name: net2
        types: [network]
"#,
        );
        assert_eq!(
            linker().process(&mut mods).unwrap_err(),
            ResolutionError::DuplicateLinkType {
                alias: "app".to_string(),
                link_type: "vpc".to_string()
            }
        );
    }

    #[test]
    fn test_lk005_unknown_link_type() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: network
    alias: net
  - type: service
    alias: app
    links:
      - name: net
        types: [bogus]
"#,
        );
        assert!(matches!(
            linker().process(&mut mods),
            Err(ResolutionError::UnknownLinkType { ref link_type, .. }) if link_type == "bogus"
        ));
    }

    #[test]
    fn test_lk005_missing_output_link_spec() {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: plain
    alias: other
  - type: service
    alias: app
    links:
      - name: other
        types: [vpc]
"#,
        );
        assert_eq!(
            linker().process(&mut mods).unwrap_err(),
            ResolutionError::MissingOutputLinkSpec {
                alias: "app".to_string(),
                provider: "other".to_string(),
                link_type: "vpc".to_string(),
            }
        );
    }

    fn reader_linked_by(link_type: &str) -> Vec<Module> {
        let mut mods = modules(
            r#"
name: staging
modules:
  - type: bucket
    alias: store
  - type: reader
    alias: rd
"#,
        );
        mods[1].links.push(Link::with_types("store", [link_type]));
        mods
    }

    #[test]
    fn test_lk005_wildcard_to_wildcard() {
        let mut mods = reader_linked_by("storage");
        linker().process(&mut mods).unwrap();
        assert_eq!(
            mods[1].input.get(&r("storage")).unwrap(),
            &pointer("${module.store.output.outputs}")
        );
    }

    #[test]
    fn test_lk005_one_sided_wildcard() {
        let mut mods = reader_linked_by("blob");
        let err = linker().process(&mut mods).unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::OneSidedWildcard { side: "connect_all_to", .. }
        ));
        assert_eq!(err.kind(), ErrorKind::LinkShape);
    }

    #[test]
    fn test_lk005_empty_connections() {
        let mut mods = reader_linked_by("cache");
        assert_eq!(
            linker().process(&mut mods).unwrap_err(),
            ResolutionError::EmptyConnections {
                alias: "rd".to_string(),
                provider: "store".to_string(),
                link_type: "cache".to_string(),
                side: "input",
            }
        );
    }

    #[test]
    fn test_lk005_unmatched_connection() {
        let mut mods = reader_linked_by("queue");
        assert_eq!(
            linker().process(&mut mods).unwrap_err(),
            ResolutionError::UnmatchedConnection {
                alias: "rd".to_string(),
                provider: "store".to_string(),
                link_type: "queue".to_string(),
                declared: r("url"),
            }
        );
    }

    #[test]
    fn test_lk005_no_automatic_self_link() {
        let mut mods = modules("name: staging\nmodules:\n  - type: mesh\n");
        let result = linker().process(&mut mods).unwrap();
        assert!(mods[0].links.is_empty());
        assert_eq!(result.execution_order, vec![step(&["mesh"])]);
    }

    #[test]
    fn test_lk005_schema_errors() {
        let mut mods = modules("name: s\nmodules:\n  - type: mystery\n");
        let err = linker().process(&mut mods).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(matches!(err, ResolutionError::UnknownModuleType { .. }));

        let mut mods = modules("name: s\nmodules:\n  - type: plain\n  - type: plain\n");
        assert_eq!(
            linker().process(&mut mods).unwrap_err(),
            ResolutionError::DuplicateAlias {
                alias: "plain".to_string()
            }
        );
    }

    #[test]
    fn test_lk005_failure_leaves_modules_untouched() {
        let yaml = r#"
name: staging
modules:
  - type: network
    alias: net
  - type: service
    alias: app
    url: "${module.net.output.url}"
  - type: plain
    alias: loop
    links: [loop]
"#;
        let original = modules(yaml);
        let mut mods = original.clone();
        assert!(linker().process(&mut mods).is_err());
        assert_eq!(mods, original);
    }

    #[test]
    fn test_lk005_idempotent() {
        let yaml = r#"
name: staging
modules:
  - type: network
    alias: net
  - type: service
    alias: app
    url: "https://${module.net.output.host}/api"
  - type: vault
    alias: db1
  - type: worker
    alias: jobs
    links:
      - name: db1
        types: [secret]
"#;
        let mut first = modules(yaml);
        let mut second = modules(yaml);
        let a = linker().process(&mut first).unwrap();
        let b = linker().process(&mut second).unwrap();
        assert_eq!(a, b);
        assert_eq!(first, second);
    }

    #[test]
    fn test_lk005_topological_validity() {
        let yaml = r#"
name: staging
modules:
  - type: plain
    alias: e
    links: [d, a]
  - type: plain
    alias: d
    links: [c]
  - type: service
    alias: c
    host: "${module.a.output.host}"
  - type: network
    alias: a
  - type: plain
    alias: b
    links: [a]
"#;
        let mut mods = modules(yaml);
        let result = linker().process(&mut mods).unwrap();
        for consumer in &mods {
            let consumer_step = result.step_of(consumer.alias()).unwrap();
            for link in &consumer.links {
                let provider_step = result.step_of(&link.name).unwrap();
                assert!(
                    provider_step < consumer_step,
                    "{} must run before {}",
                    link.name,
                    consumer.alias()
                );
            }
        }
        assert_eq!(result.execution_order.iter().map(BTreeSet::len).sum::<usize>(), 5);
    }
}
