#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use strata_context::InMemoryLoader;
use strata_models::{
    Differential, ElementDefinition, ElementDefinitionType, Max, Snapshot, StructureDefinition,
    StructureDefinitionKind, TypeDerivationRule,
};
use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static BLOCK_ON_GUARD: OnceLock<std::sync::Mutex<()>> = OnceLock::new();

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::new().expect("failed to create Tokio runtime for tests"))
}

pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    let guard = BLOCK_ON_GUARD.get_or_init(|| std::sync::Mutex::new(()));
    let _lock = guard.lock().unwrap_or_else(|e| e.into_inner());
    runtime().block_on(future)
}

pub const CORE: &str = "http://hl7.org/fhir/StructureDefinition/";
pub const EXAMPLE: &str = "http://example.org/fhir/StructureDefinition/";

pub fn core_url(name: &str) -> String {
    format!("{}{}", CORE, name)
}

pub fn example_url(name: &str) -> String {
    format!("{}{}", EXAMPLE, name)
}

/// Snapshot-style element: id = path, cardinality and types set
pub fn el(path: &str, min: u32, max: &str, types: &[&str]) -> ElementDefinition {
    ElementDefinition {
        id: Some(path.to_string()),
        min: Some(min),
        max: Some(max.parse().expect("valid max")),
        types: (!types.is_empty())
            .then(|| types.iter().map(|t| ElementDefinitionType::new(*t)).collect()),
        ..ElementDefinition::new(path)
    }
}

/// Differential element carrying only a path
pub fn diff(path: &str) -> ElementDefinition {
    ElementDefinition::new(path)
}

/// Differential slice entry with its `path:sliceName` id
pub fn slice(path: &str, name: &str) -> ElementDefinition {
    ElementDefinition {
        id: Some(format!("{}:{}", path, name)),
        slice_name: Some(name.to_string()),
        ..ElementDefinition::new(path)
    }
}

pub fn with_min(mut element: ElementDefinition, min: u32) -> ElementDefinition {
    element.min = Some(min);
    element
}

pub fn with_max(mut element: ElementDefinition, max: Max) -> ElementDefinition {
    element.max = Some(max);
    element
}

fn definition(
    name: &str,
    kind: StructureDefinitionKind,
    base: Option<&str>,
    derivation: Option<TypeDerivationRule>,
    snapshot: Vec<ElementDefinition>,
) -> StructureDefinition {
    let mut sd = StructureDefinition::new(core_url(name), name, kind, name);
    sd.base_definition = base.map(core_url);
    sd.derivation = derivation;
    sd.snapshot = (!snapshot.is_empty()).then(|| Snapshot::new(snapshot));
    sd
}

fn datatype(name: &str, children: &[(&str, u32, &str, &[&str])]) -> StructureDefinition {
    let mut elements = vec![
        el(name, 0, "*", &[]),
        el(&format!("{}.id", name), 0, "1", &["string"]),
        el(&format!("{}.extension", name), 0, "*", &["Extension"]),
    ];
    for (child, min, max, types) in children {
        elements.push(el(&format!("{}.{}", name, child), *min, max, types));
    }
    definition(
        name,
        StructureDefinitionKind::ComplexType,
        Some("Element"),
        Some(TypeDerivationRule::Specialization),
        elements,
    )
}

fn element_definition() -> StructureDefinition {
    let mut sd = definition(
        "Element",
        StructureDefinitionKind::ComplexType,
        None,
        None,
        Vec::new(),
    );
    sd.differential = Some(Differential::new(vec![
        el("Element", 0, "*", &[]),
        el("Element.id", 0, "1", &["string"]),
        el("Element.extension", 0, "*", &["Extension"]),
    ]));
    sd
}

fn resource() -> StructureDefinition {
    definition(
        "Resource",
        StructureDefinitionKind::Resource,
        None,
        None,
        vec![
            el("Resource", 0, "*", &[]),
            el("Resource.id", 0, "1", &["string"]),
            el("Resource.language", 0, "1", &["code"]),
        ],
    )
}

fn domain_resource() -> StructureDefinition {
    definition(
        "DomainResource",
        StructureDefinitionKind::Resource,
        Some("Resource"),
        Some(TypeDerivationRule::Specialization),
        vec![
            el("DomainResource", 0, "*", &[]),
            el("DomainResource.id", 0, "1", &["string"]),
            el("DomainResource.language", 0, "1", &["code"]),
            el("DomainResource.text", 0, "1", &["Narrative"]),
            el("DomainResource.contained", 0, "*", &["Resource"]),
            el("DomainResource.extension", 0, "*", &["Extension"]),
            el("DomainResource.modifierExtension", 0, "*", &["Extension"]),
        ],
    )
}

fn patient() -> StructureDefinition {
    let mut gender = el("Patient.gender", 0, "1", &["code"]);
    gender.binding = Some(strata_models::ElementDefinitionBinding {
        strength: strata_models::BindingStrength::Required,
        description: None,
        value_set: Some("http://hl7.org/fhir/ValueSet/administrative-gender".to_string()),
    });
    gender.is_summary = Some(true);

    definition(
        "Patient",
        StructureDefinitionKind::Resource,
        Some("DomainResource"),
        Some(TypeDerivationRule::Specialization),
        vec![
            el("Patient", 0, "*", &[]),
            el("Patient.id", 0, "1", &["string"]),
            el("Patient.language", 0, "1", &["code"]),
            el("Patient.text", 0, "1", &["Narrative"]),
            el("Patient.contained", 0, "*", &["Resource"]),
            el("Patient.extension", 0, "*", &["Extension"]),
            el("Patient.modifierExtension", 0, "*", &["Extension"]),
            el("Patient.identifier", 0, "*", &["Identifier"]),
            el("Patient.active", 0, "1", &["boolean"]),
            el("Patient.name", 0, "*", &["HumanName"]),
            gender,
            el("Patient.birthDate", 0, "1", &["date"]),
            el("Patient.deceased[x]", 0, "1", &["boolean", "dateTime"]),
            el("Patient.contact", 0, "*", &["BackboneElement"]),
            el("Patient.contact.name", 0, "1", &["HumanName"]),
            el("Patient.contact.gender", 0, "1", &["code"]),
        ],
    )
}

fn observation() -> StructureDefinition {
    definition(
        "Observation",
        StructureDefinitionKind::Resource,
        Some("DomainResource"),
        Some(TypeDerivationRule::Specialization),
        vec![
            el("Observation", 0, "*", &[]),
            el("Observation.id", 0, "1", &["string"]),
            el("Observation.extension", 0, "*", &["Extension"]),
            el("Observation.modifierExtension", 0, "*", &["Extension"]),
            el("Observation.status", 1, "1", &["code"]),
            el("Observation.code", 1, "1", &["CodeableConcept"]),
            el(
                "Observation.value[x]",
                0,
                "1",
                &["Quantity", "CodeableConcept", "string", "boolean"],
            ),
            el("Observation.component", 0, "*", &["BackboneElement"]),
            el("Observation.component.code", 1, "1", &["CodeableConcept"]),
            el("Observation.component.value[x]", 0, "1", &["Quantity", "string"]),
        ],
    )
}

fn extension() -> StructureDefinition {
    definition(
        "Extension",
        StructureDefinitionKind::ComplexType,
        Some("Element"),
        Some(TypeDerivationRule::Specialization),
        vec![
            el("Extension", 0, "*", &[]),
            el("Extension.id", 0, "1", &["string"]),
            el("Extension.extension", 0, "*", &["Extension"]),
            el("Extension.url", 1, "1", &["uri"]),
            el(
                "Extension.value[x]",
                0,
                "1",
                &["boolean", "code", "string", "Coding", "CodeableConcept"],
            ),
        ],
    )
}

/// Element, Resource, DomainResource, Patient, Observation, Extension and a
/// handful of complex datatypes. Element carries only a differential.
pub fn core_definitions() -> Vec<StructureDefinition> {
    vec![
        element_definition(),
        resource(),
        domain_resource(),
        patient(),
        observation(),
        extension(),
        datatype(
            "Identifier",
            &[
                ("use", 0, "1", &["code"]),
                ("system", 0, "1", &["uri"]),
                ("value", 0, "1", &["string"]),
            ],
        ),
        datatype(
            "HumanName",
            &[
                ("use", 0, "1", &["code"]),
                ("family", 0, "1", &["string"]),
                ("given", 0, "*", &["string"]),
            ],
        ),
        datatype(
            "Quantity",
            &[
                ("value", 0, "1", &["decimal"]),
                ("unit", 0, "1", &["string"]),
                ("system", 0, "1", &["uri"]),
                ("code", 0, "1", &["code"]),
            ],
        ),
        datatype(
            "CodeableConcept",
            &[("coding", 0, "*", &["Coding"]), ("text", 0, "1", &["string"])],
        ),
        datatype(
            "Coding",
            &[
                ("system", 0, "1", &["uri"]),
                ("code", 0, "1", &["code"]),
                ("display", 0, "1", &["string"]),
            ],
        ),
    ]
}

pub fn core_loader() -> Arc<InMemoryLoader> {
    Arc::new(InMemoryLoader::from_definitions(core_definitions()))
}

pub fn core_definition(name: &str) -> StructureDefinition {
    core_definitions()
        .into_iter()
        .find(|sd| sd.name == name)
        .expect("core definition exists")
}

/// Constraint profile on `base_url` with the given differential and no snapshot
pub fn profile(
    name: &str,
    base_url: &str,
    type_: &str,
    differential: Vec<ElementDefinition>,
) -> StructureDefinition {
    let mut sd = StructureDefinition::new(
        example_url(name),
        name,
        StructureDefinitionKind::Resource,
        type_,
    );
    sd.base_definition = Some(base_url.to_string());
    sd.derivation = Some(TypeDerivationRule::Constraint);
    sd.differential = Some(Differential::new(differential));
    sd
}

pub fn find<'a>(sd: &'a StructureDefinition, id: &str) -> &'a ElementDefinition {
    sd.snapshot_elements()
        .iter()
        .find(|e| e.id.as_deref() == Some(id))
        .unwrap_or_else(|| panic!("no element with id {}", id))
}

pub fn snapshot_ids(sd: &StructureDefinition) -> Vec<&str> {
    sd.snapshot_elements()
        .iter()
        .filter_map(|e| e.id.as_deref())
        .collect()
}
