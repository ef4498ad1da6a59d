// Standard-resource arbitration and destination selection across the
// registry.
use tocsin::config::ResourceConfig;
use tocsin::context::TestContext;
use tocsin::model::event::EventCategory;
use tocsin::resource::{Resource, ResourceId, StorageKind, TypeMask};
use tocsin::resources::{DestOptions, ResourcePrompter, Resources};

fn make(ctx: &TestContext, id: ResourceId, name: &str, types: TypeMask, standard: TypeMask) -> Resource {
    let config = ResourceConfig {
        id,
        name: name.into(),
        config_name: name.to_lowercase(),
        kind: StorageKind::File,
        path: format!("{}.ics", name.to_lowercase()),
        alarm_types: types,
        standard_types: standard,
        read_only: false,
        keep_format: false,
        colour: None,
    };
    let path = config.resolve_path(ctx).unwrap();
    Resource::new(config, path)
}

#[test]
fn at_most_one_standard_per_type() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    reg.add_resource(make(&ctx, 1, "A", TypeMask::active(), TypeMask::active()));
    reg.add_resource(make(&ctx, 2, "B", TypeMask::active(), TypeMask::default()));
    reg.load_all(false);

    // Scenario: B becomes standard; A loses the flag.
    reg.set_standard(2, EventCategory::Active, true).unwrap();
    assert!(!reg.is_standard(1, EventCategory::Active));
    assert!(reg.is_standard(2, EventCategory::Active));

    // Setting the same flag twice is idempotent.
    reg.set_standard(2, EventCategory::Active, true).unwrap();
    assert!(reg.is_standard(2, EventCategory::Active));

    // Clearing does not promote anyone else.
    reg.set_standard(2, EventCategory::Active, false).unwrap();
    assert!(reg.get_standard(EventCategory::Active, false).is_none());
}

#[test]
fn standard_requires_enabled_and_writable() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    let mut ro = make(&ctx, 1, "RO", TypeMask::active(), TypeMask::default());
    ro.set_read_only(true);
    reg.add_resource(ro);
    reg.add_resource(make(&ctx, 2, "Arch", TypeMask::archived(), TypeMask::default()));
    reg.load_all(false);

    assert!(reg.set_standard(1, EventCategory::Active, true).is_err());
    // Resource 2 is not enabled for Active at all.
    assert!(reg.set_standard(2, EventCategory::Active, true).is_err());
}

#[test]
fn sole_archived_resource_is_adopted_as_standard() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    reg.add_resource(make(&ctx, 1, "Act", TypeMask::active(), TypeMask::default()));
    reg.add_resource(make(&ctx, 2, "Arch", TypeMask::archived(), TypeMask::default()));
    reg.load_all(false);

    let got = reg.get_standard(EventCategory::Archived, true);
    assert_eq!(got, Some(2));
    // The adoption is recorded on the resource.
    assert!(reg.is_standard(2, EventCategory::Archived));
}

#[test]
fn enabling_twice_equals_enabling_once() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    reg.add_resource(make(&ctx, 1, "A", TypeMask::active(), TypeMask::active()));
    reg.load_all(false);

    let res = reg.resource_mut(1).unwrap();
    res.set_enabled(EventCategory::Archived, true);
    let after_once = res.alarm_types();
    res.set_enabled(EventCategory::Archived, true);
    assert_eq!(res.alarm_types(), after_once);
}

struct PickFirst;
impl ResourcePrompter for PickFirst {
    fn choose(
        &self,
        _cat: EventCategory,
        candidates: &[(ResourceId, String)],
    ) -> Option<ResourceId> {
        candidates.first().map(|(id, _)| *id)
    }
}

struct AlwaysCancel;
impl ResourcePrompter for AlwaysCancel {
    fn choose(&self, _cat: EventCategory, _c: &[(ResourceId, String)]) -> Option<ResourceId> {
        None
    }
}

#[test]
fn destination_prompts_when_no_standard_is_configured() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    reg.add_resource(make(&ctx, 1, "A", TypeMask::active(), TypeMask::default()));
    reg.add_resource(make(&ctx, 2, "B", TypeMask::active(), TypeMask::default()));
    reg.load_all(false);

    let mut cancelled = false;
    let dest = reg
        .destination(
            EventCategory::Active,
            Some(&PickFirst),
            DestOptions::default(),
            &mut cancelled,
        )
        .unwrap();
    assert_eq!(dest, 1);
    assert!(!cancelled);

    let err = reg.destination(
        EventCategory::Active,
        Some(&AlwaysCancel),
        DestOptions::default(),
        &mut cancelled,
    );
    assert!(err.is_err());
    assert!(cancelled);
}

#[test]
fn destination_fails_without_writable_resource() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    let mut ro = make(&ctx, 1, "RO", TypeMask::active(), TypeMask::active());
    ro.set_read_only(true);
    reg.add_resource(ro);
    reg.load_all(false);

    let mut cancelled = false;
    assert!(reg
        .destination(
            EventCategory::Active,
            None,
            DestOptions::default(),
            &mut cancelled
        )
        .is_err());
}

#[test]
fn use_only_resource_short_circuits() {
    let ctx = TestContext::new();
    let mut reg = Resources::new();
    reg.add_resource(make(&ctx, 9, "Solo", TypeMask::active(), TypeMask::default()));
    reg.load_all(false);

    let mut cancelled = false;
    let dest = reg
        .destination(
            EventCategory::Active,
            None,
            DestOptions {
                use_only_resource: true,
                ..Default::default()
            },
            &mut cancelled,
        )
        .unwrap();
    assert_eq!(dest, 9);
}
