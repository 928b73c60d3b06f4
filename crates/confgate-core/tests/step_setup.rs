//! End-to-end build setup: resolve configuration, then prepare steps.

use confgate_core::{
    prepare_steps, ImageSource, MemoryTree, Policy, PrivilegeVerdict, Resolver, SetupOptions,
    StepKind, StepSpec, DEFAULT_CLONE_IMAGE,
};

fn policy() -> &'static Policy {
    Policy::builtin()
}

#[test]
fn test_default_clone_step_is_never_privileged() {
    let prepared = prepare_steps(Vec::new(), SetupOptions::default(), policy()).unwrap();
    assert_eq!(prepared.len(), 1);

    let clone = &prepared[0];
    assert_eq!(clone.kind, StepKind::Clone);
    assert_eq!(clone.image, DEFAULT_CLONE_IMAGE);
    assert_eq!(clone.image_source, ImageSource::DefaultClone);
    assert!(!clone.privilege.is_elevated());
    assert!(!policy().is_privileged(&clone.image));
}

#[test]
fn test_clone_step_requesting_privileges_is_denied() {
    let steps = vec![StepSpec::new("clone", StepKind::Clone, None).requesting_privileges()];
    let prepared = prepare_steps(steps, SetupOptions::default(), policy()).unwrap();
    assert_eq!(prepared[0].image, DEFAULT_CLONE_IMAGE);
    assert!(matches!(prepared[0].privilege, PrivilegeVerdict::Denied { .. }));
}

#[test]
fn test_clone_step_using_trusted_image_still_sandboxed() {
    let steps = vec![StepSpec::new("clone", StepKind::Clone, Some("plugins/docker"))];
    let prepared = prepare_steps(steps, SetupOptions::default(), policy()).unwrap();
    assert_eq!(prepared[0].privilege, PrivilegeVerdict::Sandboxed);
}

#[test]
fn test_mixed_pipeline_verdicts() {
    let steps = vec![
        StepSpec::new("test", StepKind::Commands, Some("rust:1.80")),
        StepSpec::new("publish", StepKind::Plugin, Some("docker.io/plugins/docker:20")),
        StepSpec::new("buildx", StepKind::Plugin, Some("woodpeckerci/plugin-docker-buildx")),
        StepSpec::new("sneaky", StepKind::Commands, Some("plugins/docker")).requesting_privileges(),
        StepSpec::new("dind", StepKind::Plugin, Some("docker:dind")).requesting_privileges(),
        StepSpec::new("notify", StepKind::Plugin, Some("plugins/slack")),
    ];
    let prepared = prepare_steps(steps, SetupOptions::default(), policy()).unwrap();

    let verdicts: Vec<(&str, bool)> = prepared
        .iter()
        .map(|s| (s.name.as_str(), s.privilege.is_elevated()))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            ("clone", false),
            ("test", false),
            ("publish", true),
            ("buildx", true),
            ("sneaky", false),
            ("dind", false),
            ("notify", false),
        ]
    );

    let denied: Vec<&str> = prepared
        .iter()
        .filter(|s| matches!(s.privilege, PrivilegeVerdict::Denied { .. }))
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(denied, vec!["sneaky", "dind"]);
}

#[test]
fn test_custom_policy_clone_image() {
    let custom = Policy::new(
        [".ci.yml"],
        ["plugins/docker"],
        "registry.internal:5000/ci/git:2",
    )
    .unwrap();
    let prepared = prepare_steps(Vec::new(), SetupOptions::default(), &custom).unwrap();
    assert_eq!(prepared[0].image, "registry.internal:5000/ci/git:2");
}

#[tokio::test]
async fn test_resolve_then_prepare() {
    let tree = MemoryTree::new()
        .with_file(".woodpecker/build.yml", "steps: [build]")
        .with_file(".woodpecker/release.yml", "steps: [publish]");
    let loaded = Resolver::new(policy()).load(&tree).await.unwrap();
    assert_eq!(loaded.files.len(), 2);

    // Stand-in for the external pipeline parser.
    let steps: Vec<StepSpec> = loaded
        .files
        .iter()
        .map(|file| {
            let stem = file
                .path
                .rsplit('/')
                .next()
                .and_then(|name| name.strip_suffix(".yml"))
                .unwrap_or_default();
            StepSpec::new(stem, StepKind::Plugin, Some("plugins/docker"))
        })
        .collect();

    let prepared = prepare_steps(steps, SetupOptions::default(), policy()).unwrap();
    let names: Vec<&str> = prepared.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["clone", "build", "release"]);
    assert!(prepared[1].privilege.is_elevated());
}
