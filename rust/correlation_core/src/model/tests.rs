//! Tests for the correlation model and candidate overlays.

use std::sync::Arc;

use proptest::prelude::*;

use crate::cache::ActiveSignal;
use crate::config::{RoleTypeDefinition, SystemConfiguration};
use crate::model::*;
use crate::store::memory::InMemoryStore;
use crate::store::ObjectStore;
use crate::types::{ApplicationRecord, ApplicationRef, ProfileRecord, RoleAssignment, RoleRecord, RoleRef};

// ============================================================================
// Helper builders
// ============================================================================

/// business: assignable + detectable
/// it: detectable only
/// org: assignable only
/// entitlement: detectable, but only when assigned
/// birthright: RapidSetup birthright type
fn role_types() -> Vec<RoleTypeDefinition> {
    let it = RoleTypeDefinition {
        no_auto_assignment: true,
        ..RoleTypeDefinition::new("it")
    };
    let org = RoleTypeDefinition {
        no_detection: true,
        ..RoleTypeDefinition::new("org")
    };
    let entitlement = RoleTypeDefinition {
        no_auto_assignment: true,
        no_detection_unless_assigned: true,
        ..RoleTypeDefinition::new("entitlement")
    };
    let birthright = RoleTypeDefinition {
        no_auto_assignment: true,
        ..RoleTypeDefinition::new("birthright")
    };
    vec![RoleTypeDefinition::new("business"), it, org, entitlement, birthright]
}

fn store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.set_role_types(role_types());
    store.set_system_configuration(SystemConfiguration {
        birthright_role_types: vec!["birthright".to_string()],
        ..Default::default()
    });
    store
}

fn role(id: &str, ty: Option<&str>) -> RoleRecord {
    RoleRecord {
        created: Some(1),
        ..RoleRecord::new(id, &id.to_uppercase(), ty)
    }
}

fn rref(id: &str) -> RoleRef {
    RoleRef::new(id, &id.to_uppercase())
}

fn inherits(mut record: RoleRecord, supers: &[&str]) -> RoleRecord {
    record.inheritance = supers.iter().map(|s| rref(s)).collect();
    record
}

fn build(store: &InMemoryStore) -> CorrelationModel {
    CorrelationModel::prepare(store, &ActiveSignal::new()).unwrap()
}

fn names(roles: &[Arc<CorrelationRole>]) -> Vec<String> {
    let mut names: Vec<String> = roles.iter().map(|r| r.name().to_string()).collect();
    names.sort();
    names
}

fn ordered_names(roles: &[Arc<CorrelationRole>]) -> Vec<String> {
    roles.iter().map(|r| r.name().to_string()).collect()
}

// ============================================================================
// Hierarchy
// ============================================================================

#[test]
fn links_supers_and_subs() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("mid", Some("business")), &["root"]));
    store.save_role(inherits(role("leaf", Some("business")), &["mid"]));

    let model = build(&store);
    assert_eq!(model.size(), 3);

    let mid = model.role("mid").unwrap();
    assert_eq!(names(&mid.super_roles(None)), vec!["ROOT"]);
    assert_eq!(names(&mid.sub_roles(None)), vec!["LEAF"]);
    assert!(model.role("root").unwrap().super_roles(None).is_empty());

    for role in model.all_roles() {
        assert_eq!(role.hierarchy_status(), HierarchyStatus::Built);
    }
}

#[test]
fn hierarchy_build_is_idempotent() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("leaf", Some("business")), &["root"]));

    let model = build(&store);
    let leaf = model.role("leaf").unwrap();
    let record = store.role_by_id("leaf").unwrap().unwrap();

    // Already built: no new edges either way.
    let again = model.resolve_role(&store, &record).unwrap();
    assert!(Arc::ptr_eq(&leaf, &again));
    assert_eq!(leaf.super_roles(None).len(), 1);
    assert_eq!(model.role("root").unwrap().sub_roles(None).len(), 1);
}

#[test]
fn missing_super_is_skipped() {
    let store = store();
    store.save_role(inherits(role("leaf", Some("business")), &["ghost"]));

    let model = build(&store);
    let leaf = model.role("leaf").unwrap();
    assert!(leaf.super_roles(None).is_empty());
    assert_eq!(leaf.hierarchy_status(), HierarchyStatus::Built);
    assert!(leaf.is_least_specific_assignable());
}

#[test]
fn on_demand_role_is_linked() {
    let store = store();
    store.save_role(role("root", Some("business")));
    let model = build(&store);

    let late = inherits(role("late", Some("business")), &["root"]);
    store.save_role(late.clone());

    let added = model.resolve_role(&store, &late).unwrap();
    assert_eq!(model.size(), 2);
    assert_eq!(names(&added.super_roles(None)), vec!["ROOT"]);
    assert_eq!(names(&model.role("root").unwrap().sub_roles(None)), vec!["LATE"]);

    // Second add returns the same instance.
    let again = model.resolve_role(&store, &late).unwrap();
    assert!(Arc::ptr_eq(&added, &again));
}

#[test]
fn on_demand_role_pulls_in_unknown_supers() {
    let store = store();
    let model = build(&store);

    store.save_role(role("top", Some("business")));
    store.save_role(inherits(role("middle", Some("business")), &["top"]));
    let bottom = inherits(role("bottom", Some("business")), &["middle"]);
    store.save_role(bottom.clone());

    let bottom = model.resolve_role(&store, &bottom).unwrap();
    assert_eq!(model.size(), 3);
    let middle = model.role("middle").unwrap();
    assert_eq!(middle.hierarchy_status(), HierarchyStatus::Built);
    assert_eq!(names(&middle.super_roles(None)), vec!["TOP"]);
    assert_eq!(names(&bottom.super_roles(None)), vec!["MIDDLE"]);
}

#[test]
fn unsaved_record_cannot_be_added() {
    let store = store();
    let model = build(&store);
    let draft = RoleRecord {
        name: "Draft".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        model.resolve_role(&store, &draft),
        Err(crate::error::CorrelationError::UnsavedRole(_))
    ));
}

// ============================================================================
// Role classification
// ============================================================================

#[test]
fn flags_follow_role_type() {
    let store = store();
    store.save_role(role("biz", Some("business")));
    store.save_role(role("it", Some("it")));
    store.save_role(role("ent", Some("entitlement")));
    store.save_role(role("plain", None));
    store.save_role(role("odd", Some("unknown")));
    store.save_role(role("br", Some("birthright")));

    let model = build(&store);
    let biz = model.role("biz").unwrap();
    assert!(biz.is_assignable() && biz.is_detectable() && !biz.is_birthright());

    let it = model.role("it").unwrap();
    assert!(!it.is_assignable() && it.is_detectable());

    let ent = model.role("ent").unwrap();
    assert!(ent.is_detectable() && ent.is_assigned_detectable());

    // No usable type: detectable only.
    for id in ["plain", "odd"] {
        let r = model.role(id).unwrap();
        assert!(r.is_detectable());
        assert!(!r.is_assignable() && !r.is_assigned_detectable() && !r.is_birthright());
    }

    assert!(model.role("br").unwrap().is_birthright());
    assert_eq!(names(&model.birthright_roles(None)), vec!["BR"]);
}

#[test]
fn least_specific_chain_ending_without_trait() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("mid", Some("business")), &["root"]));
    store.save_role(inherits(role("leaf", Some("it")), &["mid"]));

    let model = build(&store);
    assert_eq!(names(&model.assignable_roles(None)), vec!["ROOT"]);
    // MID is shadowed by ROOT, which leaves nothing shadowing LEAF.
    assert_eq!(names(&model.detectable_roles(None)), vec!["LEAF", "ROOT"]);
}

#[test]
fn least_specific_skips_over_missing_trait() {
    let store = store();
    // ROOT assignable, MID not, LEAF assignable again.
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("mid", Some("it")), &["root"]));
    store.save_role(inherits(role("leaf", Some("business")), &["mid"]));

    let model = build(&store);
    assert_eq!(names(&model.assignable_roles(None)), vec!["LEAF", "ROOT"]);
    assert_eq!(names(&model.detectable_roles(None)), vec!["LEAF", "ROOT"]);
}

#[test]
fn least_specific_detectable_below_undetectable_root() {
    let store = store();
    store.save_role(role("root", Some("org")));
    store.save_role(inherits(role("mid", Some("org")), &["root"]));
    store.save_role(inherits(role("leaf", Some("business")), &["mid"]));

    let model = build(&store);
    assert_eq!(names(&model.assignable_roles(None)), vec!["LEAF", "ROOT"]);
    assert_eq!(names(&model.detectable_roles(None)), vec!["LEAF"]);
}

#[test]
fn assigned_only_roles_are_not_least_specific_detectable() {
    let store = store();
    store.save_role(role("ent", Some("entitlement")));
    let model = build(&store);
    assert!(model.detectable_roles(None).is_empty());
}

#[test]
fn cyclic_inheritance_terminates() {
    let store = store();
    store.save_role(inherits(role("a", Some("business")), &["b"]));
    store.save_role(inherits(role("b", Some("business")), &["a"]));

    let model = build(&store);
    let a = model.role("a").unwrap();
    assert_eq!(names(&a.super_roles(None)), vec!["B"]);
    assert_eq!(names(&a.sub_roles(None)), vec!["B"]);
    // Each shadows the other.
    assert!(model.assignable_roles(None).is_empty());
}

// ============================================================================
// Required / permitted closure
// ============================================================================

#[test]
fn closure_follows_inheritance_then_requirements_then_permits() {
    let store = store();
    store.save_role(role("r1", Some("it")));
    store.save_role(role("p1", Some("it")));
    store.save_role(role("r2", Some("it")));
    store.save_role(RoleRecord {
        requirements: vec![rref("r1")],
        permits: vec![rref("p1")],
        ..role("root", Some("business"))
    });
    store.save_role(RoleRecord {
        requirements: vec![rref("r2")],
        ..inherits(role("leaf", Some("business")), &["root"])
    });

    let model = build(&store);
    let closure = model.required_and_permitted_for_role_id(&store, "leaf").unwrap();
    assert_eq!(ordered_names(&closure), vec!["R1", "P1", "R2"]);
}

#[test]
fn closure_is_memoised() {
    let store = store();
    store.save_role(role("r1", Some("it")));
    store.save_role(RoleRecord {
        requirements: vec![rref("r1")],
        ..role("root", Some("business"))
    });

    let model = build(&store);
    let first = model.required_and_permitted_for_role_id(&store, "root").unwrap();
    let fetches = store.stats().role_fetches;
    let second = model.required_and_permitted_for_role_id(&store, "root").unwrap();
    assert_eq!(store.stats().role_fetches, fetches);
    assert_eq!(ordered_names(&first), ordered_names(&second));

    let root = model.role("root").unwrap();
    let ids = root.required_or_permitted_ids(&store, &model, None).unwrap();
    assert!(ids.contains("r1"));
    assert_eq!(ids.len(), 1);
}

#[test]
fn closure_skips_untyped_and_missing_roles() {
    let store = store();
    store.save_role(role("plain", None));
    store.save_role(role("odd", Some("unknown")));
    store.save_role(role("ok", Some("it")));
    store.save_role(RoleRecord {
        requirements: vec![rref("plain"), rref("ghost"), rref("ok")],
        permits: vec![rref("odd")],
        ..role("root", Some("business"))
    });

    let model = build(&store);
    let closure = model.required_and_permitted_for_role_id(&store, "root").unwrap();
    assert_eq!(ordered_names(&closure), vec!["OK"]);
}

#[test]
fn requirement_cycle_excludes_root() {
    let store = store();
    store.save_role(RoleRecord {
        requirements: vec![rref("b")],
        ..role("a", Some("business"))
    });
    store.save_role(RoleRecord {
        requirements: vec![rref("a")],
        ..role("b", Some("business"))
    });

    let model = build(&store);
    let closure = model.required_and_permitted_for_role_id(&store, "a").unwrap();
    assert_eq!(ordered_names(&closure), vec!["B"]);
    let closure = model.required_and_permitted_for_role_id(&store, "b").unwrap();
    assert_eq!(ordered_names(&closure), vec!["A"]);
}

#[test]
fn closure_members_are_distinct() {
    let store = store();
    store.save_role(role("shared", Some("it")));
    store.save_role(RoleRecord {
        requirements: vec![rref("shared")],
        ..role("root", Some("business"))
    });
    store.save_role(RoleRecord {
        requirements: vec![rref("shared")],
        permits: vec![rref("shared")],
        ..inherits(role("leaf", Some("business")), &["root"])
    });

    let model = build(&store);
    let closure = model.required_and_permitted_for_role_id(&store, "leaf").unwrap();
    assert_eq!(ordered_names(&closure), vec!["SHARED"]);
}

#[test]
fn closure_for_unknown_role_is_empty() {
    let store = store();
    let model = build(&store);
    assert!(model.required_and_permitted_for_role_id(&store, "nope").unwrap().is_empty());
}

#[test]
fn closure_adds_roles_created_after_the_build() {
    let store = store();
    store.save_role(role("root", Some("business")));
    let model = build(&store);

    store.save_role(role("new", Some("it")));
    let mut root = store.role_by_id("root").unwrap().unwrap();
    root.requirements = vec![rref("new")];
    store.save_role(root);

    let closure = model.required_and_permitted_for_role_id(&store, "root").unwrap();
    assert_eq!(ordered_names(&closure), vec!["NEW"]);
    assert!(model.role("new").is_some());
}

// ============================================================================
// Assignment queries
// ============================================================================

#[test]
fn detectable_roles_for_assignment() {
    let store = store();
    store.save_role(role("employee", Some("business")));
    store.save_role(role("vpn", Some("it")));
    store.save_role(role("admin", Some("entitlement")));
    store.save_role(role("dept", Some("org")));
    store.save_role(RoleRecord {
        requirements: vec![rref("vpn")],
        permits: vec![rref("admin"), rref("dept")],
        ..inherits(role("manager", Some("business")), &["employee"])
    });

    let model = build(&store);
    let assignment = RoleAssignment::new(Some("manager"), "MANAGER");
    let roles = model
        .detectable_roles_for_assignment(&store, &assignment, None)
        .unwrap();
    assert_eq!(ordered_names(&roles), vec!["VPN", "ADMIN", "EMPLOYEE", "MANAGER"]);

    // Name-only assignments resolve too.
    let by_name = RoleAssignment::new(None, "MANAGER");
    let roles = model.detectable_roles_for_assignment(&store, &by_name, None).unwrap();
    assert_eq!(roles.len(), 4);

    let unknown = RoleAssignment::new(Some("x"), "Nobody");
    assert!(model
        .detectable_roles_for_assignment(&store, &unknown, None)
        .unwrap()
        .is_empty());
}

#[test]
fn inherited_detectables_skip_undetectable_ancestors() {
    let store = store();
    store.save_role(role("top", Some("business")));
    store.save_role(inherits(role("dept", Some("org")), &["top"]));
    let leaf = inherits(role("leaf", Some("it")), &["dept"]);
    store.save_role(leaf.clone());

    let model = build(&store);
    let roles = model.inherited_detectables(&store, &leaf, None).unwrap();
    assert_eq!(ordered_names(&roles), vec!["TOP", "LEAF"]);
}

#[test]
fn correlation_roles_load_missing_and_dedupe() {
    let store = store();
    store.save_role(role("known", Some("business")));
    let model = build(&store);

    let late = role("late", Some("business"));
    store.save_role(late.clone());
    let known = store.role_by_id("known").unwrap().unwrap();

    let roles = model
        .correlation_roles(&store, &[known.clone(), late, known])
        .unwrap();
    assert_eq!(ordered_names(&roles), vec!["KNOWN", "LATE"]);
    assert_eq!(model.size(), 2);
}

// ============================================================================
// Profiles and applications
// ============================================================================

#[test]
fn profiles_carry_application_info() {
    let store = store();
    store.save_application(ApplicationRecord {
        id: "app1".to_string(),
        name: "LDAP".to_string(),
        profile_class: Some("Directory".to_string()),
    });
    let profile = |app: Option<&str>| ProfileRecord {
        application: app.map(|id| ApplicationRef { id: id.to_string() }),
        ..Default::default()
    };
    store.save_role(RoleRecord {
        profiles: vec![profile(Some("app1")), profile(Some("gone")), profile(None)],
        or_profiles: true,
        ..role("it1", Some("it"))
    });

    let model = build(&store);
    let it1 = model.role("it1").unwrap();
    assert!(it1.is_or_profiles());

    let profiles = it1.correlation_profiles();
    assert_eq!(profiles.len(), 3);
    assert_eq!(profiles[0].app_name(), Some("LDAP"));
    assert_eq!(profiles[0].app_profile_class(), Some("Directory"));
    assert_eq!(profiles[1].app_id(), "gone");
    assert_eq!(profiles[1].app_name(), None);
    assert_eq!(profiles[2].app_id(), UNKNOWN_APPLICATION);
    assert_eq!(profiles[2].app_name(), Some(UNKNOWN_APPLICATION));
}

#[test]
fn application_info_is_cached_per_model() {
    let store = store();
    store.save_application(ApplicationRecord {
        id: "app1".to_string(),
        name: "LDAP".to_string(),
        profile_class: None,
    });
    let model = build(&store);

    let first = model.application_info(&store, "app1").unwrap();
    let searches = store.stats().searches;
    let second = model.application_info(&store, "app1").unwrap();
    assert_eq!(first, second);
    assert_eq!(store.stats().searches, searches);
}

// ============================================================================
// Staleness
// ============================================================================

#[test]
fn staleness_checks() {
    let store = store();
    store.save_role(role("a", Some("business")));
    store.save_role(RoleRecord {
        created: Some(5),
        ..role("b", Some("business"))
    });
    let model = build(&store);
    assert!(!model.is_stale(&store, false).unwrap());
    assert!(model.is_stale(&store, true).unwrap());

    // Removing an older role keeps the date but changes the count.
    store.remove_role("a");
    assert!(model.is_stale(&store, false).unwrap());
    store.save_role(role("a", Some("business")));
    assert!(!model.is_stale(&store, false).unwrap());

    let mut b = store.role_by_id("b").unwrap().unwrap();
    b.modified = Some(10);
    store.save_role(b.clone());
    assert!(model.is_stale(&store, false).unwrap());
    b.modified = None;
    store.save_role(b);
    assert!(!model.is_stale(&store, false).unwrap());

    let mut types = role_types();
    types[0].no_detection = true;
    store.set_role_types(types);
    assert!(model.is_stale(&store, false).unwrap());
}

#[test]
fn fingerprint_is_recorded() {
    let store = store();
    store.save_role(RoleRecord {
        created: Some(7),
        modified: Some(12),
        ..role("a", Some("business"))
    });
    let model = build(&store);
    assert_eq!(model.cache_last_mod(), Some(12));
    assert_eq!(model.cache_num_roles(), 1);
    assert_eq!(model.role_types().len(), role_types().len());
}

// ============================================================================
// Candidates
// ============================================================================

fn draft(name: &str, ty: Option<&str>, supers: &[&str]) -> RoleRecord {
    RoleRecord {
        id: None,
        name: name.to_string(),
        role_type: ty.map(str::to_string),
        inheritance: supers.iter().map(|s| rref(s)).collect(),
        ..Default::default()
    }
}

#[test]
fn candidates_do_not_mutate_the_model() {
    let store = store();
    store.save_role(role("root", Some("business")));
    let model = Arc::new(build(&store));

    let candidates = Candidates::new(
        &store,
        Arc::clone(&model),
        vec![draft("New", Some("business"), &["root", "ghost"])],
    )
    .unwrap();

    assert_eq!(model.size(), 1);
    let root = model.role("root").unwrap();
    assert!(root.sub_roles(None).is_empty());
    assert_eq!(names(&root.sub_roles(Some(&candidates))), vec!["New"]);

    let new = candidates.candidate("New").unwrap();
    assert_eq!(new.hierarchy_status(), HierarchyStatus::Built);
    assert_eq!(names(&new.super_roles(None)), vec!["ROOT"]);
}

#[test]
fn candidate_supersedes_model_role_by_name() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("leaf", Some("business")), &["root"]));
    let model = Arc::new(build(&store));
    assert_eq!(names(&model.assignable_roles(None)), vec!["ROOT"]);

    // Edited LEAF no longer inherits ROOT.
    let mut edited = store.role_by_id("leaf").unwrap().unwrap();
    edited.inheritance.clear();
    let candidates = Candidates::new(&store, Arc::clone(&model), vec![edited.clone()]).unwrap();

    assert_eq!(names(&model.assignable_roles(Some(&candidates))), vec!["LEAF", "ROOT"]);
    assert_eq!(names(&model.assignable_roles(None)), vec!["ROOT"]);

    let root = model.role("root").unwrap();
    assert!(root.sub_roles(Some(&candidates)).is_empty());
    assert_eq!(names(&root.sub_roles(None)), vec!["LEAF"]);

    let resolved = model.correlation_role(&edited, Some(&candidates)).unwrap();
    assert!(Arc::ptr_eq(&resolved, candidates.candidate("LEAF").unwrap()));
    let actual = model.correlation_role(&edited, None).unwrap();
    assert!(Arc::ptr_eq(&actual, &model.role("leaf").unwrap()));
}

#[test]
fn candidate_supers_drive_least_specific() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(role("other", Some("business")));
    let model = Arc::new(build(&store));

    let candidates = Candidates::new(
        &store,
        Arc::clone(&model),
        vec![
            draft("Below", Some("business"), &["root"]),
            draft("Alone", Some("business"), &[]),
        ],
    )
    .unwrap();
    assert_eq!(
        names(&model.assignable_roles(Some(&candidates))),
        vec!["Alone", "OTHER", "ROOT"]
    );
    assert!(model.birthright_roles(Some(&candidates)).is_empty());
    assert_eq!(model.detectable_roles(Some(&candidates)).len(), 3);
}

#[test]
fn candidate_closure_uses_its_own_record() {
    let store = store();
    store.save_role(role("vpn", Some("it")));
    store.save_role(role("mail", Some("it")));
    let model = Arc::new(build(&store));

    let mut edited_mail = store.role_by_id("mail").unwrap().unwrap();
    edited_mail.role_type = Some("business".to_string());
    let mut proposed = draft("Proposed", Some("business"), &[]);
    proposed.requirements = vec![rref("vpn"), rref("mail")];

    let candidates =
        Candidates::new(&store, Arc::clone(&model), vec![proposed, edited_mail]).unwrap();
    let proposed = candidates.candidate("Proposed").unwrap();

    let closure = proposed
        .required_and_permitted(&store, &model, Some(&candidates))
        .unwrap();
    assert_eq!(ordered_names(&closure), vec!["VPN", "MAIL"]);
    // MAIL is the candidate version.
    assert!(Arc::ptr_eq(&closure[1], candidates.candidate("MAIL").unwrap()));
    assert!(closure[1].is_assignable());

    let fresh = model
        .fresh_role(&store, proposed, Some(&candidates))
        .unwrap()
        .unwrap();
    assert_eq!(fresh.requirements.len(), 2);
    let vpn = model.role("vpn").unwrap();
    assert_eq!(model.fresh_role(&store, &vpn, None).unwrap().unwrap().name, "VPN");
}

#[test]
fn duplicate_candidate_names_last_wins() {
    let store = store();
    let model = Arc::new(build(&store));
    let candidates = Candidates::new(
        &store,
        Arc::clone(&model),
        vec![draft("Dup", Some("it"), &[]), draft("Dup", Some("business"), &[])],
    )
    .unwrap();

    assert!(candidates.candidate("Dup").unwrap().is_assignable());
    assert_eq!(
        candidates.full_candidate("Dup").unwrap().role_type.as_deref(),
        Some("business")
    );
    assert_eq!(names(&model.detectable_roles(Some(&candidates))), vec!["Dup"]);
}

#[test]
fn candidate_losing_trait_surfaces_real_child() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("leaf", Some("business")), &["root"]));
    let model = Arc::new(build(&store));
    assert_eq!(names(&model.assignable_roles(None)), vec!["ROOT"]);

    let mut retyped = store.role_by_id("root").unwrap().unwrap();
    retyped.role_type = Some("it".to_string());
    let candidates = Candidates::new(&store, Arc::clone(&model), vec![retyped]).unwrap();

    assert_eq!(names(&model.assignable_roles(Some(&candidates))), vec!["LEAF"]);
    // Still detectable, so ROOT keeps shadowing LEAF there.
    assert_eq!(names(&model.detectable_roles(Some(&candidates))), vec!["ROOT"]);
    let leaf = model.role("leaf").unwrap();
    assert!(leaf.is_least_specific(LeastSpecificCondition::Assignable, Some(&candidates)));
    assert!(!leaf.is_least_specific_assignable());
}

#[test]
fn candidate_gaining_trait_shadows_real_child() {
    let store = store();
    store.save_role(role("root", Some("it")));
    store.save_role(inherits(role("leaf", Some("business")), &["root"]));
    let model = Arc::new(build(&store));
    assert_eq!(names(&model.assignable_roles(None)), vec!["LEAF"]);

    let mut retyped = store.role_by_id("root").unwrap().unwrap();
    retyped.role_type = Some("business".to_string());
    let candidates = Candidates::new(&store, Arc::clone(&model), vec![retyped]).unwrap();

    let assignables = model.assignable_roles(Some(&candidates));
    assert_eq!(names(&assignables), vec!["ROOT"]);
    assert!(Arc::ptr_eq(&assignables[0], candidates.candidate("ROOT").unwrap()));
    assert_eq!(names(&model.assignable_roles(None)), vec!["LEAF"]);
}

#[test]
fn retyped_candidate_keeps_real_subs() {
    let store = store();
    store.save_role(role("root", Some("business")));
    store.save_role(inherits(role("leaf", Some("business")), &["root"]));
    let model = Arc::new(build(&store));

    let mut retyped = store.role_by_id("root").unwrap().unwrap();
    retyped.role_type = Some("it".to_string());
    let candidates = Candidates::new(&store, Arc::clone(&model), vec![retyped]).unwrap();

    let root = model.role("root").unwrap();
    assert_eq!(names(&root.sub_roles(None)), vec!["LEAF"]);
    assert_eq!(names(&root.sub_roles(Some(&candidates))), vec!["LEAF"]);

    let candidate = candidates.candidate("ROOT").unwrap();
    assert_eq!(names(&candidate.sub_roles(Some(&candidates))), vec!["LEAF"]);
    assert_eq!(names(&candidates.sub_roles(candidate)), vec!["LEAF"]);
}

#[test]
fn candidate_ids_do_not_stick_to_model_role() {
    let store = store();
    store.save_role(role("b", Some("business")));
    let mut a = role("a", Some("business"));
    a.requirements = vec![rref("b")];
    store.save_role(a);
    let model = Arc::new(build(&store));

    // Unsaved replacement for B: no id yet.
    let candidates = Candidates::new(
        &store,
        Arc::clone(&model),
        vec![draft("B", Some("business"), &[])],
    )
    .unwrap();

    let a = model.role("a").unwrap();
    let with_candidates = a
        .required_or_permitted_ids(&store, &model, Some(&candidates))
        .unwrap();
    assert!(with_candidates.is_empty());

    let ids = a.required_or_permitted_ids(&store, &model, None).unwrap();
    assert!(ids.contains("b"));
    assert!(Arc::ptr_eq(
        &ids,
        &a.required_or_permitted_ids(&store, &model, None).unwrap()
    ));
}

#[test]
fn candidate_profiles_leave_model_profiles_alone() {
    let store = store();
    store.save_role(RoleRecord {
        profiles: vec![ProfileRecord::default()],
        ..role("r", Some("it"))
    });
    let model = Arc::new(build(&store));

    let mut edited = store.role_by_id("r").unwrap().unwrap();
    edited.profiles = vec![ProfileRecord::default(), ProfileRecord::default()];
    let candidates = Candidates::new(&store, Arc::clone(&model), vec![edited]).unwrap();

    assert_eq!(candidates.candidate("R").unwrap().correlation_profiles().len(), 2);
    assert_eq!(model.role("r").unwrap().correlation_profiles().len(), 1);
}

// ============================================================================
// Build control
// ============================================================================

#[test]
fn inactive_signal_aborts_build() {
    let store = store();
    store.save_role(role("a", Some("business")));
    let signal = ActiveSignal::new();
    signal.deactivate();
    assert!(matches!(
        CorrelationModel::prepare(&store, &signal),
        Err(crate::error::CorrelationError::Aborted { loaded: 0, total: 1 })
    ));
}

#[test]
fn end_to_end_assignable_parent_detectable_child() {
    let store = store();
    store.save_role(role("a", Some("org")));
    store.save_role(inherits(role("b", Some("it")), &["a"]));

    let model = build(&store);
    assert_eq!(names(&model.assignable_roles(None)), vec!["A"]);
    assert_eq!(names(&model.detectable_roles(None)), vec!["B"]);
    assert_eq!(ordered_names(&model.role("b").unwrap().super_roles(None)), vec!["A"]);
    assert_eq!(ordered_names(&model.role("a").unwrap().sub_roles(None)), vec!["B"]);

    // Rebuilding from the same roles gives the same sets.
    let again = build(&store);
    assert_eq!(names(&again.assignable_roles(None)), names(&model.assignable_roles(None)));
    assert_eq!(names(&again.detectable_roles(None)), names(&model.detectable_roles(None)));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_arbitrary_graphs_build_and_close(
        edges in prop::collection::vec((0..8usize, 0..8usize, 0..3u8), 0..30)
    ) {
        let store = store();
        let mut records: Vec<RoleRecord> = (0..8)
            .map(|i| role(&format!("r{}", i), Some(if i % 2 == 0 { "business" } else { "it" })))
            .collect();
        for (from, to, kind) in edges {
            let target = rref(&format!("r{}", to));
            match kind {
                0 => records[from].inheritance.push(target),
                1 => records[from].requirements.push(target),
                _ => records[from].permits.push(target),
            }
        }
        for record in records {
            store.save_role(record);
        }

        let model = build(&store);
        prop_assert_eq!(model.size(), 8);

        for role in model.all_roles() {
            prop_assert_eq!(role.hierarchy_status(), HierarchyStatus::Built);
            let id = role.id().unwrap().to_string();
            let closure = model.required_and_permitted_for_role_id(&store, &id).unwrap();
            prop_assert!(closure.iter().all(|r| r.name() != role.name()));
            let mut seen = names(&closure);
            seen.dedup();
            prop_assert_eq!(seen.len(), closure.len());
        }

        for role in model.assignable_roles(None) {
            prop_assert!(role.is_assignable());
        }
        for role in model.detectable_roles(None) {
            prop_assert!(role.is_detectable());
        }
    }
}
