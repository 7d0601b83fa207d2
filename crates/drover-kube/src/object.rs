//! Helpers for working with schema-less [`DynamicObject`] values
//!
//! Parents and children are arbitrary resources, so everything here operates
//! on [`kube::core::DynamicObject`] plus plain JSON. The centerpiece is
//! [`ChildMap`], the kind-then-relative-name index both the observed and
//! desired child sets use.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use serde_json::Value;

use crate::api::parse_api_version;
use crate::error::{Result, SyncError};

/// Join (group, version) back into an `apiVersion` string.
pub fn format_api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Extract the full GVK from an object's type metadata.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj.types.as_ref().ok_or_else(|| SyncError::InvalidChild {
        object: display_name(obj),
        message: "missing apiVersion/kind".to_string(),
    })?;
    Ok(gvk_from_type_meta(types))
}

pub fn gvk_from_type_meta(types: &TypeMeta) -> GroupVersionKind {
    let (group, version) = parse_api_version(&types.api_version);
    GroupVersionKind::gvk(group, version, &types.kind)
}

pub fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

pub fn namespace_of(obj: &DynamicObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or_default()
}

pub fn uid_of(obj: &DynamicObject) -> &str {
    obj.metadata.uid.as_deref().unwrap_or_default()
}

pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// "namespace/name" for namespaced objects, bare name otherwise.
pub fn display_name(obj: &DynamicObject) -> String {
    match &obj.metadata.namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name_of(obj)),
        _ => name_of(obj).to_string(),
    }
}

pub fn is_pending_deletion(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

pub fn labels_of(obj: &DynamicObject) -> HashMap<String, String> {
    obj.metadata
        .labels
        .as_ref()
        .map(|labels| labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// The owner reference marked `controller: true`, if any. An object has at
/// most one; the API server enforces that on write.
pub fn controller_ref(obj: &DynamicObject) -> Option<&OwnerReference> {
    obj.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Build the controller owner reference that marks `parent` as the one
/// manager of a child.
pub fn make_controller_ref(parent: &DynamicObject) -> Result<OwnerReference> {
    let types = parent.types.as_ref().ok_or_else(|| {
        SyncError::InvalidConfig(format!(
            "parent {} has no apiVersion/kind",
            display_name(parent)
        ))
    })?;
    let name = parent.metadata.name.clone().ok_or_else(|| {
        SyncError::InvalidConfig("parent object has no name".to_string())
    })?;
    let uid = parent.metadata.uid.clone().ok_or_else(|| {
        SyncError::InvalidConfig(format!("parent {} has no uid", display_name(parent)))
    })?;
    Ok(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Add `controller_ref` to a reference list, or refresh the existing entry
/// for the same owner UID in place. Returns whether anything changed, so
/// retried writes can skip no-ops.
pub fn upsert_owner_reference(
    refs: &mut Vec<OwnerReference>,
    controller_ref: &OwnerReference,
) -> bool {
    for existing in refs.iter_mut() {
        if existing.uid == controller_ref.uid {
            if existing == controller_ref {
                return false;
            }
            *existing = controller_ref.clone();
            return true;
        }
    }
    refs.push(controller_ref.clone());
    true
}

/// Drop the reference owned by `owner_uid`, if present.
pub fn remove_owner_reference(refs: &mut Vec<OwnerReference>, owner_uid: &str) -> bool {
    let before = refs.len();
    refs.retain(|r| r.uid != owner_uid);
    refs.len() != before
}

/// Serialize an object into the JSON tree the merge engine operates on.
pub fn to_value(obj: &DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(obj)?)
}

pub fn from_value(value: Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value)?)
}

/// Structural equality through the wire representation.
pub fn objects_equal(a: &DynamicObject, b: &DynamicObject) -> Result<bool> {
    Ok(to_value(a)? == to_value(b)?)
}

/// The key a child is filed under: its bare name, unless a cluster-scoped
/// parent owns children in namespaces, in which case "namespace/name" keeps
/// same-named children from different namespaces apart.
pub fn relative_name(parent: &DynamicObject, obj: &DynamicObject) -> String {
    let parent_namespaced = parent
        .metadata
        .namespace
        .as_deref()
        .is_some_and(|ns| !ns.is_empty());
    let obj_ns = obj.metadata.namespace.as_deref().unwrap_or_default();
    if !parent_namespaced && !obj_ns.is_empty() {
        format!("{}/{}", obj_ns, name_of(obj))
    } else {
        name_of(obj).to_string()
    }
}

/// Children grouped by kind, keyed by name relative to one parent.
#[derive(Debug, Clone, Default)]
pub struct ChildMap {
    groups: HashMap<GroupVersionKind, HashMap<String, DynamicObject>>,
}

impl ChildMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a flat object list, e.g. a hook response's children.
    pub fn from_objects(parent: &DynamicObject, objects: Vec<DynamicObject>) -> Result<Self> {
        let mut map = Self::new();
        for obj in objects {
            map.insert(parent, obj)?;
        }
        Ok(map)
    }

    /// Register a kind so it shows up with an empty group rather than being
    /// absent. Observed maps do this for every watched kind.
    pub fn init_group(&mut self, gvk: GroupVersionKind) {
        self.groups.entry(gvk).or_default();
    }

    pub fn insert(&mut self, parent: &DynamicObject, obj: DynamicObject) -> Result<()> {
        let gvk = gvk_of(&obj)?;
        let key = relative_name(parent, &obj);
        self.groups.entry(gvk).or_default().insert(key, obj);
        Ok(())
    }

    /// Overwrite an entry only if it already exists; a missing key means the
    /// child is no longer wanted and must not be resurrected.
    pub fn replace_if_exists(&mut self, parent: &DynamicObject, obj: DynamicObject) -> Result<()> {
        let gvk = gvk_of(&obj)?;
        let key = relative_name(parent, &obj);
        if let Some(group) = self.groups.get_mut(&gvk) {
            if let std::collections::hash_map::Entry::Occupied(mut entry) = group.entry(key) {
                entry.insert(obj);
            }
        }
        Ok(())
    }

    /// Version-agnostic lookup, for claim records that only carry group+kind.
    pub fn find_group_kind_name(
        &self,
        api_group: &str,
        kind: &str,
        name: &str,
    ) -> Option<&DynamicObject> {
        self.groups
            .iter()
            .filter(|(gvk, _)| gvk.group == api_group && gvk.kind == kind)
            .find_map(|(_, group)| group.get(name))
    }

    pub fn group(&self, gvk: &GroupVersionKind) -> Option<&HashMap<String, DynamicObject>> {
        self.groups.get(gvk)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupVersionKind, &HashMap<String, DynamicObject>)> {
        self.groups.iter()
    }

    /// Mutable access to every object, for label injection passes.
    pub fn objects_mut(&mut self) -> impl Iterator<Item = &mut DynamicObject> {
        self.groups.values_mut().flat_map(|group| group.values_mut())
    }

    /// All objects, in no particular order.
    pub fn list(&self) -> Vec<DynamicObject> {
        self.groups
            .values()
            .flat_map(|group| group.values().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|group| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into the wire shape hooks receive: "Kind.apiVersion" on the
    /// outside, relative name on the inside.
    pub fn to_object_map(&self) -> Result<drover_hooks::ObjectMap> {
        let mut out = drover_hooks::ObjectMap::new();
        for (gvk, group) in &self.groups {
            let api_version = format_api_version(&gvk.group, &gvk.version);
            let key = drover_hooks::object_map_key(&gvk.kind, &api_version);
            let entry = out.entry(key).or_default();
            for (name, obj) in group {
                entry.insert(name.clone(), serde_json::to_value(obj)?);
            }
        }
        Ok(out)
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::make_object;
    use super::*;

    #[test]
    fn test_format_api_version() {
        assert_eq!(format_api_version("", "v1"), "v1");
        assert_eq!(format_api_version("apps", "v1"), "apps/v1");
    }

    #[test]
    fn test_gvk_of_requires_type_meta() {
        let obj = make_object("apps/v1", "Deployment", Some("default"), "web", "u1");
        let gvk = gvk_of(&obj).unwrap();
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");

        let mut untyped = obj.clone();
        untyped.types = None;
        assert!(matches!(
            gvk_of(&untyped),
            Err(SyncError::InvalidChild { .. })
        ));
    }

    #[test]
    fn test_controller_ref_finds_only_controller_entry() {
        let mut obj = make_object("v1", "Pod", Some("default"), "web-0", "child-uid");
        let parent = make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "parent-uid");
        let non_controller = OwnerReference {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            name: "svc".to_string(),
            uid: "other-uid".to_string(),
            ..Default::default()
        };
        obj.metadata.owner_references = Some(vec![
            non_controller,
            make_controller_ref(&parent).unwrap(),
        ]);

        let found = controller_ref(&obj).unwrap();
        assert_eq!(found.uid, "parent-uid");
        assert_eq!(found.kind, "CatSet");
        assert_eq!(found.block_owner_deletion, Some(true));
    }

    #[test]
    fn test_upsert_owner_reference_is_idempotent() {
        let parent = make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "parent-uid");
        let controller = make_controller_ref(&parent).unwrap();
        let mut refs = Vec::new();

        assert!(upsert_owner_reference(&mut refs, &controller));
        assert!(!upsert_owner_reference(&mut refs, &controller));
        assert_eq!(refs.len(), 1);

        // A stale entry for the same owner is refreshed, not duplicated.
        refs[0].block_owner_deletion = None;
        assert!(upsert_owner_reference(&mut refs, &controller));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].block_owner_deletion, Some(true));
    }

    #[test]
    fn test_remove_owner_reference() {
        let parent = make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "parent-uid");
        let mut refs = vec![make_controller_ref(&parent).unwrap()];

        assert!(remove_owner_reference(&mut refs, "parent-uid"));
        assert!(refs.is_empty());
        assert!(!remove_owner_reference(&mut refs, "parent-uid"));
    }

    #[test]
    fn test_relative_name_for_cluster_scoped_parent() {
        let mut parent = make_object("ctl.example.com/v1", "ClusterThing", None, "global", "u1");
        parent.metadata.namespace = None;
        let child = make_object("v1", "Pod", Some("default"), "web-0", "u2");
        assert_eq!(relative_name(&parent, &child), "default/web-0");

        let namespaced_parent =
            make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "u3");
        assert_eq!(relative_name(&namespaced_parent, &child), "web-0");
    }

    #[test]
    fn test_child_map_insert_and_find() {
        let parent = make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "u1");
        let mut map = ChildMap::new();
        map.insert(&parent, make_object("v1", "Pod", Some("default"), "web-0", "p0"))
            .unwrap();
        map.insert(&parent, make_object("v1", "Pod", Some("default"), "web-1", "p1"))
            .unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.find_group_kind_name("", "Pod", "web-0").is_some());
        assert!(map.find_group_kind_name("", "Pod", "web-9").is_none());
        assert!(map.find_group_kind_name("apps", "Pod", "web-0").is_none());
    }

    #[test]
    fn test_child_map_replace_if_exists_does_not_insert() {
        let parent = make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "u1");
        let mut map = ChildMap::new();
        map.insert(&parent, make_object("v1", "Pod", Some("default"), "web-0", "p0"))
            .unwrap();

        let replacement = make_object("v1", "Pod", Some("default"), "web-0", "p0-new");
        map.replace_if_exists(&parent, replacement).unwrap();
        assert_eq!(
            uid_of(map.find_group_kind_name("", "Pod", "web-0").unwrap()),
            "p0-new"
        );

        // Names not already present are ignored.
        let stranger = make_object("v1", "Pod", Some("default"), "web-9", "p9");
        map.replace_if_exists(&parent, stranger).unwrap();
        assert!(map.find_group_kind_name("", "Pod", "web-9").is_none());
    }

    #[test]
    fn test_child_map_init_group_keeps_empty_groups_visible() {
        let mut map = ChildMap::new();
        map.init_group(GroupVersionKind::gvk("", "v1", "Pod"));
        assert!(map.is_empty());
        assert_eq!(map.groups().count(), 1);

        let wire = map.to_object_map().unwrap();
        assert!(wire.contains_key("Pod.v1"));
        assert!(wire["Pod.v1"].is_empty());
    }

    #[test]
    fn test_to_object_map_uses_kind_and_api_version_keys() {
        let parent = make_object("ctl.example.com/v1", "CatSet", Some("default"), "web", "u1");
        let mut map = ChildMap::new();
        map.insert(&parent, make_object("v1", "Pod", Some("default"), "web-0", "p0"))
            .unwrap();
        map.insert(
            &parent,
            make_object("apps/v1", "StatefulSet", Some("default"), "db", "s0"),
        )
        .unwrap();

        let wire = map.to_object_map().unwrap();
        assert!(wire.contains_key("Pod.v1"));
        assert!(wire.contains_key("StatefulSet.apps/v1"));
        assert_eq!(wire["Pod.v1"]["web-0"]["metadata"]["name"], "web-0");
    }
}
