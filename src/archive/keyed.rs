//! Object-graph reconstruction on top of a parsed container.
//!
//! A keyed archive is a container whose top dictionary holds `$objects`
//! (the archive's object table) and `$top` (named entry points). Objects
//! refer to each other through UIDs, which index `$objects`. Each table
//! entry is converted once, in order; references to other containers become
//! [`DecodedValue::BackReference`] so conversion never recurses into another
//! table entry.
//!
//! Containers that are not keyed archives are converted the same way, with
//! the container's own record table as the object table.

use super::bplist::{Container, RawObject};
use super::error::DecodeError;
use super::value::{DecodedArchive, DecodedValue, Mapping, ObjectTable};
use std::cell::Cell;
use std::collections::HashSet;

/// Inline plist nesting allowed inside a single archived object.
const MAX_INLINE_DEPTH: usize = 32;
/// Inline container records converted per archive, beyond one per record.
const INLINE_SLACK: usize = 16;

const STRING_CLASSES: &[&str] = &["NSString", "NSMutableString"];
const DICTIONARY_CLASSES: &[&str] = &["NSDictionary", "NSMutableDictionary"];
const SEQUENCE_CLASSES: &[&str] = &[
    "NSArray",
    "NSMutableArray",
    "NSSet",
    "NSMutableSet",
    "NSOrderedSet",
    "NSMutableOrderedSet",
];
const DATA_CLASSES: &[&str] = &["NSData", "NSMutableData"];

pub fn reconstruct(container: &Container) -> Result<DecodedArchive, DecodeError> {
    match KeyedArchive::detect(container) {
        Some(archive) => archive.reconstruct(),
        None => Ok(convert_plain(container)),
    }
}

// =============================================================================
// Plain containers
// =============================================================================

fn convert_plain(container: &Container) -> DecodedArchive {
    let child = |index: usize| -> DecodedValue {
        match &container.objects[index] {
            raw if raw.is_container() => DecodedValue::BackReference(index),
            raw => primitive(raw),
        }
    };

    let objects = container
        .objects
        .iter()
        .map(|raw| match raw {
            RawObject::Array(items) | RawObject::Set(items) => {
                DecodedValue::OrderedSequence(items.iter().map(|i| child(*i)).collect())
            }
            RawObject::Dict(entries) => {
                let mut mapping = Mapping::new(None);
                for (k, v) in entries {
                    let key = plain_key(container, *k);
                    mapping.entries.insert(key, child(*v));
                }
                DecodedValue::Mapping(mapping)
            }
            other => primitive(other),
        })
        .collect();

    DecodedArchive {
        root: child(container.top),
        objects: ObjectTable::from_vec(objects),
    }
}

fn plain_key(container: &Container, index: usize) -> String {
    let raw = &container.objects[index];
    if raw.is_container() {
        return format!("#{}", index);
    }
    primitive(raw).key_text().unwrap_or_else(|| format!("#{}", index))
}

fn primitive(raw: &RawObject) -> DecodedValue {
    match raw {
        RawObject::Null => DecodedValue::Null,
        RawObject::Bool(b) => DecodedValue::Boolean(*b),
        RawObject::Int(i) => DecodedValue::Integer(*i),
        RawObject::Real(f) | RawObject::Date(f) => DecodedValue::FloatingPoint(*f),
        RawObject::Data(d) => DecodedValue::ByteSequence(d.clone()),
        RawObject::String(s) if s == "$null" => DecodedValue::Null,
        RawObject::String(s) => DecodedValue::Text(s.clone()),
        RawObject::Uid(u) => DecodedValue::Integer(*u as i64),
        // Containers are handled by the callers
        RawObject::Array(_) | RawObject::Set(_) | RawObject::Dict(_) => DecodedValue::Null,
    }
}

// =============================================================================
// Keyed archives
// =============================================================================

struct KeyedArchive<'a> {
    container: &'a Container,
    /// `$objects` members: uid -> container record index.
    members: &'a [usize],
    /// `$top` entries.
    top: &'a [(usize, usize)],
    /// Inline container records still allowed for this archive.
    inline_left: Cell<usize>,
}

impl<'a> KeyedArchive<'a> {
    fn detect(container: &'a Container) -> Option<Self> {
        let RawObject::Dict(entries) = container.top_object() else {
            return None;
        };
        let objects = container.dict_get(entries, "$objects")?;
        let top = container.dict_get(entries, "$top")?;
        match (container.get(objects)?, container.get(top)?) {
            (RawObject::Array(members), RawObject::Dict(top)) => Some(Self {
                container,
                members,
                top,
                inline_left: Cell::new(
                    container.objects.len().saturating_mul(2).saturating_add(INLINE_SLACK),
                ),
            }),
            _ => None,
        }
    }

    fn reconstruct(&self) -> Result<DecodedArchive, DecodeError> {
        let objects = (0..self.members.len())
            .map(|uid| self.convert_object(uid))
            .collect::<Result<Vec<_>, _>>()?;

        let root = match self.container.dict_get(self.top, "root") {
            Some(index) => self.value(index, 0)?,
            None => {
                let mut mapping = Mapping::new(None);
                for (k, v) in self.top {
                    mapping.entries.insert(plain_key(self.container, *k), self.value(*v, 0)?);
                }
                DecodedValue::Mapping(mapping)
            }
        };

        Ok(DecodedArchive {
            root,
            objects: ObjectTable::from_vec(objects),
        })
    }

    fn raw(&self, uid: u64) -> Result<&'a RawObject, DecodeError> {
        usize::try_from(uid)
            .ok()
            .and_then(|u| self.members.get(u))
            .map(|index| &self.container.objects[*index])
            .ok_or_else(|| {
                DecodeError::malformed(format!(
                    "uid {} outside $objects table of {}",
                    uid,
                    self.members.len()
                ))
            })
    }

    /// Reference to an archived object: primitives are copied, containers referenced.
    fn object_ref(&self, uid: u64) -> Result<DecodedValue, DecodeError> {
        let raw = self.raw(uid)?;
        if raw.is_container() {
            Ok(DecodedValue::BackReference(uid as usize))
        } else {
            Ok(primitive(raw))
        }
    }

    /// Convert a value stored inline inside an archived object.
    fn value(&self, index: usize, depth: usize) -> Result<DecodedValue, DecodeError> {
        self.inline_value(index, depth, &mut HashSet::new())
    }

    /// Each inline container record may appear once per expansion, and the
    /// archive as a whole has a fixed budget, so shared records cannot fan
    /// out into an exponential tree.
    fn inline_value(
        &self,
        index: usize,
        depth: usize,
        entered: &mut HashSet<usize>,
    ) -> Result<DecodedValue, DecodeError> {
        if depth > MAX_INLINE_DEPTH {
            return Err(DecodeError::malformed(format!(
                "inline nesting deeper than {} at record {}",
                MAX_INLINE_DEPTH, index
            )));
        }
        let raw = &self.container.objects[index];
        if raw.is_container() {
            if !entered.insert(index) {
                return Err(DecodeError::malformed(format!(
                    "inline record {} reached twice within one object",
                    index
                )));
            }
            self.spend_inline(index)?;
        }
        match raw {
            RawObject::Uid(uid) => self.object_ref(*uid),
            RawObject::Array(items) | RawObject::Set(items) => Ok(DecodedValue::OrderedSequence(
                items
                    .iter()
                    .map(|i| self.inline_value(*i, depth + 1, entered))
                    .collect::<Result<_, _>>()?,
            )),
            RawObject::Dict(entries) => {
                let mut mapping = Mapping::new(None);
                for (k, v) in entries {
                    let value = self.inline_value(*v, depth + 1, entered)?;
                    mapping.entries.insert(plain_key(self.container, *k), value);
                }
                Ok(DecodedValue::Mapping(mapping))
            }
            other => Ok(primitive(other)),
        }
    }

    fn spend_inline(&self, index: usize) -> Result<(), DecodeError> {
        match self.inline_left.get().checked_sub(1) {
            Some(left) => {
                self.inline_left.set(left);
                Ok(())
            }
            None => Err(DecodeError::malformed(format!(
                "inline record budget exhausted at record {}",
                index
            ))),
        }
    }

    /// `$classes` chain of the class object at `uid`, most derived first.
    fn class_chain(&self, uid: u64) -> Vec<String> {
        let Ok(RawObject::Dict(entries)) = self.raw(uid) else {
            return Vec::new();
        };
        let text = |index: usize| match &self.container.objects[index] {
            RawObject::String(s) => Some(s.clone()),
            _ => None,
        };

        let mut chain: Vec<String> = match self
            .container
            .dict_get(entries, "$classes")
            .map(|i| &self.container.objects[i])
        {
            Some(RawObject::Array(items)) => items.iter().filter_map(|i| text(*i)).collect(),
            _ => Vec::new(),
        };
        if let Some(name) = self.container.dict_get(entries, "$classname").and_then(text) {
            if chain.first() != Some(&name) {
                chain.insert(0, name);
            }
        }
        chain
    }

    /// Text of an archived string object, used for dictionary keys.
    fn object_text(&self, uid: u64) -> Option<String> {
        match self.raw(uid).ok()? {
            RawObject::String(s) => Some(s.clone()),
            RawObject::Dict(entries) => {
                let index = self.container.dict_get(entries, "NS.string")?;
                match &self.container.objects[index] {
                    RawObject::String(s) => Some(s.clone()),
                    _ => None,
                }
            }
            other => primitive(other).key_text(),
        }
    }

    fn convert_object(&self, uid: usize) -> Result<DecodedValue, DecodeError> {
        let raw = &self.container.objects[self.members[uid]];
        let entries = match raw {
            RawObject::Dict(entries) => entries,
            RawObject::Array(_) | RawObject::Set(_) => {
                return self.value(self.members[uid], 0);
            }
            other => return Ok(primitive(other)),
        };

        let chain = match self.container.dict_get(entries, "$class") {
            Some(index) => match &self.container.objects[index] {
                RawObject::Uid(class_uid) => self.class_chain(*class_uid),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        let is = |names: &[&str]| chain.iter().any(|c| names.contains(&c.as_str()));
        let field = |key: &str| self.container.dict_get(entries, key);

        if is(STRING_CLASSES) {
            if let Some(index) = field("NS.string") {
                if let DecodedValue::Text(s) = self.value(index, 0)? {
                    return Ok(DecodedValue::Text(s));
                }
            }
            if let Some(RawObject::Data(bytes)) = field("NS.bytes").map(|i| &self.container.objects[i]) {
                return Ok(DecodedValue::Text(String::from_utf8_lossy(bytes).into_owned()));
            }
            return Ok(DecodedValue::Text(String::new()));
        }

        if is(DICTIONARY_CLASSES) {
            let mut mapping = Mapping::new(chain.first().cloned());
            let keys = self.uid_list(field("NS.keys"));
            let values = self.uid_list(field("NS.objects"));
            for (key_uid, value_uid) in keys.into_iter().zip(values) {
                let key = self
                    .object_text(key_uid)
                    .unwrap_or_else(|| format!("#{}", key_uid));
                mapping.entries.insert(key, self.object_ref(value_uid)?);
            }
            return Ok(DecodedValue::Mapping(mapping));
        }

        if is(SEQUENCE_CLASSES) {
            return self
                .uid_list(field("NS.objects"))
                .into_iter()
                .map(|u| self.object_ref(u))
                .collect::<Result<Vec<_>, _>>()
                .map(DecodedValue::OrderedSequence);
        }

        if is(DATA_CLASSES) {
            if let Some(RawObject::Data(bytes)) = field("NS.data").map(|i| &self.container.objects[i]) {
                return Ok(DecodedValue::ByteSequence(bytes.clone()));
            }
        }

        if is(&["NSDate"]) {
            if let Some(index) = field("NS.time") {
                return self.value(index, 0);
            }
        }

        let mut mapping = Mapping::new(chain.first().cloned());
        for (k, v) in entries {
            let key = plain_key(self.container, *k);
            if key == "$class" {
                continue;
            }
            mapping.entries.insert(key, self.value(*v, 0)?);
        }
        Ok(DecodedValue::Mapping(mapping))
    }

    /// UIDs listed in an inline array (`NS.keys`, `NS.objects`).
    fn uid_list(&self, index: Option<usize>) -> Vec<u64> {
        match index.map(|i| &self.container.objects[i]) {
            Some(RawObject::Array(items)) | Some(RawObject::Set(items)) => items
                .iter()
                .filter_map(|i| match &self.container.objects[*i] {
                    RawObject::Uid(u) => Some(*u),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::bplist;
    use crate::archive::fixture::{KVal, KeyedBuilder, Obj, PlistWriter};

    fn decode(bytes: &[u8]) -> DecodedArchive {
        reconstruct(&bplist::parse(bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_plist_arena() {
        let bytes = PlistWriter::new().finish(
            vec![
                Obj::Dict(vec![(1, 2), (3, 4)]),
                Obj::Ascii("name".into()),
                Obj::Ascii("alice".into()),
                Obj::Ascii("tags".into()),
                Obj::Array(vec![2]),
            ],
            0,
        );
        let archive = decode(&bytes);
        assert_eq!(archive.root, DecodedValue::BackReference(0));
        let DecodedValue::Mapping(root) = archive.resolve(&archive.root).unwrap() else {
            panic!("root is not a mapping");
        };
        assert_eq!(root.get("name"), Some(&DecodedValue::Text("alice".into())));
        assert_eq!(root.get("tags"), Some(&DecodedValue::BackReference(4)));
        assert_eq!(
            archive.objects.get(4),
            Some(&DecodedValue::OrderedSequence(vec![DecodedValue::Text("alice".into())]))
        );
    }

    #[test]
    fn test_ns_string_unwrapped() {
        let mut b = KeyedBuilder::new();
        let s = b.ns_string("hello there");
        let archive = decode(&b.finish(s));
        assert_eq!(archive.root, DecodedValue::BackReference(s as usize));
        assert_eq!(
            archive.resolve(&archive.root),
            Some(&DecodedValue::Text("hello there".into()))
        );
    }

    #[test]
    fn test_dictionary_keys_and_class_tag() {
        let mut b = KeyedBuilder::new();
        let key = b.string("NSLink");
        let url = b.ns_url("https://m.tiktok.com/@alice/video/1234567890");
        let dict = b.ns_dictionary(vec![(key, url)]);
        let archive = decode(&b.finish(dict));

        let DecodedValue::Mapping(attrs) = archive.resolve(&archive.root).unwrap() else {
            panic!("expected mapping");
        };
        assert_eq!(attrs.class.as_deref(), Some("NSDictionary"));
        assert_eq!(attrs.get("NSLink"), Some(&DecodedValue::BackReference(url as usize)));

        let DecodedValue::Mapping(ns_url) = archive.objects.get(url as usize).unwrap() else {
            panic!("expected NSURL mapping");
        };
        assert_eq!(ns_url.class.as_deref(), Some("NSURL"));
        assert_eq!(ns_url.get("NS.base"), Some(&DecodedValue::Null));
        assert_eq!(
            ns_url.get("NS.relative"),
            Some(&DecodedValue::Text("https://m.tiktok.com/@alice/video/1234567890".into()))
        );
        assert!(!ns_url.entries.contains_key("$class"));
    }

    #[test]
    fn test_cycle_becomes_back_reference() {
        let mut b = KeyedBuilder::new();
        let array = b.reserve();
        let class = b.class("NSMutableArray", &["NSArray", "NSObject"]);
        let text = b.string("loop");
        b.set_object(array, Some(class), vec![("NS.objects", KVal::Uids(vec![text, array]))]);
        let archive = decode(&b.finish(array));

        assert_eq!(
            archive.objects.get(array as usize),
            Some(&DecodedValue::OrderedSequence(vec![
                DecodedValue::Text("loop".into()),
                DecodedValue::BackReference(array as usize),
            ]))
        );
    }

    #[test]
    fn test_dangling_uid_is_malformed() {
        let mut b = KeyedBuilder::new();
        let array = b.ns_array(vec![99]);
        let container = bplist::parse(&b.finish(array)).unwrap();
        assert!(matches!(reconstruct(&container), Err(DecodeError::MalformedContainer(_))));
    }

    #[test]
    fn test_unknown_class_keeps_fields() {
        let mut b = KeyedBuilder::new();
        let class = b.class("IMMessagePartBody", &["NSObject"]);
        let count = b.int(7);
        let obj = b.object(
            Some(class),
            vec![("partIndex", KVal::Int(2)), ("partCount", KVal::Uid(count))],
        );
        let archive = decode(&b.finish(obj));
        let DecodedValue::Mapping(m) = archive.resolve(&archive.root).unwrap() else {
            panic!("expected mapping");
        };
        assert_eq!(m.class.as_deref(), Some("IMMessagePartBody"));
        assert_eq!(m.get("partIndex"), Some(&DecodedValue::Integer(2)));
        assert_eq!(m.get("partCount"), Some(&DecodedValue::Integer(7)));
    }

    /// Keyed archive whose single member is the inline record at index 5.
    /// `tail` is appended starting at index 8.
    fn inline_member_archive(member: Obj, tail: Vec<Obj>) -> Vec<u8> {
        let mut objects = vec![
            Obj::Dict(vec![(1, 2), (3, 4)]),
            Obj::Ascii("$objects".into()),
            Obj::Array(vec![5]),
            Obj::Ascii("$top".into()),
            Obj::Dict(vec![(6, 7)]),
            member,
            Obj::Ascii("root".into()),
            Obj::Uid(0),
        ];
        objects.extend(tail);
        PlistWriter::new().finish(objects, 0)
    }

    #[test]
    fn test_nested_inline_arrays() {
        let bytes = inline_member_archive(
            Obj::Array(vec![8]),
            vec![Obj::Array(vec![9]), Obj::Ascii("leaf".into())],
        );
        let archive = decode(&bytes);
        assert_eq!(
            archive.objects.get(0),
            Some(&DecodedValue::OrderedSequence(vec![DecodedValue::OrderedSequence(vec![
                DecodedValue::Text("leaf".into())
            ])]))
        );
    }

    #[test]
    fn test_shared_inline_records_rejected() {
        // Each level lists the next one twice: 2^24 nodes if expanded as a tree
        let depth = 24;
        let mut tail = Vec::new();
        for level in 0..depth {
            let next = 9 + level;
            tail.push(Obj::Array(vec![next, next]));
        }
        tail.push(Obj::Ascii("leaf".into()));
        let bytes = inline_member_archive(Obj::Array(vec![8, 8]), tail);

        let started = std::time::Instant::now();
        let container = bplist::parse(&bytes).unwrap();
        assert!(matches!(reconstruct(&container), Err(DecodeError::MalformedContainer(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_inline_fields_in_many_objects() {
        let mut b = KeyedBuilder::new();
        let class = b.class("IMMessagePartBody", &["NSObject"]);
        let mut members = Vec::new();
        for _ in 0..4 {
            members.push(b.object(Some(class), vec![("runs", KVal::Uids(vec![0]))]));
        }
        let root = b.ns_array(members);
        let archive = decode(&b.finish(root));
        assert_eq!(archive.objects.len(), 7);
    }
}
