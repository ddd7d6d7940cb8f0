//! Binary plist writer used to build archives in tests.

/// Plist-level object. Container members are indices into the writer's table.
#[derive(Debug, Clone)]
pub enum Obj {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Ascii(String),
    Utf16(String),
    Data(Vec<u8>),
    Uid(u64),
    Array(Vec<usize>),
    Set(Vec<usize>),
    Dict(Vec<(usize, usize)>),
}

#[derive(Debug, Default)]
pub struct PlistWriter {
    objects: Vec<Obj>,
}

impl PlistWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, obj: Obj) -> usize {
        self.objects.push(obj);
        self.objects.len() - 1
    }

    pub fn text(&mut self, s: &str) -> usize {
        if s.is_ascii() {
            self.push(Obj::Ascii(s.to_string()))
        } else {
            self.push(Obj::Utf16(s.to_string()))
        }
    }

    /// Serialize `objects` (replacing anything pushed so far) with `top` as the root.
    pub fn finish(mut self, objects: Vec<Obj>, top: usize) -> Vec<u8> {
        self.objects = objects;
        self.write(top)
    }

    pub fn write(&self, top: usize) -> Vec<u8> {
        let ref_size = if self.objects.len() < 256 { 1 } else { 2 };
        let mut out = b"bplist00".to_vec();
        let mut offsets = Vec::with_capacity(self.objects.len());

        for obj in &self.objects {
            offsets.push(out.len());
            write_object(&mut out, obj, ref_size);
        }

        let table_offset = out.len();
        let max_offset = offsets.iter().copied().max().unwrap_or(0);
        let offset_size = if max_offset < 0x100 {
            1
        } else if max_offset < 0x1_0000 {
            2
        } else {
            4
        };
        for offset in &offsets {
            write_uint(&mut out, *offset as u64, offset_size);
        }

        out.extend_from_slice(&[0u8; 6]);
        out.push(offset_size as u8);
        out.push(ref_size as u8);
        out.extend_from_slice(&(self.objects.len() as u64).to_be_bytes());
        out.extend_from_slice(&(top as u64).to_be_bytes());
        out.extend_from_slice(&(table_offset as u64).to_be_bytes());
        out
    }
}

fn write_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

fn write_int(out: &mut Vec<u8>, value: i64) {
    if (0..=0xFF).contains(&value) {
        out.push(0x10);
        write_uint(out, value as u64, 1);
    } else if (0..=0xFFFF).contains(&value) {
        out.push(0x11);
        write_uint(out, value as u64, 2);
    } else if (0..=0xFFFF_FFFF).contains(&value) {
        out.push(0x12);
        write_uint(out, value as u64, 4);
    } else {
        out.push(0x13);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn write_header(out: &mut Vec<u8>, kind: u8, len: usize) {
    if len < 15 {
        out.push((kind << 4) | len as u8);
    } else {
        out.push((kind << 4) | 0x0F);
        write_int(out, len as i64);
    }
}

fn write_refs(out: &mut Vec<u8>, refs: &[usize], ref_size: usize) {
    for r in refs {
        write_uint(out, *r as u64, ref_size);
    }
}

fn write_object(out: &mut Vec<u8>, obj: &Obj, ref_size: usize) {
    match obj {
        Obj::Null => out.push(0x00),
        Obj::Bool(false) => out.push(0x08),
        Obj::Bool(true) => out.push(0x09),
        Obj::Int(v) => write_int(out, *v),
        Obj::Real(v) => {
            out.push(0x23);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Obj::Ascii(s) => {
            write_header(out, 0x5, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        Obj::Utf16(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            write_header(out, 0x6, units.len());
            for unit in units {
                out.extend_from_slice(&unit.to_be_bytes());
            }
        }
        Obj::Data(bytes) => {
            write_header(out, 0x4, bytes.len());
            out.extend_from_slice(bytes);
        }
        Obj::Uid(v) => {
            let width = if *v < 0x100 {
                1
            } else if *v < 0x1_0000 {
                2
            } else if *v < 0x1_0000_0000 {
                4
            } else {
                8
            };
            out.push(0x80 | (width as u8 - 1));
            write_uint(out, *v, width);
        }
        Obj::Array(items) => {
            write_header(out, 0xA, items.len());
            write_refs(out, items, ref_size);
        }
        Obj::Set(items) => {
            write_header(out, 0xC, items.len());
            write_refs(out, items, ref_size);
        }
        Obj::Dict(entries) => {
            write_header(out, 0xD, entries.len());
            let keys: Vec<usize> = entries.iter().map(|(k, _)| *k).collect();
            let values: Vec<usize> = entries.iter().map(|(_, v)| *v).collect();
            write_refs(out, &keys, ref_size);
            write_refs(out, &values, ref_size);
        }
    }
}

/// Value stored under a key of a keyed-archive object.
#[derive(Debug, Clone)]
pub enum KVal {
    Uid(u64),
    Str(String),
    Int(i64),
    Uids(Vec<u64>),
    Data(Vec<u8>),
}

#[derive(Debug, Clone)]
enum KObj {
    Null,
    Str(String),
    Int(i64),
    Class { name: String, classes: Vec<String> },
    Object { class: Option<u64>, entries: Vec<(String, KVal)> },
}

/// Builds an `NSKeyedArchiver`-shaped archive. Uid 0 is always `$null`.
#[derive(Debug)]
pub struct KeyedBuilder {
    objects: Vec<KObj>,
}

impl Default for KeyedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedBuilder {
    pub fn new() -> Self {
        Self { objects: vec![KObj::Null] }
    }

    fn add(&mut self, obj: KObj) -> u64 {
        self.objects.push(obj);
        (self.objects.len() - 1) as u64
    }

    pub fn string(&mut self, s: &str) -> u64 {
        self.add(KObj::Str(s.to_string()))
    }

    pub fn int(&mut self, v: i64) -> u64 {
        self.add(KObj::Int(v))
    }

    pub fn class(&mut self, name: &str, supers: &[&str]) -> u64 {
        let mut classes = vec![name.to_string()];
        classes.extend(supers.iter().map(|s| s.to_string()));
        self.add(KObj::Class { name: name.to_string(), classes })
    }

    pub fn object(&mut self, class: Option<u64>, entries: Vec<(&str, KVal)>) -> u64 {
        self.add(KObj::Object {
            class,
            entries: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        })
    }

    /// Reserve a uid to be filled later with [`KeyedBuilder::set_object`], for cycles.
    pub fn reserve(&mut self) -> u64 {
        self.add(KObj::Null)
    }

    pub fn set_object(&mut self, uid: u64, class: Option<u64>, entries: Vec<(&str, KVal)>) {
        self.objects[uid as usize] = KObj::Object {
            class,
            entries: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        };
    }

    pub fn ns_string(&mut self, s: &str) -> u64 {
        let class = self.class("NSString", &["NSObject"]);
        self.object(Some(class), vec![("NS.string", KVal::Str(s.to_string()))])
    }

    pub fn ns_url(&mut self, url: &str) -> u64 {
        let class = self.class("NSURL", &["NSObject"]);
        let relative = self.string(url);
        self.object(
            Some(class),
            vec![("NS.base", KVal::Uid(0)), ("NS.relative", KVal::Uid(relative))],
        )
    }

    pub fn ns_dictionary(&mut self, pairs: Vec<(u64, u64)>) -> u64 {
        let class = self.class("NSDictionary", &["NSObject"]);
        let keys = pairs.iter().map(|(k, _)| *k).collect();
        let values = pairs.iter().map(|(_, v)| *v).collect();
        self.object(
            Some(class),
            vec![("NS.keys", KVal::Uids(keys)), ("NS.objects", KVal::Uids(values))],
        )
    }

    pub fn ns_array(&mut self, items: Vec<u64>) -> u64 {
        let class = self.class("NSMutableArray", &["NSArray", "NSObject"]);
        self.object(Some(class), vec![("NS.objects", KVal::Uids(items))])
    }

    /// Attributed string whose single attribute run carries `attributes`.
    pub fn attributed_string(&mut self, text: &str, attributes: u64) -> u64 {
        let class = self.class("NSMutableAttributedString", &["NSAttributedString", "NSObject"]);
        let string = self.ns_string(text);
        self.object(
            Some(class),
            vec![
                ("NSString", KVal::Uid(string)),
                ("NSAttributes", KVal::Uid(attributes)),
                ("NSAttributeInfo", KVal::Data(vec![text.len() as u8, 0])),
            ],
        )
    }

    pub fn finish(self, root: u64) -> Vec<u8> {
        let mut w = PlistWriter::new();
        let mut members = Vec::with_capacity(self.objects.len());

        for obj in &self.objects {
            let index = match obj {
                KObj::Null => w.text("$null"),
                KObj::Str(s) => w.text(s),
                KObj::Int(v) => w.push(Obj::Int(*v)),
                KObj::Class { name, classes } => {
                    let name_key = w.text("$classname");
                    let name_val = w.text(name);
                    let classes_key = w.text("$classes");
                    let class_items = classes.iter().map(|c| w.text(c)).collect();
                    let classes_val = w.push(Obj::Array(class_items));
                    w.push(Obj::Dict(vec![(name_key, name_val), (classes_key, classes_val)]))
                }
                KObj::Object { class, entries } => {
                    let mut pairs = Vec::new();
                    for (key, value) in entries {
                        let k = w.text(key);
                        let v = push_kval(&mut w, value);
                        pairs.push((k, v));
                    }
                    if let Some(class) = class {
                        let k = w.text("$class");
                        let v = w.push(Obj::Uid(*class));
                        pairs.push((k, v));
                    }
                    w.push(Obj::Dict(pairs))
                }
            };
            members.push(index);
        }

        let objects = w.push(Obj::Array(members));
        let root_uid = w.push(Obj::Uid(root));
        let root_key = w.text("root");
        let top = w.push(Obj::Dict(vec![(root_key, root_uid)]));

        let version_key = w.text("$version");
        let version = w.push(Obj::Int(100_000));
        let archiver_key = w.text("$archiver");
        let archiver = w.text("NSKeyedArchiver");
        let top_key = w.text("$top");
        let objects_key = w.text("$objects");
        let archive = w.push(Obj::Dict(vec![
            (version_key, version),
            (archiver_key, archiver),
            (top_key, top),
            (objects_key, objects),
        ]));
        w.write(archive)
    }
}

fn push_kval(w: &mut PlistWriter, value: &KVal) -> usize {
    match value {
        KVal::Uid(u) => w.push(Obj::Uid(*u)),
        KVal::Str(s) => w.text(s),
        KVal::Int(v) => w.push(Obj::Int(*v)),
        KVal::Data(bytes) => w.push(Obj::Data(bytes.clone())),
        KVal::Uids(uids) => {
            let items = uids.iter().map(|u| w.push(Obj::Uid(*u))).collect();
            w.push(Obj::Array(items))
        }
    }
}
