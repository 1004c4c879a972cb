//! Read-only view of a decompiled program.
//!
//! The decompiler is a collaborator: it owns the class model and produces the
//! text. The service only ever reads through the [`Decompiler`] trait, and
//! every reference it hands out may go stale when the collaborator reloads.

use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// A class known to the decompiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClassRef {
    /// Fully-qualified name, nested classes joined with `$`.
    pub full_name: String,
    pub inner: bool,
}

impl ClassRef {
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let inner = full_name.contains('$');
        Self { full_name, inner }
    }

    pub fn simple_name(&self) -> &str {
        let tail = self
            .full_name
            .rsplit_once('.')
            .map(|(_, s)| s)
            .unwrap_or(&self.full_name);
        tail.rsplit_once('$').map(|(_, s)| s).unwrap_or(tail)
    }

    pub fn package(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map(|(p, _)| p)
            .unwrap_or("")
    }

    /// Name of the outermost enclosing class.
    pub fn top_level_name(&self) -> &str {
        self.full_name
            .split_once('$')
            .map(|(outer, _)| outer)
            .unwrap_or(&self.full_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Synchronized,
    Native,
    Abstract,
}

impl Modifier {
    pub const ALL: [Modifier; 8] = [
        Modifier::Public,
        Modifier::Private,
        Modifier::Protected,
        Modifier::Static,
        Modifier::Final,
        Modifier::Synchronized,
        Modifier::Native,
        Modifier::Abstract,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Modifier::Public => "public",
            Modifier::Private => "private",
            Modifier::Protected => "protected",
            Modifier::Static => "static",
            Modifier::Final => "final",
            Modifier::Synchronized => "synchronized",
            Modifier::Native => "native",
            Modifier::Abstract => "abstract",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.keyword() == keyword)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Access and property flags of a method or field.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierSet(u8);

impl ModifierSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        self.insert(modifier);
        self
    }

    pub fn insert(&mut self, modifier: Modifier) {
        self.0 |= modifier.bit();
    }

    pub fn contains(self, modifier: Modifier) -> bool {
        self.0 & modifier.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Modifier> {
        Modifier::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Modifier> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = Modifier>>(iter: I) -> Self {
        let mut set = ModifierSet::empty();
        for m in iter {
            set.insert(m);
        }
        set
    }
}

impl fmt::Debug for ModifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(Modifier::keyword))
            .finish()
    }
}

/// Method metadata as reported by the decompiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNode {
    pub name: String,
    pub declaring_class: ClassRef,
    /// Declared parameter types; only the count is relied upon.
    pub parameters: Vec<String>,
    pub modifiers: ModifierSet,
}

impl MethodNode {
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    pub name: String,
    pub declaring_class: ClassRef,
    pub modifiers: ModifierSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsageKind {
    #[serde(rename = "JavaClass")]
    Class,
    #[serde(rename = "JavaMethod")]
    Method,
    #[serde(rename = "JavaField")]
    Field,
}

/// One entry of a node's "used by" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRef {
    pub name: String,
    pub full_name: String,
    #[serde(rename = "type")]
    pub kind: UsageKind,
}

/// Entry names reported as the program manifest, preferred first.
pub const MANIFEST_ENTRIES: [&str; 2] = ["AndroidManifest.xml", "META-INF/MANIFEST.MF"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Manifest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub name: String,
    pub kind: ResourceKind,
}

/// Decoded content of a resource entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceContent {
    Text(String),
    Binary(usize),
}

/// The decompiler as seen from the introspection service.
///
/// Implementations must tolerate concurrent reads from several worker
/// threads; the service adds no locking of its own.
pub trait Decompiler: Send + Sync {
    /// The handle is usable: a model is loaded and it holds at least one
    /// class. Checked before any other call is trusted.
    fn is_live(&self) -> bool;

    /// Top-level classes only.
    fn classes(&self) -> Result<Vec<ClassRef>>;

    fn classes_with_inners(&self) -> Result<Vec<ClassRef>>;

    fn resources(&self) -> Result<Vec<ResourceEntry>>;

    fn load_resource(&self, entry: &ResourceEntry) -> Result<ResourceContent>;

    /// Forces decompilation so member lists and text are populated.
    fn decompile(&self, class: &ClassRef) -> Result<()>;

    fn class_code(&self, class: &ClassRef) -> Result<String>;

    fn methods(&self, class: &ClassRef) -> Result<Vec<MethodNode>>;

    fn fields(&self, class: &ClassRef) -> Result<Vec<FieldNode>>;

    /// Text of a single method, when the decompiler can produce it.
    fn method_code(&self, method: &MethodNode) -> Result<Option<String>>;

    fn class_usages(&self, class: &ClassRef) -> Result<Vec<UsageRef>>;

    fn method_usages(&self, method: &MethodNode) -> Result<Vec<UsageRef>>;

    fn field_usages(&self, field: &FieldNode) -> Result<Vec<UsageRef>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ref_splits_package_and_nested_names() {
        let inner = ClassRef::new("com.example.app.Outer$Inner");
        assert!(inner.inner);
        assert_eq!(inner.simple_name(), "Inner");
        assert_eq!(inner.package(), "com.example.app");
        assert_eq!(inner.top_level_name(), "com.example.app.Outer");

        let plain = ClassRef::new("Main");
        assert!(!plain.inner);
        assert_eq!(plain.simple_name(), "Main");
        assert_eq!(plain.package(), "");
    }

    #[test]
    fn modifier_set_tracks_membership() {
        let set: ModifierSet = [Modifier::Public, Modifier::Native].into_iter().collect();
        assert!(set.contains(Modifier::Public));
        assert!(set.contains(Modifier::Native));
        assert!(!set.contains(Modifier::Static));
        assert_eq!(set.iter().count(), 2);
        assert_eq!(Modifier::from_keyword("synchronized"), Some(Modifier::Synchronized));
        assert_eq!(Modifier::from_keyword("volatile"), None);
    }

    #[test]
    fn usage_kind_serializes_with_java_type_names() {
        let usage = UsageRef {
            name: "run".to_string(),
            full_name: "a.B.run".to_string(),
            kind: UsageKind::Method,
        };
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["type"], "JavaMethod");
    }
}
