//! String interning for identifiers and string literals.
//!
//! Names used by code objects (attribute names, globals, local variable names) and
//! string constants are stored once in [`Interns`] and referenced by [`StringId`].
//! This keeps [`Value::InternString`](crate::value::Value) an immediate value and lets
//! name lookups compare small integers instead of strings.
//!
//! StringIds are laid out as follows:
//! * 0 to 128 - single character strings for all 128 ASCII characters
//! * 1000 to 1000 + count(StaticStrings) - the [`StaticStrings`] well-known names
//! * 10_000+ - strings interned while loading code objects

use std::{str::FromStr, sync::LazyLock};

use ahash::AHashMap;
use strum::{EnumString, FromRepr, IntoStaticStr};

/// Index into the string interner's storage.
///
/// Uses `u32` to save space, this limits us to ~4 billion unique interns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the StringId for an ASCII byte.
    #[must_use]
    pub fn from_ascii(byte: u8) -> Self {
        Self(u32::from(byte))
    }
}

const STATIC_STRING_ID_OFFSET: u32 = 1000;
const INTERN_STRING_ID_OFFSET: usize = 10_000;

/// Static strings for all 128 ASCII characters, built once on first access.
static ASCII_STRS: LazyLock<[&'static str; 128]> = LazyLock::new(|| {
    std::array::from_fn(|i| {
        let s = char::from(u8::try_from(i).expect("index out of u8 range")).to_string();
        &*Box::leak(s.into_boxed_str())
    })
});

/// Well-known names the engine looks up itself, known at compile time.
///
/// These never need to be interned, `StringId::from(StaticStrings::X)` is a constant.
#[repr(u16)]
#[derive(Debug, Clone, Copy, FromRepr, EnumString, IntoStaticStr, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    #[strum(serialize = "<module>")]
    Module,
    #[strum(serialize = "<unknown>")]
    Unknown,

    // ==========================
    // Dunder protocol names
    #[strum(serialize = "__init__")]
    DunderInit,
    #[strum(serialize = "__call__")]
    DunderCall,
    #[strum(serialize = "__iter__")]
    DunderIter,
    #[strum(serialize = "__next__")]
    DunderNext,
    #[strum(serialize = "__enter__")]
    DunderEnter,
    #[strum(serialize = "__exit__")]
    DunderExit,
    #[strum(serialize = "__len__")]
    DunderLen,
    #[strum(serialize = "__repr__")]
    DunderRepr,
    #[strum(serialize = "__str__")]
    DunderStr,
    #[strum(serialize = "__bool__")]
    DunderBool,
    #[strum(serialize = "__contains__")]
    DunderContains,
    #[strum(serialize = "__getitem__")]
    DunderGetitem,
    #[strum(serialize = "__eq__")]
    DunderEq,

    // ==========================
    // Object attributes
    #[strum(serialize = "__name__")]
    DunderName,
    #[strum(serialize = "__qualname__")]
    DunderQualname,
    #[strum(serialize = "__module__")]
    DunderModule,
    #[strum(serialize = "__class__")]
    DunderClass,
    #[strum(serialize = "__dict__")]
    DunderDict,
    #[strum(serialize = "__doc__")]
    DunderDoc,
    #[strum(serialize = "__mro__")]
    DunderMro,
    #[strum(serialize = "__bases__")]
    DunderBases,
    #[strum(serialize = "__defaults__")]
    DunderDefaults,
    #[strum(serialize = "__kwdefaults__")]
    DunderKwdefaults,
    #[strum(serialize = "__annotations__")]
    DunderAnnotations,
    #[strum(serialize = "__closure__")]
    DunderClosure,
    #[strum(serialize = "__code__")]
    DunderCode,
    #[strum(serialize = "__self__")]
    DunderSelf,
    #[strum(serialize = "__func__")]
    DunderFunc,
    #[strum(serialize = "__build_class__")]
    DunderBuildClass,
    #[strum(serialize = "__main__")]
    DunderMain,

    // ==========================
    // Exception attributes and methods
    Args,
    #[strum(serialize = "__cause__")]
    DunderCause,
    #[strum(serialize = "__context__")]
    DunderContext,
    #[strum(serialize = "__suppress_context__")]
    DunderSuppressContext,
    #[strum(serialize = "__traceback__")]
    DunderTraceback,
    WithTraceback,
    Value,

    // ==========================
    // Traceback attributes
    TbNext,
    TbLineno,
    TbLasti,

    // ==========================
    // Generator methods and attributes
    Send,
    Throw,
    Close,
    GiRunning,
    GiFrame,
    GiYieldfrom,
    GiCode,

    // ==========================
    // Code object attributes
    CoName,
    CoFilename,
    CoArgcount,
    CoFlags,

    // ==========================
    // List methods
    Append,
    Extend,
    Pop,
    Insert,
    Index,
    Count,
    Clear,
    Copy,

    // ==========================
    // Dict methods
    Get,
    Keys,
    Values,
    Items,
    Update,
    Setdefault,

    // ==========================
    // Str methods
    Join,
    Upper,
    Lower,
    Strip,
    Split,
    Startswith,
    Endswith,

    // ==========================
    // Range and slice attributes
    Start,
    Stop,
    Step,

    // ==========================
    // Keyword argument names understood by builtins
    Sep,
    End,
}

impl StaticStrings {
    /// Attempts to convert a `StringId` back to a `StaticStrings` variant.
    pub fn from_string_id(id: StringId) -> Option<Self> {
        let raw = id.0.checked_sub(STATIC_STRING_ID_OFFSET)?;
        Self::from_repr(u16::try_from(raw).ok()?)
    }
}

impl From<StaticStrings> for StringId {
    fn from(value: StaticStrings) -> Self {
        Self(value as u32 + STATIC_STRING_ID_OFFSET)
    }
}

/// Owner of every interned string.
///
/// Interning happens while code objects are loaded; during execution the table is only read,
/// for name lookups, error messages and repr output.
#[derive(Debug, Default, Clone)]
pub(crate) struct Interns {
    /// Maps strings to their indices for deduplication.
    string_map: AHashMap<String, StringId>,
    /// Storage for interned strings, indexed by `StringId - INTERN_STRING_ID_OFFSET`.
    strings: Vec<String>,
}

impl Interns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning its `StringId`.
    ///
    /// * If the string is a single ASCII character, returns the pre-interned id
    /// * If the string is a known static string, returns the pre-interned id
    /// * If the string was already interned, returns the existing id
    /// * Otherwise, stores the string and returns a new id
    pub fn intern(&mut self, s: &str) -> StringId {
        if s.len() == 1 && s.is_ascii() {
            StringId::from_ascii(s.as_bytes()[0])
        } else if let Ok(ss) = StaticStrings::from_str(s) {
            ss.into()
        } else {
            *self.string_map.entry(s.to_owned()).or_insert_with(|| {
                let raw = self.strings.len() + INTERN_STRING_ID_OFFSET;
                let id = StringId(raw.try_into().expect("StringId overflow"));
                self.strings.push(s.to_owned());
                id
            })
        }
    }

    /// Looks up a string by its `StringId`.
    ///
    /// # Panics
    ///
    /// Panics if the `StringId` was not produced by this interner.
    #[inline]
    pub fn get_str(&self, id: StringId) -> &str {
        if let Ok(c) = u8::try_from(id.index()) {
            if let Some(s) = ASCII_STRS.get(c as usize) {
                return s;
            }
        }
        if id.index() >= INTERN_STRING_ID_OFFSET {
            return &self.strings[id.index() - INTERN_STRING_ID_OFFSET];
        }
        let static_str = StaticStrings::from_string_id(id).expect("Invalid static string ID");
        static_str.into()
    }

    /// Finds the `StringId` of an already interned string.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        if s.len() == 1 && s.is_ascii() {
            return Some(StringId::from_ascii(s.as_bytes()[0]));
        }
        if let Ok(ss) = StaticStrings::from_str(s) {
            return Some(ss.into());
        }
        self.string_map.get(s).copied()
    }

    /// Number of strings interned beyond the pre-interned base set.
    #[cfg(test)]
    #[must_use]
    pub fn interned_string_count(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_strings_round_trip_through_string_ids() {
        let interns = Interns::new();
        let id: StringId = StaticStrings::DunderExit.into();
        assert_eq!(interns.get_str(id), "__exit__");
        assert_eq!(StaticStrings::from_string_id(id), Some(StaticStrings::DunderExit));
    }

    #[test]
    fn intern_deduplicates_and_skips_known_names() {
        let mut interns = Interns::new();
        let a = interns.intern("counter");
        let b = interns.intern("counter");
        assert_eq!(a, b);
        assert_eq!(interns.intern("send"), StaticStrings::Send.into());
        assert_eq!(interns.intern("x"), StringId::from_ascii(b'x'));
        assert_eq!(interns.interned_string_count(), 1, "only 'counter' needs storage");
        assert_eq!(interns.lookup("counter"), Some(a));
        assert_eq!(interns.lookup("missing"), None);
    }
}
