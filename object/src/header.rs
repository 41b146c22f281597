/// Object type tag kept in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Instance = 0,
    ObjectArray,
    ByteArray,
    Str,
}

impl ObjectType {
    /// Whether objects of this type can hold references.
    #[inline(always)]
    pub const fn has_references(self) -> bool {
        matches!(self, ObjectType::Instance | ObjectType::ObjectArray)
    }
}

/// Collector bookkeeping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct HeaderFlags(pub u8);

impl HeaderFlags {
    pub const NONE: Self = Self(0);
    pub const MARKED: Self = Self(1 << 0);
    /// Never reclaimed, even when unreachable.
    pub const PINNED: Self = Self(1 << 1);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[inline(always)]
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    #[inline(always)]
    pub const fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }
}

/// Per-object metadata. The simulated heap keeps it next to the object's
/// body instead of in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    object_type: ObjectType,
    flags: HeaderFlags,
    /// Number of collections survived.
    age: u8,
    size: usize,
}

impl Header {
    pub fn new(object_type: ObjectType, size: usize) -> Self {
        Self {
            object_type,
            flags: HeaderFlags::NONE,
            age: 0,
            size,
        }
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Allocated size in bytes, alignment padding included.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&mut self, flag: HeaderFlags) {
        self.flags = self.flags.with(flag);
    }

    #[inline(always)]
    pub fn remove_flag(&mut self, flag: HeaderFlags) {
        self.flags = self.flags.without(flag);
    }

    // ── age ────────────────────────────────────────────────────────

    #[inline(always)]
    pub fn age(&self) -> u8 {
        self.age
    }

    #[inline(always)]
    pub fn increment_age(&mut self) -> u8 {
        self.age = self.age.saturating_add(1);
        self.age
    }
}
