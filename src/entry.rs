use std::time::SystemTime;

/// Index of an entry in the virtual tree. The root is not an entry; parent
/// references are `Option<EntryId>` with `None` meaning the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntryId(pub(crate) u32);

impl EntryId {
    pub(crate) fn new(index: usize) -> EntryId {
        EntryId(index as u32)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// File attribute bits as containers commonly store them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes(u32);

impl Attributes {
    pub const READ_ONLY: Attributes = Attributes(0x0000_0001);
    pub const DIRECTORY: Attributes = Attributes(0x0000_0010);

    pub fn from_bits(bits: u32) -> Attributes {
        Attributes(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Attributes) {
        self.0 |= other.0;
    }

    pub fn is_directory(self) -> bool {
        self.contains(Attributes::DIRECTORY)
    }

    pub fn is_read_only(self) -> bool {
        self.contains(Attributes::READ_ONLY)
    }
}

/// One node of the virtual tree, file or directory alike. Directories carry
/// zero sizes unless the codec explicitly reported them.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Leaf name; never contains a separator.
    pub name: String,
    pub parent: Option<EntryId>,
    pub attributes: Attributes,
    pub size: u64,
    pub packed_size: u64,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    /// The codec's flat item index this entry came from; `None` for
    /// directories synthesized from path structure alone.
    pub codec_item: Option<u32>,
}

impl Entry {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub(crate) fn synthesized_directory(name: String, parent: Option<EntryId>) -> Entry {
        Entry {
            name,
            parent,
            attributes: Attributes::DIRECTORY,
            size: 0,
            packed_size: 0,
            created: None,
            modified: None,
            accessed: None,
            codec_item: None,
        }
    }
}
