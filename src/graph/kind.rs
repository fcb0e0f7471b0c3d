//! Target-type hierarchy, represented as runtime data (§9).
//!
//! Rather than host-language inheritance, each target type carries an id,
//! a base-type id (for walking a type's base chain during rule selection,
//! §4.3), and flag bits. Polymorphic dispatch is id comparison up the base
//! chain, exactly as the design notes prescribe.

/// Flag bits carried by a target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeFlags {
    /// The type is a group whose member list may grow after first match
    /// (ad hoc groups with `dyn_members`, §4.3 step 1).
    pub dyn_members: bool,
    /// The type is "see-through": rule selection on a member transparently
    /// considers the enclosing group.
    pub see_through: bool,
}

/// A target's kind: file-ish artifact, alias, directory marker, or one of
/// the C/C++-rule-specific synthesized variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A plain file target with no special on-disk role.
    File,
    /// An alias target (forwards to its prerequisites, produces nothing).
    Alias,
    /// A directory marker (`fsdir{}`).
    Dir,
    /// An explicit group target (owns an ordered member list).
    Group,
    /// A member of an ad hoc group, sharing the group's matched rule.
    AdhocMember,
    /// A C/C++ source file (`cxx{}`, `c{}`, …).
    Source,
    /// A module-interface source (`mxx{}`).
    ModuleInterfaceSource,
    /// A header-unit-eligible header (`hxx{}`).
    Header,
    /// A compiled object file (`obj{}`/`objs{}`).
    Object,
    /// A binary module interface (`bmi{}`/`bmis{}`).
    Bmi,
    /// An executable link target.
    Exe,
    /// A static library link target.
    StaticLib,
    /// A shared library link target.
    SharedLib,
    /// A utility library (thin-archive semantics, §4.7 step 3).
    UtilityLib,
    /// A pkg-config stub member (`pca{}`/`pcs{}`/`pc{}`).
    PkgConfig,
}

impl TargetKind {
    /// Returns this type's immediate base type, or `None` at the root.
    ///
    /// Walking `base()` repeatedly implements the "type's base chain"
    /// lookup used by rule-map scanning (§4.3 step 4) and by
    /// [`Self::is_a`].
    #[must_use]
    pub const fn base(self) -> Option<Self> {
        match self {
            Self::Object | Self::Bmi => Some(Self::File),
            Self::Source | Self::ModuleInterfaceSource | Self::Header => Some(Self::File),
            Self::StaticLib | Self::SharedLib | Self::UtilityLib => Some(Self::File),
            Self::Exe => Some(Self::File),
            Self::PkgConfig => Some(Self::File),
            Self::AdhocMember => Some(Self::File),
            Self::File | Self::Alias | Self::Dir | Self::Group => None,
        }
    }

    /// Returns `true` if `self` is `other` or derives from it, walking the
    /// base chain.
    #[must_use]
    pub fn is_a(self, other: Self) -> bool {
        let mut cur = self;
        loop {
            if cur == other {
                return true;
            }
            match cur.base() {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    /// Flag bits for this type.
    #[must_use]
    pub const fn flags(self) -> TypeFlags {
        match self {
            Self::Group => TypeFlags {
                dyn_members: true,
                see_through: false,
            },
            Self::AdhocMember => TypeFlags {
                dyn_members: false,
                see_through: true,
            },
            _ => TypeFlags {
                dyn_members: false,
                see_through: false,
            },
        }
    }

    /// Returns `true` for the library-ish link-target kinds (§4.7).
    #[must_use]
    pub const fn is_library(self) -> bool {
        matches!(self, Self::StaticLib | Self::SharedLib | Self::UtilityLib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_is_a_file() {
        assert!(TargetKind::Object.is_a(TargetKind::File));
        assert!(!TargetKind::File.is_a(TargetKind::Object));
    }

    #[test]
    fn group_has_dyn_members_flag() {
        assert!(TargetKind::Group.flags().dyn_members);
        assert!(!TargetKind::File.flags().dyn_members);
    }
}
