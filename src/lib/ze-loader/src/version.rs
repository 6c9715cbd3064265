//! API version encoding and component versions.

use std::{ffi::c_char, fmt::Display};

/// A `(major, minor)` API version, encoded the way the C API encodes it: major in the upper 16
/// bits, minor in the lower 16 bits. Ordering compares the encoded value, so it matches the
/// numeric comparison drivers perform.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ApiVersion(u32);

impl ApiVersion {
    pub const V1_0: Self = Self::new(1, 0);
    pub const V1_1: Self = Self::new(1, 1);
    pub const V1_2: Self = Self::new(1, 2);
    pub const V1_3: Self = Self::new(1, 3);
    pub const V1_4: Self = Self::new(1, 4);
    pub const V1_5: Self = Self::new(1, 5);
    pub const V1_6: Self = Self::new(1, 6);
    pub const V1_7: Self = Self::new(1, 7);
    pub const V1_8: Self = Self::new(1, 8);
    pub const V1_9: Self = Self::new(1, 9);
    pub const V1_10: Self = Self::new(1, 10);
    pub const V1_11: Self = Self::new(1, 11);
    pub const V1_12: Self = Self::new(1, 12);
    pub const V1_13: Self = Self::new(1, 13);
    pub const V1_14: Self = Self::new(1, 14);

    /// The newest version this loader knows about.
    pub const CURRENT: Self = Self::V1_14;

    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | (minor as u32))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn minor(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Every published version up to and including [ApiVersion::CURRENT].
    pub fn known() -> impl Iterator<Item = ApiVersion> {
        (0..=Self::CURRENT.minor()).map(|minor| Self::new(1, minor))
    }
}

impl Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Length of the name field of [ZelComponentVersion], including the terminator.
pub const COMPONENT_NAME_LEN: usize = 64;

/// `zel_version_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZelVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

/// `zel_component_version_t`: the C layout of a component version.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ZelComponentVersion {
    pub component_name: [c_char; COMPONENT_NAME_LEN],
    pub spec_version: ApiVersion,
    pub component_lib_version: ZelVersion,
}

static_assertions::assert_eq_size!(ZelComponentVersion, [u8; COMPONENT_NAME_LEN + 16]);

impl Default for ZelComponentVersion {
    fn default() -> Self {
        Self {
            component_name: [0; COMPONENT_NAME_LEN],
            spec_version: ApiVersion::default(),
            component_lib_version: ZelVersion::default(),
        }
    }
}

impl ZelComponentVersion {
    /// Build the C form. Names longer than the field are truncated; the name is always
    /// terminated.
    pub fn new(name: &str, spec_version: ApiVersion, lib: (u32, u32, u32)) -> Self {
        let mut v = Self {
            spec_version,
            component_lib_version: ZelVersion {
                major: lib.0 as i32,
                minor: lib.1 as i32,
                patch: lib.2 as i32,
            },
            ..Default::default()
        };
        for (dst, src) in v
            .component_name
            .iter_mut()
            .zip(name.bytes().take(COMPONENT_NAME_LEN - 1))
        {
            *dst = src as c_char;
        }
        v
    }
}

/// The version of one loader component: the loader itself or a loaded layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentVersion {
    pub name: String,
    pub spec_version: ApiVersion,
    pub library_version: (u32, u32, u32),
}

impl ComponentVersion {
    /// The loader's own version.
    pub fn loader() -> Self {
        let part = |s: &str| s.parse::<u32>().unwrap_or(0);
        Self {
            name: "loader".to_string(),
            spec_version: ApiVersion::CURRENT,
            library_version: (
                part(env!("CARGO_PKG_VERSION_MAJOR")),
                part(env!("CARGO_PKG_VERSION_MINOR")),
                part(env!("CARGO_PKG_VERSION_PATCH")),
            ),
        }
    }

    pub fn to_c(&self) -> ZelComponentVersion {
        ZelComponentVersion::new(&self.name, self.spec_version, self.library_version)
    }
}

impl From<&ZelComponentVersion> for ComponentVersion {
    fn from(value: &ZelComponentVersion) -> Self {
        let name = value
            .component_name
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8 as char)
            .collect();
        let lib = value.component_lib_version;
        Self {
            name,
            spec_version: value.spec_version,
            library_version: (lib.major as u32, lib.minor as u32, lib.patch as u32),
        }
    }
}

impl Display for ComponentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.library_version;
        write!(
            f,
            "{} {}.{}.{} (API {})",
            self.name, major, minor, patch, self.spec_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        let v = ApiVersion::new(1, 14);
        assert_eq!(v.raw(), 0x0001_000e);
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 14);
        assert_eq!(ApiVersion::from_raw(0x0001_000e), v);
        assert_eq!(v.to_string(), "1.14");
    }

    #[test]
    fn ordering() {
        assert!(ApiVersion::new(0, 91) < ApiVersion::V1_0);
        assert!(ApiVersion::V1_9 < ApiVersion::V1_10);
        assert!(ApiVersion::new(2, 0) > ApiVersion::CURRENT);
        assert_eq!(ApiVersion::known().count(), 15);
        assert_eq!(ApiVersion::known().last(), Some(ApiVersion::CURRENT));
    }

    #[test]
    fn component_names() {
        let long = "x".repeat(100);
        let c = ZelComponentVersion::new(&long, ApiVersion::V1_2, (1, 2, 3));
        assert_eq!(c.component_name[COMPONENT_NAME_LEN - 1], 0);
        let back = ComponentVersion::from(&c);
        assert_eq!(back.name.len(), COMPONENT_NAME_LEN - 1);
        assert_eq!(back.library_version, (1, 2, 3));

        let loader = ComponentVersion::loader();
        assert_eq!(ComponentVersion::from(&loader.to_c()), loader);
        assert!(loader.to_string().starts_with("loader "));
    }
}
