use serde::{Deserialize, Serialize};

/// Transposition mode of a GEMM operand.
///
/// Canonically encoded as a single character (`n`, `t`, `c`).
/// Decoding never fails: anything that does not start with `t` or `c`
/// is treated as [`Transposition::Normal`].
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(from = "String", into = "&'static str")]
pub enum Transposition {
    #[default]
    Normal,
    Transposed,
    Conjugate,
}

/// Translate a transposition string into its mode.
///
/// Unrecognized strings (including the empty string) map to `Normal`.
/// This is lenient on purpose and may hide typos in parameter files.
#[must_use]
pub fn to_transpose_enum(t: &str) -> Transposition {
    match t.chars().next() {
        Some('t') => Transposition::Transposed,
        Some('c') => Transposition::Conjugate,
        _ => Transposition::Normal,
    }
}

/// Translate a transposition mode into its canonical string.
#[must_use]
pub fn from_transpose_enum(t: Transposition) -> &'static str {
    match t {
        Transposition::Normal => "n",
        Transposition::Transposed => "t",
        Transposition::Conjugate => "c",
    }
}

impl Transposition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        from_transpose_enum(self)
    }

    /// Whether the operand is read in transposed order.
    ///
    /// For real-valued scalars, conjugation is plain transposition.
    #[must_use]
    pub fn is_transposed(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl std::fmt::Display for Transposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Transposition {
    fn from(t: &str) -> Self {
        to_transpose_enum(t)
    }
}

impl From<String> for Transposition {
    fn from(t: String) -> Self {
        to_transpose_enum(&t)
    }
}

impl From<Transposition> for &'static str {
    fn from(t: Transposition) -> Self {
        from_transpose_enum(t)
    }
}

#[derive(
    Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Emulated device backed by host threads.
    #[default]
    Host,
    Cpu,
    Gpu,
    Accelerator,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Device properties.
///
/// Queried once when the device is created and never change afterwards.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Properties {
    pub name: String,
    pub kind: DeviceKind,
    /// Maximum number of work items per work group.
    pub work_group_size: usize,
    /// Number of compute units executing kernels concurrently.
    pub compute_units: usize,
    /// Whether the device has dedicated local (shared) memory.
    pub local_memory: bool,
    /// Local memory per work group in bytes.
    pub local_memory_bytes: usize,
    /// Global memory capacity in bytes.
    pub global_memory_bytes: u64,
}

impl Properties {
    /// Properties of the host-emulated device.
    #[must_use]
    pub fn host() -> Self {
        Self {
            name: "host".to_string(),
            kind: DeviceKind::Host,
            work_group_size: 256,
            compute_units: num_cpus::get().max(1),
            local_memory: true,
            local_memory_bytes: 64 * 1024,
            global_memory_bytes: 1 << 30,
        }
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::{from_transpose_enum, to_transpose_enum, Transposition};
    use strum::IntoEnumIterator;

    #[test]
    fn transpose_round_trip() {
        for s in ["n", "t", "c"] {
            assert_eq!(from_transpose_enum(to_transpose_enum(s)), s);
        }
        for t in Transposition::iter() {
            assert_eq!(to_transpose_enum(from_transpose_enum(t)), t);
        }
    }

    #[test]
    fn unrecognized_transpose_defaults_to_normal() {
        for s in ["", "x", "N", "T", " t", "normal"] {
            assert_eq!(to_transpose_enum(s), Transposition::Normal, "{s:?}");
            assert_eq!(from_transpose_enum(to_transpose_enum(s)), "n");
        }
        assert_eq!(to_transpose_enum("transposed"), Transposition::Transposed);
        assert_eq!(to_transpose_enum("conj"), Transposition::Conjugate);
    }

    #[test]
    fn transpose_serde_uses_one_char_encoding() -> Result<(), serde_yaml::Error> {
        let encoded = serde_yaml::to_string(&vec![Transposition::Transposed])?;
        assert_eq!(encoded.trim(), "- t");
        let decoded: Vec<Transposition> = serde_yaml::from_str("[n, c, bogus]")?;
        assert_eq!(
            decoded,
            vec![
                Transposition::Normal,
                Transposition::Conjugate,
                Transposition::Normal
            ]
        );
        Ok(())
    }

    #[test]
    fn partial_properties_fill_defaults() -> Result<(), serde_yaml::Error> {
        let props: super::Properties =
            serde_yaml::from_str("kind: gpu\nglobal_memory_bytes: 1024\n")?;
        assert_eq!(props.kind, super::DeviceKind::Gpu);
        assert_eq!(props.global_memory_bytes, 1024);
        assert_eq!(props.work_group_size, 256);
        Ok(())
    }
}
