//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use crate::core::gadget::{Role, Schema, Size, Volume, VolumeStructure};

    /// GPT partition type GUIDs commonly found in gadgets
    const GPT_TYPES: &[&str] = &[
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4",
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B",
        "21686148-6449-6E6F-744E-656564454649",
    ];

    /// Generate a supported sector size
    pub fn sector_size() -> impl Strategy<Value = u64> {
        prop_oneof![Just(512u64), Just(4096u64)]
    }

    /// Generate a valid step name (lowercase words joined by hyphens)
    pub fn step_name() -> impl Strategy<Value = String> {
        "[a-z]{2,8}(-[a-z]{2,8}){0,2}"
    }

    /// Generate a list of unique step names
    pub fn step_names() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set(step_name(), 1..10)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    }

    /// Generate one structure with a GPT type and a 4 KiB aligned size
    fn gpt_structure() -> impl Strategy<Value = (VolumeStructure, bool)> {
        (
            "[a-z]{1,12}",
            prop::sample::select(GPT_TYPES),
            1u64..16 * 1024,
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(name, type_code, pages, explicit_offset, is_data)| {
                let structure = VolumeStructure {
                    name,
                    size: Some(Size(pages * 4096)),
                    type_code: type_code.to_string(),
                    role: if is_data { Role::SystemData } else { Role::None },
                    ..Default::default()
                };
                (structure, explicit_offset)
            })
    }

    /// Generate a non-overlapping GPT volume together with a sector size
    ///
    /// Some structures get explicit offsets placed right after the previous
    /// structure's sector-aligned end, the rest are laid out implicitly.
    pub fn gpt_volume() -> impl Strategy<Value = (Volume, u64)> {
        (
            prop::collection::vec(gpt_structure(), 0..6),
            sector_size(),
        )
            .prop_map(|(structures, sector_size)| {
                let mut next_offset = 1024 * 1024u64;
                let structures = structures
                    .into_iter()
                    .map(|(mut structure, explicit_offset)| {
                        if explicit_offset {
                            structure.offset = Some(Size(next_offset));
                        }
                        let size = structure.size.map_or(0, Size::bytes);
                        next_offset = (next_offset + size).div_ceil(sector_size) * sector_size;
                        structure
                    })
                    .collect();
                let volume = Volume {
                    name: "pc".to_string(),
                    schema: Schema::Gpt,
                    bootloader: None,
                    structures,
                };
                (volume, sector_size)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_step_names_are_unique(names in step_names()) {
            let mut sorted = names.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), names.len());
        }

        #[test]
        fn test_gpt_volume_generator_lays_out(
            (volume, _sector_size) in gpt_volume()
        ) {
            let layout = volume.layout().unwrap();
            for pair in layout.windows(2) {
                prop_assert!(pair[0].end() <= pair[1].offset);
            }
        }
    }
}
