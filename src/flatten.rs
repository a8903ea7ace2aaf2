//! Metadata flattener: turns a DICOM dataset into the nested name→value
//! mapping written as the JSON sidecar next to every converted image.
//!
//! Scalars become strings, sequences become arrays of nested mappings,
//! and the bulk pixel payload is skipped.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dicom::core::Tag;
use dicom::core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom::core::header::Header;
use dicom::core::value::Value as DicomValue;
use dicom::dictionary_std::{StandardDataDictionary, tags};
use dicom::object::mem::InMemElement;
use serde_json::{Map, Value, json};

/// Flatten a dataset into a name→value mapping.
///
/// Standard attributes resolve to their registered display name;
/// vendor-private attributes get a name derived from the raw tag label.
/// Every non-pixel attribute of the source appears in the result.
pub fn flatten_dataset<'a>(
    elements: impl IntoIterator<Item = &'a InMemElement>,
) -> Map<String, Value> {
    let mut output = Map::new();
    for element in elements {
        let tag = element.tag();
        if tag == tags::PIXEL_DATA {
            continue;
        }
        let name = display_name(tag);
        let value = match element.value() {
            DicomValue::Sequence(seq) => {
                let items: Vec<Value> = seq
                    .items()
                    .iter()
                    .map(|item| Value::Object(flatten_dataset(item.iter())))
                    .collect();
                Value::Array(items)
            }
            // Encapsulated pixel data is bulk payload as well.
            DicomValue::PixelSequence(_) => continue,
            DicomValue::Primitive(_) => {
                let text = element
                    .to_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("{:?}", element.value()));
                Value::String(text)
            }
        };
        output.insert(name, value);
    }
    output
}

/// Write the flattened dataset as a pretty-printed JSON sidecar.
pub fn write_sidecar<'a>(
    elements: impl IntoIterator<Item = &'a InMemElement>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(&json!(flatten_dataset(elements)))?;
    fs::write(path, content).with_context(|| format!("failed to write sidecar {:?}", path))?;
    Ok(())
}

/// Human-readable attribute name: the dictionary alias for registered
/// tags, otherwise a name derived from the raw tag label by stripping
/// parentheses and title-casing.
fn display_name(tag: Tag) -> String {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias().to_string())
        .unwrap_or_else(|| vendor_tag_name(tag))
}

fn vendor_tag_name(tag: Tag) -> String {
    let raw = format!("{}", tag);
    let stripped: String = raw.chars().filter(|c| *c != '(' && *c != ')').collect();
    title_case(&stripped)
}

fn title_case(label: &str) -> String {
    label
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::{DataSetSequence, PrimitiveValue};
    use dicom::core::{DataElement, VR};
    use dicom::object::InMemDicomObject;

    fn sample_object() -> InMemDicomObject {
        let item = InMemDicomObject::from_element_iter([DataElement::new(
            tags::CODE_MEANING,
            VR::LO,
            "meaning",
        )]);
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_ID, VR::LO, "01"),
            DataElement::new(tags::MODALITY, VR::CS, "OP"),
            DataElement::new(
                tags::PROCEDURE_CODE_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![item]),
            ),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::Empty),
        ])
    }

    #[test]
    fn scalars_flatten_to_strings_under_display_names() {
        let map = flatten_dataset(sample_object().iter());
        assert_eq!(map.get("PatientID"), Some(&Value::String("01".into())));
        assert_eq!(map.get("Modality"), Some(&Value::String("OP".into())));
    }

    #[test]
    fn sequences_flatten_to_arrays_of_mappings() {
        let map = flatten_dataset(sample_object().iter());
        let seq = map
            .get("ProcedureCodeSequence")
            .and_then(Value::as_array)
            .expect("sequence value");
        assert_eq!(seq.len(), 1);
        assert_eq!(
            seq[0].get("CodeMeaning"),
            Some(&Value::String("meaning".into()))
        );
    }

    #[test]
    fn pixel_data_is_skipped() {
        let map = flatten_dataset(sample_object().iter());
        assert!(!map.contains_key("PixelData"));
    }

    #[test]
    fn key_set_matches_non_pixel_attribute_names() {
        let map = flatten_dataset(sample_object().iter());
        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["Modality", "PatientID", "ProcedureCodeSequence"]
        );
    }

    #[test]
    fn vendor_tags_get_derived_names() {
        let name = display_name(Tag(0x0009, 0x0010));
        assert!(!name.contains('('));
        assert!(!name.contains(')'));
        assert!(!name.is_empty());
    }

    #[test]
    fn title_case_capitalizes_words() {
        assert_eq!(title_case("private creator"), "Private Creator");
    }

    #[test]
    fn sidecar_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        write_sidecar(sample_object().iter(), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        let keys: Vec<&str> = parsed.as_object().unwrap().keys().map(String::as_str).collect();
        assert!(keys.contains(&"PatientID"));
        assert!(!keys.contains(&"PixelData"));
    }
}
