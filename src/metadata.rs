//! Test metadata: calibration and equipment records.
//!
//! The records are filled in by the operator before a test. The acquisition
//! loop refuses to start until a [`MetadataValidator`] reports them complete.
//! The default validator, [`RequiredFields`], requires every field below to be
//! non-blank.
//!
//! Metadata can be loaded from a TOML file:
//!
//! ```toml
//! [calibration]
//! load_cell_part_no = "LC-50T"
//! # ...
//!
//! [equipment]
//! equipment_name = "Chain sling"
//! rated_load_capacity = "5"
//! proof_load_percentage = "200"
//! # ...
//! ```

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Load cell and display calibration details.
///
/// Preserved across "clear data" so consecutive tests on the same rig do not
/// need re-entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationRecord {
    /// Load cell part number
    pub load_cell_part_no: String,
    /// Load cell serial number
    pub load_cell_serial_no: String,
    /// Load cell model number
    pub load_cell_model_no: String,
    /// Date of the last load cell calibration
    pub load_cell_last_calibration_date: String,
    /// Load cell calibration valid-until
    pub load_cell_calibration_validity: String,
    /// Display part number
    pub display_part_no: String,
    /// Display model number
    pub display_model_no: String,
    /// Display serial number
    pub display_serial_no: String,
    /// Date of the last display calibration
    pub display_last_calibration_date: String,
    /// Display calibration valid-until
    pub display_calibration_validity: String,
}

/// Equipment under test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentRecord {
    /// Equipment name
    pub equipment_name: String,
    /// Type of equipment
    pub type_of_equipment: String,
    /// Part number
    pub equipment_part_no: String,
    /// Serial number
    pub equipment_serial_no: String,
    /// Model number
    pub equipment_model_no: String,
    /// Year of manufacture
    pub year_of_manufacture: String,
    /// Test date
    pub test_date: String,
    /// Rated load capacity in tons
    pub rated_load_capacity: String,
    /// Proof load as a percentage of rated capacity
    pub proof_load_percentage: String,
    /// Test location
    pub location: String,
    /// Person performing the test
    pub tested_by: String,
    /// Person certifying the test
    pub certified_by: String,
}

/// Complete metadata record for one test session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestMetadata {
    /// Calibration details
    pub calibration: CalibrationRecord,
    /// Equipment under test
    pub equipment: EquipmentRecord,
}

impl CalibrationRecord {
    fn fields(&self) -> [(&'static str, &str); 10] {
        [
            ("load_cell_part_no", self.load_cell_part_no.as_str()),
            ("load_cell_serial_no", self.load_cell_serial_no.as_str()),
            ("load_cell_model_no", self.load_cell_model_no.as_str()),
            (
                "load_cell_last_calibration_date",
                self.load_cell_last_calibration_date.as_str(),
            ),
            (
                "load_cell_calibration_validity",
                self.load_cell_calibration_validity.as_str(),
            ),
            ("display_part_no", self.display_part_no.as_str()),
            ("display_model_no", self.display_model_no.as_str()),
            ("display_serial_no", self.display_serial_no.as_str()),
            (
                "display_last_calibration_date",
                self.display_last_calibration_date.as_str(),
            ),
            (
                "display_calibration_validity",
                self.display_calibration_validity.as_str(),
            ),
        ]
    }
}

impl EquipmentRecord {
    fn fields(&self) -> [(&'static str, &str); 12] {
        [
            ("equipment_name", self.equipment_name.as_str()),
            ("type_of_equipment", self.type_of_equipment.as_str()),
            ("equipment_part_no", self.equipment_part_no.as_str()),
            ("equipment_serial_no", self.equipment_serial_no.as_str()),
            ("equipment_model_no", self.equipment_model_no.as_str()),
            ("year_of_manufacture", self.year_of_manufacture.as_str()),
            ("test_date", self.test_date.as_str()),
            ("rated_load_capacity", self.rated_load_capacity.as_str()),
            ("proof_load_percentage", self.proof_load_percentage.as_str()),
            ("location", self.location.as_str()),
            ("tested_by", self.tested_by.as_str()),
            ("certified_by", self.certified_by.as_str()),
        ]
    }
}

impl TestMetadata {
    /// Read metadata from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&text)?)
    }

    /// Names of required fields that are blank, calibration first.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.calibration
            .fields()
            .into_iter()
            .chain(self.equipment.fields())
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// True when no required field is blank.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Reset the equipment record, keeping calibration.
    pub fn clear_equipment(&mut self) {
        self.equipment = EquipmentRecord::default();
    }

    /// Proof load in tons: rated capacity × percentage / 100, to 0.1 t.
    ///
    /// # Errors
    ///
    /// [`DaqError::InvalidMetadata`] when either value is not a positive number.
    pub fn proof_load_tons(&self) -> AppResult<f64> {
        let rated = parse_positive("rated_load_capacity", &self.equipment.rated_load_capacity)?;
        let pct = parse_positive(
            "proof_load_percentage",
            &self.equipment.proof_load_percentage,
        )?;
        Ok((rated * pct / 100.0 * 10.0).round() / 10.0)
    }
}

fn parse_positive(field: &str, value: &str) -> AppResult<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(DaqError::InvalidMetadata(format!(
            "{} must be a positive number, got '{}'",
            field, value
        ))),
    }
}

/// Decides whether a session's metadata allows acquisition to start.
pub trait MetadataValidator: Send + Sync {
    /// True when acquisition may start.
    fn is_session_metadata_complete(&self, metadata: &TestMetadata) -> bool;
}

/// Every calibration and equipment field must be non-blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFields;

impl MetadataValidator for RequiredFields {
    fn is_session_metadata_complete(&self, metadata: &TestMetadata) -> bool {
        metadata.is_complete()
    }
}

impl<F> MetadataValidator for F
where
    F: Fn(&TestMetadata) -> bool + Send + Sync,
{
    fn is_session_metadata_complete(&self, metadata: &TestMetadata) -> bool {
        self(metadata)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A fully populated record.
    pub fn complete_metadata() -> TestMetadata {
        TestMetadata {
            calibration: CalibrationRecord {
                load_cell_part_no: "LC-50T".into(),
                load_cell_serial_no: "SN-1001".into(),
                load_cell_model_no: "S-BEAM".into(),
                load_cell_last_calibration_date: "2024-01-15".into(),
                load_cell_calibration_validity: "2025-01-14".into(),
                display_part_no: "DSP-7".into(),
                display_model_no: "D700".into(),
                display_serial_no: "SN-2002".into(),
                display_last_calibration_date: "2024-01-15".into(),
                display_calibration_validity: "2025-01-14".into(),
            },
            equipment: EquipmentRecord {
                equipment_name: "Chain sling".into(),
                type_of_equipment: "Lifting".into(),
                equipment_part_no: "CS-4".into(),
                equipment_serial_no: "SN-3003".into(),
                equipment_model_no: "G80".into(),
                year_of_manufacture: "2021".into(),
                test_date: "2024-05-01".into(),
                rated_load_capacity: "5".into(),
                proof_load_percentage: "200".into(),
                location: "Bay 2".into(),
                tested_by: "A. Tester".into(),
                certified_by: "B. Inspector".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::complete_metadata;
    use super::*;

    #[test]
    fn empty_metadata_reports_all_fields() {
        let metadata = TestMetadata::default();
        assert_eq!(metadata.missing_fields().len(), 22);
        assert!(!RequiredFields.is_session_metadata_complete(&metadata));
    }

    #[test]
    fn whitespace_counts_as_missing() {
        let mut metadata = complete_metadata();
        metadata.equipment.tested_by = "   ".into();
        assert_eq!(metadata.missing_fields(), vec!["tested_by"]);
        assert!(!metadata.is_complete());
    }

    #[test]
    fn complete_metadata_passes() {
        assert!(RequiredFields.is_session_metadata_complete(&complete_metadata()));
    }

    #[test]
    fn closure_validator() {
        let always = |_: &TestMetadata| true;
        assert!(always.is_session_metadata_complete(&TestMetadata::default()));
    }

    #[test]
    fn proof_load_rounds_to_tenth() {
        let mut metadata = complete_metadata();
        assert_eq!(metadata.proof_load_tons().unwrap(), 10.0);

        metadata.equipment.rated_load_capacity = "3.33".into();
        metadata.equipment.proof_load_percentage = "125".into();
        assert_eq!(metadata.proof_load_tons().unwrap(), 4.2);
    }

    #[test]
    fn proof_load_rejects_non_positive() {
        let mut metadata = complete_metadata();
        metadata.equipment.proof_load_percentage = "0".into();
        assert!(matches!(
            metadata.proof_load_tons(),
            Err(DaqError::InvalidMetadata(_))
        ));
        metadata.equipment.proof_load_percentage = "abc".into();
        assert!(metadata.proof_load_tons().is_err());
    }

    #[test]
    fn clear_equipment_keeps_calibration() {
        let mut metadata = complete_metadata();
        metadata.clear_equipment();
        assert_eq!(metadata.calibration, complete_metadata().calibration);
        assert_eq!(metadata.equipment, EquipmentRecord::default());
    }

    #[test]
    fn loads_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.toml");
        std::fs::write(
            &path,
            "[equipment]\nequipment_name = \"Shackle\"\nrated_load_capacity = \"12\"\n",
        )
        .unwrap();

        let metadata = TestMetadata::from_toml_file(&path).unwrap();
        assert_eq!(metadata.equipment.equipment_name, "Shackle");
        assert_eq!(metadata.equipment.rated_load_capacity, "12");
        assert!(metadata.calibration.load_cell_part_no.is_empty());
    }
}
