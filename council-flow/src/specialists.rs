//! Closed set of council roles and their display metadata.
//!
//! The wire label of each role (`"Gemini"`, `"Internal Medicine"`, ...) is what
//! the oracle is asked to choose from and what callers send back when
//! confirming a panel. `Orchestrator` is the chair and never sits on a panel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CouncilError;

/// Display metadata for one council role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpecialistInfo {
    pub name: &'static str,
    pub specialty: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialistRole {
    #[serde(rename = "Gemini")]
    Cardiologist,
    #[serde(rename = "Claude")]
    Neurologist,
    #[serde(rename = "GPT-4o")]
    Radiologist,
    #[serde(rename = "Llama 3")]
    Oncologist,
    #[serde(rename = "Grok")]
    Endocrinologist,
    #[serde(rename = "Allergist")]
    Allergist,
    #[serde(rename = "Anesthesiology")]
    Anesthesiologist,
    #[serde(rename = "Dermatologist")]
    Dermatologist,
    #[serde(rename = "Emergency")]
    Emergency,
    #[serde(rename = "Family Medicine")]
    FamilyMedicine,
    #[serde(rename = "Gastroenterologist")]
    Gastroenterologist,
    #[serde(rename = "Geneticist")]
    Geneticist,
    #[serde(rename = "Geriatrician")]
    Geriatrician,
    #[serde(rename = "Hematologist")]
    Hematologist,
    #[serde(rename = "Infectious")]
    Infectious,
    #[serde(rename = "Internal Medicine")]
    InternalMedicine,
    #[serde(rename = "Nephrologist")]
    Nephrologist,
    #[serde(rename = "ObGyn")]
    ObGyn,
    #[serde(rename = "Ophthalmologist")]
    Ophthalmologist,
    #[serde(rename = "Orthopedic")]
    Orthopedic,
    #[serde(rename = "Otolaryngologist")]
    Otolaryngologist,
    #[serde(rename = "Pathologist")]
    Pathologist,
    #[serde(rename = "Pediatrician")]
    Pediatrician,
    #[serde(rename = "Pharmacologist")]
    Pharmacologist,
    #[serde(rename = "Physiatrist")]
    Physiatrist,
    #[serde(rename = "Plastic Surgeon")]
    PlasticSurgeon,
    #[serde(rename = "Psychiatrist")]
    Psychiatrist,
    #[serde(rename = "Pulmonologist")]
    Pulmonologist,
    #[serde(rename = "Rheumatologist")]
    Rheumatologist,
    #[serde(rename = "Surgeon")]
    Surgeon,
    #[serde(rename = "Urologist")]
    Urologist,
    #[serde(rename = "Neonatologist")]
    Neonatologist,
    #[serde(rename = "Neurosurgeon")]
    Neurosurgeon,
    #[serde(rename = "Cardiothoracic Surgeon")]
    CardiothoracicSurgeon,
    #[serde(rename = "Vascular Surgeon")]
    VascularSurgeon,
    #[serde(rename = "Traumatologist")]
    Traumatologist,
    #[serde(rename = "Toxicologist")]
    Toxicologist,
    #[serde(rename = "Sports Medicine")]
    SportsMedicine,
    #[serde(rename = "Sleep Medicine")]
    SleepMedicine,
    #[serde(rename = "Pain Management")]
    PainManagement,
    #[serde(rename = "Nutritionist")]
    Nutritionist,
    #[serde(rename = "Immunologist")]
    Immunologist,
    #[serde(rename = "Hepatologist")]
    Hepatologist,
    #[serde(rename = "Epidemiologist")]
    Epidemiologist,
    #[serde(rename = "Dentist")]
    Dentist,
    #[serde(rename = "Maxillofacial")]
    Maxillofacial,
    #[serde(rename = "Proctologist")]
    Proctologist,
    #[serde(rename = "Mammologist")]
    Mammologist,
    #[serde(rename = "Phthisiatrician")]
    Phthisiatrician,
    #[serde(rename = "Narcologist")]
    Narcologist,
    #[serde(rename = "Psychotherapist")]
    Psychotherapist,
    #[serde(rename = "Sexologist")]
    Sexologist,
    #[serde(rename = "Vertebrologist")]
    Vertebrologist,
    #[serde(rename = "Orchestrator")]
    Orchestrator,
}

impl SpecialistRole {
    /// Every role including the chair, in catalogue order
    pub const ALL: [SpecialistRole; 54] = [
        SpecialistRole::Cardiologist,
        SpecialistRole::Neurologist,
        SpecialistRole::Radiologist,
        SpecialistRole::Oncologist,
        SpecialistRole::Endocrinologist,
        SpecialistRole::Allergist,
        SpecialistRole::Anesthesiologist,
        SpecialistRole::Dermatologist,
        SpecialistRole::Emergency,
        SpecialistRole::FamilyMedicine,
        SpecialistRole::Gastroenterologist,
        SpecialistRole::Geneticist,
        SpecialistRole::Geriatrician,
        SpecialistRole::Hematologist,
        SpecialistRole::Infectious,
        SpecialistRole::InternalMedicine,
        SpecialistRole::Nephrologist,
        SpecialistRole::ObGyn,
        SpecialistRole::Ophthalmologist,
        SpecialistRole::Orthopedic,
        SpecialistRole::Otolaryngologist,
        SpecialistRole::Pathologist,
        SpecialistRole::Pediatrician,
        SpecialistRole::Pharmacologist,
        SpecialistRole::Physiatrist,
        SpecialistRole::PlasticSurgeon,
        SpecialistRole::Psychiatrist,
        SpecialistRole::Pulmonologist,
        SpecialistRole::Rheumatologist,
        SpecialistRole::Surgeon,
        SpecialistRole::Urologist,
        SpecialistRole::Neonatologist,
        SpecialistRole::Neurosurgeon,
        SpecialistRole::CardiothoracicSurgeon,
        SpecialistRole::VascularSurgeon,
        SpecialistRole::Traumatologist,
        SpecialistRole::Toxicologist,
        SpecialistRole::SportsMedicine,
        SpecialistRole::SleepMedicine,
        SpecialistRole::PainManagement,
        SpecialistRole::Nutritionist,
        SpecialistRole::Immunologist,
        SpecialistRole::Hepatologist,
        SpecialistRole::Epidemiologist,
        SpecialistRole::Dentist,
        SpecialistRole::Maxillofacial,
        SpecialistRole::Proctologist,
        SpecialistRole::Mammologist,
        SpecialistRole::Phthisiatrician,
        SpecialistRole::Narcologist,
        SpecialistRole::Psychotherapist,
        SpecialistRole::Sexologist,
        SpecialistRole::Vertebrologist,
        SpecialistRole::Orchestrator,
    ];

    /// Label used on the wire and in the panel-selection enum
    pub fn label(&self) -> &'static str {
        match self {
            SpecialistRole::Cardiologist => "Gemini",
            SpecialistRole::Neurologist => "Claude",
            SpecialistRole::Radiologist => "GPT-4o",
            SpecialistRole::Oncologist => "Llama 3",
            SpecialistRole::Endocrinologist => "Grok",
            SpecialistRole::Allergist => "Allergist",
            SpecialistRole::Anesthesiologist => "Anesthesiology",
            SpecialistRole::Dermatologist => "Dermatologist",
            SpecialistRole::Emergency => "Emergency",
            SpecialistRole::FamilyMedicine => "Family Medicine",
            SpecialistRole::Gastroenterologist => "Gastroenterologist",
            SpecialistRole::Geneticist => "Geneticist",
            SpecialistRole::Geriatrician => "Geriatrician",
            SpecialistRole::Hematologist => "Hematologist",
            SpecialistRole::Infectious => "Infectious",
            SpecialistRole::InternalMedicine => "Internal Medicine",
            SpecialistRole::Nephrologist => "Nephrologist",
            SpecialistRole::ObGyn => "ObGyn",
            SpecialistRole::Ophthalmologist => "Ophthalmologist",
            SpecialistRole::Orthopedic => "Orthopedic",
            SpecialistRole::Otolaryngologist => "Otolaryngologist",
            SpecialistRole::Pathologist => "Pathologist",
            SpecialistRole::Pediatrician => "Pediatrician",
            SpecialistRole::Pharmacologist => "Pharmacologist",
            SpecialistRole::Physiatrist => "Physiatrist",
            SpecialistRole::PlasticSurgeon => "Plastic Surgeon",
            SpecialistRole::Psychiatrist => "Psychiatrist",
            SpecialistRole::Pulmonologist => "Pulmonologist",
            SpecialistRole::Rheumatologist => "Rheumatologist",
            SpecialistRole::Surgeon => "Surgeon",
            SpecialistRole::Urologist => "Urologist",
            SpecialistRole::Neonatologist => "Neonatologist",
            SpecialistRole::Neurosurgeon => "Neurosurgeon",
            SpecialistRole::CardiothoracicSurgeon => "Cardiothoracic Surgeon",
            SpecialistRole::VascularSurgeon => "Vascular Surgeon",
            SpecialistRole::Traumatologist => "Traumatologist",
            SpecialistRole::Toxicologist => "Toxicologist",
            SpecialistRole::SportsMedicine => "Sports Medicine",
            SpecialistRole::SleepMedicine => "Sleep Medicine",
            SpecialistRole::PainManagement => "Pain Management",
            SpecialistRole::Nutritionist => "Nutritionist",
            SpecialistRole::Immunologist => "Immunologist",
            SpecialistRole::Hepatologist => "Hepatologist",
            SpecialistRole::Epidemiologist => "Epidemiologist",
            SpecialistRole::Dentist => "Dentist",
            SpecialistRole::Maxillofacial => "Maxillofacial",
            SpecialistRole::Proctologist => "Proctologist",
            SpecialistRole::Mammologist => "Mammologist",
            SpecialistRole::Phthisiatrician => "Phthisiatrician",
            SpecialistRole::Narcologist => "Narcologist",
            SpecialistRole::Psychotherapist => "Psychotherapist",
            SpecialistRole::Sexologist => "Sexologist",
            SpecialistRole::Vertebrologist => "Vertebrologist",
            SpecialistRole::Orchestrator => "Orchestrator",
        }
    }

    pub fn info(&self) -> SpecialistInfo {
        let (name, specialty) = match self {
            SpecialistRole::Cardiologist => ("Cardiologist AI (Gemini)", "Cardiology"),
            SpecialistRole::Neurologist => ("Neurologist AI (Claude)", "Neurology"),
            SpecialistRole::Radiologist => ("Radiologist AI (GPT)", "Radiology"),
            SpecialistRole::Oncologist => ("Oncologist AI (Llama)", "Oncology"),
            SpecialistRole::Endocrinologist => ("Endocrinologist AI (Grok)", "Endocrinology"),
            SpecialistRole::Allergist => ("Allergist", "Allergy & Immunology"),
            SpecialistRole::Anesthesiologist => ("Anesthesiologist", "Anesthesiology"),
            SpecialistRole::Dermatologist => ("Dermatologist", "Dermatology"),
            SpecialistRole::Emergency => ("Emergency Physician", "Emergency Medicine"),
            SpecialistRole::FamilyMedicine => ("Family Physician", "Family Medicine"),
            SpecialistRole::Gastroenterologist => ("Gastroenterologist", "Gastroenterology"),
            SpecialistRole::Geneticist => ("Medical Geneticist", "Medical Genetics"),
            SpecialistRole::Geriatrician => ("Geriatrician", "Geriatrics"),
            SpecialistRole::Hematologist => ("Hematologist", "Hematology"),
            SpecialistRole::Infectious => ("Infectious Disease Specialist", "Infectious Disease"),
            SpecialistRole::InternalMedicine => ("Internist", "Internal Medicine"),
            SpecialistRole::Nephrologist => ("Nephrologist", "Nephrology"),
            SpecialistRole::ObGyn => ("Obstetrician-Gynecologist", "OB-GYN"),
            SpecialistRole::Ophthalmologist => ("Ophthalmologist", "Ophthalmology"),
            SpecialistRole::Orthopedic => ("Orthopedic Surgeon", "Orthopedics"),
            SpecialistRole::Otolaryngologist => ("ENT Specialist", "Otolaryngology"),
            SpecialistRole::Pathologist => ("Pathologist", "Pathology"),
            SpecialistRole::Pediatrician => ("Pediatrician", "Pediatrics"),
            SpecialistRole::Pharmacologist => ("Pharmacologist", "Clinical Pharmacology"),
            SpecialistRole::Physiatrist => ("Physiatrist", "Physical Medicine"),
            SpecialistRole::PlasticSurgeon => ("Plastic Surgeon", "Plastic Surgery"),
            SpecialistRole::Psychiatrist => ("Psychiatrist", "Psychiatry"),
            SpecialistRole::Pulmonologist => ("Pulmonologist", "Pulmonology"),
            SpecialistRole::Rheumatologist => ("Rheumatologist", "Rheumatology"),
            SpecialistRole::Surgeon => ("General Surgeon", "General Surgery"),
            SpecialistRole::Urologist => ("Urologist", "Urology"),
            SpecialistRole::Neonatologist => ("Neonatologist", "Neonatology"),
            SpecialistRole::Neurosurgeon => ("Neurosurgeon", "Neurosurgery"),
            SpecialistRole::CardiothoracicSurgeon => ("Cardiothoracic Surgeon", "Cardiothoracic Surgery"),
            SpecialistRole::VascularSurgeon => ("Vascular Surgeon", "Vascular Surgery"),
            SpecialistRole::Traumatologist => ("Traumatologist", "Traumatology"),
            SpecialistRole::Toxicologist => ("Toxicologist", "Toxicology"),
            SpecialistRole::SportsMedicine => ("Sports Medicine Specialist", "Sports Medicine"),
            SpecialistRole::SleepMedicine => ("Sleep Medicine Specialist", "Sleep Medicine"),
            SpecialistRole::PainManagement => ("Pain Management Specialist", "Pain Medicine"),
            SpecialistRole::Nutritionist => ("Nutritionist", "Nutrition"),
            SpecialistRole::Immunologist => ("Immunologist", "Immunology"),
            SpecialistRole::Hepatologist => ("Hepatologist", "Hepatology"),
            SpecialistRole::Epidemiologist => ("Epidemiologist", "Epidemiology"),
            SpecialistRole::Dentist => ("Dentist", "Dentistry"),
            SpecialistRole::Maxillofacial => ("Oral Surgeon", "Oral & Maxillofacial"),
            SpecialistRole::Proctologist => ("Proctologist", "Proctology"),
            SpecialistRole::Mammologist => ("Mammologist", "Mammology"),
            SpecialistRole::Phthisiatrician => ("Phthisiatrician", "Phthisiology"),
            SpecialistRole::Narcologist => ("Narcologist", "Narcology"),
            SpecialistRole::Psychotherapist => ("Psychotherapist", "Psychotherapy"),
            SpecialistRole::Sexologist => ("Sexologist", "Sexology"),
            SpecialistRole::Vertebrologist => ("Vertebrologist", "Vertebrology"),
            SpecialistRole::Orchestrator => ("Konsilium Chair (Orchestrator)", "Moderator"),
        };
        SpecialistInfo { name, specialty }
    }

    pub fn is_chair(&self) -> bool {
        matches!(self, SpecialistRole::Orchestrator)
    }

    /// Roles a panel may be drawn from (everything but the chair)
    pub fn panel_candidates() -> impl Iterator<Item = SpecialistRole> {
        Self::ALL.into_iter().filter(|role| !role.is_chair())
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for SpecialistRole {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|role| role.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CouncilError::InvalidRequest(format!("Unknown specialist role: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_unique() {
        let mut labels: Vec<&str> = SpecialistRole::ALL.iter().map(|r| r.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), SpecialistRole::ALL.len());
    }

    #[test]
    fn test_serde_uses_wire_label() {
        let json = serde_json::to_string(&SpecialistRole::InternalMedicine).unwrap();
        assert_eq!(json, "\"Internal Medicine\"");
        let role: SpecialistRole = serde_json::from_str("\"GPT-4o\"").unwrap();
        assert_eq!(role, SpecialistRole::Radiologist);
    }

    #[test]
    fn test_panel_candidates_exclude_chair() {
        assert!(SpecialistRole::panel_candidates().all(|r| !r.is_chair()));
        assert_eq!(
            SpecialistRole::panel_candidates().count(),
            SpecialistRole::ALL.len() - 1
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "family medicine".parse::<SpecialistRole>().unwrap(),
            SpecialistRole::FamilyMedicine
        );
        assert!("Astrologer".parse::<SpecialistRole>().is_err());
    }
}
