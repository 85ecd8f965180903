//! Deterministic prompt construction for every council step.
//!
//! Nothing in here talks to the network, so prompt text can be asserted on
//! directly in tests.

use crate::language::Language;
use crate::models::{AnonymizedCase, ChatMessage, Diagnosis, FinalReport, PatientData};
use crate::oracle::ContentPart;
use crate::specialists::SpecialistRole;

/// Prefixes a chair or specialist uses to route a question to the clinician
pub const USER_QUESTION_MARKERS: [&str; 2] = ["FOYDALANUVCHI UCHUN SAVOL:", "QUESTION FOR USER:"];

/// Number of prior cases injected into a prompt
const MAX_PRIOR_CASES: usize = 3;

const BASE_RULES: &str = "You are a clinical decision-support system advising a licensed physician.
Your task is to give the most accurate, evidence-based and safe answer possible.

REASONING RULES:
1. Write an explicit step-by-step reasoning chain for every conclusion: cause A -> finding B -> therefore C.
2. For each differential diagnosis explain why it is likely and why the alternatives are less likely.
3. State confidence (high/moderate/low) and name the missing data that limits accuracy.
4. SAFETY: always consider allergies, current medications and renal/hepatic function; flag dangerous interactions at once.
5. Red flags (acute pain, dyspnea, loss of consciousness, severe anemia, sepsis signs) require an urgent recommendation.";

const CLOSING_RULES: &str = "CORE RULES:
1. Every conclusion answers \"why?\" with evidence; reasoningChain is always filled.
2. Ignore dictation noise and extract the medical meaning.
3. Do not hallucinate: rely only on the supplied data and general medical knowledge.
4. Avoid overconfidence: when evidence is insufficient write \"Further investigation required\".
5. criticalFinding: fill finding, implication and urgency whenever there is a threat to life or a need for urgent treatment.";

const REGIONAL_CONTEXT: &str = "1) Legislation:
- The Law of the Republic of Uzbekistan \"On Health Care\" governs all medical activity.
- Standards of care and clinical protocols are approved by the Ministry of Health (SSV).
- Prescriptions and treatment plans must follow SSV-approved clinical protocols.
2) Clinical protocols:
- National clinical protocols approved by the SSV in 2024 cover 110+ conditions (arterial hypertension, chronic ischemic heart disease, asthma, COPD, diabetes types 1 and 2, viral hepatitis B and C, cirrhosis, antenatal care and more).
- Cite the matching protocol direction, e.g. \"In accordance with the SSV protocol on arterial hypertension\".
- ICD-10 is used for official documentation.
3) Medicines:
- Recommend only drugs registered in the Republic of Uzbekistan, by trade names sold in local pharmacies (Nimesil, Sumamed, Augmentin, Amoksiklav, Metformin, Glucophage, Enalapril, Enap, Amlodipin, Omeprazol, Omez, Paratsetamol, Ibuprofen, Loratadin).
- State dose and administration precisely, including for over-the-counter drugs.
- Account for allergies and current medications and offer locally available alternatives.
4) Terminology and standards:
- Use SSV-accepted terminology in the output language.
- Laboratory units follow national standards (mmol/l, mg/dl, bpm).";

fn language_rule(language: Language) -> String {
    format!(
        "LANGUAGE: every textual field of every response MUST be written in {} only.",
        language.prompt_name()
    )
}

fn regional_heading(language: Language) -> &'static str {
    match language {
        Language::English => "UZBEKISTAN HEALTHCARE CONTEXT (mandatory for all recommendations):",
        Language::Russian => "КОНТЕКСТ УЗБЕКИСТАНА (обязательно для всех рекомендаций):",
        Language::Karakalpak => "ÓZBEKISTAN SOG'LIQ KONTEKSTI (barlıq maslahatlar ushın majbúri):",
        Language::UzbekLatin | Language::UzbekCyrillic => {
            "O'ZBEKISTON SOG'LIQNI SAQLASH KONTEKSTI (barcha tavsiyalar uchun majburiy):"
        }
    }
}

/// Full system instruction shared by the council steps
pub fn system_instruction(language: Language) -> String {
    format!(
        "{}\n\n{}\n\n{}\n{}\n\n{}",
        BASE_RULES,
        language_rule(language),
        regional_heading(language),
        REGIONAL_CONTEXT,
        CLOSING_RULES
    )
}

/// Short instruction for the low-latency single-doctor path
pub fn fast_doctor_instruction(language: Language) -> String {
    format!(
        "Medical AI. Answer in {}, JSON only. Diagnosis basis, plan, medications with how to take them. Uzbekistan-registered drugs, SSV protocols.",
        language.prompt_name()
    )
}

/// Instruction for the drug lookup and interaction tools
pub fn drug_tool_instruction(language: Language) -> String {
    format!(
        "You are a clinical pharmacology assistant.\nAnswer only in {}, as STRICT JSON.\nRely only on medicines available in Uzbekistan and on SSV clinical protocols.\nWrite nothing outside the JSON.",
        language.prompt_name()
    )
}

/// Keyword-overlap lookup over prior anonymized cases.
///
/// Keywords are the lowercase words of `complaints` longer than four
/// characters; a case matches when any of its tags contains any keyword.
/// Returns an empty string when nothing matches.
pub fn relevant_history_context(complaints: &str, cases: &[AnonymizedCase]) -> String {
    if cases.is_empty() {
        return String::new();
    }
    let lowered = complaints.to_lowercase();
    let keywords: Vec<&str> = lowered
        .split_whitespace()
        .filter(|w| w.chars().count() > 4)
        .collect();
    if keywords.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = cases
        .iter()
        .filter(|case| {
            keywords
                .iter()
                .any(|k| case.tags.iter().any(|tag| tag.contains(k)))
        })
        .take(MAX_PRIOR_CASES)
        .map(|case| format!("- {}: {}", case.final_diagnosis, case.outcome))
        .collect();

    if lines.is_empty() {
        return String::new();
    }
    format!(
        "[SYSTEM MEMORY - PRIOR SIMILAR CASES]:\nLessons from earlier comparable cases:\n{}\nUse this experience in today's analysis.",
        lines.join("\n")
    )
}

fn attachment_parts(patient: &PatientData) -> impl Iterator<Item = ContentPart> + '_ {
    patient.attachments.iter().map(|a| ContentPart::Inline {
        mime_type: a.mime_type.clone(),
        data: a.data.clone(),
    })
}

/// Intro text, prior-case context and structured patient data, followed by
/// one inline part per attachment.
pub fn build_multimodal_prompt(
    intro: &str,
    patient: &PatientData,
    prior_cases: &[AnonymizedCase],
) -> Vec<ContentPart> {
    let history = relevant_history_context(&patient.complaints, prior_cases);
    let mut text = format!(
        "{}\n\n{}\n\nPATIENT CLINICAL DATA (Structured): {}",
        intro,
        history,
        patient.text_snapshot()
    );
    if !patient.attachments.is_empty() {
        text.push_str(&format!(
            "\n\n[IMPORTANT]: The patient has attached {} medical file(s). Analyze these precisely.",
            patient.attachments.len()
        ));
    }

    let mut parts = vec![ContentPart::Text(text)];
    parts.extend(attachment_parts(patient));
    parts
}

/// Reduced prompt without the prior-case block
pub fn build_fast_doctor_prompt(intro: &str, patient: &PatientData) -> Vec<ContentPart> {
    let mut text = format!("{}\n\nPATIENT: {}", intro, patient.text_snapshot());
    if !patient.attachments.is_empty() {
        text.push_str(&format!("\nAttachments: {}.", patient.attachments.len()));
    }

    let mut parts = vec![ContentPart::Text(text)];
    parts.extend(attachment_parts(patient));
    parts
}

fn history_json(history: &[ChatMessage]) -> String {
    serde_json::to_string(history).unwrap_or_else(|_| "[]".to_string())
}

pub fn clarifying_questions(language: Language) -> String {
    format!(
        "Analyze the patient data carefully and prioritise by clinical impact.

PRIORITY 1 (always ask if missing): allergies, current medications, pregnancy/lactation if relevant.
PRIORITY 2: vital signs (BP, HR, temperature for febrile presentations), key lab values for the complaint.
PRIORITY 3: symptom duration, previous similar episodes, family history if relevant to the complaint.

Return 3-5 SHORT, SPECIFIC questions. Do not ask for data already present.
Format: JSON array of strings.
Output Language: {}.",
        language.prompt_name()
    )
}

pub fn recommend_specialists(language: Language) -> String {
    let available = SpecialistRole::panel_candidates()
        .map(|r| r.label())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Analyze the patient's clinical case. Select 5-6 specialists from: [{}]. Provide a short reason for each. Return JSON {{ \"recommendations\": [{{ \"model\": \"SpecialistName\", \"reason\": \"...\" }}] }}. Output Language: {}.",
        available,
        language.prompt_name()
    )
}

pub fn initial_diagnoses(language: Language) -> String {
    let lang = language.prompt_name();
    format!(
        "Analyze the patient data. Generate the 3-5 most likely differential diagnoses. Uzbekistan context is mandatory.
MANDATORY FIELDS:
1. \"name\": diagnosis name in {lang}.
2. \"justification\": scientific reasoning.
3. \"reasoningChain\": step-by-step logic.
4. \"uzbekProtocolMatch\": the matching SSV clinical protocol direction, if one applies.
Probabilities are independent likelihood estimates and need not sum to 100.
Output Language: {lang}."
    )
}

pub fn chair_intro(language: Language) -> String {
    format!(
        "Generate a short intro message for the Council Chair (System) starting the medical council debate. Mention: the goal is to find the best diagnosis and treatment in accordance with SSV-approved clinical protocols and the legislation of Uzbekistan; only drugs registered and available in Uzbekistan will be recommended. Output Language: {}.",
        language.prompt_name()
    )
}

pub fn opening_topic(diagnoses: &[Diagnosis], language: Language) -> String {
    let diagnoses = serde_json::to_string(diagnoses).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Summarize the initial state: patient data and initial diagnoses: {}. Ask specialists for their initial evaluation and red flags. Output Language: {}.",
        diagnoses,
        language.prompt_name()
    )
}

pub fn specialist_turn(
    role: SpecialistRole,
    topic: &str,
    history: &[ChatMessage],
    language: Language,
) -> String {
    let info = role.info();
    format!(
        "Role: {} ({}).
Task: Answer the Chair's question: \"{}\". Use your specialty expertise.
REQUIREMENTS:
1. Reference SSV-approved clinical protocols where applicable.
2. Recommend only drugs registered and available in Uzbekistan.
3. Debate scientifically, with reasoning and evidence.
4. If you need information only the doctor or patient can supply, write it as \"{} [question]\" and the Chair will ask the user.
5. LANGUAGE: {} ONLY.
History: {}",
        info.name,
        info.specialty,
        topic,
        USER_QUESTION_MARKERS[0],
        language.prompt_name(),
        history_json(history)
    )
}

pub fn prognosis_update(tail: &[ChatMessage], patient: &PatientData, language: Language) -> String {
    format!(
        "Based on patient data and debate history, update prognosis. Consider SSV clinical protocols and local treatment options. Return JSON. Output Language: {}. Debate: {}. Patient: {}.",
        language.prompt_name(),
        history_json(tail),
        patient.text_snapshot()
    )
}

pub fn round_summary(history: &[ChatMessage], language: Language) -> String {
    format!(
        "Role: Council Chair.
Task: Summarize the round and ask a sharp, clarifying question for the next round. If critical information is missing (vital signs, specific symptoms, duration, severity), ask the USER by prefixing: \"{marker} [your question]\". Keep SSV clinical protocols and the Uzbekistan context in mind.
IMPORTANT: use the \"{marker}\" prefix only when the answer must come from the patient or doctor.
LANGUAGE: {}.
History: {}",
        language.prompt_name(),
        history_json(history),
        marker = USER_QUESTION_MARKERS[0],
    )
}

pub fn final_report(history: &[ChatMessage], language: Language) -> String {
    format!(
        "Role: Council Chair. Create the Final Report. Be rigorous and safe. Uzbekistan context is mandatory.
LANGUAGE: {}.
REQUIREMENTS:
1. consensusDiagnosis: reasoningChain, justification and evidenceLevel for each; uzbekProtocolMatch names the matching SSV protocol.
2. treatmentPlan: ordered and detailed, per SSV protocols; urgent first steps first.
3. medicationRecommendations: ONLY trade names registered and sold in Uzbekistan. Respect allergies and interactions. localAvailability: short availability note.
4. criticalFinding: fill only for a threat to life or a need for urgent treatment; otherwise leave it empty.
5. recommendedTests: important missing investigations.
6. uzbekistanLegislativeNote: short compliance note.
Debate history: {}",
        language.prompt_name(),
        history_json(history)
    )
}

pub fn continue_debate(intervention: &str, history: &[ChatMessage], language: Language) -> String {
    format!(
        "User intervention: \"{}\".
Role: Council Chair.
Task: Respond to the user and continue the debate. Keep SSV clinical protocols and the Uzbekistan context in mind.
LANGUAGE: {}.
History: {}",
        intervention,
        language.prompt_name(),
        history_json(history)
    )
}

pub fn scenario_analysis(scenario: &str, history: &[ChatMessage], language: Language) -> String {
    format!(
        "Role: Council Chair.
Task: Analyze the \"What if\" scenario: \"{}\". Follow SSV clinical protocols. Recommend only drugs registered and available in Uzbekistan.
LANGUAGE: {}.
Original Debate: {}",
        scenario,
        language.prompt_name(),
        history_json(history)
    )
}

pub fn explain_rationale(message: &ChatMessage, patient: &PatientData, language: Language) -> String {
    format!(
        "Explain the medical rationale for this message: \"{}\". Reference symptoms and protocols. LANGUAGE: {}. Patient: {}.",
        message.content,
        language.prompt_name(),
        patient.text_snapshot()
    )
}

pub fn fast_doctor(language: Language) -> String {
    format!(
        "Diagnosis (name, probability, justification in 2 sentences, reasoningChain with 3 steps, uzbekProtocolMatch). treatmentPlan with 3-5 steps. medications: name, dosage, frequency, duration, timing, instructions (how to take, 1 sentence). recommendedTests, criticalFinding if needed. Language: {}. JSON.",
        language.prompt_name()
    )
}

/// Report text embedded in document-drafting prompts
pub fn report_json(report: &FinalReport) -> String {
    serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
}

/// Finds a reserved marker in `text` and returns the question that follows it
pub fn extract_user_question(text: &str) -> Option<String> {
    USER_QUESTION_MARKERS.iter().find_map(|marker| {
        let start = text.find(marker)?;
        let rest = text[start + marker.len()..].trim();
        Some(if rest.is_empty() {
            text.trim().to_string()
        } else {
            rest.to_string()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    fn case(tags: &[&str], diagnosis: &str) -> AnonymizedCase {
        AnonymizedCase {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            final_diagnosis: diagnosis.to_string(),
            outcome: "recovered".to_string(),
        }
    }

    #[test]
    fn test_history_context_matches_long_keywords_only() {
        let cases = vec![
            case(&["radiating chest pain"], "Angina"),
            case(&["pain"], "Back strain"),
        ];
        let context = relevant_history_context("chest pain radiating to left arm", &cases);
        assert!(context.contains("Angina: recovered"));
        assert!(!context.contains("Back strain"));

        assert_eq!(relevant_history_context("pain arm", &cases), "");
        assert_eq!(relevant_history_context("chest pain", &[]), "");
    }

    #[test]
    fn test_history_context_takes_first_three() {
        let cases: Vec<_> = (0..5).map(|i| case(&["headache"], &format!("D{i}"))).collect();
        let context = relevant_history_context("severe headache", &cases);
        assert!(context.contains("D2"));
        assert!(!context.contains("D3"));
    }

    #[test]
    fn test_multimodal_prompt_appends_attachments() {
        let patient = PatientData {
            complaints: "cough".to_string(),
            attachments: vec![Attachment {
                name: Some("xray.png".to_string()),
                mime_type: "image/png".to_string(),
                data: vec![9, 9],
            }],
            ..Default::default()
        };
        let parts = build_multimodal_prompt("Intro", &patient, &[]);
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            ContentPart::Text(text) => {
                assert!(text.starts_with("Intro"));
                assert!(text.contains("attached 1 medical file(s)"));
                assert!(text.contains("\"complaints\":\"cough\""));
                assert!(!text.contains("attachments"));
            }
            other => panic!("expected text part, got {other:?}"),
        }
        assert!(matches!(&parts[1], ContentPart::Inline { mime_type, .. } if mime_type == "image/png"));
    }

    #[test]
    fn test_fast_prompt_skips_history() {
        let patient = PatientData {
            complaints: "persistent headache".to_string(),
            ..Default::default()
        };
        let parts = build_fast_doctor_prompt("Fast", &patient);
        let ContentPart::Text(text) = &parts[0] else {
            panic!("expected text part");
        };
        assert!(!text.contains("SYSTEM MEMORY"));
        assert!(text.contains("PATIENT:"));
    }

    #[test]
    fn test_extract_user_question() {
        assert_eq!(
            extract_user_question("Summary. FOYDALANUVCHI UCHUN SAVOL: Is the pain constant?").as_deref(),
            Some("Is the pain constant?")
        );
        assert_eq!(
            extract_user_question("QUESTION FOR USER: Blood pressure?").as_deref(),
            Some("Blood pressure?")
        );
        assert!(extract_user_question("question for user: lowercase is not a marker").is_none());
    }

    #[test]
    fn test_system_instruction_names_language() {
        let instruction = system_instruction(Language::Russian);
        assert!(instruction.contains("Russian only"));
        assert!(instruction.contains("КОНТЕКСТ УЗБЕКИСТАНА"));
    }
}
