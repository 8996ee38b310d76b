use std::sync::LazyLock;

use regex::Regex;

/// Which surface the report text came in through. Each entry point gets a
/// slightly different instruction block and example schema; the LLM output
/// is advisory and never validated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Values typed into the manual entry form.
    Manual,
    /// A file upload (CSV, PDF, JSON, plain text).
    Upload,
    /// Direct backend submission with the strict fixed-schema prompt.
    Backend,
}

static HEADER_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)test|name").expect("header line regex"));

/// CSV exports usually lead with patient and lab boilerplate before the
/// results table. Find the first line that looks like a header row and drop
/// everything before it; if no line matches, the text is left unchanged.
pub fn trim_to_results_table(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    match lines.iter().position(|line| HEADER_LINE_RE.is_match(line)) {
        Some(idx) => lines[idx..].join("\n"),
        None => text.to_string(),
    }
}

/// Build the instruction string sent to the LLM, embedding the report text.
pub fn compose_prompt(raw_text: &str, file_type: &str, entry_point: EntryPoint) -> String {
    let results_section = if entry_point == EntryPoint::Upload && file_type.eq_ignore_ascii_case("csv")
    {
        trim_to_results_table(raw_text)
    } else {
        raw_text.to_string()
    };

    match entry_point {
        EntryPoint::Upload => format!(
            "Parse and standardize the following lab results table. Always return a JSON object \
             with two top-level arrays: 'signals' (for all test results) and 'events' (for any \
             clinical or notable events, medication changes, or findings you can infer from the \
             results or context, or an empty array if none).\n\n\
             For each event in the 'events' array, include:\n\
             - 'title': a short, human-readable summary of the event (e.g., 'Positive ANA', \
             'Possible Infection', 'Medication Change').\n\
             - 'type': a machine-friendly event type (e.g., 'infection', 'medication', 'finding', etc.).\n\
             - 'description': a longer explanation or context for the event.\n\
             - 'date', 'details', and any other relevant fields if available.\n\n\
             If you can infer any possible events (e.g., abnormal results, medication changes, or \
             clinical notes), include them in the events array.\n\n\
             Lab Results Table:\n{results_section}"
        ),
        EntryPoint::Manual => format!(
            "Given the following manually entered lab data, extract and standardize all relevant \
             signals and events.\n\n\
             Input (free-form, may be incomplete or unstructured):\n{results_section}\n\n\
             Output a JSON object with two arrays: 'signals' and 'events'.\n\n\
             Example output:\n\
             {{\n  \"signals\": [\n    {{\n      \"name\": \"CRP\",\n      \
             \"technicalName\": \"C-reactive protein\",\n      \
             \"explanation\": \"CRP is a marker of inflammation.\",\n      \
             \"interpretation\": \"Within usual range\",\n      \
             \"rawValue\": \"2 mg/L\",\n      \
             \"measurementMethod\": \"Blood test\",\n      \
             \"status\": \"usual\"\n    }}\n  ],\n  \
             \"events\": [\n    {{\n      \"type\": \"infection\",\n      \
             \"description\": \"Mild cold symptoms\",\n      \
             \"date\": \"2026-01-10\",\n      \
             \"details\": {{}}\n    }}\n  ]\n}}\n\n\
             If no signals or events are found, return empty arrays. Output valid JSON only."
        ),
        EntryPoint::Backend => format!(
            "You are a medical data extraction assistant.\n\n\
             Extract and standardize the following clinical lab report.\n\n\
             - The report may be in any language.\n\
             - Auto-detect the language and extract the data.\n\
             - Always output the standardized JSON in English.\n\n\
             1. Detect the report type (CBC, CRP, cytokines, etc).\n\
             2. Output a single measurement event with all detected signals.\n\
             3. Use this strict JSON format:\n\
             {{\n  \"event_type\": \"lab_measurement\",\n  \
             \"report_type\": \"CBC\" | \"CRP\" | \"Cytokines\" | \"Immune Regulation\" | \"Functional Outcome\",\n  \
             \"signals\": {{ \"crp\": number, \"il6\": number, \"il10\": number, \"treg_ratio\": number }}\n}}\n\n\
             If a value is not present, omit it from the signals object.\n\n\
             Report:\n{results_section}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_header_line_is_retained() {
        let text = "Patient: Jane Doe\nLab: Acme Diagnostics\nTest,Result\nCRP,5";
        assert_eq!(trim_to_results_table(text), "Test,Result\nCRP,5");
    }

    #[test]
    fn no_header_leaves_text_unchanged() {
        let text = "1,2,3\n4,5,6";
        assert_eq!(trim_to_results_table(text), text);
    }

    #[test]
    fn header_match_is_case_insensitive() {
        let text = "preamble\nTEST NAME,VALUE\nWBC,7.1";
        assert_eq!(trim_to_results_table(text), "TEST NAME,VALUE\nWBC,7.1");
    }

    #[test]
    fn upload_prompt_trims_csv_preamble() {
        let prompt = compose_prompt("junk line\nTest,Result\nCRP,5", "csv", EntryPoint::Upload);
        assert!(prompt.contains("Test,Result\nCRP,5"));
        assert!(!prompt.contains("junk line"));
    }

    #[test]
    fn non_csv_upload_is_embedded_verbatim() {
        let text = "Patient: Jane Doe\nCRP 5 mg/L";
        let prompt = compose_prompt(text, "txt", EntryPoint::Upload);
        assert!(prompt.contains(text));
    }

    #[test]
    fn prompts_differ_per_entry_point() {
        let upload = compose_prompt("CRP 5", "txt", EntryPoint::Upload);
        let manual = compose_prompt("CRP 5", "txt", EntryPoint::Manual);
        let backend = compose_prompt("CRP 5", "txt", EntryPoint::Backend);
        assert!(upload.contains("Lab Results Table:"));
        assert!(manual.contains("manually entered"));
        assert!(backend.contains("event_type"));
    }
}
