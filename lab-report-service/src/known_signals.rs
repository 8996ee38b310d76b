use serde::Serialize;

/// Reference entry for a well-known biomarker, served to clients so they
/// can label and explain extracted signals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownSignal {
    pub key: &'static str,
    pub name: &'static str,
    pub technical_name: &'static str,
    pub explanation: &'static str,
    pub measurement_method: &'static str,
}

pub const KNOWN_SIGNALS: &[KnownSignal] = &[
    KnownSignal {
        key: "crp",
        name: "C-Reactive Protein (CRP)",
        technical_name: "CRP",
        explanation: "A marker of inflammation in the body.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "wbc",
        name: "White Blood Cell Count (WBC)",
        technical_name: "WBC",
        explanation: "Measures the number of white blood cells, which fight infection.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "neutrophil",
        name: "Neutrophil Count",
        technical_name: "Neutrophil",
        explanation: "A type of white blood cell important for fighting bacteria.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "esr",
        name: "Erythrocyte Sedimentation Rate (ESR)",
        technical_name: "ESR",
        explanation: "A test that indirectly measures inflammation.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "ferritin",
        name: "Ferritin",
        technical_name: "Ferritin",
        explanation: "A blood protein that contains iron; high levels can indicate inflammation.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "il6",
        name: "Interleukin-6 (IL-6)",
        technical_name: "IL-6",
        explanation: "A cytokine involved in inflammation and infection responses.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "il10",
        name: "Interleukin-10 (IL-10)",
        technical_name: "IL-10",
        explanation: "A cytokine with anti-inflammatory properties.",
        measurement_method: "Blood test",
    },
    KnownSignal {
        key: "tgf",
        name: "Transforming Growth Factor Beta (TGF-B)",
        technical_name: "TGF-B",
        explanation: "A cytokine involved in regulation of immune responses.",
        measurement_method: "Blood test",
    },
];

