use std::path::Path;

use thiserror::Error;

use crate::config::ConventionRuleConfig;

/// Tag applied when a path does not match any convention rule, or when an
/// extension is not recognized.
pub const UNKNOWN: &str = "unknown";

/// Descriptive fields derived from a file's position in the PHOENIX tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFields {
    pub network: String,
    pub study: String,
    pub subject_id: String,
    pub modality: String,
}

impl PathFields {
    fn unknown() -> Self {
        Self {
            network: UNKNOWN.to_string(),
            study: UNKNOWN.to_string(),
            subject_id: UNKNOWN.to_string(),
            modality: UNKNOWN.to_string(),
        }
    }
}

/// Field a convention token captures into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureField {
    Network,
    Study,
    Subject,
    Modality,
}

/// One compiled segment matcher of a convention rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentPattern {
    Literal(String),
    Capture(CaptureField),
    Any,
}

/// Errors raised while compiling convention rules from configuration.
#[derive(Debug, Error)]
pub enum ConventionError {
    /// A rule used a capture token that names no known field.
    #[error("Convention rule {rule} has unknown token: {token}")]
    UnknownToken { rule: usize, token: String },
    /// A rule had no segments at all.
    #[error("Convention rule {rule} is empty")]
    EmptyRule { rule: usize },
    /// The rule table itself was empty.
    #[error("No convention rules configured")]
    NoRules,
}

/// Ordered table of directory-convention rules, evaluated first-match-wins.
#[derive(Debug, Clone)]
pub struct ConventionScheme {
    rules: Vec<Vec<SegmentPattern>>,
}

impl ConventionScheme {
    /// Compile configured rules into matchers, preserving priority order.
    pub fn compile(rules: &[ConventionRuleConfig]) -> Result<Self, ConventionError> {
        if rules.is_empty() {
            return Err(ConventionError::NoRules);
        }
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            if rule.segments.is_empty() {
                return Err(ConventionError::EmptyRule { rule: index });
            }
            let patterns = rule
                .segments
                .iter()
                .map(|token| compile_token(index, token))
                .collect::<Result<Vec<_>, _>>()?;
            compiled.push(patterns);
        }
        Ok(Self { rules: compiled })
    }

    /// Derive ownership fields from a path relative to a data root.
    ///
    /// Pure function of the path: the first rule whose segment patterns match
    /// the leading directory components wins; no match tags every field
    /// "unknown" instead of failing.
    pub fn extract(&self, relative: &Path) -> PathFields {
        let segments: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                std::path::Component::Normal(part) => {
                    Some(part.to_string_lossy().into_owned())
                }
                _ => None,
            })
            .collect();

        for patterns in &self.rules {
            // The file name itself must remain after the matched directories.
            if segments.len() <= patterns.len() {
                continue;
            }
            if let Some(fields) = match_rule(patterns, &segments) {
                return fields;
            }
        }
        PathFields::unknown()
    }
}

fn match_rule(patterns: &[SegmentPattern], segments: &[String]) -> Option<PathFields> {
    let mut fields = PathFields::unknown();
    for (pattern, segment) in patterns.iter().zip(segments) {
        match pattern {
            SegmentPattern::Literal(expected) => {
                if expected != segment {
                    return None;
                }
            }
            SegmentPattern::Capture(field) => {
                let target = match field {
                    CaptureField::Network => &mut fields.network,
                    CaptureField::Study => &mut fields.study,
                    CaptureField::Subject => &mut fields.subject_id,
                    CaptureField::Modality => &mut fields.modality,
                };
                *target = segment.clone();
            }
            SegmentPattern::Any => {}
        }
    }
    Some(fields)
}

fn compile_token(rule: usize, token: &str) -> Result<SegmentPattern, ConventionError> {
    if token == "*" {
        return Ok(SegmentPattern::Any);
    }
    let Some(name) = token.strip_prefix(':') else {
        return Ok(SegmentPattern::Literal(token.to_string()));
    };
    let field = match name {
        "network" => CaptureField::Network,
        "study" => CaptureField::Study,
        "subject" => CaptureField::Subject,
        "modality" => CaptureField::Modality,
        _ => {
            return Err(ConventionError::UnknownToken {
                rule,
                token: token.to_string(),
            });
        }
    };
    Ok(SegmentPattern::Capture(field))
}

/// Classify a file by its extension, case-insensitively.
///
/// Unrecognized extensions (or none at all) fall back to "unknown".
pub fn file_type_of(path: &Path) -> &'static str {
    let name = match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name.to_ascii_lowercase(),
        None => return UNKNOWN,
    };
    // Compound extension used by compressed neuroimaging volumes.
    if name.ends_with(".nii.gz") {
        return "nifti";
    }
    let Some(extension) = name.rsplit_once('.').map(|(_, ext)| ext) else {
        return UNKNOWN;
    };
    match extension {
        "dcm" => "dicom",
        "nii" => "nifti",
        "edf" | "eeg" | "vhdr" | "vmrk" | "fif" => "eeg",
        "csv" => "csv",
        "tsv" => "tsv",
        "json" => "json",
        "xml" => "xml",
        "txt" | "log" => "text",
        "pdf" => "pdf",
        "wav" | "mp3" | "flac" => "audio",
        "mp4" | "mov" | "mkv" | "avi" => "video",
        "png" | "jpg" | "jpeg" | "tif" | "tiff" => "image",
        "zip" | "tar" | "gz" | "tgz" | "bz2" | "zst" => "archive",
        "parquet" => "parquet",
        _ => UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rule(segments: &[&str]) -> ConventionRuleConfig {
        ConventionRuleConfig {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn default_scheme() -> ConventionScheme {
        ConventionScheme::compile(&[rule(&[":network", ":study", ":subject", ":modality"])])
            .unwrap()
    }

    #[test]
    fn extracts_fields_from_conventional_path() {
        let scheme = default_scheme();
        let fields = scheme.extract(&PathBuf::from("ProNET/StudyA/sub-01/mri/scan.dcm"));
        assert_eq!(fields.network, "ProNET");
        assert_eq!(fields.study, "StudyA");
        assert_eq!(fields.subject_id, "sub-01");
        assert_eq!(fields.modality, "mri");
    }

    #[test]
    fn nested_files_below_the_modality_still_match() {
        let scheme = default_scheme();
        let fields =
            scheme.extract(&PathBuf::from("ProNET/StudyA/sub-01/mri/session1/raw/scan.dcm"));
        assert_eq!(fields.modality, "mri");
    }

    #[test]
    fn unmatched_paths_tag_unknown_instead_of_failing() {
        let scheme = default_scheme();
        let fields = scheme.extract(&PathBuf::from("stray.txt"));
        assert_eq!(fields.network, UNKNOWN);
        assert_eq!(fields.study, UNKNOWN);
        assert_eq!(fields.subject_id, UNKNOWN);
        assert_eq!(fields.modality, UNKNOWN);
    }

    #[test]
    fn rules_evaluate_in_priority_order() {
        let scheme = ConventionScheme::compile(&[
            rule(&["PROTECTED", ":study", "raw", ":subject", ":modality"]),
            rule(&[":network", ":study", ":subject", ":modality"]),
        ])
        .unwrap();

        let protected =
            scheme.extract(&PathBuf::from("PROTECTED/StudyA/raw/sub-01/eeg/rest.edf"));
        assert_eq!(protected.study, "StudyA");
        assert_eq!(protected.subject_id, "sub-01");
        assert_eq!(protected.modality, "eeg");
        assert_eq!(protected.network, UNKNOWN);

        // Falls through to the second rule when the literal does not match.
        let general = scheme.extract(&PathBuf::from("ProNET/StudyA/sub-01/eeg/rest.edf"));
        assert_eq!(general.network, "ProNET");
    }

    #[test]
    fn wildcard_segments_match_anything_without_capturing() {
        let scheme =
            ConventionScheme::compile(&[rule(&["*", ":study", "*", ":modality"])]).unwrap();
        let fields = scheme.extract(&PathBuf::from("whatever/StudyB/junk/phone/sensor.csv"));
        assert_eq!(fields.study, "StudyB");
        assert_eq!(fields.modality, "phone");
        assert_eq!(fields.network, UNKNOWN);
    }

    #[test]
    fn a_bare_directory_match_is_not_enough() {
        // Path has exactly as many segments as the rule: no file name remains.
        let scheme = default_scheme();
        let fields = scheme.extract(&PathBuf::from("ProNET/StudyA/sub-01/mri"));
        assert_eq!(fields.modality, UNKNOWN);
    }

    #[test]
    fn compile_rejects_unknown_tokens_and_empty_rules() {
        let err = ConventionScheme::compile(&[rule(&[":site"])]).unwrap_err();
        assert!(matches!(err, ConventionError::UnknownToken { rule: 0, .. }));

        let err = ConventionScheme::compile(&[rule(&[])]).unwrap_err();
        assert!(matches!(err, ConventionError::EmptyRule { rule: 0 }));

        let err = ConventionScheme::compile(&[]).unwrap_err();
        assert!(matches!(err, ConventionError::NoRules));
    }

    #[test]
    fn file_types_match_case_insensitively_with_unknown_fallback() {
        assert_eq!(file_type_of(Path::new("scan.DCM")), "dicom");
        assert_eq!(file_type_of(Path::new("volume.nii.gz")), "nifti");
        assert_eq!(file_type_of(Path::new("volume.NII.GZ")), "nifti");
        assert_eq!(file_type_of(Path::new("rest.edf")), "eeg");
        assert_eq!(file_type_of(Path::new("survey.csv")), "csv");
        assert_eq!(file_type_of(Path::new("weird.xyz")), UNKNOWN);
        assert_eq!(file_type_of(Path::new("no_extension")), UNKNOWN);
    }
}
