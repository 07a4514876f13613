//! Attachment analyzer
//!
//! Classifies attachments by extension family and flags double extensions
//! and abnormal sizes. Dangerous executables are critical, macro-enabled
//! Office documents high, archives medium.

use super::{AttachmentMeta, IndicatorCategory, Severity, ThreatIndicator};

const DANGEROUS_EXTS: &[&str] = &[
    "exe", "scr", "bat", "cmd", "com", "pif", "js", "jse", "vbs", "vbe", "wsf", "wsh", "hta",
    "cpl", "msi", "jar", "ps1",
];

const MACRO_EXTS: &[&str] = &["docm", "xlsm", "pptm", "dotm", "potm", "xltm", "xlam"];

const ARCHIVE_EXTS: &[&str] = &["zip", "rar", "7z", "iso", "img", "cab", "gz", "tgz"];

// Document-looking extensions used as the decoy half of a double extension.
const DECOY_EXTS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "jpg", "jpeg", "png", "gif",
    "html", "htm", "csv",
];

const MAX_REASONABLE_SIZE: u64 = 25 * 1024 * 1024;
const MIN_REASONABLE_SIZE: u64 = 100;

fn extension_parts(filename: &str) -> Vec<String> {
    filename
        .rsplit('.')
        .map(|part| part.trim().to_lowercase())
        .collect()
}

/// Analyze all attachments of a message.
pub fn analyze(attachments: &[AttachmentMeta]) -> Vec<ThreatIndicator> {
    let mut indicators = Vec::new();
    for attachment in attachments {
        inspect(attachment, &mut indicators);
    }
    indicators
}

fn inspect(attachment: &AttachmentMeta, indicators: &mut Vec<ThreatIndicator>) {
    let parts = extension_parts(&attachment.filename);
    let last_ext = parts.first().map(String::as_str).unwrap_or("");

    // invoice.pdf.exe and friends: decoy document extension directly in
    // front of an executable one.
    if parts.len() >= 3 {
        let decoy = parts.get(1).map(String::as_str).unwrap_or("");
        if DANGEROUS_EXTS.contains(&last_ext) && DECOY_EXTS.contains(&decoy) {
            indicators.push(ThreatIndicator::new(
                IndicatorCategory::Attachment,
                Severity::Critical,
                "Double extension masks an executable",
                &format!("attachment {:?}", attachment.filename),
                0.97,
            ));
        }
    }

    if DANGEROUS_EXTS.contains(&last_ext) {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Attachment,
            Severity::Critical,
            "Dangerous executable attachment",
            &format!("attachment {:?} ({})", attachment.filename, attachment.content_type),
            0.9,
        ));
    } else if MACRO_EXTS.contains(&last_ext) {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Attachment,
            Severity::High,
            "Macro-enabled Office document",
            &format!("attachment {:?}", attachment.filename),
            0.85,
        ));
    } else if ARCHIVE_EXTS.contains(&last_ext) {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Attachment,
            Severity::Medium,
            "Archive attachment may hide payloads",
            &format!("attachment {:?}", attachment.filename),
            0.6,
        ));
    }

    if attachment.size_bytes > MAX_REASONABLE_SIZE {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Attachment,
            Severity::Medium,
            "Unusually large attachment",
            &format!("{:?} is {} bytes", attachment.filename, attachment.size_bytes),
            0.6,
        ));
    } else if attachment.size_bytes < MIN_REASONABLE_SIZE {
        indicators.push(ThreatIndicator::new(
            IndicatorCategory::Attachment,
            Severity::Low,
            "Unusually small attachment",
            &format!("{:?} is {} bytes", attachment.filename, attachment.size_bytes),
            0.5,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(filename: &str, size: u64) -> AttachmentMeta {
        AttachmentMeta {
            filename: filename.to_string(),
            content_type: "application/octet-stream".to_string(),
            size_bytes: size,
        }
    }

    #[test]
    fn test_plain_document_not_flagged() {
        let indicators = analyze(&[attachment("report.pdf", 200_000)]);
        assert!(indicators.is_empty());
    }

    #[test]
    fn test_executable_is_critical() {
        let indicators = analyze(&[attachment("setup.exe", 1_000_000)]);
        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].severity, Severity::Critical);
    }

    #[test]
    fn test_double_extension_case_insensitive() {
        let indicators = analyze(&[attachment("Invoice.PDF.EXE", 50_000)]);
        let double = indicators
            .iter()
            .find(|i| i.description.contains("Double extension"))
            .expect("double extension flagged");
        assert_eq!(double.severity, Severity::Critical);
        assert!(double.confidence >= 0.95);
        // The executable family indicator is emitted as well.
        assert!(indicators
            .iter()
            .any(|i| i.description.contains("Dangerous executable")));
    }

    #[test]
    fn test_macro_document_is_high() {
        let indicators = analyze(&[attachment("quarterly.xlsm", 80_000)]);
        assert_eq!(indicators[0].severity, Severity::High);
    }

    #[test]
    fn test_archive_is_medium() {
        let indicators = analyze(&[attachment("photos.zip", 5_000_000)]);
        assert_eq!(indicators[0].severity, Severity::Medium);
    }

    #[test]
    fn test_size_outliers_flagged() {
        let small = analyze(&[attachment("tracker.png", 12)]);
        assert!(small.iter().any(|i| i.description.contains("small")));

        let large = analyze(&[attachment("dump.bin", 30 * 1024 * 1024)]);
        assert!(large.iter().any(|i| i.description.contains("large")));
    }
}
