// Attachment file naming

use crate::models::AttachmentSpec;

/// File extension for an export type; unknown types get `.dat`
pub fn extension_for(attachment_type: &str) -> &'static str {
    match attachment_type {
        "image" => ".jpeg",
        "content" => ".twbx",
        "data" => ".csv",
        "pdf" => ".pdf",
        "powerpoint" => ".pptx",
        "crosstab/excel" => ".xlsx",
        _ => ".dat",
    }
}

/// Deterministic display name of an exported artifact
///
/// `<workbook>_<view>_<param values joined by _><ext>`, transliterated to
/// plain ASCII. Parameter values keep their emission order.
pub fn attachment_name(spec: &AttachmentSpec, params: &[(String, String)]) -> String {
    let joined = params
        .iter()
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join("_");

    let name = format!(
        "{}_{}_{}{}",
        spec.workbook,
        spec.view.as_deref().unwrap_or(""),
        joined,
        extension_for(&spec.attachment_type)
    );

    deunicode::deunicode(&name)
}
