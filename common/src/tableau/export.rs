// Export request construction

use crate::config::ExportFormats;
use crate::errors::UserError;
use crate::models::{FilterField, FilterPayload, ResolvedAttachment, TableauObject};
use crate::naming::attachment_name;
use crate::tableau::Session;
use serde_json::Value;

/// A fully built export call for one (attachment, subscriber) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub url: String,
    /// Query parameters in emission order
    pub params: Vec<(String, String)>,
    /// Display name of the downloaded artifact
    pub file_name: String,
}

impl ExportRequest {
    /// Build the export request, validating the format against the object's allow-list
    pub fn build(
        session: &Session,
        attachment: &ResolvedAttachment,
        filter_payload: &FilterPayload,
        formats: &ExportFormats,
    ) -> Result<Self, UserError> {
        let spec = &attachment.spec;
        let (object_class, allowed) = match &spec.tableau_object {
            TableauObject::View => ("views", &formats.allowed_view_format),
            TableauObject::Workbook => ("workbooks", &formats.allowed_workbook_format),
            TableauObject::Other(object) => {
                return Err(UserError::UnexpectedObjectType {
                    email_id: spec.email_id.clone(),
                    object: object.clone(),
                })
            }
        };

        if !allowed.contains(&spec.attachment_type) {
            return Err(UserError::DisallowedFormat {
                luid: attachment.luid.clone(),
                attachment_type: spec.attachment_type.clone(),
                object: spec.tableau_object.as_str().to_string(),
                allowed: allowed.iter().cloned().collect(),
            });
        }

        let params = compile_params(&spec.filter_fields, filter_payload);
        let url = format!(
            "{}/sites/{}/{}/{}/{}",
            session.base_url.trim_end_matches('/'),
            session.site_id,
            object_class,
            attachment.luid,
            spec.attachment_type
        );
        let file_name = attachment_name(spec, &params);

        Ok(Self {
            url,
            params,
            file_name,
        })
    }
}

/// Build export query parameters from an attachment's filter fields
///
/// Tag entries present in the payload become `vf_<tag>`; literal objects
/// are merged as-is. Null values are left out of the query. A repeated key keeps its first position and takes
/// the later value.
pub fn compile_params(
    filter_fields: &[FilterField],
    filter_payload: &FilterPayload,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();

    let mut set = |key: String, value: String| {
        match params.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => params.push((key, value)),
        }
    };

    for field in filter_fields {
        match field {
            FilterField::Tag(tag) => {
                if let Some(value) = filter_payload.get(tag).filter(|v| !v.is_null()) {
                    set(format!("vf_{}", tag), value.to_string());
                }
            }
            FilterField::Literal(entries) => {
                for (key, value) in entries.iter().filter(|(_, v)| !v.is_null()) {
                    set(key.clone(), literal_to_string(value));
                }
            }
        }
    }

    params
}

fn literal_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentSpec, PayloadValue};

    fn session() -> Session {
        Session {
            base_url: "https://bi.example.com/api/3.23".to_string(),
            site_id: "site-1".to_string(),
        }
    }

    fn formats() -> ExportFormats {
        ExportFormats {
            allowed_workbook_format: ["pdf", "powerpoint"].iter().map(|s| s.to_string()).collect(),
            allowed_view_format: ["pdf", "png", "csv"].iter().map(|s| s.to_string()).collect(),
        }
    }

    fn attachment(object: TableauObject, attachment_type: &str, fields: &str) -> ResolvedAttachment {
        ResolvedAttachment {
            spec: AttachmentSpec {
                email_id: "7".to_string(),
                tableau_object: object,
                workbook: "Sales".to_string(),
                project: "Finance".to_string(),
                view: Some("Q1".to_string()),
                attachment_type: attachment_type.to_string(),
                filter_fields: serde_json::from_str(fields).unwrap(),
                luid: None,
            },
            luid: "luid-1".to_string(),
        }
    }

    fn payload() -> FilterPayload {
        [
            ("region".to_string(), PayloadValue::from("EU")),
            ("year".to_string(), PayloadValue::from(2024i64)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_view_export_url_and_name() {
        let request = ExportRequest::build(
            &session(),
            &attachment(TableauObject::View, "pdf", r#"["region"]"#),
            &payload(),
            &formats(),
        )
        .unwrap();

        assert_eq!(
            request.url,
            "https://bi.example.com/api/3.23/sites/site-1/views/luid-1/pdf"
        );
        assert_eq!(
            request.params,
            vec![("vf_region".to_string(), "EU".to_string())]
        );
        assert_eq!(request.file_name, "Sales_Q1_EU.pdf");
    }

    #[test]
    fn test_workbook_uses_workbook_allow_list() {
        let request = ExportRequest::build(
            &session(),
            &attachment(TableauObject::Workbook, "powerpoint", "[]"),
            &payload(),
            &formats(),
        )
        .unwrap();
        assert!(request.url.ends_with("/workbooks/luid-1/powerpoint"));

        let result = ExportRequest::build(
            &session(),
            &attachment(TableauObject::Workbook, "png", "[]"),
            &payload(),
            &formats(),
        );
        assert!(matches!(result, Err(UserError::DisallowedFormat { .. })));
    }

    #[test]
    fn test_disallowed_view_format_lists_allowed() {
        let result = ExportRequest::build(
            &session(),
            &attachment(TableauObject::View, "svg", "[]"),
            &payload(),
            &formats(),
        );

        match result {
            Err(UserError::DisallowedFormat { allowed, attachment_type, .. }) => {
                assert_eq!(attachment_type, "svg");
                assert_eq!(allowed, vec!["csv", "pdf", "png"]);
            }
            other => panic!("Expected DisallowedFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_object_type_rejected() {
        let result = ExportRequest::build(
            &session(),
            &attachment(TableauObject::Other("datasource".to_string()), "pdf", "[]"),
            &payload(),
            &formats(),
        );
        assert!(matches!(result, Err(UserError::UnexpectedObjectType { .. })));
    }

    #[test]
    fn test_compile_params_mixed_forms_in_order() {
        let fields: Vec<FilterField> = serde_json::from_str(
            r#"["year", {":refresh": "yes", "vf_year": "1999"}, "missing", "region", {"vf_year": 2025}]"#,
        )
        .unwrap();

        let params = compile_params(&fields, &payload());
        assert_eq!(
            params,
            vec![
                ("vf_year".to_string(), "2025".to_string()),
                (":refresh".to_string(), "yes".to_string()),
                ("vf_region".to_string(), "EU".to_string()),
            ]
        );
    }

    #[test]
    fn test_null_values_are_left_out_of_query() {
        let fields: Vec<FilterField> =
            serde_json::from_str(r#"["region", "year", {":refresh": null}]"#).unwrap();
        let mut filter_payload = payload();
        filter_payload.insert("region".to_string(), PayloadValue::Null);

        let params = compile_params(&fields, &filter_payload);
        assert_eq!(params, vec![("vf_year".to_string(), "2024".to_string())]);
    }
}
