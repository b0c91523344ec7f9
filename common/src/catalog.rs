// Attachment resolution
// Maps attachment specs to verified object identifiers against a catalog snapshot.

use crate::errors::{DeliveryError, UserError};
use crate::models::{AttachmentSpec, EmailRule, ResolvedAttachment, TableauObject};
use crate::tableau::{TableauApi, ViewRow, WorkbookRow};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

/// Point-in-time listing of the workbooks visible on the site
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    workbooks: Vec<WorkbookRow>,
}

impl Catalog {
    /// Take the snapshot; it is read-only for the rest of the run
    pub async fn snapshot(api: &dyn TableauApi) -> Result<Self, DeliveryError> {
        let workbooks = api.list_workbooks().await?;
        Ok(Self::from_rows(workbooks))
    }

    pub fn from_rows(workbooks: Vec<WorkbookRow>) -> Self {
        Self { workbooks }
    }

    /// All workbooks with exactly this name and project
    pub fn find_workbooks(&self, name: &str, project: &str) -> Vec<&WorkbookRow> {
        self.workbooks
            .iter()
            .filter(|row| row.name == name && row.project == project)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResolutionKey {
    object: String,
    workbook: String,
    project: String,
    view: Option<String>,
}

impl ResolutionKey {
    fn of(spec: &AttachmentSpec) -> Self {
        Self {
            object: spec.tableau_object.as_str().to_string(),
            workbook: spec.workbook.clone(),
            project: spec.project.clone(),
            view: spec.view.clone(),
        }
    }
}

/// AttachmentResolver turns attachment specs into resolved attachments
///
/// Name lookups go against the catalog snapshot. View lists are fetched
/// lazily, once per workbook. Repeated lookups of the same object are
/// answered from memory.
pub struct AttachmentResolver<'a> {
    catalog: &'a Catalog,
    api: &'a dyn TableauApi,
    views: HashMap<String, Vec<ViewRow>>,
    resolved: HashMap<ResolutionKey, String>,
    verified: HashSet<String>,
}

impl<'a> AttachmentResolver<'a> {
    pub fn new(catalog: &'a Catalog, api: &'a dyn TableauApi) -> Self {
        Self {
            catalog,
            api,
            views: HashMap::new(),
            resolved: HashMap::new(),
            verified: HashSet::new(),
        }
    }

    /// Resolve every attachment belonging to the due rules, in table order
    #[instrument(skip_all, fields(rules = due.len()))]
    pub async fn resolve_all(
        &mut self,
        due: &[&EmailRule],
        attachments: &[AttachmentSpec],
    ) -> Result<Vec<ResolvedAttachment>, DeliveryError> {
        let due_ids: HashSet<&str> = due.iter().map(|rule| rule.email_id.as_str()).collect();
        let mut resolved = Vec::new();

        for spec in attachments
            .iter()
            .filter(|spec| due_ids.contains(spec.email_id.as_str()))
        {
            let luid = self.resolve(spec).await?;
            resolved.push(ResolvedAttachment {
                spec: spec.clone(),
                luid,
            });
        }

        info!(attachments = resolved.len(), "Attachments resolved");
        Ok(resolved)
    }

    /// Resolve a single spec to its identifier
    pub async fn resolve(&mut self, spec: &AttachmentSpec) -> Result<String, DeliveryError> {
        match &spec.luid {
            Some(luid) => self.verify(spec, luid).await,
            None => self.lookup(spec).await,
        }
    }

    async fn verify(&mut self, spec: &AttachmentSpec, luid: &str) -> Result<String, DeliveryError> {
        let cache_key = format!("{}:{}", spec.tableau_object.as_str(), luid);
        if self.verified.contains(&cache_key) {
            return Ok(luid.to_string());
        }

        let exists = match &spec.tableau_object {
            TableauObject::Workbook => self.api.workbook_exists(luid).await?,
            TableauObject::View => self.api.view_exists(luid).await?,
            TableauObject::Other(object) => {
                return Err(UserError::UnexpectedObjectType {
                    email_id: spec.email_id.clone(),
                    object: object.clone(),
                }
                .into())
            }
        };

        if !exists {
            let error = match spec.tableau_object {
                TableauObject::View => UserError::ViewNotFound {
                    luid: luid.to_string(),
                    email_id: spec.email_id.clone(),
                },
                _ => UserError::WorkbookNotFound {
                    luid: luid.to_string(),
                    email_id: spec.email_id.clone(),
                },
            };
            return Err(error.into());
        }

        debug!(luid, email_id = %spec.email_id, "Pre-supplied identifier verified");
        self.verified.insert(cache_key);
        Ok(luid.to_string())
    }

    async fn lookup(&mut self, spec: &AttachmentSpec) -> Result<String, DeliveryError> {
        let key = ResolutionKey::of(spec);
        if let Some(luid) = self.resolved.get(&key) {
            return Ok(luid.clone());
        }

        let workbook_id = {
            let matches = self.catalog.find_workbooks(&spec.workbook, &spec.project);
            if matches.len() != 1 {
                return Err(UserError::AmbiguousWorkbook {
                    project: spec.project.clone(),
                    workbook: spec.workbook.clone(),
                    email_id: spec.email_id.clone(),
                    matches: matches.len(),
                }
                .into());
            }
            matches[0].id.clone()
        };

        let luid = match &spec.tableau_object {
            TableauObject::Workbook => workbook_id,
            TableauObject::View => {
                let view_name = spec.view.as_deref().unwrap_or_default();
                let views = self.views_of(&workbook_id).await?;
                let matches: Vec<&ViewRow> =
                    views.iter().filter(|view| view.name == view_name).collect();
                if matches.len() != 1 {
                    return Err(UserError::AmbiguousView {
                        project: spec.project.clone(),
                        workbook: spec.workbook.clone(),
                        view: view_name.to_string(),
                        email_id: spec.email_id.clone(),
                        matches: matches.len(),
                    }
                    .into());
                }
                matches[0].id.clone()
            }
            TableauObject::Other(object) => {
                return Err(UserError::UnexpectedObjectType {
                    email_id: spec.email_id.clone(),
                    object: object.clone(),
                }
                .into())
            }
        };

        debug!(
            workbook = %spec.workbook,
            project = %spec.project,
            luid = %luid,
            "Attachment resolved by name"
        );
        self.resolved.insert(key, luid.clone());
        Ok(luid)
    }

    async fn views_of(&mut self, workbook_id: &str) -> Result<&Vec<ViewRow>, DeliveryError> {
        if !self.views.contains_key(workbook_id) {
            let views = self.api.list_views(workbook_id).await?;
            self.views.insert(workbook_id.to_string(), views);
        }
        Ok(&self.views[workbook_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mode, Periodicity};
    use crate::tableau::MockTableauApi;

    fn catalog() -> Catalog {
        Catalog::from_rows(vec![
            WorkbookRow {
                id: "wb-sales".to_string(),
                name: "Sales".to_string(),
                project: "Finance".to_string(),
            },
            WorkbookRow {
                id: "wb-ops-1".to_string(),
                name: "Ops".to_string(),
                project: "Internal".to_string(),
            },
            WorkbookRow {
                id: "wb-ops-2".to_string(),
                name: "Ops".to_string(),
                project: "Internal".to_string(),
            },
        ])
    }

    fn spec(object: TableauObject, workbook: &str, view: Option<&str>, luid: Option<&str>) -> AttachmentSpec {
        AttachmentSpec {
            email_id: "42".to_string(),
            tableau_object: object,
            workbook: workbook.to_string(),
            project: if workbook == "Ops" { "Internal" } else { "Finance" }.to_string(),
            view: view.map(str::to_string),
            attachment_type: "pdf".to_string(),
            filter_fields: Vec::new(),
            luid: luid.map(str::to_string),
        }
    }

    fn rule(email_id: &str) -> EmailRule {
        EmailRule {
            email_id: email_id.to_string(),
            mode: Mode::Run,
            periodicity: Periodicity::Daily,
            periodicity_specification: None,
            timing: Some("morning".to_string()),
            group_id: "g1".to_string(),
            owner: "owner@example.com".to_string(),
            subject: "Report".to_string(),
            message: "Hello".to_string(),
            merge_attachments: false,
        }
    }

    fn sales_views() -> Vec<ViewRow> {
        vec![
            ViewRow {
                id: "v-q1".to_string(),
                name: "Q1".to_string(),
            },
            ViewRow {
                id: "v-q2".to_string(),
                name: "Q2".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_workbook_resolved_by_name() {
        let catalog = catalog();
        let api = MockTableauApi::new();
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let luid = resolver
            .resolve(&spec(TableauObject::Workbook, "Sales", None, None))
            .await
            .unwrap();
        assert_eq!(luid, "wb-sales");
    }

    #[tokio::test]
    async fn test_views_fetched_once_per_workbook() {
        let catalog = catalog();
        let mut api = MockTableauApi::new();
        api.expect_list_views()
            .withf(|id| id == "wb-sales")
            .times(1)
            .returning(|_| Ok(sales_views()));
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let q1 = resolver
            .resolve(&spec(TableauObject::View, "Sales", Some("Q1"), None))
            .await
            .unwrap();
        let q2 = resolver
            .resolve(&spec(TableauObject::View, "Sales", Some("Q2"), None))
            .await
            .unwrap();
        let q1_again = resolver
            .resolve(&spec(TableauObject::View, "Sales", Some("Q1"), None))
            .await
            .unwrap();

        assert_eq!(q1, "v-q1");
        assert_eq!(q2, "v-q2");
        assert_eq!(q1_again, q1);
    }

    #[tokio::test]
    async fn test_ambiguous_workbook_is_rejected() {
        let catalog = catalog();
        let api = MockTableauApi::new();
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let error = resolver
            .resolve(&spec(TableauObject::Workbook, "Ops", None, None))
            .await
            .unwrap_err();

        match error {
            DeliveryError::User(UserError::AmbiguousWorkbook {
                project,
                workbook,
                email_id,
                matches,
            }) => {
                assert_eq!(project, "Internal");
                assert_eq!(workbook, "Ops");
                assert_eq!(email_id, "42");
                assert_eq!(matches, 2);
            }
            other => panic!("Expected AmbiguousWorkbook, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_workbook_is_rejected() {
        let catalog = catalog();
        let api = MockTableauApi::new();
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let error = resolver
            .resolve(&spec(TableauObject::Workbook, "Nope", None, None))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            DeliveryError::User(UserError::AmbiguousWorkbook { matches: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_view_is_rejected() {
        let catalog = catalog();
        let mut api = MockTableauApi::new();
        api.expect_list_views().returning(|_| Ok(sales_views()));
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let error = resolver
            .resolve(&spec(TableauObject::View, "Sales", Some("Q9"), None))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            DeliveryError::User(UserError::AmbiguousView { matches: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_pre_supplied_luid_verified_once() {
        let catalog = catalog();
        let mut api = MockTableauApi::new();
        api.expect_view_exists()
            .withf(|luid| luid == "v-known")
            .times(1)
            .returning(|_| Ok(true));
        let mut resolver = AttachmentResolver::new(&catalog, &api);
        let known = spec(TableauObject::View, "Whatever", Some("X"), Some("v-known"));

        assert_eq!(resolver.resolve(&known).await.unwrap(), "v-known");
        assert_eq!(resolver.resolve(&known).await.unwrap(), "v-known");
    }

    #[tokio::test]
    async fn test_pre_supplied_luid_not_found_is_user_error() {
        let catalog = catalog();
        let mut api = MockTableauApi::new();
        api.expect_workbook_exists().returning(|_| Ok(false));
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let error = resolver
            .resolve(&spec(TableauObject::Workbook, "Sales", None, Some("wb-gone")))
            .await
            .unwrap_err();

        assert!(error.is_user_error());
        assert!(matches!(
            error,
            DeliveryError::User(UserError::WorkbookNotFound { ref luid, .. }) if luid == "wb-gone"
        ));
    }

    #[tokio::test]
    async fn test_resolve_all_only_due_rules_in_table_order() {
        let catalog = catalog();
        let mut api = MockTableauApi::new();
        api.expect_list_views().times(1).returning(|_| Ok(sales_views()));
        let mut resolver = AttachmentResolver::new(&catalog, &api);

        let mut other = spec(TableauObject::Workbook, "Ops", None, None);
        other.email_id = "99".to_string();
        let attachments = vec![
            spec(TableauObject::View, "Sales", Some("Q2"), None),
            other,
            spec(TableauObject::Workbook, "Sales", None, None),
        ];
        let due_rule = rule("42");

        let resolved = resolver
            .resolve_all(&[&due_rule], &attachments)
            .await
            .unwrap();

        let luids: Vec<&str> = resolved.iter().map(|r| r.luid.as_str()).collect();
        assert_eq!(luids, vec!["v-q2", "wb-sales"]);
    }
}
