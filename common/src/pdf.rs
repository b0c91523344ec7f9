// PDF merge accumulator
// Collects exported PDF parts as scratch files and joins them into one report.

use crate::errors::ArtifactError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// Display name of every merged artifact
pub const MERGED_REPORT_NAME: &str = "report.pdf";

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// A finished merge; the backing file is removed when this is dropped
#[derive(Debug)]
pub struct MergedPdf {
    file: NamedTempFile,
    pub page_count: usize,
}

impl MergedPdf {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn bytes(&self) -> Result<Vec<u8>, ArtifactError> {
        Ok(std::fs::read(self.file.path())?)
    }
}

/// PdfMerger accumulates the PDF parts of one subscriber iteration
///
/// Parts live as uniquely named files under the scratch directory and are
/// deleted when the merger is dropped.
#[derive(Debug)]
pub struct PdfMerger {
    scratch_dir: PathBuf,
    parts: Vec<NamedTempFile>,
}

impl PdfMerger {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            parts: Vec::new(),
        }
    }

    /// Store one exported PDF as the next part
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), ArtifactError> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let mut part = Builder::new()
            .prefix("part-")
            .suffix(".pdf")
            .tempfile_in(&self.scratch_dir)?;
        part.write_all(bytes)?;
        part.flush()?;

        debug!(part = %part.path().display(), bytes = bytes.len(), "PDF part stored");
        self.parts.push(part);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn part_paths(&self) -> Vec<PathBuf> {
        self.parts.iter().map(|part| part.path().to_path_buf()).collect()
    }

    /// Merge all parts in append order
    ///
    /// Unparsable parts are skipped. Returns `None` when nothing could be merged.
    pub fn finish(&self) -> Result<Option<MergedPdf>, ArtifactError> {
        let mut documents = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match Document::load(part.path()) {
                Ok(document) => documents.push(document),
                Err(e) => warn!(
                    part = %part.path().display(),
                    error = %e,
                    "Skipping PDF part that cannot be parsed"
                ),
            }
        }

        if documents.is_empty() {
            return Ok(None);
        }

        let mut merged = merge_documents(documents)?;
        let page_count = merged.get_pages().len();

        let mut file = Builder::new()
            .prefix("report-")
            .suffix(".pdf")
            .tempfile_in(&self.scratch_dir)?;
        merged
            .save_to(file.as_file_mut())
            .map_err(|e| ArtifactError::Pdf(e.to_string()))?;
        file.flush()?;

        debug!(pages = page_count, parts = self.parts.len(), "PDF parts merged");
        Ok(Some(MergedPdf { file, page_count }))
    }
}

fn inherited_attributes(document: &Document, page: &Dictionary) -> Dictionary {
    let mut page = page.clone();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    while let Some(parent_id) = parent {
        let Ok(ancestor) = document.get_dictionary(parent_id) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = ancestor.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = ancestor.get(b"Parent").and_then(Object::as_reference).ok();
    }

    page
}

fn merge_documents(documents: Vec<Document>) -> Result<Document, ArtifactError> {
    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut document in documents {
        document.renumber_objects_with(max_id);
        max_id = document.max_id + 1;

        for page_id in document.get_pages().into_values() {
            let page = document
                .get_dictionary(page_id)
                .map_err(|e| ArtifactError::Pdf(e.to_string()))?;
            pages.push((page_id, inherited_attributes(&document, page)));
        }
        objects.extend(document.objects);
    }

    let mut merged = Document::with_version("1.5");
    let mut catalog: Option<(ObjectId, Dictionary)> = None;
    let mut pages_root: Option<(ObjectId, Dictionary)> = None;

    for (object_id, object) in objects {
        let type_name = object.type_name().unwrap_or_default().to_string();
        match type_name.as_str() {
            "Catalog" => {
                if catalog.is_none() {
                    if let Ok(dictionary) = object.as_dict() {
                        catalog = Some((object_id, dictionary.clone()));
                    }
                }
            }
            "Pages" => {
                if pages_root.is_none() {
                    if let Ok(dictionary) = object.as_dict() {
                        pages_root = Some((object_id, dictionary.clone()));
                    }
                }
            }
            "Page" | "Outlines" | "Outline" => {}
            _ => {
                merged.objects.insert(object_id, object);
            }
        }
    }

    let (catalog_id, mut catalog) =
        catalog.ok_or_else(|| ArtifactError::Pdf("Catalog root not found".to_string()))?;
    let (pages_id, mut pages_root) =
        pages_root.ok_or_else(|| ArtifactError::Pdf("Pages root not found".to_string()))?;

    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    for (page_id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(page_id, Object::Dictionary(page));
    }

    pages_root.set("Count", kids.len() as i64);
    pages_root.set("Kids", kids);
    pages_root.remove(b"Parent");
    merged.objects.insert(pages_id, Object::Dictionary(pages_root));

    catalog.set("Pages", pages_id);
    catalog.remove(b"Outlines");
    merged.objects.insert(catalog_id, Object::Dictionary(catalog));

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.len() as u32;
    merged.renumber_objects();
    merged.compress();

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};
    use tempfile::TempDir;

    fn blank_pdf(page_count: usize) -> Vec<u8> {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();

        let mut kids = Vec::new();
        for _ in 0..page_count {
            let content_id = document.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_merge_keeps_all_pages() {
        let dir = TempDir::new().unwrap();
        let mut merger = PdfMerger::new(dir.path());
        merger.append(&blank_pdf(2)).unwrap();
        merger.append(&blank_pdf(3)).unwrap();

        let merged = merger.finish().unwrap().expect("merged artifact");
        assert_eq!(merged.page_count, 5);

        let reloaded = Document::load_mem(&merged.bytes().unwrap()).unwrap();
        assert_eq!(reloaded.get_pages().len(), 5);
    }

    #[test]
    fn test_pages_inherit_media_box() {
        let dir = TempDir::new().unwrap();
        let mut merger = PdfMerger::new(dir.path());
        merger.append(&blank_pdf(1)).unwrap();

        let merged = merger.finish().unwrap().unwrap();
        let reloaded = Document::load_mem(&merged.bytes().unwrap()).unwrap();
        let page_id = *reloaded.get_pages().values().next().unwrap();
        let page = reloaded.get_dictionary(page_id).unwrap();
        assert!(page.has(b"MediaBox"));
    }

    #[test]
    fn test_invalid_part_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut merger = PdfMerger::new(dir.path());
        merger.append(b"not a pdf").unwrap();
        merger.append(&blank_pdf(1)).unwrap();

        let merged = merger.finish().unwrap().unwrap();
        assert_eq!(merged.page_count, 1);
    }

    #[test]
    fn test_no_parts_no_artifact() {
        let dir = TempDir::new().unwrap();
        let merger = PdfMerger::new(dir.path());
        assert!(merger.is_empty());
        assert!(merger.finish().unwrap().is_none());

        let mut merger = PdfMerger::new(dir.path());
        merger.append(b"garbage").unwrap();
        assert!(merger.finish().unwrap().is_none());
    }

    #[test]
    fn test_scratch_files_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let mut merger = PdfMerger::new(dir.path());
        merger.append(&blank_pdf(1)).unwrap();
        let parts = merger.part_paths();
        let merged = merger.finish().unwrap().unwrap();
        let merged_path = merged.path().to_path_buf();

        assert!(parts.iter().all(|p| p.exists()));
        drop(merger);
        drop(merged);

        assert!(parts.iter().all(|p| !p.exists()));
        assert!(!merged_path.exists());
    }
}
