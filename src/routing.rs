//! Collection router (C7): a pure, total function of document provenance to
//! a named vector-store bucket.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Books,
    Articles,
    Pdfs,
    Docs,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Articles => "articles",
            Collection::Pdfs => "pdfs",
            Collection::Docs => "docs",
        }
    }
}

const ARTICLE_DOC_SETS: &[&str] = &["ibm/articles", "jetbrains"];

/// Routes `(docSet, docPath, docType, url)` to a collection. ASCII-lowercased
/// and trimmed before matching; `docSet` prevailing over a `.pdf` suffix is
/// load-bearing (see scenario 3 in the spec's testable properties).
pub fn route(doc_set: &str, doc_path: &str, doc_type: &str, url: &str) -> Collection {
    let doc_set = doc_set.trim().to_ascii_lowercase();
    let doc_path = doc_path.trim().to_ascii_lowercase();
    let doc_type = doc_type.trim().to_ascii_lowercase();
    let url = url.trim().to_ascii_lowercase();

    if doc_set.starts_with("books") {
        return Collection::Books;
    }
    if doc_type == "blog" || ARTICLE_DOC_SETS.iter().any(|prefix| doc_set.starts_with(prefix)) {
        return Collection::Articles;
    }
    if doc_path.ends_with(".pdf")
        || doc_path.contains("/pdfs/")
        || url.ends_with(".pdf")
        || url.contains("/pdfs/")
        || doc_type == "pdf"
    {
        return Collection::Pdfs;
    }
    Collection::Docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_set_books_wins_over_pdf_url() {
        assert_eq!(
            route("books/thinkjava", "", "", "file:///p.pdf"),
            Collection::Books
        );
    }

    #[test]
    fn pdf_path_routes_to_pdfs() {
        assert_eq!(route("", "file.pdf", "", "http://x"), Collection::Pdfs);
    }

    #[test]
    fn ibm_articles_doc_set_routes_to_articles() {
        assert_eq!(route("ibm/articles/a", "", "", ""), Collection::Articles);
    }

    #[test]
    fn unmatched_input_routes_to_docs() {
        assert_eq!(route("", "", "", "http://example.com/guide"), Collection::Docs);
    }

    #[test]
    fn routing_is_pure_and_case_insensitive() {
        let a = route("Books/ThinkJava", "", "", "");
        let b = route("books/thinkjava", "", "", "");
        assert_eq!(a, b);
    }

    #[test]
    fn blog_doc_type_routes_to_articles() {
        assert_eq!(route("", "", "blog", ""), Collection::Articles);
    }
}
