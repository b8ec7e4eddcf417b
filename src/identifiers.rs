//! DOI and arXiv id normalization for duplicate detection.
//!
//! Two papers are the same paper when their normalized DOIs or normalized
//! arXiv ids are equal. Normalization strips resolver URLs and scheme
//! prefixes, lower-cases, and for arXiv drops the version suffix so that
//! `arXiv:1706.03762v5` and `1706.03762` collide.

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "https://www.doi.org/",
    "http://www.doi.org/",
    "doi.org/",
    "dx.doi.org/",
    "doi:",
];

const ARXIV_PREFIXES: &[&str] = &[
    "https://arxiv.org/abs/",
    "http://arxiv.org/abs/",
    "https://arxiv.org/pdf/",
    "http://arxiv.org/pdf/",
    "https://www.arxiv.org/abs/",
    "https://www.arxiv.org/pdf/",
    "arxiv.org/abs/",
    "arxiv.org/pdf/",
    "arxiv:",
];

/// Normalize a DOI. Returns `None` for blank input or input that does not
/// look like a DOI (`10.` registrant prefix followed by `/suffix`).
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim_start().to_string();
            break;
        }
    }
    let doi = doi.trim_end_matches(['.', ',', ';', ')', ']']);

    let (registrant, suffix) = doi.split_once('/')?;
    if !registrant.starts_with("10.") || suffix.is_empty() {
        return None;
    }
    Some(doi.to_string())
}

/// Normalize an arXiv id, dropping any `vN` version suffix.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let mut id = raw.trim().to_lowercase();
    for prefix in ARXIV_PREFIXES {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest.trim_start().to_string();
            break;
        }
    }
    let id = id.trim_end_matches('/');
    let id = id.strip_suffix(".pdf").unwrap_or(id);
    let id = strip_version(id);

    if id.is_empty() || id.contains(char::is_whitespace) {
        return None;
    }
    Some(id.to_string())
}

fn strip_version(id: &str) -> &str {
    if let Some(pos) = id.rfind('v') {
        let (base, version) = id.split_at(pos);
        let digits = &version[1..];
        if !base.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return base;
        }
    }
    id
}
